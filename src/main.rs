use game_save::{JsonSave, SaveError, SaveManager, Settings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: game_save [options] <command>

options:
  --settings <file>   read settings from a JSON file
  --root <dir>        store saves under <dir> instead of the user data directory
  --game <name>       game directory name (default: \"Test Game\")
  --company <name>    company directory name (default: \"Test Company\")
  --backups <n>       number of rolling backups, 0 disables them (default: 2)

commands:
  save <name> <text>  save <text> under <name>
  load <name>         load <name> and print its text
  corrupt <name>      overwrite the main file of <name> with garbage
  delete <name>       remove every file of <name>
  list                list saves, newest first
";

/// The demo's game state
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct DemoSave {
    text: String,
}

type DemoRecord = JsonSave<DemoSave>;

enum Command {
    Save { name: String, text: String },
    Load { name: String },
    Corrupt { name: String },
    Delete { name: String },
    List,
}

fn main() -> ExitCode {
    init_tracing();

    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("{}", USAGE);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

fn run(args: Vec<String>) -> Result<(), SaveError> {
    let (settings, command) = parse_args(args)?;

    let manager = SaveManager::new();
    manager.initialize(settings)?;
    info!(path = %manager.save_location()?.display(), "save location");

    match command {
        Command::Save { name, text } => {
            let record = manager.create::<DemoRecord>(&name)?;
            record
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .data
                .text = text;

            manager
                .save(&name, record)?
                .on_success(|_| println!("Saved."))
                .on_error(|err| println!("Save failed: {}", err))
                .wait()?;
        }
        Command::Load { name } => {
            let result = manager.load::<DemoRecord>(&name, true)?.wait()?;
            if result.used_backup_file {
                warn!(save = %name, "main save was unusable, a backup was loaded");
            }
            let record = result.save.lock().unwrap_or_else(|e| e.into_inner());
            match record.saved_at {
                Some(at) => println!("{} (saved {})", record.data.text, at.to_rfc3339()),
                None => println!("{}", record.data.text),
            }
        }
        Command::Corrupt { name } => {
            let path = manager
                .save_location()?
                .join(format!("{}.{}", name, game_save::save::SAVE_EXTENSION));
            std::fs::write(&path, b"\x00 not a save \xff")?;
            println!("Corrupted {}", path.display());
        }
        Command::Delete { name } => {
            manager.delete(&name)?;
            println!("Deleted {}", name);
        }
        Command::List => {
            for save in manager.list_saves()? {
                println!(
                    "{:<24} {}  backups: {}",
                    save.name,
                    save.modified.format("%Y-%m-%d %H:%M:%S"),
                    save.backups
                );
            }
        }
    }

    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<(Settings, Command), SaveError> {
    let mut settings = Settings::new("Test Game");
    settings.company_name = Some("Test Company".to_string());
    let mut positional = Vec::new();

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .ok_or_else(|| SaveError::Configuration(format!("{} needs a value", flag)))
        };

        match arg.as_str() {
            "--settings" => settings = Settings::from_json_file(value("--settings")?)?,
            "--root" => settings.save_root = Some(PathBuf::from(value("--root")?)),
            "--game" => settings.game_name = value("--game")?,
            "--company" => settings.company_name = Some(value("--company")?),
            "--backups" => {
                let count: u32 = value("--backups")?
                    .parse()
                    .map_err(|_| SaveError::Configuration("--backups needs a number".to_string()))?;
                settings.use_rolling_backups = count > 0;
                settings.backup_count = count;
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = positional.next().unwrap_or_default();
    let mut next_name = || {
        positional
            .next()
            .ok_or_else(|| SaveError::Configuration(format!("{} needs a save name", command)))
    };

    let parsed = match command.as_str() {
        "save" => {
            let name = next_name()?;
            let text = next_name()
                .map_err(|_| SaveError::Configuration("save needs text".to_string()))?;
            Command::Save { name, text }
        }
        "load" => Command::Load { name: next_name()? },
        "corrupt" => Command::Corrupt { name: next_name()? },
        "delete" => Command::Delete { name: next_name()? },
        "list" => Command::List,
        other => {
            return Err(SaveError::Configuration(format!("unknown command '{}'", other)));
        }
    };
    Ok((settings, parsed))
}
