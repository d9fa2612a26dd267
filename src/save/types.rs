//! Save system types
//!
//! Settings, load results and the error type shared by every part of the
//! save system.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A save record shared between the caller, the cache and the worker thread
pub type Shared<T> = Arc<Mutex<T>>;

/// Extension of the main save file
pub const SAVE_EXTENSION: &str = "save";

/// Suffix appended to the main path for backup slots (followed by 1..=N)
pub const BACKUP_SUFFIX: &str = ".backup";

/// Suffix appended to the main path while a save is being written
pub const TEMP_SUFFIX: &str = ".temp";

/// Default number of rolling backups kept per save name
pub const DEFAULT_BACKUP_COUNT: u32 = 2;

/// Current version of the JSON save envelope
pub const CURRENT_SAVE_VERSION: u32 = 1;

/// Configuration captured by `SaveManager::initialize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Optional company directory placed above the game directory
    pub company_name: Option<String>,
    /// Game directory name; required
    pub game_name: String,
    /// Keep a chain of backups for every save name
    pub use_rolling_backups: bool,
    /// Number of backup slots; must be positive when backups are on
    pub backup_count: u32,
    /// Overrides the platform data directory as the root for saves
    pub save_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            company_name: None,
            game_name: String::new(),
            use_rolling_backups: true,
            backup_count: DEFAULT_BACKUP_COUNT,
            save_root: None,
        }
    }
}

impl Settings {
    /// Settings for a game with every other option at its default
    pub fn new(game_name: impl Into<String>) -> Self {
        Settings {
            game_name: game_name.into(),
            ..Settings::default()
        }
    }

    /// Reads settings from a JSON file; missing keys take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SaveError> {
        let json = fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&json)?;
        Ok(settings)
    }

    /// Checks the settings before they are frozen
    pub fn validate(&self) -> Result<(), SaveError> {
        if self.game_name.is_empty() {
            return Err(SaveError::Configuration(
                "game_name must be a non-empty string".to_string(),
            ));
        }
        check_directory_name("game_name", &self.game_name)?;

        if let Some(company) = self.company_name.as_deref() {
            if !company.is_empty() {
                check_directory_name("company_name", company)?;
            }
        }

        if self.use_rolling_backups && self.backup_count == 0 {
            return Err(SaveError::Configuration(
                "backup_count must be greater than zero when rolling backups are enabled"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn check_directory_name(field: &str, name: &str) -> Result<(), SaveError> {
    check_file_name(name).map_err(|msg| SaveError::Configuration(format!("{} {}", field, msg)))
}

/// Rejects names that cannot be used as a single path component on every
/// desktop platform
pub(crate) fn check_file_name(name: &str) -> Result<(), String> {
    const ILLEGAL: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];

    if name.is_empty() {
        return Err("cannot be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("cannot be '{}'", name));
    }
    if let Some(c) = name.chars().find(|c| ILLEGAL.contains(c) || c.is_control()) {
        return Err(format!("contains an illegal character: {:?}", c));
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err("cannot end with a dot or a space".to_string());
    }
    Ok(())
}

/// The result of `SaveManager::load`
#[derive(Debug)]
pub struct LoadResult<T> {
    /// The loaded record; the same instance the cache holds
    pub save: Shared<T>,
    /// The record came from the cache without touching the disk
    pub was_cached: bool,
    /// The main file was unusable and a backup was loaded instead
    pub used_backup_file: bool,
}

// Manual impl: a derive would require `T: Clone`
impl<T> Clone for LoadResult<T> {
    fn clone(&self) -> Self {
        LoadResult {
            save: Arc::clone(&self.save),
            was_cached: self.was_cached,
            used_backup_file: self.used_backup_file,
        }
    }
}

/// Error types for save/load operations
///
/// Cloneable so a single failure can be handed to every error callback
/// registered on a `Future`.
#[derive(Debug, Clone)]
pub enum SaveError {
    /// Invalid settings passed to `initialize`
    Configuration(String),
    /// `initialize` was called a second time
    AlreadyInitialized,
    /// `load`/`save` was called before `initialize`
    NotInitialized,
    /// A save name that cannot be used as a file name
    InvalidName(String),
    /// Neither the main file nor any backup could be loaded
    SaveNotFound(String),
    /// A record failed to serialize or deserialize itself
    Serialization(String),
    /// The save was written by a newer version of the format
    InvalidVersion(u32),
    IoError(Arc<std::io::Error>),
    /// The background worker panicked before resolving its result
    WorkerPanicked,
}

impl SaveError {
    /// Shorthand for record implementations reporting bad data
    pub fn serialization(msg: impl Into<String>) -> Self {
        SaveError::Serialization(msg.into())
    }
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            SaveError::AlreadyInitialized => write!(f, "Save system is already initialized"),
            SaveError::NotInitialized => write!(f, "You must call initialize first"),
            SaveError::InvalidName(msg) => write!(f, "Invalid save name: {}", msg),
            SaveError::SaveNotFound(name) => write!(f, "No game save found with name '{}'", name),
            SaveError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            SaveError::InvalidVersion(v) => write!(f, "Invalid save version: {}", v),
            SaveError::IoError(e) => write!(f, "IO error: {}", e),
            SaveError::WorkerPanicked => write!(f, "Save worker panicked"),
        }
    }
}

impl std::error::Error for SaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SaveError::IoError(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SaveError {
    fn from(err: std::io::Error) -> Self {
        SaveError::IoError(Arc::new(err))
    }
}

impl From<serde_json::Error> for SaveError {
    fn from(err: serde_json::Error) -> Self {
        SaveError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::new("Test");
        assert!(settings.use_rolling_backups);
        assert_eq!(settings.backup_count, 2);
        assert!(settings.company_name.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_empty_game_name_rejected() {
        let settings = Settings::new("");
        assert!(matches!(settings.validate(), Err(SaveError::Configuration(_))));
    }

    #[test]
    fn test_unsafe_names_rejected() {
        for name in ["a/b", "a\\b", "what?", "..", "trailing.", "tab\tname"] {
            let settings = Settings::new(name);
            assert!(
                matches!(settings.validate(), Err(SaveError::Configuration(_))),
                "{:?} should be rejected",
                name
            );
        }

        let mut settings = Settings::new("Game");
        settings.company_name = Some("Bad:Company".to_string());
        assert!(matches!(settings.validate(), Err(SaveError::Configuration(_))));

        // An empty company is the same as no company
        settings.company_name = Some(String::new());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_backups_only_rejected_when_rolling() {
        let mut settings = Settings::new("Game");
        settings.backup_count = 0;
        assert!(matches!(settings.validate(), Err(SaveError::Configuration(_))));

        settings.use_rolling_backups = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "game_name": "Json Game", "backup_count": 4 }"#).unwrap();

        let settings = Settings::from_json_file(&path).unwrap();
        assert_eq!(settings.game_name, "Json Game");
        assert_eq!(settings.backup_count, 4);
        assert!(settings.use_rolling_backups);
    }

    #[test]
    fn test_error_display() {
        let err = SaveError::SaveNotFound("slot1".to_string());
        assert_eq!(err.to_string(), "No game save found with name 'slot1'");

        let io: SaveError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(io.to_string().starts_with("IO error"));
    }
}
