//! Rolling backup engine
//!
//! Every save name owns a family of files in the save directory:
//!
//! ```text
//! <name>.save            main file
//! <name>.save.backup1    most recent backup
//! <name>.save.backupN    oldest backup
//! <name>.save.temp       only exists while a save is being written
//! ```
//!
//! Saves are written to the temp file first and only moved into place once
//! the record has serialized completely, so the main file is never left
//! half-written. Loads fall back through the backups when the main file is
//! missing or unreadable and then repair the chain so it has no gaps.

use super::record::SaveRecord;
use super::types::{BACKUP_SUFFIX, SAVE_EXTENSION, SaveError, TEMP_SUFFIX};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The files on disk belonging to one save name
#[derive(Debug, Clone)]
pub struct SaveSlot {
    name: String,
    main: PathBuf,
    temp: PathBuf,
    /// Backup paths, most recent first; empty in single-file mode
    backups: Vec<PathBuf>,
}

impl SaveSlot {
    /// Builds the paths for `name` inside `dir`
    ///
    /// `backup_count` of zero gives a single-file slot.
    pub fn new(dir: &Path, name: &str, backup_count: u32) -> Self {
        let main = dir.join(format!("{}.{}", name, SAVE_EXTENSION));
        let backups = (1..=backup_count)
            .map(|n| with_suffix(&main, &format!("{}{}", BACKUP_SUFFIX, n)))
            .collect();

        SaveSlot {
            name: name.to_string(),
            temp: with_suffix(&main, TEMP_SUFFIX),
            main,
            backups,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main_path(&self) -> &Path {
        &self.main
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Path of backup `index`, 0 being the most recent
    pub fn backup_path(&self, index: usize) -> Option<&Path> {
        self.backups.get(index).map(PathBuf::as_path)
    }

    pub fn backup_count(&self) -> usize {
        self.backups.len()
    }

    pub fn uses_backups(&self) -> bool {
        !self.backups.is_empty()
    }

    /// True if the main file or any backup is on disk
    pub fn exists(&self) -> bool {
        self.main.exists() || self.backups.iter().any(|p| p.exists())
    }

    /// Number of backup files currently on disk
    pub fn backups_on_disk(&self) -> usize {
        self.backups.iter().filter(|p| p.exists()).count()
    }

    /// Loads `record` from disk
    ///
    /// Returns `true` if a backup had to be used.
    pub fn load<R: SaveRecord + ?Sized>(&self, record: &mut R) -> Result<bool, SaveError> {
        if self.uses_backups() {
            self.load_with_backups(record)
        } else {
            match read_into(&self.main, record) {
                Err(SaveError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(SaveError::SaveNotFound(self.name.clone()))
                }
                other => other.map(|_| false),
            }
        }
    }

    /// Writes `record` to disk, rotating backups if enabled
    pub fn save<R: SaveRecord + ?Sized>(&self, record: &R) -> Result<(), SaveError> {
        if let Err(err) = write_into(&self.temp, record) {
            remove_best_effort(&self.temp);
            return Err(err);
        }

        if self.uses_backups() {
            // Oldest end first so no rename lands on a file still to be moved
            for index in (0..self.backups.len() - 1).rev() {
                let from = &self.backups[index];
                if from.exists() {
                    fs::rename(from, &self.backups[index + 1])?;
                }
            }

            if self.main.exists() {
                fs::rename(&self.main, &self.backups[0])?;
            }
        }

        fs::rename(&self.temp, &self.main)?;
        debug!(save = %self.name, path = %self.main.display(), "save_written");
        Ok(())
    }

    /// Removes the main file, every backup and a leftover temp file
    pub fn delete(&self) -> Result<(), SaveError> {
        let paths = std::iter::once(&self.main)
            .chain(self.backups.iter())
            .chain(std::iter::once(&self.temp));

        for path in paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn load_with_backups<R: SaveRecord + ?Sized>(&self, record: &mut R) -> Result<bool, SaveError> {
        match read_into(&self.main, record) {
            Ok(()) => return Ok(false),
            Err(err) => log_failed_read(&self.main, &err),
        }

        record.reset();
        let mut found = None;
        for (index, path) in self.backups.iter().enumerate() {
            match read_into(path, record) {
                Ok(()) => {
                    found = Some(index);
                    break;
                }
                Err(err) => {
                    log_failed_read(path, &err);
                    record.reset();
                }
            }
        }

        // Main is bad or missing, and everything newer than the good backup
        // is either bad too or superseded by it
        remove_best_effort(&self.main);
        let newer = found.unwrap_or(self.backups.len());
        for path in &self.backups[..newer] {
            remove_best_effort(path);
        }

        let Some(index) = found else {
            return Err(SaveError::SaveNotFound(self.name.clone()));
        };

        fs::rename(&self.backups[index], &self.main)?;
        warn!(
            save = %self.name,
            backup = index + 1,
            "main save unusable, restored from backup"
        );

        // Close the gap: backup index+1 becomes backup 0 and so on
        let gap = index + 1;
        for from_index in gap..self.backups.len() {
            let from = &self.backups[from_index];
            let to = &self.backups[from_index - gap];
            if from.exists() {
                if let Err(e) = fs::rename(from, to) {
                    warn!(
                        from = %from.display(),
                        to = %to.display(),
                        error = %e,
                        "failed to shift backup"
                    );
                }
            } else {
                remove_best_effort(to);
            }
        }
        for path in &self.backups[self.backups.len().saturating_sub(gap)..] {
            remove_best_effort(path);
        }

        Ok(true)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(suffix);
    PathBuf::from(os)
}

fn read_into<R: SaveRecord + ?Sized>(path: &Path, record: &mut R) -> Result<(), SaveError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    record.load(&mut reader)
}

fn write_into<R: SaveRecord + ?Sized>(path: &Path, record: &R) -> Result<(), SaveError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    record.save(&mut writer)?;
    writer.flush()?;

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn log_failed_read(path: &Path, err: &SaveError) {
    match err {
        SaveError::IoError(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "save file missing");
        }
        _ => warn!(path = %path.display(), error = %err, "failed to load save file"),
    }
}

/// Deletes a file, logging and swallowing any failure
fn remove_best_effort(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed save file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove save file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    const MAGIC: &str = "TEXTSAVE\n";

    /// Minimal record: a magic header followed by text
    #[derive(Default)]
    struct TextRecord {
        text: String,
        fail_save: bool,
        load_attempts: usize,
    }

    impl TextRecord {
        fn with_text(text: &str) -> Self {
            TextRecord {
                text: text.to_string(),
                ..TextRecord::default()
            }
        }
    }

    impl SaveRecord for TextRecord {
        fn reset(&mut self) {
            self.text.clear();
        }

        fn save(&self, output: &mut dyn Write) -> Result<(), SaveError> {
            output.write_all(MAGIC.as_bytes())?;
            if self.fail_save {
                return Err(SaveError::serialization("intentionally failing the save"));
            }
            output.write_all(self.text.as_bytes())?;
            Ok(())
        }

        fn load(&mut self, input: &mut dyn Read) -> Result<(), SaveError> {
            self.load_attempts += 1;
            let mut contents = String::new();
            input
                .read_to_string(&mut contents)
                .map_err(|e| SaveError::serialization(e.to_string()))?;
            match contents.strip_prefix(MAGIC) {
                Some(text) => {
                    self.text = text.to_string();
                    Ok(())
                }
                None => Err(SaveError::serialization("missing header")),
            }
        }
    }

    fn setup(backups: u32) -> (TempDir, SaveSlot) {
        let dir = TempDir::new().unwrap();
        let slot = SaveSlot::new(dir.path(), "slot1", backups);
        (dir, slot)
    }

    fn write_raw(path: &Path, text: &str) {
        fs::write(path, format!("{}{}", MAGIC, text)).unwrap();
    }

    fn read_raw(path: &Path) -> String {
        let contents = fs::read_to_string(path).unwrap();
        contents.trim_start_matches(MAGIC).to_string()
    }

    #[test]
    fn test_paths() {
        let (dir, slot) = setup(2);
        assert_eq!(slot.main_path(), dir.path().join("slot1.save"));
        assert_eq!(slot.backup_path(0).unwrap(), dir.path().join("slot1.save.backup1"));
        assert_eq!(slot.backup_path(1).unwrap(), dir.path().join("slot1.save.backup2"));
        assert!(slot.backup_path(2).is_none());
        assert_eq!(slot.temp_path(), dir.path().join("slot1.save.temp"));
    }

    #[test]
    fn test_save_then_load_uses_main() {
        let (_dir, slot) = setup(2);
        slot.save(&TextRecord::with_text("hello")).unwrap();

        let mut record = TextRecord::default();
        let used_backup = slot.load(&mut record).unwrap();

        assert!(!used_backup);
        assert_eq!(record.text, "hello");
        assert_eq!(record.load_attempts, 1);
        assert!(!slot.temp_path().exists());
    }

    #[test]
    fn test_save_rotates_backups() {
        let (_dir, slot) = setup(2);
        for text in ["v1", "v2", "v3", "v4"] {
            slot.save(&TextRecord::with_text(text)).unwrap();
        }

        assert_eq!(read_raw(slot.main_path()), "v4");
        assert_eq!(read_raw(slot.backup_path(0).unwrap()), "v3");
        assert_eq!(read_raw(slot.backup_path(1).unwrap()), "v2");
        // Nothing beyond the configured chain
        assert!(!with_suffix(slot.main_path(), ".backup3").exists());
    }

    #[test]
    fn test_failed_save_leaves_chain_untouched() {
        let (_dir, slot) = setup(2);
        slot.save(&TextRecord::with_text("v1")).unwrap();
        slot.save(&TextRecord::with_text("v2")).unwrap();

        let mut failing = TextRecord::with_text("v3");
        failing.fail_save = true;
        let result = slot.save(&failing);

        assert!(matches!(result, Err(SaveError::Serialization(_))));
        assert_eq!(read_raw(slot.main_path()), "v2");
        assert_eq!(read_raw(slot.backup_path(0).unwrap()), "v1");
        assert!(!slot.backup_path(1).unwrap().exists());
        assert!(!slot.temp_path().exists());
    }

    #[test]
    fn test_corrupt_main_promotes_first_backup() {
        let (_dir, slot) = setup(2);
        write_raw(slot.backup_path(0).unwrap(), "b1");
        write_raw(slot.backup_path(1).unwrap(), "b2");
        fs::write(slot.main_path(), b"\xff\xfe garbage").unwrap();

        let mut record = TextRecord::default();
        let used_backup = slot.load(&mut record).unwrap();

        assert!(used_backup);
        assert_eq!(record.text, "b1");
        assert_eq!(read_raw(slot.main_path()), "b1");
        assert_eq!(read_raw(slot.backup_path(0).unwrap()), "b2");
        assert!(!slot.backup_path(1).unwrap().exists());

        // The repaired chain loads straight from main
        let mut again = TextRecord::default();
        assert!(!slot.load(&mut again).unwrap());
        assert_eq!(again.text, "b1");
    }

    #[test]
    fn test_recovery_from_deeper_backup_closes_gap() {
        let (_dir, slot) = setup(4);
        fs::write(slot.main_path(), b"bad").unwrap();
        fs::write(slot.backup_path(0).unwrap(), b"bad").unwrap();
        write_raw(slot.backup_path(1).unwrap(), "b2");
        write_raw(slot.backup_path(2).unwrap(), "b3");
        write_raw(slot.backup_path(3).unwrap(), "b4");

        let mut record = TextRecord::default();
        assert!(slot.load(&mut record).unwrap());
        assert_eq!(record.text, "b2");
        assert_eq!(record.load_attempts, 3);

        assert_eq!(read_raw(slot.main_path()), "b2");
        assert_eq!(read_raw(slot.backup_path(0).unwrap()), "b3");
        assert_eq!(read_raw(slot.backup_path(1).unwrap()), "b4");
        assert!(!slot.backup_path(2).unwrap().exists());
        assert!(!slot.backup_path(3).unwrap().exists());
    }

    #[test]
    fn test_unremovable_backup_does_not_fail_recovery() {
        let (_dir, slot) = setup(2);
        fs::write(slot.main_path(), b"bad").unwrap();
        fs::create_dir(slot.backup_path(0).unwrap()).unwrap();
        write_raw(slot.backup_path(1).unwrap(), "b2");

        let mut record = TextRecord::default();
        assert!(slot.load(&mut record).unwrap());
        assert_eq!(record.text, "b2");
        assert_eq!(read_raw(slot.main_path()), "b2");
        assert!(slot.backup_path(0).unwrap().is_dir());
    }

    #[test]
    fn test_missing_main_uses_backup() {
        let (_dir, slot) = setup(2);
        write_raw(slot.backup_path(0).unwrap(), "only backup");

        let mut record = TextRecord::default();
        assert!(slot.load(&mut record).unwrap());
        assert_eq!(record.text, "only backup");
        assert!(slot.main_path().exists());
        assert_eq!(slot.backups_on_disk(), 0);
    }

    #[test]
    fn test_all_files_bad_is_not_found() {
        let (_dir, slot) = setup(2);
        fs::write(slot.main_path(), b"bad").unwrap();
        fs::write(slot.backup_path(0).unwrap(), b"bad").unwrap();
        fs::write(slot.backup_path(1).unwrap(), b"bad").unwrap();

        let mut record = TextRecord::default();
        let result = slot.load(&mut record);

        assert!(matches!(result, Err(SaveError::SaveNotFound(ref name)) if name == "slot1"));
        // One attempt for main plus one per backup
        assert_eq!(record.load_attempts, 3);
        assert!(record.text.is_empty());
        assert!(!slot.exists());
    }

    #[test]
    fn test_no_files_is_not_found() {
        let (_dir, slot) = setup(2);
        let mut record = TextRecord::default();
        assert!(matches!(slot.load(&mut record), Err(SaveError::SaveNotFound(_))));
        assert_eq!(record.load_attempts, 0);
    }

    #[test]
    fn test_single_file_mode() {
        let (dir, slot) = setup(0);
        assert!(!slot.uses_backups());

        let mut record = TextRecord::default();
        assert!(matches!(slot.load(&mut record), Err(SaveError::SaveNotFound(_))));

        slot.save(&TextRecord::with_text("one")).unwrap();
        slot.save(&TextRecord::with_text("two")).unwrap();
        assert!(!slot.load(&mut record).unwrap());
        assert_eq!(record.text, "two");

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_single_file_corrupt_propagates() {
        let (_dir, slot) = setup(0);
        fs::write(slot.main_path(), b"bad").unwrap();

        let mut record = TextRecord::default();
        assert!(matches!(slot.load(&mut record), Err(SaveError::Serialization(_))));
        // Single-file mode never deletes the only copy
        assert!(slot.main_path().exists());
    }

    #[test]
    fn test_delete_removes_everything() {
        let (_dir, slot) = setup(2);
        for text in ["a", "b", "c"] {
            slot.save(&TextRecord::with_text(text)).unwrap();
        }
        fs::write(slot.temp_path(), b"stale").unwrap();
        assert!(slot.exists());

        slot.delete().unwrap();
        assert!(!slot.exists());
        assert!(!slot.temp_path().exists());

        // Deleting again is fine
        slot.delete().unwrap();
    }
}
