//! Save manager for handling save/load operations
//!
//! `SaveManager` is the entry point of the save system. It owns:
//! - The frozen settings and the resolved save directory
//! - The cache of live records, one per (record type, save name)
//! - A queue per save name so disk operations on one name run one at a time,
//!   in the order they were requested
//!
//! Disk work is handed to the backup engine inside a `Future`, either on a
//! background thread or inline depending on the `Execution` mode.

use super::backup::SaveSlot;
use super::cache::SaveCache;
use super::paths;
use super::record::SaveRecord;
use super::types::*;
use crate::future::Future;
use chrono::{DateTime, Local};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

/// Where scheduled load/save work runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Execution {
    /// One worker thread per operation; `load`/`save` return immediately
    #[default]
    Background,
    /// The work runs before `load`/`save` return; for hosts without threads
    Inline,
}

#[derive(Debug)]
struct Config {
    settings: Settings,
    directory: PathBuf,
}

impl Config {
    fn slot(&self, name: &str) -> SaveSlot {
        let backups = if self.settings.use_rolling_backups {
            self.settings.backup_count
        } else {
            0
        };
        SaveSlot::new(&self.directory, name, backups)
    }
}

/// A save found in the save directory
#[derive(Debug, Clone)]
pub struct SaveInfo {
    pub name: String,
    pub modified: DateTime<Local>,
    /// Backup files currently on disk for this save
    pub backups: usize,
}

/// Turn-taking for the disk operations on one save name
///
/// Tickets are handed out on the calling thread, so operations run in the
/// order `load`/`save`/`delete` were called even when their workers start
/// out of order.
#[derive(Debug, Default)]
struct NameQueue {
    state: Mutex<QueueState>,
    turn: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    issued: u64,
    serving: u64,
    /// Tickets dropped ahead of `serving`, skipped when their turn comes
    finished: BTreeSet<u64>,
}

impl NameQueue {
    fn ticket(self: &Arc<Self>) -> Ticket {
        let mut state = lock(&self.state);
        let number = state.issued;
        state.issued += 1;
        Ticket {
            queue: Arc::clone(self),
            number,
        }
    }
}

/// A place in a `NameQueue`; the next ticket is served once this one drops
struct Ticket {
    queue: Arc<NameQueue>,
    number: u64,
}

impl Ticket {
    /// Blocks until every earlier ticket for the name has been dropped
    fn wait_turn(&self) {
        let mut state = lock(&self.queue.state);
        while state.serving != self.number {
            state = self
                .queue
                .turn
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut guard = lock(&self.queue.state);
        let state = &mut *guard;
        state.finished.insert(self.number);
        while state.finished.remove(&state.serving) {
            state.serving += 1;
        }
        drop(guard);
        self.queue.turn.notify_all();
    }
}

#[derive(Debug, Default)]
pub struct SaveManager {
    config: OnceLock<Config>,
    cache: SaveCache,
    name_queues: Mutex<HashMap<String, Arc<NameQueue>>>,
    execution: Execution,
}

impl SaveManager {
    /// Creates an uninitialized manager that runs disk work in the background
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution(execution: Execution) -> Self {
        SaveManager {
            execution,
            ..Self::default()
        }
    }

    /// Validates and freezes `settings` and creates the save directory
    ///
    /// A second call fails with `AlreadyInitialized` and leaves the first
    /// settings in force.
    pub fn initialize(&self, settings: Settings) -> Result<(), SaveError> {
        if self.config.get().is_some() {
            return Err(SaveError::AlreadyInitialized);
        }
        settings.validate()?;

        let directory = paths::save_directory(&settings)?;
        self.config
            .set(Config {
                settings,
                directory: directory.clone(),
            })
            .map_err(|_| SaveError::AlreadyInitialized)?;

        info!(path = %directory.display(), "save system initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config.get().is_some()
    }

    /// The folder where saves are stored
    pub fn save_location(&self) -> Result<&Path, SaveError> {
        Ok(self.config()?.directory.as_path())
    }

    pub fn settings(&self) -> Result<&Settings, SaveError> {
        Ok(&self.config()?.settings)
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Loads the save called `name`
    ///
    /// Unless `force_from_disk` is set, a cached record is returned in an
    /// already resolved future without touching the disk. Otherwise the
    /// cached record (or a new default one) is reset and filled from disk
    /// once every earlier operation on `name` has finished.
    pub fn load<T>(
        &self,
        name: &str,
        force_from_disk: bool,
    ) -> Result<Future<LoadResult<T>>, SaveError>
    where
        T: SaveRecord + Default + Send + 'static,
    {
        let config = self.config()?;
        check_save_name(name)?;

        if !force_from_disk {
            if let Some(save) = self.cache.try_get::<T>(name) {
                debug!(save = name, "load served from cache");
                return Ok(Future::resolved(LoadResult {
                    save,
                    was_cached: true,
                    used_backup_file: false,
                }));
            }
        }

        let (save, reused) = self
            .cache
            .get_or_insert_with(name, || Arc::new(Mutex::new(T::default())));

        let slot = config.slot(name);
        let ticket = self.ticket(name);
        Ok(self.schedule(move || {
            ticket.wait_turn();
            let used_backup_file = {
                let mut record = lock(&save);
                if reused {
                    record.reset();
                }
                slot.load(&mut *record)?
            };
            info!(save = slot.name(), used_backup_file, "save loaded");

            Ok(LoadResult {
                save,
                was_cached: false,
                used_backup_file,
            })
        }))
    }

    /// Saves `record` under `name`
    ///
    /// The cache points at `record` before this returns, so a following
    /// `load(name, false)` sees it even while the write is still running.
    pub fn save<T>(&self, name: &str, record: Shared<T>) -> Result<Future<bool>, SaveError>
    where
        T: SaveRecord + Send + 'static,
    {
        let config = self.config()?;
        check_save_name(name)?;

        self.cache.set(name, Arc::clone(&record));

        let slot = config.slot(name);
        let ticket = self.ticket(name);
        Ok(self.schedule(move || {
            ticket.wait_turn();
            slot.save(&*lock(&record))?;
            info!(save = slot.name(), "save written");
            Ok(true)
        }))
    }

    /// Puts a blank record in the cache for `name` and returns it
    ///
    /// Replaces any cached record of the same type; nothing is written until
    /// `save` is called.
    pub fn create<T>(&self, name: &str) -> Result<Shared<T>, SaveError>
    where
        T: SaveRecord + Default + Send + 'static,
    {
        self.config()?;
        check_save_name(name)?;

        let record = Arc::new(Mutex::new(T::default()));
        self.cache.set(name, Arc::clone(&record));
        Ok(record)
    }

    /// True if a main file or any backup exists for `name`
    pub fn exists(&self, name: &str) -> Result<bool, SaveError> {
        let config = self.config()?;
        check_save_name(name)?;
        Ok(config.slot(name).exists())
    }

    /// Removes every file of `name` and drops its cached records
    ///
    /// Waits for pending loads and saves of `name` to finish first.
    pub fn delete(&self, name: &str) -> Result<(), SaveError> {
        let config = self.config()?;
        check_save_name(name)?;

        let ticket = self.ticket(name);
        ticket.wait_turn();
        config.slot(name).delete()?;
        let evicted = self.cache.evict(name);
        info!(save = name, evicted, "save deleted");
        Ok(())
    }

    /// Lists the saves in the save directory, newest first
    pub fn list_saves(&self) -> Result<Vec<SaveInfo>, SaveError> {
        let config = self.config()?;
        let mut saves = Vec::new();

        for entry in fs::read_dir(&config.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some(SAVE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = fs::metadata(&path)?.modified()?;

            saves.push(SaveInfo {
                name: name.to_string(),
                modified: DateTime::<Local>::from(modified),
                backups: config.slot(name).backups_on_disk(),
            });
        }

        saves.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(saves)
    }

    fn config(&self) -> Result<&Config, SaveError> {
        self.config.get().ok_or(SaveError::NotInitialized)
    }

    fn ticket(&self, name: &str) -> Ticket {
        let mut queues = lock(&self.name_queues);
        queues.entry(name.to_string()).or_default().ticket()
    }

    fn schedule<T, F>(&self, work: F) -> Future<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T, SaveError> + Send + 'static,
    {
        match self.execution {
            Execution::Background => Future::spawn(work),
            Execution::Inline => Future::run(work),
        }
    }
}

fn check_save_name(name: &str) -> Result<(), SaveError> {
    check_file_name(name).map_err(|msg| SaveError::InvalidName(format!("'{}' {}", name, msg)))
}

/// Locks a mutex, recovering the data if a worker panicked while holding it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
