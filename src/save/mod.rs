//! Save/Load system
//!
//! This module provides a durable save store with:
//! - One main file per save name plus a chain of rolling backups
//! - Atomic writes (temp file + rename) so a failed save never clobbers the last good one
//! - Automatic recovery from a corrupt or missing main file
//! - A cache of live records so repeated loads return the same instance
//!
//! # Architecture
//!
//! - `types`: Settings, load results and error types
//! - `record`: SaveRecord trait and the JSON adapter
//! - `backup`: File layout and the rolling backup engine
//! - `cache`: Per (type, name) record cache
//! - `paths`: Save directory resolution
//! - `manager`: SaveManager, the public entry point
//!
//! # Example Usage
//!
//! ```ignore
//! let manager = SaveManager::new();
//! manager.initialize(Settings::new("My Game"))?;
//!
//! let progress = manager.create::<JsonSave<Progress>>("slot1")?;
//! progress.lock().unwrap().data.level = 3;
//! manager.save("slot1", progress)?.on_error(|e| eprintln!("save failed: {}", e));
//!
//! manager
//!     .load::<JsonSave<Progress>>("slot1", false)?
//!     .on_success(|result| println!("level {}", result.save.lock().unwrap().data.level));
//! ```

pub mod backup;
pub mod cache;
pub mod manager;
pub mod paths;
pub mod record;
pub mod types;

// Re-export commonly used types
pub use backup::SaveSlot;
pub use cache::SaveCache;
pub use manager::{Execution, SaveInfo, SaveManager};
pub use record::{JsonSave, SaveRecord};
pub use types::*;
