//! Durable game save store with rolling backups
//!
//! See [`save`] for the save system and [`future`] for the completion
//! handle returned by every load and save.

pub mod future;
pub mod save;

pub use future::Future;
pub use save::{
    Execution, JsonSave, LoadResult, SaveError, SaveInfo, SaveManager, SaveRecord, Settings,
    Shared,
};
