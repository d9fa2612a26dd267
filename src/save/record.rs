//! SaveRecord trait for game state that can be persisted
//!
//! The save system never looks inside a record. It hands the record a stream
//! and lets it write or read itself, and uses the returned `Result` to decide
//! whether to fall back to a backup file.

use super::types::{CURRENT_SAVE_VERSION, SaveError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Trait for game state that can be saved and loaded
///
/// # Example
///
/// ```ignore
/// impl SaveRecord for Progress {
///     fn reset(&mut self) {
///         *self = Progress::default();
///     }
///
///     fn save(&self, output: &mut dyn Write) -> Result<(), SaveError> {
///         output.write_all(&self.level.to_le_bytes())?;
///         Ok(())
///     }
///
///     fn load(&mut self, input: &mut dyn Read) -> Result<(), SaveError> {
///         let mut buf = [0u8; 4];
///         input.read_exact(&mut buf)?;
///         self.level = u32::from_le_bytes(buf);
///         Ok(())
///     }
/// }
/// ```
pub trait SaveRecord {
    /// Restores the record to a blank state
    fn reset(&mut self);

    /// Writes the current state into `output`
    ///
    /// An error aborts the save before any existing file is touched.
    fn save(&self, output: &mut dyn Write) -> Result<(), SaveError>;

    /// Reads state from `input`
    ///
    /// An error makes the backup engine try the next backup slot.
    fn load(&mut self, input: &mut dyn Read) -> Result<(), SaveError>;
}

/// A `SaveRecord` for any serde type, stored as a versioned JSON document
///
/// The file looks like `{"version": 1, "timestamp": "...", "data": {...}}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonSave<T> {
    pub data: T,
    /// When the loaded file was written; `None` for a record never loaded
    pub saved_at: Option<DateTime<Utc>>,
}

impl<T> JsonSave<T> {
    pub fn new(data: T) -> Self {
        JsonSave {
            data,
            saved_at: None,
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    timestamp: DateTime<Utc>,
    data: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    version: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
    timestamp: DateTime<Utc>,
    data: T,
}

impl<T> SaveRecord for JsonSave<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn reset(&mut self) {
        self.data = T::default();
        self.saved_at = None;
    }

    fn save(&self, output: &mut dyn Write) -> Result<(), SaveError> {
        let envelope = EnvelopeRef {
            version: CURRENT_SAVE_VERSION,
            timestamp: Utc::now(),
            data: &self.data,
        };
        serde_json::to_writer_pretty(&mut *output, &envelope)?;
        output.flush()?;
        Ok(())
    }

    fn load(&mut self, input: &mut dyn Read) -> Result<(), SaveError> {
        let raw: serde_json::Value = serde_json::from_reader(input)?;

        // Version check before the payload, newer payloads may not parse
        let header: EnvelopeHeader = serde_json::from_value(raw.clone())?;
        if header.version > CURRENT_SAVE_VERSION {
            return Err(SaveError::InvalidVersion(header.version));
        }

        let envelope: Envelope<T> = serde_json::from_value(raw)?;
        self.data = envelope.data;
        self.saved_at = Some(envelope.timestamp);
        Ok(())
    }
}
