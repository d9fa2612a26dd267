//! Save directory resolution
//!
//! Saves live under the platform's user data directory (`~/.local/share` or
//! `$XDG_DATA_HOME` on Linux, `~/Library/Application Support` on macOS,
//! `%APPDATA%` on Windows), in `<company>/<game>`.

use super::types::{SaveError, Settings};
use std::fs;
use std::path::PathBuf;

/// Resolves, creates and canonicalizes the save directory for `settings`
pub fn save_directory(settings: &Settings) -> Result<PathBuf, SaveError> {
    let mut path = match &settings.save_root {
        Some(root) => root.clone(),
        None => platform_data_dir(),
    };

    // Company name is optional
    if let Some(company) = settings.company_name.as_deref() {
        if !company.is_empty() {
            path.push(company);
        }
    }
    path.push(&settings.game_name);

    fs::create_dir_all(&path)?;
    Ok(fs::canonicalize(&path)?)
}

fn platform_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
