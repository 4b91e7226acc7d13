//! Process-level configuration for the API layer.
//!
//! # Invariants
//! - The database path is fixed on first use and never changes afterwards.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Environment variable overriding the database location.
pub const DB_PATH_ENV: &str = "CONTACT_IDENTITY_DB_PATH";
/// File name used under the temp directory when nothing is configured.
pub const DB_FILE_NAME: &str = "contact_identity.sqlite3";

static DB_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Pins the database path for this process.
///
/// Returns the already-active path as `Err` when a different path was
/// configured or resolved earlier.
pub fn configure_db_path(path: impl AsRef<Path>) -> Result<(), PathBuf> {
    let requested = path.as_ref().to_path_buf();
    let active = DB_PATH.get_or_init(|| requested.clone());
    if *active == requested {
        Ok(())
    } else {
        Err(active.clone())
    }
}

/// Database path: configured value, else `CONTACT_IDENTITY_DB_PATH`, else
/// `<temp_dir>/contact_identity.sqlite3`.
pub fn resolve_db_path() -> PathBuf {
    DB_PATH
        .get_or_init(|| {
            if let Ok(raw) = std::env::var(DB_PATH_ENV) {
                let trimmed = raw.trim();
                if !trimmed.is_empty() {
                    return PathBuf::from(trimmed);
                }
            }
            std::env::temp_dir().join(DB_FILE_NAME)
        })
        .clone()
}
