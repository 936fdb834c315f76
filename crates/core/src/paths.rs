//! Locations inside the duosync data directory

use std::path::PathBuf;

use color_eyre::eyre::eyre;

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "DUOSYNC_DATA_DIR";

/// Name of the data directory inside the home directory
pub const DATA_DIR_NAME: &str = ".duosync";

/// Subdirectory holding per-session staging roots
pub const STAGING_DIR_NAME: &str = "staging";

/// Subdirectory holding installed agent versions
pub const AGENTS_DIR_NAME: &str = "agents";

/// Subdirectory holding debug logs
pub const LOGS_DIR_NAME: &str = "logs";

/// Root of all duosync state: `$DUOSYNC_DATA_DIR`, else `~/.duosync`.
///
/// Nothing is created here.
///
/// # Errors
/// Returns an error if no override is set and the home directory is unknown.
pub fn data_dir() -> color_eyre::Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().ok_or_else(|| eyre!("unable to determine home directory"))?;
    Ok(home.join(DATA_DIR_NAME))
}

/// Directory containing installed agent versions
///
/// # Errors
/// Returns an error if the data directory can't be determined.
pub fn agents_dir() -> color_eyre::Result<PathBuf> {
    Ok(data_dir()?.join(AGENTS_DIR_NAME))
}

/// Directory containing debug logs
///
/// # Errors
/// Returns an error if the data directory can't be determined.
pub fn logs_dir() -> color_eyre::Result<PathBuf> {
    Ok(data_dir()?.join(LOGS_DIR_NAME))
}
