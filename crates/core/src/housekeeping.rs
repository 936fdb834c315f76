//! Removal of installed agent versions that haven't been used in a while

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::debug;

/// Default maximum idle period for an installed agent
pub const MAXIMUM_AGENT_IDLE_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Base name of the agent binary
pub const AGENT_BASE_NAME: &str = "duosync-agent";

/// Agent binary name for the current platform
#[must_use]
pub fn agent_executable_name() -> String {
    format!("{AGENT_BASE_NAME}{}", std::env::consts::EXE_SUFFIX)
}

/// Remove agent versions in `agents_dir` whose binary was last accessed more
/// than `max_idle` ago.
///
/// Every failure is skipped: a missing agents directory means there's
/// nothing to clean, and a version that can't be inspected is left alone.
/// Returns the removed version names, sorted.
pub fn housekeep(agents_dir: &Path, max_idle: Duration) -> Vec<String> {
    housekeep_at(agents_dir, max_idle, SystemTime::now())
}

fn housekeep_at(agents_dir: &Path, max_idle: Duration, now: SystemTime) -> Vec<String> {
    let Ok(versions) = fs::read_dir(agents_dir) else {
        return Vec::new();
    };
    let agent_name = agent_executable_name();

    let mut removed = Vec::new();
    for version in versions.flatten() {
        let version_path = version.path();
        let Ok(accessed) = fs::metadata(version_path.join(&agent_name)).and_then(|m| m.accessed())
        else {
            continue;
        };

        // Access times in the future count as fresh.
        let idle = now.duration_since(accessed).unwrap_or_default();
        if idle <= max_idle {
            continue;
        }

        let name = version.file_name().to_string_lossy().into_owned();
        match fs::remove_dir_all(&version_path) {
            Ok(()) => {
                debug!("Removed agent version {name} (idle {}s)", idle.as_secs());
                removed.push(name);
            }
            Err(e) => debug!("Unable to remove agent version {name}: {e}"),
        }
    }

    removed.sort();
    removed
}
