//! Home-directory resolution for all persisted FinFocus state.
//!
//! Resolution order: `FINFOCUS_HOME`, then `<PULUMI_HOME>/finfocus`, then
//! `~/.finfocus`. Both the plugin registry and the engine's stores anchor
//! their paths here.

use std::path::PathBuf;

/// Environment variable overriding the home directory outright.
pub const HOME_ENV: &str = "FINFOCUS_HOME";

/// Environment variable of the embedding orchestrator; when set, FinFocus
/// state lives in a `finfocus` subdirectory of it.
pub const ORCHESTRATOR_HOME_ENV: &str = "PULUMI_HOME";

/// Directory name under the user's home when no override applies.
const DEFAULT_DIR: &str = ".finfocus";

/// Resolve the FinFocus home directory.
///
/// Returns `None` only when no override is set and the platform has no
/// resolvable user home.
pub fn resolve_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    if let Ok(orchestrator) = std::env::var(ORCHESTRATOR_HOME_ENV) {
        if !orchestrator.trim().is_empty() {
            return Some(PathBuf::from(orchestrator).join("finfocus"));
        }
    }
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(DEFAULT_DIR))
}

/// Default plugin root under a resolved home directory.
pub fn plugins_dir(home: &std::path::Path) -> PathBuf {
    home.join("plugins")
}
