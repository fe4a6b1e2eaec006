//! # Engine Configuration
//!
//! Home-directory layout and the environment overrides the core accepts.
//! Loading of `config.yaml` itself belongs to the embedding CLI; the core
//! only consumes the resolved values plus these environment variables:
//!
//! - `FINFOCUS_CACHE_ENABLED` (`true`/`false`/`1`/`0`)
//! - `FINFOCUS_CACHE_TTL_SECONDS` (clamped to 60–604800)
//! - `FINFOCUS_CACHE_DIR`
//! - `FINFOCUS_CACHE_MAX_SIZE_MB`
//! - `FINFOCUS_BUDGET_EXIT_ON_THRESHOLD`
//! - `FINFOCUS_BUDGET_EXIT_CODE` (0–255)
//!
//! Malformed values log at WARN and fall back to defaults; configuration
//! reading is never fatal.

use finfocus_plugin_sdk::home;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Smallest accepted cache TTL.
pub const CACHE_TTL_MIN: Duration = Duration::from_secs(60);
/// Largest accepted cache TTL (seven days).
pub const CACHE_TTL_MAX: Duration = Duration::from_secs(604_800);
/// Default cache TTL.
pub const CACHE_TTL_DEFAULT: Duration = Duration::from_secs(3600);
/// Default soft bound on the cache directory size.
pub const CACHE_MAX_SIZE_MB_DEFAULT: u64 = 100;

const CACHE_ENABLED_ENV: &str = "FINFOCUS_CACHE_ENABLED";
const CACHE_TTL_ENV: &str = "FINFOCUS_CACHE_TTL_SECONDS";
const CACHE_DIR_ENV: &str = "FINFOCUS_CACHE_DIR";
const CACHE_MAX_SIZE_ENV: &str = "FINFOCUS_CACHE_MAX_SIZE_MB";
const BUDGET_EXIT_ON_THRESHOLD_ENV: &str = "FINFOCUS_BUDGET_EXIT_ON_THRESHOLD";
const BUDGET_EXIT_CODE_ENV: &str = "FINFOCUS_BUDGET_EXIT_CODE";

/// Resolved on-disk layout under the FinFocus home directory.
#[derive(Debug, Clone)]
pub struct Paths {
    home: PathBuf,
}

impl Paths {
    /// Layout rooted at an explicit home directory.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Layout rooted at the resolved home directory
    /// (`FINFOCUS_HOME` → `$PULUMI_HOME/finfocus` → `~/.finfocus`).
    pub fn resolve() -> Option<Self> {
        home::resolve_home_dir().map(Self::new)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn plugins_dir(&self) -> PathBuf {
        home::plugins_dir(&self.home)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn dismissed_file(&self) -> PathBuf {
        self.home.join("dismissed.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}

/// Cache store configuration.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Whether the cache participates in queries at all
    pub enabled: bool,
    /// Directory cache entries live in
    pub dir: PathBuf,
    /// Time-to-live stamped onto new entries
    pub ttl: Duration,
    /// Soft bound on the cache directory size
    pub max_size_mb: u64,
}

impl CacheSettings {
    /// Settings for a cache under the given directory, with defaults.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
            ttl: CACHE_TTL_DEFAULT,
            max_size_mb: CACHE_MAX_SIZE_MB_DEFAULT,
        }
    }

    /// Settings with the environment overrides applied on top of the
    /// defaults for the given home layout.
    pub fn from_env(paths: &Paths) -> Self {
        let mut settings = Self::new(paths.cache_dir());

        if let Some(enabled) = read_bool(CACHE_ENABLED_ENV) {
            settings.enabled = enabled;
        }
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                settings.dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var(CACHE_TTL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => settings.ttl = clamp_ttl(Duration::from_secs(secs)),
                Err(_) => {
                    warn!(value = %raw, "ignoring unparseable {CACHE_TTL_ENV}");
                }
            }
        }
        if let Ok(raw) = std::env::var(CACHE_MAX_SIZE_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(mb) => settings.max_size_mb = mb,
                Err(_) => {
                    warn!(value = %raw, "ignoring unparseable {CACHE_MAX_SIZE_ENV}");
                }
            }
        }
        settings
    }

    /// Disable the cache regardless of other settings.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Override the TTL, clamped to the accepted range.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = clamp_ttl(ttl);
        self
    }
}

/// Clamp a TTL into the accepted 60s–7d range, warning on adjustment.
pub fn clamp_ttl(ttl: Duration) -> Duration {
    if ttl < CACHE_TTL_MIN {
        warn!(requested = ?ttl, "cache ttl below minimum, clamping to {CACHE_TTL_MIN:?}");
        CACHE_TTL_MIN
    } else if ttl > CACHE_TTL_MAX {
        warn!(requested = ?ttl, "cache ttl above maximum, clamping to {CACHE_TTL_MAX:?}");
        CACHE_TTL_MAX
    } else {
        ttl
    }
}

/// Policy for turning budget threshold breaches into process exit codes.
///
/// Precedence: caller override > environment > default. The default keeps
/// `exit_on_threshold` off with exit code 1; code 1 also stays reserved for
/// evaluation-time errors regardless of what is configured here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetExitPolicy {
    /// Whether an EXCEEDED budget produces a budget-exit error
    pub exit_on_threshold: bool,
    /// Exit code carried by the budget-exit error
    pub exit_code: u8,
}

impl Default for BudgetExitPolicy {
    fn default() -> Self {
        Self { exit_on_threshold: false, exit_code: 1 }
    }
}

impl BudgetExitPolicy {
    /// Policy with the environment overrides applied.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(enabled) = read_bool(BUDGET_EXIT_ON_THRESHOLD_ENV) {
            policy.exit_on_threshold = enabled;
        }
        if let Ok(raw) = std::env::var(BUDGET_EXIT_CODE_ENV) {
            match raw.trim().parse::<u8>() {
                Ok(code) => policy.exit_code = code,
                Err(_) => {
                    warn!(value = %raw, "ignoring out-of-range {BUDGET_EXIT_CODE_ENV}, keeping {}", policy.exit_code);
                }
            }
        }
        policy
    }

    /// Apply caller-level overrides (highest precedence).
    pub fn with_overrides(mut self, exit_on_threshold: Option<bool>, exit_code: Option<u8>) -> Self {
        if let Some(enabled) = exit_on_threshold {
            self.exit_on_threshold = enabled;
        }
        if let Some(code) = exit_code {
            self.exit_code = code;
        }
        self
    }
}

fn read_bool(var: &str) -> Option<bool> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        other => {
            warn!(value = %other, "ignoring unparseable boolean in {var}");
            None
        }
    }
}
