use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "NTAL Dispatch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Consent text version recorded on feature-phone encounters.
pub const DEFAULT_CONSENT_VERSION: &str = "v0.1-EN-USSD";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_HASH_PEPPER: &str = "dev-hash-pepper-change-in-production";
const DEFAULT_MAX_RELEASES: u32 = 3;
const DEFAULT_ASSIGNMENT_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
/// Longest assignment timeout accepted from the environment (one week).
const MAX_ASSIGNMENT_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,ntal_dispatch=debug"
}

/// Get the application data directory
/// ~/NTAL/ on all platforms, falling back to the working directory.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("NTAL")
}

/// Default SQLite database location.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("ntal.db")
}

/// Runtime configuration for the dispatch engine and its HTTP surface.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Pepper mixed into caller number hashes.
    pub hash_pepper: String,
    pub consent_version: String,
    /// Releases tolerated before a callback is failed as abandoned.
    pub max_releases: u32,
    /// Holding time after which the sweeper returns a callback to the queue.
    /// `None` disables timeout-triggered release.
    pub assignment_timeout: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080))),
            hash_pepper: DEFAULT_HASH_PEPPER.to_string(),
            consent_version: DEFAULT_CONSENT_VERSION.to_string(),
            max_releases: DEFAULT_MAX_RELEASES,
            assignment_timeout: Some(Duration::from_secs(DEFAULT_ASSIGNMENT_TIMEOUT_SECS)),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

impl DispatchConfig {
    /// Build from `NTAL_*` environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values keep the
    /// default and log a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("NTAL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(addr) = parsed::<SocketAddr>(&lookup, "NTAL_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(pepper) = lookup("NTAL_HASH_PEPPER").filter(|p| !p.is_empty()) {
            config.hash_pepper = pepper;
        }
        if let Some(version) = lookup("NTAL_CONSENT_VERSION").filter(|v| !v.is_empty()) {
            config.consent_version = version;
        }
        if let Some(max) = parsed::<u32>(&lookup, "NTAL_MAX_RELEASES") {
            config.max_releases = max;
        }
        if let Some(secs) = parsed::<u64>(&lookup, "NTAL_ASSIGNMENT_TIMEOUT_SECS") {
            if secs > MAX_ASSIGNMENT_TIMEOUT_SECS {
                tracing::warn!(
                    value = secs,
                    max = MAX_ASSIGNMENT_TIMEOUT_SECS,
                    "Assignment timeout too large, keeping default"
                );
            } else {
                config.assignment_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
        }
        if let Some(secs) = parsed::<u64>(&lookup, "NTAL_SWEEP_INTERVAL_SECS") {
            if secs > 0 {
                config.sweep_interval = Duration::from_secs(secs);
            }
        }

        if config.hash_pepper == DEFAULT_HASH_PEPPER {
            tracing::warn!("NTAL_HASH_PEPPER not set, using development pepper");
        }
        config
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}
