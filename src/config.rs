//! Application-level configuration loading for matchmaking and session tuning.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::queue_store::DistanceClass;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "STRIDE_RACE_BACK_CONFIG_PATH";

const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RATING_TOLERANCE: u32 = 200;
const DEFAULT_TICKET_TTL_SECS: u64 = 60;
const DEFAULT_TIMEOUT_WINDOW_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;
const DEFAULT_GROUP_SIZES: [u8; 3] = [2, 3, 4];

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Matchmaking scheduler tuning.
    pub matching: MatchingConfig,
    /// Live-session tuning.
    pub session: SessionConfig,
    /// Collaborator endpoint receiving final standings, when configured.
    pub results_endpoint: Option<String>,
}

/// Knobs of the matchmaking scheduler.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    /// Scheduler tick period, milliseconds.
    pub tick_interval_ms: u64,
    /// Hard fairness bound: max allowed rating gap inside one group.
    pub rating_tolerance: u32,
    /// Lifetime of an unconsumed match ticket, seconds.
    pub ticket_ttl_secs: u64,
    /// Distance classes the scheduler services.
    pub distances: Vec<DistanceClass>,
    /// Group sizes the scheduler services.
    pub group_sizes: Vec<u8>,
}

impl MatchingConfig {
    /// Scheduler tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Ticket time-to-live.
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }

    /// Whether a (distance, group size) combination is an actual bucket.
    pub fn supports(&self, distance: DistanceClass, group_size: u8) -> bool {
        self.distances.contains(&distance) && self.group_sizes.contains(&group_size)
    }
}

/// Knobs of the live session engine.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Grace period after the first finisher before stragglers are forced out,
    /// seconds.
    pub timeout_window_secs: u64,
    /// Period of the timeout governor sweep, milliseconds.
    pub sweep_interval_ms: u64,
}

impl SessionConfig {
    /// Timeout window in milliseconds, as used by the session machine.
    pub fn timeout_window_ms(&self) -> u64 {
        self.timeout_window_secs * 1_000
    }

    /// Timeout governor sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in
    /// defaults when the file is missing or malformed.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        tolerance = config.matching.rating_tolerance,
                        timeout_secs = config.session.timeout_window_secs,
                        "loaded matchmaking configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig {
                tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
                rating_tolerance: DEFAULT_RATING_TOLERANCE,
                ticket_ttl_secs: DEFAULT_TICKET_TTL_SECS,
                distances: DistanceClass::ALL.to_vec(),
                group_sizes: DEFAULT_GROUP_SIZES.to_vec(),
            },
            session: SessionConfig {
                timeout_window_secs: DEFAULT_TIMEOUT_WINDOW_SECS,
                sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            },
            results_endpoint: None,
        }
    }
}

/// JSON representation of the configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    matching: RawMatching,
    #[serde(default)]
    session: RawSession,
    #[serde(default)]
    results_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMatching {
    tick_interval_ms: Option<u64>,
    rating_tolerance: Option<u32>,
    ticket_ttl_secs: Option<u64>,
    distances: Option<Vec<DistanceClass>>,
    group_sizes: Option<Vec<u8>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSession {
    timeout_window_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            matching: MatchingConfig {
                tick_interval_ms: value
                    .matching
                    .tick_interval_ms
                    .unwrap_or(defaults.matching.tick_interval_ms),
                rating_tolerance: value
                    .matching
                    .rating_tolerance
                    .unwrap_or(defaults.matching.rating_tolerance),
                ticket_ttl_secs: value
                    .matching
                    .ticket_ttl_secs
                    .unwrap_or(defaults.matching.ticket_ttl_secs),
                distances: value
                    .matching
                    .distances
                    .unwrap_or(defaults.matching.distances),
                group_sizes: value
                    .matching
                    .group_sizes
                    .unwrap_or(defaults.matching.group_sizes),
            },
            session: SessionConfig {
                timeout_window_secs: value
                    .session
                    .timeout_window_secs
                    .unwrap_or(defaults.session.timeout_window_secs),
                sweep_interval_ms: value
                    .session
                    .sweep_interval_ms
                    .unwrap_or(defaults.session.sweep_interval_ms),
            },
            results_endpoint: value.results_endpoint,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_fills_missing_fields_with_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{ "matching": { "rating_tolerance": 150, "group_sizes": [2] } }"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.matching.rating_tolerance, 150);
        assert_eq!(config.matching.group_sizes, vec![2]);
        assert_eq!(config.matching.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        assert_eq!(config.session.timeout_window_secs, DEFAULT_TIMEOUT_WINDOW_SECS);
        assert!(config.results_endpoint.is_none());
    }

    #[test]
    fn supports_checks_both_axes() {
        let config = AppConfig::default();
        assert!(config.matching.supports(DistanceClass::Km5, 2));
        assert!(!config.matching.supports(DistanceClass::Km5, 9));
    }
}
