use std::str::FromStr;
use std::time::Duration;

use crate::services::analytics::AnalyticsConfig;
use crate::services::calibration::CalibrationConfig;
use crate::services::performance::PmcServiceConfig;
use crate::services::pmc::{SeriesSeed, DEFAULT_MIN_LOOKBACK_DAYS};
use crate::services::workout_index::WorkoutIndexConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
    pub analytics: AnalyticsConfig,
}

/// Read `key`, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring malformed {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let index_defaults = WorkoutIndexConfig::default();
        let cal_defaults = CalibrationConfig::default();

        let calibration = CalibrationConfig {
            lookback_days: env_or("CALIBRATION_LOOKBACK_DAYS", cal_defaults.lookback_days),
            min_reference_points: env_or(
                "CALIBRATION_MIN_REFERENCES",
                cal_defaults.min_reference_points,
            ),
            min_ctl_change: env_or("CALIBRATION_MIN_CTL_CHANGE", cal_defaults.min_ctl_change),
            min_atl_change: env_or("CALIBRATION_MIN_ATL_CHANGE", cal_defaults.min_atl_change),
            min_scale_change: env_or(
                "CALIBRATION_MIN_SCALE_CHANGE",
                cal_defaults.min_scale_change,
            ),
            seed: env_or("PMC_SEED", SeriesSeed::default()),
            ..cal_defaults
        };

        Ok(Self {
            database_url,
            port: env_or("PORT", 8080),
            json_logs: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            analytics: AnalyticsConfig {
                index: WorkoutIndexConfig {
                    ttl: secs("WORKOUT_INDEX_TTL_SECS", index_defaults.ttl.as_secs()),
                    load_ceiling: secs(
                        "WORKOUT_INDEX_LOAD_CEILING_SECS",
                        index_defaults.load_ceiling.as_secs(),
                    ),
                    window_days: env_or("WORKOUT_INDEX_WINDOW_DAYS", index_defaults.window_days),
                },
                pmc: PmcServiceConfig {
                    cache_ttl: secs("PMC_CACHE_TTL_SECS", 300),
                    min_lookback_days: env_or("PMC_MIN_LOOKBACK_DAYS", DEFAULT_MIN_LOOKBACK_DAYS),
                    seed: calibration.seed,
                    calibration,
                },
                dashboard_ttl: secs("DASHBOARD_CACHE_TTL_SECS", 30),
                health_ttl: secs("HEALTH_CACHE_TTL_SECS", 300),
            },
        })
    }
}
