use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================
//
// Everything is read from environment variables (a `.env` file is loaded by
// the binary first). Unset variables fall back to defaults; set but
// unparseable variables are an error rather than being silently ignored.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Timing and resilience knobs for the progression subsystem
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressionConfig {
    /// Delay between payment confirmation and the first transition
    pub initial_delay: Duration,
    /// Gap between every later pair of stages
    pub stage_delay: Duration,
    /// How often the reconciliation sweep scans for overdue orders
    pub sweep_interval: Duration,
    /// Consecutive persistence failures before an order is parked
    pub dead_letter_threshold: u32,
    /// Overdue orders a single sweep processes in parallel
    pub sweep_concurrency: usize,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            stage_delay: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(15),
            dead_letter_threshold: 5,
            sweep_concurrency: 8,
        }
    }
}

/// Process-level configuration for the binary
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub progression: ProgressionConfig,
    /// ScyllaDB contact point; the in-memory store is used when unset
    pub scylla_uri: Option<String>,
    pub keyspace: String,
    pub metrics_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            progression: ProgressionConfig::default(),
            scylla_uri: None,
            keyspace: "orders_ks".to_string(),
            metrics_port: 9090,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let progression_defaults = defaults.progression;

        let sweep_interval = secs(&lookup, "PROGRESSION_SWEEP_INTERVAL_SECS")?
            .unwrap_or(progression_defaults.sweep_interval);
        if sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "PROGRESSION_SWEEP_INTERVAL_SECS",
                value: "0".to_string(),
                reason: "sweep interval must be positive".to_string(),
            });
        }

        let progression = ProgressionConfig {
            initial_delay: secs(&lookup, "PROGRESSION_INITIAL_DELAY_SECS")?
                .unwrap_or(progression_defaults.initial_delay),
            stage_delay: secs(&lookup, "PROGRESSION_STAGE_DELAY_SECS")?
                .unwrap_or(progression_defaults.stage_delay),
            sweep_interval,
            dead_letter_threshold: parsed(&lookup, "PROGRESSION_DEAD_LETTER_THRESHOLD")?
                .unwrap_or(progression_defaults.dead_letter_threshold),
            sweep_concurrency: parsed::<usize, _>(&lookup, "PROGRESSION_SWEEP_CONCURRENCY")?
                .unwrap_or(progression_defaults.sweep_concurrency)
                .max(1),
        };

        Ok(Self {
            progression,
            scylla_uri: lookup("SCYLLA_URI").filter(|s| !s.is_empty()),
            keyspace: lookup("SCYLLA_KEYSPACE")
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.keyspace),
            metrics_port: parsed(&lookup, "METRICS_PORT")?.unwrap_or(defaults.metrics_port),
        })
    }
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn secs<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parsed::<u64, F>(lookup, name)?.map(Duration::from_secs))
}
