use std::time::Duration;

use serde::Serialize;
use tempo_core::N_MAX;

/// Runtime knobs for the ranking cycle, read from `TEMPO_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub cadence: Duration,
    /// Bound on aggregate + score + rank for one cycle.
    pub cycle_timeout: Duration,
    /// Entries per published list, within `1..=N_MAX`.
    pub chart_size: usize,
    pub signal_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(3600),
            cycle_timeout: Duration::from_secs(300),
            chart_size: N_MAX,
            signal_concurrency: 16,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let cadence_secs = env_parse("TEMPO_CADENCE_SECS").unwrap_or(d.cadence.as_secs()).max(1);
        let timeout_secs = env_parse("TEMPO_CYCLE_TIMEOUT_SECS").unwrap_or(d.cycle_timeout.as_secs()).max(1);
        Self {
            cadence: Duration::from_secs(cadence_secs),
            cycle_timeout: Duration::from_secs(timeout_secs),
            chart_size: env_parse("TEMPO_CHART_SIZE").unwrap_or(d.chart_size).clamp(1, N_MAX),
            signal_concurrency: env_parse("TEMPO_SIGNAL_CONCURRENCY").unwrap_or(d.signal_concurrency).max(1),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}
