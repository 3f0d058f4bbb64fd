//! Runtime configuration: pool sizing, timeouts, and liveness file paths.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default path for the ready-file liveness marker (`spec.md` §6).
pub const DEFAULT_READY_FILE_PATH: &str = "/tmp/oxalis_ready";
/// Default path for the heartbeat-file liveness marker (`spec.md` §6).
pub const DEFAULT_HEARTBEAT_FILE_PATH: &str = "/tmp/oxalis_heartbeat";

/// Runtime-wide configuration, shared by both the AMQP and log-broker apps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Number of forked worker processes; `None` defaults to the host CPU count.
    pub worker_num: Option<usize>,
    /// Default pool concurrency; `None` means unbounded.
    pub concurrency: Option<usize>,
    /// Default per-task timeout in seconds, used when a task does not override it,
    /// and as the heartbeat/drain poll interval.
    pub timeout_secs: u64,
    /// When true, `delay()` executes tasks inline on the producer side instead
    /// of publishing to the transport (`spec.md` §4.3).
    pub test: bool,
    /// Path written with the current epoch seconds once the worker enters its
    /// heartbeat loop.
    pub ready_file_path: PathBuf,
    /// Path rewritten with the current epoch seconds every `timeout_secs`
    /// while the worker is healthy.
    pub heartbeat_file_path: PathBuf,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            worker_num: None,
            concurrency: None,
            timeout_secs: 5,
            test: false,
            ready_file_path: PathBuf::from(DEFAULT_READY_FILE_PATH),
            heartbeat_file_path: PathBuf::from(DEFAULT_HEARTBEAT_FILE_PATH),
        }
    }
}

impl RuntimeSettings {
    /// Validate configured values.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".into());
        }
        if let Some(0) = self.worker_num {
            return Err("worker_num must be greater than 0 when set".into());
        }
        Ok(())
    }

    /// Parse settings from a JSON string and validate them.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let settings: RuntimeSettings =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `.env`-style overrides via `dotenvy`, then fall back to defaults
    /// for anything unset. Intended for local development, mirroring the
    /// teacher's reliance on `dotenvy` for non-production configuration.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default();
        if let Ok(value) = std::env::var("OXALIS_WORKER_NUM") {
            settings.worker_num = value.parse().ok();
        }
        if let Ok(value) = std::env::var("OXALIS_CONCURRENCY") {
            settings.concurrency = value.parse().ok();
        }
        if let Ok(value) = std::env::var("OXALIS_TIMEOUT_SECS") {
            if let Ok(parsed) = value.parse() {
                settings.timeout_secs = parsed;
            }
        }
        if let Ok(value) = std::env::var("OXALIS_TEST") {
            settings.test = value == "1" || value.eq_ignore_ascii_case("true");
        }
        settings
    }

    /// The effective worker-process count, defaulting to the host CPU count.
    pub fn effective_worker_num(&self) -> usize {
        self.worker_num.unwrap_or_else(num_cpus::get)
    }

    /// The per-task/pool-default timeout as a `Duration`.
    pub fn default_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_timeout() {
        let mut settings = RuntimeSettings::default();
        settings.timeout_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn defaults_worker_num_to_cpu_count() {
        let settings = RuntimeSettings::default();
        assert_eq!(settings.effective_worker_num(), num_cpus::get());
    }

    #[test]
    fn round_trips_through_json() {
        let settings = RuntimeSettings {
            concurrency: Some(8),
            ..RuntimeSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let parsed = RuntimeSettings::from_json_str(&json).unwrap();
        assert_eq!(parsed.concurrency, Some(8));
    }
}
