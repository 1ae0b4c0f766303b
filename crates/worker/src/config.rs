use std::time::Duration;

/// Errors raised while reading worker configuration.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Number of concurrent job runners (default: `4`).
    pub concurrency: usize,
    /// Sleep between claims when the queue is empty (default: `1000` ms).
    pub poll_interval: Duration,
    /// Period of the maintenance scheduler (default: `300` s).
    pub maintenance_interval: Duration,
    /// Override for the per-project stale threshold. `None` defers to each
    /// project's `stale_assignment_hours` (24 unless configured).
    pub stale_assignment_hours: Option<i64>,
    /// Running jobs claimed longer ago than this are requeued (default: `900`).
    pub stale_claim_secs: u64,
    /// Webhook receiving domain events, if any.
    pub webhook_url: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                     | Default  |
    /// |-----------------------------|----------|
    /// | `DATABASE_URL`              | required |
    /// | `WORKER_CONCURRENCY`        | `4`      |
    /// | `JOB_POLL_INTERVAL_MS`      | `1000`   |
    /// | `MAINTENANCE_INTERVAL_SECS` | `300`    |
    /// | `STALE_ASSIGNMENT_HOURS`    | per project |
    /// | `STALE_CLAIM_SECS`          | `900`    |
    /// | `WEBHOOK_URL`               | unset    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let concurrency: usize = parse(&var, "WORKER_CONCURRENCY", "a positive integer")?
            .unwrap_or(4);
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_CONCURRENCY",
                expected: "a positive integer",
                value: "0".into(),
            });
        }

        let poll_ms: u64 = parse(&var, "JOB_POLL_INTERVAL_MS", "a number of milliseconds")?
            .unwrap_or(1000);
        let maintenance_secs: u64 =
            parse(&var, "MAINTENANCE_INTERVAL_SECS", "a number of seconds")?.unwrap_or(300);

        let stale_assignment_hours: Option<i64> =
            parse(&var, "STALE_ASSIGNMENT_HOURS", "a positive number of hours")?;
        if let Some(hours) = stale_assignment_hours.filter(|h| *h < 1) {
            return Err(ConfigError::Invalid {
                name: "STALE_ASSIGNMENT_HOURS",
                expected: "a positive number of hours",
                value: hours.to_string(),
            });
        }

        let stale_claim_secs: u64 =
            parse(&var, "STALE_CLAIM_SECS", "a number of seconds")?.unwrap_or(900);

        Ok(Self {
            database_url,
            concurrency,
            poll_interval: Duration::from_millis(poll_ms.max(1)),
            maintenance_interval: Duration::from_secs(maintenance_secs.max(1)),
            stale_assignment_hours,
            stale_claim_secs,
            webhook_url: var("WEBHOOK_URL").map(|v| v.trim().to_string()),
        })
    }
}

fn parse<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|raw| {
            raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value: raw,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/quorum")]).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.maintenance_interval, Duration::from_secs(300));
        assert_eq!(config.stale_assignment_hours, None);
        assert_eq!(config.stale_claim_secs, 900);
        assert!(config.webhook_url.is_none());
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
        assert_eq!(
            load(&[("DATABASE_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/quorum"),
            ("WORKER_CONCURRENCY", "8"),
            ("JOB_POLL_INTERVAL_MS", "250"),
            ("STALE_ASSIGNMENT_HOURS", "12"),
            ("WEBHOOK_URL", "https://hooks.example.com/quorum"),
        ])
        .unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.stale_assignment_hours, Some(12));
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://hooks.example.com/quorum")
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = load(&[("DATABASE_URL", "x"), ("WORKER_CONCURRENCY", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WORKER_CONCURRENCY", .. }));

        let err = load(&[("DATABASE_URL", "x"), ("WORKER_CONCURRENCY", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "WORKER_CONCURRENCY", .. }));

        let err = load(&[("DATABASE_URL", "x"), ("STALE_ASSIGNMENT_HOURS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STALE_ASSIGNMENT_HOURS", .. }));
    }
}
