use std::str::FromStr;
use std::time::Duration;

use crate::pool::model::PoolKey;

/// Retry and safety knobs of the submission state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmissionPolicy {
    /// Upper bound on carrier submissions (distinct waybills) per request while
    /// the carrier keeps answering "already exists" or the save defect.
    ///
    /// Protects against a misbehaving carrier or a pool full of codes the
    /// carrier already knows. Reaching it is a system-level failure, distinct
    /// from pool exhaustion.
    pub max_attempts: u32,

    /// Pause before each fresh allocation after a retryable carrier verdict.
    /// Local to the calling task; not a global rate limit.
    pub retry_delay: Duration,

    /// Attempts per waybill when the carrier cannot be reached at all.
    /// The held waybill is kept across these attempts.
    pub transport_max_attempts: u32,

    /// Fixed back-off between transport attempts.
    pub transport_backoff: Duration,

    /// Attempts for a take that fails with a store error (not exhaustion).
    pub allocation_max_attempts: u32,

    /// Fixed back-off between store-error retries of a take.
    pub allocation_backoff: Duration,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            retry_delay: Duration::from_millis(500),
            transport_max_attempts: 10,
            transport_backoff: Duration::from_millis(1_000),
            allocation_max_attempts: 10,
            allocation_backoff: Duration::from_millis(1_000),
        }
    }
}

impl SubmissionPolicy {
    /// Same bounds, no waiting. Used by tests and dry runs.
    pub fn without_delays(self) -> Self {
        Self {
            retry_delay: Duration::ZERO,
            transport_backoff: Duration::ZERO,
            allocation_backoff: Duration::ZERO,
            ..self
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Upper bound on pooled database connections.
    pub db_max_connections: u32,

    /// Carrier manifest endpoint. Empty disables submissions.
    pub carrier_endpoint: String,

    /// Per-request carrier timeout.
    pub carrier_timeout: Duration,

    /// Sub-pool that submissions allocate from.
    pub pool: PoolKey,

    /// JSON logs when running in production.
    pub json_logs: bool,

    pub submission: SubmissionPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Builds the config from an arbitrary key lookup; unset or unparseable
    /// values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SubmissionPolicy::default();

        let ms = |key: &str, default: Duration| {
            Duration::from_millis(parse_or(&lookup, key, default.as_millis() as u64))
        };

        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://waybill_dev.db?mode=rwc".to_string()),
            db_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 16),
            carrier_endpoint: lookup("CARRIER_ENDPOINT").unwrap_or_default(),
            carrier_timeout: ms("CARRIER_TIMEOUT_MS", Duration::from_secs(5)),
            pool: PoolKey::new(
                lookup("WAYBILL_VENDOR").unwrap_or_else(|| "NAQUEL".to_string()),
                lookup("WAYBILL_SERIES").unwrap_or_else(|| "PRIME".to_string()),
            ),
            json_logs: lookup("APP_ENV").is_some_and(|v| v == "production"),
            submission: SubmissionPolicy {
                max_attempts: parse_or(&lookup, "WAYBILL_MAX_ATTEMPTS", defaults.max_attempts)
                    .max(1),
                retry_delay: ms("WAYBILL_RETRY_DELAY_MS", defaults.retry_delay),
                transport_max_attempts: parse_or(
                    &lookup,
                    "WAYBILL_TRANSPORT_ATTEMPTS",
                    defaults.transport_max_attempts,
                )
                .max(1),
                transport_backoff: ms("WAYBILL_TRANSPORT_BACKOFF_MS", defaults.transport_backoff),
                allocation_max_attempts: parse_or(
                    &lookup,
                    "WAYBILL_ALLOCATION_ATTEMPTS",
                    defaults.allocation_max_attempts,
                )
                .max(1),
                allocation_backoff: ms(
                    "WAYBILL_ALLOCATION_BACKOFF_MS",
                    defaults.allocation_backoff,
                ),
            },
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable config value; using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_observed_policy() {
        let c = cfg(&[]);

        assert_eq!(c.submission, SubmissionPolicy::default());
        assert_eq!(c.submission.max_attempts, 50);
        assert_eq!(c.submission.retry_delay, Duration::from_millis(500));
        assert_eq!(c.submission.transport_max_attempts, 10);
        assert_eq!(c.pool, PoolKey::new("NAQUEL", "PRIME"));
        assert!(!c.json_logs);
        assert!(c.carrier_endpoint.is_empty());
    }

    #[test]
    fn overrides_are_applied() {
        let c = cfg(&[
            ("WAYBILL_MAX_ATTEMPTS", "7"),
            ("WAYBILL_RETRY_DELAY_MS", "25"),
            ("WAYBILL_VENDOR", "ARAMEX"),
            ("APP_ENV", "production"),
            ("CARRIER_ENDPOINT", "https://carrier.example/manifest"),
        ]);

        assert_eq!(c.submission.max_attempts, 7);
        assert_eq!(c.submission.retry_delay, Duration::from_millis(25));
        assert_eq!(c.pool.vendor, "ARAMEX");
        assert_eq!(c.pool.series, "PRIME");
        assert!(c.json_logs);
    }

    #[test]
    fn garbage_and_zero_fall_back_safely() {
        let c = cfg(&[
            ("WAYBILL_MAX_ATTEMPTS", "lots"),
            ("WAYBILL_TRANSPORT_ATTEMPTS", "0"),
        ]);

        assert_eq!(c.submission.max_attempts, 50);
        assert_eq!(c.submission.transport_max_attempts, 1);
    }
}
