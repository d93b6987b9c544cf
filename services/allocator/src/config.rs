use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Result};
use pairwise_retry::BackoffPolicy;

use crate::counter::SequenceConfig;
use crate::db::DbConfig;
use crate::engine::{FairnessPlanner, FairnessStrategy, DEFAULT_BUCKET_SIZE};
use crate::outbox::{DispatcherConfig, PUBLISH_TIMEOUT};

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub academic_year: Option<u32>,
    pub fairness: FairnessPlanner,
    pub allocation_batch_size: usize,
    pub allocation_interval: Duration,
    pub counter: SequenceConfig,
    pub outbox: DispatcherConfig,
    pub outbox_poll_interval: Duration,
    pub webhook_url: Option<String>,
    pub dispatch_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = &var;
        let flag = |key: &str| {
            var(key)
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false)
        };

        let log_level = var("PAIRWISE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let dev_mode = flag("PAIRWISE_DEV");

        let strategy = match var("PAIRWISE_FAIRNESS_STRATEGY") {
            Some(name) => name.parse::<FairnessStrategy>()?,
            None => FairnessStrategy::DeterministicJitter,
        };
        let bucket_size = match var("PAIRWISE_FAIRNESS_BUCKET_SIZE") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|e| anyhow::anyhow!("PAIRWISE_FAIRNESS_BUCKET_SIZE: {e}"))?,
            None => DEFAULT_BUCKET_SIZE,
        };
        let fairness = FairnessPlanner::new(strategy, bucket_size)?;

        let placeholder_ttl = Duration::from_secs(
            parsed(var, "PAIRWISE_COUNTER_PLACEHOLDER_TTL_SECS").unwrap_or(30),
        );
        let wait_attempts = parsed(var, "PAIRWISE_COUNTER_WAIT_ATTEMPTS").unwrap_or(8);
        let counter = SequenceConfig {
            placeholder_ttl,
            wait: BackoffPolicy::new(
                Duration::from_millis(50),
                Duration::from_secs(1),
                wait_attempts,
            ),
        };

        let backoff = BackoffPolicy::from_secs_f64(
            parsed(var, "PAIRWISE_OUTBOX_BACKOFF_BASE_SECS").unwrap_or(0.25),
            parsed(var, "PAIRWISE_OUTBOX_BACKOFF_CAP_SECS").unwrap_or(2.0),
            parsed(var, "PAIRWISE_OUTBOX_MAX_RETRIES").unwrap_or(4),
        )
        .unwrap_or_default();
        let outbox = DispatcherConfig {
            batch_size: parsed(var, "PAIRWISE_OUTBOX_BATCH_SIZE").unwrap_or(100),
            claim_lease: Duration::from_secs(parsed(var, "PAIRWISE_OUTBOX_LEASE_SECS").unwrap_or(30)),
            backoff,
        };
        ensure!(outbox.batch_size > 0, "PAIRWISE_OUTBOX_BATCH_SIZE must be at least 1");
        ensure!(
            outbox.claim_lease > PUBLISH_TIMEOUT,
            "PAIRWISE_OUTBOX_LEASE_SECS must exceed the {}s publish timeout",
            PUBLISH_TIMEOUT.as_secs()
        );

        let allocation_batch_size = parsed(var, "PAIRWISE_ALLOCATION_BATCH_SIZE").unwrap_or(50);
        ensure!(allocation_batch_size > 0, "PAIRWISE_ALLOCATION_BATCH_SIZE must be at least 1");

        Ok(Self {
            log_level,
            dev_mode,
            database: DbConfig::from_lookup(var),
            academic_year: parsed(var, "PAIRWISE_ACADEMIC_YEAR"),
            fairness,
            allocation_batch_size,
            allocation_interval: Duration::from_secs(
                parsed(var, "PAIRWISE_ALLOCATION_INTERVAL_SECS").unwrap_or(5),
            ),
            counter,
            outbox,
            outbox_poll_interval: Duration::from_millis(
                parsed(var, "PAIRWISE_OUTBOX_POLL_MS").unwrap_or(500),
            ),
            webhook_url: var("PAIRWISE_OUTBOX_WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
            dispatch_once: flag("PAIRWISE_DISPATCH_ONCE"),
        })
    }
}

/// Parses `key` when present, ignoring values that do not parse.
pub(crate) fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}
