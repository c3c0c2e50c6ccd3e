//! Ledger configuration.

use std::time::Duration;

use anyhow::{Context, bail};

/// Optimistic retry policy for movement commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. At least 1.
    pub max_attempts: u32,
    /// Linear backoff: attempt `n` sleeps `n * backoff` before retrying.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub retry: RetryPolicy,
    /// How long a commit may wait on a product lock.
    pub lock_timeout: Duration,
    /// Products shown in the dashboard low-stock list.
    pub low_stock_preview: usize,
    /// Movements shown in the dashboard feed.
    pub recent_movements: usize,
    /// Movement history page size.
    pub page_size: u32,
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            lock_timeout: Duration::from_millis(250),
            low_stock_preview: 5,
            recent_movements: 10,
            page_size: 30,
            database_url: None,
        }
    }
}

impl LedgerConfig {
    pub const MAX_ATTEMPTS: &'static str = "STOCKLEDGER_MAX_ATTEMPTS";
    pub const RETRY_BACKOFF_MS: &'static str = "STOCKLEDGER_RETRY_BACKOFF_MS";
    pub const LOCK_TIMEOUT_MS: &'static str = "STOCKLEDGER_LOCK_TIMEOUT_MS";
    pub const LOW_STOCK_PREVIEW: &'static str = "STOCKLEDGER_LOW_STOCK_PREVIEW";
    pub const RECENT_MOVEMENTS: &'static str = "STOCKLEDGER_RECENT_MOVEMENTS";
    pub const PAGE_SIZE: &'static str = "STOCKLEDGER_PAGE_SIZE";
    pub const DATABASE_URL: &'static str = "DATABASE_URL";

    /// Read configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration from an arbitrary key lookup. Unset keys keep their
    /// defaults; set but invalid values are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let max_attempts = parse_or(&lookup, Self::MAX_ATTEMPTS, defaults.retry.max_attempts)?;
        if max_attempts == 0 {
            bail!("{} must be at least 1", Self::MAX_ATTEMPTS);
        }
        let backoff_ms = parse_or(
            &lookup,
            Self::RETRY_BACKOFF_MS,
            defaults.retry.backoff.as_millis() as u64,
        )?;
        let lock_timeout_ms = parse_or(
            &lookup,
            Self::LOCK_TIMEOUT_MS,
            defaults.lock_timeout.as_millis() as u64,
        )?;
        let page_size = parse_or(&lookup, Self::PAGE_SIZE, defaults.page_size)?;
        if page_size == 0 {
            bail!("{} must be at least 1", Self::PAGE_SIZE);
        }

        Ok(Self {
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(backoff_ms),
            },
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            low_stock_preview: parse_or(&lookup, Self::LOW_STOCK_PREVIEW, defaults.low_stock_preview)?,
            recent_movements: parse_or(&lookup, Self::RECENT_MOVEMENTS, defaults.recent_movements)?,
            page_size,
            database_url: lookup(Self::DATABASE_URL).filter(|url| !url.trim().is_empty()),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_keys_use_defaults() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn values_are_parsed() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("STOCKLEDGER_MAX_ATTEMPTS", "8"),
            ("STOCKLEDGER_RETRY_BACKOFF_MS", " 2 "),
            ("STOCKLEDGER_PAGE_SIZE", "50"),
            ("DATABASE_URL", "postgres://localhost/stock"),
        ]))
        .unwrap();
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.delay_after(3), Duration::from_millis(6));
        assert_eq!(config.page_size, 50);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/stock"));
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(LedgerConfig::from_lookup(lookup(&[("STOCKLEDGER_MAX_ATTEMPTS", "many")])).is_err());
        assert!(LedgerConfig::from_lookup(lookup(&[("STOCKLEDGER_MAX_ATTEMPTS", "0")])).is_err());
        assert!(LedgerConfig::from_lookup(lookup(&[("STOCKLEDGER_PAGE_SIZE", "-1")])).is_err());
    }
}
