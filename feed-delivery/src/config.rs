use chrono::Duration;
use std::env;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Raw record keys tried, in order, when resolving an article's date.
pub const DEFAULT_DATE_PLACEHOLDERS: [&str; 2] = ["date", "pubdate"];

/// Longest article value quoted in a filter explanation.
pub const FILTER_VALUE_PREVIEW_LEN: usize = 100;

/// Longest channel response body copied into a remediation event.
pub const REMEDIATION_BODY_MAX_LEN: usize = 1000;

pub const MAX_FILTER_DEPTH: usize = 10;

/// Compiled size cap for `MATCHES` patterns.
pub const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub const REJECTED_ARTICLE_QUEUE: &str = "feed-rejected-article-disable-connection";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub hot_partition_days: i64,
    pub log_level: tracing::Level,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            hot_partition_days: 30,
            log_level: tracing::Level::INFO,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let hot_partition_days = env::var("FEED_DELIVERY_HOT_PARTITION_DAYS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(defaults.hot_partition_days);

        let log_level = env::var("FEED_DELIVERY_LOG_LEVEL")
            .ok()
            .and_then(|value| value.parse::<tracing::Level>().ok())
            .unwrap_or(defaults.log_level);

        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            hot_partition_days,
            log_level,
        }
    }

    pub fn hot_partition_age(&self) -> Duration {
        Duration::days(self.hot_partition_days)
    }
}
