//! Configuration for the index layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for an [`Index`](crate::Index).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Prefix prepended to every physical index name (default: `""`).
    ///
    /// Physical indices are named `{prefix}{index}-{type}`, lowercased.
    #[serde(default)]
    pub index_prefix: String,

    /// Delay-line settings.
    #[serde(default)]
    pub delay_line: DelayLineConfig,

    /// Attempts made by [`Index::retry`](crate::Index::retry) (default: 3).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Lifetime of entries in the entity cache in seconds (default: 60).
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Maximum number of entries in the entity cache (default: 1000).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Keep-alive of scroll contexts in seconds (default: 60).
    #[serde(default = "default_scroll_keep_alive_secs")]
    pub scroll_keep_alive_secs: u64,

    /// Documents fetched per shard and scroll batch (default: 10).
    #[serde(default = "default_scroll_batch_size")]
    pub scroll_batch_size: usize,

    /// Page size used by `query_page` when no limit was set (default: 25).
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Upper bound for unlimited list queries (default: 10000).
    #[serde(default = "default_max_result_window")]
    pub max_result_window: usize,
}

/// Settings of the consistency delay-line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayLineConfig {
    /// Minimum delay before a queued action runs, in milliseconds (default: 1000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Interval of the draining timer, in milliseconds (default: 1000).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Pending entries above which callers block instead (default: 100).
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_scroll_keep_alive_secs() -> u64 {
    60
}

fn default_scroll_batch_size() -> usize {
    10
}

fn default_page_size() -> usize {
    25
}

fn default_max_result_window() -> usize {
    10_000
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_max_pending() -> usize {
    100
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_prefix: String::new(),
            delay_line: DelayLineConfig::default(),
            retry_attempts: default_retry_attempts(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            scroll_keep_alive_secs: default_scroll_keep_alive_secs(),
            scroll_batch_size: default_scroll_batch_size(),
            default_page_size: default_page_size(),
            max_result_window: default_max_result_window(),
        }
    }
}

impl Default for DelayLineConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            tick_ms: default_tick_ms(),
            max_pending: default_max_pending(),
        }
    }
}

impl IndexConfig {
    /// Creates a configuration using the given index prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            index_prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Returns the physical index name for a logical index and entity type.
    pub fn physical_index(&self, index: &str, type_name: &str) -> String {
        format!("{}{}-{}", self.index_prefix, index, type_name).to_lowercase()
    }

    /// Returns the cache entry lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Returns the scroll keep-alive.
    pub fn scroll_keep_alive(&self) -> Duration {
        Duration::from_secs(self.scroll_keep_alive_secs)
    }
}

impl DelayLineConfig {
    /// Returns the minimum delay of queued actions.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Returns the timer interval.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}
