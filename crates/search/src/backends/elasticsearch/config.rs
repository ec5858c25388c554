//! Elasticsearch connection settings.

use serde::{Deserialize, Serialize};

/// Credentials sent with every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticsearchAuth {
    /// HTTP basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// API or service token.
    Bearer {
        /// Token value.
        token: String,
    },
}

/// Settings applied when a physical index is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Primary shards (default: 1).
    #[serde(default = "default_shards")]
    pub shards: u32,

    /// Replicas per shard (default: 1).
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    /// How often writes become searchable (default: `"1s"`).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,

    /// Largest `from + size` a search may request (default: 10000).
    #[serde(default = "default_max_result_window")]
    pub max_result_window: u32,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            replicas: default_replicas(),
            refresh_interval: default_refresh_interval(),
            max_result_window: default_max_result_window(),
        }
    }
}

/// Configuration of an [`ElasticsearchStore`](super::ElasticsearchStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Cluster node URLs. Only the first one is connected to.
    pub nodes: Vec<String>,

    /// Credentials, if the cluster is secured.
    #[serde(default)]
    pub auth: Option<ElasticsearchAuth>,

    /// Per-request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Accept any TLS certificate. Development clusters only.
    #[serde(default)]
    pub disable_certificate_validation: bool,

    /// Search preference of queries marked `from_primary` (default: `"_local"`).
    #[serde(default = "default_primary_preference")]
    pub primary_preference: String,

    /// Settings of newly created indices.
    #[serde(default)]
    pub index: IndexSettings,
}

fn default_shards() -> u32 {
    1
}

fn default_replicas() -> u32 {
    1
}

fn default_refresh_interval() -> String {
    "1s".to_string()
}

fn default_max_result_window() -> u32 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_primary_preference() -> String {
    "_local".to_string()
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["http://localhost:9200".to_string()],
            auth: None,
            request_timeout_ms: default_request_timeout_ms(),
            disable_certificate_validation: false,
            primary_preference: default_primary_preference(),
            index: IndexSettings::default(),
        }
    }
}
