//! [`DocumentStore`] implementation on an Elasticsearch cluster.

use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cat::CatIndicesParts;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::cluster::ClusterHealthParts;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::indices::{IndicesGetMappingParts, IndicesRefreshParts};
use elasticsearch::params::{Conflicts, OpType, VersionType};
use elasticsearch::{
    ClearScrollParts, CountParts, DeleteByQueryParts, DeleteParts, Elasticsearch, GetParts,
    IndexParts, ScrollParts, SearchParts,
};
use serde_json::{Value, json};

use crate::core::{
    CopyOutcome, DeleteRequest, DocumentStore, FacetBuckets, ScrollBatch, SearchRequest,
    SearchResponse, StoreKind, StoredDocument, WriteMode, WriteRequest,
};
use crate::error::{
    BackendError, ConcurrencyError, EntityError, IndexError, IndexResult, QueryError,
};
use crate::query::term_string;

use super::config::{ElasticsearchAuth, ElasticsearchConfig};
use super::{query_builder, schema};

const BACKEND_NAME: &str = "elasticsearch";

pub(crate) fn internal_error(message: impl Into<String>) -> IndexError {
    IndexError::Backend(BackendError::Internal {
        backend_name: BACKEND_NAME.to_string(),
        message: message.into(),
        source: None,
    })
}

async fn failure(operation: &str, response: Response) -> IndexError {
    let status = response.status_code();
    let body = response.text().await.unwrap_or_default();
    internal_error(format!("{} returned status {}: {}", operation, status, body))
}

/// Elasticsearch document store.
///
/// Writes with an expected version use external versioning with the
/// successor version, so a write succeeds exactly when the stored version is
/// not newer than the one the entity was read with.
pub struct ElasticsearchStore {
    client: Elasticsearch,
    config: ElasticsearchConfig,
}

impl std::fmt::Debug for ElasticsearchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ElasticsearchStore {
    /// Creates a store connected to the first configured node.
    pub fn new(config: ElasticsearchConfig) -> IndexResult<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self { client, config })
    }

    fn build_client(config: &ElasticsearchConfig) -> IndexResult<Elasticsearch> {
        let url = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "http://localhost:9200".to_string());

        let parsed_url: elasticsearch::http::Url = url.parse().map_err(|e| {
            IndexError::Backend(BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Invalid URL: {}", e),
            })
        })?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);

        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                ElasticsearchAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                ElasticsearchAuth::Bearer { token } => {
                    builder.auth(Credentials::Bearer(token.clone()))
                }
            };
        }

        let transport = builder.build().map_err(|e| {
            IndexError::Backend(BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Failed to build transport: {}", e),
            })
        })?;

        Ok(Elasticsearch::new(transport))
    }

    /// Returns the Elasticsearch client.
    pub(crate) fn client(&self) -> &Elasticsearch {
        &self.client
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }
}

fn keep_alive_param(keep_alive: Duration) -> String {
    format!("{}s", keep_alive.as_secs().max(1))
}

fn parse_hit(hit: &Value) -> Option<StoredDocument> {
    Some(StoredDocument {
        id: hit.get("_id")?.as_str()?.to_string(),
        version: hit.get("_version").and_then(Value::as_i64).unwrap_or(1),
        routing: hit
            .get("_routing")
            .and_then(Value::as_str)
            .map(str::to_string),
        source: hit
            .get("_source")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

fn parse_hits(body: &Value) -> Vec<StoredDocument> {
    body["hits"]["hits"]
        .as_array()
        .map(|hits| hits.iter().filter_map(parse_hit).collect())
        .unwrap_or_default()
}

fn parse_total(body: &Value) -> u64 {
    let total = &body["hits"]["total"];
    total
        .get("value")
        .and_then(Value::as_u64)
        .or_else(|| total.as_u64())
        .unwrap_or(0)
}

fn parse_facets(body: &Value, request: &SearchRequest) -> Vec<FacetBuckets> {
    request
        .facets
        .iter()
        .map(|facet| {
            let buckets = body["aggregations"][facet.field.as_str()]["buckets"]
                .as_array()
                .map(|buckets| {
                    buckets
                        .iter()
                        .filter_map(|bucket| {
                            let key = bucket
                                .get("key_as_string")
                                .or_else(|| bucket.get("key"))
                                .and_then(term_string)?;
                            let count = bucket.get("doc_count").and_then(Value::as_u64)?;
                            Some((key, count))
                        })
                        .collect()
                })
                .unwrap_or_default();
            FacetBuckets {
                field: facet.field.clone(),
                buckets,
            }
        })
        .collect()
}

fn parse_scroll(body: &Value) -> ScrollBatch {
    ScrollBatch {
        scroll_id: body
            .get("_scroll_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        hits: parse_hits(body),
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Elasticsearch
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn health_check(&self) -> IndexResult<()> {
        let response = self
            .client
            .cluster()
            .health(ClusterHealthParts::None)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Health check failed: {}", e),
            })?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Cluster health returned status {}", status),
            }
            .into());
        }

        let body = response.json::<Value>().await?;
        let cluster_status = body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");

        if cluster_status == "red" {
            return Err(BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("Cluster status is red: {:?}", body),
            }
            .into());
        }

        Ok(())
    }

    async fn ensure_index(&self, index: &str, mapping: &Value) -> IndexResult<()> {
        schema::ensure_index(self, index, mapping).await
    }

    async fn list_indices(&self, prefix: &str) -> IndexResult<Vec<String>> {
        let pattern = format!("{}*", prefix);
        let response = self
            .client
            .cat()
            .indices(CatIndicesParts::Index(&[pattern.as_str()]))
            .format("json")
            .h(&["index"])
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(failure("cat indices", response).await);
        }

        let body = response.json::<Value>().await?;
        let mut indices: Vec<String> = body
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("index").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        indices.sort();
        Ok(indices)
    }

    async fn get_mapping(&self, index: &str) -> IndexResult<Option<Value>> {
        let response = self
            .client
            .indices()
            .get_mapping(IndicesGetMappingParts::Index(&[index]))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status_code().is_success() {
            return Err(failure("get mapping", response).await);
        }

        let body = response.json::<Value>().await?;
        Ok(body.get(index).and_then(|i| i.get("mappings")).cloned())
    }

    async fn get(
        &self,
        index: &str,
        id: &str,
        routing: Option<&str>,
    ) -> IndexResult<Option<StoredDocument>> {
        let mut call = self.client.get(GetParts::IndexId(index, id));
        if let Some(routing) = routing {
            call = call.routing(routing);
        }
        let response = call.send().await?;

        if response.status_code().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status_code().is_success() {
            return Err(failure("get", response).await);
        }

        let body = response.json::<Value>().await?;
        if !body.get("found").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(None);
        }
        Ok(parse_hit(&body))
    }

    async fn write(&self, request: WriteRequest) -> IndexResult<i64> {
        let WriteRequest {
            index,
            type_name,
            id,
            routing,
            source,
            mode,
        } = request;

        let mut call = self
            .client
            .index(IndexParts::IndexId(&index, &id))
            .body(Value::Object(source));
        if let Some(routing) = routing.as_deref() {
            call = call.routing(routing);
        }
        call = match mode {
            WriteMode::Create => call.op_type(OpType::Create),
            WriteMode::Versioned(version) => call
                .version(version + 1)
                .version_type(VersionType::External),
            WriteMode::Overwrite => call,
        };
        let response = call.send().await?;

        if response.status_code().as_u16() == 409 {
            return Err(match mode {
                WriteMode::Versioned(expected_version) => ConcurrencyError::OptimisticLock {
                    entity_type: type_name,
                    id,
                    expected_version,
                    actual_version: None,
                }
                .into(),
                _ => EntityError::AlreadyExists {
                    entity_type: type_name,
                    id,
                }
                .into(),
            });
        }
        if !response.status_code().is_success() {
            return Err(failure("index", response).await);
        }

        let body = response.json::<Value>().await?;
        body.get("_version")
            .and_then(Value::as_i64)
            .ok_or_else(|| internal_error("index response carries no _version"))
    }

    async fn delete(&self, request: DeleteRequest) -> IndexResult<bool> {
        let mut call = self
            .client
            .delete(DeleteParts::IndexId(&request.index, &request.id));
        if let Some(routing) = request.routing.as_deref() {
            call = call.routing(routing);
        }
        if let Some(version) = request.expected_version {
            call = call
                .version(version + 1)
                .version_type(VersionType::External);
        }
        let response = call.send().await?;

        match response.status_code().as_u16() {
            404 => Ok(false),
            409 => Err(ConcurrencyError::OptimisticLock {
                entity_type: request.type_name,
                id: request.id,
                expected_version: request.expected_version.unwrap_or_default(),
                actual_version: None,
            }
            .into()),
            _ if response.status_code().is_success() => Ok(true),
            _ => Err(failure("delete", response).await),
        }
    }

    async fn search(&self, request: &SearchRequest) -> IndexResult<SearchResponse> {
        let indices = [request.index.as_str()];
        let routing: Vec<&str> = request.routing.as_deref().into_iter().collect();
        let mut call = self
            .client
            .search(SearchParts::Index(&indices))
            .ignore_unavailable(true)
            .body(query_builder::build_search(request));
        if !routing.is_empty() {
            call = call.routing(&routing);
        }
        if request.primary {
            call = call.preference(&self.config.primary_preference);
        }
        let response = call.send().await?;

        if !response.status_code().is_success() {
            return Err(failure("search", response).await);
        }

        let body = response.json::<Value>().await?;
        Ok(SearchResponse {
            hits: parse_hits(&body),
            total: parse_total(&body),
            facets: parse_facets(&body, request),
            took: Duration::from_millis(body.get("took").and_then(Value::as_u64).unwrap_or(0)),
        })
    }

    async fn count(&self, request: &SearchRequest) -> IndexResult<u64> {
        let indices = [request.index.as_str()];
        let routing: Vec<&str> = request.routing.as_deref().into_iter().collect();
        let mut call = self
            .client
            .count(CountParts::Index(&indices))
            .ignore_unavailable(true)
            .body(json!({ "query": query_builder::build_query(request) }));
        if !routing.is_empty() {
            call = call.routing(&routing);
        }
        if request.primary {
            call = call.preference(&self.config.primary_preference);
        }
        let response = call.send().await?;

        if !response.status_code().is_success() {
            return Err(failure("count", response).await);
        }

        let body = response.json::<Value>().await?;
        Ok(body.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn delete_by_query(&self, request: &SearchRequest) -> IndexResult<u64> {
        let indices = [request.index.as_str()];
        let routing: Vec<&str> = request.routing.as_deref().into_iter().collect();
        let mut call = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&indices))
            .ignore_unavailable(true)
            .conflicts(Conflicts::Proceed)
            .refresh(true)
            .body(json!({ "query": query_builder::build_query(request) }));
        if !routing.is_empty() {
            call = call.routing(&routing);
        }
        let response = call.send().await?;

        if !response.status_code().is_success() {
            return Err(failure("delete by query", response).await);
        }

        let body = response.json::<Value>().await?;
        Ok(body.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn open_scroll(
        &self,
        request: &SearchRequest,
        keep_alive: Duration,
        batch_size: usize,
    ) -> IndexResult<ScrollBatch> {
        let indices = [request.index.as_str()];
        let routing: Vec<&str> = request.routing.as_deref().into_iter().collect();
        let keep_alive = keep_alive_param(keep_alive);
        let mut call = self
            .client
            .search(SearchParts::Index(&indices))
            .ignore_unavailable(true)
            .scroll(&keep_alive)
            .body(query_builder::build_scroll(request, batch_size));
        if !routing.is_empty() {
            call = call.routing(&routing);
        }
        if request.primary {
            call = call.preference(&self.config.primary_preference);
        }
        let response = call.send().await?;

        if !response.status_code().is_success() {
            return Err(failure("open scroll", response).await);
        }

        let body = response.json::<Value>().await?;
        Ok(parse_scroll(&body))
    }

    async fn next_scroll(
        &self,
        scroll_id: &str,
        keep_alive: Duration,
    ) -> IndexResult<ScrollBatch> {
        let response = self
            .client
            .scroll(ScrollParts::None)
            .body(json!({ "scroll": keep_alive_param(keep_alive), "scroll_id": scroll_id }))
            .send()
            .await?;

        if response.status_code().as_u16() == 404 {
            return Err(QueryError::ScrollLost {
                scroll_id: scroll_id.to_string(),
            }
            .into());
        }
        if !response.status_code().is_success() {
            return Err(failure("scroll", response).await);
        }

        let body = response.json::<Value>().await?;
        Ok(parse_scroll(&body))
    }

    async fn clear_scroll(&self, scroll_id: &str) -> IndexResult<()> {
        let response = self
            .client
            .clear_scroll(ClearScrollParts::None)
            .body(json!({ "scroll_id": [scroll_id] }))
            .send()
            .await?;

        let status = response.status_code();
        if !status.is_success() && status.as_u16() != 404 {
            return Err(failure("clear scroll", response).await);
        }
        Ok(())
    }

    async fn refresh(&self, index: &str) -> IndexResult<()> {
        let response = self
            .client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[index]))
            .ignore_unavailable(true)
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(failure("refresh", response).await);
        }
        Ok(())
    }

    async fn copy_index(&self, source: &str, dest: &str) -> IndexResult<CopyOutcome> {
        let response = self
            .client
            .reindex()
            .wait_for_completion(false)
            .body(json!({
                "source": { "index": source },
                "dest": { "index": dest, "version_type": "external" }
            }))
            .send()
            .await?;

        if !response.status_code().is_success() {
            return Err(failure("reindex", response).await);
        }

        let body = response.json::<Value>().await?;
        match body.get("task").and_then(Value::as_str) {
            Some(task) => Ok(CopyOutcome::Submitted {
                task: task.to_string(),
            }),
            None => Ok(CopyOutcome::Completed {
                documents: body.get("created").and_then(Value::as_u64).unwrap_or(0),
            }),
        }
    }
}
