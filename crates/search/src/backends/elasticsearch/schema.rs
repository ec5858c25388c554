//! Index creation for Elasticsearch.
//!
//! Physical indices are created on demand with the creation settings of
//! [`IndexSettings`] and the mapping generated by the entity descriptor.

use elasticsearch::indices::{IndicesCreateParts, IndicesExistsParts};
use serde_json::{Value, json};

use crate::error::IndexResult;

use super::config::IndexSettings;
use super::store::{ElasticsearchStore, internal_error};

/// Builds the create-index body for `mapping`.
pub fn create_index_body(settings: &IndexSettings, mapping: &Value) -> Value {
    json!({
        "settings": {
            "number_of_shards": settings.shards,
            "number_of_replicas": settings.replicas,
            "refresh_interval": settings.refresh_interval,
            "max_result_window": settings.max_result_window,
        },
        "mappings": mapping,
    })
}

/// Creates `index` unless it already exists.
pub async fn ensure_index(store: &ElasticsearchStore, index: &str, mapping: &Value) -> IndexResult<()> {
    let exists = store
        .client()
        .indices()
        .exists(IndicesExistsParts::Index(&[index]))
        .send()
        .await?;

    if exists.status_code().is_success() {
        return Ok(());
    }

    let response = store
        .client()
        .indices()
        .create(IndicesCreateParts::Index(index))
        .body(create_index_body(&store.config().index, mapping))
        .send()
        .await?;

    if !response.status_code().is_success() {
        let body = response.text().await.unwrap_or_default();
        // Lost a creation race with another node
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        return Err(internal_error(format!(
            "Failed to create index {}: {}",
            index, body
        )));
    }

    tracing::info!(index = %index, "Created Elasticsearch index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_index_body() {
        let settings = IndexSettings {
            replicas: 0,
            ..Default::default()
        };
        let mapping = json!({ "properties": { "name": { "type": "keyword" } } });
        let body = create_index_body(&settings, &mapping);
        assert_eq!(body["settings"]["number_of_replicas"], 0);
        assert_eq!(body["settings"]["max_result_window"], 10000);
        assert_eq!(body["mappings"]["properties"]["name"]["type"], "keyword");
    }
}
