//! OpenSearch/Elasticsearch backed document store.
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `{DS}_ES_URL` | Cluster URL (required) |
//! | `{DS}_ES_USER` | Username for basic auth (optional) |
//! | `{DS}_ES_PASS` | Password for basic auth (optional) |

use crate::context::Context;
use crate::store::{DocumentStore, IndexDescription, Query};
use crate::tools::{MAX_PAYLOAD_PRINT_LEN, truncate_str};
use anyhow::Context as _;
use async_trait::async_trait;
use opensearch::auth::Credentials;
use opensearch::http::response::Response;
use opensearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use opensearch::indices::{IndicesCreateParts, IndicesExistsParts};
use opensearch::params::{Conflicts, Refresh};
use opensearch::{
    CountParts, DeleteByQueryParts, IndexParts, OpenSearch, SearchParts, UpdateParts,
};
use serde_json::{Value, json};

/// Upper bound of hits fetched by a single search.
const MAX_SEARCH_HITS: i64 = 10_000;

/// OpenSearch client wrapper.
pub struct OpenSearchStore {
    /// The underlying OpenSearch client.
    pub client: OpenSearch,
}

impl OpenSearchStore {
    /// Creates a client for the cluster configured in the context.
    pub fn from_context(context: &Context) -> anyhow::Result<Self> {
        let url = context
            .es_url
            .as_deref()
            .with_context(|| format!("Missing {}ES_URL", context.prefix))?;

        Self::new(url, &context.es_user, &context.es_pass)
    }

    /// Creates a client for the given cluster. Credentials are only used if a user is given.
    pub fn new(url: &str, user: &str, pass: &str) -> anyhow::Result<Self> {
        let conn_pool =
            SingleNodeConnectionPool::new(url.parse().context("Invalid OpenSearch URL")?);

        let mut builder = TransportBuilder::new(conn_pool);

        if !user.is_empty() {
            builder = builder.auth(Credentials::Basic(user.to_owned(), pass.to_owned()));
        }

        let transport = builder.build()?;
        Ok(Self {
            client: OpenSearch::new(transport),
        })
    }
}

/// Turns a non-success response into an error carrying the (truncated) response body.
async fn expect_success(response: Response, action: &str, index: &str) -> anyhow::Result<Response> {
    let status = response.status_code();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(anyhow::anyhow!(
        "Failed to {} in index '{}': status {} - {}",
        action,
        index,
        status,
        truncate_str(&body, MAX_PAYLOAD_PRINT_LEN, true)
    ))
}

#[async_trait]
impl DocumentStore for OpenSearchStore {
    #[tracing::instrument(level = "debug", skip(self, body), err(Display))]
    async fn create_document(
        &self,
        index: &str,
        id: Option<&str>,
        body: Value,
    ) -> anyhow::Result<()> {
        let parts = match id {
            Some(id) => IndexParts::IndexId(index, id),
            None => IndexParts::Index(index),
        };

        let response = self
            .client
            .index(parts)
            .refresh(Refresh::True)
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to store a document in index '{}'", index))?;

        expect_success(response, "store a document", index).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, body), err(Display))]
    async fn update_document(&self, index: &str, id: &str, body: Value) -> anyhow::Result<()> {
        let response = self
            .client
            .update(UpdateParts::IndexId(index, id))
            .refresh(Refresh::True)
            .body(json!({ "doc": body }))
            .send()
            .await
            .with_context(|| format!("Failed to update document '{}' in index '{}'", id, index))?;

        expect_success(response, "update a document", index).await?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn search(&self, index: &str, query: &Query) -> anyhow::Result<Vec<Value>> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .size(MAX_SEARCH_HITS)
            .body(json!({ "query": query.to_dsl() }))
            .send()
            .await
            .with_context(|| format!("Failed to search index '{}'", index))?;

        if response.status_code().as_u16() == 404 {
            return Ok(Vec::new());
        }

        let mut result = expect_success(response, "search", index)
            .await?
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse search result of index '{}'", index))?;

        let hits = match result["hits"]["hits"].take() {
            Value::Array(hits) => hits,
            _ => Vec::new(),
        };

        Ok(hits
            .into_iter()
            .filter_map(|mut hit| match hit["_source"].take() {
                Value::Null => None,
                source => Some(source),
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn count(&self, index: &str, query: &Query) -> anyhow::Result<u64> {
        let response = self
            .client
            .count(CountParts::Index(&[index]))
            .body(json!({ "query": query.to_dsl() }))
            .send()
            .await
            .with_context(|| format!("Failed to count documents of index '{}'", index))?;

        if response.status_code().as_u16() == 404 {
            return Ok(0);
        }

        let result = expect_success(response, "count documents", index)
            .await?
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse count result of index '{}'", index))?;

        result["count"]
            .as_u64()
            .with_context(|| format!("Count result of index '{}' contains no count", index))
    }

    #[tracing::instrument(level = "debug", skip(self), err(Display))]
    async fn delete_by_query(&self, index: &str, query: &Query) -> anyhow::Result<u64> {
        let response = self
            .client
            .delete_by_query(DeleteByQueryParts::Index(&[index]))
            .conflicts(Conflicts::Proceed)
            .refresh(true)
            .body(json!({ "query": query.to_dsl() }))
            .send()
            .await
            .with_context(|| format!("Failed to delete documents of index '{}'", index))?;

        if response.status_code().as_u16() == 404 {
            return Ok(0);
        }

        let result = expect_success(response, "delete documents", index)
            .await?
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse deletion result of index '{}'", index))?;

        Ok(result["deleted"].as_u64().unwrap_or_default())
    }

    #[tracing::instrument(skip(self, description), err(Display))]
    async fn ensure_index(&self, index: &str, description: IndexDescription) -> anyhow::Result<()> {
        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await?;

        if exists_response.status_code().is_success() {
            return Ok(());
        }

        tracing::info!("Index '{}' does not exist. Creating...", index);

        let response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(description)
            .send()
            .await?;

        // Another process may have won the race.
        if response.status_code().as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            if body.contains("resource_already_exists_exception") {
                return Ok(());
            }
            anyhow::bail!(
                "Failed to create index {}: {}",
                index,
                truncate_str(&body, MAX_PAYLOAD_PRINT_LEN, true)
            );
        }

        expect_success(response, "create the index", index).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldMapping;
    use chrono::Utc;
    use std::env;

    fn test_store() -> OpenSearchStore {
        let url = env::var("OPENSEARCH_TEST_URL").unwrap_or("http://localhost:9200".to_string());
        OpenSearchStore::new(&url, "", "").unwrap()
    }

    #[test]
    fn missing_url_is_reported() {
        let context = Context::from_lookup("jira", |_| None).unwrap();
        let err = OpenSearchStore::from_context(&context).err().unwrap();
        assert_eq!(err.to_string(), "Missing JIRA_ES_URL");
    }

    #[tokio::test]
    #[ignore]
    async fn documents_round_trip_through_a_cluster() {
        let store = test_store();
        let index = format!("connector-kit-test-{}", Utc::now().timestamp_millis());

        store
            .ensure_index(&index, IndexDescription::with_fields([("k", FieldMapping::Keyword)]))
            .await
            .unwrap();
        // Idempotent...
        store
            .ensure_index(&index, IndexDescription::with_fields([("k", FieldMapping::Keyword)]))
            .await
            .unwrap();

        store
            .create_document(&index, Some("one"), json!({"k": "a", "n": 1}))
            .await
            .unwrap();
        store
            .update_document(&index, "one", json!({"n": 2}))
            .await
            .unwrap();

        let hits = store.search(&index, &Query::term("k", "a")).await.unwrap();
        assert_eq!(hits, vec![json!({"k": "a", "n": 2})]);
        assert_eq!(store.count(&index, &Query::MatchAll).await.unwrap(), 1);
        assert_eq!(store.delete_by_query(&index, &Query::term("k", "a")).await.unwrap(), 1);

        store
            .client
            .indices()
            .delete(opensearch::indices::IndicesDeleteParts::Index(&[&index]))
            .send()
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn missing_indices_are_empty() {
        let store = test_store();
        let query = Query::MatchAll;

        assert!(store.search("connector-kit-missing", &query).await.unwrap().is_empty());
        assert_eq!(store.count("connector-kit-missing", &query).await.unwrap(), 0);
    }
}
