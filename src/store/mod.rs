//! Document store abstraction (ElasticSearch / OpenSearch).
//!
//! The cache, the last-sync tracker and the job and log shippers all persist JSON
//! documents into indices of a [`DocumentStore`]. Two implementations exist:
//!
//! - [`opensearch::OpenSearchStore`] - talks to a real cluster
//! - [`memory::MemoryStore`] - keeps documents in process, used by tests and dry runs

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;

pub mod memory;
pub mod opensearch;

/// A minimal query language covering what the toolkit needs.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Matches every document.
    MatchAll,
    /// Exact match of a keyword field.
    Term { field: String, value: String },
    /// Matches documents whose date field is at or before the given instant.
    NotAfter { field: String, instant: DateTime<Utc> },
    /// Matches documents matching every one of the queries.
    All(Vec<Query>),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_after(field: impl Into<String>, instant: DateTime<Utc>) -> Self {
        Query::NotAfter {
            field: field.into(),
            instant,
        }
    }

    pub fn all(queries: impl IntoIterator<Item = Query>) -> Self {
        Query::All(queries.into_iter().collect())
    }

    /// Renders the query in the ElasticSearch query DSL (the value of the `query` key).
    pub fn to_dsl(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Term { field, value } => json!({ "term": { field: { "value": value } } }),
            Query::NotAfter { field, instant } => {
                json!({ "range": { field: { "lte": instant.to_rfc3339() } } })
            }
            Query::All(queries) => {
                let must: Vec<Value> = queries.iter().map(Query::to_dsl).collect();
                json!({ "bool": { "must": must } })
            }
        }
    }
}

/// Index creation settings and mappings.
#[derive(Serialize, Clone, Debug)]
pub struct IndexDescription {
    /// Index settings (shards, replicas).
    pub settings: IndexSettings,
    /// Field mappings for the index.
    pub mappings: Mapping,
}

/// Index configuration settings.
#[derive(Serialize, Clone, Debug)]
pub struct IndexSettings {
    pub number_of_shards: u32,
    pub number_of_replicas: u32,
}

/// Index field mappings container.
#[derive(Serialize, Clone, Debug)]
pub struct Mapping {
    pub properties: HashMap<String, FieldMapping>,
}

/// Field types used by the toolkit's indices.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum FieldMapping {
    /// Full-text searchable field.
    #[serde(rename = "text")]
    Text,
    /// Exact-match field for filtering.
    #[serde(rename = "keyword")]
    Keyword,
    /// Date/time field.
    #[serde(rename = "date")]
    Date,
    /// Base64 encoded binary, stored but not searchable.
    #[serde(rename = "binary")]
    Binary,
}

impl IndexDescription {
    /// Describes a single shard index with the given fields.
    pub fn with_fields<const N: usize>(fields: [(&str, FieldMapping); N]) -> Self {
        IndexDescription {
            settings: IndexSettings {
                number_of_shards: 1,
                number_of_replicas: 1,
            },
            mappings: Mapping {
                properties: fields
                    .into_iter()
                    .map(|(name, mapping)| (name.to_owned(), mapping))
                    .collect(),
            },
        }
    }
}

/// Storage of JSON documents organized in indices.
///
/// Mirrors the subset of the ElasticSearch REST API used by connectors:
/// `_doc`, `_update`, `_search`, `_count` and `_delete_by_query`.
/// All writes are visible to subsequent reads (refresh on write).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stores a document. Without an id, the store generates one. With an id,
    /// an existing document is replaced.
    async fn create_document(&self, index: &str, id: Option<&str>, body: Value)
    -> anyhow::Result<()>;

    /// Merges the given fields into an existing document.
    async fn update_document(&self, index: &str, id: &str, body: Value) -> anyhow::Result<()>;

    /// Returns the sources of all documents matching the query. A missing index yields no documents.
    async fn search(&self, index: &str, query: &Query) -> anyhow::Result<Vec<Value>>;

    /// Counts the documents matching the query.
    async fn count(&self, index: &str, query: &Query) -> anyhow::Result<u64>;

    /// Deletes all documents matching the query and returns how many were removed.
    async fn delete_by_query(&self, index: &str, query: &Query) -> anyhow::Result<u64>;

    /// Creates the index unless it already exists.
    async fn ensure_index(&self, index: &str, description: IndexDescription) -> anyhow::Result<()>;
}

/// Searches the index and deserializes each hit.
pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    index: &str,
    query: &Query,
) -> anyhow::Result<Vec<T>> {
    store
        .search(index, query)
        .await?
        .into_iter()
        .map(|source| {
            serde_json::from_value(source)
                .with_context(|| format!("Failed to deserialize a document of index '{}'", index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn queries_render_to_dsl() {
        assert_eq!(Query::MatchAll.to_dsl(), json!({"match_all": {}}));
        assert_eq!(
            Query::term("k", "abc").to_dsl(),
            json!({"term": {"k": {"value": "abc"}}})
        );
        assert_eq!(
            Query::not_after("e", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()).to_dsl(),
            json!({"range": {"e": {"lte": "2024-01-02T03:04:05+00:00"}}})
        );
        assert_eq!(
            Query::all([Query::term("a", "1"), Query::term("b", "2")]).to_dsl(),
            json!({"bool": {"must": [
                {"term": {"a": {"value": "1"}}},
                {"term": {"b": {"value": "2"}}}
            ]}})
        );
    }

    #[test]
    fn index_descriptions_serialize_as_mappings() {
        let description = IndexDescription::with_fields([("k", FieldMapping::Keyword)]);
        assert_eq!(
            serde_json::to_value(description).unwrap(),
            json!({
                "settings": {"number_of_shards": 1, "number_of_replicas": 1},
                "mappings": {"properties": {"k": {"type": "keyword"}}}
            })
        );
    }
}
