//! In-process document store.
//!
//! Evaluates [`Query`] directly against stored JSON documents. Can be switched
//! to "unavailable" to simulate an unreachable cluster.

use crate::store::{DocumentStore, IndexDescription, Query};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    indices: RwLock<HashMap<String, Vec<(String, Value)>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns all documents of an index in insertion order.
    pub async fn documents(&self, index: &str) -> Vec<Value> {
        self.indices
            .read()
            .await
            .get(index)
            .map(|docs| docs.iter().map(|(_, doc)| doc.clone()).collect())
            .unwrap_or_default()
    }

    /// Determines if the index was created (explicitly or by a write).
    pub async fn has_index(&self, index: &str) -> bool {
        self.indices.read().await.contains_key(index)
    }

    fn check_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("Document store is unavailable");
        }

        Ok(())
    }
}

/// Evaluates a query against a document.
fn matches(query: &Query, document: &Value) -> bool {
    match query {
        Query::MatchAll => true,
        Query::Term { field, value } => match document.get(field) {
            Some(Value::String(actual)) => actual == value,
            Some(Value::Number(actual)) => actual.to_string() == *value,
            Some(Value::Bool(actual)) => actual.to_string() == *value,
            _ => false,
        },
        Query::NotAfter { field, instant } => document
            .get(field)
            .and_then(Value::as_str)
            .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|date| date.with_timezone(&Utc) <= *instant)
            .unwrap_or(false),
        Query::All(queries) => queries.iter().all(|query| matches(query, document)),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(
        &self,
        index: &str,
        id: Option<&str>,
        body: Value,
    ) -> anyhow::Result<()> {
        self.check_available()?;

        let mut indices = self.indices.write().await;
        let documents = indices.entry(index.to_owned()).or_default();

        match id {
            Some(id) => {
                if let Some(existing) = documents.iter_mut().find(|(doc_id, _)| doc_id == id) {
                    existing.1 = body;
                } else {
                    documents.push((id.to_owned(), body));
                }
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                documents.push((format!("generated-{}", id), body));
            }
        }

        Ok(())
    }

    async fn update_document(&self, index: &str, id: &str, body: Value) -> anyhow::Result<()> {
        self.check_available()?;

        let mut indices = self.indices.write().await;
        let document = indices
            .get_mut(index)
            .and_then(|docs| docs.iter_mut().find(|(doc_id, _)| doc_id == id))
            .map(|(_, doc)| doc)
            .ok_or_else(|| anyhow::anyhow!("Document '{}' not found in index '{}'", id, index))?;

        match (document, body) {
            (Value::Object(target), Value::Object(fields)) => {
                for (key, value) in fields {
                    target.insert(key, value);
                }
            }
            (document, body) => *document = body,
        }

        Ok(())
    }

    async fn search(&self, index: &str, query: &Query) -> anyhow::Result<Vec<Value>> {
        self.check_available()?;

        Ok(self
            .indices
            .read()
            .await
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| matches(query, doc))
                    .map(|(_, doc)| doc.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count(&self, index: &str, query: &Query) -> anyhow::Result<u64> {
        Ok(self.search(index, query).await?.len() as u64)
    }

    async fn delete_by_query(&self, index: &str, query: &Query) -> anyhow::Result<u64> {
        self.check_available()?;

        let mut indices = self.indices.write().await;
        let Some(documents) = indices.get_mut(index) else {
            return Ok(0);
        };

        let before = documents.len();
        documents.retain(|(_, doc)| !matches(query, doc));
        Ok((before - documents.len()) as u64)
    }

    async fn ensure_index(&self, index: &str, _description: IndexDescription) -> anyhow::Result<()> {
        self.check_available()?;

        self.indices
            .write()
            .await
            .entry(index.to_owned())
            .or_default();
        Ok(())
    }
}
