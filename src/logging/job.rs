//! Job status log kept in the document store.
//!
//! Besides plain log lines, connectors record the progress of each sync run,
//! per data source and endpoint:
//!
//! ```json
//! { "datasource": "jira", "endpoint": "https://jira.example.com/ONAP", "status": "done",
//!   "created_at": "2024-03-01T12:00:00Z", "project_slug": "onap", "message": "1200 issues" }
//! ```
//!
//! The document id is derived from datasource, endpoint, status and start time,
//! so storing the same job again replaces its entry. A status change creates a
//! new entry, which keeps the history of a run (`inprogress` → `done`).

use crate::store::{DocumentStore, FieldMapping, IndexDescription, Query};
use crate::tools::digest;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// Default name of the job log index.
pub const DEFAULT_JOB_LOG_INDEX: &str = "connector-task-logging";

/// State of a sync job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    InProgress,
    Failed,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "inprogress",
            JobStatus::Failed => "failed",
            JobStatus::Done => "done",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inprogress" => Ok(JobStatus::InProgress),
            "failed" => Ok(JobStatus::Failed),
            "done" => Ok(JobStatus::Done),
            other => Err(anyhow::anyhow!(
                "Log status must be one of [inprogress, failed, done], got '{}'",
                other
            )),
        }
    }
}

/// A single job log entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub datasource: String,
    pub endpoint: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub project_slug: String,
    #[serde(default)]
    pub message: String,
}

impl JobLog {
    /// Creates an entry for a job started now.
    pub fn new(datasource: &str, endpoint: &str, status: JobStatus) -> Self {
        Self {
            datasource: datasource.to_owned(),
            endpoint: endpoint.to_owned(),
            status,
            created_at: Utc::now(),
            project_slug: String::new(),
            message: String::new(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_project(mut self, project_slug: &str) -> Self {
        self.project_slug = project_slug.to_owned();
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = message.to_owned();
        self
    }

    /// Id of the document storing this entry.
    ///
    /// The start time enters with second precision, project and message are ignored.
    pub fn document_id(&self) -> String {
        let created_at = self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        digest([
            self.datasource.as_bytes(),
            self.endpoint.as_bytes(),
            self.status.as_str().as_bytes(),
            created_at.as_bytes(),
        ])
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.datasource.is_empty() || self.endpoint.is_empty() {
            anyhow::bail!("Log datasource and endpoint are required");
        }

        Ok(())
    }
}

/// Describes the job log index.
pub fn job_log_index_description() -> IndexDescription {
    IndexDescription::with_fields([
        ("datasource", FieldMapping::Keyword),
        ("endpoint", FieldMapping::Keyword),
        ("status", FieldMapping::Keyword),
        ("created_at", FieldMapping::Date),
        ("project_slug", FieldMapping::Keyword),
        ("message", FieldMapping::Text),
    ])
}

/// Writes and reads job log entries. Cheap to clone.
#[derive(Clone)]
pub struct JobLogger {
    store: Arc<dyn DocumentStore>,
    index: String,
}

impl JobLogger {
    pub fn new(store: Arc<dyn DocumentStore>, index: &str) -> Self {
        Self {
            store,
            index: index.to_owned(),
        }
    }

    /// Uses the default index suffixed with the given environment, e.g. `connector-task-logging-prod`.
    pub fn for_environment(store: Arc<dyn DocumentStore>, environment: &str) -> Self {
        Self::new(store, &format!("{}-{}", DEFAULT_JOB_LOG_INDEX, environment))
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Creates the job log index unless it exists.
    pub async fn ensure_index(&self) -> anyhow::Result<()> {
        self.store
            .ensure_index(&self.index, job_log_index_description())
            .await
    }

    /// Stores the entry, replacing an earlier one of the same job and status.
    #[tracing::instrument(
        level = "debug",
        skip(self, log),
        fields(datasource = %log.datasource, endpoint = %log.endpoint, status = %log.status),
        err(Display)
    )]
    pub async fn store_log(&self, log: &JobLog) -> anyhow::Result<()> {
        log.validate()?;

        let body = serde_json::to_value(log).context("Failed to serialize job log")?;
        self.store
            .create_document(&self.index, Some(&log.document_id()), body)
            .await
            .with_context(|| {
                format!(
                    "Failed to store the job log of {} ({})",
                    log.datasource, log.endpoint
                )
            })
    }

    /// Returns all entries of the data source, oldest first.
    pub async fn pull_logs(&self, datasource: &str) -> anyhow::Result<Vec<JobLog>> {
        self.pull(datasource, Query::term("datasource", datasource)).await
    }

    /// Returns the entries of the data source in the given state, oldest first.
    pub async fn pull_logs_with_status(
        &self,
        datasource: &str,
        status: JobStatus,
    ) -> anyhow::Result<Vec<JobLog>> {
        let query = Query::all([
            Query::term("datasource", datasource),
            Query::term("status", status.as_str()),
        ]);
        self.pull(datasource, query).await
    }

    async fn pull(&self, datasource: &str, query: Query) -> anyhow::Result<Vec<JobLog>> {
        let sources = self
            .store
            .search(&self.index, &query)
            .await
            .with_context(|| format!("Failed to read the job logs of {}", datasource))?;

        let mut logs: Vec<JobLog> = sources
            .into_iter()
            .filter_map(|source| match serde_json::from_value(source) {
                Ok(log) => Some(log),
                Err(err) => {
                    tracing::warn!("Skipping unreadable job log of {}: {}", datasource, err);
                    None
                }
            })
            .collect();
        logs.sort_by_key(|log| log.created_at);

        Ok(logs)
    }
}
