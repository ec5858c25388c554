//! Background reindexing into a new index prefix.
//!
//! A reindex lists every physical index under the current prefix, creates its
//! counterpart under the new prefix (with the mapping of the registered
//! descriptor, or the existing mapping for unknown indices) and copies the
//! documents over. It runs as a background job whose progress is tracked in
//! [`ReindexJobs`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::IndexConfig;
use crate::core::{CopyOutcome, DocumentStore};
use crate::error::IndexResult;
use crate::schema::Schema;

/// Status of a reindex job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReindexStatus {
    /// Job is queued but not started.
    Queued,
    /// Job is running.
    InProgress,
    /// Every index has been handled.
    Completed,
    /// The job could not run.
    Failed,
}

impl ReindexStatus {
    /// Returns true until the job has finished.
    pub fn is_running(&self) -> bool {
        matches!(self, ReindexStatus::Queued | ReindexStatus::InProgress)
    }

    /// Returns true if the job has finished.
    pub fn is_finished(&self) -> bool {
        matches!(self, ReindexStatus::Completed | ReindexStatus::Failed)
    }
}

/// Snapshot of a reindex job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexProgress {
    /// Id returned by [`Index::reindex`](crate::Index::reindex).
    pub job_id: String,

    /// Current status.
    pub status: ReindexStatus,

    /// Prefix the indices are copied to.
    pub new_prefix: String,

    /// Number of source indices.
    pub total_indices: u64,

    /// Number of source indices handled so far.
    pub processed_indices: u64,

    /// Documents copied by copies that completed inline.
    pub documents_copied: u64,

    /// Ids of copy tasks still running inside the store.
    pub tasks: Vec<String>,

    /// Per-index failures.
    pub errors: Vec<ReindexProgressError>,

    /// RFC 3339 time the job started running.
    pub started_at: Option<String>,

    /// RFC 3339 time the job finished.
    pub completed_at: Option<String>,

    /// Why the job failed as a whole.
    pub error_message: Option<String>,
}

/// A failure to copy one index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexProgressError {
    /// Source index.
    pub index: String,
    /// Error message.
    pub error: String,
}

impl ReindexProgress {
    /// Creates a queued job.
    pub fn new(job_id: impl Into<String>, new_prefix: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ReindexStatus::Queued,
            new_prefix: new_prefix.into(),
            total_indices: 0,
            processed_indices: 0,
            documents_copied: 0,
            tasks: Vec::new(),
            errors: Vec::new(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Share of source indices handled, in percent.
    pub fn percentage(&self) -> f64 {
        if self.total_indices == 0 {
            0.0
        } else {
            (self.processed_indices as f64 / self.total_indices as f64) * 100.0
        }
    }

    /// Returns true if the job or any index copy failed.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.error_message.is_some()
    }
}

/// Progress of all reindex jobs of an index.
#[derive(Debug, Clone, Default)]
pub struct ReindexJobs {
    jobs: Arc<RwLock<HashMap<String, ReindexProgress>>>,
}

impl ReindexJobs {
    pub(crate) fn insert(&self, progress: ReindexProgress) {
        self.jobs.write().insert(progress.job_id.clone(), progress);
    }

    fn update(&self, job_id: &str, f: impl FnOnce(&mut ReindexProgress)) {
        if let Some(progress) = self.jobs.write().get_mut(job_id) {
            f(progress);
        }
    }

    /// Gets the progress of a job.
    pub fn get(&self, job_id: &str) -> Option<ReindexProgress> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Lists all jobs, oldest first.
    pub fn list(&self) -> Vec<ReindexProgress> {
        let mut jobs: Vec<_> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        jobs
    }

    /// Removes finished jobs completed more than `max_age_seconds` ago.
    pub fn cleanup_old_jobs(&self, max_age_seconds: i64) {
        let cutoff = chrono::Utc::now() - chrono::Duration::seconds(max_age_seconds);
        self.jobs.write().retain(|_, progress| {
            let expired = progress.status.is_finished()
                && progress
                    .completed_at
                    .as_deref()
                    .and_then(|at| chrono::DateTime::parse_from_rfc3339(at).ok())
                    .is_some_and(|at| at.with_timezone(&chrono::Utc) < cutoff);
            !expired
        });
    }
}

/// Copies every index under `config.index_prefix` to `new_prefix`.
pub(crate) async fn run_reindex(
    store: Arc<dyn DocumentStore>,
    schema: Arc<Schema>,
    config: IndexConfig,
    new_prefix: String,
    job_id: String,
    jobs: ReindexJobs,
) {
    jobs.update(&job_id, |p| {
        p.status = ReindexStatus::InProgress;
        p.started_at = Some(chrono::Utc::now().to_rfc3339());
    });

    let old_prefix = config.index_prefix.to_lowercase();
    let new_prefix = new_prefix.to_lowercase();
    let sources: Vec<String> = match store.list_indices(&old_prefix).await {
        Ok(indices) => indices
            .into_iter()
            .filter(|index| new_prefix.is_empty() || !index.starts_with(&new_prefix))
            .collect(),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Reindex failed to list indices");
            jobs.update(&job_id, |p| {
                p.status = ReindexStatus::Failed;
                p.error_message = Some(e.to_string());
                p.completed_at = Some(chrono::Utc::now().to_rfc3339());
            });
            return;
        }
    };
    jobs.update(&job_id, |p| p.total_indices = sources.len() as u64);

    let mappings: HashMap<String, Value> = schema
        .descriptors()
        .iter()
        .map(|d| {
            (
                config.physical_index(d.index(), d.type_name()),
                d.create_mapping(),
            )
        })
        .collect();

    for source in sources {
        let dest = format!(
            "{}{}",
            new_prefix,
            source.strip_prefix(&old_prefix).unwrap_or(&source)
        );
        tracing::info!(job_id = %job_id, source = %source, dest = %dest, "Reindexing");

        let outcome = copy_one(store.as_ref(), &mappings, &source, &dest).await;
        jobs.update(&job_id, |p| {
            p.processed_indices += 1;
            match outcome {
                Ok(CopyOutcome::Completed { documents }) => p.documents_copied += documents,
                Ok(CopyOutcome::Submitted { task }) => p.tasks.push(task),
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Failed to reindex");
                    p.errors.push(ReindexProgressError {
                        index: source.clone(),
                        error: e.to_string(),
                    });
                }
            }
        });
    }

    jobs.update(&job_id, |p| {
        p.status = ReindexStatus::Completed;
        p.completed_at = Some(chrono::Utc::now().to_rfc3339());
        tracing::info!(
            job_id = %p.job_id,
            indices = p.processed_indices,
            documents = p.documents_copied,
            errors = p.errors.len(),
            "Reindex finished"
        );
    });
}

async fn copy_one(
    store: &dyn DocumentStore,
    mappings: &HashMap<String, Value>,
    source: &str,
    dest: &str,
) -> IndexResult<CopyOutcome> {
    let mapping = match mappings.get(source) {
        Some(mapping) => mapping.clone(),
        None => store.get_mapping(source).await?.unwrap_or_else(|| json!({})),
    };
    store.ensure_index(dest, &mapping).await?;
    store.copy_index(source, dest).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reindex_status() {
        assert!(ReindexStatus::InProgress.is_running());
        assert!(!ReindexStatus::Completed.is_running());
        assert!(ReindexStatus::Completed.is_finished());
        assert!(ReindexStatus::Failed.is_finished());
    }

    #[test]
    fn test_reindex_progress() {
        let mut progress = ReindexProgress::new("job-123", "v2-");
        progress.total_indices = 4;
        progress.processed_indices = 1;

        assert_eq!(progress.percentage(), 25.0);
        assert!(!progress.has_errors());

        progress.errors.push(ReindexProgressError {
            index: "crm-customer".to_string(),
            error: "mapping conflict".to_string(),
        });
        assert!(progress.has_errors());
    }

    #[test]
    fn test_cleanup_old_jobs() {
        let jobs = ReindexJobs::default();
        let mut done = ReindexProgress::new("old", "v2-");
        done.status = ReindexStatus::Completed;
        done.completed_at = Some((chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339());
        jobs.insert(done);
        jobs.insert(ReindexProgress::new("running", "v3-"));

        jobs.cleanup_old_jobs(3600);
        assert!(jobs.get("old").is_none());
        assert!(jobs.get("running").is_some());
    }
}
