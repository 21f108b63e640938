//! Submission-client interface.
//!
//! The compiler never submits anything itself. An orchestrating caller
//! hands the finished [`Document`] to a client and polls the run it
//! starts. [`RecordingClient`] keeps everything in memory for tests.

use crate::document::Document;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Answer to a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Whether the server took the document
    pub accepted: bool,
    /// Run identifier, when accepted
    pub id: Option<String>,
    /// Server-side validation messages
    pub errors: Vec<String>,
}

/// Remote run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Accepted, not started
    Pending,
    /// In progress
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Failure,
    /// Stopped by an operator
    Aborted,
}

impl RunState {
    /// Whether the run can no longer change state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }
}

/// Answer to a poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Current state
    pub state: RunState,
    /// Free-form detail from the server
    pub detail: String,
}

/// Client-side failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failed
    #[error("transport error: {0}")]
    Transport(String),
    /// No run with this identifier
    #[error("unknown run: {0}")]
    UnknownRun(String),
}

/// Something that accepts documents and reports on runs
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Submit a document
    ///
    /// # Errors
    ///
    /// Returns error if the document could not be delivered
    async fn submit(&self, document: &Document) -> Result<SubmitReceipt, ClientError>;

    /// Poll a run
    ///
    /// # Errors
    ///
    /// Returns error if the run is unknown or the transport fails
    async fn poll(&self, id: &str) -> Result<RunStatus, ClientError>;
}

#[derive(Debug, Default)]
struct Recorded {
    documents: Vec<Document>,
    runs: IndexMap<String, RunStatus>,
}

/// In-memory client that records submissions
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    inner: Arc<RwLock<Recorded>>,
    rejections: Vec<String>,
}

impl RecordingClient {
    /// Create a client that accepts everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every submission with these messages
    #[must_use]
    pub fn rejecting(mut self, errors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rejections = errors.into_iter().map(Into::into).collect();
        self
    }

    /// Documents received so far
    pub async fn submitted(&self) -> Vec<Document> {
        self.inner.read().await.documents.clone()
    }

    /// Move a run to a new state
    ///
    /// # Errors
    ///
    /// Returns `UnknownRun` if no submission produced this identifier
    pub async fn advance(&self, id: &str, state: RunState, detail: impl Into<String>) -> Result<(), ClientError> {
        let mut inner = self.inner.write().await;
        let run = inner
            .runs
            .get_mut(id)
            .ok_or_else(|| ClientError::UnknownRun(id.to_string()))?;
        run.state = state;
        run.detail = detail.into();
        Ok(())
    }
}

#[async_trait]
impl SubmissionClient for RecordingClient {
    async fn submit(&self, document: &Document) -> Result<SubmitReceipt, ClientError> {
        let mut inner = self.inner.write().await;
        inner.documents.push(document.clone());

        if !self.rejections.is_empty() {
            tracing::warn!(document = %document.metadata.name, "Submission rejected");
            return Ok(SubmitReceipt {
                accepted: false,
                id: None,
                errors: self.rejections.clone(),
            });
        }

        let digest = document
            .digest()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let id = format!("run-{}-{}", inner.runs.len() + 1, &digest.to_hex()[..12]);
        inner.runs.insert(
            id.clone(),
            RunStatus {
                state: RunState::Pending,
                detail: String::new(),
            },
        );
        tracing::debug!(document = %document.metadata.name, run = %id, "Submission recorded");
        Ok(SubmitReceipt {
            accepted: true,
            id: Some(id),
            errors: Vec::new(),
        })
    }

    async fn poll(&self, id: &str) -> Result<RunStatus, ClientError> {
        self.inner
            .read()
            .await
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownRun(id.to_string()))
    }
}
