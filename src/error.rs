//! Error taxonomy for the orchestration flow.
//!
//! The distinctions here are ones a caller must be able to act on:
//! a progress timeout is not a remote-reported job failure (the job may
//! legitimately still be computing, and the caller can re-enter the wait
//! against the same search), and a cancelled wait is neither.

use thiserror::Error;

/// Plumbing failures from the remote transport layer.
///
/// HTTP responses — including 404s and 5xxs — are *not* transport
/// errors; they come back as [`crate::client::ApiResponse`] values and
/// are classified by the caller.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {path} failed after {attempts} attempts: {detail}")]
    RetriesExhausted {
        path: String,
        attempts: u32,
        detail: String,
    },

    #[error("credential unavailable: {0}")]
    Token(String),

    #[error("client construction failed: {0}")]
    Build(String),
}

/// Query construction failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Zero clauses were produced; there is nothing to search for.
    #[error("query has no clauses; nothing to search for")]
    Empty,
}

/// Failures of the polling state machine.
#[derive(Debug, Error)]
pub enum PollError {
    /// The job object never appeared within the initialization budget.
    #[error("job never appeared within {waited_secs}s of triggering")]
    InitTimeout { waited_secs: u64 },

    /// No terminal status within the progress budget. Distinct from
    /// [`PollError::JobFailed`]: the job may still be running remotely,
    /// and the wait can be re-entered against the same search.
    #[error("job reached no terminal status within {waited_secs}s; it may still be running remotely")]
    ProgressTimeout { waited_secs: u64 },

    /// The service reported the job as failed. `detail` is the remote
    /// error text, verbatim.
    #[error("job failed remotely: {detail}")]
    JobFailed { detail: String },

    /// The wait was cancelled by the run's cancellation signal.
    #[error("wait cancelled")]
    Cancelled,

    /// The status endpoint answered with something that is neither a
    /// job status nor a retriable "not yet" signal.
    #[error("unexpected response from status endpoint: {status} {detail}")]
    UnexpectedStatus { status: u16, detail: String },
}

/// Umbrella error for the orchestration run.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Query(#[from] QueryError),

    /// None of the configured location names resolved in the directory.
    #[error("none of the {requested} configured locations could be resolved")]
    NoLocationsResolved { requested: usize },

    /// Locations resolved, but every data-source creation failed. A
    /// search with zero data sources is an invalid state and is never
    /// attempted.
    #[error("no data sources could be bound for any of the {requested} configured locations")]
    NoSourcesBound { requested: usize },

    /// The service rejected a case, search, source, or job request.
    #[error("{resource} request was rejected: status {status} {detail}")]
    Rejected {
        resource: &'static str,
        status: u16,
        detail: String,
    },

    /// No search with the expected name exists on the case (attach path).
    #[error("case {case_id} has no search named {search_name:?}")]
    SearchNotFound {
        case_id: String,
        search_name: String,
    },

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("report could not be written: {0}")]
    Io(#[from] std::io::Error),

    #[error("report could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestrationError {
    /// Whether the failed run left remote state worth re-attaching to
    /// instead of deleting: a progress timeout or a cancelled wait may
    /// resolve on its own, so the case is kept for `attach`.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Poll(PollError::ProgressTimeout { .. })
                | OrchestrationError::Poll(PollError::Cancelled)
        )
    }
}
