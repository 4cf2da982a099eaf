//! Job polling state machine.
//!
//! The statistics job has no webhook and no single "done" flag; the
//! only way to learn its fate is to poll. Worse, the service sometimes
//! answers with a transient server error for a job that simply has not
//! been instantiated yet. The state machine here makes that waiting
//! correct, resumable, and boundedly patient:
//!
//! ```text
//!              trigger
//!  NotCreated ────────▶ Initializing ────▶ Running ──▶ Succeeded
//!      │                     │                │    └──▶ Failed
//!      └────▶ TimedOut ◀─────┴────────────────┘
//! ```
//!
//! Two phases with independent clocks:
//!
//! - **Phase A** ([`wait_for_job_to_appear`]) — the job object may not
//!   exist yet after triggering (an eventual-creation gap). "Not found"
//!   and "transient server error" are equivalent "not yet" signals
//!   here; see [`is_not_yet_created`].
//! - **Phase B** ([`wait_for_terminal`]) — the job exists; wait for a
//!   terminal status. A timeout is reported distinctly from a remote
//!   failure so the caller can re-enter the wait against the same
//!   search instead of re-provisioning.
//!
//! Both phases poll at a flat, caller-supplied interval (matches the
//! service's observed rate-limit tolerance), sleep via the runtime
//! between polls, and re-check cancellation before and after each
//! sleep. Cancellation also aborts an in-flight status request.

use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::{classify, ApiOutcome, ApiResponse, RemoteApi};
use crate::error::{OrchestrationError, PollError, TransportError};
use crate::models::{JobOperation, JobStatus};
use crate::progress::{PollPhase, RunEvent, RunProgressReporter};

fn trigger_path(case_id: &str, search_id: &str) -> String {
    format!("cases/{}/searches/{}/computeStatistics", case_id, search_id)
}

fn status_path(case_id: &str, search_id: &str) -> String {
    format!("cases/{}/searches/{}/statisticsOperation", case_id, search_id)
}

/// Issue the start request for the statistics job.
///
/// A success answer does not mean the job object is queryable yet;
/// callers must go through Phase A before reading status.
pub async fn trigger_job(
    api: &dyn RemoteApi,
    case_id: &str,
    search_id: &str,
) -> Result<(), OrchestrationError> {
    let resp = api
        .post(&trigger_path(case_id, search_id), serde_json::json!({}))
        .await?;
    if classify(resp.status) != ApiOutcome::Success {
        return Err(OrchestrationError::Rejected {
            resource: "statistics job",
            status: resp.status,
            detail: resp.body_text(),
        });
    }
    Ok(())
}

/// Whether an HTTP outcome means "the job object is not instantiated
/// yet": a plain 404, or a 5xx whose body carries the service's
/// resource-not-found marker. The service is observed to return either
/// for the same underlying condition, so the two are deliberately not
/// distinguished during the initialization wait.
///
/// TODO: revalidate against the service's current documented behavior —
/// treating a genuine server fault as "keep waiting" can mask a real
/// outage for up to the initialization budget.
pub fn is_not_yet_created(status: u16, body: &[u8]) -> bool {
    if status == 404 {
        return true;
    }
    if (500..=599).contains(&status) {
        let text = String::from_utf8_lossy(body).to_lowercase();
        return text.contains("resourcenotfound") || text.contains("does not exist");
    }
    false
}

/// Phase A: wait for the job object to appear.
///
/// Polls every `poll_interval`. Returns `Ok(true)` once the job is
/// observed in any status; `Ok(false)` — not an error — when `max_wait`
/// elapses with the job never appearing, leaving the verdict to the
/// caller. Fatal client errors propagate immediately.
pub async fn wait_for_job_to_appear(
    api: &dyn RemoteApi,
    case_id: &str,
    search_id: &str,
    max_wait: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
    progress: &dyn RunProgressReporter,
) -> Result<bool, PollError> {
    let path = status_path(case_id, search_id);
    let started = Instant::now();

    loop {
        let observed = match poll_once(api, &path, cancel).await? {
            Ok(resp) if is_not_yet_created(resp.status, &resp.body) => None,
            Ok(resp) => match classify(resp.status) {
                ApiOutcome::Success => Some(parse_operation(&resp).status),
                // Rate limits and bare server errors may clear on their
                // own; keep waiting within the budget.
                ApiOutcome::NotFound | ApiOutcome::Transient => None,
                ApiOutcome::Fatal => {
                    return Err(PollError::UnexpectedStatus {
                        status: resp.status,
                        detail: resp.body_text(),
                    })
                }
            },
            // Network trouble is retried silently within the budget.
            Err(_) => None,
        };

        progress.report(RunEvent::Polling {
            phase: PollPhase::Initializing,
            elapsed_secs: started.elapsed().as_secs(),
            observed: observed
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|| "absent".to_string()),
        });

        if observed.is_some() {
            return Ok(true);
        }
        if started.elapsed() >= max_wait {
            return Ok(false);
        }
        sleep_or_cancel(poll_interval, cancel).await?;
    }
}

/// Phase B: wait for a terminal status, on its own clock.
///
/// `Succeeded` returns the populated operation; `Failed` returns
/// [`PollError::JobFailed`] carrying the remote detail verbatim. Any
/// other status — including unrecognized ones — keeps polling, as do
/// transient outcomes. Exceeding `max_wait` yields
/// [`PollError::ProgressTimeout`], distinct from a remote failure: the
/// job may still be running, and this wait can be re-entered.
pub async fn wait_for_terminal(
    api: &dyn RemoteApi,
    case_id: &str,
    search_id: &str,
    max_wait: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
    progress: &dyn RunProgressReporter,
) -> Result<JobOperation, PollError> {
    let path = status_path(case_id, search_id);
    let started = Instant::now();

    loop {
        let observed = match poll_once(api, &path, cancel).await? {
            Ok(resp) => match classify(resp.status) {
                ApiOutcome::Success => Some(parse_operation(&resp)),
                ApiOutcome::NotFound | ApiOutcome::Transient => None,
                ApiOutcome::Fatal => {
                    return Err(PollError::UnexpectedStatus {
                        status: resp.status,
                        detail: resp.body_text(),
                    })
                }
            },
            Err(_) => None,
        };

        progress.report(RunEvent::Polling {
            phase: PollPhase::Progress,
            elapsed_secs: started.elapsed().as_secs(),
            observed: observed
                .as_ref()
                .map(|op| op.status.as_str().to_string())
                .unwrap_or_else(|| "unavailable".to_string()),
        });

        if let Some(op) = observed {
            match op.status {
                JobStatus::Succeeded => return Ok(op),
                JobStatus::Failed => {
                    return Err(PollError::JobFailed {
                        detail: op.error_detail.unwrap_or_else(|| "no detail".to_string()),
                    })
                }
                _ => {}
            }
        }

        if started.elapsed() >= max_wait {
            return Err(PollError::ProgressTimeout {
                waited_secs: started.elapsed().as_secs(),
            });
        }
        sleep_or_cancel(poll_interval, cancel).await?;
    }
}

/// One status request, aborted cleanly if the run is cancelled while it
/// is in flight. The outer error is always [`PollError::Cancelled`].
async fn poll_once(
    api: &dyn RemoteApi,
    path: &str,
    cancel: &CancellationToken,
) -> Result<Result<ApiResponse, TransportError>, PollError> {
    if cancel.is_cancelled() {
        return Err(PollError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        resp = api.get(path) => Ok(resp),
    }
}

async fn sleep_or_cancel(interval: Duration, cancel: &CancellationToken) -> Result<(), PollError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PollError::Cancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    indexed_item_count: Option<u64>,
    #[serde(default, rename = "indexedItemsSize")]
    indexed_items_size: Option<u64>,
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
}

/// Map the status payload into a [`JobOperation`]. The result summary
/// is only trusted on `succeeded`, the error detail only on `failed`.
fn parse_operation(resp: &ApiResponse) -> JobOperation {
    let payload: OperationPayload = match serde_json::from_slice(&resp.body) {
        Ok(p) => p,
        Err(_) => {
            // A 2xx with an unreadable body: the job exists but told us
            // nothing usable. Treated as an intermediate observation.
            return JobOperation {
                status: JobStatus::Unknown,
                items_found: None,
                size_bytes: None,
                error_detail: None,
            };
        }
    };

    let status = payload
        .status
        .as_deref()
        .map(JobStatus::from_remote)
        .unwrap_or(JobStatus::Unknown);

    JobOperation {
        items_found: (status == JobStatus::Succeeded)
            .then_some(payload.indexed_item_count)
            .flatten(),
        size_bytes: (status == JobStatus::Succeeded)
            .then_some(payload.indexed_items_size)
            .flatten(),
        error_detail: (status == JobStatus::Failed)
            .then_some(payload.error.and_then(|e| e.message))
            .flatten(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(status: u16, body: &str) -> ApiResponse {
        ApiResponse {
            status,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn not_yet_created_on_404() {
        assert!(is_not_yet_created(404, b""));
        assert!(is_not_yet_created(404, b"anything"));
    }

    #[test]
    fn not_yet_created_on_5xx_with_marker() {
        assert!(is_not_yet_created(500, b"{\"error\":\"resourceNotFound\"}"));
        assert!(is_not_yet_created(503, b"operation does not exist"));
    }

    #[test]
    fn bare_5xx_is_not_the_creation_gap() {
        assert!(!is_not_yet_created(500, b"internal error"));
        assert!(!is_not_yet_created(502, b""));
    }

    #[test]
    fn other_statuses_are_never_the_creation_gap() {
        assert!(!is_not_yet_created(200, b""));
        assert!(!is_not_yet_created(403, b"resourceNotFound"));
    }

    #[test]
    fn parse_succeeded_carries_summary() {
        let op = parse_operation(&resp(
            200,
            r#"{"status":"succeeded","indexedItemCount":42,"indexedItemsSize":100000}"#,
        ));
        assert_eq!(op.status, JobStatus::Succeeded);
        assert_eq!(op.items_found, Some(42));
        assert_eq!(op.size_bytes, Some(100000));
        assert_eq!(op.error_detail, None);
    }

    #[test]
    fn parse_failed_carries_detail() {
        let op = parse_operation(&resp(
            200,
            r#"{"status":"failed","error":{"message":"index corrupt"}}"#,
        ));
        assert_eq!(op.status, JobStatus::Failed);
        assert_eq!(op.error_detail.as_deref(), Some("index corrupt"));
        assert_eq!(op.items_found, None);
    }

    #[test]
    fn parse_running_has_no_summary() {
        let op = parse_operation(&resp(
            200,
            r#"{"status":"running","indexedItemCount":7}"#,
        ));
        assert_eq!(op.status, JobStatus::Running);
        // Intermediate counts are not a result summary.
        assert_eq!(op.items_found, None);
    }

    #[test]
    fn parse_garbage_is_unknown() {
        let op = parse_operation(&resp(200, "not json"));
        assert_eq!(op.status, JobStatus::Unknown);
    }

    #[test]
    fn parse_unrecognized_status_is_unknown() {
        let op = parse_operation(&resp(200, r#"{"status":"paused"}"#));
        assert_eq!(op.status, JobStatus::Unknown);
        assert!(!op.status.is_terminal());
    }
}
