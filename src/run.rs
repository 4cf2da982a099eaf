//! Top-level orchestration.
//!
//! One logical flow per run: build the query, create the case, resolve
//! and bind data sources, create the search, trigger the job, then
//! drive the two polling phases and emit the report. Any fatal failure
//! after case creation invokes compensating cleanup — except resumable
//! outcomes (progress timeout, cancellation), where the case is kept so
//! the operator can `dsc attach` and re-enter the wait.

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::RemoteApi;
use crate::config::Config;
use crate::error::{OrchestrationError, PollError};
use crate::models::{Case, DataSourceRef, JobOperation, Search, UnresolvedLocation};
use crate::poller;
use crate::progress::{RunEvent, RunProgressReporter};
use crate::provision;
use crate::query::{build_query, Query};
use crate::report::{self, ReportPaths, RunRecord};
use crate::sources;

/// Caller-facing result of a completed run.
#[derive(Debug)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub paths: ReportPaths,
}

/// Tunables the CLI exposes on top of the config file.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Delete the case on unrecoverable failure. Disabled by operators
    /// who want the partial state for post-mortem inspection.
    pub cleanup_on_failure: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cleanup_on_failure: true,
        }
    }
}

/// Full orchestration: provision, poll, report.
pub async fn run_discovery(
    config: &Config,
    api: Arc<dyn RemoteApi>,
    options: RunOptions,
    cancel: &CancellationToken,
    progress: &dyn RunProgressReporter,
) -> Result<RunOutcome, OrchestrationError> {
    let started_at = Utc::now();

    // Fail fast before touching the tenant.
    let query = build_query(&config.detection_rules(), &config.query.supplemental_ids)?;

    let case = provision::create_case(api.as_ref(), &config.case.name).await?;
    progress.report(RunEvent::CaseCreated {
        id: case.id.clone(),
    });

    // Cancellation aborts whatever is in flight, not just the polling
    // sleeps; the polling loops additionally select over the token so a
    // cancel lands within one tick.
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OrchestrationError::Poll(PollError::Cancelled)),
        r = execute(config, &api, cancel, progress, &case, &query, started_at) => r,
    };

    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if err.is_resumable() {
                eprintln!("case {} kept; resume with: dsc attach {}", case.id, case.id);
            } else if options.cleanup_on_failure {
                provision::cleanup_case(api.as_ref(), &case.id, progress).await;
            }
            Err(err)
        }
    }
}

async fn execute(
    config: &Config,
    api: &Arc<dyn RemoteApi>,
    cancel: &CancellationToken,
    progress: &dyn RunProgressReporter,
    case: &Case,
    query: &Query,
    started_at: chrono::DateTime<Utc>,
) -> Result<RunOutcome, OrchestrationError> {
    let (bound, unresolved) = sources::resolve_and_bind(
        api,
        &case.id,
        &config.locations.names,
        config.resolver.concurrency,
        progress,
    )
    .await?;

    let search = provision::create_search(
        api.as_ref(),
        case,
        &config.case.search_name(),
        query,
        &bound,
        progress,
    )
    .await?;
    progress.report(RunEvent::SearchCreated {
        id: search.id.clone(),
    });

    poller::trigger_job(api.as_ref(), &case.id, &search.id).await?;
    progress.report(RunEvent::JobTriggered);

    let polling = &config.polling;
    let init_started = std::time::Instant::now();
    let appeared = poller::wait_for_job_to_appear(
        api.as_ref(),
        &case.id,
        &search.id,
        polling.init_max_wait(),
        polling.init_poll_interval(),
        cancel,
        progress,
    )
    .await?;
    if !appeared {
        // No job object after the initialization budget is a hard
        // failure; the trigger evidently never took.
        return Err(PollError::InitTimeout {
            waited_secs: polling.init_max_wait_secs,
        }
        .into());
    }
    let init_wait_secs = init_started.elapsed().as_secs();

    let progress_started = std::time::Instant::now();
    let op = poller::wait_for_terminal(
        api.as_ref(),
        &case.id,
        &search.id,
        polling.progress_max_wait(),
        polling.progress_poll_interval(),
        cancel,
        progress,
    )
    .await?;
    let progress_wait_secs = progress_started.elapsed().as_secs();

    finish(
        config,
        case,
        &search,
        query,
        &bound,
        &unresolved,
        &op,
        started_at,
        init_wait_secs,
        progress_wait_secs,
    )
}

/// Resume against an existing case: locate the search, probe for the
/// job, trigger it only if it was never started, then wait as usual.
///
/// Attach never deletes the case — it may belong to an earlier run the
/// operator wants to keep, and a resumed wait that fails again can be
/// resumed again.
pub async fn attach_discovery(
    config: &Config,
    api: Arc<dyn RemoteApi>,
    case_id: &str,
    cancel: &CancellationToken,
    progress: &dyn RunProgressReporter,
) -> Result<RunOutcome, OrchestrationError> {
    let started_at = Utc::now();
    let query = build_query(&config.detection_rules(), &config.query.supplemental_ids)?;

    let (case, search) =
        provision::attach(api.as_ref(), case_id, &config.case.search_name()).await?;
    let bound = sources::list_bound(api.as_ref(), case_id).await?;

    let polling = &config.polling;
    let init_started = std::time::Instant::now();

    // Zero-budget probe: one status read, no waiting.
    let mut appeared = poller::wait_for_job_to_appear(
        api.as_ref(),
        &case.id,
        &search.id,
        std::time::Duration::ZERO,
        polling.init_poll_interval(),
        cancel,
        progress,
    )
    .await?;

    if !appeared {
        poller::trigger_job(api.as_ref(), &case.id, &search.id).await?;
        progress.report(RunEvent::JobTriggered);
        appeared = poller::wait_for_job_to_appear(
            api.as_ref(),
            &case.id,
            &search.id,
            polling.init_max_wait(),
            polling.init_poll_interval(),
            cancel,
            progress,
        )
        .await?;
    }
    if !appeared {
        return Err(PollError::InitTimeout {
            waited_secs: polling.init_max_wait_secs,
        }
        .into());
    }
    let init_wait_secs = init_started.elapsed().as_secs();

    let progress_started = std::time::Instant::now();
    let op = poller::wait_for_terminal(
        api.as_ref(),
        &case.id,
        &search.id,
        polling.progress_max_wait(),
        polling.progress_poll_interval(),
        cancel,
        progress,
    )
    .await;
    let op = match op {
        Ok(op) => op,
        Err(err) => {
            let err: OrchestrationError = err.into();
            if err.is_resumable() {
                eprintln!("case {} kept; resume with: dsc attach {}", case.id, case.id);
            }
            return Err(err);
        }
    };
    let progress_wait_secs = progress_started.elapsed().as_secs();

    finish(
        config,
        &case,
        &search,
        &query,
        &bound,
        &[],
        &op,
        started_at,
        init_wait_secs,
        progress_wait_secs,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish(
    config: &Config,
    case: &Case,
    search: &Search,
    query: &Query,
    bound: &[DataSourceRef],
    unresolved: &[UnresolvedLocation],
    op: &JobOperation,
    started_at: chrono::DateTime<Utc>,
    init_wait_secs: u64,
    progress_wait_secs: u64,
) -> Result<RunOutcome, OrchestrationError> {
    let record = RunRecord {
        run_id: Uuid::new_v4().to_string(),
        started_at,
        finished_at: Utc::now(),
        case_id: case.id.clone(),
        case_name: case.display_name.clone(),
        search_id: search.id.clone(),
        search_name: search.display_name.clone(),
        query: query.as_str().to_string(),
        clause_count: query.clause_count(),
        sources: bound.iter().map(Into::into).collect(),
        unresolved: unresolved.iter().map(Into::into).collect(),
        status: op.status.as_str().to_string(),
        items_found: op.items_found,
        size_bytes: op.size_bytes,
        init_wait_secs,
        progress_wait_secs,
    };

    let paths = report::emit(&record, &config.output.dir)?;

    println!("discovery run");
    println!("  case: {} ({})", record.case_name, record.case_id);
    println!("  search: {}", record.search_id);
    println!("  sources bound: {}", record.sources.len());
    if !record.unresolved.is_empty() {
        println!("  locations dropped: {}", record.unresolved.len());
    }
    println!("  items found: {}", record.items_found.unwrap_or(0));
    println!("  size bytes: {}", record.size_bytes.unwrap_or(0));
    println!("  report: {}", paths.json.display());
    println!("ok");

    Ok(RunOutcome { record, paths })
}
