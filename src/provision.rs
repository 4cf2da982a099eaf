//! Case and search provisioning, plus compensating cleanup.
//!
//! The flow is sequential: create the case (nothing to clean up if that
//! fails), then create the search bound by reference to every data
//! source. A search-creation failure deletes the just-created case
//! before the error is returned, so partial provisioning is cleaned
//! even when the caller never reaches the top-level failure handler.
//!
//! [`attach`] is the re-run-by-rediscovery entry point: it probes an
//! existing case and locates its search by display name so a caller can
//! resume polling without re-creating anything.

use crate::client::{classify, ApiOutcome, RemoteApi};
use crate::error::OrchestrationError;
use crate::models::{Case, DataSourceRef, Search};
use crate::progress::{RunEvent, RunProgressReporter};
use crate::query::Query;

const CASES_PATH: &str = "cases";

fn case_path(case_id: &str) -> String {
    format!("cases/{}", case_id)
}

fn searches_path(case_id: &str) -> String {
    format!("cases/{}/searches", case_id)
}

/// Create the case container. Fails fast; nothing to clean up yet.
pub async fn create_case(
    api: &dyn RemoteApi,
    display_name: &str,
) -> Result<Case, OrchestrationError> {
    let payload = serde_json::json!({ "displayName": display_name });
    let resp = api.post(CASES_PATH, payload).await?;
    if classify(resp.status) != ApiOutcome::Success {
        return Err(OrchestrationError::Rejected {
            resource: "case",
            status: resp.status,
            detail: resp.body_text(),
        });
    }
    let json = resp.json()?;
    let id = require_id(&json, "case")?;
    Ok(Case {
        id,
        display_name: display_name.to_string(),
    })
}

/// Create the search bound to every data source and carrying the query.
///
/// On failure, the just-created case is deleted (compensating action
/// scoped to this component) before the error propagates.
pub async fn create_search(
    api: &dyn RemoteApi,
    case: &Case,
    display_name: &str,
    query: &Query,
    sources: &[DataSourceRef],
    progress: &dyn RunProgressReporter,
) -> Result<Search, OrchestrationError> {
    let refs: Vec<&str> = sources.iter().map(|s| s.bind_ref.as_str()).collect();
    let payload = serde_json::json!({
        "displayName": display_name,
        "contentQuery": query.as_str(),
        "dataSourceRefs": refs,
    });

    let resp = api.post(&searches_path(&case.id), payload).await;
    let error = match resp {
        Ok(r) if classify(r.status) == ApiOutcome::Success => {
            let json = r.json()?;
            let id = require_id(&json, "search")?;
            return Ok(Search {
                id,
                display_name: display_name.to_string(),
                case_id: case.id.clone(),
            });
        }
        Ok(r) => OrchestrationError::Rejected {
            resource: "search",
            status: r.status,
            detail: r.body_text(),
        },
        Err(e) => e.into(),
    };

    cleanup_case(api, &case.id, progress).await;
    Err(error)
}

/// Probe an existing case and locate its search by display name.
///
/// The remote service is authoritative: both objects are re-read, never
/// assumed. Used by `dsc attach` to resume polling after a crash or a
/// progress timeout.
pub async fn attach(
    api: &dyn RemoteApi,
    case_id: &str,
    search_name: &str,
) -> Result<(Case, Search), OrchestrationError> {
    let resp = api.get(&case_path(case_id)).await?;
    if classify(resp.status) != ApiOutcome::Success {
        return Err(OrchestrationError::Rejected {
            resource: "case lookup",
            status: resp.status,
            detail: resp.body_text(),
        });
    }
    let json = resp.json()?;
    let case = Case {
        id: require_id(&json, "case")?,
        display_name: json
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
    };

    let resp = api.get(&searches_path(case_id)).await?;
    if classify(resp.status) != ApiOutcome::Success {
        return Err(OrchestrationError::Rejected {
            resource: "search lookup",
            status: resp.status,
            detail: resp.body_text(),
        });
    }
    let json = resp.json()?;
    let empty = Vec::new();
    let searches = json
        .get("value")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let found = searches.iter().find(|s| {
        s.get("displayName").and_then(|v| v.as_str()) == Some(search_name)
    });
    let found = match found {
        Some(s) => s,
        // A case holding exactly one search is unambiguous regardless
        // of its name.
        None if searches.len() == 1 => &searches[0],
        None => {
            return Err(OrchestrationError::SearchNotFound {
                case_id: case_id.to_string(),
                search_name: search_name.to_string(),
            })
        }
    };

    let search = Search {
        id: require_id(found, "search")?,
        display_name: found
            .get("displayName")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        case_id: case_id.to_string(),
    };

    Ok((case, search))
}

/// Delete the case, cascading deletion of bound resources.
///
/// Idempotent: an already-deleted case counts as success. Any other
/// failure is reported on the progress channel and swallowed — a
/// secondary failure during teardown must never mask the original
/// orchestration error. Returns whether the tenant is known clean.
pub async fn cleanup_case(
    api: &dyn RemoteApi,
    case_id: &str,
    progress: &dyn RunProgressReporter,
) -> bool {
    match api.delete(&case_path(case_id)).await {
        Ok(resp) => match classify(resp.status) {
            ApiOutcome::Success | ApiOutcome::NotFound => {
                progress.report(RunEvent::CleanupDone {
                    case_id: case_id.to_string(),
                });
                true
            }
            _ => {
                progress.report(RunEvent::CleanupFailed {
                    case_id: case_id.to_string(),
                    detail: format!("status {}: {}", resp.status, resp.body_text()),
                });
                false
            }
        },
        Err(e) => {
            progress.report(RunEvent::CleanupFailed {
                case_id: case_id.to_string(),
                detail: e.to_string(),
            });
            false
        }
    }
}

fn require_id(json: &serde_json::Value, resource: &'static str) -> Result<String, OrchestrationError> {
    json.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or(OrchestrationError::Rejected {
            resource,
            status: 200,
            detail: "response missing id".to_string(),
        })
}
