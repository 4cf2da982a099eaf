//! Data-source resolution and binding.
//!
//! Looks up each configured location name against the remote directory
//! and, for every one found, creates a noncustodial data source scoped
//! to the case. Partial resolution is tolerated — a location that fails
//! to resolve or bind is dropped with a warning — but a run with zero
//! bound sources is invalid and aborts.
//!
//! Lookups fan out with bounded concurrency (a semaphore, not unbounded
//! tasks) so the remote directory is never hammered; results are
//! reassembled in input order to keep the function deterministic.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::client::{classify, ApiOutcome, RemoteApi};
use crate::error::OrchestrationError;
use crate::models::{DataSourceRef, UnresolvedLocation};
use crate::progress::{RunEvent, RunProgressReporter};

const DIRECTORY_PATH: &str = "directory/sites";

fn sources_path(case_id: &str) -> String {
    format!("cases/{}/noncustodialDataSources", case_id)
}

/// A directory hit, reduced to its canonical URL.
#[derive(Debug, Clone)]
struct Candidate {
    web_url: String,
}

enum LocationOutcome {
    Bound(DataSourceRef),
    /// Directory resolution succeeded but data-source creation failed.
    ResolvedUnbound(UnresolvedLocation),
    /// The name never resolved in the directory.
    NotResolved(UnresolvedLocation),
}

/// Resolve every location name and bind the hits to `case_id`.
///
/// Returns the successful bindings plus the locations that were
/// dropped, so the caller can judge whether the yield is sufficient.
/// Zero bindings is an error: [`OrchestrationError::NoLocationsResolved`]
/// when nothing resolved at all, [`OrchestrationError::NoSourcesBound`]
/// when resolution succeeded but every creation failed.
pub async fn resolve_and_bind(
    api: &Arc<dyn RemoteApi>,
    case_id: &str,
    names: &[String],
    concurrency: usize,
    progress: &dyn RunProgressReporter,
) -> Result<(Vec<DataSourceRef>, Vec<UnresolvedLocation>), OrchestrationError> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set: JoinSet<(usize, LocationOutcome)> = JoinSet::new();

    for (index, name) in names.iter().enumerate() {
        let api = Arc::clone(api);
        let semaphore = Arc::clone(&semaphore);
        let case_id = case_id.to_string();
        let name = name.clone();
        set.spawn(async move {
            // Closed only when the set is dropped, which cannot happen
            // while this task runs.
            let _permit = semaphore.acquire().await;
            let outcome = resolve_and_bind_one(api.as_ref(), &case_id, &name).await;
            (index, outcome)
        });
    }

    let total = names.len() as u64;
    let mut settled = 0u64;
    let mut slots: Vec<Option<LocationOutcome>> = Vec::new();
    slots.resize_with(names.len(), || None);

    while let Some(joined) = set.join_next().await {
        settled += 1;
        progress.report(RunEvent::Resolving {
            n: settled,
            total,
        });
        if let Ok((index, outcome)) = joined {
            slots[index] = Some(outcome);
        }
    }

    let mut refs = Vec::new();
    let mut unresolved = Vec::new();
    let mut any_resolved = false;

    for (index, slot) in slots.into_iter().enumerate() {
        let outcome = slot.unwrap_or_else(|| {
            LocationOutcome::NotResolved(UnresolvedLocation {
                name: names[index].clone(),
                reason: "lookup task failed".to_string(),
            })
        });
        match outcome {
            LocationOutcome::Bound(r) => {
                any_resolved = true;
                refs.push(r);
            }
            LocationOutcome::ResolvedUnbound(u) => {
                any_resolved = true;
                progress.report(RunEvent::LocationUnresolved {
                    name: u.name.clone(),
                    reason: u.reason.clone(),
                });
                unresolved.push(u);
            }
            LocationOutcome::NotResolved(u) => {
                progress.report(RunEvent::LocationUnresolved {
                    name: u.name.clone(),
                    reason: u.reason.clone(),
                });
                unresolved.push(u);
            }
        }
    }

    if refs.is_empty() {
        return Err(if any_resolved {
            OrchestrationError::NoSourcesBound {
                requested: names.len(),
            }
        } else {
            OrchestrationError::NoLocationsResolved {
                requested: names.len(),
            }
        });
    }

    Ok((refs, unresolved))
}

/// Read back the data sources already bound to a case.
///
/// Used by the attach path so the report reflects remote truth instead
/// of assuming anything about the earlier run. Listing is best-effort:
/// a non-success answer yields an empty list rather than failing a
/// resumed run over report detail.
pub async fn list_bound(
    api: &dyn RemoteApi,
    case_id: &str,
) -> Result<Vec<DataSourceRef>, OrchestrationError> {
    let path = sources_path(case_id);
    let resp = api.get(&path).await?;
    if classify(resp.status) != ApiOutcome::Success {
        return Ok(Vec::new());
    }
    let json = match resp.json() {
        Ok(j) => j,
        Err(_) => return Ok(Vec::new()),
    };
    let refs = json
        .get("value")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = item.get("id")?.as_str()?;
                    let name = item
                        .get("displayName")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let url = item
                        .get("site")
                        .and_then(|s| s.get("webUrl"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    Some(DataSourceRef {
                        location_name: name.to_string(),
                        location_url: url.to_string(),
                        source_id: id.to_string(),
                        bind_ref: format!("{}/{}", path, id),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(refs)
}

async fn resolve_and_bind_one(api: &dyn RemoteApi, case_id: &str, name: &str) -> LocationOutcome {
    let url = match resolve_location(api, name).await {
        Ok(Some(url)) => url,
        Ok(None) => {
            return LocationOutcome::NotResolved(UnresolvedLocation {
                name: name.to_string(),
                reason: "not found in directory".to_string(),
            })
        }
        Err(reason) => {
            return LocationOutcome::NotResolved(UnresolvedLocation {
                name: name.to_string(),
                reason,
            })
        }
    };

    match bind_location(api, case_id, name, &url).await {
        Ok(r) => LocationOutcome::Bound(r),
        Err(reason) => LocationOutcome::ResolvedUnbound(UnresolvedLocation {
            name: name.to_string(),
            reason,
        }),
    }
}

/// Directory lookup: exact name first, then the prefix before the first
/// space. Directory search is observed to sometimes index only
/// prefixes, so the truncated retry recovers those entries.
async fn resolve_location(api: &dyn RemoteApi, name: &str) -> Result<Option<String>, String> {
    let mut candidates = lookup(api, name).await?;
    if candidates.is_empty() {
        if let Some(prefix) = prefix_before_space(name) {
            candidates = lookup(api, prefix).await?;
        }
    }
    Ok(pick_candidate(&candidates, name))
}

async fn lookup(api: &dyn RemoteApi, term: &str) -> Result<Vec<Candidate>, String> {
    let path = format!("{}?name={}", DIRECTORY_PATH, encode_query_component(term));
    let resp = api.get(&path).await.map_err(|e| e.to_string())?;
    match classify(resp.status) {
        ApiOutcome::Success => {
            let json = resp
                .json()
                .map_err(|_| "directory response malformed".to_string())?;
            Ok(parse_candidates(&json))
        }
        ApiOutcome::NotFound => Ok(Vec::new()),
        ApiOutcome::Transient => Err(format!("directory error (status {})", resp.status)),
        ApiOutcome::Fatal => Err(format!("directory rejected lookup (status {})", resp.status)),
    }
}

fn parse_candidates(json: &serde_json::Value) -> Vec<Candidate> {
    json.get("value")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let web_url = item.get("webUrl")?.as_str()?;
                    Some(Candidate {
                        web_url: web_url.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn bind_location(
    api: &dyn RemoteApi,
    case_id: &str,
    name: &str,
    url: &str,
) -> Result<DataSourceRef, String> {
    let payload = serde_json::json!({
        "displayName": name,
        "site": { "webUrl": url },
    });
    let path = sources_path(case_id);
    let resp = api.post(&path, payload).await.map_err(|e| e.to_string())?;
    if classify(resp.status) != ApiOutcome::Success {
        return Err(format!("data source creation failed (status {})", resp.status));
    }
    let json = resp
        .json()
        .map_err(|_| "data source response malformed".to_string())?;
    let id = json
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "data source response missing id".to_string())?;

    Ok(DataSourceRef {
        location_name: name.to_string(),
        location_url: url.to_string(),
        source_id: id.to_string(),
        bind_ref: format!("{}/{}", path, id),
    })
}

/// Among loosely-matching directory hits, keep the ones whose canonical
/// URL contains the originally requested name (case-insensitive) and
/// take the first. Spaces are dropped from the needle: canonical URLs
/// never carry them, while configured names often do.
fn pick_candidate(candidates: &[Candidate], requested: &str) -> Option<String> {
    let needle = requested.to_lowercase().replace(' ', "");
    if needle.is_empty() {
        return None;
    }
    candidates
        .iter()
        .find(|c| c.web_url.to_lowercase().contains(&needle))
        .map(|c| c.web_url.clone())
}

/// Text before the first space, when that leaves a shorter, non-empty
/// prefix to retry with.
fn prefix_before_space(name: &str) -> Option<&str> {
    let (prefix, _) = name.split_once(' ')?;
    if prefix.is_empty() {
        None
    } else {
        Some(prefix)
    }
}

/// Percent-encode a query component. Unreserved characters pass through.
fn encode_query_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_stops_at_first_space() {
        assert_eq!(prefix_before_space("Finance Team Site"), Some("Finance"));
        assert_eq!(prefix_before_space("Site1"), None);
        assert_eq!(prefix_before_space(" leading"), None);
    }

    #[test]
    fn encode_passes_unreserved() {
        assert_eq!(encode_query_component("Site1"), "Site1");
        assert_eq!(encode_query_component("a-b_c.d~e"), "a-b_c.d~e");
    }

    #[test]
    fn encode_escapes_reserved() {
        assert_eq!(encode_query_component("Finance Team"), "Finance%20Team");
        assert_eq!(encode_query_component("a&b=c"), "a%26b%3Dc");
    }

    #[test]
    fn candidate_filter_is_case_insensitive_substring() {
        let candidates = vec![
            Candidate {
                web_url: "https://tenant.example.com/sites/Other".to_string(),
            },
            Candidate {
                web_url: "https://tenant.example.com/sites/SITE1".to_string(),
            },
        ];
        assert_eq!(
            pick_candidate(&candidates, "site1"),
            Some("https://tenant.example.com/sites/SITE1".to_string())
        );
    }

    #[test]
    fn candidate_filter_rejects_all_nonmatching() {
        let candidates = vec![Candidate {
            web_url: "https://tenant.example.com/sites/Other".to_string(),
        }];
        assert_eq!(pick_candidate(&candidates, "Site1"), None);
    }

    #[test]
    fn candidate_filter_ignores_spaces_in_requested_name() {
        let candidates = vec![Candidate {
            web_url: "https://tenant.example.com/sites/FinanceTeam".to_string(),
        }];
        assert_eq!(
            pick_candidate(&candidates, "Finance Team"),
            Some("https://tenant.example.com/sites/FinanceTeam".to_string())
        );
    }
}
