//! Result artifacts.
//!
//! Writes two files per run to the configured output directory, each
//! name-stamped with the run's start time: a structured JSON record and
//! a flat CSV summary. Field mapping only; anything resembling
//! judgment happens upstream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::OrchestrationError;
use crate::models::{DataSourceRef, UnresolvedLocation};

/// Structured record of one discovery run.
#[derive(Debug, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub case_id: String,
    pub case_name: String,
    pub search_id: String,
    pub search_name: String,
    pub query: String,
    pub clause_count: usize,
    pub sources: Vec<RecordSource>,
    pub unresolved: Vec<RecordUnresolved>,
    pub status: String,
    pub items_found: Option<u64>,
    pub size_bytes: Option<u64>,
    pub init_wait_secs: u64,
    pub progress_wait_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct RecordSource {
    pub name: String,
    pub url: String,
    pub source_id: String,
}

impl From<&DataSourceRef> for RecordSource {
    fn from(r: &DataSourceRef) -> Self {
        Self {
            name: r.location_name.clone(),
            url: r.location_url.clone(),
            source_id: r.source_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordUnresolved {
    pub name: String,
    pub reason: String,
}

impl From<&UnresolvedLocation> for RecordUnresolved {
    fn from(u: &UnresolvedLocation) -> Self {
        Self {
            name: u.name.clone(),
            reason: u.reason.clone(),
        }
    }
}

/// Paths of the two written artifacts.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Write the structured record and the flat summary.
pub fn emit(record: &RunRecord, dir: &Path) -> Result<ReportPaths, OrchestrationError> {
    std::fs::create_dir_all(dir)?;

    let stamp = record.started_at.format("%Y%m%d_%H%M%S");
    let json_path = dir.join(format!("discovery-{}.json", stamp));
    let csv_path = dir.join(format!("discovery-{}.csv", stamp));

    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&json_path, json)?;

    let duration_secs = (record.finished_at - record.started_at).num_seconds().max(0);
    let mut csv = String::from("run_id,case_id,search_id,status,items_found,size_bytes,duration_secs\n");
    csv.push_str(&format!(
        "{},{},{},{},{},{},{}\n",
        csv_field(&record.run_id),
        csv_field(&record.case_id),
        csv_field(&record.search_id),
        csv_field(&record.status),
        record.items_found.map(|v| v.to_string()).unwrap_or_default(),
        record.size_bytes.map(|v| v.to_string()).unwrap_or_default(),
        duration_secs,
    ));
    std::fs::write(&csv_path, csv)?;

    Ok(ReportPaths {
        json: json_path,
        csv: csv_path,
    })
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> RunRecord {
        let started = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();
        RunRecord {
            run_id: "run-1".to_string(),
            started_at: started,
            finished_at: started + chrono::Duration::seconds(95),
            case_id: "case-1".to_string(),
            case_name: "Quarterly Discovery".to_string(),
            search_id: "search-1".to_string(),
            search_name: "Quarterly Discovery Search".to_string(),
            query: "rule:\"A|1..|1..100\"".to_string(),
            clause_count: 1,
            sources: vec![RecordSource {
                name: "Site1".to_string(),
                url: "https://tenant.example.com/sites/Site1".to_string(),
                source_id: "src-1".to_string(),
            }],
            unresolved: vec![],
            status: "succeeded".to_string(),
            items_found: Some(42),
            size_bytes: Some(100000),
            init_wait_secs: 20,
            progress_wait_secs: 60,
        }
    }

    #[test]
    fn emits_both_artifacts_with_stamped_names() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = emit(&record(), tmp.path()).unwrap();

        assert!(paths.json.ends_with("discovery-20260305_143000.json"));
        assert!(paths.csv.ends_with("discovery-20260305_143000.csv"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths.json).unwrap()).unwrap();
        assert_eq!(json["items_found"], 42);
        assert_eq!(json["size_bytes"], 100000);
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["query"], "rule:\"A|1..|1..100\"");

        let csv = std::fs::read_to_string(&paths.csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "run-1,case-1,search-1,succeeded,42,100000,95");
    }

    #[test]
    fn creates_missing_output_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b");
        let paths = emit(&record(), &nested).unwrap();
        assert!(paths.json.exists());
    }

    #[test]
    fn csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("with,comma"), "\"with,comma\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
