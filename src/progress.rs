//! Run progress reporting.
//!
//! Reports observable progress during `dsc run` / `dsc attach` so
//! operators see what is being resolved, which polling phase is active,
//! and how long it has been waiting. Progress is emitted on **stderr**
//! so stdout remains parseable for scripts. Warnings that must never
//! fail the run (unresolved locations, swallowed cleanup errors) travel
//! on the same channel.

use std::io::Write;

/// The two polling phases, with independent clocks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PollPhase {
    /// Waiting for the job object to appear after triggering.
    Initializing,
    /// Waiting for an existing job to reach a terminal status.
    Progress,
}

impl PollPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollPhase::Initializing => "initializing",
            PollPhase::Progress => "progress",
        }
    }
}

/// A single progress event for a discovery run.
#[derive(Clone, Debug)]
pub enum RunEvent {
    /// Location resolution: n of total locations settled.
    Resolving { n: u64, total: u64 },
    /// A location was dropped from the run (warning, not fatal).
    LocationUnresolved { name: String, reason: String },
    CaseCreated { id: String },
    SearchCreated { id: String },
    JobTriggered,
    /// One poll completed in the given phase.
    Polling {
        phase: PollPhase,
        elapsed_secs: u64,
        observed: String,
    },
    CleanupDone { case_id: String },
    /// Cleanup failed; reported here and swallowed, never escalated
    /// over the original error.
    CleanupFailed { case_id: String, detail: String },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    fn report(&self, event: RunEvent);
}

/// Human-friendly progress on stderr:
/// "poll progress  150s  running".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunEvent) {
        let line = match &event {
            RunEvent::Resolving { n, total } => {
                format!("resolve  {} / {} locations\n", n, total)
            }
            RunEvent::LocationUnresolved { name, reason } => {
                format!("warning: location {:?} dropped: {}\n", name, reason)
            }
            RunEvent::CaseCreated { id } => format!("case created: {}\n", id),
            RunEvent::SearchCreated { id } => format!("search created: {}\n", id),
            RunEvent::JobTriggered => "statistics job triggered\n".to_string(),
            RunEvent::Polling {
                phase,
                elapsed_secs,
                observed,
            } => {
                format!("poll {}  {}s  {}\n", phase.as_str(), elapsed_secs, observed)
            }
            RunEvent::CleanupDone { case_id } => format!("case deleted: {}\n", case_id),
            RunEvent::CleanupFailed { case_id, detail } => {
                format!("warning: cleanup of case {} failed: {}\n", case_id, detail)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunEvent) {
        let obj = match &event {
            RunEvent::Resolving { n, total } => serde_json::json!({
                "event": "resolving", "n": n, "total": total
            }),
            RunEvent::LocationUnresolved { name, reason } => serde_json::json!({
                "event": "location_unresolved", "name": name, "reason": reason
            }),
            RunEvent::CaseCreated { id } => serde_json::json!({
                "event": "case_created", "id": id
            }),
            RunEvent::SearchCreated { id } => serde_json::json!({
                "event": "search_created", "id": id
            }),
            RunEvent::JobTriggered => serde_json::json!({ "event": "job_triggered" }),
            RunEvent::Polling {
                phase,
                elapsed_secs,
                observed,
            } => serde_json::json!({
                "event": "polling",
                "phase": phase.as_str(),
                "elapsed_secs": elapsed_secs,
                "observed": observed
            }),
            RunEvent::CleanupDone { case_id } => serde_json::json!({
                "event": "cleanup_done", "case_id": case_id
            }),
            RunEvent::CleanupFailed { case_id, detail } => serde_json::json!({
                "event": "cleanup_failed", "case_id": case_id, "detail": detail
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names() {
        assert_eq!(PollPhase::Initializing.as_str(), "initializing");
        assert_eq!(PollPhase::Progress.as_str(), "progress");
    }
}
