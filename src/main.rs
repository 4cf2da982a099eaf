//! # Discovery Harness CLI (`dsc`)
//!
//! The `dsc` binary drives a discovery run against the remote
//! compliance service: provisioning a case-scoped search over external
//! data sources, triggering the statistics job, and polling it to a
//! terminal state.
//!
//! ## Usage
//!
//! ```bash
//! dsc --config ./config/dsc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsc run` | Full orchestration: provision, poll, report |
//! | `dsc attach <case-id>` | Resume polling against an existing case |
//! | `dsc query` | Print the composite query built from config |
//! | `dsc cleanup <case-id>` | Delete a case (cascades to bound resources) |
//!
//! ## Exit Semantics
//!
//! Exit 0 only when the job reached terminal `succeeded`. Any fatal
//! error — configuration error, zero resolved locations, provisioning
//! failure, initialization timeout, progress timeout, remote-reported
//! job failure — exits non-zero. On a progress timeout the case is
//! kept and a `dsc attach` hint is printed, because the job may still
//! be computing remotely.
//!
//! ## Credentials
//!
//! The service credential is injected, never ambient: either a bearer
//! token in the environment variable named by `service.token_env`, or
//! OAuth client credentials (`service.token_url` plus the id/secret
//! environment variables) refreshed automatically on expiry.

mod client;
mod config;
mod error;
mod models;
mod poller;
mod progress;
mod provision;
mod query;
mod report;
mod run;
mod sources;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::{HttpRemoteApi, RemoteApi};
use crate::progress::ProgressMode;

/// Discovery Harness — a resumable orchestrator for remote compliance
/// discovery jobs.
#[derive(Parser)]
#[command(
    name = "dsc",
    about = "Discovery Harness — a resumable orchestrator for remote compliance discovery jobs",
    version,
    long_about = "Discovery Harness creates a case-scoped search on a remote compliance service, \
    binds external data sources to it, triggers the long-running statistics job, and polls it to \
    a terminal state with independent initialization and progress budgets. Failed runs clean up \
    after themselves; timed-out runs can be resumed with `dsc attach`."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dsc.toml")]
    config: PathBuf,

    /// Progress reporting on stderr. Defaults to human when stderr is
    /// a TTY, off otherwise.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl ProgressArg {
    fn mode(self) -> ProgressMode {
        match self {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the full orchestration: provision, poll, report.
    ///
    /// Creates the case, resolves and binds the configured locations,
    /// creates the search, triggers the statistics job, and waits for
    /// a terminal state. Writes one JSON and one CSV artifact to the
    /// configured output directory.
    Run {
        /// Keep the case on unrecoverable failure instead of deleting
        /// it, for post-mortem inspection.
        #[arg(long)]
        keep_case_on_failure: bool,
    },

    /// Resume polling against an existing case.
    ///
    /// Probes the case and its search, triggers the job only if it was
    /// never started, then waits as `run` does. Never deletes the case.
    Attach {
        /// Case identifier from a previous run.
        case_id: String,
    },

    /// Print the composite query built from config and exit.
    ///
    /// Useful for reviewing what a run would search for before
    /// touching the tenant.
    Query,

    /// Delete a case, cascading deletion of bound resources.
    ///
    /// Idempotent: an already-deleted case is a success.
    Cleanup {
        /// Case identifier to delete.
        case_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let progress_mode = cli
        .progress
        .map(ProgressArg::mode)
        .unwrap_or_else(ProgressMode::default_for_tty);
    let progress = progress_mode.reporter();

    // `dsc query` needs no credential and makes no remote calls.
    if let Commands::Query = cli.command {
        let q = query::build_query(&cfg.detection_rules(), &cfg.query.supplemental_ids)?;
        println!("{}", q.as_str());
        println!("clauses: {}", q.clause_count());
        return Ok(());
    }

    let api: Arc<dyn RemoteApi> = Arc::new(
        HttpRemoteApi::from_config(&cfg.service).context("failed to construct service client")?,
    );

    // Ctrl-C cancels the run promptly: polling loops abort within one
    // tick and in-flight requests are dropped.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Run {
            keep_case_on_failure,
        } => {
            let options = run::RunOptions {
                cleanup_on_failure: !keep_case_on_failure,
            };
            run::run_discovery(&cfg, api, options, &cancel, progress.as_ref()).await?;
        }
        Commands::Attach { case_id } => {
            run::attach_discovery(&cfg, api, &case_id, &cancel, progress.as_ref()).await?;
        }
        Commands::Cleanup { case_id } => {
            let clean = provision::cleanup_case(api.as_ref(), &case_id, progress.as_ref()).await;
            if !clean {
                anyhow::bail!("case {} could not be deleted", case_id);
            }
            println!("case {} deleted", case_id);
        }
        Commands::Query => unreachable!(),
    }

    Ok(())
}
