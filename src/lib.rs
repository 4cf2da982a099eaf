//! # Discovery Harness
//!
//! A resumable orchestrator for remote compliance discovery jobs.
//!
//! Discovery Harness provisions a case-scoped search on a remote
//! compliance service, binds external data sources to it, triggers the
//! long-running statistics job, and reliably learns when that job is
//! done — despite the service exposing no webhook, no single "done"
//! flag, and an API that sometimes answers with a transient error for a
//! job that has not been instantiated yet.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌─────────────┐
//! │  Query    │──▶│ Provision  │──▶│   Poller    │
//! │  Builder  │   │ case+search│   │ Phase A / B │
//! └───────────┘   └─────▲──────┘   └──────┬──────┘
//! ┌───────────┐         │                 │
//! │ Resolver  │─────────┘                 ▼
//! │ & Binder  │   failure at any stage: ┌─────────┐
//! └───────────┘   compensating cleanup  │ Report  │
//!                                       └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dsc query                       # inspect the composite query
//! dsc run                         # provision, poll, report
//! dsc attach <case-id>            # resume a timed-out or crashed run
//! dsc cleanup <case-id>           # delete a case by hand
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types (case, search, sources, job) |
//! | [`error`] | Typed error taxonomy |
//! | [`client`] | Retryable remote service client + token source |
//! | [`query`] | Composite query construction |
//! | [`sources`] | Directory resolution and data-source binding |
//! | [`provision`] | Case/search provisioning and cleanup |
//! | [`poller`] | Two-phase job polling state machine |
//! | [`report`] | Result artifacts (JSON + CSV) |
//! | [`progress`] | Run progress reporting on stderr |
//! | [`run`] | Top-level orchestration (`run`, `attach`) |

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod poller;
pub mod progress;
pub mod provision;
pub mod query;
pub mod report;
pub mod run;
pub mod sources;
