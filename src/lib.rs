//! # Bulk Transfer Engine — Core Library
//!
//! Re-exports the modules that make up a schema-aware, checkpointable bulk
//! data transfer engine: a typed value/column model, a connection pool with
//! throttle-adaptive concurrency, FetchXML and TDS executors, a dependency
//! graph and tiered planner, parallel export and tiered import drivers, and
//! the on-disk checkpoint/dead-letter/bulk-file formats that tie a run
//! together across restarts.
//!
//! ## Module Organization
//!
//! - [`value`] — typed cell [`value::Value`]s, [`value::Column`] metadata, [`value::Record`]
//! - [`variables`] — expression variable scope and error-state tracking
//! - [`functions`] — the expression function library (string/math/date/cast/logical)
//! - [`error`] — the crate's typed error model
//! - [`cancel`] — cooperative cancellation token
//! - [`pool`] — connection leasing with throttle-adaptive concurrency
//! - [`fetchxml`] — FetchXML rewrite, paging, and row mapping
//! - [`tds`] — read-only SQL execution over TDS
//! - [`graph`] — dependency graph construction and tiered planning
//! - [`export`] — bounded-parallel, dependency-gated export
//! - [`import`] — tiered, checkpointed, side-effect-suppressed import
//! - [`checkpoint`] — checkpoint persistence and dead-letter records
//! - [`progress`] — structured progress events and sinks
//! - [`metrics`] — Prometheus metrics registry
//! - [`config`] — runtime configuration
//! - [`bulk`] — portable schema/data/manifest file formats
//!
//! ## Design Philosophy
//!
//! Every module that talks to a network collaborator (FetchXML, TDS,
//! import's row upserts) does so behind a small `async_trait`, so the
//! pool, planner, exporter, and importer can all be exercised with fakes.
//! Long-running operations carry a [`cancel::CancellationToken`] and report
//! through [`progress::ProgressSink`] rather than logging directly.

pub mod bulk;
pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod export;
pub mod fetchxml;
pub mod functions;
pub mod graph;
pub mod import;
pub mod metrics;
pub mod pool;
pub mod progress;
pub mod tds;
pub mod value;
pub mod variables;
