//! # Knowledge Sync
//!
//! A connector-driven sync service that ingests external content into a
//! versioned, content-addressed knowledge base.
//!
//! Knowledge Sync tracks every ingestion as a job with retryable runs,
//! deduplicates unchanged content across repeated syncs via content
//! hashing, and exposes normalized progress for live status display.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ Connectors  │──▶│ Orchestrator │──▶│      SQLite       │
//! │ upload/...  │   │ hash + chunk │   │ sources/versions/ │
//! └─────────────┘   └──────┬───────┘   │ chunks/jobs/runs  │
//!                          │           └─────────┬─────────┘
//!                    ┌─────▼─────┐               │
//!                    │ Job Ledger│     ┌─────────┴─────────┐
//!                    │ state     │     ▼                   ▼
//!                    │ machine   │ ┌────────┐        ┌──────────┐
//!                    └───────────┘ │  CLI   │        │   HTTP   │
//!                                  │(ksync) │        │ (status) │
//!                                  └────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ksync init                  # create database
//! ksync enqueue docs          # queue a sync job for the "docs" scope
//! ksync sync docs             # claim and run it
//! ksync status docs           # job, phase, progress, counts
//! ksync serve                 # HTTP status/trigger boundary
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the typed stats view |
//! | [`error`] | Error taxonomy |
//! | [`store`] | Content version store (source → version → chunk) |
//! | [`ledger`] | Job/run state machine and attempt bookkeeping |
//! | [`progress`] | Progress/phase/ETA aggregation |
//! | [`orchestrator`] | Drives one sync run end to end |
//! | [`connector`] | Connector capability and registry |
//! | [`connector_upload`] | Built-in local-directory connector |
//! | [`chunk`] | Pluggable text segmentation |
//! | [`status`] | Joined status read boundary |
//! | [`server`] | HTTP status/trigger server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod connector;
pub mod connector_upload;
pub mod db;
pub mod error;
pub mod ledger;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod server;
pub mod status;
pub mod store;
