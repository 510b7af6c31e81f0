//! # docrelay
//!
//! Uploads PDF documents to object storage, runs asynchronous layout
//! analysis over them, and turns the extracted layout into titled narrative
//! sections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Upload  │──▶│ Object Store │──▶│  Analysis   │──▶│ Job Monitor  │
//! │ HTTP/CLI │   │  (S3 PUT)    │   │ (Textract)  │   │  (polling)   │
//! └──────────┘   └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                                            │ SUCCEEDED
//!                      ┌──────────────┐   ┌──────────────┐   ▼
//!                      │   Grouper    │◀──│ Layout+Chunk │◀──fetch results
//!                      └──────┬───────┘   └──────────────┘
//!                             ▼
//!                   <stem>_results.json, <stem>_groups.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docrelay init                     # create database
//! docrelay process ./report.pdf     # run the whole pipeline and wait
//! docrelay serve                    # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Gateway, monitor, and workflow errors |
//! | [`aws`] | Credentials and SigV4 signing |
//! | [`object_store`] | Object storage gateway (S3, in-memory) |
//! | [`analysis`] | Analysis backend gateway (Textract) |
//! | [`monitor`] | Bounded job status polling |
//! | [`layout`] | Layout elements from raw results |
//! | [`chunk`] | Title-based chunking |
//! | [`grouper`] | Narrative grouping |
//! | [`workflow`] | Document workflow orchestration |
//! | [`worker`] | Background job queue |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`records`] | Document and job records |

pub mod analysis;
pub mod aws;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod grouper;
pub mod layout;
pub mod migrate;
pub mod models;
pub mod monitor;
pub mod object_store;
pub mod records;
pub mod server;
pub mod worker;
pub mod workflow;
