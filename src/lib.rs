// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod model;
pub mod errors;
pub mod watermark;

pub mod config;
pub mod repository;

pub mod ai;
pub mod ai_bootstrap;

// Acquisition: fetch capability, feed/html parsing, discovery, adapters, loops
pub mod ingest;

pub mod pipeline;
pub mod delivery;
pub mod forwarding;
pub mod notify;
pub mod sources;

pub mod api;
pub mod app;
pub mod history;
pub mod logging;
pub mod metrics;

pub use crate::api::create_router;
pub use crate::pipeline::{CycleReport, CycleScope, Pipeline, PipelineDeps};
