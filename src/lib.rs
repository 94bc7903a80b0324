// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod clock;
pub mod config;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod model;

// Pipeline stages, leaves first
pub mod text;
pub mod pool;
pub mod prompts;
pub mod summarize;
pub mod style;
pub mod focus;
pub mod oneliner;
pub mod hotspots;
pub mod citations;
pub mod keywords;
pub mod guardrails;
pub mod pipeline;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::model::*;
pub use crate::pipeline::{BriefingGenerator, BriefingRequest, RecentHistory};
