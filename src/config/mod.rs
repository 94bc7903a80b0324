// src/config/mod.rs
pub mod briefing;
pub mod llm;

pub use briefing::{BriefingConfig, GuardrailConfig, HotspotConfig, StyleSignals, Vocabulary};
pub use llm::LlmConfig;
