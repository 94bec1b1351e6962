//! Analyzers (C4): category-specific structuring of parsed transcript
//! content into one or more `AnalysisRecord`s.

pub mod llm;
pub mod note;
pub mod task;

pub use llm::{HttpLlmClient, LlmClient};
pub use note::NoteAnalyzer;
pub use task::TaskAnalyzer;

use crate::core::config::Config;
use std::sync::Arc;

/// Build the process-wide LLM client from configuration.
pub fn build_llm_client(config: &Config) -> Arc<dyn LlmClient> {
    Arc::new(HttpLlmClient::new(config))
}
