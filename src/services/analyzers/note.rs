//! NoteAnalyzer (C4): structures a note- or research-category transcript.
//! Short-form bodies get a lightly reformatted body; long-form bodies are
//! preserved verbatim, never summarized (R2).

use super::llm::LlmClient;
use crate::core::config::Config;
use crate::core::types::{AnalysisRecord, Category, Confidence};
use crate::Result;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a precise note-taking assistant. Given a raw voice \
transcript, produce only a descriptive title of 4 to 8 words that captures its essence. Do not \
summarize or alter the content itself. Respond with the title text alone, nothing else.";

pub struct NoteAnalyzer {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    word_threshold: usize,
}

impl NoteAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        let system_prompt = config
            .prompts
            .get("note_analysis")
            .cloned()
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string());
        Self {
            llm,
            system_prompt,
            word_threshold: config.llm.note_word_threshold,
        }
    }

    pub async fn analyze(
        &self,
        body: &str,
        category: Category,
        project_hint: Option<String>,
    ) -> Result<AnalysisRecord> {
        let word_count = body.split_whitespace().count();
        let is_long_form = word_count >= self.word_threshold;

        let title = match self.llm.complete(&self.system_prompt, body).await {
            Ok(raw) => clean_title(&raw),
            Err(e) => {
                tracing::warn!("note analysis LLM call exhausted retries: {e}");
                deterministic_title(body)
            }
        };

        let rendered_body = if is_long_form {
            preserve_paragraphs(body)
        } else {
            reformat_short_form(body)
        };

        let confidence = if title.is_empty() {
            Confidence::Low
        } else if is_long_form {
            Confidence::High
        } else {
            Confidence::Medium
        };

        Ok(AnalysisRecord {
            category,
            title: if title.is_empty() {
                deterministic_title(body)
            } else {
                title
            },
            body: rendered_body,
            action_items: Vec::new(),
            key_insights: Vec::new(),
            confidence,
            project: project_hint,
            manual_review: false,
        })
    }
}

fn clean_title(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn deterministic_title(body: &str) -> String {
    body.split_whitespace()
        .take(8)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Long-form bodies are preserved verbatim, only re-split on paragraph
/// boundaries — never summarized or rewritten (R2).
fn preserve_paragraphs(body: &str) -> String {
    body.to_string()
}

/// Short-form bodies get paragraph-break normalization only: collapse runs
/// of 3+ newlines to a single blank line. No content is summarized.
fn reformat_short_form(body: &str) -> String {
    let mut result = String::with_capacity(body.len());
    let mut newline_run = 0;
    for c in body.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                result.push(c);
            }
        } else {
            newline_run = 0;
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analyzers::llm::tests_support::StaticLlmClient;

    #[tokio::test]
    async fn test_short_form_note() {
        let analyzer = NoteAnalyzer {
            llm: Arc::new(StaticLlmClient::returning("Morning productivity reflection")),
            system_prompt: SYSTEM_PROMPT.to_string(),
            word_threshold: 800,
        };
        let record = analyzer
            .analyze(
                "I noticed that my productivity improves when I sleep early.",
                Category::Note,
                None,
            )
            .await
            .unwrap();
        assert_eq!(record.title, "Morning productivity reflection");
        assert_eq!(record.category, Category::Note);
    }

    #[tokio::test]
    async fn test_long_form_preserved_verbatim() {
        let body = "word ".repeat(900);
        let analyzer = NoteAnalyzer {
            llm: Arc::new(StaticLlmClient::returning("Nine hundred word reflection")),
            system_prompt: SYSTEM_PROMPT.to_string(),
            word_threshold: 800,
        };
        let record = analyzer
            .analyze(&body, Category::Note, None)
            .await
            .unwrap();
        assert_eq!(record.body, body);
        assert_eq!(record.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn test_fallback_title_on_llm_failure() {
        let analyzer = NoteAnalyzer {
            llm: Arc::new(StaticLlmClient::failing()),
            system_prompt: SYSTEM_PROMPT.to_string(),
            word_threshold: 800,
        };
        let record = analyzer
            .analyze("one two three four five six seven eight nine ten", Category::Note, None)
            .await
            .unwrap();
        assert_eq!(record.title, "one two three four five six seven eight");
    }

    #[test]
    fn test_reformat_collapses_excess_newlines() {
        let input = "para one\n\n\n\npara two";
        assert_eq!(reformat_short_form(input), "para one\n\npara two");
    }
}
