//! TaskAnalyzer (C4): structures a task-category transcript into one or
//! more `AnalysisRecord`s, synthesizing a Verb+Object title via the LLM.

use super::llm::LlmClient;
use crate::core::config::Config;
use crate::core::types::{AnalysisRecord, Category, Confidence};
use crate::Result;
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a precise note-taking assistant. Given a raw voice \
transcript of a task, extract a concise title in Verb + Object form (at most 10 words), a \
cleaned body with filler words removed, the list of distinct imperative action items if more \
than one exists, and your confidence (high, medium, or low) in this extraction. Respond with a \
single JSON object: {\"tasks\": [{\"title\": ..., \"body\": ..., \"action_items\": [...], \
\"confidence\": ...}]}.";

#[derive(Debug, Deserialize)]
struct TaskLlmResponse {
    tasks: Vec<TaskLlmItem>,
}

#[derive(Debug, Deserialize)]
struct TaskLlmItem {
    title: String,
    body: String,
    #[serde(default)]
    action_items: Vec<String>,
    confidence: String,
}

pub struct TaskAnalyzer {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl TaskAnalyzer {
    pub fn new(llm: Arc<dyn LlmClient>, config: &Config) -> Self {
        let system_prompt = config
            .prompts
            .get("task_analysis")
            .cloned()
            .unwrap_or_else(|| SYSTEM_PROMPT.to_string());
        Self { llm, system_prompt }
    }

    /// Clean meta-commentary filler ("okay so uh...") while preserving
    /// substantive content, applied before the LLM call as a cheap
    /// normalization pass (the LLM is still responsible for the full clean).
    fn strip_filler(body: &str) -> String {
        const FILLERS: &[&str] = &["okay so uh", "um, ", "uh, ", "you know, ", "like, "];
        let mut cleaned = body.to_string();
        for filler in FILLERS {
            cleaned = cleaned.replace(filler, "");
        }
        cleaned.trim().to_string()
    }

    pub async fn analyze(
        &self,
        body: &str,
        project_hint: Option<String>,
    ) -> Result<Vec<AnalysisRecord>> {
        let cleaned = Self::strip_filler(body);

        match self.llm.complete(&self.system_prompt, &cleaned).await {
            Ok(raw_response) => match parse_response(&raw_response) {
                Some(items) if !items.is_empty() => Ok(items
                    .into_iter()
                    .map(|item| to_record(item, project_hint.clone()))
                    .collect()),
                _ => Ok(vec![fallback_record(&cleaned, project_hint)]),
            },
            Err(e) => {
                tracing::warn!("task analysis LLM call exhausted retries: {e}");
                Ok(vec![fallback_record(&cleaned, project_hint)])
            }
        }
    }
}

fn parse_response(raw: &str) -> Option<Vec<TaskLlmItem>> {
    let json_slice = extract_json_object(raw)?;
    let parsed: TaskLlmResponse = serde_json::from_str(json_slice).ok()?;
    Some(parsed.tasks)
}

/// LLM responses occasionally wrap JSON in prose or code fences; extract the
/// first balanced `{...}` span.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

fn to_record(item: TaskLlmItem, project_hint: Option<String>) -> AnalysisRecord {
    let confidence = parse_confidence(&item.confidence);
    AnalysisRecord {
        category: Category::Task,
        title: truncate_words(&item.title, 10),
        body: item.body,
        action_items: item.action_items,
        key_insights: Vec::new(),
        confidence,
        project: project_hint,
        manual_review: false,
    }
}

fn fallback_record(body: &str, project_hint: Option<String>) -> AnalysisRecord {
    AnalysisRecord {
        category: Category::Task,
        title: truncate_words(body, 8),
        body: body.to_string(),
        action_items: Vec::new(),
        key_insights: Vec::new(),
        confidence: Confidence::Low,
        project: project_hint,
        manual_review: false,
    }
}

fn parse_confidence(raw: &str) -> Confidence {
    match raw.to_lowercase().as_str() {
        "high" => Confidence::High,
        "low" => Confidence::Low,
        _ => Confidence::Medium,
    }
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analyzers::llm::tests_support::StaticLlmClient;

    #[tokio::test]
    async fn test_fallback_on_llm_failure() {
        let analyzer = TaskAnalyzer {
            llm: Arc::new(StaticLlmClient::failing()),
            system_prompt: SYSTEM_PROMPT.to_string(),
        };
        let records = analyzer
            .analyze("Reply to Nate about Simon follow-up. Task.", None)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn test_parses_single_task_response() {
        let response = r#"{"tasks": [{"title": "Reply to Nate", "body": "Reply to Nate about the Simon follow-up.", "action_items": [], "confidence": "high"}]}"#;
        let analyzer = TaskAnalyzer {
            llm: Arc::new(StaticLlmClient::returning(response)),
            system_prompt: SYSTEM_PROMPT.to_string(),
        };
        let records = analyzer.analyze("Reply to Nate. Task.", None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Reply to Nate");
        assert_eq!(records[0].confidence, Confidence::High);
    }

    #[tokio::test]
    async fn test_parses_multiple_tasks() {
        let response = r#"{"tasks": [
            {"title": "Call the bank", "body": "Call the bank about the statement.", "action_items": [], "confidence": "medium"},
            {"title": "Email Sam", "body": "Email Sam the updated invoice.", "action_items": [], "confidence": "medium"}
        ]}"#;
        let analyzer = TaskAnalyzer {
            llm: Arc::new(StaticLlmClient::returning(response)),
            system_prompt: SYSTEM_PROMPT.to_string(),
        };
        let records = analyzer.analyze("Call the bank. Email Sam.", None).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("one two three four", 2), "one two");
    }
}
