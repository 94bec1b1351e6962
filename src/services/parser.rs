//! Content Parser (C3): validates raw transcript text and derives a
//! category hint and a raw project-hint candidate before analysis.

use crate::core::config::Config;
use crate::core::error::ParserError;
use crate::core::types::Category;
use crate::Result;

const CATEGORY_KEYWORDS: &[&str] = &["task", "note", "research"];

const IMPERATIVE_VERBS: &[&str] = &[
    "call", "send", "schedule", "buy", "email", "text", "message", "book", "order", "pay",
    "renew", "submit", "file", "pick", "finish", "draft", "follow",
];

const REFLECTIVE_LEADERS: &[&str] = &["i noticed", "i think", "it seems", "i feel", "i wonder"];

const DUE_PHRASES: &[&str] = &[
    "by eod", "tomorrow", "next week", "by tomorrow", "this week", "by friday", "end of day",
];

/// Parsed, validated transcript content ready for analysis.
#[derive(Debug, Clone)]
pub struct ParsedContent {
    pub body: String,
    pub category_hint: Category,
    /// Raw text candidate for a project name, not yet resolved against the
    /// catalog. The router resolves it (or re-derives one via the catalog's
    /// own extraction) when routing the analysis.
    pub project_hint: Option<String>,
}

pub struct ContentParser {
    max_transcript_bytes: usize,
}

impl ContentParser {
    pub fn new(config: &Config) -> Self {
        Self {
            max_transcript_bytes: config.parser.max_transcript_bytes,
        }
    }

    /// Validate and parse raw transcript bytes.
    pub fn parse(&self, raw: &[u8]) -> Result<ParsedContent> {
        if raw.len() > self.max_transcript_bytes {
            return Err(ParserError::TooLarge {
                max: self.max_transcript_bytes,
                actual: raw.len(),
            }
            .into());
        }

        let text = self.decode(raw)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ParserError::Empty.into());
        }

        let category_hint = classify_hint(trimmed);
        let project_hint = extract_trailing_candidate(trimmed, CATEGORY_KEYWORDS);

        Ok(ParsedContent {
            body: trimmed.to_string(),
            category_hint,
            project_hint,
        })
    }

    fn decode(&self, raw: &[u8]) -> Result<String> {
        if let Ok(s) = std::str::from_utf8(raw) {
            return Ok(s.to_string());
        }
        // Fall back to a lossy decode using the system default before giving
        // up entirely; a transcript with a handful of mis-encoded bytes is
        // still worth processing.
        let lossy = String::from_utf8_lossy(raw).into_owned();
        if lossy.chars().any(|c| c != char::REPLACEMENT_CHARACTER) {
            Ok(lossy)
        } else {
            Err(ParserError::UndecodableBytes("no valid text content".to_string()).into())
        }
    }
}

/// The five-tier category heuristic from SPEC §4.3, in priority order.
fn classify_hint(body: &str) -> Category {
    let lower = body.to_lowercase();

    // 1. Explicit trailing marker.
    if let Some(last_segment) = lower
        .rsplit(|c: char| c == '.' || c == '!' || c == '?')
        .find(|s| !s.trim().is_empty())
    {
        if let Some(cat) = Category::from_marker(last_segment) {
            return cat;
        }
    }

    // 2. Leading imperative verb on the first clause.
    let first_clause = lower
        .split(|c: char| c == '.' || c == '!' || c == '?')
        .next()
        .unwrap_or("")
        .trim();
    if let Some(first_word) = first_clause.split_whitespace().next() {
        if IMPERATIVE_VERBS.contains(&first_word) {
            return Category::Task;
        }
    }

    // 3. Reflective/observational leaders.
    if REFLECTIVE_LEADERS.iter().any(|l| lower.starts_with(l)) {
        return Category::Note;
    }

    // 4. Due-like phrase anywhere in the body.
    if DUE_PHRASES.iter().any(|p| lower.contains(p)) {
        return Category::Task;
    }

    // 5. Default bias toward non-destructive classification.
    Category::Note
}

/// Strip a trailing explicit category marker token, then take the last up
/// to 5 tokens of what remains as a raw project-hint candidate. This is a
/// lightweight pass; the catalog performs the full threshold-aware window
/// scan from SPEC §4.2 when resolving a hint against known projects.
fn extract_trailing_candidate(body: &str, skip_keywords: &[&str]) -> Option<String> {
    let mut tokens: Vec<String> = body
        .split_whitespace()
        .map(strip_punct)
        .filter(|t| !t.is_empty())
        .collect();

    if let Some(last) = tokens.last() {
        if skip_keywords.iter().any(|k| k.eq_ignore_ascii_case(last)) {
            tokens.pop();
        }
    }

    if tokens.is_empty() {
        return None;
    }
    let window_len = 5.min(tokens.len());
    let candidate = tokens[tokens.len() - window_len..].join(" ");
    Some(candidate).filter(|s| !s.trim().is_empty())
}

fn strip_punct(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> ContentParser {
        ContentParser {
            max_transcript_bytes: 200_000,
        }
    }

    #[test]
    fn test_rejects_empty() {
        let err = parser().parse(b"   ").unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Parser(ParserError::Empty)
        ));
    }

    #[test]
    fn test_rejects_too_large() {
        let p = ContentParser {
            max_transcript_bytes: 4,
        };
        let err = p.parse(b"way too long").unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Parser(ParserError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_explicit_trailing_marker() {
        let parsed = parser()
            .parse(b"Reply to Nate about Simon follow-up. Task.")
            .unwrap();
        assert_eq!(parsed.category_hint, Category::Task);
    }

    #[test]
    fn test_leading_imperative_verb() {
        let parsed = parser().parse(b"Call the dentist tomorrow").unwrap();
        assert_eq!(parsed.category_hint, Category::Task);
    }

    #[test]
    fn test_reflective_leader_is_note() {
        let parsed = parser()
            .parse(b"I noticed that my productivity improves when I sleep early")
            .unwrap();
        assert_eq!(parsed.category_hint, Category::Note);
    }

    #[test]
    fn test_default_bias_is_note() {
        let parsed = parser().parse(b"The weather was nice today").unwrap();
        assert_eq!(parsed.category_hint, Category::Note);
    }

    #[test]
    fn test_trailing_candidate_skips_category_marker() {
        let hint = extract_trailing_candidate("Clean up the database. Task.", CATEGORY_KEYWORDS);
        assert_eq!(hint.as_deref(), Some("Clean up the database"));
        let hint2 = extract_trailing_candidate("finish the task", CATEGORY_KEYWORDS);
        assert_eq!(hint2.as_deref(), Some("finish the"));
    }
}
