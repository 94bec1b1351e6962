//! Router (C5): given an `AnalysisRecord`, resolves the project, classifies
//! task duration, assigns tags, and selects an icon — four independently
//! testable sub-decisions.

use crate::core::config::Config;
use crate::core::types::{
    AnalysisRecord, Category, Confidence, DurationClass, DurationDecision, RoutedRecord, Tag,
};
use crate::services::catalog::ProjectCatalog;
use crate::Result;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use std::sync::Arc;

const CATEGORY_KEYWORDS: &[&str] = &["task", "note", "research"];

const LONG_FORM_KEYWORDS: &[&str] = &[
    "project", "plan", "design", "build", "architecture", "deep dive", "overhaul", "migrate",
    "migration", "redesign",
];
const MEDIUM_FORM_KEYWORDS: &[&str] = &[
    "research", "decide", "decision", "compare", "review", "evaluate", "investigate", "analyze",
];

pub struct Router {
    catalog: Arc<ProjectCatalog>,
    communications_patterns: Vec<String>,
    needs_external_patterns: Vec<String>,
    icon_map: Vec<(String, String)>,
    icon_fallback: String,
    quick_max_minutes: u32,
    medium_max_minutes: u32,
}

impl Router {
    pub fn new(config: &Config, catalog: Arc<ProjectCatalog>) -> Self {
        Self {
            catalog,
            communications_patterns: config.tag_patterns.communications.clone(),
            needs_external_patterns: config.tag_patterns.needs_external_input.clone(),
            icon_map: config.icon_map.clone(),
            icon_fallback: config.router.icon_fallback.clone(),
            quick_max_minutes: config.router.quick_max_minutes,
            medium_max_minutes: config.router.medium_max_minutes,
        }
    }

    pub async fn route(&self, mut analysis: AnalysisRecord) -> Result<RoutedRecord> {
        let body = analysis.body.clone();

        // `analysis.project` is only ever the parser's crude last-few-token
        // candidate (see its doc comment), not an already-resolved project
        // name, so it is never trustworthy enough to hand straight to
        // `catalog.resolve`. Always run the threshold-aware end-of-body
        // window scan from SPEC §4.2 instead.
        let project_match = self.catalog.extract_hint(&body, CATEGORY_KEYWORDS).await?;

        let project_id = project_match.as_ref().map(|m| m.project_id.clone());
        if project_id.is_none() {
            analysis.manual_review = true;
        }

        let duration = if analysis.category == Category::Task {
            Some(self.classify_duration(&body))
        } else {
            None
        };

        let mut tags = self.match_tags(&body);
        if analysis.confidence == Confidence::Low || project_id.is_none() {
            if !tags.contains(&Tag::ManualReview) {
                tags.push(Tag::ManualReview);
            }
        }

        let icon = self.select_icon(&body);

        Ok(RoutedRecord {
            analysis,
            project_id,
            duration,
            tags,
            icon,
        })
    }

    /// Tie-break rule: when wording matches both a medium and a long
    /// indicator, the longer class wins.
    fn classify_duration(&self, body: &str) -> DurationDecision {
        let lower = body.to_lowercase();
        let is_long = LONG_FORM_KEYWORDS.iter().any(|k| lower.contains(k));
        let is_medium = MEDIUM_FORM_KEYWORDS.iter().any(|k| lower.contains(k));

        let today = Utc::now().date_naive();
        if is_long {
            DurationDecision {
                class: DurationClass::Long,
                estimated_minutes: 180,
                due_date: last_day_of_month(today),
                reason: "wording indicates project-scale or deep work".to_string(),
            }
        } else if is_medium {
            DurationDecision {
                class: DurationClass::Medium,
                estimated_minutes: self.medium_max_minutes,
                due_date: next_friday(today),
                reason: "wording indicates a researchable decision".to_string(),
            }
        } else {
            DurationDecision {
                class: DurationClass::Quick,
                estimated_minutes: self.quick_max_minutes,
                due_date: today,
                reason: "no long- or medium-form indicators found; treated as a quick reply"
                    .to_string(),
            }
        }
    }

    fn match_tags(&self, body: &str) -> Vec<Tag> {
        let mut tags = Vec::new();
        if contains_any_whole_word(body, &self.communications_patterns)
            || contains_any_whole_word(body, DEFAULT_COMMUNICATIONS_PATTERNS)
        {
            tags.push(Tag::Communications);
        }
        if contains_any_whole_word(body, &self.needs_external_patterns)
            || contains_any_whole_word(body, DEFAULT_NEEDS_EXTERNAL_PATTERNS)
        {
            tags.push(Tag::NeedsExternalInput);
        }
        tags
    }

    fn select_icon(&self, body: &str) -> String {
        let lower = body.to_lowercase();
        for (keyword, glyph) in &self.icon_map {
            if contains_whole_word(&lower, &keyword.to_lowercase()) {
                return glyph.clone();
            }
        }
        self.icon_fallback.clone()
    }
}

const DEFAULT_COMMUNICATIONS_PATTERNS: &[&str] = &["call", "email", "reply", "schedule with", "text"];
const DEFAULT_NEEDS_EXTERNAL_PATTERNS: &[&str] = &["home", "family", "medical", "immigration"];

fn contains_any_whole_word(body: &str, patterns: &[impl AsRef<str>]) -> bool {
    let lower = body.to_lowercase();
    patterns
        .iter()
        .any(|p| contains_whole_word(&lower, &p.as_ref().to_lowercase()))
}

fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let haystack_words: Vec<&str> = haystack.split_whitespace().collect();
    let needle_words: Vec<&str> = needle.split_whitespace().collect();
    if needle_words.is_empty() || needle_words.len() > haystack_words.len() {
        return false;
    }
    haystack_words
        .windows(needle_words.len())
        .any(|w| w.iter().map(|s| s.trim_matches(|c: char| !c.is_alphanumeric())).eq(needle_words.iter().copied()))
}

fn next_friday(from: NaiveDate) -> NaiveDate {
    let current = from.weekday().num_days_from_monday() as i64;
    let friday = Weekday::Fri.num_days_from_monday() as i64;
    let mut delta = friday - current;
    if delta <= 0 {
        delta += 7;
    }
    from + ChronoDuration::days(delta)
}

fn last_day_of_month(from: NaiveDate) -> NaiveDate {
    let (year, month) = (from.year(), from.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
}
