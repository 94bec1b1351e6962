//! Project Catalog (C2): fetches, caches, and fuzzy-matches the list of
//! known projects used to resolve a transcript's project hint to a stable
//! project id.

use crate::core::config::{Config, FallbackProject};
use crate::core::error::CatalogError;
use crate::core::types::{ProjectEntry, ProjectMatch};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheSnapshot {
    fetched_at: DateTime<Utc>,
    projects: Vec<ProjectEntry>,
    #[serde(default)]
    degraded: bool,
}

/// Resolves free text to a known project, backed by a disk cache with a
/// freshness window and a built-in fallback list for when the remote
/// knowledge base is unreachable.
pub struct ProjectCatalog {
    endpoint: String,
    api_key: String,
    cache_path: PathBuf,
    freshness_minutes: i64,
    match_threshold: f32,
    fallback: Vec<ProjectEntry>,
    client: reqwest::Client,
    cache: RwLock<Option<CacheSnapshot>>,
}

impl ProjectCatalog {
    pub fn new(config: &Config) -> Self {
        Self {
            endpoint: config.catalog.endpoint.clone(),
            api_key: config.catalog.api_key.clone(),
            cache_path: config.paths.project_cache_path(),
            freshness_minutes: config.catalog.freshness_minutes,
            match_threshold: config.catalog.match_threshold,
            fallback: config
                .fallback_projects
                .iter()
                .map(fallback_to_entry)
                .collect(),
            client: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    /// Whether the last successful snapshot was served from the fallback
    /// list rather than the remote source.
    pub fn is_degraded(&self) -> bool {
        self.cache
            .read()
            .unwrap()
            .as_ref()
            .map(|s| s.degraded)
            .unwrap_or(false)
    }

    /// Force a refresh on the next `resolve` call, bypassing the freshness
    /// window. Used by an explicit reload request.
    pub fn invalidate(&self) {
        *self.cache.write().unwrap() = None;
    }

    /// Resolve free text against the catalog. Returns `None` when no
    /// candidate clears the configured match threshold.
    pub async fn resolve(&self, query_text: &str) -> Result<Option<ProjectMatch>> {
        let projects = self.projects().await?;
        Ok(match_query(query_text, &projects, self.match_threshold))
    }

    /// Extract a project hint from the tail of a transcript body by scanning
    /// 1-5 token suffix windows, longest first, skipping tokens that equal
    /// one of `category_keywords` exactly. Returns the first window whose
    /// resolution clears the threshold.
    pub async fn extract_hint(
        &self,
        body: &str,
        category_keywords: &[&str],
    ) -> Result<Option<ProjectMatch>> {
        let tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(None);
        }
        let projects = self.projects().await?;

        for window_len in (1..=5.min(tokens.len())).rev() {
            let start = tokens.len() - window_len;
            let window = &tokens[start..];
            if window
                .iter()
                .any(|t| category_keywords.iter().any(|k| k.eq_ignore_ascii_case(strip_punct(t).as_str())))
            {
                continue;
            }
            let candidate: String = window
                .iter()
                .map(|t| strip_punct(t))
                .collect::<Vec<_>>()
                .join(" ");
            if candidate.trim().is_empty() {
                continue;
            }
            if let Some(m) = match_query(&candidate, &projects, self.match_threshold) {
                return Ok(Some(m));
            }
        }
        Ok(None)
    }

    async fn projects(&self) -> Result<Vec<ProjectEntry>> {
        if let Some(snapshot) = self.cache.read().unwrap().clone() {
            let age_minutes = (Utc::now() - snapshot.fetched_at).num_minutes();
            if age_minutes < self.freshness_minutes {
                return Ok(snapshot.projects);
            }
        }

        match self.fetch_remote().await {
            Ok(projects) => {
                let snapshot = CacheSnapshot {
                    fetched_at: Utc::now(),
                    projects: projects.clone(),
                    degraded: false,
                };
                self.persist_cache(&snapshot);
                *self.cache.write().unwrap() = Some(snapshot);
                Ok(projects)
            }
            Err(e) => {
                warn!("project catalog remote unreachable, using fallback list: {e}");
                if let Some(snapshot) = self.load_disk_cache() {
                    *self.cache.write().unwrap() = Some(snapshot.clone());
                    return Ok(snapshot.projects);
                }
                let snapshot = CacheSnapshot {
                    fetched_at: Utc::now(),
                    projects: self.fallback.clone(),
                    degraded: true,
                };
                *self.cache.write().unwrap() = Some(snapshot.clone());
                Ok(snapshot.projects)
            }
        }
    }

    async fn fetch_remote(&self) -> Result<Vec<ProjectEntry>> {
        #[derive(Deserialize)]
        struct ListResponse {
            projects: Vec<ProjectEntry>,
        }
        let resp = self
            .client
            .get(&self.endpoint)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CatalogError::RemoteUnreachable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(
                CatalogError::RemoteUnreachable(format!("status {}", resp.status())).into(),
            );
        }
        let parsed: ListResponse = resp
            .json()
            .await
            .map_err(|e| CatalogError::RemoteUnreachable(e.to_string()))?;
        Ok(parsed.projects)
    }

    fn load_disk_cache(&self) -> Option<CacheSnapshot> {
        let content = std::fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn persist_cache(&self, snapshot: &CacheSnapshot) {
        if let Some(parent) = self.cache_path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Ok(json) = serde_json::to_string_pretty(snapshot) {
            let tmp = self.cache_path.with_extension("json.tmp");
            if std::fs::write(&tmp, json).is_ok() {
                let _ = std::fs::rename(&tmp, &self.cache_path);
            }
        } else {
            debug!("failed to serialize project cache snapshot");
        }
    }
}

fn fallback_to_entry(p: &FallbackProject) -> ProjectEntry {
    ProjectEntry {
        id: p.id.clone(),
        canonical_name: p.canonical_name.clone(),
        aliases: p.aliases.clone(),
        status: "active".to_string(),
        archived: false,
    }
}

fn strip_punct(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

/// Case-fold, expand a small set of ordinal numerals, and collapse
/// whitespace, so "2nd Brain" and "second brain" compare equal.
fn normalize(text: &str) -> String {
    let numeral_pairs: &[(&str, &str)] = &[
        ("1st", "first"),
        ("2nd", "second"),
        ("3rd", "third"),
        ("4th", "fourth"),
        ("5th", "fifth"),
    ];
    let mut s = text.to_lowercase();
    for (digit, word) in numeral_pairs {
        s = s.replace(digit, word);
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
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
        .any(|w| w == needle_words.as_slice())
}

/// Levenshtein-distance-based similarity ratio in `[0.0, 1.0]`.
fn fuzzy_ratio(a: &str, b: &str) -> f32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (la, lb) = (a_chars.len(), b_chars.len());
    if la == 0 && lb == 0 {
        return 1.0;
    }
    if la == 0 || lb == 0 {
        return 0.0;
    }
    let mut prev: Vec<usize> = (0..=lb).collect();
    let mut curr = vec![0usize; lb + 1];
    for i in 1..=la {
        curr[0] = i;
        for j in 1..=lb {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let distance = prev[lb];
    1.0 - (distance as f32 / la.max(lb) as f32)
}

/// The ordered matching pipeline from SPEC §4.2: first success wins.
fn match_query(query: &str, projects: &[ProjectEntry], threshold: f32) -> Option<ProjectMatch> {
    let query_norm = normalize(query);
    if query_norm.is_empty() {
        return None;
    }

    // 1. Exact canonical match.
    for p in projects {
        if normalize(&p.canonical_name) == query_norm {
            return Some(ProjectMatch {
                project_id: p.id.clone(),
                confidence: 1.00,
                matched_text: p.canonical_name.clone(),
            });
        }
    }

    // 2. Exact alias match.
    for p in projects {
        for alias in &p.aliases {
            if normalize(alias) == query_norm {
                return Some(ProjectMatch {
                    project_id: p.id.clone(),
                    confidence: 0.95,
                    matched_text: alias.clone(),
                });
            }
        }
    }

    // 3. Substring canonical, whole-word, scaled by coverage.
    let mut best: Option<ProjectMatch> = None;
    for p in projects {
        let canon_norm = normalize(&p.canonical_name);
        if contains_whole_word(&canon_norm, &query_norm) || contains_whole_word(&query_norm, &canon_norm) {
            let coverage = query_norm.len().min(canon_norm.len()) as f32
                / query_norm.len().max(canon_norm.len()) as f32;
            let confidence = 0.85 + 0.05 * coverage;
            let candidate = ProjectMatch {
                project_id: p.id.clone(),
                confidence,
                matched_text: p.canonical_name.clone(),
            };
            if best.as_ref().map(|b| candidate.confidence > b.confidence).unwrap_or(true) {
                best = Some(candidate);
            }
        }
    }
    if let Some(m) = best.filter(|m| m.confidence >= threshold) {
        return Some(m);
    }

    // 4. Substring alias, whole-word, scaled by coverage.
    let mut best: Option<ProjectMatch> = None;
    for p in projects {
        for alias in &p.aliases {
            let alias_norm = normalize(alias);
            if contains_whole_word(&alias_norm, &query_norm) || contains_whole_word(&query_norm, &alias_norm) {
                let coverage = query_norm.len().min(alias_norm.len()) as f32
                    / query_norm.len().max(alias_norm.len()) as f32;
                let confidence = 0.75 + 0.10 * coverage;
                let candidate = ProjectMatch {
                    project_id: p.id.clone(),
                    confidence,
                    matched_text: alias.clone(),
                };
                if best.as_ref().map(|b| candidate.confidence > b.confidence).unwrap_or(true) {
                    best = Some(candidate);
                }
            }
        }
    }
    if let Some(m) = best.filter(|m| m.confidence >= threshold) {
        return Some(m);
    }

    // 5. Normalized fuzzy ratio.
    let mut best: Option<ProjectMatch> = None;
    for p in projects {
        let canon_norm = normalize(&p.canonical_name);
        let ratio = fuzzy_ratio(&query_norm, &canon_norm);
        if ratio >= 0.70 {
            let candidate = ProjectMatch {
                project_id: p.id.clone(),
                confidence: ratio,
                matched_text: p.canonical_name.clone(),
            };
            if best.as_ref().map(|b| candidate.confidence > b.confidence).unwrap_or(true) {
                best = Some(candidate);
            }
        }
    }

    best.filter(|m| m.confidence >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_projects() -> Vec<ProjectEntry> {
        vec![
            ProjectEntry {
                id: "proj-1".to_string(),
                canonical_name: "Epic 2nd Brain Workflow".to_string(),
                aliases: vec!["Second Brain workflow".to_string()],
                status: "active".to_string(),
                archived: false,
            },
            ProjectEntry {
                id: "proj-2".to_string(),
                canonical_name: "Home Renovation".to_string(),
                aliases: vec!["house reno".to_string()],
                status: "active".to_string(),
                archived: false,
            },
        ]
    }

    #[test]
    fn test_exact_canonical_match() {
        let projects = sample_projects();
        let m = match_query("Epic 2nd Brain Workflow", &projects, 0.80).unwrap();
        assert_eq!(m.project_id, "proj-1");
        assert_eq!(m.confidence, 1.00);
    }

    #[test]
    fn test_alias_match_with_numeral_normalization() {
        let projects = sample_projects();
        let m = match_query("Second Brain workflow", &projects, 0.80).unwrap();
        assert_eq!(m.project_id, "proj-1");
        assert!(m.confidence >= 0.95);
    }

    #[test]
    fn test_below_threshold_returns_none() {
        let projects = sample_projects();
        assert!(match_query("completely unrelated text", &projects, 0.80).is_none());
    }

    #[test]
    fn test_substring_alias_whole_word_only() {
        let projects = sample_projects();
        // "reno" alone should not match "house reno" (not whole-word boundary).
        assert!(match_query("reno", &projects, 0.80).is_none());
        let m = match_query("house reno", &projects, 0.80).unwrap();
        assert_eq!(m.project_id, "proj-2");
    }
}
