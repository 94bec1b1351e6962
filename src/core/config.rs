//! Typed, hierarchical configuration for the recall pipeline (C1).
//!
//! Precedence, highest wins: explicit environment override
//! (`UPPER_SNAKE_CASE` of the dotted key) > merged configuration files >
//! built-in defaults. `get`/`require` additionally expose a dotted-key view
//! over the whole tree for callers (analyzers, router) that want to read a
//! single scalar without a dedicated accessor per field.

use crate::core::error::ConfigError;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level configuration, merged from `settings.toml` (plus the sibling
/// pattern/rule files in the same directory) layered over built-in
/// defaults, then overlaid with environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub record_store: RecordStoreConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub resource_monitor: ResourceMonitorConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Prompt templates, loaded from `prompts/*.txt` (file stem -> content).
    /// Not part of the dotted-key/env-override view.
    #[serde(skip)]
    pub prompts: HashMap<String, String>,

    /// Built-in project list used when the catalog's remote source is
    /// unreachable (degraded mode). Loaded from `projects.toml`.
    #[serde(skip)]
    pub fallback_projects: Vec<FallbackProject>,

    /// Pattern lists for tag matching, loaded from `tag_patterns.toml`.
    #[serde(skip)]
    pub tag_patterns: TagPatterns,

    /// Ordered keyword -> glyph entries, loaded from `icons.toml`. Ordered
    /// longest-phrase-first by the loader so the router can match in a
    /// single pass.
    #[serde(skip)]
    pub icon_map: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackProject {
    pub id: String,
    pub canonical_name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagPatterns {
    #[serde(default)]
    pub communications: Vec<String>,
    #[serde(default)]
    pub needs_external_input: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_usb_path")]
    pub usb_path: PathBuf,
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            usb_path: default_usb_path(),
            audio_extension: default_audio_extension(),
            project_root: default_project_root(),
        }
    }
}

impl PathsConfig {
    pub fn transcripts_dir(&self) -> PathBuf {
        self.project_root.join("transcripts")
    }
    pub fn processed_dir(&self) -> PathBuf {
        self.project_root.join("processed")
    }
    pub fn archive_dir(&self) -> PathBuf {
        self.project_root.join("Recording Archives")
    }
    pub fn failed_dir(&self) -> PathBuf {
        self.project_root.join("Failed")
    }
    pub fn cache_dir(&self) -> PathBuf {
        self.project_root.join(".cache")
    }
    pub fn logs_dir(&self) -> PathBuf {
        self.project_root.join("logs")
    }
    pub fn session_state_path(&self) -> PathBuf {
        self.cache_dir().join("session_state.json")
    }
    pub fn project_cache_path(&self) -> PathBuf {
        self.cache_dir().join("project_cache.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Ordered backend names, e.g. `["cloud", "local"]`. `"auto"` expands to
    /// all available backends in cloud-first order.
    #[serde(default = "default_backend_order")]
    pub backend_order: Vec<String>,
    #[serde(default = "default_cloud_endpoint")]
    pub cloud_endpoint: String,
    #[serde(default)]
    pub cloud_api_key: String,
    #[serde(default = "default_cloud_size_limit")]
    pub cloud_max_bytes: u64,
    #[serde(default = "default_local_command")]
    pub local_command: String,
    #[serde(default = "default_min_duration_secs")]
    pub min_duration_secs: f64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend_order: default_backend_order(),
            cloud_endpoint: default_cloud_endpoint(),
            cloud_api_key: String::new(),
            cloud_max_bytes: default_cloud_size_limit(),
            local_command: default_local_command(),
            min_duration_secs: default_min_duration_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_note_word_threshold")]
    pub note_word_threshold: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: String::new(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            note_word_threshold: default_note_word_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    #[serde(default = "default_record_store_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_block_size_limit")]
    pub block_size_limit: usize,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_record_store_endpoint(),
            api_key: String::new(),
            block_size_limit: default_block_size_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_freshness_minutes")]
    pub freshness_minutes: i64,
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            endpoint: default_catalog_endpoint(),
            api_key: String::new(),
            freshness_minutes: default_freshness_minutes(),
            match_threshold: default_match_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default = "default_max_transcript_bytes")]
    pub max_transcript_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_transcript_bytes: default_max_transcript_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_quick_max_minutes")]
    pub quick_max_minutes: u32,
    #[serde(default = "default_medium_max_minutes")]
    pub medium_max_minutes: u32,
    #[serde(default = "default_icon_fallback")]
    pub icon_fallback: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            quick_max_minutes: default_quick_max_minutes(),
            medium_max_minutes: default_medium_max_minutes(),
            icon_fallback: default_icon_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMonitorConfig {
    #[serde(default = "default_cpu_soft_cap")]
    pub cpu_soft_cap_percent: f32,
    #[serde(default = "default_disk_floor_mb")]
    pub disk_floor_mb: u64,
}

impl Default for ResourceMonitorConfig {
    fn default() -> Self {
        Self {
            cpu_soft_cap_percent: default_cpu_soft_cap(),
            disk_floor_mb: default_disk_floor_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_s3_workers")]
    pub s3_workers: usize,
    #[serde(default = "default_s3_batch_minutes")]
    pub s3_batch_minutes: f64,
    #[serde(default = "default_s4_parallelism")]
    pub s4_parallelism: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            s3_workers: default_s3_workers(),
            s3_batch_minutes: default_s3_batch_minutes(),
            s4_parallelism: default_s4_parallelism(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub archive_retention_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            archive_retention_days: default_retention_days(),
        }
    }
}

// Default value functions.
fn default_usb_path() -> PathBuf {
    PathBuf::from("/media/recorder")
}
fn default_audio_extension() -> String {
    "wav".to_string()
}
fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_backend_order() -> Vec<String> {
    vec!["cloud".to_string(), "local".to_string()]
}
fn default_cloud_endpoint() -> String {
    "https://api.example.com/v1/transcribe".to_string()
}
fn default_cloud_size_limit() -> u64 {
    25 * 1024 * 1024
}
fn default_local_command() -> String {
    "whisper".to_string()
}
fn default_min_duration_secs() -> f64 {
    2.0
}
fn default_llm_endpoint() -> String {
    "https://api.example.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_max_tokens() -> u32 {
    1024
}
fn default_note_word_threshold() -> usize {
    800
}
fn default_record_store_endpoint() -> String {
    "https://api.example.com/v1/records".to_string()
}
fn default_block_size_limit() -> usize {
    2000
}
fn default_catalog_endpoint() -> String {
    "https://api.example.com/v1/projects".to_string()
}
fn default_freshness_minutes() -> i64 {
    60
}
fn default_match_threshold() -> f32 {
    0.80
}
fn default_max_transcript_bytes() -> usize {
    200_000
}
fn default_quick_max_minutes() -> u32 {
    2
}
fn default_medium_max_minutes() -> u32 {
    30
}
fn default_icon_fallback() -> String {
    "\u{1F4C4}".to_string() // page facing up
}
fn default_cpu_soft_cap() -> f32 {
    70.0
}
fn default_disk_floor_mb() -> u64 {
    100
}
fn default_s3_workers() -> usize {
    3
}
fn default_s3_batch_minutes() -> f64 {
    7.0
}
fn default_s4_parallelism() -> usize {
    1
}
fn default_retention_days() -> i64 {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            transcription: TranscriptionConfig::default(),
            llm: LlmConfig::default(),
            record_store: RecordStoreConfig::default(),
            catalog: CatalogConfig::default(),
            parser: ParserConfig::default(),
            router: RouterConfig::default(),
            resource_monitor: ResourceMonitorConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            retention: RetentionConfig::default(),
            prompts: HashMap::new(),
            fallback_projects: Vec::new(),
            tag_patterns: TagPatterns::default(),
            icon_map: Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and merge a configuration directory: `settings.toml` over the
    /// built-in defaults, plus the sibling pattern/rule/prompt files.
    /// Missing files fall back to defaults/empty collections; a malformed
    /// present file is a hard parse error.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut config = Self::default();

        let settings_path = dir.join("settings.toml");
        if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            config = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        }

        let projects_path = dir.join("projects.toml");
        if projects_path.exists() {
            let content = std::fs::read_to_string(&projects_path)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            #[derive(Deserialize)]
            struct ProjectsFile {
                #[serde(default)]
                projects: Vec<FallbackProject>,
            }
            let parsed: ProjectsFile =
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.fallback_projects = parsed.projects;
        }

        let tags_path = dir.join("tag_patterns.toml");
        if tags_path.exists() {
            let content = std::fs::read_to_string(&tags_path)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            config.tag_patterns =
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        }

        let icons_path = dir.join("icons.toml");
        if icons_path.exists() {
            let content = std::fs::read_to_string(&icons_path)
                .map_err(|e| ConfigError::Load(e.to_string()))?;
            #[derive(Deserialize)]
            struct IconsFile {
                #[serde(default)]
                icons: HashMap<String, String>,
            }
            let parsed: IconsFile =
                toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
            let mut entries: Vec<(String, String)> = parsed.icons.into_iter().collect();
            // Longest phrase first so the router's single-pass scan prefers
            // the most specific match.
            entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
            config.icon_map = entries;
        }

        let prompts_dir = dir.join("prompts");
        if prompts_dir.is_dir() {
            for entry in std::fs::read_dir(&prompts_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        let content = std::fs::read_to_string(&path)
                            .map_err(|e| ConfigError::Load(e.to_string()))?;
                        config.prompts.insert(stem.to_string(), content);
                    }
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.record_store.block_size_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "record_store.block_size_limit must be greater than zero".to_string(),
            )
            .into());
        }
        if self.catalog.match_threshold < 0.0 || self.catalog.match_threshold > 1.0 {
            return Err(ConfigError::InvalidValue(
                "catalog.match_threshold must be in [0.0, 1.0]".to_string(),
            )
            .into());
        }
        if self.concurrency.s3_workers == 0 {
            return Err(ConfigError::InvalidValue(
                "concurrency.s3_workers must be at least 1".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Flatten the typed config into a dotted-key JSON view, with any
    /// matching `UPPER_SNAKE_CASE` environment variable overlaid on top.
    /// This is rebuilt on each call so a test can mutate `std::env` and
    /// observe the new precedence without reloading files (R1).
    fn dotted_view(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        apply_env_overlay(&mut value, String::new());
        value
    }

    /// Read a dotted key (e.g. `"transcription.cloud_max_bytes"`), returning
    /// `default` if absent or of the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_opt(key).unwrap_or(default)
    }

    /// Read a dotted key, returning `None` if absent or unparsable.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let view = self.dotted_view();
        let mut cursor = &view;
        for part in key.split('.') {
            cursor = cursor.get(part)?;
        }
        serde_json::from_value(cursor.clone()).ok()
    }

    /// Read a required dotted key, failing fast if it is absent.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_opt(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()).into())
    }
}

/// Walk a JSON tree, overlaying any leaf whose dotted path has a matching
/// `UPPER_SNAKE_CASE` environment variable.
fn apply_env_overlay(value: &mut serde_json::Value, prefix: String) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let child_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                apply_env_overlay(child, child_prefix);
            }
        }
        leaf => {
            let env_key = prefix.to_uppercase().replace('.', "_");
            if let Ok(raw) = std::env::var(&env_key) {
                *leaf = coerce_env_value(leaf, &raw);
            }
        }
    }
}

fn coerce_env_value(existing: &serde_json::Value, raw: &str) -> serde_json::Value {
    match existing {
        serde_json::Value::Bool(_) => raw
            .parse::<bool>()
            .map(serde_json::Value::Bool)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string())),
        serde_json::Value::Number(existing_num) => {
            let is_integral = existing_num.is_i64() || existing_num.is_u64();
            if is_integral {
                if let Ok(i) = raw.parse::<i64>() {
                    return serde_json::Value::Number(serde_json::Number::from(i));
                }
                if let Ok(u) = raw.parse::<u64>() {
                    return serde_json::Value::Number(serde_json::Number::from(u));
                }
            }
            raw.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or_else(|| serde_json::Value::String(raw.to_string()))
        }
        _ => serde_json::Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation must be serialized across tests in this
    // module since `std::env` is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = Config::new();
        assert_eq!(config.concurrency.s3_workers, 3);
        assert_eq!(config.catalog.match_threshold, 0.80);
        assert_eq!(config.record_store.block_size_limit, 2000);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::new();
        config.catalog.match_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dotted_get_and_require() {
        let config = Config::new();
        let workers: usize = config.get("concurrency.s3_workers", 0);
        assert_eq!(workers, 3);

        let missing: Option<String> = config.get_opt("nonexistent.key");
        assert!(missing.is_none());

        assert!(config.require::<usize>("concurrency.s3_workers").is_ok());
        assert!(config.require::<usize>("nonexistent.key").is_err());
    }

    #[test]
    fn test_env_override_precedence_and_restore() {
        let _guard = ENV_LOCK.lock().unwrap();
        let config = Config::new();
        assert_eq!(config.get::<usize>("concurrency.s3_workers", 0), 3);

        std::env::set_var("CONCURRENCY_S3_WORKERS", "9");
        assert_eq!(config.get::<usize>("concurrency.s3_workers", 0), 9);

        std::env::remove_var("CONCURRENCY_S3_WORKERS");
        assert_eq!(config.get::<usize>("concurrency.s3_workers", 0), 3);
    }

    #[test]
    fn test_load_missing_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.concurrency.s3_workers, 3);
        assert!(config.fallback_projects.is_empty());
    }

    #[test]
    fn test_load_merges_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.toml"),
            "[concurrency]\ns3_workers = 5\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.concurrency.s3_workers, 5);
    }
}
