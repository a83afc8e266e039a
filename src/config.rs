//! TOML configuration parsing and validation.
//!
//! The configuration is loaded once at process start and passed explicitly
//! into the pipeline, provider, and server. Values come from three layers,
//! later layers winning:
//!
//! 1. built-in defaults ([`Config::minimal`]),
//! 2. the TOML file given with `--config`,
//! 3. environment overrides ([`apply_env_overrides`]).
//!
//! ```toml
//! [provider]
//! api_key_env = "GEMINI_API_KEY"
//! model = "models/gemini-1.5-flash-001"
//!
//! [source]
//! url = "https://example.com/guide.pdf"
//! display_name = "The Founder's Guide to UK"
//!
//! [cache]
//! ttl_secs = 600
//!
//! [poll]
//! interval_ms = 2000
//!
//! [server]
//! bind = "127.0.0.1:3000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::poll::PollPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Resolved key. Never read from the file; filled from `api_key_env`.
    #[serde(skip)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}
fn default_model() -> String {
    "models/gemini-1.5-flash-001".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Overrides MIME type detection.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Directory receiving the local copy of a downloaded document.
    #[serde(default = "default_local_copy_dir")]
    pub local_copy_dir: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            url: None,
            display_name: default_display_name(),
            mime_type: None,
            local_copy_dir: default_local_copy_dir(),
        }
    }
}

fn default_display_name() -> String {
    "The Founder's Guide to UK".to_string()
}
fn default_local_copy_dir() -> PathBuf {
    PathBuf::from("public")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Replaces the built-in system instruction for this deployment.
    #[serde(default)]
    pub system_instruction: Option<String>,
    /// Reuse a live cache when the same document is ingested again.
    #[serde(default)]
    pub reuse_by_content_hash: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            system_instruction: None,
            reuse_by_content_hash: false,
        }
    }
}

fn default_ttl_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub max_elapsed_secs: Option<u64>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            backoff: default_backoff(),
            max_interval_ms: default_max_interval_ms(),
            max_attempts: None,
            max_elapsed_secs: None,
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}
fn default_backoff() -> f64 {
    1.0
}
fn default_max_interval_ms() -> u64 {
    30_000
}

impl PollConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.interval_ms),
            backoff: self.backoff,
            max_interval: Duration::from_millis(self.max_interval_ms),
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Config {
    /// All defaults, no source configured.
    pub fn minimal() -> Self {
        Self {
            provider: ProviderConfig::default(),
            source: SourceConfig::default(),
            cache: CacheConfig::default(),
            poll: PollConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Load, overlay environment variables, and validate.
///
/// A missing file is not an error: the defaults plus environment overrides
/// are used instead, so a deployment can be configured from the
/// environment alone.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = read_config(path)?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`] without [`validate`], for callers that need no
/// source document (a chat client of a remote server). A file that exists
/// but cannot be read or parsed is still an error.
pub fn read_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::minimal()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Apply environment overrides through `lookup` (injected for tests).
///
/// - `{provider.api_key_env}` → `provider.api_key`
/// - `PDF_URL` → `source.url` (clears `source.path`)
/// - `SOURCE_PATH` → `source.path` (clears `source.url`)
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup(&config.provider.api_key_env) {
        config.provider.api_key = key;
    }
    if let Some(url) = lookup("PDF_URL").filter(|u| !u.is_empty()) {
        config.source.url = Some(url);
        config.source.path = None;
    }
    if let Some(path) = lookup("SOURCE_PATH").filter(|p| !p.is_empty()) {
        config.source.path = Some(PathBuf::from(path));
        config.source.url = None;
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate source
    match (&config.source.path, &config.source.url) {
        (Some(_), Some(_)) => anyhow::bail!("source.path and source.url are mutually exclusive"),
        (None, None) => anyhow::bail!(
            "no source document configured: set source.path or source.url (or PDF_URL)"
        ),
        _ => {}
    }
    if config.source.display_name.trim().is_empty() {
        anyhow::bail!("source.display_name must not be empty");
    }

    // Validate cache
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if let Some(instruction) = &config.cache.system_instruction {
        if instruction.trim().is_empty() {
            anyhow::bail!("cache.system_instruction must not be empty when set");
        }
    }

    // Validate poll
    if config.poll.interval_ms == 0 {
        anyhow::bail!("poll.interval_ms must be > 0");
    }
    if config.poll.backoff < 1.0 {
        anyhow::bail!("poll.backoff must be >= 1.0");
    }
    if config.poll.max_interval_ms < config.poll.interval_ms {
        anyhow::bail!("poll.max_interval_ms must be >= poll.interval_ms");
    }

    if config.chat.max_chars == 0 {
        anyhow::bail!("chat.max_chars must be > 0");
    }
    if config.provider.model.trim().is_empty() {
        anyhow::bail!("provider.model must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn defaults_match_observed_deployment() {
        let cfg = parse("[source]\nurl = \"https://example.com/guide.pdf\"\n");
        assert_eq!(cfg.provider.model, "models/gemini-1.5-flash-001");
        assert_eq!(cfg.cache.ttl_secs, 600);
        assert_eq!(cfg.poll.interval_ms, 2000);
        assert_eq!(cfg.poll.backoff, 1.0);
        assert_eq!(cfg.poll.max_attempts, None);
        assert_eq!(cfg.chat.max_chars, 2000);
        assert!(!cfg.cache.reuse_by_content_hash);
        validate(&cfg).unwrap();
    }

    #[test]
    fn api_key_is_not_read_from_file() {
        let cfg = parse("[provider]\napi_key = \"leaked\"\n[source]\npath = \"a.txt\"\n");
        assert_eq!(cfg.provider.api_key, "");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = parse("[source]\npath = \"public/file.txt\"\n");
        let env: HashMap<&str, &str> = [
            ("GEMINI_API_KEY", "secret"),
            ("PDF_URL", "https://example.com/g.pdf"),
        ]
        .into_iter()
        .collect();
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.provider.api_key, "secret");
        assert_eq!(cfg.source.url.as_deref(), Some("https://example.com/g.pdf"));
        assert!(cfg.source.path.is_none());
        validate(&cfg).unwrap();
    }

    #[test]
    fn custom_api_key_env() {
        let mut cfg = parse("[provider]\napi_key_env = \"MY_KEY\"\n[source]\npath = \"a.txt\"\n");
        apply_env_overrides(&mut cfg, |k| (k == "MY_KEY").then(|| "k".to_string()));
        assert_eq!(cfg.provider.api_key, "k");
    }

    #[test]
    fn rejects_missing_source() {
        let err = validate(&Config::minimal()).unwrap_err();
        assert!(err.to_string().contains("no source document"));
    }

    #[test]
    fn rejects_both_sources() {
        let cfg = parse("[source]\npath = \"a.txt\"\nurl = \"https://x\"\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_bad_poll_and_ttl() {
        let cfg = parse("[source]\npath = \"a.txt\"\n[poll]\ninterval_ms = 0\n");
        assert!(validate(&cfg).is_err());
        let cfg = parse("[source]\npath = \"a.txt\"\n[poll]\nbackoff = 0.5\n");
        assert!(validate(&cfg).is_err());
        let cfg = parse("[source]\npath = \"a.txt\"\n[cache]\nttl_secs = 0\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn poll_policy_from_config() {
        let cfg = parse(
            "[source]\npath = \"a.txt\"\n[poll]\ninterval_ms = 500\nmax_attempts = 4\nmax_elapsed_secs = 9\n",
        );
        let policy = cfg.poll.policy();
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.max_attempts, Some(4));
        assert_eq!(policy.max_elapsed, Some(Duration::from_secs(9)));
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse(include_str!("../config/cchat.example.toml"));
        validate(&cfg).unwrap();
        assert_eq!(cfg.poll.policy(), PollPolicy::default());
    }

    #[test]
    fn read_config_skips_source_validation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cchat.toml");
        std::fs::write(&path, "[chat]\nmax_chars = 500\n").unwrap();
        let cfg = read_config(&path).unwrap();
        assert_eq!(cfg.chat.max_chars, 500);
        assert!(read_config(&tmp.path().join("absent.toml")).is_ok());
    }

    #[test]
    fn read_config_rejects_malformed_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cchat.toml");
        std::fs::write(&path, "[chat\nmax_chars = \"many\"\n").unwrap();
        let err = read_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("cchat.toml");
        std::fs::write(
            &path,
            "[source]\npath = \"doc.txt\"\nmime_type = \"text/plain\"\n[server]\nbind = \"0.0.0.0:9\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:9");
        assert_eq!(cfg.source.mime_type.as_deref(), Some("text/plain"));
    }
}
