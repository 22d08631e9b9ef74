use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::ConnectorKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Sync scopes keyed by scope id. A scope binds a connected account and
    /// a selection configuration to one connector kind.
    #[serde(default)]
    pub scopes: BTreeMap<String, ScopeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Policy knobs for the job ledger and orchestrator.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Runs allowed per job before it moves to dead_letter.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Items processed between stats writes (the final item always reports).
    #[serde(default = "default_stats_every")]
    pub stats_every: u64,
    /// Seconds without a stats update before a running run is considered
    /// stale and eligible for `ksync sweep`.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
    /// Smoothing factor for the items/second moving average behind ETA.
    #[serde(default = "default_eta_alpha")]
    pub eta_alpha: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stats_every: default_stats_every(),
            stale_after_secs: default_stale_after_secs(),
            eta_alpha: default_eta_alpha(),
        }
    }
}

fn default_max_attempts() -> i64 {
    3
}
fn default_stats_every() -> u64 {
    25
}
fn default_stale_after_secs() -> i64 {
    300
}
fn default_eta_alpha() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
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
    "127.0.0.1:7431".to_string()
}

/// One sync scope: a connected account plus a selection configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct ScopeConfig {
    /// Connector kind handling this scope (`upload`, `drive`, ...).
    pub connector: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Reference to the connected account; recorded in source metadata.
    #[serde(default = "default_account")]
    pub account: String,
    /// Owning user, when known.
    #[serde(default)]
    pub owner: Option<String>,
    /// Upload connector: directory to walk.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_workspace() -> String {
    "default".to_string()
}
fn default_account() -> String {
    "local".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

impl ScopeConfig {
    pub fn connector_kind(&self) -> Result<ConnectorKind> {
        ConnectorKind::parse(&self.connector).with_context(|| {
            format!(
                "unknown connector kind '{}' (expected upload, drive, confluence, jira, slack)",
                self.connector
            )
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    Ok(config)
}

impl Config {
    pub fn scope(&self, scope_id: &str) -> Result<&ScopeConfig> {
        self.scopes
            .get(scope_id)
            .with_context(|| format!("scope '{}' is not configured", scope_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
[db]
path = "/tmp/ks.sqlite"

[sync]
max_attempts = 5
stale_after_secs = 120

[chunking]
max_tokens = 400

[server]
bind = "0.0.0.0:9000"

[scopes.docs]
connector = "upload"
workspace = "acme"
account = "local"
root = "/srv/docs"
include_globs = ["**/*.md"]
"#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert_eq!(cfg.sync.max_attempts, 5);
        assert_eq!(cfg.sync.stale_after_secs, 120);
        assert_eq!(cfg.sync.stats_every, 25);
        assert_eq!(cfg.chunking.max_tokens, 400);
        let scope = cfg.scope("docs").unwrap();
        assert_eq!(scope.connector_kind().unwrap().as_str(), "upload");
        assert_eq!(scope.workspace, "acme");
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let cfg: Config = toml::from_str("[db]\npath = \"/tmp/ks.sqlite\"\n").unwrap();
        assert_eq!(cfg.sync.max_attempts, 3);
        assert_eq!(cfg.chunking.max_tokens, 700);
        assert!(cfg.scopes.is_empty());
        assert!(cfg.scope("missing").is_err());
    }

    #[test]
    fn rejects_unknown_connector_kind() {
        let raw = r#"
[db]
path = "/tmp/ks.sqlite"

[scopes.bad]
connector = "ftp"
"#;
        let cfg: Config = toml::from_str(raw).unwrap();
        assert!(cfg.scope("bad").unwrap().connector_kind().is_err());
    }
}
