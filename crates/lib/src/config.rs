//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.larkops/config.json`) and environment.
//! Covers cluster settings, the Lark communication endpoint, and the external executor.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Cluster settings (name, kubectl gating).
    #[serde(default)]
    pub settings: Settings,

    /// Communication settings (Lark credentials and listener endpoint).
    #[serde(default)]
    pub communications: CommunicationsConfig,

    /// External command-execution engine settings.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Cluster-level settings the executor receives with every command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Cluster name included in executor invocations (e.g. "prod-eu-1").
    #[serde(default)]
    pub cluster_name: String,

    /// kubectl enablement and access restriction.
    #[serde(default)]
    pub kubectl: KubectlConfig,
}

/// kubectl gating flags passed through to the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubectlConfig {
    /// When false, the executor refuses kubectl commands.
    #[serde(default)]
    pub enabled: bool,

    /// When true, the executor restricts commands to the configured channel/users.
    #[serde(default)]
    pub restrict_access: bool,

    /// Namespace used when a command does not name one.
    #[serde(default = "default_namespace")]
    pub default_namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Default for KubectlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            restrict_access: false,
            default_namespace: default_namespace(),
        }
    }
}

/// Per-platform communication config. Only Lark for now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationsConfig {
    #[serde(default)]
    pub lark: LarkConfig,
}

/// Lark app credentials and listener endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LarkConfig {
    /// App ID from the Lark developer console. Overridden by LARKOPS_APP_ID env when set.
    pub app_id: Option<String>,

    /// App secret used to obtain tenant access tokens. Overridden by LARKOPS_APP_SECRET env.
    pub app_secret: Option<String>,

    /// Verification token the platform includes in every callback. When set,
    /// callbacks with a different token are rejected. Overridden by LARKOPS_VERIFICATION_TOKEN env.
    pub verification_token: Option<String>,

    /// Open API endpoint (default "https://open.larksuite.com").
    #[serde(default = "default_lark_endpoint")]
    pub endpoint: String,

    /// Bind address for the callback listener (default "0.0.0.0").
    #[serde(default = "default_lark_bind")]
    pub bind: String,

    /// Port for the callback listener (default 9090).
    #[serde(default = "default_lark_port")]
    pub port: u16,

    /// HTTP path the platform POSTs event callbacks to (default "/bot/lark").
    #[serde(default = "default_message_path")]
    pub message_path: String,
}

fn default_lark_endpoint() -> String {
    "https://open.larksuite.com".to_string()
}

fn default_lark_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_lark_port() -> u16 {
    9090
}

fn default_message_path() -> String {
    "/bot/lark".to_string()
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            verification_token: None,
            endpoint: default_lark_endpoint(),
            bind: default_lark_bind(),
            port: default_lark_port(),
            message_path: default_message_path(),
        }
    }
}

/// External command-execution engine (a separate binary the bot shells out to).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Path to the executor binary. When unset, the bot replies that no
    /// executor is configured instead of running commands.
    pub command: Option<PathBuf>,

    /// Extra arguments prepended before the per-command flags.
    #[serde(default)]
    pub args: Vec<String>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Lark app id: env LARKOPS_APP_ID overrides config.
pub fn resolve_app_id(config: &Config) -> Option<String> {
    env_value("LARKOPS_APP_ID").or_else(|| {
        config
            .communications
            .lark
            .app_id
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the Lark app secret: env LARKOPS_APP_SECRET overrides config.
pub fn resolve_app_secret(config: &Config) -> Option<String> {
    env_value("LARKOPS_APP_SECRET").or_else(|| {
        config
            .communications
            .lark
            .app_secret
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve the callback verification token: env LARKOPS_VERIFICATION_TOKEN overrides config.
pub fn resolve_verification_token(config: &Config) -> Option<String> {
    env_value("LARKOPS_VERIFICATION_TOKEN").or_else(|| {
        config
            .communications
            .lark
            .verification_token
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LARKOPS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".larkops").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or LARKOPS_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
