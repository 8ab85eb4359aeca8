use crate::error::{GatewayError, Result};
use crate::registry::ProviderKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::Path;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8082";
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_BIG_MODEL: &str = "gpt-4.1";
const DEFAULT_SMALL_MODEL: &str = "gpt-4.1-mini";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub aliases: AliasConfig,

    /// Provider id -> provider settings. The id doubles as the model prefix (`openai/gpt-4.1`).
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub presets: BTreeMap<String, PresetConfig>,

    #[serde(default)]
    pub forward: ForwardConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Ceiling for one upstream call, in seconds
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// When false every `/v1/messages` call is relayed untouched to Anthropic
    #[serde(default = "default_true")]
    pub routing_enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AliasConfig {
    #[serde(rename = "super", default, skip_serializing_if = "Option::is_none")]
    pub super_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(alias = "dialect")]
    pub kind: ProviderKind,

    /// Falls back to the kind's public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Falls back to the kind's built-in model list when empty
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PresetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "super", default, skip_serializing_if = "Option::is_none")]
    pub super_model: Option<String>,
    pub big: String,
    pub small: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    #[serde(default = "default_forward_base_url")]
    pub base_url: String,

    #[serde(default = "default_forward_key_env")]
    pub api_key_env: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_forward_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_forward_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    [ProviderKind::OpenAi, ProviderKind::Gemini, ProviderKind::Anthropic]
        .into_iter()
        .map(|kind| {
            (
                kind.as_str().to_string(),
                ProviderConfig {
                    kind,
                    base_url: None,
                    api_key_env: Some(kind.default_key_env().to_string()),
                    api_key: None,
                    models: Vec::new(),
                },
            )
        })
        .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_timeout_secs(),
            routing_enabled: true,
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            base_url: default_forward_base_url(),
            api_key_env: default_forward_key_env(),
            api_key: None,
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.kind.default_base_url().to_string())
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the default configuration, reading variables through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = GatewayConfig {
            server: ServerConfig::default(),
            aliases: AliasConfig {
                super_model: None,
                big: Some(DEFAULT_BIG_MODEL.to_string()),
                small: Some(DEFAULT_SMALL_MODEL.to_string()),
            },
            providers: default_providers(),
            presets: BTreeMap::new(),
            forward: ForwardConfig::default(),
        };

        if let Some(addr) = lookup("GATEWAY_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }

        if let Some(timeout) = lookup("GATEWAY_TIMEOUT_SECS") {
            config.server.request_timeout_secs = timeout
                .parse::<u64>()
                .map_err(|e| GatewayError::Config(format!("Invalid timeout value: {}", e)))?;
        }

        if let Some(enabled) = lookup("PROXY_SERVER_ENABLED") {
            config.server.routing_enabled = parse_flag(&enabled)?;
        }

        if let Some(base_url) = lookup("OPENAI_BASE_URL")
            && let Some(openai) = config.providers.get_mut(ProviderKind::OpenAi.as_str())
        {
            openai.base_url = Some(base_url);
        }

        config.apply_env_overrides(&lookup);
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides(&|key: &str| env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Alias variables win over file values; credentials come from each provider's key variable
    pub fn apply_env_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("SUPER_MODEL") {
            self.aliases.super_model = Some(model);
        }
        if let Some(model) = non_empty("BIG_MODEL") {
            self.aliases.big = Some(model);
        }
        if let Some(model) = non_empty("SMALL_MODEL") {
            self.aliases.small = Some(model);
        }

        for (id, provider) in self.providers.iter_mut() {
            if provider.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
                continue;
            }
            let key_env = provider
                .api_key_env
                .clone()
                .unwrap_or_else(|| provider.kind.default_key_env().to_string());
            provider.api_key = non_empty(&key_env);
            if provider.api_key.is_none() {
                tracing::debug!(provider = %id, env = %key_env, "No credential found for provider");
            }
        }

        if self.forward.api_key.as_deref().is_none_or(str::is_empty) {
            self.forward.api_key = non_empty(&self.forward.api_key_env);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(GatewayError::Config("Listen address is empty".to_string()));
        }

        if self.server.request_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.providers.is_empty() {
            return Err(GatewayError::Config("No providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        for (id, provider) in &self.providers {
            if id.is_empty() || id.contains('/') {
                return Err(GatewayError::Config(format!("Invalid provider id '{}'", id)));
            }
            if !seen.insert(id.to_lowercase()) {
                return Err(GatewayError::Config(format!("Duplicate provider id '{}'", id)));
            }
            if provider.base_url.as_deref().is_some_and(str::is_empty) {
                return Err(GatewayError::Config(format!(
                    "Provider '{}' has an empty base_url",
                    id
                )));
            }
        }

        if self.forward.base_url.is_empty() {
            return Err(GatewayError::Config("Forward base_url is empty".to_string()));
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(GatewayError::Config(format!("Invalid boolean flag: {}", other))),
    }
}
