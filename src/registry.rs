//! Known providers, their models, and the process-wide alias table.
//!
//! The alias table is published through [`ArcSwap`]: a router lookup loads one
//! [`RoutingTable`] snapshot and works against it, while admin updates build a
//! fresh table and swap it in whole.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{GatewayConfig, PresetConfig};
use crate::error::{GatewayError, Result};

const OPENAI_MODELS: &[&str] = &[
    "gpt-4.1",
    "gpt-4.1-mini",
    "gpt-4.1-nano",
    "gpt-4.5-preview",
    "gpt-4o",
    "gpt-4o-2024-11-20",
    "gpt-4o-2024-08-06",
    "gpt-4o-mini",
    "chatgpt-4o-latest",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
    "o1",
    "o1-mini",
    "o3",
    "o3-mini",
    "o4-mini",
];

const GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
    "gemini-2.0-flash",
    "gemini-2.0-flash-exp",
    "gemini-2.0-flash-thinking-exp",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-opus-4-1-20250805",
    "claude-opus-4-20250514",
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
];

/// Backend family a provider belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "anthropic")]
    Anthropic,
}

/// Wire shape spoken to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    OpenAiCompatible,
    AnthropicNative,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Anthropic => "anthropic",
        }
    }

    /// Gemini is reached through its OpenAI-compatible endpoint
    pub fn dialect(&self) -> ApiDialect {
        match self {
            Self::OpenAi | Self::Gemini => ApiDialect::OpenAiCompatible,
            Self::Anthropic => ApiDialect::AnthropicNative,
        }
    }

    /// Documented output-token ceiling, if the backend enforces one we know of
    pub fn max_tokens_ceiling(&self) -> Option<u32> {
        match self {
            Self::OpenAi | Self::Gemini => Some(16384),
            Self::Anthropic => None,
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn builtin_models(&self) -> &'static [&'static str] {
        match self {
            Self::OpenAi => OPENAI_MODELS,
            Self::Gemini => GEMINI_MODELS,
            Self::Anthropic => ANTHROPIC_MODELS,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub models: Vec<String>,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: kind.default_base_url().to_string(),
            api_key: None,
            models: kind.builtin_models().iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn dialect(&self) -> ApiDialect {
        self.kind.dialect()
    }

    /// A provider is available when it holds a non-empty credential
    pub fn is_available(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    pub fn knows(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

/// Routing roles that Claude model names collapse onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelAlias {
    Super,
    Big,
    Small,
}

impl ModelAlias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Super => "super",
            Self::Big => "big",
            Self::Small => "small",
        }
    }
}

impl fmt::Display for ModelAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role -> model reference. References are `provider/model` or a bare model id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(rename = "super", default, skip_serializing_if = "Option::is_none")]
    pub super_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub big: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<String>,
}

impl AliasTable {
    pub fn get(&self, alias: ModelAlias) -> Option<&str> {
        match alias {
            ModelAlias::Super => self.super_model.as_deref(),
            ModelAlias::Big => self.big.as_deref(),
            ModelAlias::Small => self.small.as_deref(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = (ModelAlias, &str)> {
        [ModelAlias::Super, ModelAlias::Big, ModelAlias::Small]
            .into_iter()
            .filter_map(|alias| self.get(alias).map(|model| (alias, model)))
    }
}

impl From<&PresetConfig> for AliasTable {
    fn from(preset: &PresetConfig) -> Self {
        Self {
            super_model: preset.super_model.clone(),
            big: Some(preset.big.clone()),
            small: Some(preset.small.clone()),
        }
    }
}

/// One consistent view of providers and aliases
#[derive(Debug, Clone)]
pub struct RoutingTable {
    providers: BTreeMap<String, ProviderDescriptor>,
    aliases: AliasTable,
    current_preset: Option<String>,
}

impl RoutingTable {
    pub fn new(
        providers: impl IntoIterator<Item = ProviderDescriptor>,
        aliases: AliasTable,
    ) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
            aliases,
            current_preset: None,
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn current_preset(&self) -> Option<&str> {
        self.current_preset.as_deref()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.values()
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(id)
    }

    pub fn resolve_alias(&self, alias: ModelAlias) -> Option<&str> {
        self.aliases.get(alias)
    }

    pub fn is_provider_available(&self, id: &str) -> bool {
        self.providers.get(id).is_some_and(ProviderDescriptor::is_available)
    }

    /// First provider whose model list contains `bare_name`
    pub fn lookup_model(&self, bare_name: &str) -> Option<&ProviderDescriptor> {
        self.providers.values().find(|p| p.knows(bare_name))
    }

    /// Split `provider/model` when the prefix names a registered provider
    pub fn split_prefix<'a>(&self, token: &'a str) -> Option<(&ProviderDescriptor, &'a str)> {
        let (prefix, rest) = token.split_once('/')?;
        self.providers.get(prefix).map(|p| (p, rest))
    }

    /// Resolve a model reference to its provider and bare model id
    pub fn qualify<'a>(&self, reference: &'a str) -> Option<(&ProviderDescriptor, &'a str)> {
        if let Some((provider, model)) = self.split_prefix(reference) {
            return Some((provider, model));
        }
        self.lookup_model(reference).map(|p| (p, reference))
    }

    /// Check that a model reference points at a known model on an available provider
    pub fn check_reference(&self, reference: &str) -> Result<()> {
        let (provider, model) = self.qualify(reference).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("Unknown model '{}'", reference))
        })?;
        if !provider.knows(model) {
            return Err(GatewayError::InvalidRequest(format!(
                "Model '{}' is not listed for provider '{}'",
                model, provider.id
            )));
        }
        if !provider.is_available() {
            return Err(GatewayError::InvalidRequest(format!(
                "Provider '{}' has no API key configured",
                provider.id
            )));
        }
        Ok(())
    }
}

/// Serializable summary of the registry for the admin endpoints
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub aliases: AliasTable,
    pub current_preset: Option<String>,
    pub available_providers: Vec<String>,
    pub total_models: usize,
    pub available_models: usize,
}

pub struct ModelRegistry {
    table: ArcSwap<RoutingTable>,
    presets: BTreeMap<String, PresetConfig>,
}

impl ModelRegistry {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
            presets: builtin_presets(),
        }
    }

    /// Build providers, aliases and presets from configuration.
    ///
    /// A preset named `default` is applied when it validates; otherwise the configured
    /// aliases are kept as-is and re-checked on every lookup.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let providers = config.providers.iter().map(|(id, cfg)| {
            let models = if cfg.models.is_empty() {
                cfg.kind.builtin_models().iter().map(|m| m.to_string()).collect()
            } else {
                cfg.models.clone()
            };
            ProviderDescriptor {
                id: id.clone(),
                kind: cfg.kind,
                base_url: cfg.base_url(),
                api_key: cfg.api_key.clone(),
                models,
            }
        });

        let aliases = AliasTable {
            super_model: config.aliases.super_model.clone(),
            big: config.aliases.big.clone(),
            small: config.aliases.small.clone(),
        };

        let mut registry = Self::new(RoutingTable::new(providers, aliases));
        registry.presets.extend(config.presets.clone());

        {
            let table = registry.snapshot();
            for (alias, reference) in table.aliases().entries() {
                if let Err(e) = table.check_reference(reference) {
                    warn!(alias = %alias, model = %reference, "Alias is not routable yet: {}", e);
                }
            }
        }

        if registry.presets.contains_key("default") {
            match registry.apply_preset("default") {
                Ok(()) => info!("Applied default preset"),
                Err(e) => warn!("Default preset not applied: {}", e),
            }
        }

        registry
    }

    /// Current routing snapshot; never partially updated
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        self.table.load_full()
    }

    pub fn presets(&self) -> &BTreeMap<String, PresetConfig> {
        &self.presets
    }

    /// Replace the alias table. `big` and `small` are mandatory; every model must be
    /// known and its provider available, or nothing changes.
    pub fn set_aliases(&self, aliases: AliasTable) -> Result<()> {
        self.publish(aliases, None)
    }

    pub fn apply_preset(&self, name: &str) -> Result<()> {
        let preset = self
            .presets
            .get(name)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("Unknown preset '{}'", name)))?;
        self.publish(AliasTable::from(preset), Some(name.to_string()))
    }

    fn publish(&self, aliases: AliasTable, preset: Option<String>) -> Result<()> {
        if aliases.big.is_none() || aliases.small.is_none() {
            return Err(GatewayError::InvalidRequest(
                "Both 'big' and 'small' models are required".to_string(),
            ));
        }

        let mut rejected = None;
        self.table.rcu(|table| {
            let mut next = RoutingTable::clone(table);
            if let Some(err) = aliases
                .entries()
                .find_map(|(_, reference)| table.check_reference(reference).err())
            {
                rejected = Some(err);
                return next;
            }
            rejected = None;
            next.aliases = aliases.clone();
            next.current_preset = preset.clone();
            next
        });
        if let Some(err) = rejected {
            return Err(err);
        }

        info!(
            super_model = ?aliases.super_model,
            big = ?aliases.big,
            small = ?aliases.small,
            preset = ?preset,
            "Updated model aliases"
        );
        Ok(())
    }

    pub fn status(&self) -> RegistryStatus {
        let table = self.snapshot();
        let available: Vec<&ProviderDescriptor> =
            table.providers().filter(|p| p.is_available()).collect();
        RegistryStatus {
            aliases: table.aliases().clone(),
            current_preset: table.current_preset().map(str::to_string),
            available_providers: available.iter().map(|p| p.id.clone()).collect(),
            total_models: table.providers().map(|p| p.models.len()).sum(),
            available_models: available.iter().map(|p| p.models.len()).sum(),
        }
    }
}

fn preset(description: &str, super_model: Option<&str>, big: &str, small: &str) -> PresetConfig {
    PresetConfig {
        description: Some(description.to_string()),
        super_model: super_model.map(str::to_string),
        big: big.to_string(),
        small: small.to_string(),
    }
}

pub fn builtin_presets() -> BTreeMap<String, PresetConfig> {
    [
        (
            "openai_only",
            preset(
                "OpenAI for every role",
                Some("openai/o3"),
                "openai/gpt-4.1",
                "openai/gpt-4.1-mini",
            ),
        ),
        (
            "gemini_only",
            preset(
                "Gemini for every role",
                Some("gemini/gemini-2.5-pro"),
                "gemini/gemini-2.5-pro",
                "gemini/gemini-2.5-flash",
            ),
        ),
        (
            "anthropic_only",
            preset(
                "Anthropic for every role",
                Some("anthropic/claude-opus-4-1-20250805"),
                "anthropic/claude-sonnet-4-20250514",
                "anthropic/claude-3-5-haiku-20241022",
            ),
        ),
        (
            "mixed_premium",
            preset(
                "Strongest model of each provider",
                Some("anthropic/claude-opus-4-1-20250805"),
                "openai/gpt-4.1",
                "gemini/gemini-2.5-flash",
            ),
        ),
        (
            "mixed_cost_effective",
            preset(
                "Cheap models across providers",
                None,
                "gemini/gemini-2.5-flash",
                "openai/gpt-4.1-mini",
            ),
        ),
        (
            "reasoning_focused",
            preset(
                "Reasoning models",
                Some("openai/o3"),
                "openai/o4-mini",
                "gemini/gemini-2.5-flash",
            ),
        ),
        (
            "speed_focused",
            preset(
                "Lowest latency",
                None,
                "openai/gpt-4.1-mini",
                "gemini/gemini-2.0-flash",
            ),
        ),
    ]
    .into_iter()
    .map(|(name, preset)| (name.to_string(), preset))
    .collect()
}
