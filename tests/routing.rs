/// Integration tests for model-token routing and alias management
use claude_model_gateway::error::GatewayError;
use claude_model_gateway::registry::*;
use claude_model_gateway::router::route;

fn providers() -> Vec<ProviderDescriptor> {
    vec![
        ProviderDescriptor::new("openai", ProviderKind::OpenAi).with_api_key("sk-openai"),
        ProviderDescriptor::new("gemini", ProviderKind::Gemini).with_api_key("gm-key"),
        ProviderDescriptor::new("anthropic", ProviderKind::Anthropic),
    ]
}

fn aliases() -> AliasTable {
    AliasTable {
        super_model: Some("openai/o3".to_string()),
        big: Some("openai/gpt-4.1".to_string()),
        small: Some("gemini/gemini-2.5-flash".to_string()),
    }
}

fn registry() -> ModelRegistry {
    ModelRegistry::new(RoutingTable::new(providers(), aliases()))
}

#[test]
fn test_claude_names_follow_aliases() {
    let table = registry().snapshot();

    let opus = route("claude-opus-4-20250514", &table).unwrap();
    assert_eq!(opus.qualified(), "openai/o3");
    assert_eq!(opus.alias, Some(ModelAlias::Super));

    let sonnet = route("claude-3-5-sonnet-20241022", &table).unwrap();
    assert_eq!(sonnet.qualified(), "openai/gpt-4.1");
    assert_eq!(sonnet.alias, Some(ModelAlias::Big));

    let haiku = route("claude-3-5-haiku-20241022", &table).unwrap();
    assert_eq!(haiku.qualified(), "gemini/gemini-2.5-flash");
    assert_eq!(haiku.kind, ProviderKind::Gemini);
}

#[test]
fn test_keyword_beats_model_lookup() {
    // listed under anthropic, but the keyword wins
    let target = route("claude-3-haiku-20240307", &registry().snapshot()).unwrap();
    assert_eq!(target.provider, "gemini");
}

#[test]
fn test_opus_takes_precedence_over_other_keywords() {
    let target = route("sonnet-haiku-opus", &registry().snapshot()).unwrap();
    assert_eq!(target.alias, Some(ModelAlias::Super));
}

#[test]
fn test_direct_model_names() {
    let table = registry().snapshot();

    let target = route("gpt-4o-mini", &table).unwrap();
    assert_eq!(target.qualified(), "openai/gpt-4o-mini");
    assert!(target.alias.is_none());
    assert!(!target.passthrough);

    let target = route("gemini/gemini-1.5-pro", &table).unwrap();
    assert_eq!(target.qualified(), "gemini/gemini-1.5-pro");
}

#[test]
fn test_unknown_model_is_unresolved() {
    let err = route("mixtral-8x7b", &registry().snapshot()).unwrap_err();
    assert!(matches!(
        err,
        GatewayError::UnresolvedModel { ref token, .. } if token == "mixtral-8x7b"
    ));
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_prefixed_unknown_model_passes_through() {
    let target = route("gemini/gemini-3.0-ultra", &registry().snapshot()).unwrap();
    assert_eq!(target.provider, "gemini");
    assert_eq!(target.model, "gemini-3.0-ultra");
    assert!(target.passthrough);
}

#[test]
fn test_unset_super_alias() {
    let registry = ModelRegistry::new(RoutingTable::new(
        providers(),
        AliasTable {
            super_model: None,
            ..aliases()
        },
    ));
    let err = route("claude-opus-4", &registry.snapshot()).unwrap_err();
    assert!(err.to_string().contains("super"));
}

#[test]
fn test_alias_to_unavailable_provider() {
    let registry = ModelRegistry::new(RoutingTable::new(
        providers(),
        AliasTable {
            big: Some("anthropic/claude-sonnet-4-20250514".to_string()),
            ..aliases()
        },
    ));
    let err = route("claude-sonnet-4", &registry.snapshot()).unwrap_err();
    assert!(matches!(err, GatewayError::UnresolvedModel { .. }));
    assert!(err.to_string().contains("anthropic"));
}

#[test]
fn test_alias_to_unlisted_model() {
    let registry = ModelRegistry::new(RoutingTable::new(
        providers(),
        AliasTable {
            big: Some("openai/gpt-9".to_string()),
            ..aliases()
        },
    ));
    assert!(route("claude-sonnet-4", &registry.snapshot()).is_err());
}

#[test]
fn test_set_aliases_replaces_table() {
    let registry = registry();
    registry
        .set_aliases(AliasTable {
            super_model: None,
            big: Some("gemini-2.5-pro".to_string()),
            small: Some("openai/gpt-4.1-nano".to_string()),
        })
        .unwrap();

    let table = registry.snapshot();
    assert_eq!(route("claude-sonnet-4", &table).unwrap().qualified(), "gemini/gemini-2.5-pro");
    assert_eq!(route("claude-3-haiku", &table).unwrap().qualified(), "openai/gpt-4.1-nano");
    assert!(route("claude-opus-4", &table).is_err());
}

#[test]
fn test_rejected_update_leaves_table_untouched() {
    let registry = registry();
    let before = registry.snapshot();

    // anthropic has no key
    let err = registry
        .set_aliases(AliasTable {
            super_model: None,
            big: Some("openai/gpt-4.1".to_string()),
            small: Some("anthropic/claude-3-5-haiku-20241022".to_string()),
        })
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));

    assert!(
        registry
            .set_aliases(AliasTable {
                big: None,
                ..aliases()
            })
            .is_err()
    );
    assert!(
        registry
            .set_aliases(AliasTable {
                small: Some("openai/not-a-model".to_string()),
                ..aliases()
            })
            .is_err()
    );

    assert_eq!(registry.snapshot().aliases(), before.aliases());
    assert_eq!(registry.status().aliases, aliases());
}

#[test]
fn test_snapshot_survives_update() {
    let registry = registry();
    let old = registry.snapshot();
    registry.apply_preset("gemini_only").unwrap();

    assert_eq!(route("claude-sonnet-4", &old).unwrap().provider, "openai");
    assert_eq!(
        route("claude-sonnet-4", &registry.snapshot()).unwrap().qualified(),
        "gemini/gemini-2.5-pro"
    );
}

#[test]
fn test_presets() {
    let registry = registry();
    assert!(registry.presets().contains_key("openai_only"));

    registry.apply_preset("openai_only").unwrap();
    let status = registry.status();
    assert_eq!(status.current_preset.as_deref(), Some("openai_only"));
    assert_eq!(status.aliases.small.as_deref(), Some("openai/gpt-4.1-mini"));

    // anthropic_only needs the anthropic key
    assert!(registry.apply_preset("anthropic_only").is_err());
    assert!(registry.apply_preset("no_such_preset").is_err());
    assert_eq!(registry.status().current_preset.as_deref(), Some("openai_only"));
}

#[test]
fn test_status_counts_available_models() {
    let status = registry().status();
    assert_eq!(status.available_providers, vec!["gemini", "openai"]);
    let openai = ProviderKind::OpenAi.builtin_models().len();
    let gemini = ProviderKind::Gemini.builtin_models().len();
    let anthropic = ProviderKind::Anthropic.builtin_models().len();
    assert_eq!(status.available_models, openai + gemini);
    assert_eq!(status.total_models, openai + gemini + anthropic);
}
