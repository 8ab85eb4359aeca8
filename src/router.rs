use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::registry::{ModelAlias, ProviderKind, RoutingTable};

/// Where a request is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteTarget {
    pub provider: String,
    pub kind: ProviderKind,
    pub model: String,
    pub alias: Option<ModelAlias>,
    /// Unknown model forwarded under the caller's explicit provider prefix
    pub passthrough: bool,
}

impl RouteTarget {
    pub fn qualified(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Keyword -> alias, checked in this order
const KEYWORDS: [(&str, ModelAlias); 3] = [
    ("opus", ModelAlias::Super),
    ("haiku", ModelAlias::Small),
    ("sonnet", ModelAlias::Big),
];

pub fn match_alias(bare_name: &str) -> Option<ModelAlias> {
    let lowered = bare_name.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(*keyword))
        .map(|(_, alias)| *alias)
}

/// Resolve an inbound model token against one routing snapshot
pub fn route(token: &str, table: &RoutingTable) -> Result<RouteTarget> {
    let prefixed = table.split_prefix(token);
    let bare = prefixed.map(|(_, rest)| rest).unwrap_or(token);

    if let Some(alias) = match_alias(bare) {
        return route_alias(token, alias, table);
    }

    let known = match prefixed {
        Some((provider, model)) => Some(provider).filter(|p| p.knows(model)),
        None => table.lookup_model(bare),
    };

    if let Some(provider) = known {
        debug!(token = %token, provider = %provider.id, model = %bare, "Routed by model lookup");
        return Ok(RouteTarget {
            provider: provider.id.clone(),
            kind: provider.kind,
            model: bare.to_string(),
            alias: None,
            passthrough: false,
        });
    }

    if let Some((provider, model)) = prefixed {
        warn!(
            token = %token,
            provider = %provider.id,
            "Model not in registry, passing through with explicit prefix"
        );
        return Ok(RouteTarget {
            provider: provider.id.clone(),
            kind: provider.kind,
            model: model.to_string(),
            alias: None,
            passthrough: true,
        });
    }

    Err(GatewayError::unresolved(
        token,
        "model is not known to any provider",
    ))
}

fn route_alias(token: &str, alias: ModelAlias, table: &RoutingTable) -> Result<RouteTarget> {
    let reference = table.resolve_alias(alias).ok_or_else(|| {
        GatewayError::unresolved(token, format!("alias '{}' is not configured", alias))
    })?;

    let (provider, model) = table.qualify(reference).ok_or_else(|| {
        GatewayError::unresolved(
            token,
            format!("alias '{}' points at unknown model '{}'", alias, reference),
        )
    })?;

    if !provider.knows(model) {
        return Err(GatewayError::unresolved(
            token,
            format!(
                "alias '{}' points at '{}', which provider '{}' does not list",
                alias, reference, provider.id
            ),
        ));
    }

    if !provider.is_available() {
        return Err(GatewayError::unresolved(
            token,
            format!(
                "alias '{}' resolves to '{}' but provider '{}' has no API key",
                alias, reference, provider.id
            ),
        ));
    }

    debug!(
        token = %token,
        alias = %alias,
        provider = %provider.id,
        model = %model,
        "Routed by alias"
    );

    Ok(RouteTarget {
        provider: provider.id.clone(),
        kind: provider.kind,
        model: model.to_string(),
        alias: Some(alias),
        passthrough: false,
    })
}
