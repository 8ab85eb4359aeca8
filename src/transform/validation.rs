use std::collections::HashSet;

use crate::error::{GatewayError, Result};
use crate::models::claude::{ClaudeRequest, ClaudeTool, Role};

/// Validate Claude request before routing
pub fn validate_claude_request(req: &ClaudeRequest) -> Result<()> {
    if req.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("Model is required".into()));
    }

    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest("No messages provided".into()));
    }

    if req.messages[0].role != Role::User {
        return Err(GatewayError::InvalidRequest(
            "First message must be from user".into(),
        ));
    }

    if req.max_tokens == 0 || req.max_tokens > 1_000_000 {
        return Err(GatewayError::InvalidRequest(format!(
            "Invalid max_tokens: {}. Must be between 1 and 1,000,000",
            req.max_tokens
        )));
    }

    if let Some(temp) = req.temperature
        && !(0.0..=2.0).contains(&temp)
    {
        return Err(GatewayError::InvalidRequest(format!(
            "Invalid temperature: {}. Must be between 0.0 and 2.0",
            temp
        )));
    }

    if let Some(top_p) = req.top_p
        && !(0.0..=1.0).contains(&top_p)
    {
        return Err(GatewayError::InvalidRequest(format!(
            "Invalid top_p: {}. Must be between 0.0 and 1.0",
            top_p
        )));
    }

    if req.top_k == Some(0) {
        return Err(GatewayError::InvalidRequest(
            "Invalid top_k: 0. Must be greater than 0".into(),
        ));
    }

    if let Some(tools) = &req.tools {
        validate_tools(tools)?;
    }

    Ok(())
}

/// Tool names must be present and unique; schemas are normalized later, not rejected
pub fn validate_tools(tools: &[ClaudeTool]) -> Result<()> {
    let mut seen = HashSet::with_capacity(tools.len());
    for tool in tools {
        if tool.name.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "Tool name cannot be empty".into(),
            ));
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(GatewayError::InvalidRequest(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}
