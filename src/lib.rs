//! # Claude Model Gateway
//!
//! A protocol-translating gateway that lets clients of the Anthropic Messages API
//! talk to OpenAI-compatible, Gemini or Anthropic backends through one endpoint.
//!
//! ## Overview
//!
//! Each `/v1/messages` call is:
//! - **Routed**: `opus`/`sonnet`/`haiku` tokens map to the `super`/`big`/`small`
//!   aliases, other tokens to a known or provider-prefixed model
//! - **Translated**: Anthropic messages, tools and tool_choice become a
//!   chat-completions style backend request
//! - **Reconstructed**: backend replies, streamed or not, come back as Anthropic
//!   messages or Anthropic SSE events
//!
//! With routing switched off, calls are relayed to Anthropic untouched.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use claude_model_gateway::config::GatewayConfig;
//! use claude_model_gateway::registry::ModelRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_env()?;
//! config.validate()?;
//!
//! let registry = ModelRegistry::from_config(&config);
//! println!("{:?}", registry.status());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`registry`] - Providers, model lists, alias table and presets
//! - [`router`] - Model token resolution
//! - [`transform`] - Request/response translation and schema normalization
//! - [`streaming`] - SSE decoding and Anthropic stream reconstruction
//! - [`client`] - Backend HTTP clients
//! - [`forward`] - Transparent relay to Anthropic
//! - [`handler`] - HTTP surface

pub mod client;
pub mod config;
pub mod error;
pub mod forward;
pub mod handler;
pub mod metrics;
pub mod models;
pub mod provider;
pub mod recorder;
pub mod registry;
pub mod router;
pub mod streaming;
pub mod transform;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
