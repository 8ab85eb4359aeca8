//! Claude <-> backend schema conversion.

pub mod compat;
pub mod request;
pub mod response;
pub mod schema;
pub mod tools;
pub mod validation;

pub use request::{estimate_input_tokens, translate_request};
pub use response::translate_response;
pub use schema::normalize_schema;
pub use tools::flatten_tool_result;
pub use validation::{validate_claude_request, validate_tools};
