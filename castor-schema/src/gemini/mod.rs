//! Typed Gemini v1beta schema shared by the inbound Gemini dialect and the
//! canonical upstream request.
//!
//! Instead of passing through raw `serde_json::Value`, the incoming request is
//! parsed into properly typed structs. This gives us:
//! - Compile-time access to known fields (system instruction merging, thinking
//!   budgets, tool declarations).
//! - Forward compatibility via `extra` catch-all maps at every level.
//! - Validation-friendly request shape (e.g. required `contents`).

mod content;
mod generation;
mod model_list;
mod request;
mod response;
mod system_instruction;
mod tool;

pub use content::{Content, FunctionCall, FunctionResponse, InlineData, Part};
pub use generation::{GenerationConfig, ThinkingConfig};
pub use model_list::{GeminiModelEntry, GeminiModelList};
pub use request::GeminiGenerateContentRequest;
pub use response::{Candidate, GeminiResponseBody, UsageMetadata};
pub use tool::{FunctionDeclaration, Tool};
