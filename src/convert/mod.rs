//! Inbound-dialect ⇄ canonical upstream conversion.
//!
//! Each dialect module exposes a request converter, a stream emitter driven
//! by relay deltas, and a final-response builder for the collect path.

pub mod claude;
pub mod gemini;
mod names;
mod params;
pub mod openai;
mod sigpatch;
mod system;

pub use names::ToolNameCache;
pub use params::{json_mime_for_model, resolve_thinking};
pub use sigpatch::patch_request;
pub use system::merge_system_instruction;

use axum::response::sse::Event;
use serde::Serialize;
use tracing::warn;

/// Serialize a payload into an SSE event; serialization failures degrade to
/// a comment frame rather than tearing the stream.
pub(crate) fn sse_json<T: Serialize>(value: &T) -> Event {
    match Event::default().json_data(value) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "SSE payload serialization failed");
            Event::default().comment("serialization-error")
        }
    }
}
