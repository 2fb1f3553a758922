//! Claude messages dialect schema.

mod messages_request;
mod messages_response;
mod stream_event;

pub use messages_request::{
    ClaudeContentBlock, ClaudeImageSource, ClaudeMessage, ClaudeMessagesRequest, ClaudeSystem,
    ClaudeThinking, ClaudeTool, ClaudeToolResultContent,
};
pub use messages_response::{ClaudeMessagesResponse, ClaudeUsage, ResponseContentBlock};
pub use stream_event::{ClaudeStreamDelta, ClaudeStreamEvent, StartContentBlock};
