//! OpenAI chat-completions dialect schema.

mod chat_request;
mod chat_response;
mod model_list;

pub use chat_request::{
    ChatCompletionsRequest, ChatContent, ChatContentPart, ChatMessage, ImageUrl, ResponseFormat,
    ToolCall, ToolCallFunction, ToolDefinition, ToolFunction,
};
pub use chat_response::{
    ChatChoice, ChatCompletion, ChatCompletionChunk, ChatDelta, ChatUsage, ChunkChoice,
    DeltaToolCall, DeltaToolCallFunction, ResponseMessage,
};
pub use model_list::{OpenaiModel, OpenaiModelList};
