mod castor;
mod claude;
mod gemini;
mod oauth;
mod openai;

pub use castor::CastorError;
pub use claude::ClaudeError;
pub use gemini::{GeminiError, GeminiErrorBody, GeminiErrorObject};
pub use oauth::OauthError;
pub use openai::{OpenaiError, OpenaiErrorBody, OpenaiErrorObject};

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
