//! Canonical upstream "code-assist" wire types: the request envelope wrapping
//! a Gemini body, the response envelope, and the model-catalog / onboarding
//! payloads.

mod catalog;
mod envelope;
mod onboard;

pub use catalog::{AvailableModel, FetchAvailableModelsResponse, QuotaInfo};
pub use envelope::{CodeAssistRequest, CodeAssistRequestMeta, CodeAssistResponseBody};
pub use onboard::{
    LoadCodeAssistResponse, OnboardOperationResponse, ProjectObject, TierInfo, UserTier,
};
