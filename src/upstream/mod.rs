pub mod api;
pub mod dispatch;
pub mod policy;

pub use api::CodeAssistApi;
pub use dispatch::{DispatchError, Dispatcher};
pub use policy::{
    UPSTREAM_BODY_PREVIEW_CHARS, UpstreamErrorEnvelope, UpstreamErrorKind, UpstreamFault,
    classify, fault_from_response,
};
