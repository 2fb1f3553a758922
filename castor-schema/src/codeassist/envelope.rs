use crate::gemini::{Candidate, GeminiGenerateContentRequest, GeminiResponseBody, UsageMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CodeAssistRequestMeta {
    pub model: String,
    pub project: Option<String>,
    pub session_id: String,
}

impl CodeAssistRequestMeta {
    /// Build an upstream envelope from runtime metadata and a typed Gemini
    /// `generateContent` request body.
    pub fn into_request(self, request: GeminiGenerateContentRequest) -> CodeAssistRequest {
        CodeAssistRequest {
            model: self.model,
            project: self.project,
            session_id: Some(self.session_id),
            request,
        }
    }
}

/// Code-assist upstream request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeAssistRequest {
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Correlates a run of calls with one client session upstream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub request: GeminiGenerateContentRequest,
}

/// Code-assist envelope wrapper around a Gemini response.
#[derive(Debug, Deserialize)]
pub struct CodeAssistResponseBody {
    #[serde(rename = "response")]
    pub inner: CodeAssistResponseObject,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CodeAssistResponseObject {
    #[serde(default)]
    pub candidates: Vec<Candidate>,

    pub prompt_feedback: Option<Value>,

    pub usage_metadata: Option<UsageMetadata>,

    pub model_version: Option<String>,

    pub response_id: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<CodeAssistResponseBody> for GeminiResponseBody {
    fn from(body: CodeAssistResponseBody) -> Self {
        let inner = body.inner;
        GeminiResponseBody {
            candidates: inner.candidates,
            prompt_feedback: inner.prompt_feedback,
            usage_metadata: inner.usage_metadata,
            model_version: inner.model_version,
            response_id: inner.response_id,
            extra: inner.extra,
        }
    }
}
