use crate::bootstrap::Gateway;
use crate::error::{CastorError, OpenaiError};
use crate::relay::{ImageSink, PumpContext, collect_response};
use async_trait::async_trait;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::Engine as _;
use castor_schema::gemini::{Content, GeminiGenerateContentRequest, InlineData, Part};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stable-diffusion-webui compat subset mapped onto the image model.
#[derive(Debug, Deserialize)]
pub struct SdGenerateRequest {
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub negative_prompt: String,

    /// `img2img` only: base64 source images.
    #[serde(default)]
    pub init_images: Vec<String>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SdGenerateResponse {
    pub images: Vec<String>,
    pub parameters: Value,
    pub info: String,
}

/// Sink that keeps the generated bytes in memory as base64, the shape the
/// SD API reports images in.
#[derive(Default)]
struct CapturingSink {
    images: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageSink for CapturingSink {
    async fn save(&self, _mime: &str, bytes: Vec<u8>) -> Result<String, CastorError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let mut images = self.images.lock().expect("capture lock poisoned");
        images.push(encoded);
        Ok(format!("captured://{}", images.len()))
    }
}

pub async fn txt2img(
    State(gateway): State<Gateway>,
    Json(body): Json<SdGenerateRequest>,
) -> Result<impl IntoResponse, OpenaiError> {
    generate_images(gateway, body).await
}

pub async fn img2img(
    State(gateway): State<Gateway>,
    Json(body): Json<SdGenerateRequest>,
) -> Result<impl IntoResponse, OpenaiError> {
    generate_images(gateway, body).await
}

async fn generate_images(
    gateway: Gateway,
    body: SdGenerateRequest,
) -> Result<Json<SdGenerateResponse>, OpenaiError> {
    if body.prompt.trim().is_empty() {
        return Err(OpenaiError::RequestRejected {
            status: StatusCode::BAD_REQUEST,
            message: "prompt is required".to_string(),
        });
    }

    let mut prompt = body.prompt.clone();
    if !body.negative_prompt.trim().is_empty() {
        prompt.push_str("\n\nNegative prompt: ");
        prompt.push_str(&body.negative_prompt);
    }

    let mut parts = vec![Part::from_text(prompt)];
    for init in body
        .init_images
        .iter()
        .take(gateway.cfg.convert.max_inline_images)
    {
        parts.push(Part {
            inline_data: Some(InlineData {
                mime_type: "image/png".to_string(),
                data: init.clone(),
            }),
            ..Part::default()
        });
    }

    let request = GeminiGenerateContentRequest {
        contents: vec![Content::user(parts)],
        ..GeminiGenerateContentRequest::default()
    };

    let model = gateway.cfg.relay.image_model.clone();
    // Image generation is slow; always ride the stream-collect path.
    let (lease, upstream_resp) = gateway.dispatcher.dispatch(&model, true, &request).await?;

    let sink = Arc::new(CapturingSink::default());
    let sink_dyn: Arc<dyn ImageSink> = sink.clone();
    let ctx = PumpContext {
        names: gateway.names.clone(),
        sigcache: gateway.sigcache.clone(),
        quota: gateway.quota.clone(),
        cred_id: lease.id.clone(),
        session_id: lease.session_id.clone(),
        model,
        sink: Some(sink_dyn),
        idle_timeout: Duration::from_secs(gateway.cfg.upstream.idle_timeout_secs),
    };

    collect_response(upstream_resp, true, &ctx)
        .await
        .map_err(OpenaiError::StreamProtocol)?;

    let images = sink.images.lock().expect("capture lock poisoned").clone();
    if images.is_empty() {
        return Err(OpenaiError::Internal(
            "upstream returned no image data".to_string(),
        ));
    }

    Ok(Json(SdGenerateResponse {
        images,
        parameters: json!({
            "prompt": body.prompt,
            "negative_prompt": body.negative_prompt,
        }),
        info: String::new(),
    }))
}
