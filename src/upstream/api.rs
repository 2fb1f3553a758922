use crate::config::UpstreamConfig;
use crate::error::CastorError;
use backon::{ExponentialBuilder, Retryable};
use castor_schema::codeassist::{
    CodeAssistRequest, FetchAvailableModelsResponse, LoadCodeAssistResponse,
    OnboardOperationResponse, UserTier,
};
use reqwest::header::{ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, info};

/// Thin, credential-agnostic client over the code-assist endpoints. The
/// TLS-fingerprinting dialer is an external capability presenting the same
/// interface; this reqwest client is the standard-HTTP fallback.
#[derive(Clone)]
pub struct CodeAssistApi {
    base: &'static str,
    client: reqwest::Client,
    retry_policy: ExponentialBuilder,
}

impl CodeAssistApi {
    pub fn new(cfg: &UpstreamConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

        let mut builder = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs));

        if let Some(proxy_url) = cfg.proxy.clone() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .expect("invalid proxy url for reqwest client");
            builder = builder.proxy(proxy);
        }

        if cfg.enable_multiplexing {
            builder = builder.http2_adaptive_window(true);
        } else {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
            builder = builder
                .http1_only()
                .pool_max_idle_per_host(0)
                .pool_idle_timeout(Duration::from_secs(0));
        }

        let client = builder
            .default_headers(headers)
            .build()
            .expect("failed to build reqwest client");

        let retry_policy = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(300))
            .with_max_times(2)
            .with_jitter();

        Self {
            base: cfg.environment.base_url(),
            client,
            retry_policy,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1internal:{method}", self.base)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        token: &str,
        body: &T,
    ) -> Result<reqwest::Response, reqwest::Error> {
        // 5xx responses are retried here; everything else flows back to the
        // caller for classification.
        (|| async {
            let resp = self
                .client
                .post(url)
                .bearer_auth(token)
                .json(body)
                .send()
                .await?;
            if resp.status().is_server_error() {
                let status = resp.status();
                let err = resp.error_for_status().unwrap_err();
                error!("Code-assist server error (will retry): {}", status);
                return Err(err);
            }
            Ok(resp)
        })
        .retry(self.retry_policy)
        .await
    }

    /// Single upstream POST of the generate envelope. `stream` selects the
    /// SSE endpoint. Non-2xx responses are returned as-is for the dispatcher
    /// to classify.
    pub async fn generate(
        &self,
        token: &str,
        stream: bool,
        body: &CodeAssistRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = if stream {
            format!("{}?alt=sse", self.url("streamGenerateContent"))
        } else {
            self.url("generateContent")
        };
        self.post_json(&url, token, body).await
    }

    /// Per-credential model catalog with quota figures.
    pub async fn fetch_available_models(
        &self,
        token: &str,
        project: Option<&str>,
    ) -> Result<FetchAvailableModelsResponse, CastorError> {
        let body = match project {
            Some(project) => json!({"project": project}),
            None => json!({}),
        };
        let resp = self
            .post_json(&self.url("fetchAvailableModels"), token, &body)
            .await?;
        if !resp.status().is_success() {
            return Err(CastorError::UpstreamStatus(resp.status()));
        }
        Ok(resp.json().await?)
    }

    pub async fn load_code_assist(&self, token: &str) -> Result<LoadCodeAssistResponse, CastorError> {
        let resp = self
            .post_json(&self.url("loadCodeAssist"), token, &json!({}))
            .await?;
        if !resp.status().is_success() {
            return Err(CastorError::UpstreamStatus(resp.status()));
        }
        let body: Value = resp.json().await?;
        debug!(body = %body, "loadCodeAssist upstream body");
        Ok(serde_json::from_value(body)?)
    }

    pub async fn onboard_user(
        &self,
        token: &str,
        tier: UserTier,
        cloudaicompanion_project: Option<&str>,
    ) -> Result<OnboardOperationResponse, CastorError> {
        let body = json!({
            "tierId": tier.as_str(),
            "cloudaicompanionProject": cloudaicompanion_project,
            "metadata": {
                "ideType": "IDE_UNSPECIFIED",
                "platform": "PLATFORM_UNSPECIFIED",
                "pluginType": "GEMINI",
                "duetProject": cloudaicompanion_project,
            }
        });
        let resp = self
            .post_json(&self.url("onboardUser"), token, &body)
            .await?;
        if !resp.status().is_success() {
            return Err(CastorError::UpstreamStatus(resp.status()));
        }
        let body: Value = resp.json().await?;
        debug!(body = %body, "onboardUser upstream body");
        Ok(serde_json::from_value(body)?)
    }

    /// Resolve (or provision) the companion project id for a fresh
    /// credential. Required before generate calls can carry a project.
    pub async fn ensure_companion_project(&self, token: &str) -> Result<String, CastorError> {
        let load_resp = self.load_code_assist(token).await?;
        let tier = load_resp.resolve_effective_tier();

        if let Some(existing) = load_resp.cloudaicompanion_project {
            info!(project_id = %existing, tier = %tier.as_str(), "loadCodeAssist resolved companion project id");
            return Ok(existing);
        }

        info!(tier = %tier.as_str(), "No existing companion project found; starting onboarding");

        const MAX_ATTEMPTS: usize = 5;
        const RETRY_DELAY: Duration = Duration::from_secs(5);

        for attempt in 1..=MAX_ATTEMPTS {
            let op = self.onboard_user(token, tier, None).await?;
            if op.done {
                return op
                    .response
                    .and_then(|r| r.project_details)
                    .map(|p| p.id)
                    .ok_or_else(|| {
                        CastorError::Unexpected(
                            "onboarding completed but returned no project id".to_string(),
                        )
                    });
            }
            if attempt < MAX_ATTEMPTS {
                info!(
                    "onboardUser pending (attempt {}/{}), retrying in {:?}...",
                    attempt, MAX_ATTEMPTS, RETRY_DELAY
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        Err(CastorError::Unexpected(
            "companion project provisioning timed out".to_string(),
        ))
    }
}
