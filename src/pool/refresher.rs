use crate::config::UpstreamConfig;
use crate::error::{CastorError, IsRetryable, OauthError};
use crate::upstream::CodeAssistApi;
use backon::{ExponentialBuilder, Retryable};
use base64::Engine as _;
use futures::stream::StreamExt;
use governor::{Quota, RateLimiter};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{
    AuthUrl, Client as OAuth2Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    ExtraTokenFields, RefreshToken, StandardRevocableToken, StandardTokenResponse, TokenResponse,
    TokenUrl,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, sync::LazyLock, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

static OAUTH_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(2)
        .with_jitter()
});

/// A refresh order from the pool actor.
#[derive(Debug)]
pub(super) struct RefreshJob {
    pub id: String,
    pub refresh_secret: String,
    /// Resolve/provision the companion project after the token refresh.
    pub needs_project: bool,
}

/// What a completed refresh hands back to the pool actor.
#[derive(Debug)]
pub(super) struct RefreshOutcome {
    pub id: String,
    pub result: Result<RefreshedToken, CastorError>,
}

#[derive(Debug, Clone)]
pub(super) struct RefreshedToken {
    pub access_token: String,
    pub expires_in_secs: i64,
    pub project_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug)]
pub(super) enum RefresherMessage {
    Refresh(RefreshJob),
}

/// Handle for submitting refresh jobs to the refresher actor.
#[derive(Clone)]
pub(super) struct RefresherHandle {
    actor: ActorRef<RefresherMessage>,
}

impl RefresherHandle {
    pub async fn spawn(
        outcome_tx: mpsc::Sender<RefreshOutcome>,
        cfg: Arc<UpstreamConfig>,
        api: CodeAssistApi,
    ) -> Result<Self, ActorProcessingErr> {
        let (actor, _jh) = Actor::spawn(
            Some(format!("PoolRefresher-{}", crate::pool::next_actor_suffix())),
            RefresherActor,
            (outcome_tx, cfg, api),
        )
        .await
        .map_err(|e| ActorProcessingErr::from(format!("RefresherActor spawn failed: {e}")))?;
        Ok(Self { actor })
    }

    pub fn submit(&self, job: RefreshJob) -> Result<(), CastorError> {
        ractor::cast!(self.actor, RefresherMessage::Refresh(job))
            .map_err(|e| CastorError::Ractor(format!("RefresherActor cast failed: {e}")))
    }
}

struct RefresherActorState {
    job_tx: mpsc::Sender<RefreshJob>,
}

struct RefresherActor;

#[ractor::async_trait]
impl Actor for RefresherActor {
    type Msg = RefresherMessage;
    type State = RefresherActorState;
    type Arguments = (mpsc::Sender<RefreshOutcome>, Arc<UpstreamConfig>, CodeAssistApi);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (outcome_tx, cfg, api): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let oauth = Arc::new(OauthRefresher::new(&cfg));

        let oauth_tps = cfg.oauth_tps.max(1);
        let oauth_tps_u32 = u32::try_from(oauth_tps).unwrap_or(u32::MAX);
        let burst_u32 = u32::try_from(oauth_tps.saturating_mul(2)).unwrap_or(u32::MAX);
        let limiter = Arc::new(RateLimiter::direct(
            Quota::per_second(std::num::NonZeroU32::new(oauth_tps_u32).unwrap())
                .allow_burst(std::num::NonZeroU32::new(burst_u32).unwrap()),
        ));

        let (job_tx, job_rx) = mpsc::channel::<RefreshJob>(1000);

        // Background refresh pipeline: all submitted jobs run concurrently
        // under the TPS cap; each result is consumed independently, so one
        // bad credential never fails the batch.
        let buffer_unordered = oauth_tps.saturating_mul(2).max(1);
        tokio::spawn(async move {
            info!(
                "Refresh pipeline started: BufferUnordered={}, RateLimit={}/s, Burst={}",
                buffer_unordered, oauth_tps_u32, burst_u32
            );

            let mut pipeline = ReceiverStream::new(job_rx)
                .map(|job| {
                    let lim = limiter.clone();
                    let oauth = oauth.clone();
                    let api = api.clone();
                    async move {
                        lim.until_ready().await;
                        let result = execute_refresh(&oauth, &api, &job).await;
                        RefreshOutcome { id: job.id, result }
                    }
                })
                .buffer_unordered(buffer_unordered);

            while let Some(outcome) = pipeline.next().await {
                if outcome_tx.send(outcome).await.is_err() {
                    warn!("Pool actor unreachable (channel closed), refresh worker stopping");
                    break;
                }
            }
            info!("Refresh pipeline stopped");
        });

        Ok(RefresherActorState { job_tx })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            RefresherMessage::Refresh(job) => {
                let tx = state.job_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = tx.send(job).await {
                        warn!("Failed to submit refresh job (channel closed/full): {}", e);
                    }
                });
            }
        }
        Ok(())
    }
}

async fn execute_refresh(
    oauth: &OauthRefresher,
    api: &CodeAssistApi,
    job: &RefreshJob,
) -> Result<RefreshedToken, CastorError> {
    let mut token = oauth.refresh(&job.refresh_secret).await?;

    if job.needs_project {
        let project_id = api.ensure_companion_project(&token.access_token).await?;
        token.project_id = Some(project_id);
    }

    info!(id = %job.id, "Access token refreshed successfully");
    Ok(token)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct GoogleTokenField {
    id_token: Option<String>,
}
impl ExtraTokenFields for GoogleTokenField {}

type GoogleTokenResponse = StandardTokenResponse<GoogleTokenField, BasicTokenType>;

type GoogleOauth2Client = OAuth2Client<
    BasicErrorResponse,
    GoogleTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Refresh-token-grant-only OAuth client. The interactive login flow lives in
/// an external helper; only `grant_type=refresh_token` is exercised here.
struct OauthRefresher {
    client: GoogleOauth2Client,
    http: reqwest::Client,
}

impl OauthRefresher {
    fn new(cfg: &UpstreamConfig) -> Self {
        let client = OAuth2Client::new(ClientId::new(cfg.oauth_client_id.clone()))
            .set_client_secret(ClientSecret::new(cfg.oauth_client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string()).expect("valid auth url"))
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URI.to_string()).expect("valid token uri"));

        let mut builder = reqwest::Client::builder()
            .user_agent("castor-oauth/1.0")
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15));
        if let Some(proxy_url) = cfg.proxy.clone() {
            let proxy = reqwest::Proxy::all(proxy_url.as_str())
                .expect("invalid proxy url for reqwest client");
            builder = builder.proxy(proxy);
        }
        let http = builder.build().expect("failed to build oauth HTTP client");

        Self { client, http }
    }

    async fn refresh(&self, refresh_secret: &str) -> Result<RefreshedToken, OauthError> {
        let response = (|| async {
            let token: GoogleTokenResponse = self
                .client
                .exchange_refresh_token(&RefreshToken::new(refresh_secret.to_string()))
                .request_async(&self.http)
                .await?;
            Ok::<_, OauthError>(token)
        })
        .retry(*OAUTH_RETRY_POLICY)
        .when(|e: &OauthError| e.is_retryable())
        .notify(|err, dur: Duration| {
            error!(
                "OAuth refresh retrying error {} with sleeping {:?}",
                err.to_string(),
                dur
            );
        })
        .await?;

        let expires_in_secs = response
            .expires_in()
            .map_or(3600, |d| i64::try_from(d.as_secs()).unwrap_or(3600));
        let email = response
            .extra_fields()
            .id_token
            .as_deref()
            .and_then(email_from_id_token);

        Ok(RefreshedToken {
            access_token: response.access_token().secret().clone(),
            expires_in_secs,
            project_id: None,
            email,
        })
    }
}

/// Best-effort email extraction from an ID token; the JWT is only decoded,
/// never verified, since it arrives over the trusted token endpoint.
fn email_from_id_token(id_token: &str) -> Option<String> {
    let payload_b64 = id_token.split('.').nth(1)?;
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    let email = claims.get("email")?.as_str()?.trim();
    if email.is_empty() {
        debug!("ID token carried an empty email claim");
        return None;
    }
    Some(email.to_string())
}
