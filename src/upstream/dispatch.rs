use super::api::CodeAssistApi;
use super::policy::{UpstreamErrorKind, UpstreamFault, fault_from_response};
use crate::error::CastorError;
use crate::ledgers::{CooldownLedger, QuotaLedger};
use crate::pool::{Lease, PoolHandle};
use crate::sigcache::SignatureCache;
use castor_schema::codeassist::CodeAssistRequestMeta;
use castor_schema::gemini::GeminiGenerateContentRequest;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::{info, warn};

/// Fixed cooldown applied on a rate-limit signal, bounded by the upstream's
/// reported reset time when that is sooner.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Terminal outcome of a dispatch attempt ladder.
#[derive(Debug, ThisError)]
pub enum DispatchError {
    #[error("no available credential")]
    NoCredential,

    #[error("upstream fault: {}", .0.status)]
    Fault(UpstreamFault),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Internal(CastorError),
}

/// Credential-rotating front door to the upstream: acquire, post, classify,
/// retry. Every retry re-enters the pool; the retry counter is shared across
/// rate-limit and capacity faults.
#[derive(Clone)]
pub struct Dispatcher {
    api: CodeAssistApi,
    pool: PoolHandle,
    quota: Arc<QuotaLedger>,
    cooldown: Arc<CooldownLedger>,
    sigcache: SignatureCache,
    cache_tool_signatures: bool,
    retry_max: usize,
}

impl Dispatcher {
    pub fn new(
        api: CodeAssistApi,
        pool: PoolHandle,
        quota: Arc<QuotaLedger>,
        cooldown: Arc<CooldownLedger>,
        sigcache: SignatureCache,
        cache_tool_signatures: bool,
        retry_max: usize,
    ) -> Self {
        Self {
            api,
            pool,
            quota,
            cooldown,
            sigcache,
            cache_tool_signatures,
            retry_max: retry_max.max(1),
        }
    }

    pub fn quota_ledger(&self) -> &Arc<QuotaLedger> {
        &self.quota
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    /// Run the generate call for `model`, rotating credentials until success,
    /// a non-retryable fault, or retry exhaustion. Returns the issuing lease
    /// together with the (2xx) upstream response.
    pub async fn dispatch(
        &self,
        model: &str,
        stream: bool,
        request: &GeminiGenerateContentRequest,
    ) -> Result<(Lease, reqwest::Response), DispatchError> {
        let mut last_fault: Option<UpstreamFault> = None;

        for attempt in 1..=self.retry_max {
            let lease = match self.pool.acquire(Some(model)).await {
                Ok(lease) => lease,
                Err(CastorError::NoAvailableCredential) => return Err(DispatchError::NoCredential),
                Err(other) => return Err(DispatchError::Internal(other)),
            };

            info!(
                lease.id = %lease.id,
                lease.best_effort = lease.best_effort,
                req.model = %model,
                req.stream = stream,
                attempt,
                "Dispatching generate call"
            );

            // Signature reattachment happens here, keyed by the lease's
            // session: a rotated retry may land on a different session with
            // different cached signatures.
            let mut patched = request.clone();
            crate::convert::patch_request(
                &mut patched,
                &self.sigcache,
                &lease.session_id,
                model,
                self.cache_tool_signatures,
            );
            let envelope = CodeAssistRequestMeta {
                model: model.to_string(),
                project: lease.project_id.clone(),
                session_id: lease.session_id.clone(),
            }
            .into_request(patched);

            let resp = match self.api.generate(&lease.access_token, stream, &envelope).await {
                Ok(resp) => resp,
                Err(e) => {
                    // Connection-phase failures retry on a fresh credential;
                    // anything after bytes flowed is terminal.
                    if (e.is_connect() || e.is_timeout()) && attempt < self.retry_max {
                        warn!(error = %e, attempt, "Connect-phase transport failure; rotating");
                        backoff_pause().await;
                        continue;
                    }
                    return Err(DispatchError::Transport(e));
                }
            };

            if resp.status().is_success() {
                return Ok((lease, resp));
            }

            let fault = fault_from_response(resp).await;
            self.apply_fault_side_effects(&lease, model, &fault);

            let retryable = fault.kind.is_retryable() && !lease.best_effort;
            warn!(
                lease.id = %lease.id,
                status = %fault.status,
                kind = ?fault.kind,
                attempt,
                retryable,
                "Upstream fault"
            );

            if !retryable || attempt == self.retry_max {
                return Err(DispatchError::Fault(fault));
            }
            last_fault = Some(fault);
            backoff_pause().await;
        }

        // Loop always returns before falling through; keep the compiler and
        // the invariant honest.
        Err(last_fault.map_or(DispatchError::NoCredential, DispatchError::Fault))
    }

    fn apply_fault_side_effects(&self, lease: &Lease, model: &str, fault: &UpstreamFault) {
        match fault.kind {
            UpstreamErrorKind::RetryableRateLimit => {
                let cooldown = fault
                    .retry_after
                    .map_or(RATE_LIMIT_COOLDOWN, |reset| reset.min(RATE_LIMIT_COOLDOWN));
                self.cooldown.mark(&lease.id, model, cooldown);
            }
            UpstreamErrorKind::CapacityExhausted => {
                self.quota.upsert(&lease.id, model, 0.0, None);
                self.pool.mark_quota_exhausted(&lease.id);
            }
            UpstreamErrorKind::NoPermission => {
                self.pool.disable(&lease.id);
            }
            UpstreamErrorKind::ContextTooLong
            | UpstreamErrorKind::AuthNeeded
            | UpstreamErrorKind::Other => {}
        }
    }
}

/// Short jittered pause between rotation attempts.
async fn backoff_pause() {
    let jitter_ms = rand::rng().random_range(100..300);
    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
}
