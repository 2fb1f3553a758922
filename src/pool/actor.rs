use super::refresher::{RefreshJob, RefreshOutcome, RefresherHandle};
use super::rotation::Rotation;
use super::{CooldownView, Lease, QuotaView};
use crate::config::{PoolConfig, RotationStrategy, UpstreamConfig};
use crate::error::{CastorError, OauthError};
use crate::store::{Account, AccountStore};
use crate::upstream::CodeAssistApi;
use axum::http::StatusCode;
use chrono::Duration as ChronoDuration;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Public messages handled by the pool actor.
pub enum PoolMessage {
    /// Request one credential, optionally filtered for a model. The reply is
    /// deferred while the chosen credential refreshes.
    Acquire(Option<String>, RpcReplyPort<Result<Lease, CastorError>>),
    /// Capacity signal: drop the credential's coarse budget flag.
    MarkQuotaExhausted { id: String },
    /// Unrecoverable permission signal: disable and persist.
    Disable { id: String },
    /// Re-read the store, re-mint sessions, reset counters and derived lists.
    Reload(RpcReplyPort<usize>),
    /// Change rotation strategy at runtime; counters reset.
    SetStrategy {
        strategy: RotationStrategy,
        rotate_every: u32,
    },
    /// Internal: a refresh finished.
    RefreshDone(RefreshOutcome),
}

impl std::fmt::Debug for PoolMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolMessage::Acquire(model, _) => f.debug_tuple("Acquire").field(model).finish(),
            PoolMessage::MarkQuotaExhausted { id } => {
                f.debug_struct("MarkQuotaExhausted").field("id", id).finish()
            }
            PoolMessage::Disable { id } => f.debug_struct("Disable").field("id", id).finish(),
            PoolMessage::Reload(_) => f.write_str("Reload"),
            PoolMessage::SetStrategy {
                strategy,
                rotate_every,
            } => f
                .debug_struct("SetStrategy")
                .field("strategy", strategy)
                .field("rotate_every", rotate_every)
                .finish(),
            PoolMessage::RefreshDone(outcome) => {
                f.debug_tuple("RefreshDone").field(&outcome.id).finish()
            }
        }
    }
}

/// Handle for interacting with the pool actor.
#[derive(Clone)]
pub struct PoolHandle {
    actor: ActorRef<PoolMessage>,
}

impl PoolHandle {
    /// Acquire a credential, refreshed and ready for an upstream call.
    pub async fn acquire(&self, model: Option<&str>) -> Result<Lease, CastorError> {
        ractor::call!(
            self.actor,
            PoolMessage::Acquire,
            model.map(str::to_string)
        )
        .map_err(|e| CastorError::Ractor(format!("Acquire RPC failed: {e}")))?
    }

    pub fn mark_quota_exhausted(&self, id: &str) {
        let _ = ractor::cast!(
            self.actor,
            PoolMessage::MarkQuotaExhausted { id: id.to_string() }
        );
    }

    pub fn disable(&self, id: &str) {
        let _ = ractor::cast!(self.actor, PoolMessage::Disable { id: id.to_string() });
    }

    /// Hot reload; returns the number of enabled credentials.
    pub async fn reload(&self) -> Result<usize, CastorError> {
        ractor::call!(self.actor, PoolMessage::Reload)
            .map_err(|e| CastorError::Ractor(format!("Reload RPC failed: {e}")))
    }

    pub fn set_strategy(&self, strategy: RotationStrategy, rotate_every: u32) {
        let _ = ractor::cast!(
            self.actor,
            PoolMessage::SetStrategy {
                strategy,
                rotate_every
            }
        );
    }
}

struct Waiter {
    reply: RpcReplyPort<Result<Lease, CastorError>>,
    best_effort: bool,
    model: Option<String>,
    /// A waiter is re-queued at most once after a failed refresh.
    retried: bool,
}

struct PoolActorState {
    store: AccountStore,
    accounts: HashMap<String, Account>,
    rotation: Rotation,
    refresh_buffer: ChronoDuration,
    quota: Arc<dyn QuotaView>,
    cooldown: Arc<dyn CooldownView>,
    refresher: RefresherHandle,
    refreshing: HashSet<String>,
    waiters: HashMap<String, Vec<Waiter>>,
}

struct PoolActor;

type PoolArguments = (
    AccountStore,
    Arc<dyn QuotaView>,
    Arc<dyn CooldownView>,
    PoolConfig,
    Arc<UpstreamConfig>,
    CodeAssistApi,
);

#[ractor::async_trait]
impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolActorState;
    type Arguments = PoolArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        (store, quota, cooldown, pool_cfg, upstream_cfg, api): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<RefreshOutcome>(256);
        let refresher = RefresherHandle::spawn(outcome_tx, upstream_cfg, api).await?;

        // Pump refresh outcomes back into the actor mailbox.
        let pump_target = myself.clone();
        tokio::spawn(async move {
            while let Some(outcome) = outcome_rx.recv().await {
                if pump_target.cast(PoolMessage::RefreshDone(outcome)).is_err() {
                    break;
                }
            }
        });

        let refresh_buffer = ChronoDuration::seconds(
            i64::try_from(pool_cfg.refresh_buffer_secs).unwrap_or(60),
        );

        let mut accounts: HashMap<String, Account> = HashMap::new();
        for mut account in store.read_all().await {
            account.remint_session();
            accounts.insert(account.id.clone(), account);
        }

        let mut rotation = Rotation::new(pool_cfg.strategy, pool_cfg.rotate_every);
        rotation.seed(
            accounts
                .values()
                .filter(|account| account.enabled)
                .map(|account| (account.id.clone(), account.has_quota)),
        );

        let mut state = PoolActorState {
            store,
            accounts,
            rotation,
            refresh_buffer,
            quota,
            cooldown,
            refresher,
            refreshing: HashSet::new(),
            waiters: HashMap::new(),
        };

        // Boot wave: refresh every expired enabled credential concurrently;
        // each result is classified on its own when it comes back.
        let expired: Vec<String> = state
            .accounts
            .values()
            .filter(|account| account.enabled && account.needs_refresh(state.refresh_buffer))
            .map(|account| account.id.clone())
            .collect();
        let wave_len = expired.len();
        for id in expired {
            state.submit_refresh(&id);
        }

        info!(
            enabled = state.rotation.len(),
            total = state.accounts.len(),
            refreshing = wave_len,
            "Credential pool started"
        );
        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Acquire(model, reply) => {
                state.handle_acquire(model, reply, false);
            }
            PoolMessage::MarkQuotaExhausted { id } => {
                state.handle_mark_quota_exhausted(&id);
            }
            PoolMessage::Disable { id } => {
                state.handle_disable(&id);
            }
            PoolMessage::Reload(reply) => {
                let enabled = state.handle_reload().await;
                let _ = reply.send(enabled);
            }
            PoolMessage::SetStrategy {
                strategy,
                rotate_every,
            } => {
                info!(?strategy, rotate_every, "Rotation strategy changed; counters reset");
                state.rotation.set_strategy(strategy, rotate_every);
            }
            PoolMessage::RefreshDone(outcome) => {
                state.handle_refresh_done(outcome);
            }
        }
        Ok(())
    }
}

impl PoolActorState {
    fn handle_acquire(
        &mut self,
        model: Option<String>,
        reply: RpcReplyPort<Result<Lease, CastorError>>,
        retried: bool,
    ) {
        let (selection, best_effort) = {
            let quota = self.quota.clone();
            let cooldown = self.cooldown.clone();
            let filtered = match model.as_deref() {
                Some(model) => self.rotation.select(|id| {
                    quota.has_quota_for(id, model) && cooldown.available(id, model)
                }),
                None => self.rotation.select(|_| true),
            };
            match filtered {
                Some(selection) => (Some(selection), false),
                None => {
                    // Every enabled credential is cooled down or quota-zero
                    // for this model: proceed unfiltered to avoid livelock.
                    (self.rotation.select(|_| true), true)
                }
            }
        };

        let Some(selection) = selection else {
            let _ = reply.send(Err(CastorError::NoAvailableCredential));
            return;
        };

        if best_effort {
            warn!(
                id = %selection.id,
                model = %model.as_deref().unwrap_or("-"),
                "No credential passes the model filter; serving best-effort"
            );
        }

        if selection.exhausted_reset {
            info!("Quota-exhausted list emptied; resetting every has_quota flag");
            for account in self.accounts.values_mut() {
                account.has_quota = true;
            }
            self.persist_all();
        }

        let Some(account) = self.accounts.get(&selection.id) else {
            let _ = reply.send(Err(CastorError::NoAvailableCredential));
            return;
        };

        if !account.needs_refresh(self.refresh_buffer) {
            let _ = reply.send(Ok(lease_for(account, best_effort)));
            return;
        }

        // Expired (or nearly): coalesce every caller onto one in-flight
        // refresh and answer when it lands.
        debug!(id = %account.id, "Credential expired; caller awaiting refresh");
        self.waiters.entry(selection.id.clone()).or_default().push(Waiter {
            reply,
            best_effort,
            model,
            retried,
        });
        self.submit_refresh(&selection.id);
    }

    fn handle_mark_quota_exhausted(&mut self, id: &str) {
        if let Some(account) = self.accounts.get_mut(id) {
            account.has_quota = false;
            self.rotation.mark_exhausted(id);
            info!(%id, "Credential marked quota-exhausted");
            self.persist_one(id);
        }
    }

    fn handle_disable(&mut self, id: &str) {
        let Some(account) = self.accounts.get_mut(id) else {
            return;
        };
        account.enabled = false;
        self.rotation.remove(id);
        self.refreshing.remove(id);
        warn!(%id, "Credential disabled");
        self.persist_one(id);
        self.requeue_waiters(id);
    }

    async fn handle_reload(&mut self) -> usize {
        let mut accounts: HashMap<String, Account> = HashMap::new();
        for mut account in self.store.read_all().await {
            account.remint_session();
            accounts.insert(account.id.clone(), account);
        }
        self.accounts = accounts;
        self.rotation.seed(
            self.accounts
                .values()
                .filter(|account| account.enabled)
                .map(|account| (account.id.clone(), account.has_quota)),
        );
        self.refreshing.clear();

        // Outstanding waiters re-enter selection against the fresh list.
        let pending: Vec<String> = self.waiters.keys().cloned().collect();
        for id in pending {
            self.requeue_waiters(&id);
        }

        info!(enabled = self.rotation.len(), "Credential pool reloaded");
        self.rotation.len()
    }

    fn handle_refresh_done(&mut self, outcome: RefreshOutcome) {
        let id = outcome.id;
        self.refreshing.remove(&id);

        let Some(account) = self.accounts.get_mut(&id) else {
            debug!(%id, "Refresh completed for a credential no longer tracked");
            self.requeue_waiters(&id);
            return;
        };

        match outcome.result {
            Ok(token) => {
                account.apply_refresh(token.access_token, token.expires_in_secs);
                if let Some(project_id) = token.project_id {
                    account.project_id = Some(project_id);
                }
                if let Some(email) = token.email {
                    account.email = Some(email);
                }
                if account.enabled && !self.rotation.contains(&id) {
                    self.rotation.add(id.clone());
                }
                self.persist_one(&id);

                for waiter in self.waiters.remove(&id).unwrap_or_default() {
                    let account = &self.accounts[&id];
                    let _ = waiter.reply.send(Ok(lease_for(account, waiter.best_effort)));
                }
            }
            Err(err) => {
                if refresh_failure_disables(&err) {
                    warn!(%id, error = %err, "Refresh failed unrecoverably; disabling credential");
                    self.handle_disable(&id);
                } else {
                    warn!(%id, error = %err, "Refresh failed transiently; keeping credential");
                    self.requeue_waiters(&id);
                }
            }
        }
    }

    /// Push every waiter of `id` back through selection (once).
    fn requeue_waiters(&mut self, id: &str) {
        for waiter in self.waiters.remove(id).unwrap_or_default() {
            if waiter.retried {
                let _ = waiter.reply.send(Err(CastorError::NoAvailableCredential));
            } else {
                self.handle_acquire(waiter.model, waiter.reply, true);
            }
        }
    }

    fn submit_refresh(&mut self, id: &str) {
        if self.refreshing.contains(id) {
            return;
        }
        let Some(account) = self.accounts.get(id) else {
            return;
        };
        let job = RefreshJob {
            id: id.to_string(),
            refresh_secret: account.refresh_secret.clone(),
            needs_project: account.project_id.is_none(),
        };
        match self.refresher.submit(job) {
            Ok(()) => {
                self.refreshing.insert(id.to_string());
            }
            Err(e) => {
                warn!(%id, error = %e, "Refresh enqueue failed");
                self.requeue_waiters(id);
            }
        }
    }

    fn persist_one(&self, id: &str) {
        let Some(account) = self.accounts.get(id).cloned() else {
            return;
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.merge_active(&[], Some(&account)).await {
                warn!(id = %account.id, error = %e, "Account persist failed");
            }
        });
    }

    fn persist_all(&self) {
        let accounts: Vec<Account> = self.accounts.values().cloned().collect();
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.merge_active(&accounts, None).await {
                warn!(error = %e, "Account batch persist failed");
            }
        });
    }
}

fn lease_for(account: &Account, best_effort: bool) -> Lease {
    Lease {
        id: account.id.clone(),
        access_token: account.access_secret.clone().unwrap_or_default(),
        project_id: account.project_id.clone(),
        session_id: account.session_id.clone(),
        best_effort,
    }
}

/// 400/403-class refresh or onboarding failures permanently disable the
/// credential; everything else is treated as transient.
fn refresh_failure_disables(err: &CastorError) -> bool {
    match err {
        CastorError::Oauth(OauthError::ServerResponse { .. }) => true,
        CastorError::Oauth(OauthError::UpstreamStatus(status))
        | CastorError::UpstreamStatus(status) => {
            *status == StatusCode::BAD_REQUEST || *status == StatusCode::FORBIDDEN
        }
        _ => false,
    }
}

/// Async spawn of the pool actor and return a handle. Actor names carry a
/// process-unique suffix so several pools can coexist (tests, reload
/// drills).
pub async fn spawn(
    store: AccountStore,
    quota: Arc<dyn QuotaView>,
    cooldown: Arc<dyn CooldownView>,
    pool_cfg: PoolConfig,
    upstream_cfg: Arc<UpstreamConfig>,
    api: CodeAssistApi,
) -> PoolHandle {
    let (actor, _jh) = Actor::spawn(
        Some(format!("CredentialPool-{}", crate::pool::next_actor_suffix())),
        PoolActor,
        (store, quota, cooldown, pool_cfg, upstream_cfg, api),
    )
    .await
    .expect("failed to spawn CredentialPool actor");
    PoolHandle { actor }
}
