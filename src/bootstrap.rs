use crate::config::Config;
use crate::convert::ToolNameCache;
use crate::error::CastorError;
use crate::guard::IpGuard;
use crate::ledgers::{CooldownLedger, QuotaLedger};
use crate::pool::{self, PoolHandle};
use crate::relay::{FsImageSink, ImageSink};
use crate::sigcache::SignatureCache;
use crate::store::AccountStore;
use crate::upstream::{CodeAssistApi, Dispatcher};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const GUARD_SWEEP_PERIOD: Duration = Duration::from_secs(60);
const MEMORY_TIDY_PERIOD: Duration = Duration::from_secs(300);

/// Cooldown applied when a quota observation reports zero remaining,
/// bounded by the reported reset time when that is sooner.
const ZERO_QUOTA_COOLDOWN: Duration = Duration::from_secs(60);

/// Aggregates every long-lived component the server root owns.
///
/// Initialization order is explicit: store → pool → ledgers → dispatcher →
/// HTTP server. Keep this a simple struct (vs. a dynamic registry) to
/// preserve compile-time ergonomics.
#[derive(Clone)]
pub struct Gateway {
    pub cfg: Arc<Config>,
    pub store: AccountStore,
    pub quota: Arc<QuotaLedger>,
    pub cooldown: Arc<CooldownLedger>,
    pub guard: Arc<IpGuard>,
    pub sigcache: SignatureCache,
    pub names: Arc<ToolNameCache>,
    pub pool: PoolHandle,
    pub api: CodeAssistApi,
    pub dispatcher: Dispatcher,
    pub sink: Arc<dyn ImageSink>,
    pub started_at: Instant,
}

impl Gateway {
    pub async fn spawn(cfg: Config) -> Result<Self, CastorError> {
        let cfg = Arc::new(cfg);
        let data_dir = &cfg.basic.data_dir;

        let store = AccountStore::open(data_dir).await?;
        let quota = Arc::new(QuotaLedger::new(
            Some(data_dir.join("quotas.json")),
            Duration::from_secs(cfg.ledger.quota_idle_ttl_secs),
        ));
        let cooldown = Arc::new(CooldownLedger::new());
        let guard = Arc::new(IpGuard::new(
            cfg.guard.clone(),
            Some(data_dir.join("blocked_ips.json")),
        ));
        let sigcache = SignatureCache::new(cfg.relay.signature_policy);
        let names = Arc::new(ToolNameCache::new());
        let sink: Arc<dyn ImageSink> = Arc::new(FsImageSink::new(&cfg.relay));

        let api = CodeAssistApi::new(&cfg.upstream);
        let upstream_cfg = Arc::new(cfg.upstream.clone());
        let pool = pool::spawn(
            store.clone(),
            quota.clone(),
            cooldown.clone(),
            cfg.pool.clone(),
            upstream_cfg,
            api.clone(),
        )
        .await;

        let dispatcher = Dispatcher::new(
            api.clone(),
            pool.clone(),
            quota.clone(),
            cooldown.clone(),
            sigcache.clone(),
            cfg.convert.cache_tool_signatures,
            cfg.upstream.retry_max_times,
        );

        let gateway = Self {
            cfg,
            store,
            quota,
            cooldown,
            guard,
            sigcache,
            names,
            pool,
            api,
            dispatcher,
            sink,
            started_at: Instant::now(),
        };
        gateway.spawn_background_tasks();
        Ok(gateway)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn spawn_background_tasks(&self) {
        // Quota ledger flush + idle prune.
        {
            let quota = self.quota.clone();
            let period = Duration::from_secs(self.cfg.ledger.flush_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    quota.prune();
                    if let Err(e) = quota.flush() {
                        warn!(error = %e, "Quota ledger flush failed");
                    }
                }
            });
        }

        // IP guard sweeper.
        {
            let guard = self.guard.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(GUARD_SWEEP_PERIOD);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    guard.sweep();
                }
            });
        }

        // Memory tidy: run cache maintenance hooks.
        {
            let sigcache = self.sigcache.clone();
            let cooldown = self.cooldown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(MEMORY_TIDY_PERIOD);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    sigcache.tidy();
                    cooldown.tidy();
                }
            });
        }

        // Periodic per-credential quota refresh via fetchAvailableModels.
        {
            let store = self.store.clone();
            let api = self.api.clone();
            let quota = self.quota.clone();
            let cooldown = self.cooldown.clone();
            let pool = self.pool.clone();
            let period = Duration::from_secs(self.cfg.upstream.quota_refresh_secs.max(30));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    refresh_quota_pass(&store, &api, &quota, &cooldown, &pool).await;
                }
            });
        }
    }
}

/// One sweep over enabled credentials: pull the model catalog and fold the
/// reported quota into the ledger. Zero-remaining models start a cooldown;
/// a credential with no remaining budget anywhere drops its coarse flag.
async fn refresh_quota_pass(
    store: &AccountStore,
    api: &CodeAssistApi,
    quota: &QuotaLedger,
    cooldown: &CooldownLedger,
    pool: &PoolHandle,
) {
    for account in store.read_all().await {
        if !account.enabled {
            continue;
        }
        let Some(token) = account.access_secret.as_deref() else {
            continue;
        };
        if account.access_expiry <= Utc::now() {
            continue;
        }

        let catalog = match api
            .fetch_available_models(token, account.project_id.as_deref())
            .await
        {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(id = %account.id, error = %e, "fetchAvailableModels failed");
                continue;
            }
        };

        let mut saw_quota = false;
        let mut any_remaining = false;
        for model in &catalog.models {
            let Some(info) = &model.quota_info else {
                continue;
            };
            saw_quota = true;
            quota.upsert(
                &account.id,
                &model.model_id,
                info.remaining_fraction,
                info.reset_time,
            );

            if info.remaining_fraction <= 0.0 {
                let until_reset = info
                    .reset_time
                    .and_then(|reset| (reset - Utc::now()).to_std().ok());
                let duration =
                    until_reset.map_or(ZERO_QUOTA_COOLDOWN, |d| d.min(ZERO_QUOTA_COOLDOWN));
                cooldown.mark(&account.id, &model.model_id, duration);
            } else {
                any_remaining = true;
            }
        }

        if saw_quota && !any_remaining {
            pool.mark_quota_exhausted(&account.id);
        }
    }
    info!("Quota refresh pass completed");
}
