//! Credential pool: rotation strategies over the account list, lazy
//! refresh with coalesced waiters, and hot reload.
//!
//! The pool reads quota/cooldown state through narrow views so it never
//! depends on the concrete ledgers.

mod actor;
mod refresher;
mod rotation;

pub use actor::{PoolHandle, spawn};
pub use rotation::{Rotation, Selection};

use crate::ledgers::{CooldownLedger, QuotaLedger};
use std::sync::atomic::{AtomicU64, Ordering};

static ACTOR_SUFFIX: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_actor_suffix() -> u64 {
    ACTOR_SUFFIX.fetch_add(1, Ordering::Relaxed)
}

/// Read-only quota facts the pool consults during selection.
pub trait QuotaView: Send + Sync {
    fn has_quota_for(&self, cred_id: &str, model: &str) -> bool;
}

/// Read-only cooldown facts the pool consults during selection.
pub trait CooldownView: Send + Sync {
    fn available(&self, cred_id: &str, model: &str) -> bool;
}

impl QuotaView for QuotaLedger {
    fn has_quota_for(&self, cred_id: &str, model: &str) -> bool {
        QuotaLedger::has_quota_for(self, cred_id, model)
    }
}

impl CooldownView for CooldownLedger {
    fn available(&self, cred_id: &str, model: &str) -> bool {
        CooldownLedger::available(self, cred_id, model)
    }
}

/// One issued credential grant.
#[derive(Debug, Clone)]
pub struct Lease {
    pub id: String,
    pub access_token: String,
    pub project_id: Option<String>,
    pub session_id: String,
    /// No credential passed the model filter; this one was issued anyway to
    /// avoid livelock and must not be retried on rate limit.
    pub best_effort: bool,
}
