use crate::error::CastorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Coarse model family used only for UI summarization; matching never
/// influences scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelGroup {
    Claude,
    Gemini,
    Banana,
    Other,
}

impl ModelGroup {
    /// Case-insensitive substring grouping. The image family is probed before
    /// the generic `gemini` match since its ids also contain "gemini".
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.contains("claude") {
            ModelGroup::Claude
        } else if lower.contains("banana") || lower.contains("gemini-3-pro-image") {
            ModelGroup::Banana
        } else if lower.contains("gemini") {
            ModelGroup::Gemini
        } else {
            ModelGroup::Other
        }
    }
}

/// One upstream-reported quota observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuotaEntry {
    /// Remaining fraction of the per-model budget, in `[0, 1]`.
    pub remaining_fraction: f64,
    pub reset_time: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

/// Per-request quota cost heuristic inherited from the upstream UI; kept
/// verbatim for display parity. Never used for scheduling.
const ESTIMATED_PCT_PER_REQUEST: f64 = 0.6667;

#[derive(Default)]
struct Inner {
    entries: HashMap<(String, String), QuotaEntry>,
    counters: HashMap<(String, ModelGroup), u64>,
}

/// Memory-backed per-(credential, model) quota cache with a JSON side file.
pub struct QuotaLedger {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
    idle_ttl: Duration,
}

impl QuotaLedger {
    pub fn new(path: Option<PathBuf>, idle_ttl: Duration) -> Self {
        let ledger = Self {
            inner: Mutex::new(Inner::default()),
            path,
            idle_ttl,
        };
        ledger.load();
        ledger
    }

    pub fn upsert(
        &self,
        cred_id: &str,
        model: &str,
        remaining_fraction: f64,
        reset_time: Option<DateTime<Utc>>,
    ) {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        inner.entries.insert(
            (cred_id.to_string(), model.to_string()),
            QuotaEntry {
                remaining_fraction: remaining_fraction.clamp(0.0, 1.0),
                reset_time,
                observed_at: Utc::now(),
            },
        );
    }

    /// Per-model view for one credential.
    pub fn snapshot(&self, cred_id: &str) -> BTreeMap<String, QuotaEntry> {
        let inner = self.inner.lock().expect("quota lock poisoned");
        inner
            .entries
            .iter()
            .filter(|((id, _), _)| id == cred_id)
            .map(|((_, model), entry)| (model.clone(), entry.clone()))
            .collect()
    }

    /// True when no observation exists or the last one left budget.
    pub fn has_quota_for(&self, cred_id: &str, model: &str) -> bool {
        let inner = self.inner.lock().expect("quota lock poisoned");
        match inner
            .entries
            .get(&(cred_id.to_string(), model.to_string()))
        {
            Some(entry) => entry.remaining_fraction > 0.0,
            None => true,
        }
    }

    pub fn record_request(&self, cred_id: &str, group: ModelGroup) {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        *inner
            .counters
            .entry((cred_id.to_string(), group))
            .or_insert(0) += 1;
    }

    /// UI helper: `floor(remaining_pct / 0.6667) - requests_made`, clamped
    /// at zero.
    pub fn estimate_requests_remaining(
        &self,
        cred_id: &str,
        group: ModelGroup,
        min_remaining_fraction: f64,
    ) -> u64 {
        let inner = self.inner.lock().expect("quota lock poisoned");
        let made = inner
            .counters
            .get(&(cred_id.to_string(), group))
            .copied()
            .unwrap_or(0);

        let remaining_pct = min_remaining_fraction.clamp(0.0, 1.0) * 100.0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let budget = (remaining_pct / ESTIMATED_PCT_PER_REQUEST).floor() as u64;
        budget.saturating_sub(made)
    }

    /// Drop observations idle for longer than the TTL.
    pub fn prune(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.idle_ttl).unwrap_or(chrono::Duration::hours(1));
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.observed_at > cutoff);
        let dropped = before - inner.entries.len();
        if dropped > 0 {
            debug!(dropped, "Quota ledger pruned idle entries");
        }
    }

    /// Forget one credential entirely (admin delete / reload path).
    pub fn forget(&self, cred_id: &str) {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        inner.entries.retain(|(id, _), _| id != cred_id);
        inner.counters.retain(|(id, _), _| id != cred_id);
    }

    /// Serialize the cache to its side file (atomic replace). A missing
    /// configured path turns this into a no-op (tests).
    pub fn flush(&self) -> Result<(), CastorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = {
            let inner = self.inner.lock().expect("quota lock poisoned");
            QuotaFile::from_entries(&inner.entries, self.idle_ttl)
        };

        let bytes = serde_json::to_vec_pretty(&file)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load(&self) {
        let Some(path) = &self.path else { return };
        let Ok(bytes) = std::fs::read(path) else {
            return;
        };
        let Ok(file) = serde_json::from_slice::<QuotaFile>(&bytes) else {
            tracing::warn!(path = %path.display(), "Quota side file unreadable; starting empty");
            return;
        };

        let mut inner = self.inner.lock().expect("quota lock poisoned");
        for (cred_id, per_cred) in file.quotas {
            for (model, slot) in per_cred.models {
                inner.entries.insert(
                    (cred_id.clone(), model),
                    QuotaEntry {
                        remaining_fraction: slot.r,
                        reset_time: slot.t,
                        observed_at: per_cred.last_updated,
                    },
                );
            }
        }
    }
}

/// On-disk shape:
/// `{meta: {lastCleanup, ttl}, quotas: {<id>: {lastUpdated, models: {<model>: {r, t}}}}}`.
#[derive(Debug, Serialize, Deserialize)]
struct QuotaFile {
    meta: QuotaFileMeta,
    quotas: BTreeMap<String, QuotaFileCred>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaFileMeta {
    last_cleanup: DateTime<Utc>,
    ttl: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaFileCred {
    last_updated: DateTime<Utc>,
    models: BTreeMap<String, QuotaFileSlot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QuotaFileSlot {
    r: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    t: Option<DateTime<Utc>>,
}

impl QuotaFile {
    fn from_entries(entries: &HashMap<(String, String), QuotaEntry>, ttl: Duration) -> Self {
        let mut quotas: BTreeMap<String, QuotaFileCred> = BTreeMap::new();
        for ((cred_id, model), entry) in entries {
            let slot = quotas.entry(cred_id.clone()).or_insert_with(|| QuotaFileCred {
                last_updated: entry.observed_at,
                models: BTreeMap::new(),
            });
            slot.last_updated = slot.last_updated.max(entry.observed_at);
            slot.models.insert(
                model.clone(),
                QuotaFileSlot {
                    r: entry.remaining_fraction,
                    t: entry.reset_time,
                },
            );
        }
        Self {
            meta: QuotaFileMeta {
                last_cleanup: Utc::now(),
                ttl: ttl.as_secs(),
            },
            quotas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> QuotaLedger {
        QuotaLedger::new(None, Duration::from_secs(3600))
    }

    #[test]
    fn model_groups_match_in_documented_order() {
        assert_eq!(ModelGroup::for_model("claude-sonnet-4"), ModelGroup::Claude);
        assert_eq!(ModelGroup::for_model("Gemini-2.5-PRO"), ModelGroup::Gemini);
        assert_eq!(
            ModelGroup::for_model("gemini-3-pro-image-preview"),
            ModelGroup::Banana
        );
        assert_eq!(ModelGroup::for_model("nano-banana-2"), ModelGroup::Banana);
        assert_eq!(ModelGroup::for_model("gpt-oss"), ModelGroup::Other);
    }

    #[test]
    fn has_quota_defaults_true_and_follows_observations() {
        let ledger = ledger();
        assert!(ledger.has_quota_for("a", "gemini-2.5-pro"));

        ledger.upsert("a", "gemini-2.5-pro", 0.5, None);
        assert!(ledger.has_quota_for("a", "gemini-2.5-pro"));

        ledger.upsert("a", "gemini-2.5-pro", 0.0, None);
        assert!(!ledger.has_quota_for("a", "gemini-2.5-pro"));
        assert!(ledger.has_quota_for("a", "gemini-2.5-flash"));
    }

    #[test]
    fn estimate_uses_verbatim_formula() {
        let ledger = ledger();
        // floor(100 / 0.6667) = 149
        assert_eq!(
            ledger.estimate_requests_remaining("a", ModelGroup::Gemini, 1.0),
            149
        );

        ledger.record_request("a", ModelGroup::Gemini);
        ledger.record_request("a", ModelGroup::Gemini);
        assert_eq!(
            ledger.estimate_requests_remaining("a", ModelGroup::Gemini, 1.0),
            147
        );

        // Clamped at zero.
        assert_eq!(
            ledger.estimate_requests_remaining("a", ModelGroup::Gemini, 0.0),
            0
        );
    }

    #[test]
    fn counters_are_scoped_per_group() {
        let ledger = ledger();
        ledger.record_request("a", ModelGroup::Gemini);
        assert_eq!(
            ledger.estimate_requests_remaining("a", ModelGroup::Banana, 1.0),
            149
        );
    }

    #[test]
    fn snapshot_filters_by_credential() {
        let ledger = ledger();
        ledger.upsert("a", "m1", 0.9, None);
        ledger.upsert("a", "m2", 0.1, None);
        ledger.upsert("b", "m1", 0.2, None);

        let snap = ledger.snapshot("a");
        assert_eq!(snap.len(), 2);
        assert!((snap["m1"].remaining_fraction - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn flush_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quotas.json");

        let ledger = QuotaLedger::new(Some(path.clone()), Duration::from_secs(3600));
        ledger.upsert("cred-1", "gemini-2.5-pro", 0.75, Some(Utc::now()));
        ledger.flush().unwrap();

        let reloaded = QuotaLedger::new(Some(path), Duration::from_secs(3600));
        let snap = reloaded.snapshot("cred-1");
        assert!((snap["gemini-2.5-pro"].remaining_fraction - 0.75).abs() < f64::EPSILON);
    }
}
