use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Timed per-(credential, model) exclusion after upstream rate/capacity
/// signals. Pure in-memory; entries expire by comparison, not by sweeping.
#[derive(Default)]
pub struct CooldownLedger {
    entries: Mutex<HashMap<(String, String), Instant>>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or extend) a cooldown. An existing later deadline is never
    /// shortened.
    pub fn mark(&self, cred_id: &str, model: &str, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut entries = self.entries.lock().expect("cooldown lock poisoned");
        let slot = entries
            .entry((cred_id.to_string(), model.to_string()))
            .or_insert(deadline);
        if deadline > *slot {
            *slot = deadline;
        }
    }

    /// False while the pair is cooling down.
    pub fn available(&self, cred_id: &str, model: &str) -> bool {
        let entries = self.entries.lock().expect("cooldown lock poisoned");
        match entries.get(&(cred_id.to_string(), model.to_string())) {
            Some(deadline) => Instant::now() >= *deadline,
            None => true,
        }
    }

    /// Clear one model's cooldown, or every cooldown of the credential.
    pub fn clear(&self, cred_id: &str, model: Option<&str>) {
        let mut entries = self.entries.lock().expect("cooldown lock poisoned");
        match model {
            Some(model) => {
                entries.remove(&(cred_id.to_string(), model.to_string()));
            }
            None => entries.retain(|(id, _), _| id != cred_id),
        }
    }

    /// Drop already-expired entries; called by the periodic memory tidy.
    pub fn tidy(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .expect("cooldown lock poisoned")
            .retain(|_, deadline| *deadline > now);
    }
}
