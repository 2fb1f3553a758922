use crate::config::RotationStrategy;
use std::collections::HashMap;

/// Outcome of one selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub id: String,
    /// The quota-exhausted working list emptied and every flag was reset
    /// before this pick; the owner should persist the reset.
    pub exhausted_reset: bool,
}

/// Core rotation logic for credentials (no IO, no locks).
///
/// All strategies walk the same ordered list of enabled credential ids; the
/// strategy only decides when the cursor advances.
pub struct Rotation {
    strategy: RotationStrategy,
    rotate_every: u32,
    order: Vec<String>,
    cursor: usize,
    /// Calls served at the current cursor (request_count strategy).
    served_at_cursor: u32,
    /// Coarse per-credential budget flags (quota_exhausted strategy).
    has_quota: HashMap<String, bool>,
}

impl Rotation {
    pub fn new(strategy: RotationStrategy, rotate_every: u32) -> Self {
        Self {
            strategy,
            rotate_every: rotate_every.max(1),
            order: Vec::new(),
            cursor: 0,
            served_at_cursor: 0,
            has_quota: HashMap::new(),
        }
    }

    /// Replace the credential list; counters and cursor restart, quota flags
    /// are taken from the caller (persisted state).
    pub fn seed<I>(&mut self, creds: I)
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        self.order.clear();
        self.has_quota.clear();
        for (id, has_quota) in creds {
            if !self.order.contains(&id) {
                self.order.push(id.clone());
                self.has_quota.insert(id, has_quota);
            }
        }
        self.cursor = 0;
        self.served_at_cursor = 0;
    }

    /// Change strategy at runtime; counters reset.
    pub fn set_strategy(&mut self, strategy: RotationStrategy, rotate_every: u32) {
        self.strategy = strategy;
        self.rotate_every = rotate_every.max(1);
        self.cursor = 0;
        self.served_at_cursor = 0;
    }

    pub fn add(&mut self, id: String) {
        if !self.order.contains(&id) {
            self.has_quota.insert(id.clone(), true);
            self.order.push(id);
        }
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|existing| existing == id) {
            self.order.remove(pos);
            self.has_quota.remove(id);
            if self.order.is_empty() {
                self.cursor = 0;
            } else {
                if pos < self.cursor {
                    self.cursor -= 1;
                }
                if self.cursor >= self.order.len() {
                    self.cursor = 0;
                }
            }
            self.served_at_cursor = 0;
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.order.iter().any(|existing| existing == id)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Flip a credential's coarse budget flag off (capacity signal).
    pub fn mark_exhausted(&mut self, id: &str) {
        if let Some(flag) = self.has_quota.get_mut(id) {
            *flag = false;
        }
    }

    /// Pick the next credential among those passing `filter`. Returns `None`
    /// only when no credential passes; callers fall back to an unfiltered
    /// pick for the best-effort path.
    pub fn select<F>(&mut self, mut filter: F) -> Option<Selection>
    where
        F: FnMut(&str) -> bool,
    {
        if self.order.is_empty() {
            return None;
        }

        let mut exhausted_reset = false;
        if self.strategy == RotationStrategy::QuotaExhausted
            && !self.order.iter().any(|id| self.has_quota[id])
        {
            // Self-heal: assume the upstream rolled its quota window.
            for flag in self.has_quota.values_mut() {
                *flag = true;
            }
            self.cursor = 0;
            exhausted_reset = true;
        }

        let len = self.order.len();
        for step in 0..len {
            let index = (self.cursor + step) % len;
            let id = &self.order[index];

            if self.strategy == RotationStrategy::QuotaExhausted && !self.has_quota[id] {
                continue;
            }
            if !filter(id) {
                continue;
            }

            let id = id.clone();
            self.advance_from(index, step);
            return Some(Selection {
                id,
                exhausted_reset,
            });
        }
        None
    }

    fn advance_from(&mut self, index: usize, skipped: usize) {
        let len = self.order.len();
        match self.strategy {
            RotationStrategy::RoundRobin => {
                self.cursor = (index + 1) % len;
            }
            RotationStrategy::RequestCount => {
                if skipped > 0 {
                    // The cursor credential was filtered out; restart the
                    // count on the one actually served.
                    self.cursor = index;
                    self.served_at_cursor = 0;
                }
                self.served_at_cursor += 1;
                if self.served_at_cursor >= self.rotate_every {
                    self.cursor = (index + 1) % len;
                    self.served_at_cursor = 0;
                }
            }
            RotationStrategy::QuotaExhausted => {
                // Stay on the same credential until its budget flag drops.
                self.cursor = index;
            }
        }
    }
}
