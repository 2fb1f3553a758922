use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One upstream-authorized identity: a long-lived refresh secret plus a
/// short-lived access secret.
///
/// `session_id` is runtime-only: re-minted on every load so the upstream sees
/// a fresh client session per process/reload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Stable opaque id (salted hash of the refresh secret).
    pub id: String,

    pub refresh_secret: String,

    #[serde(default)]
    pub access_secret: Option<String>,

    #[serde(default = "epoch")]
    pub access_expiry: DateTime<Utc>,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    /// Coarse rotation flag driven by the quota-exhausted strategy.
    #[serde(default = "default_true")]
    pub has_quota: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(skip, default = "mint_session_id")]
    pub session_id: String,
}

impl Account {
    pub fn new(id: String, refresh_secret: String) -> Self {
        Self {
            id,
            refresh_secret,
            access_secret: None,
            access_expiry: epoch(),
            project_id: None,
            email: None,
            has_quota: true,
            enabled: true,
            session_id: mint_session_id(),
        }
    }

    /// True when the access secret is missing, expired, or expires within
    /// `buffer`.
    pub fn needs_refresh(&self, buffer: Duration) -> bool {
        self.access_secret.is_none() || Utc::now() + buffer >= self.access_expiry
    }

    /// Apply a successful token refresh, stamped with the caller-side clock.
    pub fn apply_refresh(&mut self, access_secret: String, expires_in_secs: i64) {
        self.access_secret = Some(access_secret);
        self.access_expiry = Utc::now() + Duration::seconds(expires_in_secs);
    }

    pub fn remint_session(&mut self) {
        self.session_id = mint_session_id();
    }
}

fn mint_session_id() -> String {
    Uuid::new_v4().to_string()
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_account_needs_refresh() {
        let acct = Account::new("id-1".to_string(), "secret".to_string());
        assert!(acct.needs_refresh(Duration::seconds(60)));
    }

    #[test]
    fn refresh_within_buffer_still_counts_as_expired() {
        let mut acct = Account::new("id-1".to_string(), "secret".to_string());
        acct.apply_refresh("token".to_string(), 30);
        assert!(acct.needs_refresh(Duration::seconds(60)));

        acct.apply_refresh("token".to_string(), 3600);
        assert!(!acct.needs_refresh(Duration::seconds(60)));
    }

    #[test]
    fn session_id_survives_serde_as_fresh_value() {
        let acct = Account::new("id-1".to_string(), "secret".to_string());
        let json = serde_json::to_string(&acct).unwrap();
        assert!(!json.contains(&acct.session_id));

        let restored: Account = serde_json::from_str(&json).unwrap();
        assert!(!restored.session_id.is_empty());
        assert_ne!(restored.session_id, acct.session_id);
    }
}
