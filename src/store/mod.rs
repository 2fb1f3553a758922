//! Encrypted-at-rest credential storage.
//!
//! The account list is persisted as one AES-256-GCM blob next to a salt file.
//! The salt both keys the blob and derives the stable account ids, so losing
//! it regenerates every id.

mod account;
mod vault;

pub use account::Account;
pub use vault::Vault;

use crate::error::CastorError;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const ACCOUNTS_FILE: &str = "accounts.bin";
const SALT_FILE: &str = "accounts.salt";

/// Serialized-write view over the encrypted account blob.
///
/// Reads go through the in-memory cache; every mutation rewrites the blob
/// atomically (temp file + rename) while holding the store lock.
#[derive(Clone)]
pub struct AccountStore {
    inner: Arc<Mutex<StoreInner>>,
    vault: Arc<Vault>,
}

struct StoreInner {
    accounts: Vec<Account>,
}

impl AccountStore {
    /// Open (or initialize) the store under `data_dir`. A failure to decrypt
    /// an existing blob is fatal and surfaced to the operator.
    pub async fn open(data_dir: &Path) -> Result<Self, CastorError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let vault = Vault::open(data_dir.join(SALT_FILE), data_dir.join(ACCOUNTS_FILE)).await?;

        let accounts: Vec<Account> = match vault.read_blob().await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| CastorError::StoreCorrupted(e.to_string()))?,
            None => Vec::new(),
        };

        info!(count = accounts.len(), "Account store opened");
        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner { accounts })),
            vault: Arc::new(vault),
        })
    }

    /// Stable opaque id for a refresh secret: salted SHA-256, truncated.
    /// The id never exposes the secret and survives restarts.
    pub fn compute_id(&self, refresh_secret: &str) -> String {
        self.vault.compute_id(refresh_secret)
    }

    /// The persisted id-derivation salt. Losing it regenerates every id.
    pub fn salt(&self) -> &[u8; 32] {
        self.vault.salt()
    }

    pub async fn read_all(&self) -> Vec<Account> {
        self.inner.lock().await.accounts.clone()
    }

    /// Replace the whole list and persist.
    pub async fn write_all(&self, accounts: Vec<Account>) -> Result<(), CastorError> {
        let mut inner = self.inner.lock().await;
        inner.accounts = dedup_by_id(accounts);
        self.persist(&inner.accounts).await
    }

    /// Merge the caller's working copies into the canonical list and persist.
    ///
    /// Accounts in `active` overwrite same-id entries on disk; entries on disk
    /// but absent from `active` are kept (they may belong to another working
    /// set). `updated` wins last. The operation is idempotent.
    pub async fn merge_active(
        &self,
        active: &[Account],
        updated: Option<&Account>,
    ) -> Result<(), CastorError> {
        let mut inner = self.inner.lock().await;

        for account in active {
            upsert(&mut inner.accounts, account.clone());
        }
        if let Some(account) = updated {
            upsert(&mut inner.accounts, account.clone());
        }

        self.persist(&inner.accounts).await
    }

    /// Delete by id and persist. Returns whether anything was removed.
    pub async fn remove(&self, id: &str) -> Result<bool, CastorError> {
        let mut inner = self.inner.lock().await;
        let before = inner.accounts.len();
        inner.accounts.retain(|account| account.id != id);
        let removed = inner.accounts.len() != before;
        if removed {
            self.persist(&inner.accounts).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, accounts: &[Account]) -> Result<(), CastorError> {
        let bytes = serde_json::to_vec(accounts)?;
        self.vault.write_blob(&bytes).await?;
        debug!(count = accounts.len(), "Account store persisted");
        Ok(())
    }
}

fn upsert(accounts: &mut Vec<Account>, account: Account) {
    match accounts.iter_mut().find(|existing| existing.id == account.id) {
        Some(existing) => *existing = account,
        None => accounts.push(account),
    }
}

fn dedup_by_id(accounts: Vec<Account>) -> Vec<Account> {
    let mut out: Vec<Account> = Vec::with_capacity(accounts.len());
    for account in accounts {
        upsert(&mut out, account);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(store: &AccountStore, secret: &str) -> Account {
        Account::new(store.compute_id(secret), secret.to_string())
    }

    #[tokio::test]
    async fn ids_are_stable_and_secret_free() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::open(dir.path()).await.unwrap();

        let id_a = store.compute_id("refresh-secret-a");
        let id_b = store.compute_id("refresh-secret-b");
        assert_eq!(id_a, store.compute_id("refresh-secret-a"));
        assert_ne!(id_a, id_b);
        assert!(!id_a.contains("refresh-secret-a"));
    }

    #[tokio::test]
    async fn write_then_reopen_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = AccountStore::open(dir.path()).await.unwrap();
            let mut acct = account(&store, "secret-1");
            acct.email = Some("a@example.com".to_string());
            store.write_all(vec![acct]).await.unwrap();
        }

        let store = AccountStore::open(dir.path()).await.unwrap();
        let accounts = store.read_all().await;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].email.as_deref(), Some("a@example.com"));
        assert_eq!(accounts[0].refresh_secret, "secret-1");
    }

    #[tokio::test]
    async fn duplicate_refresh_secrets_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::open(dir.path()).await.unwrap();

        let first = account(&store, "same-secret");
        let second = account(&store, "same-secret");
        store.write_all(vec![first, second]).await.unwrap();

        assert_eq!(store.read_all().await.len(), 1);
    }

    #[tokio::test]
    async fn merge_active_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::open(dir.path()).await.unwrap();

        let mut base = account(&store, "secret-1");
        store.write_all(vec![base.clone()]).await.unwrap();

        base.access_secret = Some("token".to_string());
        base.access_expiry = Utc::now();
        let other = account(&store, "secret-2");

        store
            .merge_active(std::slice::from_ref(&other), Some(&base))
            .await
            .unwrap();
        let once = store.read_all().await;

        store
            .merge_active(std::slice::from_ref(&other), Some(&base))
            .await
            .unwrap();
        let twice = store.read_all().await;

        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
        assert_eq!(once.len(), 2);
    }
}
