use crate::error::CastorError;
use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::info;

const SALT_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const KEY_CONTEXT: &[u8] = b"castor-store-key-v1";
const ID_CONTEXT: &[u8] = b"castor-account-id-v1";
const ID_HEX_CHARS: usize = 32;

/// Salt-derived AES-256-GCM encryption for the account blob, plus the salted
/// id derivation. The salt is created on first use and never rotated
/// automatically.
pub struct Vault {
    salt: [u8; SALT_BYTES],
    key: [u8; 32],
    blob_path: PathBuf,
}

impl Vault {
    pub async fn open(salt_path: PathBuf, blob_path: PathBuf) -> Result<Self, CastorError> {
        let salt = match tokio::fs::read(&salt_path).await {
            Ok(bytes) => <[u8; SALT_BYTES]>::try_from(bytes.as_slice()).map_err(|_| {
                CastorError::StoreCorrupted(format!(
                    "salt file {} has wrong length {}",
                    salt_path.display(),
                    bytes.len()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_BYTES];
                rand::rng().fill_bytes(&mut salt);
                write_atomic(&salt_path, &salt).await?;
                info!(path = %salt_path.display(), "Store salt created");
                salt
            }
            Err(e) => return Err(e.into()),
        };

        let mut hasher = Sha256::new();
        hasher.update(KEY_CONTEXT);
        hasher.update(salt);
        let key: [u8; 32] = hasher.finalize().into();

        Ok(Self {
            salt,
            key,
            blob_path,
        })
    }

    pub fn salt(&self) -> &[u8; SALT_BYTES] {
        &self.salt
    }

    /// Salted, truncated SHA-256 of the refresh secret: stable across runs,
    /// useless for recovering the secret.
    pub fn compute_id(&self, refresh_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(ID_CONTEXT);
        hasher.update(self.salt);
        hasher.update(refresh_secret.as_bytes());
        let digest = hasher.finalize();
        hex_lower(&digest)[..ID_HEX_CHARS].to_string()
    }

    /// Decrypt the blob, `None` when it does not exist yet.
    pub async fn read_blob(&self) -> Result<Option<Vec<u8>>, CastorError> {
        let encoded = match tokio::fs::read_to_string(&self.blob_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| CastorError::StoreCorrupted(format!("blob base64: {e}")))?;
        if raw.len() < NONCE_BYTES {
            return Err(CastorError::StoreCorrupted("blob too short".to_string()));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_BYTES);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                CastorError::StoreDecrypt(format!(
                    "cannot decrypt {}; wrong or replaced salt file?",
                    self.blob_path.display()
                ))
            })?;
        Ok(Some(plaintext))
    }

    /// Encrypt and atomically replace the blob.
    pub async fn write_blob(&self, plaintext: &[u8]) -> Result<(), CastorError> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CastorError::Unexpected(format!("encrypt failed: {e}")))?;

        let mut raw = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&ciphertext);

        write_atomic(&self.blob_path, BASE64.encode(raw).as_bytes()).await
    }
}

/// Temp-file-then-rename so concurrent readers never observe a torn blob.
async fn write_atomic(path: &PathBuf, bytes: &[u8]) -> Result<(), CastorError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_vault(dir: &std::path::Path) -> Vault {
        Vault::open(dir.join("salt"), dir.join("blob")).await.unwrap()
    }

    #[tokio::test]
    async fn blob_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(dir.path()).await;

        assert!(vault.read_blob().await.unwrap().is_none());
        vault.write_blob(b"hello accounts").await.unwrap();
        assert_eq!(
            vault.read_blob().await.unwrap().as_deref(),
            Some(b"hello accounts".as_slice())
        );
    }

    #[tokio::test]
    async fn salt_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let first = open_vault(dir.path()).await;
        let second = open_vault(dir.path()).await;
        assert_eq!(first.salt(), second.salt());
        assert_eq!(first.compute_id("x"), second.compute_id("x"));
    }

    #[tokio::test]
    async fn losing_the_salt_changes_ids_and_breaks_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        vault.write_blob(b"data").await.unwrap();
        let old_id = vault.compute_id("secret");

        tokio::fs::remove_file(dir.path().join("salt")).await.unwrap();
        let reborn = open_vault(dir.path()).await;

        assert_ne!(reborn.compute_id("secret"), old_id);
        assert!(matches!(
            reborn.read_blob().await,
            Err(CastorError::StoreDecrypt(_))
        ));
    }

    #[tokio::test]
    async fn id_is_fixed_width_hex() {
        let dir = tempfile::tempdir().unwrap();
        let vault = open_vault(dir.path()).await;
        let id = vault.compute_id("secret");
        assert_eq!(id.len(), ID_HEX_CHARS);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
