use crate::config::RelayConfig;
use crate::error::CastorError;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Opaque image persistence: bytes in, public URL out. The production
/// deployment may swap in a remote saver; the gateway only relies on this
/// contract.
#[async_trait]
pub trait ImageSink: Send + Sync {
    async fn save(&self, mime: &str, bytes: Vec<u8>) -> Result<String, CastorError>;
}

/// Filesystem-backed sink serving under a configured base URL.
pub struct FsImageSink {
    dir: PathBuf,
    base_url: String,
}

impl FsImageSink {
    pub fn new(cfg: &RelayConfig) -> Self {
        Self {
            dir: cfg.image_dir.clone(),
            base_url: cfg.image_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageSink for FsImageSink {
    async fn save(&self, mime: &str, bytes: Vec<u8>) -> Result<String, CastorError> {
        let ext = match mime {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "bin",
        };
        let name = format!("{}.{ext}", Uuid::new_v4());

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(&name);
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "Image saved");

        Ok(format!("{}/{name}", self.base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_writes_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsImageSink {
            dir: dir.path().to_path_buf(),
            base_url: "https://example.com/images".to_string(),
        };

        let url = sink.save("image/png", vec![1, 2, 3]).await.unwrap();
        assert!(url.starts_with("https://example.com/images/"));
        assert!(url.ends_with(".png"));

        let name = url.rsplit('/').next().unwrap();
        let stored = std::fs::read(dir.path().join(name)).unwrap();
        assert_eq!(stored, vec![1, 2, 3]);
    }
}
