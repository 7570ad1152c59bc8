use std::path::PathBuf;

use anyhow::{Result, bail};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Where uploaded profile photos live.
pub trait BlobStore: Send + Sync + 'static {
    /// Store `data` under `key` and return the public URL.
    fn put(
        &self,
        key: String,
        content_type: String,
        data: Bytes,
    ) -> BoxFuture<'static, Result<String>>;

    fn delete(&self, key: String) -> BoxFuture<'static, Result<()>>;
}

/// Manages photo storage on local disk.
///
/// Each photo is a single flat file at `{dir}/{key}`, served back under
/// `{public_url}/uploads/{key}`.
#[derive(Clone)]
pub struct LocalBlobStore {
    dir: PathBuf,
    public_url: String,
}

impl LocalBlobStore {
    pub async fn new(dir: PathBuf, public_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Photo storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Keys are generated server-side; anything that could escape the directory is refused.
    fn file_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            bail!("invalid storage key '{}'", key);
        }
        Ok(self.dir.join(key))
    }
}

impl BlobStore for LocalBlobStore {
    fn put(
        &self,
        key: String,
        _content_type: String,
        data: Bytes,
    ) -> BoxFuture<'static, Result<String>> {
        let store = self.clone();
        Box::pin(async move {
            let path = store.file_path(&key)?;
            let mut file = fs::File::create(&path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            Ok(format!("{}/uploads/{}", store.public_url, key))
        })
    }

    fn delete(&self, key: String) -> BoxFuture<'static, Result<()>> {
        let store = self.clone();
        Box::pin(async move {
            let path = store.file_path(&key)?;
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!("Deleted photo {}", key);
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Photo {} already gone", key);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// File extension for an accepted image content type.
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}
