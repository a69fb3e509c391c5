mod s3;

pub use s3::S3ObjectStore;

use async_trait::async_trait;
use camino::Utf8Path;

/// Abstraction over the S3-compatible object store used for chunk upload/download and
/// remote cleanup. Keys are always `<sessionId>/chunks/<filename>` for chunk objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(&self, key: &str, local_path: &Utf8Path) -> anyhow::Result<()>;

    async fn get_file(&self, key: &str, local_path: &Utf8Path) -> anyhow::Result<()>;

    /// Lists object keys under `prefix`.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Best-effort bulk delete; implementations may fall back to per-key delete
    /// internally, but the caller (the Cleaner) still retries per-object on failure.
    async fn delete_many(&self, keys: &[String]) -> anyhow::Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}
