mod libsql_store;
mod memory_store;

pub use libsql_store::LibsqlSessionRepository;
pub use memory_store::MemorySessionRepository;

use async_trait::async_trait;

use crate::session::Session;

/// Key-value backed storage for [`Session`] records. Writes are atomic per session key;
/// the active-session membership index may drift from the record set under concurrent
/// writers, and [`SessionRepository::cleanup_orphaned_sessions`] is the repair path.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Upserts `session` and refreshes its TTL to `max_age_hours` from now.
    async fn save(&self, session: &Session, max_age_hours: u64) -> anyhow::Result<()>;

    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<Session>>;

    async fn exists(&self, session_id: &str) -> anyhow::Result<bool> {
        Ok(self.find_by_id(session_id).await?.is_some())
    }

    async fn find_all_active_sessions(&self) -> anyhow::Result<Vec<Session>>;

    async fn find_all_inactive_sessions(&self) -> anyhow::Result<Vec<Session>>;

    async fn find_all(&self) -> anyhow::Result<Vec<Session>>;

    async fn delete_by_id(&self, session_id: &str) -> anyhow::Result<()>;

    async fn delete_all(&self, session_ids: &[String]) -> anyhow::Result<()> {
        for id in session_ids {
            self.delete_by_id(id).await?;
        }
        Ok(())
    }

    /// Removes active-index entries with no matching record, and vice versa. Returns the
    /// number of repaired entries.
    async fn cleanup_orphaned_sessions(&self) -> anyhow::Result<usize>;

    /// Deletes records whose last write is older than `max_age_hours`. Returns the number
    /// of deleted records.
    async fn cleanup_old_inactive_sessions_by_ttl(&self, max_age_hours: u64) -> anyhow::Result<usize>;
}
