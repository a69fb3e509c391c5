use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use time::OffsetDateTime;

use super::SessionRepository;
use crate::session::Session;

struct Entry {
    session: Session,
    expires_at: OffsetDateTime,
}

/// In-process implementation used by the test suite. Structurally mirrors the libsql
/// implementation's key layout: a record map plus a separate active-id set, so tests
/// exercise the same drift-and-repair behavior production does.
#[derive(Default)]
pub struct MemorySessionRepository {
    records: RwLock<HashMap<String, Entry>>,
    active_index: RwLock<std::collections::HashSet<String>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn save(&self, session: &Session, max_age_hours: u64) -> anyhow::Result<()> {
        let expires_at = OffsetDateTime::now_utc() + time::Duration::hours(max_age_hours as i64);
        self.records.write().insert(
            session.session_id.clone(),
            Entry {
                session: session.clone(),
                expires_at,
            },
        );
        let mut index = self.active_index.write();
        if session.active {
            index.insert(session.session_id.clone());
        } else {
            index.remove(&session.session_id);
        }
        Ok(())
    }

    async fn find_by_id(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.records.read().get(session_id).map(|e| e.session.clone()))
    }

    async fn find_all_active_sessions(&self) -> anyhow::Result<Vec<Session>> {
        let records = self.records.read();
        Ok(self
            .active_index
            .read()
            .iter()
            .filter_map(|id| records.get(id).map(|e| e.session.clone()))
            .collect())
    }

    async fn find_all_inactive_sessions(&self) -> anyhow::Result<Vec<Session>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|e| !e.session.active)
            .map(|e| e.session.clone())
            .collect())
    }

    async fn find_all(&self) -> anyhow::Result<Vec<Session>> {
        Ok(self.records.read().values().map(|e| e.session.clone()).collect())
    }

    async fn delete_by_id(&self, session_id: &str) -> anyhow::Result<()> {
        self.records.write().remove(session_id);
        self.active_index.write().remove(session_id);
        Ok(())
    }

    async fn cleanup_orphaned_sessions(&self) -> anyhow::Result<usize> {
        let records = self.records.read();
        let mut index = self.active_index.write();
        let before = index.len();
        index.retain(|id| records.get(id).is_some_and(|e| e.session.active));
        Ok(before - index.len())
    }

    async fn cleanup_old_inactive_sessions_by_ttl(&self, _max_age_hours: u64) -> anyhow::Result<usize> {
        let now = OffsetDateTime::now_utc();
        let mut records = self.records.write();
        let expired: Vec<String> = records
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            records.remove(id);
        }
        drop(records);
        let mut index = self.active_index.write();
        for id in &expired {
            index.remove(id);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Status;

    fn sample(id: &str, active: bool) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            session_id: id.to_owned(),
            client_id: "client-1".to_owned(),
            client_host: None,
            unique_session_id: None,
            original_session_id: None,
            status: if active { Status::Recording } else { Status::Inactive },
            active,
            created_at: now,
            last_heartbeat: now,
            last_chunk: None,
            recording_path: None,
            metadata: None,
            environment: None,
        }
    }

    #[tokio::test]
    async fn save_and_find_roundtrip() {
        let repo = MemorySessionRepository::new();
        repo.save(&sample("s1", true), 24).await.unwrap();
        let found = repo.find_by_id("s1").await.unwrap().expect("session present");
        assert_eq!(found.session_id, "s1");
        assert_eq!(repo.find_all_active_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn orphan_cleanup_repairs_index_drift() {
        let repo = MemorySessionRepository::new();
        repo.save(&sample("s1", true), 24).await.unwrap();
        // simulate drift: mark inactive in the record without updating the index
        repo.records.write().get_mut("s1").unwrap().session.active = false;
        let repaired = repo.cleanup_orphaned_sessions().await.unwrap();
        assert_eq!(repaired, 1);
        assert!(repo.find_all_active_sessions().await.unwrap().is_empty());
    }
}
