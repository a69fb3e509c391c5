//! Periodic background task: repairs active-index drift, fails silent/stuck sessions,
//! and evicts expired records. See SPEC_FULL.md §4.4 for the detection formulas.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rec_task::{ShutdownSignal, Task};
use time::OffsetDateTime;

use crate::config::ReaperConf;
use crate::session::{SessionHandle, Status};

pub struct Reaper {
    sessions: SessionHandle,
    conf: ReaperConf,
    /// Remembers the `last_chunk` seen at the previous tick, for stuckness detection.
    last_seen_chunk: HashMap<String, Option<String>>,
}

impl Reaper {
    pub fn new(sessions: SessionHandle, conf: ReaperConf) -> Self {
        Self {
            sessions,
            conf,
            last_seen_chunk: HashMap::new(),
        }
    }

    async fn tick(&mut self) {
        let repaired = self.sessions.cleanup_orphaned().await;
        if repaired > 0 {
            debug!(repaired, "repaired active-index drift");
        }

        let now = OffsetDateTime::now_utc();
        let active = self.sessions.snapshot().await;
        let mut still_present = HashMap::with_capacity(active.len());

        for session in active {
            let dt_secs = (now - session.last_heartbeat).whole_seconds().max(0) as u64;
            let chunk_time = self.conf.chunk_time_size_secs;

            let silent = dt_secs as i64 > (3 * chunk_time as i64 + 30);
            let stuck = {
                let prev = self.last_seen_chunk.get(&session.session_id);
                let unchanged = prev.is_some_and(|p| p == &session.last_chunk);
                unchanged && dt_secs > 2 * chunk_time
            };

            if dt_secs > self.conf.max_inactive_time_secs || silent || stuck {
                warn!(session_id = %session.session_id, dt_secs, silent, stuck, "reaping session as FAILED");
                if let Err(err) = self.sessions.reaper_transition(session.session_id.clone(), Status::Failed).await {
                    debug!(session_id = %session.session_id, %err, "reaper transition skipped");
                }
            }

            still_present.insert(session.session_id.clone(), session.last_chunk.clone());
        }

        self.last_seen_chunk = still_present;

        let expired = self.sessions.cleanup_expired(self.conf.max_age_hours).await;
        if expired > 0 {
            info!(expired, "evicted expired session records");
        }
    }
}

#[async_trait]
impl Task for Reaper {
    type Output = ();
    const NAME: &'static str = "reaper";

    async fn run(mut self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let mut interval = tokio::time::interval(Duration::from_millis(self.conf.cleanup_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_signal.wait() => return,
                _ = interval.tick() => self.tick().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{spawn_session_manager, RegisterRequest};
    use crate::store::MemorySessionRepository;

    #[tokio::test]
    async fn reaps_session_past_max_inactive_time() {
        let (sessions, _child, _reaper_handle) = spawn_session_manager(Box::new(MemorySessionRepository::new()), 24);

        sessions
            .register(RegisterRequest {
                session_id: "s1".to_owned(),
                client_id: "c1".to_owned(),
                client_host: None,
                unique_session_id: None,
                original_session_id: None,
                status: None,
                metadata: None,
                environment: None,
            })
            .await
            .unwrap();

        // Force the session to look stale by driving it through the store directly
        // would require a test-only hook; instead we validate the formula in isolation
        // via a tiny inactive-time threshold and a real elapsed sleep.
        let conf = ReaperConf {
            cleanup_interval_ms: 10,
            max_inactive_time_secs: 0,
            chunk_time_size_secs: 10,
            max_age_hours: 24,
        };
        let mut reaper = Reaper::new(sessions.clone(), conf);
        tokio::time::sleep(Duration::from_millis(5)).await;
        reaper.tick().await;

        let session = sessions.get("s1".to_owned()).await.unwrap();
        assert_eq!(session.status, Status::Failed);
    }
}
