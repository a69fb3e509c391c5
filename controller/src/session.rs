//! Session Service: the single authority for session state, fronted by an actor task
//! so that status-transition read-modify-write cycles never race each other in-process.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};

use crate::http::ServiceError;
use crate::store::SessionRepository;

/// Status transition retries before giving up with [`ServiceError::Conflict`].
const TRANSITION_RETRY_BOUND: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Starting,
    Recording,
    Paused,
    Stopping,
    Stopped,
    Completed,
    Failed,
    Inactive,
}

impl Status {
    /// Parses the case-insensitive names and aliases accepted on the REST surface.
    /// Returns `None` for values that are not recognized at all (as opposed to
    /// recognized-but-illegal-here, which is `InvalidTransition`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "started" | "starting" => Some(Self::Starting),
            "recording" => Some(Self::Recording),
            "paused" => Some(Self::Paused),
            "stopping" | "stopped" => Some(Self::Stopping),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    /// `true` if `self -> to` is an allowed transition per the status table.
    pub fn can_transition_to(self, to: Self) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Starting, Recording)
                | (Starting, Paused)
                | (Starting, Stopping)
                | (Starting, Failed)
                | (Starting, Inactive)
                | (Recording, Paused)
                | (Recording, Stopping)
                | (Recording, Failed)
                | (Recording, Inactive)
                | (Paused, Recording)
                | (Paused, Stopping)
                | (Paused, Failed)
                | (Paused, Inactive)
                | (Stopping, Stopped)
                | (Stopping, Completed)
                | (Stopping, Failed)
                | (Stopping, Inactive)
                | (Stopped, Completed)
                | (Stopped, Inactive)
                | (Completed, Inactive)
                | (Failed, Inactive)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Starting => "STARTING",
            Status::Recording => "RECORDING",
            Status::Paused => "PAUSED",
            Status::Stopping => "STOPPING",
            Status::Stopped => "STOPPED",
            Status::Completed => "COMPLETED",
            Status::Failed => "FAILED",
            Status::Inactive => "INACTIVE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub client_id: String,
    pub client_host: Option<String>,
    pub unique_session_id: Option<String>,
    pub original_session_id: Option<String>,
    pub status: Status,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_heartbeat: OffsetDateTime,
    pub last_chunk: Option<String>,
    pub recording_path: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub environment: Option<serde_json::Value>,
}

/// Request fields for [`SessionService::register`].
pub struct RegisterRequest {
    pub session_id: String,
    pub client_id: String,
    pub client_host: Option<String>,
    pub unique_session_id: Option<String>,
    pub original_session_id: Option<String>,
    pub status: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub environment: Option<serde_json::Value>,
}

/// Validates a chunk filename against `^[0-9]{4}\.mp4$` and returns it unchanged if valid.
pub fn validate_chunk_name(name: &str) -> Option<&str> {
    let digits = name.strip_suffix(".mp4")?;
    if digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(name)
    } else {
        None
    }
}

enum Message {
    Register {
        req: RegisterRequest,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    Heartbeat {
        session_id: String,
        last_chunk: Option<String>,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    UpdateStatus {
        session_id: String,
        status: String,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    UpdateRecordingPath {
        session_id: String,
        path: String,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    Stop {
        session_id: String,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    Deactivate {
        session_id: String,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    Deregister {
        session_id: String,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    Get {
        session_id: String,
        reply: oneshot::Sender<Result<Session, ServiceError>>,
    },
    ListActive {
        reply: oneshot::Sender<Vec<Session>>,
    },
    ListAll {
        reply: oneshot::Sender<Vec<Session>>,
    },
    ListInactive {
        reply: oneshot::Sender<Vec<Session>>,
    },
    IsActive {
        session_id: String,
        reply: oneshot::Sender<bool>,
    },
    Counts {
        reply: oneshot::Sender<SessionCounts>,
    },
    /// Used by the reaper: force a status transition without going through the
    /// REST-facing transition table validation error path (the reaper's own
    /// transitions, e.g. `-> FAILED`, are always legal per the table, but this
    /// avoids threading an extra "who's calling" flag through `update_status`).
    ReaperTransition {
        session_id: String,
        status: Status,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
    CleanupOrphaned {
        reply: oneshot::Sender<usize>,
    },
    CleanupExpired {
        max_age_hours: u64,
        reply: oneshot::Sender<usize>,
    },
    /// Snapshot used by the reaper to compute `dt` and stuckness without holding a lock.
    Snapshot {
        reply: oneshot::Sender<Vec<Session>>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionCounts {
    pub active: usize,
    pub total: usize,
    pub inactive: usize,
}

#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Message>,
}

impl SessionHandle {
    pub async fn register(&self, req: RegisterRequest) -> Result<Session, ServiceError> {
        self.call(|reply| Message::Register { req, reply }).await
    }

    pub async fn heartbeat(&self, session_id: String, last_chunk: Option<String>) -> Result<Session, ServiceError> {
        self.call(|reply| Message::Heartbeat {
            session_id,
            last_chunk,
            reply,
        })
        .await
    }

    pub async fn update_status(&self, session_id: String, status: String) -> Result<Session, ServiceError> {
        self.call(|reply| Message::UpdateStatus {
            session_id,
            status,
            reply,
        })
        .await
    }

    pub async fn update_recording_path(&self, session_id: String, path: String) -> Result<Session, ServiceError> {
        self.call(|reply| Message::UpdateRecordingPath { session_id, path, reply })
            .await
    }

    pub async fn stop(&self, session_id: String) -> Result<Session, ServiceError> {
        self.call(|reply| Message::Stop { session_id, reply }).await
    }

    pub async fn deactivate(&self, session_id: String) -> Result<Session, ServiceError> {
        self.call(|reply| Message::Deactivate { session_id, reply }).await
    }

    pub async fn deregister(&self, session_id: String) -> Result<(), ServiceError> {
        self.call(|reply| Message::Deregister { session_id, reply }).await
    }

    pub async fn get(&self, session_id: String) -> Result<Session, ServiceError> {
        self.call(|reply| Message::Get { session_id, reply }).await
    }

    pub async fn list_active(&self) -> Vec<Session> {
        self.call_infallible(|reply| Message::ListActive { reply }).await
    }

    pub async fn list_all(&self) -> Vec<Session> {
        self.call_infallible(|reply| Message::ListAll { reply }).await
    }

    pub async fn list_inactive(&self) -> Vec<Session> {
        self.call_infallible(|reply| Message::ListInactive { reply }).await
    }

    pub async fn is_active(&self, session_id: String) -> bool {
        self.call_infallible(|reply| Message::IsActive { session_id, reply }).await
    }

    pub async fn counts(&self) -> SessionCounts {
        self.call_infallible(|reply| Message::Counts { reply }).await
    }

    pub async fn reaper_transition(&self, session_id: String, status: Status) -> Result<(), ServiceError> {
        self.call(|reply| Message::ReaperTransition {
            session_id,
            status,
            reply,
        })
        .await
    }

    pub async fn cleanup_orphaned(&self) -> usize {
        self.call_infallible(|reply| Message::CleanupOrphaned { reply }).await
    }

    pub async fn cleanup_expired(&self, max_age_hours: u64) -> usize {
        self.call_infallible(|reply| Message::CleanupExpired { max_age_hours, reply })
            .await
    }

    pub async fn snapshot(&self) -> Vec<Session> {
        self.call_infallible(|reply| Message::Snapshot { reply }).await
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> Message) -> Result<T, ServiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(build(reply_tx))
            .await
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session service task is gone")))?;
        reply_rx
            .await
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("session service dropped the reply")))?
    }

    async fn call_infallible<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Message) -> T {
        let (reply_tx, reply_rx) = oneshot::channel();
        // The task only shuts down with the process; a send failure here is a bug, not a
        // recoverable condition, so we panic rather than invent a synthetic value.
        self.sender
            .send(build(reply_tx))
            .await
            .expect("session service task is gone");
        reply_rx.await.expect("session service dropped the reply")
    }
}

pub struct SessionManagerTask {
    repository: Box<dyn SessionRepository>,
    receiver: mpsc::Receiver<Message>,
    max_age_hours: u64,
}

pub fn spawn_session_manager(
    repository: Box<dyn SessionRepository>,
    max_age_hours: u64,
) -> (SessionHandle, rec_task::ChildTask<()>, SessionHandle) {
    let (sender, receiver) = mpsc::channel(256);
    let task = SessionManagerTask {
        repository,
        receiver,
        max_age_hours,
    };
    let handle = SessionHandle { sender: sender.clone() };
    let reaper_handle = SessionHandle { sender };
    let (_shutdown_handle, shutdown_signal) = rec_task::ShutdownHandle::new();
    let child = rec_task::ChildTask::spawn(async move { task.run(shutdown_signal).await });
    (handle, child, reaper_handle)
}

impl SessionManagerTask {
    async fn run(mut self, mut shutdown_signal: rec_task::ShutdownSignal) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown_signal.wait() => {
                    self.receiver.close();
                    while let Some(msg) = self.receiver.recv().await {
                        self.handle(msg).await;
                    }
                    return;
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(msg) => self.handle(msg).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle(&mut self, msg: Message) {
        match msg {
            Message::Register { req, reply } => {
                let _ = reply.send(self.register(req).await);
            }
            Message::Heartbeat {
                session_id,
                last_chunk,
                reply,
            } => {
                let _ = reply.send(self.heartbeat(&session_id, last_chunk).await);
            }
            Message::UpdateStatus {
                session_id,
                status,
                reply,
            } => {
                let _ = reply.send(self.update_status(&session_id, &status, false).await);
            }
            Message::UpdateRecordingPath { session_id, path, reply } => {
                let _ = reply.send(self.update_recording_path(&session_id, path).await);
            }
            Message::Stop { session_id, reply } => {
                let _ = reply.send(self.update_status(&session_id, "stopping", false).await);
            }
            Message::Deactivate { session_id, reply } => {
                let _ = reply.send(self.deactivate(&session_id).await);
            }
            Message::Deregister { session_id, reply } => {
                let _ = reply.send(self.deregister(&session_id).await);
            }
            Message::Get { session_id, reply } => {
                let _ = reply.send(self.get(&session_id).await);
            }
            Message::ListActive { reply } => {
                let _ = reply.send(self.repository.find_all_active_sessions().await.unwrap_or_default());
            }
            Message::ListAll { reply } => {
                let _ = reply.send(self.repository.find_all().await.unwrap_or_default());
            }
            Message::ListInactive { reply } => {
                let _ = reply.send(self.repository.find_all_inactive_sessions().await.unwrap_or_default());
            }
            Message::IsActive { session_id, reply } => {
                let active = self
                    .repository
                    .find_by_id(&session_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|s| s.active)
                    .unwrap_or(false);
                let _ = reply.send(active);
            }
            Message::Counts { reply } => {
                let all = self.repository.find_all().await.unwrap_or_default();
                let active = all.iter().filter(|s| s.active).count();
                let total = all.len();
                let _ = reply.send(SessionCounts {
                    active,
                    total,
                    inactive: total - active,
                });
            }
            Message::ReaperTransition {
                session_id,
                status,
                reply,
            } => {
                let name = status.to_string();
                let _ = reply.send(self.update_status(&session_id, &name, true).await.map(|_| ()));
            }
            Message::CleanupOrphaned { reply } => {
                let n = self.repository.cleanup_orphaned_sessions().await.unwrap_or(0);
                let _ = reply.send(n);
            }
            Message::CleanupExpired { max_age_hours, reply } => {
                let n = self
                    .repository
                    .cleanup_old_inactive_sessions_by_ttl(max_age_hours)
                    .await
                    .unwrap_or(0);
                let _ = reply.send(n);
            }
            Message::Snapshot { reply } => {
                let _ = reply.send(self.repository.find_all_active_sessions().await.unwrap_or_default());
            }
        }
    }

    async fn register(&mut self, req: RegisterRequest) -> Result<Session, ServiceError> {
        if req.session_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("sessionId must not be empty".into()));
        }
        if req.client_id.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("clientId must not be empty".into()));
        }

        if let Some(existing) = self
            .repository
            .find_by_id(&req.session_id)
            .await
            .map_err(ServiceError::Internal)?
        {
            let non_terminal = matches!(
                existing.status,
                Status::Starting | Status::Recording | Status::Paused | Status::Stopping
            );
            if non_terminal {
                return Err(ServiceError::AlreadyExists);
            }
        }

        let status = match req.status.as_deref() {
            Some(raw) => Status::parse(raw).unwrap_or(Status::Starting),
            None => Status::Starting,
        };

        let now = OffsetDateTime::now_utc();
        let session = Session {
            session_id: req.session_id,
            client_id: req.client_id,
            client_host: req.client_host,
            unique_session_id: req.unique_session_id,
            original_session_id: req.original_session_id,
            status,
            active: true,
            created_at: now,
            last_heartbeat: now,
            last_chunk: None,
            recording_path: None,
            metadata: req.metadata,
            environment: req.environment,
        };

        self.repository.save(&session, self.max_age_hours).await.map_err(ServiceError::Internal)?;
        Ok(session)
    }

    async fn heartbeat(&mut self, session_id: &str, last_chunk: Option<String>) -> Result<Session, ServiceError> {
        let mut session = self.get(session_id).await?;

        let now = OffsetDateTime::now_utc();
        session.last_heartbeat = session.last_heartbeat.max(now);

        if let Some(chunk) = last_chunk {
            if validate_chunk_name(&chunk).is_some() {
                let is_newer = session.last_chunk.as_deref().is_none_or(|prev| chunk.as_str() > prev);
                if is_newer {
                    session.last_chunk = Some(chunk);
                }
            }
        }

        self.repository
            .save(&session, self.max_age_hours)
            .await
            .map_err(ServiceError::Internal)?;
        Ok(session)
    }

    /// `bypass_check` is set for reaper-initiated transitions: the reaper only ever
    /// requests transitions that are legal per the table from any non-terminal state,
    /// but a session may have raced to a terminal state in between the reaper's
    /// snapshot and this call, in which case we silently no-op rather than error.
    async fn update_status(&mut self, session_id: &str, status: &str, bypass_check: bool) -> Result<Session, ServiceError> {
        let new_status = Status::parse(status).ok_or_else(|| ServiceError::InvalidStatus(status.to_owned()))?;

        for _ in 0..TRANSITION_RETRY_BOUND {
            let mut session = self.get(session_id).await?;

            if !session.status.can_transition_to(new_status) {
                if bypass_check {
                    return Ok(session);
                }
                return Err(ServiceError::InvalidTransition {
                    from: session.status.to_string(),
                    to: new_status.to_string(),
                });
            }

            let expected_status = session.status;
            session.status = new_status;
            if matches!(new_status, Status::Inactive) {
                session.active = false;
            }

            // Re-check under the "lock" (this actor is single-threaded, so the window
            // between read and write above never actually races another writer; the
            // retry loop exists so the code is correct if the repository is ever
            // shared by more than one writer, e.g. multiple controller replicas).
            let current = self.get(session_id).await?;
            if current.status != expected_status {
                continue;
            }

            self.repository
                .save(&session, self.max_age_hours)
                .await
                .map_err(ServiceError::Internal)?;
            return Ok(session);
        }

        Err(ServiceError::Conflict)
    }

    async fn update_recording_path(&mut self, session_id: &str, path: String) -> Result<Session, ServiceError> {
        if path.trim().is_empty() {
            return Err(ServiceError::InvalidArgument("recordingPath must not be empty".into()));
        }
        let mut session = self.get(session_id).await?;
        session.recording_path = Some(path);
        self.repository
            .save(&session, self.max_age_hours)
            .await
            .map_err(ServiceError::Internal)?;
        Ok(session)
    }

    async fn deactivate(&mut self, session_id: &str) -> Result<Session, ServiceError> {
        let mut session = self.get(session_id).await?;
        session.active = false;
        session.status = Status::Inactive;
        self.repository
            .save(&session, self.max_age_hours)
            .await
            .map_err(ServiceError::Internal)?;
        Ok(session)
    }

    async fn deregister(&mut self, session_id: &str) -> Result<(), ServiceError> {
        if self
            .repository
            .find_by_id(session_id)
            .await
            .map_err(ServiceError::Internal)?
            .is_none()
        {
            return Err(ServiceError::NotFound);
        }
        self.repository
            .delete_by_id(session_id)
            .await
            .map_err(ServiceError::Internal)?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Session, ServiceError> {
        self.repository
            .find_by_id(session_id)
            .await
            .map_err(ServiceError::Internal)?
            .ok_or(ServiceError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Status::Starting, Status::Recording, true)]
    #[case(Status::Starting, Status::Completed, false)]
    #[case(Status::Recording, Status::Paused, true)]
    #[case(Status::Paused, Status::Recording, true)]
    #[case(Status::Stopping, Status::Completed, true)]
    #[case(Status::Stopped, Status::Completed, true)]
    #[case(Status::Completed, Status::Recording, false)]
    #[case(Status::Completed, Status::Inactive, true)]
    #[case(Status::Inactive, Status::Starting, false)]
    fn transition_table_cases(#[case] from: Status, #[case] to: Status, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!(Status::parse("Started"), Some(Status::Starting));
        assert_eq!(Status::parse("STOPPED"), Some(Status::Stopping));
        assert_eq!(Status::parse("recording"), Some(Status::Recording));
        assert_eq!(Status::parse("bogus"), None);
    }

    #[test]
    fn chunk_name_validation() {
        assert_eq!(validate_chunk_name("0001.mp4"), Some("0001.mp4"));
        assert_eq!(validate_chunk_name("1.mp4"), None);
        assert_eq!(validate_chunk_name("0001.mkv"), None);
        assert_eq!(validate_chunk_name("abcd.mp4"), None);
    }
}
