//! Top-level per-session orchestrator: Init, Capture, Post-capture, Finalize, per
//! SPEC_FULL.md §4.5. Owns every child task's shutdown handle and enforces the overall
//! shutdown budget on the post-capture path.

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;

use crate::capture::CaptureHandle;
use crate::chunk::next_start_index;
use crate::cleaner;
use crate::config::{Conf, StorageMode};
use crate::controller_client::ControllerClient;
use crate::downloader;
use crate::heartbeat::HeartbeatEmitter;
use crate::joiner;
use crate::probe;
use crate::storage::ObjectStore;
use crate::uploader::{Uploader, UploaderTask};

pub struct Pipeline {
    pub session_id: String,
    pub client_id: String,
    pub conf: Arc<Conf>,
    pub controller: Arc<ControllerClient>,
    pub store: Option<Arc<dyn ObjectStore>>,
}

#[derive(Debug)]
pub enum FinalOutcome {
    Completed { artifact: Utf8PathBuf },
    Failed { reason: String },
}

impl Pipeline {
    fn chunk_dir(&self) -> Utf8PathBuf {
        self.conf
            .recordings_dir
            .join(&self.session_id)
            .join(&self.conf.chunk_folder)
    }

    fn upload_state_log(&self) -> Utf8PathBuf {
        std::env::temp_dir()
            .join(format!("upload-state-{}.txt", self.session_id))
            .try_into()
            .expect("temp dir path is valid UTF-8")
    }

    fn download_state_log(&self) -> Utf8PathBuf {
        std::env::temp_dir()
            .join(format!("download-state-{}.txt", self.session_id))
            .try_into()
            .expect("temp dir path is valid UTF-8")
    }

    /// Runs the full session lifecycle. `shutdown_signal` is the external stop trigger
    /// (SIGTERM/SIGINT on the recorder process, or the controller asking this session to
    /// stop); once it fires, capture is stopped via its sentinel file and the pipeline
    /// moves on to post-capture reconciliation.
    pub async fn run(self, mut shutdown_signal: rec_task::ShutdownSignal) -> FinalOutcome {
        // -- Init --
        let chunk_dir = self.chunk_dir();
        if let Err(err) = tokio::fs::create_dir_all(&chunk_dir).await {
            return FinalOutcome::Failed {
                reason: format!("failed to create chunk directory: {err}"),
            };
        }

        if let Err(err) = self.controller.register_session(&self.session_id, &self.client_id).await {
            warn!(%err, session_id = %self.session_id, "registration failed, continuing anyway");
        }

        let mut child_tasks: Vec<rec_task::ChildTask<()>> = Vec::new();
        let mut shutdown_handles: Vec<rec_task::ShutdownHandle> = Vec::new();

        if matches!(self.conf.storage_mode, StorageMode::S3) {
            if let Some(store) = self.store.clone() {
                let uploader = Arc::new(Uploader::new(
                    self.session_id.clone(),
                    chunk_dir.clone(),
                    self.upload_state_log(),
                    store,
                    Arc::clone(&self.conf),
                ));
                let (handle, signal) = rec_task::ShutdownHandle::new();
                let task = rec_task::spawn_task(UploaderTask { uploader }, signal);
                shutdown_handles.push(handle);
                child_tasks.push(task);
            }
        }

        {
            let emitter = HeartbeatEmitter {
                session_id: self.session_id.clone(),
                chunk_dir: chunk_dir.clone(),
                client: Arc::clone(&self.controller),
                conf: Arc::clone(&self.conf),
            };
            let (handle, signal) = rec_task::ShutdownHandle::new();
            let task = rec_task::spawn_task(emitter, signal);
            shutdown_handles.push(handle);
            child_tasks.push(task);
        }

        // -- Capture --
        let start_index =
            next_start_index(&chunk_dir, &self.conf.video_format, self.conf.start_chunk).unwrap_or(self.conf.start_chunk);
        let mut capture = match CaptureHandle::spawn(&self.conf, &chunk_dir, start_index).await {
            Ok(c) => c,
            Err(err) => {
                self.shut_down_children(shutdown_handles, child_tasks).await;
                return FinalOutcome::Failed {
                    reason: format!("failed to start capture engine: {err}"),
                };
            }
        };

        // `capture.wait()` borrows `capture` for the select's duration; that borrow ends
        // once the select resolves, so `stop_and_wait` below never runs concurrently with it.
        let stop_requested;
        tokio::select! {
            _ = shutdown_signal.wait() => {
                stop_requested = true;
            }
            result = capture.wait() => {
                stop_requested = false;
                if let Err(err) = result {
                    warn!(%err, session_id = %self.session_id, "capture engine exited abnormally on its own");
                }
            }
        }

        if stop_requested {
            if let Err(err) = capture.stop_and_wait().await {
                warn!(%err, session_id = %self.session_id, "capture engine exited abnormally after stop request");
            }
        }

        // -- Post-capture --
        let budget = tokio::time::Instant::now() + Duration::from_secs(self.conf.pipeline_shutdown_budget_secs);

        // COMPLETED/FAILED are only reachable from STOPPING/STOPPED; request the
        // transition before Finalize tries to report either one.
        if let Err(err) = self.controller.stop(&self.session_id).await {
            warn!(%err, session_id = %self.session_id, "failed to request STOPPING transition, continuing anyway");
        }

        // stop children, giving the uploader a drain grace window before the rest proceeds
        self.shut_down_children(shutdown_handles, child_tasks).await;

        let mut degraded = false;

        if matches!(self.conf.storage_mode, StorageMode::S3) {
            if let Some(store) = self.store.clone() {
                match downloader::reconcile(&self.session_id, &chunk_dir, &self.download_state_log(), &store, &self.conf).await {
                    Ok(report) => degraded |= report.degraded,
                    Err(err) => {
                        warn!(%err, "downloader reconciliation failed, joining with whatever is local");
                        degraded = true;
                    }
                }
            }
        }

        let join_result = joiner::join(&self.session_id, &chunk_dir, &self.conf).await;

        // -- Finalize --
        let outcome = match join_result {
            Ok(artifact) => match probe::probe(&artifact, &self.conf).await {
                Ok(stream_probe) if stream_probe.is_viable() => {
                    if let Err(err) = self
                        .controller
                        .update_recording_path(&self.session_id, artifact.as_str())
                        .await
                    {
                        warn!(%err, "failed to report recording path to controller");
                    }
                    if let Err(err) = self.controller.update_status(&self.session_id, "completed").await {
                        warn!(%err, "failed to report completion status to controller");
                    }
                    FinalOutcome::Completed { artifact }
                }
                Ok(_) => {
                    let reason = "joined artifact has neither an audio nor a video stream".to_owned();
                    warn!(%reason, %artifact, "marking session failed");
                    if let Err(err) = self.controller.update_status(&self.session_id, "failed").await {
                        warn!(%err, "failed to report failure status to controller");
                    }
                    FinalOutcome::Failed { reason }
                }
                Err(err) => {
                    warn!(%err, %artifact, "stream probe failed, marking session failed");
                    if let Err(status_err) = self.controller.update_status(&self.session_id, "failed").await {
                        warn!(%status_err, "failed to report failure status to controller");
                    }
                    FinalOutcome::Failed { reason: err.to_string() }
                }
            },
            Err(err) => {
                warn!(%err, "join failed, chunks preserved for manual recovery");
                if let Err(status_err) = self.controller.update_status(&self.session_id, "failed").await {
                    warn!(%status_err, "failed to report failure status to controller");
                }
                FinalOutcome::Failed { reason: err.to_string() }
            }
        };

        if let (FinalOutcome::Completed { artifact }, false) = (&outcome, degraded) {
            if let Some(store) = self.store.clone() {
                let remaining_budget = budget.saturating_duration_since(tokio::time::Instant::now());
                let cleanup = cleaner::clean(
                    &self.session_id,
                    Some(artifact.as_path()),
                    &self.upload_state_log(),
                    &self.download_state_log(),
                    &store,
                    &self.conf,
                    false,
                );
                match tokio::time::timeout(remaining_budget.max(Duration::from_secs(1)), cleanup).await {
                    Ok(Ok(report)) => {
                        if let Some(reason) = report.skipped_reason {
                            info!(reason, "remote cleanup skipped");
                        } else {
                            info!(removed = report.removed, remaining = report.remaining, "remote chunks cleaned up");
                        }
                    }
                    Ok(Err(err)) => warn!(%err, "remote cleanup failed"),
                    Err(_) => warn!("remote cleanup did not finish within the shutdown budget"),
                }
            }
        }

        let _ = self.controller.deregister_session(&self.session_id).await;

        outcome
    }

    async fn shut_down_children(&self, handles: Vec<rec_task::ShutdownHandle>, tasks: Vec<rec_task::ChildTask<()>>) {
        for handle in &handles {
            handle.signal();
        }

        let drain = async {
            for task in tasks {
                let _ = task.join().await;
            }
        };

        if tokio::time::timeout(Duration::from_secs(self.conf.upload_grace_window_secs), drain)
            .await
            .is_err()
        {
            warn!("child tasks did not drain within the grace window; remaining tasks were aborted on drop");
        }
    }
}
