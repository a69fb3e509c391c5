//! Watches the chunk directory for newly-closed segment files and streams them to the
//! object store with bounded retries. Grounded on the same "debounced filesystem watch
//! bridged to async via a Notify" shape used for update-package detection, but here the
//! watcher drives a small worker pool instead of a single reactive task.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_mini::notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use parking_lot::Mutex;
use rec_task::{ShutdownSignal, Task};
use tokio::sync::{Notify, Semaphore};

use crate::chunk::is_valid_chunk_name;
use crate::config::Conf;
use crate::state_log::{append_failed, append_success, StateLog};
use crate::storage::ObjectStore;

const CHUNK_STABILITY_WAIT: Duration = Duration::from_secs(2);

pub struct Uploader {
    session_id: String,
    chunk_dir: camino::Utf8PathBuf,
    state_log_path: camino::Utf8PathBuf,
    store: Arc<dyn ObjectStore>,
    conf: Arc<Conf>,
    /// Filenames currently being uploaded, to serialize per-object-key access.
    in_flight: Arc<Mutex<HashSet<String>>>,
    pool: Arc<Semaphore>,
}

impl Uploader {
    pub fn new(
        session_id: String,
        chunk_dir: camino::Utf8PathBuf,
        state_log_path: camino::Utf8PathBuf,
        store: Arc<dyn ObjectStore>,
        conf: Arc<Conf>,
    ) -> Self {
        let pool_size = conf.upload_pool_size;
        Self {
            session_id,
            chunk_dir,
            state_log_path,
            store,
            conf,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pool: Arc::new(Semaphore::new(pool_size)),
        }
    }

    fn object_key(&self, filename: &str) -> String {
        format!("{}/chunks/{filename}", self.session_id)
    }

    async fn try_upload_one(&self, filename: &str) {
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(filename.to_owned()) {
                return; // another worker already owns this filename
            }
        }

        let result = self.upload_with_retry(filename).await;

        self.in_flight.lock().remove(filename);

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        match result {
            Ok(true) => {
                if let Err(err) = append_success(&self.state_log_path, filename) {
                    error!(%err, filename, "failed to append SUCCESS to upload state log");
                }
                let local_path = self.chunk_dir.join(filename);
                if let Err(err) = std::fs::remove_file(&local_path) {
                    warn!(%err, %local_path, "failed to remove uploaded chunk");
                }
            }
            Ok(false) => {
                // skipped: degenerate size or still being written; next scan retries.
            }
            Err(err) => {
                error!(%err, filename, "chunk upload exhausted retries");
                if let Err(log_err) = append_failed(&self.state_log_path, filename, now) {
                    error!(%log_err, filename, "failed to append FAILED to upload state log");
                }
            }
        }
    }

    /// Returns `Ok(true)` on successful upload, `Ok(false)` if the chunk was skipped
    /// (degenerate size, or still being written), `Err` once all retries are exhausted.
    async fn upload_with_retry(&self, filename: &str) -> anyhow::Result<bool> {
        let local_path = self.chunk_dir.join(filename);

        let size_before = match tokio::fs::metadata(&local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(false), // file vanished before we got to it
        };
        tokio::time::sleep(CHUNK_STABILITY_WAIT).await;
        let size_after = match tokio::fs::metadata(&local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(false),
        };

        if size_before != size_after {
            return Ok(false); // writer still active; a later event or sweep retries
        }
        if size_after < self.conf.min_chunk_bytes {
            return Ok(false);
        }

        let key = self.object_key(filename);
        let mut last_err = None;

        for attempt in 1..=self.conf.upload_attempts {
            let upload = tokio::time::timeout(
                Duration::from_secs(self.conf.upload_timeout_secs),
                self.store.put_file(&key, &local_path),
            )
            .await;

            match upload {
                Ok(Ok(())) => return Ok(true),
                Ok(Err(err)) => last_err = Some(err),
                Err(_) => last_err = Some(anyhow::anyhow!("upload timed out after {}s", self.conf.upload_timeout_secs)),
            }

            if attempt < self.conf.upload_attempts {
                tokio::time::sleep(Duration::from_secs(3 * u64::from(attempt))).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("upload of {filename} failed")))
    }

    async fn scan_and_dispatch(self: &Arc<Self>) {
        let names = match crate::chunk::list_sorted_chunks(&self.chunk_dir, &self.conf.video_format) {
            Ok(names) => names,
            Err(err) => {
                warn!(%err, "failed to list chunk directory");
                return;
            }
        };

        let log = StateLog::load(&self.state_log_path).unwrap_or_default();

        for name in names {
            if !is_valid_chunk_name(&name, &self.conf.video_format) {
                continue;
            }
            if log.get(&name).is_some() {
                continue;
            }
            if self.in_flight.lock().contains(&name) {
                continue;
            }

            let this = Arc::clone(self);
            let permit = Arc::clone(&self.pool);
            tokio::spawn(async move {
                let Ok(_permit) = permit.acquire_owned().await else {
                    return;
                };
                this.try_upload_one(&name).await;
            });
        }
    }

    async fn rescan_failed(self: &Arc<Self>) {
        let log = StateLog::load(&self.state_log_path).unwrap_or_default();
        let now = time::OffsetDateTime::now_utc().unix_timestamp();

        for (filename, outcome) in &log.entries {
            if let crate::state_log::Outcome::Failed { at_epoch_secs } = outcome {
                if now - at_epoch_secs < 120 {
                    continue;
                }
                let local_path = self.chunk_dir.join(filename);
                if !local_path.exists() {
                    continue;
                }
                if self.in_flight.lock().contains(filename) {
                    continue;
                }

                let this = Arc::clone(self);
                let filename = filename.clone();
                let permit = Arc::clone(&self.pool);
                tokio::spawn(async move {
                    let Ok(_permit) = permit.acquire_owned().await else {
                        return;
                    };
                    this.try_upload_one(&filename).await;
                });
            }
        }
    }
}

pub struct UploaderTask {
    pub uploader: Arc<Uploader>,
}

#[async_trait]
impl Task for UploaderTask {
    type Output = ();
    const NAME: &'static str = "uploader";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let notify = Arc::new(Notify::new());
        let notify_for_watcher = Arc::clone(&notify);

        let mut debouncer = match new_debouncer(Duration::from_millis(500), move |res: DebounceEventResult| {
            if res.is_ok() {
                notify_for_watcher.notify_one();
            }
        }) {
            Ok(d) => Some(d),
            Err(err) => {
                warn!(%err, "failed to start filesystem watcher, falling back to periodic polling only");
                None
            }
        };

        if let Some(debouncer) = debouncer.as_mut() {
            if let Err(err) = debouncer
                .watcher()
                .watch(self.uploader.chunk_dir.as_std_path(), RecursiveMode::NonRecursive)
            {
                warn!(%err, "failed to watch chunk directory");
            }
        }

        let mut poll_interval = tokio::time::interval(Duration::from_secs(2));
        let mut rescan_interval =
            tokio::time::interval(Duration::from_secs(self.uploader.conf.failed_rescan_interval_secs));

        loop {
            tokio::select! {
                _ = shutdown_signal.wait() => return,
                _ = notify.notified() => self.uploader.scan_and_dispatch().await,
                _ = poll_interval.tick() => self.uploader.scan_and_dispatch().await,
                _ = rescan_interval.tick() => self.uploader.rescan_failed().await,
            }
        }
    }
}
