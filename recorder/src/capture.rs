//! Supervises the capture engine child process: launches it with the segmentation
//! parameters, and signals it to stop via a named sentinel file on the input directory
//! rather than killing it outright, so the last in-flight segment closes cleanly.

use camino::Utf8Path;
use tokio::process::{Child, Command};

use crate::config::Conf;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to spawn capture engine")]
    Spawn(#[source] std::io::Error),
    #[error("capture engine exited with failure status: {0}")]
    ExitStatus(std::process::ExitStatus),
}

pub struct CaptureHandle {
    child: Child,
    stop_sentinel: camino::Utf8PathBuf,
}

impl CaptureHandle {
    /// Spawns the capture engine, pointed at `chunk_dir` with an output pattern of
    /// `%04d.<format>` starting at `start_index`.
    pub async fn spawn(conf: &Conf, chunk_dir: &Utf8Path, start_index: u32) -> Result<Self, CaptureError> {
        tokio::fs::create_dir_all(chunk_dir).await.map_err(CaptureError::Spawn)?;

        let stop_sentinel = chunk_dir.join(".stop");
        let pattern = chunk_dir.join(format!("%04d.{}", conf.video_format));

        let mut command = Command::new("capture-engine");
        command
            .arg("--resolution")
            .arg(&conf.resolution)
            .arg("--framerate")
            .arg(conf.framerate.to_string())
            .arg("--chunk-time-size")
            .arg(conf.chunk_time_size_secs.to_string())
            .arg("--segment-start-number")
            .arg(start_index.to_string())
            .arg("--output-pattern")
            .arg(pattern.as_str())
            .arg("--stop-sentinel")
            .arg(stop_sentinel.as_str());

        if conf.only_video {
            command.arg("--only-video");
        }

        let child = command.spawn().map_err(CaptureError::Spawn)?;

        Ok(Self { child, stop_sentinel })
    }

    /// Writes the stop sentinel and waits for the child to exit on its own. Takes `&mut
    /// self` (not `self`) so callers can race [`Self::wait`] against an external signal in
    /// a `select!` and only call this afterward, once the race has resolved.
    pub async fn stop_and_wait(&mut self) -> Result<(), CaptureError> {
        if let Err(err) = tokio::fs::write(&self.stop_sentinel, b"").await {
            warn!(%err, "failed to write capture stop sentinel, falling back to kill");
            let _ = self.child.start_kill();
        }

        let status = self.child.wait().await.map_err(CaptureError::Spawn)?;
        if !status.success() {
            return Err(CaptureError::ExitStatus(status));
        }
        Ok(())
    }

    /// Waits for the capture engine to exit on its own (e.g. a fixed-duration test run).
    pub async fn wait(&mut self) -> Result<(), CaptureError> {
        let status = self.child.wait().await.map_err(CaptureError::Spawn)?;
        if !status.success() {
            return Err(CaptureError::ExitStatus(status));
        }
        Ok(())
    }
}
