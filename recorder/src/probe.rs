//! Probes the joined artifact for audio/video stream presence, duration, and size, via
//! an external `ffprobe` process — the same black-box-subprocess treatment `capture.rs`
//! gives the capture engine and `joiner.rs` gives `ffmpeg`.

use std::time::Duration;

use camino::Utf8Path;
use tokio::process::Command;

use crate::config::Conf;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to spawn ffprobe")]
    Spawn(#[source] std::io::Error),
    #[error("ffprobe timed out")]
    Timeout,
    #[error("ffprobe exited with failure status: {0}")]
    ExitStatus(std::process::ExitStatus),
    #[error("failed to read artifact metadata")]
    Metadata(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct StreamProbe {
    pub has_audio: bool,
    pub has_video: bool,
    pub duration_secs: f64,
    pub size_bytes: u64,
}

impl StreamProbe {
    pub fn is_viable(&self) -> bool {
        self.has_audio || self.has_video
    }
}

/// Lists each stream's `codec_type` plus the container's duration, and stats the file
/// for size. The artifact is COMPLETED-worthy only if at least one stream is present.
pub async fn probe(artifact: &Utf8Path, conf: &Conf) -> Result<StreamProbe, ProbeError> {
    let mut command = Command::new("ffprobe");
    command
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("stream=codec_type:format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1")
        .arg(artifact.as_str());

    let child = command.spawn().map_err(ProbeError::Spawn)?;
    let output = tokio::time::timeout(Duration::from_secs(conf.probe_timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(ProbeError::Spawn)?;

    if !output.status.success() {
        return Err(ProbeError::ExitStatus(output.status));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut has_audio = false;
    let mut has_video = false;
    let mut duration_secs = 0.0;

    for line in stdout.lines() {
        if let Some(codec_type) = line.strip_prefix("codec_type=") {
            match codec_type {
                "audio" => has_audio = true,
                "video" => has_video = true,
                _ => {}
            }
        } else if let Some(duration) = line.strip_prefix("duration=") {
            duration_secs = duration.parse().unwrap_or(0.0);
        }
    }

    let size_bytes = std::fs::metadata(artifact).map_err(ProbeError::Metadata)?.len();

    Ok(StreamProbe {
        has_audio,
        has_video,
        duration_secs,
        size_bytes,
    })
}
