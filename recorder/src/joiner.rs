//! Concatenates local chunks into the final artifact without re-encoding, by driving an
//! external stream-copy process the same way the capture engine itself is treated as a
//! black-box subprocess (see `capture.rs`).

use std::time::Duration;

use camino::Utf8Path;
use tokio::process::Command;

use crate::chunk::list_sorted_chunks;
use crate::config::Conf;

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("no chunks available to join")]
    NoChunks,
    #[error("failed to write concat manifest")]
    Manifest(#[source] std::io::Error),
    #[error("failed to spawn concat process")]
    Spawn(#[source] std::io::Error),
    #[error("concat process timed out")]
    Timeout,
    #[error("concat process exited with failure status: {0}")]
    ExitStatus(std::process::ExitStatus),
    #[error("joined artifact is smaller than the sanity threshold ({0} bytes)")]
    TooSmall(u64),
}

/// Builds a temporary ffmpeg concat-demuxer manifest, lists each chunk by absolute path.
fn write_manifest(chunk_dir: &Utf8Path, chunks: &[String]) -> Result<Utf8PathBufManifest, JoinError> {
    let manifest_path = chunk_dir.join("concat_manifest.txt");
    let mut contents = String::new();
    for chunk in chunks {
        let abs = chunk_dir.join(chunk);
        contents.push_str(&format!("file '{}'\n", abs.as_str().replace('\'', "'\\''")));
    }
    std::fs::write(&manifest_path, contents).map_err(JoinError::Manifest)?;
    Ok(Utf8PathBufManifest(manifest_path))
}

struct Utf8PathBufManifest(camino::Utf8PathBuf);

/// Joins chunks from `chunk_dir` into `<recordings_dir>/<session_id>/<video_name>.<format>`.
/// Returns the final artifact path on success. On failure, chunks and the manifest are
/// left in place for manual recovery.
pub async fn join(
    session_id: &str,
    chunk_dir: &Utf8Path,
    conf: &Conf,
) -> Result<camino::Utf8PathBuf, JoinError> {
    let chunks = list_sorted_chunks(chunk_dir, &conf.video_format).map_err(JoinError::Manifest)?;
    if chunks.is_empty() {
        return Err(JoinError::NoChunks);
    }

    let manifest = write_manifest(chunk_dir, &chunks)?;

    let output_dir = conf.recordings_dir.join(session_id);
    std::fs::create_dir_all(&output_dir).map_err(JoinError::Manifest)?;
    let output_path = output_dir.join(format!("{session_id}.{}", conf.video_format));

    let mut command = Command::new("ffmpeg");
    command
        .arg("-y")
        .arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(manifest.0.as_str())
        .arg("-c")
        .arg("copy")
        .arg(output_path.as_str());

    let child = command.spawn().map_err(JoinError::Spawn)?;
    let status = tokio::time::timeout(Duration::from_secs(conf.concat_timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| JoinError::Timeout)?
        .map_err(JoinError::Spawn)?
        .status;

    if !status.success() {
        return Err(JoinError::ExitStatus(status));
    }

    let size = std::fs::metadata(&output_path).map_err(JoinError::Manifest)?.len();
    if size < conf.min_artifact_bytes {
        return Err(JoinError::TooSmall(conf.min_artifact_bytes));
    }

    // Success: drop the transient chunk directory and manifest.
    let _ = std::fs::remove_file(manifest.0);
    if let Err(err) = std::fs::remove_dir_all(chunk_dir) {
        warn!(%err, %chunk_dir, "failed to remove chunk directory after successful join");
    }

    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_escapes_single_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let chunk_dir = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::write(chunk_dir.join("0001.mp4"), b"x").unwrap();
        let manifest = write_manifest(chunk_dir, &["0001.mp4".to_owned()]).unwrap();
        let contents = std::fs::read_to_string(manifest.0).unwrap();
        assert!(contents.starts_with("file '"));
        assert!(contents.contains("0001.mp4"));
    }
}
