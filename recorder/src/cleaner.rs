//! Removes remote chunks once the final artifact exists locally, under a safety
//! predicate: both state logs must be clean, and the artifact must be large enough to
//! plausibly be a real joined recording (bypassable with `force`, e.g. manual recovery).

use std::sync::Arc;

use crate::config::Conf;
use crate::state_log::StateLog;
use crate::storage::ObjectStore;

pub struct CleanupReport {
    pub skipped_reason: Option<&'static str>,
    pub removed: usize,
    pub remaining: usize,
}

pub async fn clean(
    session_id: &str,
    artifact_path: Option<&camino::Utf8Path>,
    upload_state_log: &camino::Utf8Path,
    download_state_log: &camino::Utf8Path,
    store: &Arc<dyn ObjectStore>,
    conf: &Conf,
    force: bool,
) -> anyhow::Result<CleanupReport> {
    if !force {
        let artifact_ok = artifact_path
            .map(|p| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0) > conf.cleaner_min_artifact_bytes)
            .unwrap_or(false);
        if !artifact_ok {
            return Ok(CleanupReport {
                skipped_reason: Some("no artifact, or artifact below safety threshold"),
                removed: 0,
                remaining: 0,
            });
        }

        let upload_log = StateLog::load(upload_state_log).unwrap_or_default();
        let download_log = StateLog::load(download_state_log).unwrap_or_default();
        if upload_log.has_any_failed() || download_log.has_any_failed() {
            return Ok(CleanupReport {
                skipped_reason: Some("upload or download state log records a failure"),
                removed: 0,
                remaining: 0,
            });
        }
    }

    let prefix = format!("{session_id}/chunks/");
    let keys = store.list(&prefix).await?;

    if store.delete_many(&keys).await.is_err() {
        for key in &keys {
            if let Err(err) = store.delete(key).await {
                warn!(%err, %key, "per-object delete failed during cleanup");
            }
        }
    }

    let remaining = store.list(&prefix).await?.len();
    Ok(CleanupReport {
        skipped_reason: None,
        removed: keys.len().saturating_sub(remaining),
        remaining,
    })
}
