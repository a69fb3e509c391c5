//! Post-capture reconciliation: brings remote chunks back to the local chunk directory
//! before the Joiner runs, so the final artifact reflects everything that made it to
//! the object store even if the local disk lost some chunks (or never had them, in a
//! failover scenario where a different recorder captured earlier segments).

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;

use crate::chunk::is_valid_chunk_name;
use crate::config::Conf;
use crate::state_log::{append_failed, append_success, StateLog};
use crate::storage::ObjectStore;

pub struct DownloadReport {
    pub downloaded: usize,
    pub degraded: bool,
}

pub async fn reconcile(
    session_id: &str,
    chunk_dir: &camino::Utf8Path,
    download_state_log: &camino::Utf8Path,
    store: &Arc<dyn ObjectStore>,
    conf: &Conf,
) -> anyhow::Result<DownloadReport> {
    let prefix = format!("{session_id}/chunks/");
    let keys = store.list(&prefix).await?;
    let filenames: Vec<&str> = keys
        .iter()
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter(|name| is_valid_chunk_name(name, &conf.video_format))
        .collect();

    let mut downloaded = 0;
    let mut any_failed = false;

    let bulk_result = tokio::time::timeout(
        Duration::from_secs(conf.download_timeout_secs),
        download_all(&filenames, &prefix, chunk_dir, store, conf),
    )
    .await;

    match bulk_result {
        Ok(Ok(count)) => {
            downloaded = count;
            for name in &filenames {
                append_success(download_state_log, name).ok();
            }
        }
        _ => {
            // bulk path failed or timed out: fall back to individual downloads with backoff
            for name in &filenames {
                let local_path = chunk_dir.join(name);
                if local_path.exists() && local_path.metadata().map(|m| m.len()).unwrap_or(0) > conf.min_chunk_bytes {
                    append_success(download_state_log, name).ok();
                    downloaded += 1;
                    continue;
                }

                match download_one_with_retry(&format!("{prefix}{name}"), &local_path, store, conf).await {
                    Ok(()) => {
                        append_success(download_state_log, name).ok();
                        downloaded += 1;
                    }
                    Err(err) => {
                        error!(%err, filename = %name, "chunk download exhausted retries");
                        append_failed(download_state_log, name, time::OffsetDateTime::now_utc().unix_timestamp()).ok();
                        any_failed = true;
                    }
                }
            }
        }
    }

    let log = StateLog::load(download_state_log).unwrap_or_default();
    let local_count = crate::chunk::list_sorted_chunks(chunk_dir, &conf.video_format)
        .map(|v| v.len())
        .unwrap_or(0);
    let degraded = any_failed || log.has_any_failed() || local_count != log.success_count();

    Ok(DownloadReport { downloaded, degraded })
}

async fn download_all(
    filenames: &[&str],
    prefix: &str,
    chunk_dir: &camino::Utf8Path,
    store: &Arc<dyn ObjectStore>,
    _conf: &Conf,
) -> anyhow::Result<usize> {
    for name in filenames {
        let local_path = chunk_dir.join(name);
        store.get_file(&format!("{prefix}{name}"), &local_path).await?;
    }
    Ok(filenames.len())
}

async fn download_one_with_retry(
    key: &str,
    local_path: &camino::Utf8Path,
    store: &Arc<dyn ObjectStore>,
    conf: &Conf,
) -> anyhow::Result<()> {
    let backoff_policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(5))
        .with_max_interval(Duration::from_secs(5 * u64::from(conf.upload_attempts)))
        .with_max_elapsed_time(Some(Duration::from_secs(5 * u64::from(conf.upload_attempts) + 10)))
        .build();

    let mut attempt = 0u32;
    backoff::future::retry(backoff_policy, || async {
        attempt += 1;
        match store.get_file(key, local_path).await {
            Ok(()) => Ok(()),
            Err(err) if attempt >= conf.upload_attempts => Err(backoff::Error::permanent(err)),
            Err(err) => Err(backoff::Error::transient(err)),
        }
    })
    .await
}
