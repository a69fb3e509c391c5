use anyhow::Context as _;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    Local,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Conf {
    pub controller_url: String,
    pub basic_auth_username: String,
    pub basic_auth_password: String,

    pub storage_mode: StorageMode,
    pub recordings_dir: camino::Utf8PathBuf,
    pub chunk_folder: String,
    pub chunk_time_size_secs: u64,
    pub start_chunk: u32,
    pub resolution: String,
    pub framerate: u32,
    pub video_format: String,
    pub only_video: bool,

    pub bucket: Option<String>,
    pub endpoint: Option<String>,

    pub heartbeat_interval_secs: u64,
    pub upload_timeout_secs: u64,
    pub upload_attempts: u32,
    pub upload_pool_size: usize,
    pub failed_rescan_interval_secs: u64,
    pub download_timeout_secs: u64,
    pub concat_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub min_artifact_bytes: u64,
    pub cleaner_min_artifact_bytes: u64,
    pub min_chunk_bytes: u64,
    pub upload_grace_window_secs: u64,
    pub heartbeat_grace_window_secs: u64,
    pub pipeline_shutdown_budget_secs: u64,

    pub log_format: LogFormat,
    pub log_filter: String,
}

#[derive(Debug, Default, Deserialize)]
struct EnvConf {
    controller_url: Option<String>,
    basic_auth_username: Option<String>,
    basic_auth_password: Option<String>,
    storage_mode: Option<String>,
    recordings_dir: Option<String>,
    chunk_folder: Option<String>,
    chunk_time_size_secs: Option<u64>,
    start_chunk: Option<u32>,
    resolution: Option<String>,
    framerate: Option<u32>,
    video_format: Option<String>,
    only_video: Option<bool>,
    bucket: Option<String>,
    endpoint: Option<String>,
    heartbeat_interval_secs: Option<u64>,
    upload_timeout_secs: Option<u64>,
    upload_attempts: Option<u32>,
    log_format: Option<String>,
    log_filter: Option<String>,
}

impl Conf {
    pub fn from_env() -> anyhow::Result<Self> {
        let env: EnvConf = envy::prefixed("REC_").from_env().context("failed to read recorder configuration")?;

        let storage_mode = match env.storage_mode.as_deref() {
            None | Some("local") => StorageMode::Local,
            Some("s3") => StorageMode::S3,
            Some(other) => anyhow::bail!("unknown storage mode: {other}"),
        };

        let log_format = match env.log_format.as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("unknown log format: {other}"),
        };

        Ok(Self {
            controller_url: env
                .controller_url
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_owned()),
            basic_auth_username: env.basic_auth_username.unwrap_or_else(|| "admin".to_owned()),
            basic_auth_password: env.basic_auth_password.context("REC_BASIC_AUTH_PASSWORD is required")?,
            storage_mode,
            recordings_dir: env
                .recordings_dir
                .map(camino::Utf8PathBuf::from)
                .unwrap_or_else(|| camino::Utf8PathBuf::from("/recordings")),
            chunk_folder: env.chunk_folder.unwrap_or_else(|| "chunks".to_owned()),
            chunk_time_size_secs: env.chunk_time_size_secs.unwrap_or(10),
            start_chunk: env.start_chunk.unwrap_or(0),
            resolution: env.resolution.unwrap_or_else(|| "1280x720".to_owned()),
            framerate: env.framerate.unwrap_or(25),
            video_format: env.video_format.unwrap_or_else(|| "mp4".to_owned()),
            only_video: env.only_video.unwrap_or(false),
            bucket: env.bucket,
            endpoint: env.endpoint,
            heartbeat_interval_secs: env.heartbeat_interval_secs.unwrap_or(10),
            upload_timeout_secs: env.upload_timeout_secs.unwrap_or(30),
            upload_attempts: env.upload_attempts.unwrap_or(3),
            upload_pool_size: 4,
            failed_rescan_interval_secs: 120,
            download_timeout_secs: 300,
            concat_timeout_secs: 300,
            probe_timeout_secs: 30,
            min_artifact_bytes: 1024,
            cleaner_min_artifact_bytes: 1_048_576,
            min_chunk_bytes: 1024,
            upload_grace_window_secs: 10,
            heartbeat_grace_window_secs: 5,
            pipeline_shutdown_budget_secs: 30,
            log_format,
            log_filter: env.log_filter.unwrap_or_else(|| "info".to_owned()),
        })
    }

    pub fn mock() -> Self {
        Self {
            controller_url: "http://127.0.0.1:0".to_owned(),
            basic_auth_username: "test".to_owned(),
            basic_auth_password: "test".to_owned(),
            storage_mode: StorageMode::Local,
            recordings_dir: camino::Utf8PathBuf::from("/tmp/ha-rec-test"),
            chunk_folder: "chunks".to_owned(),
            chunk_time_size_secs: 10,
            start_chunk: 0,
            resolution: "1280x720".to_owned(),
            framerate: 25,
            video_format: "mp4".to_owned(),
            only_video: false,
            bucket: None,
            endpoint: None,
            heartbeat_interval_secs: 10,
            upload_timeout_secs: 30,
            upload_attempts: 3,
            upload_pool_size: 4,
            failed_rescan_interval_secs: 120,
            download_timeout_secs: 300,
            concat_timeout_secs: 300,
            probe_timeout_secs: 30,
            min_artifact_bytes: 1024,
            cleaner_min_artifact_bytes: 1_048_576,
            min_chunk_bytes: 1024,
            upload_grace_window_secs: 10,
            heartbeat_grace_window_secs: 5,
            pipeline_shutdown_budget_secs: 30,
            log_format: LogFormat::Pretty,
            log_filter: "debug".to_owned(),
        }
    }
}
