use std::sync::Arc;

use anyhow::Context as _;
use serde::Deserialize;

/// Process-wide configuration, collected once at startup from environment variables
/// overlaid on top of defaults. No hot-reload: once built, a `Conf` never changes.
#[derive(Debug, Clone)]
pub struct Conf {
    pub bind_address: String,
    pub basic_auth_username: String,
    pub basic_auth_password: String,
    pub store_path: camino::Utf8PathBuf,
    pub reaper: ReaperConf,
    pub log_format: LogFormat,
    pub log_filter: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReaperConf {
    pub cleanup_interval_ms: u64,
    pub max_inactive_time_secs: u64,
    pub chunk_time_size_secs: u64,
    pub max_age_hours: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Raw view of the environment variables this service understands. Kept separate from
/// `Conf` so defaulting/parsing stays in one place (mirrors the conf-file/effective-conf
/// split used elsewhere in this family of services).
#[derive(Debug, Default, Deserialize)]
struct EnvConf {
    bind_address: Option<String>,
    basic_auth_username: Option<String>,
    basic_auth_password: Option<String>,
    store_path: Option<String>,
    cleanup_interval_ms: Option<u64>,
    max_inactive_time_secs: Option<u64>,
    chunk_time_size_secs: Option<u64>,
    max_age_hours: Option<u64>,
    log_format: Option<String>,
    log_filter: Option<String>,
}

impl Conf {
    fn from_env_conf(env: EnvConf) -> anyhow::Result<Self> {
        let log_format = match env.log_format.as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("unknown log format: {other}"),
        };

        Ok(Self {
            bind_address: env.bind_address.unwrap_or_else(|| "0.0.0.0:8080".to_owned()),
            basic_auth_username: env.basic_auth_username.unwrap_or_else(|| "admin".to_owned()),
            basic_auth_password: env
                .basic_auth_password
                .context("REC_BASIC_AUTH_PASSWORD is required")?,
            store_path: env
                .store_path
                .map(camino::Utf8PathBuf::from)
                .unwrap_or_else(|| camino::Utf8PathBuf::from("sessions.db")),
            reaper: ReaperConf {
                cleanup_interval_ms: env.cleanup_interval_ms.unwrap_or(30_000),
                max_inactive_time_secs: env.max_inactive_time_secs.unwrap_or(600),
                chunk_time_size_secs: env.chunk_time_size_secs.unwrap_or(10),
                max_age_hours: env.max_age_hours.unwrap_or(24),
            },
            log_format,
            log_filter: env.log_filter.unwrap_or_else(|| "info".to_owned()),
        })
    }

    /// Reads configuration from `REC_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let env = envy::prefixed("REC_")
            .from_env::<EnvConf>()
            .context("failed to read configuration from environment")?;
        Self::from_env_conf(env)
    }

    /// Builds a configuration for tests, bypassing environment lookup entirely.
    pub fn mock() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_owned(),
            basic_auth_username: "test".to_owned(),
            basic_auth_password: "test".to_owned(),
            store_path: camino::Utf8PathBuf::from(":memory:"),
            reaper: ReaperConf {
                cleanup_interval_ms: 30_000,
                max_inactive_time_secs: 600,
                chunk_time_size_secs: 10,
                max_age_hours: 24,
            },
            log_format: LogFormat::Pretty,
            log_filter: "debug".to_owned(),
        }
    }
}

/// Cheaply-cloneable handle to the process-wide configuration.
///
/// This mirrors the shape of a hot-reloadable config handle, but since this service has
/// no reload story, the inner value is simply an `Arc<Conf>` built once at startup.
#[derive(Debug, Clone)]
pub struct ConfHandle {
    inner: Arc<Conf>,
}

impl ConfHandle {
    pub fn init() -> anyhow::Result<Self> {
        let conf = Conf::from_env()?;
        Ok(Self { inner: Arc::new(conf) })
    }

    pub fn mock() -> Self {
        Self {
            inner: Arc::new(Conf::mock()),
        }
    }

    pub fn get_conf(&self) -> Arc<Conf> {
        Arc::clone(&self.inner)
    }
}
