#[macro_use]
extern crate tracing;

use std::sync::Arc;

use clap::Parser;
use ha_rec_recorder::config::{Conf, LogFormat, StorageMode};
use ha_rec_recorder::controller_client::ControllerClient;
use ha_rec_recorder::pipeline::Pipeline;
use ha_rec_recorder::storage::S3ObjectStore;

#[derive(Parser)]
#[command(name = "ha-rec-recorder")]
struct Cli {
    /// Session identifier assigned by whatever launched this recorder (controller or CLI).
    #[arg(long)]
    session_id: String,

    /// Client identifier the session belongs to.
    #[arg(long)]
    client_id: String,
}

fn init_logging(format: LogFormat, filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_default();
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let conf = Conf::from_env()?;

    init_logging(conf.log_format, &conf.log_filter);

    info!(session_id = %cli.session_id, client_id = %cli.client_id, "starting recorder");

    let controller = Arc::new(ControllerClient::new(
        conf.controller_url.clone(),
        conf.basic_auth_username.clone(),
        conf.basic_auth_password.clone(),
    )?);

    let store: Option<Arc<dyn ha_rec_recorder::storage::ObjectStore>> = match conf.storage_mode {
        StorageMode::S3 => {
            let bucket = conf.bucket.clone().ok_or_else(|| anyhow::anyhow!("REC_BUCKET is required when REC_STORAGE_MODE=s3"))?;
            let store = S3ObjectStore::new(conf.endpoint.as_deref(), &bucket).await?;
            Some(Arc::new(store))
        }
        StorageMode::Local => None,
    };

    let pipeline = Pipeline {
        session_id: cli.session_id,
        client_id: cli.client_id,
        conf: Arc::new(conf),
        controller,
        store,
    };

    let (shutdown_handle, shutdown_signal) = rec_task::ShutdownHandle::new();

    let pipeline_handle = tokio::spawn(pipeline.run(shutdown_signal));

    wait_for_stop_signal().await;
    shutdown_handle.signal();

    match pipeline_handle.await {
        Ok(outcome) => info!(?outcome, "recorder pipeline finished"),
        Err(err) => error!(%err, "recorder pipeline task panicked"),
    }

    Ok(())
}

async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut interrupt = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = terminate.recv() => {}
            _ = interrupt.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("stop signal received, finalizing recording");
}
