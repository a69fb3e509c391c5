#[macro_use]
extern crate tracing;

use std::net::SocketAddr;

use clap::Parser;
use ha_rec_controller::config::{ConfHandle, LogFormat};
use ha_rec_controller::reaper::Reaper;
use ha_rec_controller::session::spawn_session_manager;
use ha_rec_controller::store::LibsqlSessionRepository;
use ha_rec_controller::AppState;

#[derive(Parser)]
#[command(name = "ha-rec-controller")]
struct Cli {
    /// Override the listen address from the environment-derived configuration.
    #[arg(long)]
    bind_address: Option<String>,
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
    let conf_handle = ConfHandle::init()?;
    let mut conf = (*conf_handle.get_conf()).clone();
    if let Some(bind_address) = cli.bind_address {
        conf.bind_address = bind_address;
    }

    init_logging(conf.log_format, &conf.log_filter);

    info!(bind_address = %conf.bind_address, "starting controller");

    let repository = LibsqlSessionRepository::open(&conf.store_path).await?;
    let (sessions, _session_task, reaper_sessions) =
        spawn_session_manager(Box::new(repository), conf.reaper.max_age_hours);

    let reaper = Reaper::new(reaper_sessions, conf.reaper);
    let (reaper_shutdown, reaper_signal) = rec_task::ShutdownHandle::new();
    let reaper_task = rec_task::spawn_task(reaper, reaper_signal);

    let state = AppState {
        conf: std::sync::Arc::new(conf.clone()),
        sessions,
    };
    let router = ha_rec_controller::make_router(state);

    let addr: SocketAddr = conf.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    reaper_shutdown.signal();
    let _ = reaper_task.join().await;

    Ok(())
}

async fn shutdown_signal() {
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

    info!("shutdown signal received");
}
