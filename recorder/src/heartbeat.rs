use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rec_task::{ShutdownSignal, Task};

use crate::chunk::list_sorted_chunks;
use crate::config::Conf;
use crate::controller_client::ControllerClient;

pub struct HeartbeatEmitter {
    pub session_id: String,
    pub chunk_dir: camino::Utf8PathBuf,
    pub client: Arc<ControllerClient>,
    pub conf: Arc<Conf>,
}

#[async_trait]
impl Task for HeartbeatEmitter {
    type Output = ();
    const NAME: &'static str = "heartbeat";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let mut interval = tokio::time::interval(Duration::from_secs(self.conf.heartbeat_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_sent: Option<String> = None;

        loop {
            tokio::select! {
                _ = shutdown_signal.wait() => break,
                _ = interval.tick() => {
                    let latest = list_sorted_chunks(&self.chunk_dir, &self.conf.video_format)
                        .ok()
                        .and_then(|v| v.last().cloned());
                    let to_send = latest.filter(|name| last_sent.as_deref() != Some(name.as_str()));

                    let result = self
                        .client
                        .heartbeat(&self.session_id, to_send.as_deref())
                        .await;

                    match result {
                        Ok(()) => {
                            if let Some(sent) = to_send {
                                last_sent = Some(sent);
                            }
                        }
                        Err(err) => warn!(%err, session_id = %self.session_id, "heartbeat failed, will retry next tick"),
                    }
                }
            }
        }

        match tokio::time::timeout(
            Duration::from_secs(self.conf.heartbeat_grace_window_secs),
            self.client.deregister_session(&self.session_id),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "best-effort deregistration failed on shutdown"),
            Err(_) => warn!("best-effort deregistration timed out on shutdown"),
        }
    }
}
