//! Thin REST client for the few controller endpoints the recorder drives directly:
//! registration, heartbeat, status, recording-path, stop and deregistration.

use std::time::Duration;

use serde::Serialize;

const CONTROLLER_CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ControllerClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl ControllerClient {
    pub fn new(base_url: String, username: String, password: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(CONTROLLER_CALL_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            username,
            password,
        })
    }

    pub async fn register_session(&self, session_id: &str, client_id: &str) -> anyhow::Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            session_id: &'a str,
            client_id: &'a str,
        }

        let resp = self
            .http
            .post(format!("{}/api/sessions", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(&Body { session_id, client_id })
            .send()
            .await?;

        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
            anyhow::bail!("registration failed: {}", resp.status());
        }
        Ok(())
    }

    pub async fn heartbeat(&self, session_id: &str, last_chunk: Option<&str>) -> anyhow::Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            last_chunk: Option<&'a str>,
        }

        let resp = self
            .http
            .put(format!("{}/api/sessions/{session_id}/heartbeat", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(&Body { last_chunk })
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "heartbeat failed: {}", resp.status());
        Ok(())
    }

    /// Requests the transition to STOPPING, the only legal predecessor of COMPLETED/FAILED
    /// in the status table. Must be called before the pipeline reports a terminal status.
    pub async fn stop(&self, session_id: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .put(format!("{}/api/sessions/{session_id}/stop", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "stop failed: {}", resp.status());
        Ok(())
    }

    pub async fn update_status(&self, session_id: &str, status: &str) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Body<'a> {
            status: &'a str,
        }

        let resp = self
            .http
            .put(format!("{}/api/sessions/{session_id}/status", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(&Body { status })
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "status update failed: {}", resp.status());
        Ok(())
    }

    pub async fn update_recording_path(&self, session_id: &str, path: &str) -> anyhow::Result<()> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            recording_path: &'a str,
        }

        let resp = self
            .http
            .put(format!("{}/api/sessions/{session_id}/recording-path", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(&Body { recording_path: path })
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "recording-path update failed: {}", resp.status());
        Ok(())
    }

    /// Best-effort deregistration, used on graceful shutdown with a short timeout.
    pub async fn deregister_session(&self, session_id: &str) -> anyhow::Result<()> {
        let resp = self
            .http
            .delete(format!("{}/api/sessions/{session_id}", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        anyhow::ensure!(resp.status().is_success(), "deregister failed: {}", resp.status());
        Ok(())
    }
}
