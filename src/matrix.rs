//! Best-effort Matrix room notifications on health transitions.
//!
//! Grounded on the notifier shape implied by `config.Matrix` in
//! `original_source/config/types.go`: a homeserver URL, a bot account and a
//! room ID. Failures are logged and otherwise ignored — a notification is
//! not part of the health pipeline's correctness, only its observability.

use crate::config::MatrixConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_down(&self, member: &str, key: &str);
    async fn notify_up(&self, member: &str, key: &str);
}

/// Used when `Matrix.Enabled` is false: every notification is a no-op.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_down(&self, _member: &str, _key: &str) {}
    async fn notify_up(&self, _member: &str, _key: &str) {}
}

pub struct MatrixNotifier {
    client: Client,
    config: MatrixConfig,
    access_token: RwLock<Option<String>>,
}

impl MatrixNotifier {
    pub fn new(client: Client, config: MatrixConfig) -> Self {
        Self {
            client,
            config,
            access_token: RwLock::new(None),
        }
    }

    async fn token(&self) -> anyhow::Result<String> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(token);
        }
        let url = format!(
            "{}/_matrix/client/v3/login",
            self.config.home_server_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "type": "m.login.password",
                "user": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("matrix login response missing access_token"))?
            .to_string();
        *self.access_token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn send(&self, body: &str) {
        if !self.config.enabled {
            return;
        }
        if let Err(e) = self.send_inner(body).await {
            warn!(error = %e, "failed to deliver matrix notification");
        }
    }

    async fn send_inner(&self, body: &str) -> anyhow::Result<()> {
        let token = self.token().await?;
        let url = format!(
            "{}/_matrix/client/v3/rooms/{}/send/m.room.message",
            self.config.home_server_url.trim_end_matches('/'),
            self.config.room_id
        );
        self.client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({
                "msgtype": "m.text",
                "body": body,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for MatrixNotifier {
    async fn notify_down(&self, member: &str, key: &str) {
        self.send(&format!("{member} is now DOWN for {key}")).await;
    }

    async fn notify_up(&self, member: &str, key: &str) {
        self.send(&format!("{member} is back UP for {key}")).await;
    }
}
