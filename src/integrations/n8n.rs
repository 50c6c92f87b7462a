//! Outbound n8n webhook notifications.

use crate::config::IntegrationsConfig;
use crate::db::{Strategy, StrategyStatus};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Webhook delivery failures.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Transport failure.
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success response.
    #[error("webhook answered with status {0}")]
    Status(u16),
}

/// Body posted to `{base_url}/{workflow_id}` when a strategy changes status.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChangeEvent {
    /// Always `strategy_status_changed`.
    pub event: &'static str,
    /// Strategy id.
    pub strategy_id: Uuid,
    /// Strategy owner.
    pub user_id: Uuid,
    /// Strategy name.
    pub name: String,
    /// Strategy type.
    pub strategy_type: String,
    /// Status before the change.
    pub previous_status: StrategyStatus,
    /// Status after the change.
    pub status: StrategyStatus,
    /// Strategy configuration.
    pub config: serde_json::Value,
    /// When the change happened.
    pub changed_at: DateTime<Utc>,
}

impl StatusChangeEvent {
    /// Builds the event for a strategy that moved from `previous`.
    #[must_use]
    pub fn new(strategy: &Strategy, previous: StrategyStatus) -> Self {
        Self {
            event: "strategy_status_changed",
            strategy_id: strategy.id,
            user_id: strategy.user_id,
            name: strategy.name.clone(),
            strategy_type: strategy.strategy_type.to_string(),
            previous_status: previous,
            status: strategy.status,
            config: strategy.config.clone(),
            changed_at: strategy.updated_at,
        }
    }
}

/// n8n webhook client. Disabled when no base URL is configured.
#[derive(Clone)]
pub struct N8nNotifier {
    client: Client,
    base_url: Option<String>,
    user: Option<String>,
    password: Option<String>,
}

impl N8nNotifier {
    /// Creates a notifier from the integrations configuration.
    #[must_use]
    pub fn new(config: &IntegrationsConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config
                .n8n_webhook_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            user: config.n8n_user.clone(),
            password: config.n8n_password.clone(),
        }
    }

    /// Whether a webhook base URL is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Posts a status change to the strategy's workflow.
    ///
    /// Returns `Ok(false)` when nothing was sent (notifier disabled or no
    /// workflow linked).
    ///
    /// # Errors
    /// Returns an error if the request fails or is not answered with 2xx.
    pub async fn notify_status_change(
        &self,
        strategy: &Strategy,
        previous: StrategyStatus,
    ) -> Result<bool, NotifyError> {
        let (Some(base_url), Some(workflow_id)) =
            (self.base_url.as_ref(), strategy.n8n_workflow_id.as_ref())
        else {
            return Ok(false);
        };

        let url = format!("{base_url}/{workflow_id}");
        let mut request = self
            .client
            .post(&url)
            .json(&StatusChangeEvent::new(strategy, previous));
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        info!(strategy_id = %strategy.id, workflow_id, "Notified n8n of status change");
        Ok(true)
    }

    /// Sends the notification on a background task, logging failures.
    pub fn spawn_status_change(&self, strategy: Strategy, previous: StrategyStatus) {
        if !self.is_enabled() || strategy.n8n_workflow_id.is_none() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_status_change(&strategy, previous).await {
                warn!(strategy_id = %strategy.id, error = %e, "n8n webhook delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StrategyType;
    use axum::Router;
    use axum::extract::{Json, Path, State};
    use axum::routing::post;
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn strategy(workflow: Option<&str>) -> Strategy {
        let now = Utc::now();
        Strategy {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "condor".to_string(),
            description: None,
            strategy_type: StrategyType::IronCondor,
            config: serde_json::json!({"underlying": "NIFTY"}),
            parameters: serde_json::json!({}),
            status: StrategyStatus::Active,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: Decimal::ZERO,
            n8n_workflow_id: workflow.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_event_payload() {
        let s = strategy(Some("wf-1"));
        let event = StatusChangeEvent::new(&s, StrategyStatus::Draft);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "strategy_status_changed");
        assert_eq!(json["previous_status"], "draft");
        assert_eq!(json["status"], "active");
        assert_eq!(json["strategy_type"], "iron_condor");
    }

    #[tokio::test]
    async fn test_disabled_notifier_sends_nothing() {
        let notifier = N8nNotifier::new(&IntegrationsConfig::default());
        assert!(!notifier.is_enabled());
        let sent = notifier
            .notify_status_change(&strategy(Some("wf-1")), StrategyStatus::Draft)
            .await
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn test_posts_to_workflow_url() {
        type Received = Arc<Mutex<Vec<(String, serde_json::Value)>>>;
        let received: Received = Arc::new(Mutex::new(Vec::new()));

        async fn hook(
            State(received): State<Received>,
            Path(workflow): Path<String>,
            Json(body): Json<serde_json::Value>,
        ) {
            received.lock().await.push((workflow, body));
        }

        let app = Router::new()
            .route("/webhook/{workflow}", post(hook))
            .with_state(Arc::clone(&received));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = N8nNotifier::new(&IntegrationsConfig {
            n8n_webhook_url: Some(format!("http://{addr}/webhook/")),
            ..Default::default()
        });

        let sent = notifier
            .notify_status_change(&strategy(Some("wf-42")), StrategyStatus::Paused)
            .await
            .unwrap();
        assert!(sent);

        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "wf-42");
        assert_eq!(received[0].1["previous_status"], "paused");

        let skipped = notifier
            .notify_status_change(&strategy(None), StrategyStatus::Paused)
            .await
            .unwrap();
        assert!(!skipped);
    }
}
