//! Webhook notifications for automated runs.

use std::fmt;

use chrono::Utc;
use http::Uri;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use drift_control::HttpControlPlane;
use drift_core::config::NotificationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyEvent {
    Start,
    Complete,
    Failure,
}

impl NotifyEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyEvent::Start => "start",
            NotifyEvent::Complete => "complete",
            NotifyEvent::Failure => "failure",
        }
    }
}

impl fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Posts `{event, timestamp, data}` to the configured webhook.
///
/// Delivery failures are logged and never fail the run.
pub struct Notifier {
    config: NotificationConfig,
    target: Option<(HttpControlPlane, String)>,
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        let target = match config.webhook_url.as_deref() {
            Some(url) if config.enabled => match split_url(url) {
                Ok((endpoint, path)) => {
                    Some((HttpControlPlane::new(&endpoint, config.timeout), path))
                }
                Err(e) => {
                    warn!(url, error = %e, "webhook URL unusable, notifications disabled");
                    None
                }
            },
            _ => None,
        };
        Self {
            config: config.clone(),
            target,
        }
    }

    pub fn disabled() -> Self {
        Self::new(&NotificationConfig::default())
    }

    pub fn wants(&self, event: NotifyEvent) -> bool {
        if self.target.is_none() {
            return false;
        }
        match event {
            NotifyEvent::Start => self.config.on_start,
            NotifyEvent::Complete => self.config.on_complete,
            NotifyEvent::Failure => self.config.on_failure,
        }
    }

    pub async fn send(&self, event: NotifyEvent, data: Value) {
        if !self.wants(event) {
            return;
        }
        let Some((client, path)) = &self.target else {
            return;
        };
        let payload = json!({
            "event": event.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        });
        match client.post_event(path, &payload).await {
            Ok(()) => info!(%event, "notification sent"),
            Err(e) => error!(%event, error = %e, "failed to send notification"),
        }
    }
}

/// `http://host[:port]/path` into a `host:port` endpoint and a path.
fn split_url(url: &str) -> Result<(String, String), String> {
    let uri: Uri = url.parse().map_err(|e| format!("invalid URL: {e}"))?;
    if uri.scheme_str() != Some("http") {
        return Err("only http:// webhooks are supported".to_string());
    }
    let host = uri.host().ok_or("URL has no host")?;
    let port = uri.port_u16().unwrap_or(80);
    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    Ok((format!("{host}:{port}"), path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn spawn_hook() -> (String, Received) {
        let received = Received::default();
        let router = Router::new()
            .route(
                "/hooks/drift",
                post(|State(seen): State<Received>, Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(body);
                }),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/hooks/drift"), received)
    }

    fn config(url: &str) -> NotificationConfig {
        NotificationConfig {
            enabled: true,
            webhook_url: Some(url.to_string()),
            on_start: true,
            on_complete: false,
            on_failure: true,
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn split_url_defaults() {
        assert_eq!(
            split_url("http://hooks.local/drift?token=1").unwrap(),
            ("hooks.local:80".to_string(), "/drift?token=1".to_string())
        );
        assert_eq!(
            split_url("http://10.0.0.2:9000").unwrap(),
            ("10.0.0.2:9000".to_string(), "/".to_string())
        );
        assert!(split_url("https://hooks.local/drift").is_err());
    }

    #[tokio::test]
    async fn posts_enabled_events_only() {
        let (url, received) = spawn_hook().await;
        let notifier = Notifier::new(&config(&url));

        notifier
            .send(NotifyEvent::Start, json!({"migration_count": 2}))
            .await;
        notifier.send(NotifyEvent::Complete, json!({"total": 2})).await;

        let seen = received.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["event"], "start");
        assert_eq!(seen[0]["data"]["migration_count"], 2);
        assert!(seen[0]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn disabled_or_unreachable_is_quiet() {
        let notifier = Notifier::disabled();
        assert!(!notifier.wants(NotifyEvent::Failure));

        let mut off = config("http://127.0.0.1:9/hook");
        off.enabled = false;
        assert!(!Notifier::new(&off).wants(NotifyEvent::Start));

        // Nothing listens on the discard port; the failure is only logged.
        let unreachable = Notifier::new(&config("http://127.0.0.1:9/hook"));
        assert!(unreachable.wants(NotifyEvent::Failure));
        unreachable
            .send(NotifyEvent::Failure, json!({"reason": "gateway down"}))
            .await;
    }
}
