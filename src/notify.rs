// =============================================================================
// Notifier — webhook alerts for critical events
// =============================================================================
//
// Fire-and-forget delivery of critical/warning notifications (atomic-entry
// failures, drawdown pauses, repeated auth errors, ensemble fallback). With
// no webhook configured every call is a no-op, which is also the test mode.
// Delivery failures are logged, never propagated — alerting must not break
// the cycle.
// =============================================================================

use chrono::Utc;
use tracing::{debug, warn};

pub struct Notifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self {
            webhook_url,
            client,
        }
    }

    /// A notifier that drops everything (tests, backtest mode).
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    pub async fn critical(&self, title: &str, body: &str) {
        self.send("critical", title, body).await;
    }

    pub async fn warning(&self, title: &str, body: &str) {
        self.send("warning", title, body).await;
    }

    async fn send(&self, level: &str, title: &str, body: &str) {
        let Some(url) = &self.webhook_url else {
            debug!(level, title, "notification suppressed (no webhook configured)");
            return;
        };

        let payload = serde_json::json!({
            "level": level,
            "title": title,
            "body": body,
            "ts": Utc::now().to_rfc3339(),
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(level, title, "notification delivered");
            }
            Ok(resp) => {
                warn!(level, title, status = %resp.status(), "notification rejected");
            }
            Err(e) => {
                warn!(level, title, error = %e, "notification delivery failed");
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_is_a_noop() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        // Must complete without error and without a network dependency.
        notifier.critical("title", "body").await;
        notifier.warning("title", "body").await;
    }
}
