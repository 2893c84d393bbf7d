//! Outbound notifications (email, SMS, in-app) to renters, vendors and admins.
//!
//! Delivery is always off the critical path: [`NotificationDispatcher`] spawns
//! each send, logs failures and never reports them back to the caller.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::Serialize;
use service_core::observability::TracedClientExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationEvent {
    #[serde(rename = "booking.created")]
    BookingCreated,
    #[serde(rename = "booking.cancelled")]
    BookingCancelled,
    #[serde(rename = "booking.reminder")]
    BookingReminder,
    #[serde(rename = "payment.succeeded")]
    PaymentSucceeded,
    #[serde(rename = "payment.received")]
    PaymentReceived,
    #[serde(rename = "payment.refund_required")]
    PaymentRefundRequired,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingCreated => "booking.created",
            Self::BookingCancelled => "booking.cancelled",
            Self::BookingReminder => "booking.reminder",
            Self::PaymentSucceeded => "payment.succeeded",
            Self::PaymentReceived => "payment.received",
            Self::PaymentRefundRequired => "payment.refund_required",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Recipient {
    User(String),
    Admins,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    InApp,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub recipient: Recipient,
    pub channels: Vec<Channel>,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(event: NotificationEvent, recipient: Recipient, payload: serde_json::Value) -> Self {
        Self {
            event,
            recipient,
            channels: vec![Channel::Email],
            payload,
        }
    }

    pub fn with_channels(mut self, channels: &[Channel]) -> Self {
        self.channels = channels.to_vec();
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Writes notifications to the log. Used when no dispatcher endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            event = notification.event.as_str(),
            recipient = ?notification.recipient,
            channels = ?notification.channels,
            "Notification (log only)"
        );
        Ok(())
    }
}

/// POSTs notifications as JSON to the notification dispatcher, retrying
/// transport errors and 5xx responses.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
    max_elapsed: Duration,
}

impl HttpNotifier {
    pub fn new(endpoint: &str) -> Self {
        tracing::info!(endpoint = %endpoint, "HTTP notification dispatcher configured");
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn send_once(&self, notification: &Notification) -> Result<(), backoff::Error<anyhow::Error>> {
        let response = self
            .client
            .traced_post(&self.endpoint)
            .timeout(Duration::from_secs(5))
            .json(notification)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(anyhow::Error::new(e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let err = anyhow::anyhow!("notification dispatcher returned {}", status);
        if status.is_server_error() {
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };
        retry(policy, || async { self.send_once(notification).await }).await
    }
}

/// Keeps every notification in memory. Optionally fails each send after recording it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, event: NotificationEvent) -> usize {
        self.sent().iter().filter(|n| n.event == event).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        if self.fail {
            anyhow::bail!("notification delivery failed");
        }
        Ok(())
    }
}

/// Fire-and-forget front for a [`Notifier`].
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(
                    event = notification.event.as_str(),
                    recipient = ?notification.recipient,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> Notification {
        Notification::new(
            NotificationEvent::PaymentSucceeded,
            Recipient::User("renter-1".to_string()),
            json!({ "booking_id": "b-1" }),
        )
        .with_channels(&[Channel::Email, Channel::Sms])
    }

    #[test]
    fn serializes_event_names_and_recipient() {
        let value = serde_json::to_value(notification()).unwrap();
        assert_eq!(value["event"], "payment.succeeded");
        assert_eq!(value["recipient"], json!({ "kind": "user", "id": "renter-1" }));
        assert_eq!(value["channels"], json!(["email", "sms"]));
    }

    #[tokio::test]
    async fn http_notifier_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(body_string_contains("payment.succeeded"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(&format!("{}/notify", server.uri()))
            .with_max_elapsed(Duration::from_secs(5));
        notifier.notify(&notification()).await.unwrap();
    }

    #[tokio::test]
    async fn http_notifier_gives_up_on_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = HttpNotifier::new(&server.uri());
        assert!(notifier.notify(&notification()).await.is_err());
    }

    #[tokio::test]
    async fn dispatcher_swallows_failures() {
        let recorder = Arc::new(RecordingNotifier::failing());
        let dispatcher = NotificationDispatcher::new(recorder.clone());

        dispatcher.dispatch(notification()).await.unwrap();

        assert_eq!(recorder.count(NotificationEvent::PaymentSucceeded), 1);
    }
}
