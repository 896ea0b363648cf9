//! Shared push-channel connection.
//!
//! One [`PushChannel`] owns the WebSocket connection to `/ws` and fans each
//! recognized [`ChangeEvent`] out to every local subscriber. The connection
//! is re-established with exponential backoff whenever it drops; drops are
//! logged and never surface to subscribers as errors. Polling remains the
//! correctness baseline, so missed events only delay a refresh.
//!
//! Views receive the channel explicitly and hold a [`PushSubscription`] for
//! as long as they are mounted.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::api::add_jitter;
use crate::error::{ClientError, Result};
use crate::types::ChangeEvent;

/// Capacity of the local fan-out channel.
const LOCAL_CHANNEL_CAPACITY: usize = 256;

/// Reconnect delay bounds.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Builds the `/ws` URL for `server_url`, carrying `token` as a query
/// parameter.
///
/// # Errors
///
/// Returns `ClientError::InvalidUrl` unless `server_url` is an `http` or
/// `https` URL.
pub fn push_url(server_url: &str, token: Option<&str>) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(server_url)
        .map_err(|e| ClientError::InvalidUrl(format!("{server_url}: {e}")))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(format!("cannot use scheme {scheme}")))?;

    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("token", token);
    }
    Ok(url)
}

/// A local subscription to the push channel.
///
/// Dropping it releases the subscription.
#[derive(Debug)]
pub struct PushSubscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

/// Outcome of waiting on a [`PushSubscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// A recognized change event.
    Event(ChangeEvent),
    /// This subscriber fell behind and skipped `n` events.
    Missed(u64),
}

impl PushSubscription {
    pub(crate) fn new(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next message; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<PushMessage> {
        match self.rx.recv().await {
            Ok(event) => Some(PushMessage::Event(event)),
            Err(broadcast::error::RecvError::Lagged(n)) => Some(PushMessage::Missed(n)),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

impl From<broadcast::Receiver<ChangeEvent>> for PushSubscription {
    fn from(rx: broadcast::Receiver<ChangeEvent>) -> Self {
        Self::new(rx)
    }
}

/// A shared, self-healing connection to the server's push channel.
#[derive(Debug)]
pub struct PushChannel {
    events: broadcast::Sender<ChangeEvent>,
    connected: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl PushChannel {
    /// Starts connecting to `/ws` on `server_url` in the background.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidUrl` if the push URL cannot be derived.
    pub fn connect(server_url: &str, token: Option<&str>) -> Result<Self> {
        let url = push_url(server_url, token)?;
        let (events, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        let (connected_tx, connected) = watch::channel(false);

        let task = tokio::spawn(run_connection(url, events.clone(), connected_tx));

        Ok(Self {
            events,
            connected,
            task,
        })
    }

    /// Subscribes to events received from now on.
    #[must_use]
    pub fn subscribe(&self) -> PushSubscription {
        PushSubscription::new(self.events.subscribe())
    }

    /// Number of live local subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Returns `true` while the WebSocket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits until the WebSocket is open.
    pub async fn wait_connected(&self) {
        let mut rx = self.connected.clone();
        // The sender lives as long as the connection task; if it is gone
        // there is nothing left to wait for.
        let _ = rx.wait_for(|connected| *connected).await;
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_connection(
    url: reqwest::Url,
    events: broadcast::Sender<ChangeEvent>,
    connected: watch::Sender<bool>,
) {
    let host = url.host_str().unwrap_or_default().to_string();
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        match connect_async(url.as_str()).await {
            Ok((mut stream, _)) => {
                info!(host = %host, "Push channel connected");
                delay = INITIAL_RECONNECT_DELAY;
                connected.send_replace(true);

                while let Some(message) = stream.next().await {
                    match message {
                        Ok(Message::Text(text)) => dispatch(&events, text.as_str()),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "Push channel read failed");
                            break;
                        }
                    }
                }

                connected.send_replace(false);
                warn!(host = %host, "Push channel disconnected");
            }
            Err(e) => {
                warn!(host = %host, error = %e, "Push channel connection failed");
            }
        }

        let wait = add_jitter(delay);
        debug!(delay_ms = wait.as_millis() as u64, "Reconnecting push channel");
        sleep(wait).await;
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

/// Parses one text frame and forwards it if its type is recognized.
fn dispatch(events: &broadcast::Sender<ChangeEvent>, text: &str) {
    match serde_json::from_str::<ChangeEvent>(text) {
        Ok(ChangeEvent::Unknown) => trace!("Ignoring unknown push event type"),
        Ok(event) => {
            // No local subscribers is not an error.
            let _ = events.send(event);
        }
        Err(e) => debug!(error = %e, "Ignoring malformed push message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    #[test]
    fn test_push_url_http() {
        let url = push_url("http://localhost:8080", Some("abc")).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?token=abc");
    }

    #[test]
    fn test_push_url_https_with_base_path() {
        let url = push_url("https://example.com/timer/", None).unwrap();
        assert_eq!(url.as_str(), "wss://example.com/timer/ws");
    }

    #[test]
    fn test_push_url_encodes_token() {
        let url = push_url("http://localhost:8080", Some("a b&c")).unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn test_push_url_rejects_other_schemes() {
        assert!(matches!(
            push_url("ftp://example.com", None),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_forwards_known_events() {
        let (tx, rx) = broadcast::channel(8);
        let mut subscription = PushSubscription::from(rx);

        dispatch(&tx, r#"{"type":"task_updated","taskId":"t-1","status":"completed"}"#);

        assert_eq!(
            subscription.recv().await,
            Some(PushMessage::Event(ChangeEvent::TaskUpdated {
                task_id: "t-1".into(),
                status: Some(TaskStatus::Completed),
            }))
        );
    }

    #[tokio::test]
    async fn test_dispatch_drops_unknown_and_malformed() {
        let (tx, rx) = broadcast::channel(8);
        let mut subscription = PushSubscription::from(rx);

        dispatch(&tx, r#"{"type":"payroll_closed"}"#);
        dispatch(&tx, "not json");
        dispatch(&tx, r#"{"type":"users_updated"}"#);

        assert_eq!(
            subscription.recv().await,
            Some(PushMessage::Event(ChangeEvent::UsersUpdated))
        );
    }

    #[tokio::test]
    async fn test_subscription_reports_missed_events() {
        let (tx, rx) = broadcast::channel(2);
        let mut subscription = PushSubscription::from(rx);

        for _ in 0..5 {
            tx.send(ChangeEvent::UsersUpdated).unwrap();
        }

        assert_eq!(subscription.recv().await, Some(PushMessage::Missed(3)));
        drop(tx);
        assert_eq!(
            subscription.recv().await,
            Some(PushMessage::Event(ChangeEvent::UsersUpdated))
        );
        assert_eq!(
            subscription.recv().await,
            Some(PushMessage::Event(ChangeEvent::UsersUpdated))
        );
        assert_eq!(subscription.recv().await, None);
    }
}
