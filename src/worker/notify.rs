//! Update notifications pushed to open clients.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered notifications per client before a slow client starts lagging.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
  Refresh,
}

/// Tells clients a cached resource changed on the network.
///
/// Serializes as `{"type": "refresh", "url": ..., "eTag": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotification {
  #[serde(rename = "type")]
  pub kind: NotificationType,
  pub url: String,
  #[serde(rename = "eTag")]
  pub etag: Option<String>,
}

impl UpdateNotification {
  pub fn refresh(url: impl Into<String>, etag: Option<&str>) -> Self {
    Self {
      kind: NotificationType::Refresh,
      url: url.into(),
      etag: etag.map(String::from),
    }
  }
}

/// Receiving end held by one open client.
pub type ClientReceiver = broadcast::Receiver<UpdateNotification>;

/// Fan-out topic for update notifications. Every subscriber is a client.
#[derive(Clone)]
pub struct Notifier {
  sender: broadcast::Sender<UpdateNotification>,
}

impl Notifier {
  pub fn new() -> Self {
    let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
    Self { sender }
  }

  /// Register a new client.
  pub fn subscribe(&self) -> ClientReceiver {
    self.sender.subscribe()
  }

  pub fn client_count(&self) -> usize {
    self.sender.receiver_count()
  }

  /// Send to every current client. Returns how many clients got it.
  ///
  /// Publishing with no clients is not an error.
  pub fn publish(&self, notification: UpdateNotification) -> usize {
    match self.sender.send(notification) {
      Ok(delivered) => delivered,
      Err(broadcast::error::SendError(notification)) => {
        debug!(url = %notification.url, "No clients to notify");
        0
      }
    }
  }
}

impl Default for Notifier {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_wire_format() {
    let n = UpdateNotification::refresh("https://tsd.test/?assets=app.js", Some("\"abc\""));
    let json = serde_json::to_value(&n).unwrap();
    assert_eq!(
      json,
      serde_json::json!({
        "type": "refresh",
        "url": "https://tsd.test/?assets=app.js",
        "eTag": "\"abc\""
      })
    );
  }

  #[test]
  fn test_publish_without_clients() {
    let notifier = Notifier::new();
    assert_eq!(notifier.publish(UpdateNotification::refresh("u", None)), 0);
  }

  #[tokio::test]
  async fn test_every_client_receives_once() {
    let notifier = Notifier::new();
    let mut tab_a = notifier.subscribe();
    let mut tab_b = notifier.subscribe();

    let n = UpdateNotification::refresh("https://tsd.test/", Some("2"));
    assert_eq!(notifier.publish(n.clone()), 2);

    assert_eq!(tab_a.recv().await.unwrap(), n);
    assert_eq!(tab_b.recv().await.unwrap(), n);
    assert!(tab_a.try_recv().is_err());
    assert!(tab_b.try_recv().is_err());
  }
}
