//! Cross-window messaging between the provider popup and the host page.
//!
//! [`WindowChannel`] stands in for the host window's `message` event target:
//! the popup side calls [`WindowChannel::post_message`], the login state
//! machine registers a [`Subscription`] that yields only trusted, same-origin
//! auth callbacks. Everything else is skipped without being consumed, so
//! other listeners on the same channel still see it.

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::error::MessagingError;
use crate::types::CALLBACK_SOURCE;

const DEFAULT_CAPACITY: usize = 64;

/// A message event as the host window receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Origin of the window that posted the message.
    pub origin: String,
    /// `false` for events synthesized by scripts rather than the user agent.
    pub is_trusted: bool,
    pub data: Value,
}

impl MessageEvent {
    /// A user-agent dispatched event.
    pub fn trusted(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            is_trusted: true,
            data,
        }
    }

    /// The event the OIDC redirect page posts back to its opener.
    pub fn oidc_callback(origin: impl Into<String>, path: &str, state: &str, code: &str) -> Self {
        Self::trusted(
            origin,
            serde_json::json!({
                "source": CALLBACK_SOURCE,
                "path": path,
                "state": state,
                "code": code,
            }),
        )
    }
}

/// Accepts only trusted auth callbacks from one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFilter {
    origin: String,
}

impl CallbackFilter {
    /// Filter for callbacks posted from `origin` (the host's own origin).
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    /// Whether `event` is an auth callback this host should act on.
    #[must_use]
    pub fn matches(&self, event: &MessageEvent) -> bool {
        event.origin == self.origin
            && event.is_trusted
            && event.data.get("source").and_then(Value::as_str) == Some(CALLBACK_SOURCE)
    }
}

/// The host window's message bus. Clones share the same bus.
#[derive(Debug, Clone)]
pub struct WindowChannel {
    tx: broadcast::Sender<MessageEvent>,
}

impl Default for WindowChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl WindowChannel {
    /// A channel buffering up to `capacity` undelivered events per listener.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Dispatch `event` to every registered listener.
    ///
    /// Returns how many listeners received it; zero is not an error.
    pub fn post_message(&self, event: MessageEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Register one listener that resolves on the first event `filter` accepts.
    #[must_use]
    pub fn subscribe(&self, filter: CallbackFilter) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One registered listener. Dropping it deregisters it.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<MessageEvent>,
    filter: CallbackFilter,
}

impl Subscription {
    /// Wait for the next event accepted by the filter.
    ///
    /// Cancel safe: dropping the future loses no accepted event.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Closed`] if the channel has no senders left.
    pub async fn next_match(&mut self) -> Result<MessageEvent, MessagingError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(event) => {
                    trace!(
                        origin = %event.origin,
                        trusted = event.is_trusted,
                        "ignoring unrelated window message"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "window message listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(MessagingError::Closed),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    const ORIGIN: &str = "https://vault.example.com";

    fn callback() -> MessageEvent {
        MessageEvent::oidc_callback(ORIGIN, "oidc", "state", "code")
    }

    #[tokio::test]
    async fn resolves_with_matching_callback() {
        let channel = WindowChannel::default();
        let mut sub = channel.subscribe(CallbackFilter::new(ORIGIN));
        assert_eq!(channel.post_message(callback()), 1);
        assert_eq!(sub.next_match().await.unwrap(), callback());
    }

    #[tokio::test(start_paused = true)]
    async fn untrusted_and_foreign_events_are_skipped() {
        let channel = WindowChannel::default();
        let mut sub = channel.subscribe(CallbackFilter::new(ORIGIN));

        let mut untrusted = callback();
        untrusted.is_trusted = false;
        channel.post_message(untrusted);
        channel.post_message(MessageEvent::oidc_callback(
            "https://evil.example.com",
            "oidc",
            "state",
            "code",
        ));
        channel.post_message(MessageEvent::trusted(
            ORIGIN,
            serde_json::json!({ "source": "devtools" }),
        ));

        let pending = tokio::time::timeout(Duration::from_secs(5), sub.next_match()).await;
        assert!(pending.is_err(), "no event should have matched");

        channel.post_message(callback());
        assert_eq!(sub.next_match().await.unwrap(), callback());
    }

    #[tokio::test]
    async fn skipped_events_stay_visible_to_other_listeners() {
        let channel = WindowChannel::default();
        let mut ours = channel.subscribe(CallbackFilter::new(ORIGIN));
        let mut theirs = channel.subscribe(CallbackFilter::new("https://other.example.com"));

        let foreign = MessageEvent::oidc_callback("https://other.example.com", "p", "s", "c");
        channel.post_message(foreign.clone());
        channel.post_message(callback());

        assert_eq!(theirs.next_match().await.unwrap(), foreign);
        assert_eq!(ours.next_match().await.unwrap(), callback());
    }

    #[test]
    fn dropping_subscription_deregisters_listener() {
        let channel = WindowChannel::default();
        let first = channel.subscribe(CallbackFilter::new(ORIGIN));
        let second = channel.subscribe(CallbackFilter::new(ORIGIN));
        assert_eq!(channel.listener_count(), 2);
        drop(first);
        drop(second);
        assert_eq!(channel.listener_count(), 0);
        assert_eq!(channel.post_message(callback()), 0);
    }
}
