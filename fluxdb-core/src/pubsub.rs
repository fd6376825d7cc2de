//! Channel fan-out for pub/sub messaging
//!
//! Subscribers are handles owned by the connection layer; the engine only
//! needs a stable id and a way to push a framed line. Both the forward
//! (channel → subscribers) and reverse (subscriber → channels) maps live
//! under one mutex so disconnect cleanup stays cheap.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A client handle that can receive published messages
pub trait Subscriber: Send + Sync {
    /// Stable identity of the connection
    fn id(&self) -> u64;
    /// Push one framed line to the client
    fn send(&self, message: &str) -> std::io::Result<()>;
}

#[derive(Default)]
struct PubSubState {
    enabled: bool,
    channels: HashMap<String, Vec<Arc<dyn Subscriber>>>,
    subscriptions: HashMap<u64, Vec<String>>,
}

/// Channel → subscriber fan-out
pub struct PubSubManager {
    state: Mutex<PubSubState>,
}

impl PubSubManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PubSubState {
                enabled: true,
                ..Default::default()
            }),
        }
    }

    /// Toggle the module; disabling kicks every subscriber out
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if !enabled {
            state.channels.clear();
            state.subscriptions.clear();
        }
        info!("pub/sub {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Attach a subscriber to a channel; duplicate subscriptions are ignored
    pub fn subscribe(&self, channel: &str, subscriber: Arc<dyn Subscriber>) {
        let mut state = self.state.lock();
        if !state.enabled {
            return;
        }

        let subs = state.channels.entry(channel.to_string()).or_default();
        if subs.iter().any(|s| s.id() == subscriber.id()) {
            return;
        }
        debug!("subscriber {} joined '{}'", subscriber.id(), channel);
        subs.push(subscriber.clone());
        state
            .subscriptions
            .entry(subscriber.id())
            .or_default()
            .push(channel.to_string());
    }

    /// Send `MESSAGE <channel> <message>` to every subscriber
    ///
    /// Returns the number of successful sends. Failed sends do not evict:
    /// the connection layer notices the broken socket and calls
    /// [`unsubscribe_all`](Self::unsubscribe_all).
    pub fn publish(&self, channel: &str, message: &str) -> usize {
        let state = self.state.lock();
        if !state.enabled {
            return 0;
        }
        let Some(subs) = state.channels.get(channel) else {
            return 0;
        };

        let framed = format!("MESSAGE {channel} {message}\n");
        subs.iter()
            .filter(|sub| sub.send(&framed).is_ok())
            .count()
    }

    /// Detach a subscriber from every channel (disconnect cleanup)
    pub fn unsubscribe_all(&self, subscriber_id: u64) {
        let mut state = self.state.lock();
        let Some(channels) = state.subscriptions.remove(&subscriber_id) else {
            return;
        };
        for channel in channels {
            if let Some(subs) = state.channels.get_mut(&channel) {
                subs.retain(|s| s.id() != subscriber_id);
                if subs.is_empty() {
                    state.channels.remove(&channel);
                }
            }
        }
        debug!("subscriber {} cleaned up", subscriber_id);
    }

    /// Number of subscribers on a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state.lock().channels.get(channel).map_or(0, Vec::len)
    }
}

impl Default for PubSubManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSubscriber {
        id: u64,
        received: Mutex<Vec<String>>,
        healthy: bool,
    }

    impl MockSubscriber {
        fn new(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: Mutex::new(Vec::new()),
                healthy: true,
            })
        }

        fn broken(id: u64) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: Mutex::new(Vec::new()),
                healthy: false,
            })
        }
    }

    impl Subscriber for MockSubscriber {
        fn id(&self) -> u64 {
            self.id
        }

        fn send(&self, message: &str) -> std::io::Result<()> {
            if !self.healthy {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            self.received.lock().push(message.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_fan_out_counts_successes() {
        let pubsub = PubSubManager::new();
        let a = MockSubscriber::new(1);
        let b = MockSubscriber::new(2);
        let dead = MockSubscriber::broken(3);

        pubsub.subscribe("news", a.clone());
        pubsub.subscribe("news", b.clone());
        pubsub.subscribe("news", dead.clone());
        pubsub.subscribe("other", b.clone());

        assert_eq!(pubsub.publish("news", "hello"), 2);
        assert_eq!(a.received.lock().as_slice(), ["MESSAGE news hello\n"]);
        assert_eq!(b.received.lock().as_slice(), ["MESSAGE news hello\n"]);
        assert!(dead.received.lock().is_empty());

        // failed sends do not evict
        assert_eq!(pubsub.subscriber_count("news"), 3);
        assert_eq!(pubsub.publish("nobody", "x"), 0);
    }

    #[test]
    fn test_duplicate_subscribe_is_ignored() {
        let pubsub = PubSubManager::new();
        let a = MockSubscriber::new(1);
        pubsub.subscribe("news", a.clone());
        pubsub.subscribe("news", a.clone());

        assert_eq!(pubsub.subscriber_count("news"), 1);
        assert_eq!(pubsub.publish("news", "x"), 1);
    }

    #[test]
    fn test_unsubscribe_all_detaches_everywhere() {
        let pubsub = PubSubManager::new();
        let a = MockSubscriber::new(1);
        let b = MockSubscriber::new(2);
        pubsub.subscribe("news", a.clone());
        pubsub.subscribe("sport", a.clone());
        pubsub.subscribe("news", b.clone());

        pubsub.unsubscribe_all(1);
        assert_eq!(pubsub.subscriber_count("news"), 1);
        assert_eq!(pubsub.subscriber_count("sport"), 0);
        assert_eq!(pubsub.publish("news", "x"), 1);
    }

    #[test]
    fn test_disable_clears_and_rejects() {
        let pubsub = PubSubManager::new();
        let a = MockSubscriber::new(1);
        pubsub.subscribe("news", a.clone());

        pubsub.set_enabled(false);
        assert_eq!(pubsub.subscriber_count("news"), 0);
        pubsub.subscribe("news", a.clone());
        assert_eq!(pubsub.subscriber_count("news"), 0);
        assert_eq!(pubsub.publish("news", "x"), 0);

        pubsub.set_enabled(true);
        pubsub.subscribe("news", a);
        assert_eq!(pubsub.publish("news", "x"), 1);
    }
}
