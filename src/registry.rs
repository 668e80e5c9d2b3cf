/// The set of channels the application wants to be subscribed to.
///
/// Independent of connection state: entries survive drops and are replayed, in
/// insertion order, every time a connection reaches Open.
use crate::channel::Channel;

/// A registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: Channel,
}

/// Insertion-ordered subscriptions keyed by resolved path.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `channel` unless its path is already present.
    ///
    /// Returns true if the channel was inserted. Re-adding keeps the original entry,
    /// including its `batched` flag.
    pub fn add(&mut self, channel: Channel) -> bool {
        if self.contains(channel.path()) {
            return false;
        }
        self.entries.push(Subscription { channel });
        true
    }

    /// Remove the entry for `path`. Returns true if one was present.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.channel.path() != path);
        self.entries.len() != before
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.iter().any(|s| s.channel.path() == path)
    }

    /// Snapshot of every channel, in the order they were first subscribed.
    pub fn all(&self) -> Vec<Channel> {
        self.entries.iter().map(|s| s.channel.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
