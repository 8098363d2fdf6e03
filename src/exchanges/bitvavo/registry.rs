use crate::core::errors::ExchangeError;
use crate::exchanges::bitvavo::subscription::{Channel, ChannelSubscriptions, Subscribed, Subscription};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Server-confirmed subscription state of one connection.
///
/// Only `subscribed`/`unsubscribed` events write here; client requests never
/// do. Resubscription after a reconnect replays exactly this state.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<BTreeMap<Channel, ChannelSubscriptions>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a `subscribed` event for `channel`.
    ///
    /// The event carries the full active set, so the entry is replaced. An
    /// event without `channel` is reported and leaves the entry untouched.
    pub fn confirm(&self, channel: Channel, event: Subscribed) -> Result<(), ExchangeError> {
        let mut subscriptions = event.subscriptions;
        let entry = subscriptions
            .remove(&channel)
            .ok_or_else(|| ExchangeError::UnexpectedChannel(channel.to_string()))?;
        self.store(channel, Some(entry));
        Ok(())
    }

    /// Apply an `unsubscribed` event for `channel`; a missing channel means
    /// nothing is left on it.
    pub fn release(&self, channel: Channel, event: Subscribed) {
        let mut subscriptions = event.subscriptions;
        self.store(channel, subscriptions.remove(&channel));
    }

    /// Snapshot as subscribe entries; candles yield one entry per interval.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.lock()
            .iter()
            .flat_map(|(channel, entry)| entry.to_subscriptions(*channel))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn store(&self, channel: Channel, entry: Option<ChannelSubscriptions>) {
        let mut entries = self.lock();
        match entry.map(ChannelSubscriptions::pruned) {
            Some(entry) if !entry.is_empty() => {
                debug!(%channel, ?entry, "confirmed subscriptions updated");
                entries.insert(channel, entry);
            }
            _ => {
                debug!(%channel, "no confirmed subscriptions left");
                entries.remove(&channel);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Channel, ChannelSubscriptions>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
