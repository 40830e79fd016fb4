//! In-process publish/subscribe hub for map updates.
//!
//! Subscribers are called synchronously, in subscription order, on the
//! publishing thread. A panicking subscriber is logged and skipped; the
//! remaining subscribers still receive the event.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rental_map_models::{BoundingBox, HeatmapCell, PropertyRecord};
use strum_macros::{AsRefStr, Display};

/// Topics consumers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Channel {
    /// Record added, updated or removed.
    RecordUpdates,
    /// Heatmap data for some bounds was recomputed.
    HeatmapInvalidations,
}

/// A change announced by the sync service.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A record entered the working set.
    RecordAdded(PropertyRecord),
    /// A record already in the working set changed.
    RecordUpdated(PropertyRecord),
    /// A record left the working set.
    RecordRemoved {
        /// Id of the removed record.
        id: String,
    },
    /// Heatmap cells for `bounds` at `zoom` were recomputed.
    HeatmapUpdated {
        /// Bounds the cells cover.
        bounds: BoundingBox,
        /// Zoom the cells were computed for.
        zoom: f64,
        /// New cells.
        cells: Vec<HeatmapCell>,
    },
}

impl SyncEvent {
    /// Channel this event is published on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::RecordAdded(_) | Self::RecordUpdated(_) | Self::RecordRemoved { .. } => {
                Channel::RecordUpdates
            }
            Self::HeatmapUpdated { .. } => Channel::HeatmapInvalidations,
        }
    }
}

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    channels: BTreeMap<Channel, Vec<(u64, Callback)>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pub/sub hub. Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        let counts: BTreeMap<Channel, usize> = registry
            .channels
            .iter()
            .map(|(c, subs)| (*c, subs.len()))
            .collect();
        f.debug_struct("Broadcaster")
            .field("subscribers", &counts)
            .finish()
    }
}

/// Handle returned by [`Broadcaster::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    channel: Channel,
    id: u64,
}

impl Subscription {
    /// Channel this subscription listens on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Removes the callback. Returns `false` if the hub is gone or the
    /// callback was already removed.
    #[allow(clippy::must_use_candidate)]
    pub fn unsubscribe(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = lock(&registry);
        let Some(subs) = registry.channels.get_mut(&self.channel) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(id, _)| *id != self.id);
        before != subs.len()
    }
}

impl Broadcaster {
    /// Creates a hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events on `channel`.
    pub fn subscribe<F>(&self, channel: Channel, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry
            .channels
            .entry(channel)
            .or_default()
            .push((id, callback));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            channel,
            id,
        }
    }

    /// Number of subscribers on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        lock(&self.registry)
            .channels
            .get(&channel)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every subscriber of its channel. Returns how many
    /// subscribers handled it without panicking.
    ///
    /// The registry lock is released before callbacks run, so callbacks may
    /// subscribe, unsubscribe or publish.
    #[allow(clippy::must_use_candidate)]
    pub fn publish(&self, event: &SyncEvent) -> usize {
        let channel = event.channel();
        let subscribers: Vec<(u64, Callback)> = lock(&self.registry)
            .channels
            .get(&channel)
            .cloned()
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => log::error!("Subscriber {id} on channel {channel} panicked"),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn removed(id: &str) -> SyncEvent {
        SyncEvent::RecordRemoved { id: id.to_string() }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let hub = Broadcaster::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            let _ = hub.subscribe(Channel::RecordUpdates, move |_| {
                log.lock().unwrap().push(name);
            });
        }

        assert_eq!(hub.publish(&removed("a")), 3);
        assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let hub = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _ = hub.subscribe(Channel::RecordUpdates, |_| panic!("subscriber bug"));
        let counter = hits.clone();
        let _ = hub.subscribe(Channel::RecordUpdates, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hub.publish(&removed("a")), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn channels_are_independent() {
        let hub = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _ = hub.subscribe(Channel::HeatmapInvalidations, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hub.publish(&removed("a")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let heatmap = SyncEvent::HeatmapUpdated {
            bounds: BoundingBox::new(3.0, 6.0, 4.0, 7.0),
            zoom: 10.0,
            cells: Vec::new(),
        };
        assert_eq!(hub.publish(&heatmap), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hub = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = hub.subscribe(Channel::RecordUpdates, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hub.subscriber_count(Channel::RecordUpdates), 1);

        assert!(sub.unsubscribe());
        assert_eq!(hub.subscriber_count(Channel::RecordUpdates), 0);
        hub.publish(&removed("a"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn subscriber_may_publish_reentrantly() {
        let hub = Broadcaster::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = hub.clone();
        let _ = hub.subscribe(Channel::RecordUpdates, move |event| {
            if matches!(event, SyncEvent::RecordRemoved { id } if id == "outer") {
                inner.publish(&removed("inner"));
            }
        });
        let counter = hits.clone();
        let _ = hub.subscribe(Channel::RecordUpdates, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(&removed("outer"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn channel_names() {
        assert_eq!(Channel::RecordUpdates.to_string(), "record-updates");
        assert_eq!(Channel::HeatmapInvalidations.as_ref(), "heatmap-invalidations");
    }
}
