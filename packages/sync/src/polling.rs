//! Background polling for upstream record changes.
//!
//! Polling only runs while the map is visible. Visibility is fed through a
//! `watch` channel; when it flips back to visible a catch-up poll runs
//! straight away instead of waiting for the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::service::SyncService;

/// Default time between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Spawns the polling loop. It ends when the visibility sender is dropped.
#[must_use]
pub fn spawn_polling(
    service: Arc<SyncService>,
    mut visibility: watch::Receiver<bool>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *visibility.borrow() {
                        service.poll_once().await;
                    }
                }
                changed = visibility.changed() => {
                    if changed.is_err() {
                        log::debug!("Visibility channel closed, stopping polling");
                        break;
                    }
                    let visible = *visibility.borrow_and_update();
                    if visible {
                        log::info!("Map visible, resuming polling");
                        service.poll_once().await;
                        ticker.reset();
                    } else {
                        log::info!("Map hidden, pausing polling");
                    }
                }
            }
        }
    })
}
