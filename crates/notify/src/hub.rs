use std::{collections::HashMap, time::Instant};

use {
    dashmap::DashMap,
    tokio::sync::mpsc,
    tracing::{debug, warn},
    wabridge_common::SectorId,
};

use crate::events::HubEvent;

// ── Subscriber ───────────────────────────────────────────────────────────────

/// A live connection listening to one sector's events.
#[derive(Debug)]
struct Subscriber {
    /// Channel feeding this connection's write loop.
    sender: mpsc::UnboundedSender<String>,
    connected_at: Instant,
}

impl Subscriber {
    fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }
}

/// Handle returned by [`NotificationHub::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub conn_id: String,
    pub sector_id: SectorId,
    /// Serialized event frames, in publish order.
    pub frames: mpsc::UnboundedReceiver<String>,
}

// ── Hub ──────────────────────────────────────────────────────────────────────

/// Fans events out to the subscribers of each sector.
///
/// Membership only: the hub never owns sector data. A subscriber whose
/// channel is closed is evicted on the next publish to its sector.
#[derive(Debug, Default)]
pub struct NotificationHub {
    sectors: DashMap<SectorId, HashMap<String, Subscriber>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sector_id: SectorId) -> Subscription {
        let (sender, frames) = mpsc::unbounded_channel();
        let conn_id = uuid::Uuid::new_v4().to_string();
        self.sectors
            .entry(sector_id)
            .or_default()
            .insert(conn_id.clone(), Subscriber {
                sender,
                connected_at: Instant::now(),
            });
        debug!(sector_id, conn_id = %conn_id, "subscriber registered");
        Subscription {
            conn_id,
            sector_id,
            frames,
        }
    }

    /// Remove a subscriber. Returns whether it was registered.
    pub fn unsubscribe(&self, sector_id: SectorId, conn_id: &str) -> bool {
        let removed = match self.sectors.get_mut(&sector_id) {
            Some(mut subs) => subs.remove(conn_id),
            None => None,
        };
        self.sectors.remove_if(&sector_id, |_, subs| subs.is_empty());
        if let Some(sub) = &removed {
            debug!(
                sector_id,
                conn_id,
                connected_for_ms = sub.connected_at.elapsed().as_millis() as u64,
                "subscriber removed"
            );
        }
        removed.is_some()
    }

    pub fn subscriber_count(&self, sector_id: SectorId) -> usize {
        self.sectors.get(&sector_id).map_or(0, |subs| subs.len())
    }

    pub fn total_subscribers(&self) -> usize {
        self.sectors.iter().map(|entry| entry.value().len()).sum()
    }

    /// Send `event` to every subscriber of its sector, evicting dead ones.
    /// Returns the number of subscribers reached.
    pub fn publish(&self, event: &HubEvent) -> usize {
        let sector_id = event.sector_id();
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(sector_id, error = %e, "failed to serialize hub event");
                return 0;
            },
        };

        let mut delivered = 0;
        if let Some(mut subs) = self.sectors.get_mut(&sector_id) {
            subs.retain(|conn_id, sub| {
                if sub.send(&frame) {
                    delivered += 1;
                    true
                } else {
                    debug!(sector_id, conn_id = %conn_id, "evicting closed subscriber");
                    false
                }
            });
        }
        self.sectors.remove_if(&sector_id, |_, subs| subs.is_empty());

        debug!(sector_id, event = event.kind(), delivered, "event published");
        delivered
    }
}
