use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, FacilityId};

const CHANNEL_CAPACITY: usize = 256;

/// Per-facility broadcast hub. The seam where the surrounding system's
/// collaborators (email notifier, calendar display refresh) observe
/// durable changes without the engine knowing they exist. Slow consumers
/// lose old events (broadcast semantics), they are never able to block a
/// write.
pub struct NotifyHub {
    channels: DashMap<FacilityId, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a facility. Creates the channel if needed.
    pub fn subscribe(&self, facility_id: FacilityId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(facility_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, facility_id: FacilityId, event: &Event) {
        if let Some(sender) = self.channels.get(&facility_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a facility's channel (e.g. after the facility is deleted).
    pub fn remove(&self, facility_id: &FacilityId) {
        self.channels.remove(facility_id);
    }
}
