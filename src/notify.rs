use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for applied store events, one channel per day.
pub struct NotifyHub {
    channels: DashMap<NaiveDate, broadcast::Sender<Event>>,
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

    /// Subscribe to changes on a day. Creates the channel if needed.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, date: NaiveDate, event: &Event) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }
}
