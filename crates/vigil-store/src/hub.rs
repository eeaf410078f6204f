use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::error::StateError;

/// In-process fan-out for publish/subscribe channels.
///
/// Channels are created lazily on first subscribe. Publishing to a channel
/// nobody listens on is not an error; it reaches zero subscribers.
pub struct BroadcastHub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn publish(&self, channel: &str, message: String) -> Result<usize, StateError> {
        let channels = self
            .channels
            .lock()
            .map_err(|e| StateError::Unavailable(format!("hub mutex poisoned: {e}")))?;
        match channels.get(channel) {
            // send only fails when every receiver is gone
            Some(tx) => Ok(tx.send(message).unwrap_or(0)),
            None => Ok(0),
        }
    }

    pub fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StateError> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|e| StateError::Unavailable(format!("hub mutex poisoned: {e}")))?;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(tx.subscribe())
    }

    /// Drop every channel. Existing receivers observe `Closed`.
    pub fn close_all(&self) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.clear();
        }
    }
}
