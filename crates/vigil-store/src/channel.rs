use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vigil_models::StateKey;

use crate::error::StateError;

/// Shared key-value and publish/subscribe store used to broadcast analysis
/// results between agents.
///
/// Each agent holds its own handle and acquires it explicitly with
/// [`connect`](StateChannel::connect); every other call fails with
/// [`StateError::Closed`] until then. Values are raw JSON strings; use the
/// helpers in [`crate::envelope`] for typed, schema-checked payloads.
#[async_trait]
pub trait StateChannel: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), StateError>;

    async fn close(&self) -> Result<(), StateError>;

    fn is_connected(&self) -> bool;

    /// Returns `None` for missing or expired keys.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// `ttl = None` keeps the value until it is overwritten or deleted.
    async fn set(
        &self,
        key: &StateKey,
        value_json: String,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Returns the number of live subscribers that received the message.
    async fn publish(&self, channel: &str, message: String) -> Result<usize, StateError>;

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StateError>;
}

/// Subscribe to `channel` and invoke `handler` for every message until the
/// channel closes or the returned task is aborted.
///
/// Lagged receivers skip the missed messages and keep going.
pub async fn subscribe_with<F>(
    store: &dyn StateChannel,
    channel: &str,
    mut handler: F,
) -> Result<JoinHandle<()>, StateError>
where
    F: FnMut(String) + Send + 'static,
{
    let mut rx = store.subscribe(channel).await?;
    let channel = channel.to_string();
    Ok(tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => handler(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "Subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(channel = %channel, "Subscription closed");
                    break;
                }
            }
        }
    }))
}
