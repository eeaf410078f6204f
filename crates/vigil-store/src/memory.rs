use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use tokio::sync::broadcast;
use tracing::debug;
use vigil_models::StateKey;

use crate::channel::StateChannel;
use crate::error::StateError;
use crate::hub::BroadcastHub;

#[derive(Debug, Clone)]
struct StoredValue {
    json: String,
    ttl: Option<Duration>,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process state channel backed by moka.
///
/// Suitable when every agent lives in the same process; values vanish on
/// restart.
pub struct MemoryStateChannel {
    inner: Cache<String, StoredValue>,
    hub: BroadcastHub,
    connected: AtomicBool,
}

impl MemoryStateChannel {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
            hub: BroadcastHub::new(256),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), StateError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StateError::Closed)
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl StateChannel for MemoryStateChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), StateError> {
        self.connected.store(true, Ordering::Release);
        debug!("Memory state channel connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), StateError> {
        self.connected.store(false, Ordering::Release);
        self.hub.close_all();
        debug!("Memory state channel closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        self.ensure_connected()?;
        Ok(self.inner.get(key.as_str()).await.map(|v| v.json))
    }

    async fn set(
        &self,
        key: &StateKey,
        value_json: String,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        self.ensure_connected()?;
        self.inner
            .insert(
                key.as_str().to_string(),
                StoredValue {
                    json: value_json,
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        self.ensure_connected()?;
        Ok(self.inner.remove(key.as_str()).await.is_some())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize, StateError> {
        self.ensure_connected()?;
        self.hub.publish(channel, message)
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StateError> {
        self.ensure_connected()?;
        self.hub.subscribe(channel)
    }
}
