use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;
use vigil_models::{RegimeSnapshot, RiskAlert, SignalValidation, StateKey, REGIME_SCHEMA_VERSION};

use crate::channel::StateChannel;
use crate::error::StateError;

/// A payload type that may cross the store boundary.
pub trait StatePayload: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;
    const SCHEMA_VERSION: u32;
}

impl StatePayload for RegimeSnapshot {
    const KIND: &'static str = "regime_snapshot";
    const SCHEMA_VERSION: u32 = REGIME_SCHEMA_VERSION;
}

impl StatePayload for SignalValidation {
    const KIND: &'static str = "signal_validation";
    const SCHEMA_VERSION: u32 = 1;
}

impl StatePayload for RiskAlert {
    const KIND: &'static str = "risk_alert";
    const SCHEMA_VERSION: u32 = 1;
}

/// Wire form of every typed value and message in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub kind: String,
    pub schema_version: u32,
    pub written_at: DateTime<Utc>,
    pub payload: T,
}

impl<T: StatePayload> Envelope<T> {
    pub fn wrap(payload: T) -> Self {
        Self {
            kind: T::KIND.to_string(),
            schema_version: T::SCHEMA_VERSION,
            written_at: Utc::now(),
            payload,
        }
    }

    pub fn encode(payload: &T) -> Result<String, StateError> {
        let envelope = Envelope {
            kind: T::KIND.to_string(),
            schema_version: T::SCHEMA_VERSION,
            written_at: Utc::now(),
            payload,
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Parse and validate kind and version before touching the payload.
    pub fn decode(json: &str) -> Result<Self, StateError> {
        let raw: Envelope<serde_json::Value> = serde_json::from_str(json)?;
        if raw.kind != T::KIND {
            return Err(StateError::Kind {
                expected: T::KIND.to_string(),
                found: raw.kind,
            });
        }
        if raw.schema_version != T::SCHEMA_VERSION {
            return Err(StateError::Schema {
                kind: raw.kind,
                expected: T::SCHEMA_VERSION,
                found: raw.schema_version,
            });
        }
        Ok(Envelope {
            kind: raw.kind,
            schema_version: raw.schema_version,
            written_at: raw.written_at,
            payload: serde_json::from_value(raw.payload)?,
        })
    }
}

pub async fn get_typed<T: StatePayload>(
    store: &dyn StateChannel,
    key: &StateKey,
) -> Result<Option<T>, StateError> {
    match store.get(key).await? {
        Some(json) => Ok(Some(Envelope::<T>::decode(&json)?.payload)),
        None => Ok(None),
    }
}

pub async fn set_typed<T: StatePayload>(
    store: &dyn StateChannel,
    key: &StateKey,
    payload: &T,
    ttl: Option<Duration>,
) -> Result<(), StateError> {
    store.set(key, Envelope::encode(payload)?, ttl).await
}

pub async fn publish_typed<T: StatePayload>(
    store: &dyn StateChannel,
    channel: &str,
    payload: &T,
) -> Result<usize, StateError> {
    store.publish(channel, Envelope::encode(payload)?).await
}

/// Read a typed value, substituting `fallback()` on a miss or on any error.
/// Errors are logged, never returned.
pub async fn get_or_else<T, F>(store: &dyn StateChannel, key: &StateKey, fallback: F) -> T
where
    T: StatePayload,
    F: FnOnce() -> T,
{
    match get_typed::<T>(store, key).await {
        Ok(Some(value)) => value,
        Ok(None) => fallback(),
        Err(e) => {
            warn!(key = %key, store = store.name(), error = %e, "State read failed, using fallback");
            fallback()
        }
    }
}
