//! Test doubles for stores, executors, price sources and task handlers.
//!
//! These live in the library (not behind `cfg(test)`) so integration suites
//! and downstream crates can drive the agents without real infrastructure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use uuid::Uuid;
use vigil_models::{
    AgentTask, PositionSide, RecentSignal, RiskAction, SignalAction, SignalParams, StateKey,
};
use vigil_store::{MemoryStateChannel, StateChannel, StateError};

use crate::error::AgentError;
use crate::handler::TaskHandler;
use crate::regime_feed::{PriceBar, PriceSource};
use crate::risk::{ActionOutcome, OrderExecutor};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory channel whose reads or writes stall.
pub struct SlowStateChannel {
    inner: MemoryStateChannel,
    read_delay: Duration,
    write_delay: Duration,
}

impl SlowStateChannel {
    /// Reads stall for `delay`; writes are immediate.
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStateChannel::new(1_000),
            read_delay: delay,
            write_delay: Duration::ZERO,
        }
    }

    /// Writes and publishes stall for `delay`; reads are immediate.
    pub fn stalling_writes(delay: Duration) -> Self {
        Self {
            inner: MemoryStateChannel::new(1_000),
            read_delay: Duration::ZERO,
            write_delay: delay,
        }
    }

    /// The underlying store, for checking what eventually landed.
    pub fn inner(&self) -> &MemoryStateChannel {
        &self.inner
    }
}

#[async_trait]
impl StateChannel for SlowStateChannel {
    fn name(&self) -> &str {
        "slow"
    }

    async fn connect(&self) -> Result<(), StateError> {
        self.inner.connect().await
    }

    async fn close(&self) -> Result<(), StateError> {
        self.inner.close().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &StateKey,
        value_json: String,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.set(key, value_json, ttl).await
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        self.inner.delete(key).await
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize, StateError> {
        tokio::time::sleep(self.write_delay).await;
        self.inner.publish(channel, message).await
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, StateError> {
        self.inner.subscribe(channel).await
    }
}

/// A channel that is always down.
pub struct FailingStateChannel;

impl FailingStateChannel {
    fn down() -> StateError {
        StateError::Unavailable("store offline".to_string())
    }
}

#[async_trait]
impl StateChannel for FailingStateChannel {
    fn name(&self) -> &str {
        "failing"
    }

    async fn connect(&self) -> Result<(), StateError> {
        Err(Self::down())
    }

    async fn close(&self) -> Result<(), StateError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }

    async fn get(&self, _key: &StateKey) -> Result<Option<String>, StateError> {
        Err(Self::down())
    }

    async fn set(
        &self,
        _key: &StateKey,
        _value_json: String,
        _ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        Err(Self::down())
    }

    async fn delete(&self, _key: &StateKey) -> Result<bool, StateError> {
        Err(Self::down())
    }

    async fn publish(&self, _channel: &str, _message: String) -> Result<usize, StateError> {
        Err(Self::down())
    }

    async fn subscribe(&self, _channel: &str) -> Result<broadcast::Receiver<String>, StateError> {
        Err(Self::down())
    }
}

/// One call observed by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedAction {
    pub action: RiskAction,
    pub target: String,
    pub idempotency_key: Uuid,
}

/// Succeeds and remembers every call.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ExecutedAction>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ExecutedAction> {
        lock(&self.calls).clone()
    }

    fn push(&self, action: RiskAction, target: &str, key: Uuid) -> ActionOutcome {
        lock(&self.calls).push(ExecutedAction {
            action,
            target: target.to_string(),
            idempotency_key: key,
        });
        ActionOutcome::ok(format!("{action} {target}"))
    }
}

#[async_trait]
impl OrderExecutor for RecordingExecutor {
    async fn close_position(&self, symbol: &str, idempotency_key: Uuid) -> ActionOutcome {
        self.push(RiskAction::ClosePosition, symbol, idempotency_key)
    }

    async fn reduce_position(
        &self,
        symbol: &str,
        _fraction: Decimal,
        idempotency_key: Uuid,
    ) -> ActionOutcome {
        self.push(RiskAction::ReducePosition, symbol, idempotency_key)
    }

    async fn stop_trading(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome {
        self.push(RiskAction::StopTrading, reason, idempotency_key)
    }

    async fn emergency_shutdown(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome {
        self.push(RiskAction::EmergencyShutdown, reason, idempotency_key)
    }
}

/// A [`RecordingExecutor`] that takes `delay` to answer each call.
pub struct SlowExecutor {
    inner: RecordingExecutor,
    delay: Duration,
}

impl SlowExecutor {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: RecordingExecutor::new(),
            delay,
        }
    }

    /// Calls that were answered.
    pub fn calls(&self) -> Vec<ExecutedAction> {
        self.inner.calls()
    }
}

#[async_trait]
impl OrderExecutor for SlowExecutor {
    async fn close_position(&self, symbol: &str, idempotency_key: Uuid) -> ActionOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner.close_position(symbol, idempotency_key).await
    }

    async fn reduce_position(
        &self,
        symbol: &str,
        fraction: Decimal,
        idempotency_key: Uuid,
    ) -> ActionOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner
            .reduce_position(symbol, fraction, idempotency_key)
            .await
    }

    async fn stop_trading(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner.stop_trading(reason, idempotency_key).await
    }

    async fn emergency_shutdown(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome {
        tokio::time::sleep(self.delay).await;
        self.inner.emergency_shutdown(reason, idempotency_key).await
    }
}

/// Rejects every action with the same error.
pub struct FailingExecutor {
    pub error: String,
}

impl FailingExecutor {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

#[async_trait]
impl OrderExecutor for FailingExecutor {
    async fn close_position(&self, _symbol: &str, _idempotency_key: Uuid) -> ActionOutcome {
        ActionOutcome::failed(self.error.clone())
    }

    async fn reduce_position(
        &self,
        _symbol: &str,
        _fraction: Decimal,
        _idempotency_key: Uuid,
    ) -> ActionOutcome {
        ActionOutcome::failed(self.error.clone())
    }

    async fn stop_trading(&self, _reason: &str, _idempotency_key: Uuid) -> ActionOutcome {
        ActionOutcome::failed(self.error.clone())
    }

    async fn emergency_shutdown(&self, _reason: &str, _idempotency_key: Uuid) -> ActionOutcome {
        ActionOutcome::failed(self.error.clone())
    }
}

/// Serves fixed bars per symbol; unknown symbols error.
#[derive(Default)]
pub struct FixedPriceSource {
    bars: HashMap<String, Vec<PriceBar>>,
}

impl FixedPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<PriceBar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn recent_bars(&self, symbol: &str) -> Result<Vec<PriceBar>, AgentError> {
        self.bars
            .get(symbol)
            .cloned()
            .ok_or_else(|| AgentError::Source(format!("no bars for {symbol}")))
    }
}

/// A handler whose behaviour is chosen by `task_type`:
///
/// - `echo`: returns the parameters
/// - `sleep`: sleeps `parameters.ms` milliseconds, then returns them
/// - `fail`: returns `TaskFailed`
/// - `panic`: panics
/// - `fatal`: returns `Unrecoverable`
///
/// Tracks how many calls overlap.
#[derive(Default)]
pub struct ScriptedHandler {
    active: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest number of overlapping `handle` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// `parameters.label` (or the task type) of every task started, in order.
    pub fn seen(&self) -> Vec<String> {
        lock(&self.seen).clone()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn handle(&self, task: &AgentTask) -> Result<serde_json::Value, AgentError> {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        let _guard = ActiveGuard(&self.active);
        self.peak.fetch_max(now, Ordering::AcqRel);

        let label = task
            .parameters
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or(task.task_type.as_str())
            .to_string();
        lock(&self.seen).push(label);

        match task.task_type.as_str() {
            "echo" => Ok(task.parameters.clone()),
            "sleep" => {
                let ms = task
                    .parameters
                    .get("ms")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(10);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(task.parameters.clone())
            }
            "fail" => Err(AgentError::TaskFailed("scripted failure".to_string())),
            "panic" => panic!("scripted panic"),
            "fatal" => Err(AgentError::Unrecoverable("scripted fatal".to_string())),
            other => Err(AgentError::UnknownTaskType(other.to_string())),
        }
    }
}

/// Builder for `SignalParams` that starts from a signal every rule passes
/// against a trending-up regime.
pub struct SignalBuilder {
    params: SignalParams,
}

impl SignalBuilder {
    pub fn new(symbol: &str) -> Self {
        Self {
            params: SignalParams {
                signal_id: Uuid::new_v4().to_string(),
                symbol: symbol.to_string(),
                action: SignalAction::Buy,
                confidence: dec!(0.85),
                current_price: dec!(100),
                price_change_5m_percent: dec!(0.3),
                current_position: PositionSide::None,
                recent_signals: vec![],
                order_size: dec!(100),
                available_balance: dec!(1000),
                support_level: None,
                resistance_level: None,
                recent_trade_count: 1,
                current_drawdown_percent: dec!(1),
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.params.signal_id = id.to_string();
        self
    }

    pub fn action(mut self, action: SignalAction) -> Self {
        self.params.action = action;
        self
    }

    pub fn confidence(mut self, confidence: Decimal) -> Self {
        self.params.confidence = confidence;
        self
    }

    pub fn price(mut self, price: Decimal) -> Self {
        self.params.current_price = price;
        self
    }

    pub fn price_change_5m(mut self, percent: Decimal) -> Self {
        self.params.price_change_5m_percent = percent;
        self
    }

    pub fn position(mut self, side: PositionSide) -> Self {
        self.params.current_position = side;
        self
    }

    /// Prepend `count` prior signals with `action`, most recent first.
    pub fn recent(mut self, action: SignalAction, count: usize) -> Self {
        let prior = (0..count).map(|_| RecentSignal {
            action,
            confidence: None,
        });
        let existing = std::mem::take(&mut self.params.recent_signals);
        self.params.recent_signals = prior.chain(existing).collect();
        self
    }

    pub fn order_size(mut self, size: Decimal) -> Self {
        self.params.order_size = size;
        self
    }

    pub fn balance(mut self, balance: Decimal) -> Self {
        self.params.available_balance = balance;
        self
    }

    pub fn levels(mut self, support: Option<Decimal>, resistance: Option<Decimal>) -> Self {
        self.params.support_level = support;
        self.params.resistance_level = resistance;
        self
    }

    pub fn recent_trades(mut self, count: u32) -> Self {
        self.params.recent_trade_count = count;
        self
    }

    pub fn drawdown(mut self, percent: Decimal) -> Self {
        self.params.current_drawdown_percent = percent;
        self
    }

    pub fn build(self) -> SignalParams {
        self.params
    }
}

/// A connected in-memory channel.
pub async fn memory_store() -> Arc<MemoryStateChannel> {
    let store = Arc::new(MemoryStateChannel::new(1_000));
    // Connecting the memory backend cannot fail
    let _ = store.connect().await;
    store
}
