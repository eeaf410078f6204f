//! Vigil - decision-safety control plane for automated trading.
//!
//! Every trade signal is validated against a rule catalogue before an order
//! may be placed, and open positions and account limits are watched by a
//! risk monitor that can trigger protective actions. Both agents run under
//! an `AgentRuntime` and share market context through a `StateChannel`.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use vigil::models::{SignalParams, SignalValidation, VigilConfig};
//! use vigil::agents::{SignalValidator, RiskMonitor, AgentRuntime};
//! use vigil::store::{MemoryStateChannel, SqliteStateChannel, StateChannel};
//! ```

pub use vigil_agents as agents;
pub use vigil_models as models;
pub use vigil_store as store;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use vigil_agents::risk::{CHECK_ACCOUNT, MONITOR_POSITION};
use vigil_agents::validator::VALIDATE_SIGNAL;
use vigil_agents::{
    AgentError, AgentRuntime, OrderExecutor, PriceSource, RegimeFeed, RiskMonitor,
    SignalValidator,
};
use vigil_models::{
    AccountRisk, AgentTask, PositionRisk, SignalParams, StoreBackend, StoreConfig, TaskPriority,
    VigilConfig,
};
use vigil_store::{
    AuditSink, MemoryStateChannel, NullAudit, SqliteAuditLog, SqliteStateChannel, StateChannel,
};

/// Read a TOML config, or fall back to defaults when the file does not exist.
pub fn load_config(path: &str) -> Result<VigilConfig, anyhow::Error> {
    if !Path::new(path).exists() {
        tracing::info!(path, "Config file not found, using defaults");
        return Ok(VigilConfig::default());
    }
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&config_str).with_context(|| format!("Failed to parse config: {path}"))
}

/// Settings that parse but make no sense together.
pub fn config_problems(config: &VigilConfig) -> Vec<String> {
    let mut problems = Vec::new();
    let v = &config.validator;

    if v.warning_threshold > v.approve_threshold {
        problems.push(format!(
            "validator.warning_threshold {} is above approve_threshold {}",
            v.warning_threshold, v.approve_threshold
        ));
    }
    if v.min_confidence > v.full_size_confidence {
        problems.push(format!(
            "validator.min_confidence {} is above full_size_confidence {}",
            v.min_confidence, v.full_size_confidence
        ));
    }
    for (name, value) in [
        ("validator.reduced_size_factor", v.reduced_size_factor),
        ("validator.max_balance_fraction", v.max_balance_fraction),
        ("risk.reduce_fraction", config.risk.reduce_fraction),
    ] {
        if value <= Decimal::ZERO || value > Decimal::ONE {
            problems.push(format!("{name} {value} must be in (0, 1]"));
        }
    }
    for (rule, weight) in &v.rule_weights {
        if *weight < Decimal::ZERO {
            problems.push(format!("validator.rule_weights.{rule} {weight} is negative"));
        }
    }
    if v.evaluation_timeout_ms == 0 {
        problems.push("validator.evaluation_timeout_ms must be positive".to_string());
    }
    if config.runtime.default_task_timeout_ms <= v.evaluation_timeout_ms {
        problems.push(format!(
            "runtime.default_task_timeout_ms {} should exceed validator.evaluation_timeout_ms {}",
            config.runtime.default_task_timeout_ms, v.evaluation_timeout_ms
        ));
    }
    if config.feed.enabled && config.feed.symbols.is_empty() {
        problems.push("feed.enabled with no feed.symbols".to_string());
    }
    problems
}

/// Build and connect the configured state channel.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn StateChannel>, anyhow::Error> {
    let store: Arc<dyn StateChannel> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStateChannel::new(config.memory_max_capacity)),
        StoreBackend::Sqlite => Arc::new(SqliteStateChannel::file(
            &config.sqlite_path,
            config.memory_max_capacity,
            Duration::from_secs(config.memory_ttl_seconds),
        )),
    };
    store
        .connect()
        .await
        .with_context(|| format!("Failed to connect {} state channel", store.name()))?;
    Ok(store)
}

pub fn build_audit(config: &StoreConfig) -> Result<Arc<dyn AuditSink>, anyhow::Error> {
    match &config.audit_path {
        Some(path) => {
            let log = SqliteAuditLog::open(path)
                .with_context(|| format!("Failed to open audit log: {path}"))?;
            Ok(Arc::new(log))
        }
        None => Ok(Arc::new(NullAudit)),
    }
}

/// The validator and risk monitor, each under its own runtime.
///
/// Every agent (and the regime feed) holds a clone of one reference-counted
/// state channel handle, so a regime written by the feed is what the
/// validator reads and a subscriber sees every agent's messages. The
/// connection is opened once when the store is built and closed once in
/// [`Vigil::shutdown`], after every agent using it has stopped.
pub struct Vigil {
    config: VigilConfig,
    store: Arc<dyn StateChannel>,
    validator: Arc<SignalValidator>,
    monitor: Arc<RiskMonitor>,
    validator_runtime: AgentRuntime,
    risk_runtime: AgentRuntime,
    feed: Mutex<Option<(Arc<RegimeFeed>, JoinHandle<()>)>>,
}

impl Vigil {
    pub fn new(
        config: VigilConfig,
        store: Arc<dyn StateChannel>,
        audit: Arc<dyn AuditSink>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Self {
        let validator = Arc::new(SignalValidator::new(config.validator.clone(), store.clone()));
        let monitor = Arc::new(
            RiskMonitor::new(config.risk.clone())
                .with_executor(executor)
                .with_store(store.clone())
                .with_audit(audit.clone()),
        );
        let depth = config.runtime.max_queue_depth;
        let validator_runtime = AgentRuntime::with_audit(validator.clone(), depth, audit.clone());
        let risk_runtime = AgentRuntime::with_audit(monitor.clone(), depth, audit);

        Self {
            config,
            store,
            validator,
            monitor,
            validator_runtime,
            risk_runtime,
            feed: Mutex::new(None),
        }
    }

    /// Build from configuration: store and audit log as configured.
    pub async fn from_config(
        config: VigilConfig,
        executor: Arc<dyn OrderExecutor>,
    ) -> Result<Self, anyhow::Error> {
        let store = build_store(&config.store).await?;
        let audit = build_audit(&config.store)?;
        Ok(Self::new(config, store, audit, executor))
    }

    pub fn start(&self) -> Result<(), AgentError> {
        self.validator_runtime.start()?;
        self.risk_runtime.start()?;
        Ok(())
    }

    fn feed_slot(&self) -> MutexGuard<'_, Option<(Arc<RegimeFeed>, JoinHandle<()>)>> {
        self.feed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the regime feed over `source` in the background. Does nothing
    /// unless `feed.enabled` is set; a second call replaces the running feed.
    pub fn spawn_feed(&self, source: Arc<dyn PriceSource>) -> bool {
        if !self.config.feed.enabled {
            tracing::info!("Regime feed disabled");
            return false;
        }
        let feed = Arc::new(RegimeFeed::new(
            self.config.feed.clone(),
            source,
            self.store.clone(),
        ));
        let handle = tokio::spawn({
            let feed = feed.clone();
            async move { feed.run().await }
        });
        if let Some((previous, _)) = self.feed_slot().replace((feed, handle)) {
            previous.cancel_token().cancel();
        }
        true
    }

    pub async fn shutdown(&self) {
        let feed = self.feed_slot().take();
        if let Some((feed, handle)) = feed {
            feed.cancel_token().cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Regime feed task ended abnormally");
            }
        }
        for runtime in [&self.validator_runtime, &self.risk_runtime] {
            if let Err(e) = runtime.stop().await {
                tracing::warn!(agent = runtime.name(), error = %e, "Stop failed");
            }
        }
        // Last user gone; release the shared connection
        if let Err(e) = self.store.close().await {
            tracing::warn!(error = %e, "Failed to close state channel");
        }
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateChannel> {
        &self.store
    }

    pub fn validator(&self) -> &SignalValidator {
        &self.validator
    }

    pub fn monitor(&self) -> &RiskMonitor {
        &self.monitor
    }

    pub fn validator_runtime(&self) -> &AgentRuntime {
        &self.validator_runtime
    }

    pub fn risk_runtime(&self) -> &AgentRuntime {
        &self.risk_runtime
    }

    fn task(&self, task_type: &str, parameters: serde_json::Value) -> AgentTask {
        AgentTask::new(task_type, parameters)
            .with_timeout(Duration::from_millis(self.config.runtime.default_task_timeout_ms))
    }

    /// Queue a signal for validation and wait for the terminal task.
    pub async fn validate(&self, params: &SignalParams) -> Result<AgentTask, AgentError> {
        let task = self
            .task(VALIDATE_SIGNAL, serde_json::to_value(params)?)
            .with_priority(TaskPriority::High);
        self.validator_runtime.execute(task).await
    }

    pub async fn monitor_position(&self, position: &PositionRisk) -> Result<AgentTask, AgentError> {
        let task = self
            .task(MONITOR_POSITION, serde_json::to_value(position)?)
            .with_priority(TaskPriority::Critical);
        self.risk_runtime.execute(task).await
    }

    pub async fn check_account(&self, account: &AccountRisk) -> Result<AgentTask, AgentError> {
        let task = self
            .task(CHECK_ACCOUNT, serde_json::to_value(account)?)
            .with_priority(TaskPriority::Critical);
        self.risk_runtime.execute(task).await
    }
}
