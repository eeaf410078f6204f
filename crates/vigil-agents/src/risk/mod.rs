pub mod action;
pub mod checks;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;
use vigil_models::{keys, AccountRisk, AgentTask, PositionRisk, RiskAlert, RiskConfig, RiskLevel};
use vigil_store::{publish_typed, AuditSink, NullAudit, StateChannel};

use crate::error::{ActionExecutionError, AgentError};
use crate::handler::{parse_parameters, TaskHandler};

pub use action::{
    execution_error, ActionDispatcher, ActionOutcome, LoggingExecutor, OrderExecutor,
};

pub const MONITOR_POSITION: &str = "monitor_position";
pub const CHECK_DAILY_LOSS: &str = "check_daily_loss";
pub const CHECK_DRAWDOWN: &str = "check_drawdown";
pub const CHECK_ACCOUNT: &str = "check_account";

const AGENT_NAME: &str = "risk_monitor";

/// Alerts raised by one check plus any protective action that failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    pub alerts: Vec<RiskAlert>,
    pub action_errors: Vec<ActionExecutionError>,
}

impl RiskReport {
    pub fn from_alerts(alerts: Vec<RiskAlert>) -> Self {
        let action_errors = alerts.iter().filter_map(execution_error).collect();
        Self {
            alerts,
            action_errors,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Watches positions and account limits and raises alerts.
///
/// Alerts accumulate until an operator clears them. When auto-execution is
/// enabled and an executor is attached, each alert's recommended action is
/// dispatched once the alert has been retained and published.
pub struct RiskMonitor {
    config: RiskConfig,
    alerts: Mutex<Vec<RiskAlert>>,
    dispatcher: Option<ActionDispatcher>,
    store: Option<Arc<dyn StateChannel>>,
    audit: Arc<dyn AuditSink>,
    /// Alert ids raised by each runtime task still in progress.
    raising: Mutex<HashMap<Uuid, Vec<Uuid>>>,
}

impl RiskMonitor {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            alerts: Mutex::new(Vec::new()),
            dispatcher: None,
            store: None,
            audit: Arc::new(NullAudit),
            raising: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn OrderExecutor>) -> Self {
        self.dispatcher = Some(ActionDispatcher::new(executor, self.config.reduce_fraction));
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateChannel>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn alert_list(&self) -> MutexGuard<'_, Vec<RiskAlert>> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Position loss and liquidation checks for one open position.
    pub async fn monitor_position(&self, position: &PositionRisk) -> Vec<RiskAlert> {
        let found = self.position_findings(position);
        self.raise_all(found).await
    }

    pub async fn check_daily_loss(&self, account: &AccountRisk) -> Option<RiskAlert> {
        let alert = checks::daily_loss(&self.config, account)?;
        self.raise_all(vec![alert]).await.pop()
    }

    pub async fn check_drawdown(&self, account: &AccountRisk) -> Option<RiskAlert> {
        let alert = checks::drawdown(&self.config, account)?;
        self.raise_all(vec![alert]).await.pop()
    }

    /// Daily loss and drawdown together.
    pub async fn check_account(&self, account: &AccountRisk) -> Vec<RiskAlert> {
        let found = self.account_findings(account);
        self.raise_all(found).await
    }

    fn position_findings(&self, position: &PositionRisk) -> Vec<RiskAlert> {
        if !checks::is_open(position) {
            return Vec::new();
        }
        [
            checks::position_loss(&self.config, position),
            checks::liquidation(&self.config, position),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    fn account_findings(&self, account: &AccountRisk) -> Vec<RiskAlert> {
        [
            checks::daily_loss(&self.config, account),
            checks::drawdown(&self.config, account),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Alerts a runtime task's parameters trigger. Pure; nothing is retained.
    fn task_findings(&self, task: &AgentTask) -> Result<Vec<RiskAlert>, AgentError> {
        let found = match task.task_type.as_str() {
            MONITOR_POSITION => {
                let position: PositionRisk = parse_parameters(task)?;
                self.position_findings(&position)
            }
            CHECK_DAILY_LOSS => {
                let account: AccountRisk = parse_parameters(task)?;
                checks::daily_loss(&self.config, &account).into_iter().collect()
            }
            CHECK_DRAWDOWN => {
                let account: AccountRisk = parse_parameters(task)?;
                checks::drawdown(&self.config, &account).into_iter().collect()
            }
            CHECK_ACCOUNT => {
                let account: AccountRisk = parse_parameters(task)?;
                self.account_findings(&account)
            }
            other => return Err(AgentError::UnknownTaskType(other.to_string())),
        };
        Ok(found)
    }

    async fn raise_all(&self, found: Vec<RiskAlert>) -> Vec<RiskAlert> {
        self.retain(&found);
        self.follow_up(found).await
    }

    /// Log, keep and audit new alerts. Nothing here awaits, so an alert is
    /// visible to operators before any executor call can stall.
    fn retain(&self, alerts: &[RiskAlert]) {
        for alert in alerts {
            match alert.level {
                RiskLevel::Critical => error!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    symbol = ?alert.symbol,
                    action = %alert.recommended_action,
                    "{}", alert.message
                ),
                _ => warn!(
                    alert_id = %alert.id,
                    alert_type = %alert.alert_type,
                    symbol = ?alert.symbol,
                    action = %alert.recommended_action,
                    "{}", alert.message
                ),
            }
            self.alert_list().push(alert.clone());
            self.record("alert", alert);
        }
    }

    /// Announce retained alerts, then run the authorized actions.
    async fn follow_up(&self, alerts: Vec<RiskAlert>) -> Vec<RiskAlert> {
        for alert in &alerts {
            self.publish(alert).await;
        }
        let mut raised = Vec::with_capacity(alerts.len());
        for mut alert in alerts {
            if alert.auto_execute {
                self.execute(&mut alert).await;
            }
            raised.push(alert);
        }
        raised
    }

    /// Dispatch the alert's action and write the outcome back onto the
    /// retained copy. The updated alert is audited and announced again.
    async fn execute(&self, alert: &mut RiskAlert) {
        let Some(dispatcher) = &self.dispatcher else {
            warn!(alert_id = %alert.id, "Auto-execution enabled but no executor attached");
            return;
        };
        alert.execution = dispatcher.dispatch(alert).await;

        if let Some(e) = execution_error(alert) {
            error!(alert_id = %e.alert_id, action = %e.action, error = %e.message, "Protective action failed");
        } else if let Some(execution) = &alert.execution {
            info!(alert_id = %alert.id, action = %execution.action, "Protective action executed");
        }

        if let Some(stored) = self.alert_list().iter_mut().find(|a| a.id == alert.id) {
            stored.execution = alert.execution.clone();
        }
        self.record("action", alert);
        self.publish(alert).await;
    }

    async fn publish(&self, alert: &RiskAlert) {
        if let Some(store) = &self.store {
            if let Err(e) = publish_typed(store.as_ref(), keys::channel::RISK_ALERTS, alert).await {
                warn!(alert_id = %alert.id, error = %e, "Failed to publish risk alert");
            }
        }
    }

    fn record(&self, kind: &str, alert: &RiskAlert) {
        let payload = match serde_json::to_value(alert) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Failed to encode alert for audit");
                return;
            }
        };
        if let Err(e) = self.audit.record_event(AGENT_NAME, kind, &payload) {
            warn!(alert_id = %alert.id, error = %e, "Failed to record risk event");
        }
    }

    /// Run a retained alert's recommended action on operator request. The
    /// alert id is reused as the idempotency key.
    pub async fn execute_alert(&self, id: Uuid) -> Result<RiskAlert, AgentError> {
        let mut alert = self
            .alert_list()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| AgentError::InvalidParameters(format!("no alert with id {id}")))?;

        self.execute(&mut alert).await;

        match execution_error(&alert) {
            Some(e) => Err(e.into()),
            None => Ok(alert),
        }
    }

    /// Snapshot of all retained alerts, oldest first.
    pub fn alerts(&self) -> Vec<RiskAlert> {
        self.alert_list().clone()
    }

    pub fn clear_alerts(&self) -> usize {
        let mut alerts = self.alert_list();
        let count = alerts.len();
        alerts.clear();
        info!(count, "Risk alerts cleared");
        count
    }

    pub fn clear_alert(&self, id: Uuid) -> bool {
        let mut alerts = self.alert_list();
        let before = alerts.len();
        alerts.retain(|a| a.id != id);
        before != alerts.len()
    }

    fn raising(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Uuid>>> {
        self.raising.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskHandler for RiskMonitor {
    fn name(&self) -> &str {
        AGENT_NAME
    }

    async fn handle(&self, task: &AgentTask) -> Result<serde_json::Value, AgentError> {
        let found = self.task_findings(task)?;
        {
            let mut raising = self.raising();
            self.retain(&found);
            raising.insert(task.id, found.iter().map(|a| a.id).collect());
        }
        let alerts = self.follow_up(found).await;
        self.raising().remove(&task.id);
        Ok(serde_json::to_value(RiskReport::from_alerts(alerts))?)
    }

    /// Report whatever the task raised before its deadline, with actions
    /// still pending. If the handler never got as far as raising, the
    /// checks are rerun here so the alerts are retained regardless.
    fn on_timeout(&self, task: &AgentTask) -> Option<serde_json::Value> {
        let mut raising = self.raising();
        let alerts: Vec<RiskAlert> = match raising.remove(&task.id) {
            Some(ids) => self
                .alert_list()
                .iter()
                .filter(|a| ids.contains(&a.id))
                .cloned()
                .collect(),
            None => {
                let found = self.task_findings(task).ok()?;
                self.retain(&found);
                found
            }
        };
        drop(raising);
        warn!(task_id = %task.id, alerts = alerts.len(), "Risk check timed out; reporting retained alerts");
        serde_json::to_value(RiskReport::from_alerts(alerts)).ok()
    }
}
