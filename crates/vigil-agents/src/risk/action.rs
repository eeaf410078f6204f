use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use vigil_models::{ActionExecution, ExecutionStatus, RiskAction, RiskAlert};

use crate::error::ActionExecutionError;

/// What an executor reports back for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub detail: Option<String>,
}

impl ActionOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            detail: None,
        }
    }
}

/// The order-management side of protective actions. Mockable for testing.
///
/// `idempotency_key` is the id of the alert that triggered the action.
/// Implementations must treat a repeated key as the same request.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn close_position(&self, symbol: &str, idempotency_key: Uuid) -> ActionOutcome;

    async fn reduce_position(
        &self,
        symbol: &str,
        fraction: Decimal,
        idempotency_key: Uuid,
    ) -> ActionOutcome;

    async fn stop_trading(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome;

    async fn emergency_shutdown(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome;
}

/// Dry-run executor: logs every action and reports success.
pub struct LoggingExecutor;

#[async_trait]
impl OrderExecutor for LoggingExecutor {
    async fn close_position(&self, symbol: &str, idempotency_key: Uuid) -> ActionOutcome {
        info!(%symbol, key = %idempotency_key, "[dry-run] close position");
        ActionOutcome::ok(format!("dry-run close {symbol}"))
    }

    async fn reduce_position(
        &self,
        symbol: &str,
        fraction: Decimal,
        idempotency_key: Uuid,
    ) -> ActionOutcome {
        info!(%symbol, %fraction, key = %idempotency_key, "[dry-run] reduce position");
        ActionOutcome::ok(format!("dry-run reduce {symbol} by {fraction}"))
    }

    async fn stop_trading(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome {
        info!(%reason, key = %idempotency_key, "[dry-run] stop trading");
        ActionOutcome::ok("dry-run stop trading")
    }

    async fn emergency_shutdown(&self, reason: &str, idempotency_key: Uuid) -> ActionOutcome {
        info!(%reason, key = %idempotency_key, "[dry-run] emergency shutdown");
        ActionOutcome::ok("dry-run emergency shutdown")
    }
}

/// Maps a [`RiskAction`] onto the matching executor call.
pub struct ActionDispatcher {
    executor: Arc<dyn OrderExecutor>,
    reduce_fraction: Decimal,
}

impl ActionDispatcher {
    pub fn new(executor: Arc<dyn OrderExecutor>, reduce_fraction: Decimal) -> Self {
        Self {
            executor,
            reduce_fraction,
        }
    }

    /// Execute the alert's recommended action. `None` when the action has
    /// nothing to execute (`None` or `Warning`).
    pub async fn dispatch(&self, alert: &RiskAlert) -> Option<ActionExecution> {
        let action = alert.recommended_action;
        let key = alert.id;

        let outcome = match action {
            RiskAction::None | RiskAction::Warning => return None,
            RiskAction::ClosePosition | RiskAction::ReducePosition => match &alert.symbol {
                None => ActionOutcome::failed(format!("{action} needs a symbol")),
                Some(symbol) if action == RiskAction::ClosePosition => {
                    self.executor.close_position(symbol, key).await
                }
                Some(symbol) => {
                    self.executor
                        .reduce_position(symbol, self.reduce_fraction, key)
                        .await
                }
            },
            RiskAction::StopTrading => self.executor.stop_trading(&alert.message, key).await,
            RiskAction::EmergencyShutdown => {
                self.executor.emergency_shutdown(&alert.message, key).await
            }
        };

        if !outcome.success {
            warn!(alert_id = %key, %action, error = ?outcome.error, "Executor reported failure");
        }

        Some(ActionExecution {
            action,
            status: if outcome.success {
                ExecutionStatus::Succeeded
            } else {
                ExecutionStatus::Failed
            },
            detail: outcome.detail,
            error: outcome.error,
            executed_at: Utc::now(),
        })
    }
}

/// The error to surface for an alert whose action failed, if any.
pub fn execution_error(alert: &RiskAlert) -> Option<ActionExecutionError> {
    let execution = alert.execution.as_ref()?;
    if execution.status != ExecutionStatus::Failed {
        return None;
    }
    Some(ActionExecutionError {
        alert_id: alert.id,
        action: execution.action,
        message: execution
            .error
            .clone()
            .unwrap_or_else(|| "executor reported failure".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use vigil_models::{RiskAlertType, RiskLevel};

    fn alert(action: RiskAction, symbol: Option<&str>) -> RiskAlert {
        RiskAlert::new(
            RiskAlertType::PositionLoss,
            RiskLevel::High,
            symbol.map(str::to_string),
            "test".to_string(),
            dec!(-6),
            dec!(-5),
            action,
            true,
        )
    }

    #[tokio::test]
    async fn dry_run_succeeds() {
        let dispatcher = ActionDispatcher::new(Arc::new(LoggingExecutor), dec!(0.5));
        let execution = dispatcher
            .dispatch(&alert(RiskAction::ClosePosition, Some("BTCUSDT")))
            .await
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.action, RiskAction::ClosePosition);
    }

    #[tokio::test]
    async fn warnings_are_not_dispatched() {
        let dispatcher = ActionDispatcher::new(Arc::new(LoggingExecutor), dec!(0.5));
        assert!(dispatcher
            .dispatch(&alert(RiskAction::Warning, Some("BTCUSDT")))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn position_action_without_symbol_fails() {
        let dispatcher = ActionDispatcher::new(Arc::new(LoggingExecutor), dec!(0.5));
        let mut alert = alert(RiskAction::ReducePosition, None);
        alert.execution = dispatcher.dispatch(&alert).await;
        assert!(alert.execution_failed());

        let error = execution_error(&alert).unwrap();
        assert_eq!(error.alert_id, alert.id);
        assert_eq!(error.action, RiskAction::ReducePosition);
    }
}
