use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::PositionSide;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Protective action, ordered from least to most drastic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    None,
    Warning,
    ReducePosition,
    ClosePosition,
    StopTrading,
    EmergencyShutdown,
}

impl std::fmt::Display for RiskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::ReducePosition => "reduce_position",
            Self::ClosePosition => "close_position",
            Self::StopTrading => "stop_trading",
            Self::EmergencyShutdown => "emergency_shutdown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskAlertType {
    PositionLoss,
    LiquidationRisk,
    DailyLoss,
    Drawdown,
}

impl std::fmt::Display for RiskAlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PositionLoss => "position_loss",
            Self::LiquidationRisk => "liquidation_risk",
            Self::DailyLoss => "daily_loss",
            Self::Drawdown => "drawdown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

/// Record of a dispatched protective action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionExecution {
    pub action: RiskAction,
    pub status: ExecutionStatus,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAlert {
    pub id: Uuid,
    pub alert_type: RiskAlertType,
    pub level: RiskLevel,
    /// `None` for account-wide alerts.
    pub symbol: Option<String>,
    pub message: String,
    pub current_value: Decimal,
    pub threshold_value: Decimal,
    pub recommended_action: RiskAction,
    pub auto_execute: bool,
    pub execution: Option<ActionExecution>,
    pub created_at: DateTime<Utc>,
}

impl RiskAlert {
    /// `auto_execute` is only honoured when there is an action to execute.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alert_type: RiskAlertType,
        level: RiskLevel,
        symbol: Option<String>,
        message: String,
        current_value: Decimal,
        threshold_value: Decimal,
        recommended_action: RiskAction,
        auto_execute: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            level,
            symbol,
            message,
            current_value,
            threshold_value,
            recommended_action,
            auto_execute: auto_execute && recommended_action != RiskAction::None,
            execution: None,
            created_at: Utc::now(),
        }
    }

    pub fn execution_failed(&self) -> bool {
        matches!(
            &self.execution,
            Some(ActionExecution {
                status: ExecutionStatus::Failed,
                ..
            })
        )
    }
}

/// Live risk snapshot for one open position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRisk {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_percent: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
    #[serde(default)]
    pub liquidation_price: Option<Decimal>,
    /// Distance from current price to liquidation, in percent. `None` when
    /// the position cannot be liquidated (e.g. spot).
    #[serde(default)]
    pub distance_to_liquidation_percent: Option<Decimal>,
}

fn default_leverage() -> Decimal {
    Decimal::ONE
}

/// Account-wide risk snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountRisk {
    /// Realized plus unrealized PnL since the start of the trading day.
    pub today_pnl: Decimal,
    pub current_drawdown_percent: Decimal,
    #[serde(default)]
    pub equity: Option<Decimal>,
}
