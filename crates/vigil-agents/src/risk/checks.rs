//! Threshold checks. Each returns at most one alert and has no side effects.

use rust_decimal::Decimal;
use vigil_models::{
    AccountRisk, PositionRisk, RiskAction, RiskAlert, RiskAlertType, RiskConfig, RiskLevel,
};

pub fn position_loss(config: &RiskConfig, position: &PositionRisk) -> Option<RiskAlert> {
    let limit = -config.max_position_loss_percent;
    if position.unrealized_pnl_percent >= limit {
        return None;
    }
    Some(RiskAlert::new(
        RiskAlertType::PositionLoss,
        RiskLevel::High,
        Some(position.symbol.clone()),
        format!(
            "{} unrealized loss {}% exceeds {}%",
            position.symbol, position.unrealized_pnl_percent, config.max_position_loss_percent
        ),
        position.unrealized_pnl_percent,
        limit,
        RiskAction::ClosePosition,
        config.auto_execute,
    ))
}

pub fn liquidation(config: &RiskConfig, position: &PositionRisk) -> Option<RiskAlert> {
    let distance = position.distance_to_liquidation_percent?;
    if distance >= config.liquidation_warning_percent {
        return None;
    }
    Some(RiskAlert::new(
        RiskAlertType::LiquidationRisk,
        RiskLevel::Critical,
        Some(position.symbol.clone()),
        format!(
            "{} is {distance}% from liquidation (warning at {}%)",
            position.symbol, config.liquidation_warning_percent
        ),
        distance,
        config.liquidation_warning_percent,
        RiskAction::ReducePosition,
        config.auto_execute,
    ))
}

pub fn daily_loss(config: &RiskConfig, account: &AccountRisk) -> Option<RiskAlert> {
    let limit = -config.max_daily_loss;
    if account.today_pnl >= limit {
        return None;
    }
    Some(RiskAlert::new(
        RiskAlertType::DailyLoss,
        RiskLevel::Critical,
        None,
        format!(
            "daily loss {} exceeds limit {}",
            account.today_pnl.abs(),
            config.max_daily_loss
        ),
        account.today_pnl,
        limit,
        RiskAction::StopTrading,
        config.auto_execute,
    ))
}

pub fn drawdown(config: &RiskConfig, account: &AccountRisk) -> Option<RiskAlert> {
    if account.current_drawdown_percent <= config.max_drawdown_percent {
        return None;
    }
    Some(RiskAlert::new(
        RiskAlertType::Drawdown,
        RiskLevel::Critical,
        None,
        format!(
            "drawdown {}% exceeds {}%",
            account.current_drawdown_percent, config.max_drawdown_percent
        ),
        account.current_drawdown_percent,
        config.max_drawdown_percent,
        RiskAction::StopTrading,
        config.auto_execute,
    ))
}

/// Whether a position has any open exposure worth checking.
pub fn is_open(position: &PositionRisk) -> bool {
    position.size != Decimal::ZERO
}
