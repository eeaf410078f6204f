use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    Buy,
    Sell,
    Close,
}

impl SignalAction {
    /// Whether this action opens or adds to exposure.
    pub fn is_entry(&self) -> bool {
        !matches!(self, Self::Close)
    }

    /// The position side this action would open, if any.
    pub fn opens(&self) -> Option<PositionSide> {
        match self {
            Self::Buy => Some(PositionSide::Long),
            Self::Sell => Some(PositionSide::Short),
            Self::Close => None,
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Close => "close",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
    #[default]
    None,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
            Self::None => Self::None,
        }
    }
}

/// A previously emitted signal, used by the consecutive-signal rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentSignal {
    pub action: SignalAction,
    #[serde(default)]
    pub confidence: Option<Decimal>,
}

/// A proposed trade signal plus the context it is judged against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalParams {
    pub signal_id: String,
    pub symbol: String,
    pub action: SignalAction,
    /// Strategy confidence in [0, 1].
    pub confidence: Decimal,
    pub current_price: Decimal,
    /// Percent change over the last five minutes (2.5 = +2.5%).
    #[serde(default)]
    pub price_change_5m_percent: Decimal,
    #[serde(default)]
    pub current_position: PositionSide,
    /// Most recent first.
    #[serde(default)]
    pub recent_signals: Vec<RecentSignal>,
    pub order_size: Decimal,
    pub available_balance: Decimal,
    #[serde(default)]
    pub support_level: Option<Decimal>,
    #[serde(default)]
    pub resistance_level: Option<Decimal>,
    #[serde(default)]
    pub recent_trade_count: u32,
    #[serde(default)]
    pub current_drawdown_percent: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minimal_params_fill_defaults() {
        let json = r#"{
            "signal_id": "sig-1",
            "symbol": "ETHUSDT",
            "action": "buy",
            "confidence": "0.82",
            "current_price": "3150.5",
            "order_size": "100",
            "available_balance": "1000"
        }"#;
        let params: SignalParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.action, SignalAction::Buy);
        assert_eq!(params.confidence, dec!(0.82));
        assert_eq!(params.current_position, PositionSide::None);
        assert!(params.recent_signals.is_empty());
        assert_eq!(params.recent_trade_count, 0);
        assert!(params.support_level.is_none());
    }

    #[test]
    fn action_sides() {
        assert_eq!(SignalAction::Buy.opens(), Some(PositionSide::Long));
        assert_eq!(SignalAction::Sell.opens(), Some(PositionSide::Short));
        assert_eq!(SignalAction::Close.opens(), None);
        assert!(!SignalAction::Close.is_entry());
        assert_eq!(PositionSide::Long.opposite(), PositionSide::Short);
    }
}
