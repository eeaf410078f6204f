use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Schema version of [`RegimeSnapshot`] as written to the state store.
/// Bump when a field changes meaning; readers reject other versions.
pub const REGIME_SCHEMA_VERSION: u32 = 1;

/// Coarse classification of current market behaviour.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    LowVolume,
    #[default]
    Unknown,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrendingUp => "trending_up",
            Self::TrendingDown => "trending_down",
            Self::Ranging => "ranging",
            Self::Volatile => "volatile",
            Self::LowVolume => "low_volume",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Regime classification for one symbol, produced by the regime feed and
/// consumed by the signal validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegimeSnapshot {
    pub symbol: String,
    pub regime: MarketRegime,
    /// Standard deviation of recent returns, as a fraction (0.02 = 2%).
    pub volatility: Option<Decimal>,
    /// 0.0 (no trend) to 1.0 (strong trend).
    pub trend_strength: Option<Decimal>,
    /// Classifier confidence in [0, 1].
    pub confidence: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl RegimeSnapshot {
    /// The neutral snapshot substituted when nothing usable is in the store.
    pub fn unknown(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            regime: MarketRegime::Unknown,
            volatility: None,
            trend_strength: None,
            confidence: Decimal::ZERO,
            observed_at: Utc::now(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.regime == MarketRegime::Unknown
    }
}
