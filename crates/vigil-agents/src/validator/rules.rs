//! The signal validation rule catalogue.
//!
//! Each rule is a small struct holding its thresholds and a
//! [`RuleDescriptor`]. [`default_rules`] builds the standard ordered list
//! from a [`ValidatorConfig`].

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use vigil_models::{
    MarketRegime, PositionSide, RegimeSnapshot, RuleDescriptor, SignalAction, SignalParams,
    ValidatorConfig,
};

use crate::error::RuleError;

pub const CONFIDENCE_THRESHOLD: &str = "confidence_threshold";
pub const MARKET_REGIME: &str = "market_regime";
pub const SUDDEN_PRICE_CHANGE: &str = "sudden_price_change";
pub const POSITION_REVERSAL: &str = "position_reversal";
pub const CONSECUTIVE_SIGNALS: &str = "consecutive_signals";
pub const BALANCE_LIMIT: &str = "balance_limit";
pub const VOLATILITY_THRESHOLD: &str = "volatility_threshold";
pub const SUPPORT_RESISTANCE: &str = "support_resistance";
pub const TREND_STRENGTH: &str = "trend_strength";
pub const TRADE_FREQUENCY: &str = "trade_frequency";
pub const DRAWDOWN_LIMIT: &str = "drawdown_limit";

/// What a rule concluded about a signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Pass,
    /// Conditional pass: the order may go ahead at `factor` of its size.
    Adjust(Decimal),
    Fail,
    /// Rejects the signal regardless of criticality or score.
    Veto,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass | Self::Adjust(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub verdict: Verdict,
    pub message: String,
}

impl RuleOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Pass,
            message: message.into(),
        }
    }

    pub fn adjust(factor: Decimal, message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Adjust(factor),
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            message: message.into(),
        }
    }

    pub fn veto(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Veto,
            message: message.into(),
        }
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub signal: &'a SignalParams,
    pub regime: &'a RegimeSnapshot,
}

/// A single check in the validation catalogue. Rules are pure: the same
/// context always yields the same outcome.
pub trait ValidationRule: Send + Sync {
    fn descriptor(&self) -> &RuleDescriptor;

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError>;

    fn id(&self) -> &str {
        &self.descriptor().id
    }
}

fn descriptor(
    config: &ValidatorConfig,
    id: &str,
    name: &str,
    default_weight: Decimal,
    is_critical: bool,
) -> RuleDescriptor {
    let weight = config
        .rule_weights
        .get(id)
        .copied()
        .unwrap_or(default_weight)
        .max(Decimal::ZERO);
    RuleDescriptor::new(id, name, weight, is_critical)
}

const CRITICAL_WEIGHT: Decimal = dec!(1.5);
const GUARD_WEIGHT: Decimal = dec!(1.0);
const ADVISORY_WEIGHT: Decimal = dec!(0.75);

/// The standard catalogue, critical rules first.
pub fn default_rules(config: &ValidatorConfig) -> Vec<Box<dyn ValidationRule>> {
    vec![
        Box::new(ConfidenceThreshold::new(config)),
        Box::new(MarketRegimeAlignment::new(config)),
        Box::new(SuddenPriceChange::new(config)),
        Box::new(PositionReversal::new(config)),
        Box::new(ConsecutiveSignals::new(config)),
        Box::new(BalanceLimit::new(config)),
        Box::new(VolatilityThreshold::new(config)),
        Box::new(SupportResistance::new(config)),
        Box::new(TrendStrength::new(config)),
        Box::new(TradeFrequency::new(config)),
        Box::new(DrawdownLimit::new(config)),
    ]
}

pub struct ConfidenceThreshold {
    descriptor: RuleDescriptor,
    min_confidence: Decimal,
    full_size_confidence: Decimal,
    reduced_size_factor: Decimal,
}

impl ConfidenceThreshold {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                CONFIDENCE_THRESHOLD,
                "Confidence floor",
                CRITICAL_WEIGHT,
                true,
            ),
            min_confidence: config.min_confidence,
            full_size_confidence: config.full_size_confidence,
            reduced_size_factor: config.reduced_size_factor,
        }
    }
}

impl ValidationRule for ConfidenceThreshold {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let confidence = ctx.signal.confidence;
        if confidence < Decimal::ZERO || confidence > Decimal::ONE {
            return Err(RuleError::new(
                CONFIDENCE_THRESHOLD,
                format!("confidence {confidence} outside [0, 1]"),
            ));
        }

        if confidence < self.min_confidence {
            Ok(RuleOutcome::fail(format!(
                "confidence {confidence} below minimum {}",
                self.min_confidence
            )))
        } else if confidence < self.full_size_confidence {
            Ok(RuleOutcome::adjust(
                self.reduced_size_factor,
                format!(
                    "confidence {confidence} below {}; size reduced to {}",
                    self.full_size_confidence, self.reduced_size_factor
                ),
            ))
        } else {
            Ok(RuleOutcome::pass(format!("confidence {confidence}")))
        }
    }
}

pub struct MarketRegimeAlignment {
    descriptor: RuleDescriptor,
}

impl MarketRegimeAlignment {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                MARKET_REGIME,
                "Market regime alignment",
                CRITICAL_WEIGHT,
                true,
            ),
        }
    }
}

impl ValidationRule for MarketRegimeAlignment {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let regime = ctx.regime.regime;
        let action = ctx.signal.action;

        let outcome = match (action, regime) {
            (SignalAction::Close, _) => RuleOutcome::pass("closing is allowed in any regime"),
            (_, MarketRegime::Unknown) => RuleOutcome::pass("regime unknown"),
            (_, MarketRegime::Volatile | MarketRegime::LowVolume) => {
                RuleOutcome::fail(format!("no new entries in a {regime} market"))
            }
            (SignalAction::Buy, MarketRegime::TrendingUp | MarketRegime::Ranging)
            | (SignalAction::Sell, MarketRegime::TrendingDown | MarketRegime::Ranging) => {
                RuleOutcome::pass(format!("{action} aligned with {regime}"))
            }
            _ => RuleOutcome::fail(format!("{action} against a {regime} market")),
        };
        Ok(outcome)
    }
}

pub struct SuddenPriceChange {
    descriptor: RuleDescriptor,
    max_change_percent: Decimal,
}

impl SuddenPriceChange {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                SUDDEN_PRICE_CHANGE,
                "Price shock filter",
                CRITICAL_WEIGHT,
                true,
            ),
            max_change_percent: config.max_price_change_5m_percent,
        }
    }
}

impl ValidationRule for SuddenPriceChange {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let change = ctx.signal.price_change_5m_percent.abs();
        if change > self.max_change_percent {
            Ok(RuleOutcome::fail(format!(
                "price moved {change}% in 5m (max {}%)",
                self.max_change_percent
            )))
        } else {
            Ok(RuleOutcome::pass(format!("5m price change {change}%")))
        }
    }
}

pub struct PositionReversal {
    descriptor: RuleDescriptor,
    min_confidence: Decimal,
}

impl PositionReversal {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                POSITION_REVERSAL,
                "Reversal guard",
                CRITICAL_WEIGHT,
                true,
            ),
            min_confidence: config.reversal_min_confidence,
        }
    }
}

impl ValidationRule for PositionReversal {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let signal = ctx.signal;
        let held = signal.current_position;
        let reverses = held != PositionSide::None && signal.action.opens() == Some(held.opposite());

        if reverses && signal.confidence < self.min_confidence {
            Ok(RuleOutcome::fail(format!(
                "reversing a {held:?} position needs confidence >= {} (got {})",
                self.min_confidence, signal.confidence
            )))
        } else if reverses {
            Ok(RuleOutcome::pass("high-confidence reversal"))
        } else {
            Ok(RuleOutcome::pass("no reversal"))
        }
    }
}

pub struct ConsecutiveSignals {
    descriptor: RuleDescriptor,
    max_run: usize,
}

impl ConsecutiveSignals {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                CONSECUTIVE_SIGNALS,
                "Same-direction run limit",
                GUARD_WEIGHT,
                false,
            ),
            max_run: config.max_consecutive_signals,
        }
    }
}

impl ValidationRule for ConsecutiveSignals {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let signal = ctx.signal;
        if !signal.action.is_entry() || self.max_run == 0 {
            return Ok(RuleOutcome::pass("not an entry"));
        }

        let run = signal
            .recent_signals
            .iter()
            .take_while(|recent| recent.action == signal.action)
            .count();

        if run >= self.max_run {
            Ok(RuleOutcome::veto(format!(
                "{run} consecutive {} signals already (limit {})",
                signal.action, self.max_run
            )))
        } else {
            Ok(RuleOutcome::pass(format!(
                "{run} prior {} signals in a row",
                signal.action
            )))
        }
    }
}

pub struct BalanceLimit {
    descriptor: RuleDescriptor,
    max_fraction: Decimal,
}

impl BalanceLimit {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                BALANCE_LIMIT,
                "Exposure cap",
                GUARD_WEIGHT,
                false,
            ),
            max_fraction: config.max_balance_fraction,
        }
    }
}

impl ValidationRule for BalanceLimit {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let signal = ctx.signal;
        if signal.available_balance <= Decimal::ZERO {
            return Ok(RuleOutcome::veto(format!(
                "no available balance ({})",
                signal.available_balance
            )));
        }
        if signal.order_size <= Decimal::ZERO {
            return Err(RuleError::new(
                BALANCE_LIMIT,
                format!("order size {} must be positive", signal.order_size),
            ));
        }

        let cap = signal.available_balance * self.max_fraction;
        if signal.order_size > cap {
            let factor = (cap / signal.order_size).round_dp(6);
            Ok(RuleOutcome::adjust(
                factor,
                format!(
                    "order size {} exceeds {} of balance; capped at {cap}",
                    signal.order_size, self.max_fraction
                ),
            ))
        } else {
            Ok(RuleOutcome::pass(format!(
                "order size {} within cap {cap}",
                signal.order_size
            )))
        }
    }
}

pub struct VolatilityThreshold {
    descriptor: RuleDescriptor,
    max_volatility: Decimal,
}

impl VolatilityThreshold {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                VOLATILITY_THRESHOLD,
                "Volatility ceiling",
                ADVISORY_WEIGHT,
                false,
            ),
            max_volatility: config.max_volatility,
        }
    }
}

impl ValidationRule for VolatilityThreshold {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        match ctx.regime.volatility {
            None => Ok(RuleOutcome::fail("no volatility data")),
            Some(v) if v > self.max_volatility => Ok(RuleOutcome::fail(format!(
                "volatility {v} above {}",
                self.max_volatility
            ))),
            Some(v) => Ok(RuleOutcome::pass(format!("volatility {v}"))),
        }
    }
}

pub struct SupportResistance {
    descriptor: RuleDescriptor,
    proximity_percent: Decimal,
}

impl SupportResistance {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                SUPPORT_RESISTANCE,
                "Level proximity",
                ADVISORY_WEIGHT,
                false,
            ),
            proximity_percent: config.level_proximity_percent,
        }
    }

    /// Percent distance from `price` to `level`, measured against the level.
    fn distance_percent(price: Decimal, level: Decimal) -> Option<Decimal> {
        if level <= Decimal::ZERO {
            return None;
        }
        Some((level - price).abs() / level * dec!(100))
    }
}

impl ValidationRule for SupportResistance {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let signal = ctx.signal;
        let price = signal.current_price;

        let (level, label) = match signal.action {
            SignalAction::Buy => (signal.resistance_level, "resistance"),
            SignalAction::Sell => (signal.support_level, "support"),
            SignalAction::Close => return Ok(RuleOutcome::pass("closing ignores levels")),
        };
        let Some(level) = level else {
            return Ok(RuleOutcome::pass(format!("no {label} level")));
        };

        // Buying just under resistance or selling just over support
        let on_wrong_side = match signal.action {
            SignalAction::Buy => price <= level,
            _ => price >= level,
        };
        match Self::distance_percent(price, level) {
            Some(distance) if on_wrong_side && distance <= self.proximity_percent => {
                Ok(RuleOutcome::fail(format!(
                    "price {price} within {distance:.2}% of {label} {level}"
                )))
            }
            _ => Ok(RuleOutcome::pass(format!("clear of {label} {level}"))),
        }
    }
}

pub struct TrendStrength {
    descriptor: RuleDescriptor,
    min_strength: Decimal,
}

impl TrendStrength {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                TREND_STRENGTH,
                "Trend filter",
                ADVISORY_WEIGHT,
                false,
            ),
            min_strength: config.min_trend_strength,
        }
    }
}

impl ValidationRule for TrendStrength {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        if !ctx.signal.action.is_entry() {
            return Ok(RuleOutcome::pass("not an entry"));
        }
        match ctx.regime.trend_strength {
            None => Ok(RuleOutcome::fail("no trend data")),
            Some(s) if s < self.min_strength => Ok(RuleOutcome::fail(format!(
                "trend strength {s} below {}",
                self.min_strength
            ))),
            Some(s) => Ok(RuleOutcome::pass(format!("trend strength {s}"))),
        }
    }
}

pub struct TradeFrequency {
    descriptor: RuleDescriptor,
    max_recent_trades: u32,
}

impl TradeFrequency {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                TRADE_FREQUENCY,
                "Frequency cap",
                ADVISORY_WEIGHT,
                false,
            ),
            max_recent_trades: config.max_recent_trades,
        }
    }
}

impl ValidationRule for TradeFrequency {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let count = ctx.signal.recent_trade_count;
        if count >= self.max_recent_trades {
            Ok(RuleOutcome::fail(format!(
                "{count} recent trades (limit {})",
                self.max_recent_trades
            )))
        } else {
            Ok(RuleOutcome::pass(format!("{count} recent trades")))
        }
    }
}

pub struct DrawdownLimit {
    descriptor: RuleDescriptor,
    max_drawdown_percent: Decimal,
}

impl DrawdownLimit {
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            descriptor: descriptor(
                config,
                DRAWDOWN_LIMIT,
                "Drawdown filter",
                GUARD_WEIGHT,
                false,
            ),
            max_drawdown_percent: config.max_drawdown_percent,
        }
    }
}

impl ValidationRule for DrawdownLimit {
    fn descriptor(&self) -> &RuleDescriptor {
        &self.descriptor
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Result<RuleOutcome, RuleError> {
        let drawdown = ctx.signal.current_drawdown_percent;
        if ctx.signal.action.is_entry() && drawdown > self.max_drawdown_percent {
            Ok(RuleOutcome::fail(format!(
                "drawdown {drawdown}% exceeds {}%",
                self.max_drawdown_percent
            )))
        } else {
            Ok(RuleOutcome::pass(format!("drawdown {drawdown}%")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_models::RecentSignal;

    fn signal() -> SignalParams {
        SignalParams {
            signal_id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            action: SignalAction::Buy,
            confidence: dec!(0.85),
            current_price: dec!(50000),
            price_change_5m_percent: dec!(0.4),
            current_position: PositionSide::None,
            recent_signals: vec![],
            order_size: dec!(200),
            available_balance: dec!(1000),
            support_level: None,
            resistance_level: None,
            recent_trade_count: 2,
            current_drawdown_percent: dec!(3),
        }
    }

    fn regime(kind: MarketRegime) -> RegimeSnapshot {
        RegimeSnapshot {
            symbol: "BTCUSDT".to_string(),
            regime: kind,
            volatility: Some(dec!(0.02)),
            trend_strength: Some(dec!(0.6)),
            confidence: dec!(0.9),
            observed_at: Utc::now(),
        }
    }

    fn run(rule: &dyn ValidationRule, signal: &SignalParams, regime: &RegimeSnapshot) -> Verdict {
        rule.evaluate(&RuleContext { signal, regime })
            .unwrap()
            .verdict
    }

    #[test]
    fn catalogue_has_four_critical_rules() {
        let rules = default_rules(&ValidatorConfig::default());
        assert_eq!(rules.len(), 11);
        let critical: Vec<&str> = rules
            .iter()
            .filter(|r| r.descriptor().is_critical)
            .map(|r| r.id())
            .collect();
        assert_eq!(
            critical,
            vec![
                CONFIDENCE_THRESHOLD,
                MARKET_REGIME,
                SUDDEN_PRICE_CHANGE,
                POSITION_REVERSAL
            ]
        );
    }

    #[test]
    fn weight_overrides_apply() {
        let mut config = ValidatorConfig::default();
        config.rule_weights.insert(TRADE_FREQUENCY.to_string(), dec!(2));
        let rule = TradeFrequency::new(&config);
        assert_eq!(rule.descriptor().weight, dec!(2));
    }

    #[test]
    fn confidence_bands() {
        let rule = ConfidenceThreshold::new(&ValidatorConfig::default());
        let regime = regime(MarketRegime::TrendingUp);
        let mut s = signal();

        s.confidence = dec!(0.55);
        assert_eq!(run(&rule, &s, &regime), Verdict::Fail);
        s.confidence = dec!(0.65);
        assert_eq!(run(&rule, &s, &regime), Verdict::Adjust(dec!(0.5)));
        s.confidence = dec!(0.7);
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);

        s.confidence = dec!(1.2);
        assert!(rule
            .evaluate(&RuleContext {
                signal: &s,
                regime: &regime
            })
            .is_err());
    }

    #[test]
    fn regime_alignment() {
        let rule = MarketRegimeAlignment::new(&ValidatorConfig::default());
        let mut s = signal();

        assert_eq!(run(&rule, &s, &regime(MarketRegime::TrendingUp)), Verdict::Pass);
        assert_eq!(run(&rule, &s, &regime(MarketRegime::Ranging)), Verdict::Pass);
        assert_eq!(run(&rule, &s, &regime(MarketRegime::TrendingDown)), Verdict::Fail);
        assert_eq!(run(&rule, &s, &regime(MarketRegime::Volatile)), Verdict::Fail);
        assert_eq!(run(&rule, &s, &regime(MarketRegime::Unknown)), Verdict::Pass);

        s.action = SignalAction::Sell;
        assert_eq!(run(&rule, &s, &regime(MarketRegime::TrendingDown)), Verdict::Pass);
        assert_eq!(run(&rule, &s, &regime(MarketRegime::LowVolume)), Verdict::Fail);

        s.action = SignalAction::Close;
        assert_eq!(run(&rule, &s, &regime(MarketRegime::Volatile)), Verdict::Pass);
    }

    #[test]
    fn price_shock() {
        let rule = SuddenPriceChange::new(&ValidatorConfig::default());
        let regime = regime(MarketRegime::TrendingUp);
        let mut s = signal();
        s.price_change_5m_percent = dec!(-2.5);
        assert_eq!(run(&rule, &s, &regime), Verdict::Fail);
        s.price_change_5m_percent = dec!(2);
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);
    }

    #[test]
    fn reversal_needs_high_confidence() {
        let rule = PositionReversal::new(&ValidatorConfig::default());
        let regime = regime(MarketRegime::Ranging);
        let mut s = signal();
        s.action = SignalAction::Sell;
        s.current_position = PositionSide::Long;
        s.confidence = dec!(0.75);
        assert_eq!(run(&rule, &s, &regime), Verdict::Fail);

        s.confidence = dec!(0.8);
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);

        // Adding to the held side is not a reversal
        s.action = SignalAction::Buy;
        s.confidence = dec!(0.61);
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);
    }

    #[test]
    fn consecutive_run_is_vetoed() {
        let rule = ConsecutiveSignals::new(&ValidatorConfig::default());
        let regime = regime(MarketRegime::TrendingUp);
        let mut s = signal();
        let buy = RecentSignal {
            action: SignalAction::Buy,
            confidence: None,
        };
        let sell = RecentSignal {
            action: SignalAction::Sell,
            confidence: None,
        };

        s.recent_signals = vec![buy.clone(), buy.clone()];
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);

        s.recent_signals = vec![buy.clone(), buy.clone(), buy.clone()];
        assert_eq!(run(&rule, &s, &regime), Verdict::Veto);

        // Only the most recent run counts
        s.recent_signals = vec![buy.clone(), sell, buy.clone(), buy];
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);
    }

    #[test]
    fn balance_cap_adjusts() {
        let rule = BalanceLimit::new(&ValidatorConfig::default());
        let regime = regime(MarketRegime::TrendingUp);
        let mut s = signal();
        s.order_size = dec!(600);
        assert_eq!(run(&rule, &s, &regime), Verdict::Adjust(dec!(0.5)));

        s.order_size = dec!(300);
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);

        s.available_balance = Decimal::ZERO;
        assert_eq!(run(&rule, &s, &regime), Verdict::Veto);

        s.available_balance = dec!(-50);
        assert_eq!(run(&rule, &s, &regime), Verdict::Veto);
    }

    #[test]
    fn missing_regime_data_fails_advisory_rules() {
        let config = ValidatorConfig::default();
        let unknown = RegimeSnapshot::unknown("BTCUSDT");
        let s = signal();
        assert_eq!(run(&VolatilityThreshold::new(&config), &s, &unknown), Verdict::Fail);
        assert_eq!(run(&TrendStrength::new(&config), &s, &unknown), Verdict::Fail);
    }

    #[test]
    fn level_proximity() {
        let rule = SupportResistance::new(&ValidatorConfig::default());
        let regime = regime(MarketRegime::Ranging);
        let mut s = signal();

        s.resistance_level = Some(dec!(50200));
        assert_eq!(run(&rule, &s, &regime), Verdict::Fail);

        s.resistance_level = Some(dec!(51000));
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);

        s.action = SignalAction::Sell;
        s.support_level = Some(dec!(49900));
        assert_eq!(run(&rule, &s, &regime), Verdict::Fail);

        s.support_level = Some(dec!(50100));
        assert_eq!(run(&rule, &s, &regime), Verdict::Pass);
    }

    #[test]
    fn frequency_and_drawdown() {
        let config = ValidatorConfig::default();
        let regime = regime(MarketRegime::TrendingUp);
        let mut s = signal();

        s.recent_trade_count = 10;
        assert_eq!(run(&TradeFrequency::new(&config), &s, &regime), Verdict::Fail);

        s.current_drawdown_percent = dec!(12);
        assert_eq!(run(&DrawdownLimit::new(&config), &s, &regime), Verdict::Fail);
        s.action = SignalAction::Close;
        assert_eq!(run(&DrawdownLimit::new(&config), &s, &regime), Verdict::Pass);
    }
}
