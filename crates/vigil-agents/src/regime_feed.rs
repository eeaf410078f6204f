//! Upstream producer of `RegimeSnapshot`s.
//!
//! On every interval the feed pulls recent bars for each configured symbol,
//! classifies the market regime, writes the snapshot under `regime:{symbol}`
//! with a TTL and announces it on `regime:updates`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vigil_models::{keys, FeedConfig, MarketRegime, RegimeSnapshot};
use vigil_store::{publish_typed, set_typed, StateChannel};

use crate::error::AgentError;

/// One closed bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub close: Decimal,
    pub volume: Decimal,
}

/// Where the feed gets its bars. Oldest bar first.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn recent_bars(&self, symbol: &str) -> Result<Vec<PriceBar>, AgentError>;
}

/// Cut-offs used by [`classify_regime`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeThresholds {
    /// Fewer bars than this yields an unknown regime.
    pub min_bars: usize,
    /// Bar count at which confidence reaches 1.
    pub full_confidence_bars: usize,
    /// Per-bar return standard deviation above which the market is volatile.
    pub volatile_std_dev: f64,
    /// Last volume over the average of the earlier ones.
    pub low_volume_ratio: f64,
    /// R² of the close-vs-time fit needed to call a trend.
    pub min_trend_fit: f64,
    /// Total fitted move over the window, as a fraction of the mean close.
    pub min_trend_move: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            min_bars: 10,
            full_confidence_bars: 50,
            volatile_std_dev: 0.03,
            low_volume_ratio: 0.5,
            min_trend_fit: 0.5,
            min_trend_move: 0.01,
        }
    }
}

fn to_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(6))
}

/// Classify a window of bars.
///
/// Volatility is the standard deviation of bar-to-bar returns. Trend
/// strength is the R² of a least-squares line through the closes; its
/// slope gives the direction. Volatile wins over low volume, which wins
/// over trend.
pub fn classify_regime(
    symbol: &str,
    bars: &[PriceBar],
    thresholds: &RegimeThresholds,
) -> RegimeSnapshot {
    let closes: Vec<f64> = bars.iter().filter_map(|b| b.close.to_f64()).collect();
    if closes.len() < thresholds.min_bars.max(3) || closes.iter().any(|c| *c <= 0.0) {
        return RegimeSnapshot::unknown(symbol);
    }
    let n = closes.len() as f64;

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;
    let volatility = (returns
        .iter()
        .map(|r| (r - mean_return).powi(2))
        .sum::<f64>()
        / returns.len() as f64)
        .sqrt();

    // Least squares of close against bar index
    let mean_x = (n - 1.0) / 2.0;
    let mean_close = closes.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (i, close) in closes.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = close - mean_close;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let fit = if sxx > 0.0 && syy > 0.0 {
        (sxy * sxy) / (sxx * syy)
    } else {
        0.0
    };
    let total_move = slope * (n - 1.0) / mean_close;

    let volumes: Vec<f64> = bars.iter().filter_map(|b| b.volume.to_f64()).collect();
    let volume_ratio = match volumes.split_last() {
        Some((last, earlier)) if !earlier.is_empty() => {
            let avg = earlier.iter().sum::<f64>() / earlier.len() as f64;
            if avg > 0.0 {
                Some(last / avg)
            } else {
                None
            }
        }
        _ => None,
    };

    let regime = if volatility > thresholds.volatile_std_dev {
        MarketRegime::Volatile
    } else if volume_ratio.is_some_and(|r| r < thresholds.low_volume_ratio) {
        MarketRegime::LowVolume
    } else if fit >= thresholds.min_trend_fit && total_move.abs() >= thresholds.min_trend_move {
        if slope > 0.0 {
            MarketRegime::TrendingUp
        } else {
            MarketRegime::TrendingDown
        }
    } else {
        MarketRegime::Ranging
    };

    let coverage = (n / thresholds.full_confidence_bars.max(1) as f64).min(1.0);
    RegimeSnapshot {
        symbol: symbol.to_string(),
        regime,
        volatility: to_decimal(volatility),
        trend_strength: to_decimal(fit),
        confidence: to_decimal(coverage).unwrap_or(Decimal::ZERO),
        observed_at: Utc::now(),
    }
}

pub struct RegimeFeed {
    config: FeedConfig,
    thresholds: RegimeThresholds,
    source: Arc<dyn PriceSource>,
    store: Arc<dyn StateChannel>,
    cancel: CancellationToken,
}

impl RegimeFeed {
    pub fn new(
        config: FeedConfig,
        source: Arc<dyn PriceSource>,
        store: Arc<dyn StateChannel>,
    ) -> Self {
        Self {
            config,
            thresholds: RegimeThresholds::default(),
            source,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: RegimeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One pass over every symbol. Returns how many snapshots were written.
    pub async fn refresh(&self) -> usize {
        let ttl = Duration::from_secs(self.config.ttl_seconds);
        let mut written = 0;

        for symbol in &self.config.symbols {
            let bars = match self.source.recent_bars(symbol).await {
                Ok(bars) => bars,
                Err(e) => {
                    tracing::warn!(%symbol, error = %e, "Failed to fetch bars; skipping");
                    continue;
                }
            };

            let snapshot = classify_regime(symbol, &bars, &self.thresholds);
            let store = self.store.as_ref();
            if let Err(e) = set_typed(store, &keys::regime(symbol), &snapshot, Some(ttl)).await {
                tracing::error!(%symbol, error = %e, "Failed to write regime snapshot");
                continue;
            }
            written += 1;
            tracing::debug!(%symbol, regime = %snapshot.regime, bars = bars.len(), "Regime updated");

            if let Err(e) = publish_typed(store, keys::channel::REGIME_UPDATES, &snapshot).await {
                tracing::warn!(%symbol, error = %e, "Failed to publish regime update");
            }
        }

        tracing::info!(count = written, "Regime refresh complete");
        written
    }

    /// Refresh immediately, then on every interval until cancelled.
    pub async fn run(&self) {
        let interval = Duration::from_secs(self.config.interval_seconds.max(1));
        tracing::info!(symbols = self.config.symbols.len(), "Regime feed starting");

        self.refresh().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Regime feed shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.refresh().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bars(closes: &[f64], volume: f64) -> Vec<PriceBar> {
        closes
            .iter()
            .map(|c| PriceBar {
                close: Decimal::from_f64(*c).unwrap(),
                volume: Decimal::from_f64(volume).unwrap(),
            })
            .collect()
    }

    fn series(len: usize, f: impl Fn(usize) -> f64) -> Vec<f64> {
        (0..len).map(f).collect()
    }

    #[test]
    fn too_few_bars_is_unknown() {
        let snapshot = classify_regime("BTCUSDT", &bars(&[100.0, 101.0], 10.0), &RegimeThresholds::default());
        assert!(snapshot.is_unknown());
        assert!(snapshot.volatility.is_none());
    }

    #[test]
    fn steady_rise_is_trending_up() {
        let closes = series(30, |i| 100.0 + i as f64 * 0.5);
        let snapshot = classify_regime("BTCUSDT", &bars(&closes, 10.0), &RegimeThresholds::default());
        assert_eq!(snapshot.regime, MarketRegime::TrendingUp);
        assert!(snapshot.trend_strength.unwrap() > dec!(0.9));
        assert_eq!(snapshot.confidence, dec!(0.6));
    }

    #[test]
    fn steady_fall_is_trending_down() {
        let closes = series(30, |i| 200.0 - i as f64);
        let snapshot = classify_regime("ETHUSDT", &bars(&closes, 10.0), &RegimeThresholds::default());
        assert_eq!(snapshot.regime, MarketRegime::TrendingDown);
    }

    #[test]
    fn oscillation_is_ranging() {
        let closes = series(30, |i| if i % 2 == 0 { 100.0 } else { 100.5 });
        let snapshot = classify_regime("ETHUSDT", &bars(&closes, 10.0), &RegimeThresholds::default());
        assert_eq!(snapshot.regime, MarketRegime::Ranging);
    }

    #[test]
    fn large_swings_are_volatile() {
        let closes = series(30, |i| if i % 2 == 0 { 100.0 } else { 110.0 });
        let snapshot = classify_regime("SOLUSDT", &bars(&closes, 10.0), &RegimeThresholds::default());
        assert_eq!(snapshot.regime, MarketRegime::Volatile);
    }

    #[test]
    fn volume_collapse_is_low_volume() {
        let closes = series(30, |i| if i % 2 == 0 { 100.0 } else { 100.5 });
        let mut window = bars(&closes, 10.0);
        if let Some(last) = window.last_mut() {
            last.volume = dec!(2);
        }
        let snapshot = classify_regime("SOLUSDT", &window, &RegimeThresholds::default());
        assert_eq!(snapshot.regime, MarketRegime::LowVolume);
    }
}
