//! Technical indicators: RSI, MACD, Bollinger Bands, moving averages,
//! pivot-point support/resistance, volume profile and a composite signal.

use serde::{Deserialize, Serialize};

use crate::data::OhlcvBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Bullish => "BULLISH",
            Direction::Bearish => "BEARISH",
            Direction::Neutral => "NEUTRAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crossover {
    Bullish,
    Bearish,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAverages {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: f64,
    pub ema_26: f64,
    pub trend: Direction,
    /// Some(true) = golden cross (SMA50 above SMA200), Some(false) = death cross
    pub golden_cross: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdSignal {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
    pub crossover: Crossover,
    pub trend: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub bandwidth: f64,
    /// %B = (price - lower) / (upper - lower)
    pub percent_b: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeProfile {
    pub current: i64,
    pub avg_20d: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevels {
    pub pivot: f64,
    pub resistance_1: f64,
    pub resistance_2: f64,
    pub support_1: f64,
    pub support_2: f64,
    pub high_30d: f64,
    pub low_30d: f64,
}

/// Composite of the individual indicator directions. Strength is a
/// bounded percentage, symmetric between bullish and bearish readings
/// and monotonic in the signal count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSignal {
    pub direction: Direction,
    pub strength_pct: f64,
    pub bullish_signals: u32,
    pub bearish_signals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub symbol: String,
    pub data_points: usize,
    pub latest_price: f64,
    pub moving_averages: MovingAverages,
    pub rsi_14: Option<f64>,
    pub macd: Option<MacdSignal>,
    pub bollinger: Option<BollingerBands>,
    pub volume: VolumeProfile,
    pub levels: PriceLevels,
    pub signal: CompositeSignal,
}

/// Compute all indicators from a daily price series (oldest first).
/// Returns None for an empty series.
pub fn analyze(symbol: &str, bars: &[OhlcvBar]) -> Option<TechnicalSnapshot> {
    let last = bars.last()?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let latest_price = last.close;

    let moving_averages = moving_averages(&closes, latest_price);
    let rsi_14 = calculate_rsi(&closes, 14);
    let macd = calculate_macd(&closes, 12, 26, 9);
    let bollinger = bollinger_bands(&closes, 20, 2.0);
    let volume = volume_profile(bars);
    let levels = price_levels(bars);
    let signal = composite_signal(&moving_averages, rsi_14, macd.as_ref(), &volume);

    Some(TechnicalSnapshot {
        symbol: symbol.to_uppercase(),
        data_points: bars.len(),
        latest_price,
        moving_averages,
        rsi_14,
        macd,
        bollinger,
        volume,
        levels,
        signal,
    })
}

/// Simple moving average over the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    if prices.len() < period {
        return prices.iter().sum::<f64>() / prices.len() as f64;
    }
    let recent = &prices[prices.len() - period..];
    recent.iter().sum::<f64>() / period as f64
}

/// Exponential moving average seeded with the SMA of the first `period`
pub fn calculate_ema(prices: &[f64], period: usize) -> f64 {
    if prices.is_empty() {
        return 0.0;
    }
    if prices.len() < period {
        return calculate_sma(prices, prices.len());
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = calculate_sma(&prices[0..period], period);
    for &price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
    }
    ema
}

/// RSI with Wilder's smoothing. Needs at least `period + 1` prices.
/// All gains gives 100, all losses gives 0.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);
    for pair in prices.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain = gains.iter().take(period).sum::<f64>() / period as f64;
    let mut avg_loss = losses.iter().take(period).sum::<f64>() / period as f64;

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// MACD(12, 26, 9): MACD line, signal line, histogram and the most
/// recent crossover direction.
pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdSignal> {
    if prices.len() < slow_period {
        return None;
    }

    // MACD value at every point where the slow EMA is defined
    let mut macd_values = Vec::with_capacity(prices.len() - slow_period + 1);
    for i in slow_period..=prices.len() {
        let window = &prices[..i];
        macd_values.push(calculate_ema(window, fast_period) - calculate_ema(window, slow_period));
    }

    let macd_line = *macd_values.last()?;
    let signal_line = if macd_values.len() >= signal_period {
        calculate_ema(&macd_values, signal_period)
    } else {
        macd_values.iter().sum::<f64>() / macd_values.len() as f64
    };
    let histogram = macd_line - signal_line;

    let crossover = if macd_values.len() >= 2 {
        let prev_window = &macd_values[..macd_values.len() - 1];
        let prev_signal = if prev_window.len() >= signal_period {
            calculate_ema(prev_window, signal_period)
        } else {
            prev_window.iter().sum::<f64>() / prev_window.len() as f64
        };
        let prev_histogram = prev_window[prev_window.len() - 1] - prev_signal;
        if prev_histogram < 0.0 && histogram > 0.0 {
            Crossover::Bullish
        } else if prev_histogram > 0.0 && histogram < 0.0 {
            Crossover::Bearish
        } else {
            Crossover::None
        }
    } else {
        Crossover::None
    };

    let trend = if macd_line > signal_line {
        Direction::Bullish
    } else {
        Direction::Bearish
    };

    Some(MacdSignal {
        macd_line,
        signal_line,
        histogram,
        crossover,
        trend,
    })
}

/// Bollinger Bands (period, k standard deviations), sample deviation.
pub fn bollinger_bands(prices: &[f64], period: usize, std_devs: f64) -> Option<BollingerBands> {
    if prices.len() < period || period < 2 {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance =
        window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / (period - 1) as f64;
    let std = variance.sqrt();

    let upper = middle + std * std_devs;
    let lower = middle - std * std_devs;
    let price = prices[prices.len() - 1];

    let width = upper - lower;
    let percent_b = if width > 0.0 {
        (price - lower) / width
    } else {
        0.5
    };
    let bandwidth = if middle != 0.0 { width / middle } else { 0.0 };

    Some(BollingerBands {
        upper,
        middle,
        lower,
        bandwidth,
        percent_b,
    })
}

fn moving_averages(closes: &[f64], current: f64) -> MovingAverages {
    let sma = |period: usize| {
        if closes.len() >= period {
            Some(calculate_sma(closes, period))
        } else {
            None
        }
    };

    let sma_20 = sma(20);
    let sma_50 = sma(50);
    let sma_200 = sma(200);

    let golden_cross = match (sma_50, sma_200) {
        (Some(fast), Some(slow)) => Some(fast > slow),
        _ => None,
    };

    let above_count = [sma_20, sma_50, sma_200]
        .iter()
        .filter(|ma| ma.is_some_and(|v| current > v))
        .count();

    let trend = if above_count >= 2 {
        Direction::Bullish
    } else if above_count == 0 && sma_20.is_some() {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    MovingAverages {
        sma_20,
        sma_50,
        sma_200,
        ema_12: calculate_ema(closes, 12),
        ema_26: calculate_ema(closes, 26),
        trend,
        golden_cross,
    }
}

fn volume_profile(bars: &[OhlcvBar]) -> VolumeProfile {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume as f64).collect();
    let current = bars.last().map(|b| b.volume).unwrap_or(0);
    let avg_20d = calculate_sma(&volumes, 20);
    let ratio = if avg_20d > 0.0 {
        current as f64 / avg_20d
    } else {
        1.0
    };

    VolumeProfile {
        current,
        avg_20d,
        ratio,
    }
}

/// Classic pivot points from the last bar, plus the 30-day range.
fn price_levels(bars: &[OhlcvBar]) -> PriceLevels {
    let recent = &bars[bars.len().saturating_sub(30)..];
    let high_30d = recent.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low_30d = recent.iter().map(|b| b.low).fold(f64::MAX, f64::min);

    let last = &bars[bars.len() - 1];
    let pivot = (last.high + last.low + last.close) / 3.0;
    let range = last.high - last.low;

    PriceLevels {
        pivot,
        resistance_1: 2.0 * pivot - last.low,
        resistance_2: pivot + range,
        support_1: 2.0 * pivot - last.high,
        support_2: pivot - range,
        high_30d,
        low_30d,
    }
}

/// Weighted vote over the individual indicators. Equal weights on the
/// bullish and bearish side keep the composite symmetric; adding a
/// bullish reading can only raise the score.
fn composite_signal(
    ma: &MovingAverages,
    rsi: Option<f64>,
    macd: Option<&MacdSignal>,
    volume: &VolumeProfile,
) -> CompositeSignal {
    let mut bullish = 0u32;
    let mut bearish = 0u32;

    match ma.trend {
        Direction::Bullish => bullish += 2,
        Direction::Bearish => bearish += 2,
        Direction::Neutral => {}
    }

    if let Some(rsi) = rsi {
        if rsi < 30.0 {
            bullish += 1; // oversold
        } else if rsi > 70.0 {
            bearish += 1; // overbought
        }
    }

    if let Some(macd) = macd {
        match macd.trend {
            Direction::Bullish => bullish += 1,
            Direction::Bearish => bearish += 1,
            Direction::Neutral => {}
        }
        match macd.crossover {
            Crossover::Bullish => bullish += 1,
            Crossover::Bearish => bearish += 1,
            Crossover::None => {}
        }
    }

    // Heavy volume amplifies whichever side is already winning
    if volume.ratio > 1.2 {
        if bullish > bearish {
            bullish += 1;
        } else if bearish > bullish {
            bearish += 1;
        }
    }

    let total = bullish + bearish;
    if total == 0 {
        return CompositeSignal {
            direction: Direction::Neutral,
            strength_pct: 0.0,
            bullish_signals: 0,
            bearish_signals: 0,
        };
    }

    let score = (bullish as f64 - bearish as f64) / total as f64;
    let direction = if score > 0.3 {
        Direction::Bullish
    } else if score < -0.3 {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    CompositeSignal {
        direction,
        strength_pct: (score.abs() * 100.0).min(100.0),
        bullish_signals: bullish,
        bearish_signals: bearish,
    }
}

/// Text summary of a snapshot for LLM context.
pub fn summary(snapshot: &TechnicalSnapshot) -> String {
    let mut parts = vec![
        format!(
            "**Technical Analysis for {}** (${:.2}, {} sessions)",
            snapshot.symbol, snapshot.latest_price, snapshot.data_points
        ),
        format!(
            "Overall Signal: {} (Strength: {:.1}%, Bullish: {}, Bearish: {})",
            snapshot.signal.direction.as_str(),
            snapshot.signal.strength_pct,
            snapshot.signal.bullish_signals,
            snapshot.signal.bearish_signals
        ),
        format!(
            "Moving Average Trend: {}",
            snapshot.moving_averages.trend.as_str()
        ),
    ];

    for (label, value) in [
        ("SMA 20", snapshot.moving_averages.sma_20),
        ("SMA 50", snapshot.moving_averages.sma_50),
        ("SMA 200", snapshot.moving_averages.sma_200),
    ] {
        if let Some(value) = value {
            parts.push(format!("  {label}: ${value:.2}"));
        }
    }

    match snapshot.moving_averages.golden_cross {
        Some(true) => parts.push("Golden Cross (SMA50 above SMA200)".to_string()),
        Some(false) => parts.push("Death Cross (SMA50 below SMA200)".to_string()),
        None => {}
    }

    match snapshot.rsi_14 {
        Some(rsi) => {
            let zone = if rsi > 70.0 {
                "Overbought"
            } else if rsi < 30.0 {
                "Oversold"
            } else {
                "Neutral"
            };
            parts.push(format!("RSI (14): {rsi:.1} - {zone}"));
        }
        None => parts.push("RSI (14): insufficient history".to_string()),
    }

    if let Some(macd) = &snapshot.macd {
        let crossover = match macd.crossover {
            Crossover::Bullish => "Bullish Crossover",
            Crossover::Bearish => "Bearish Crossover",
            Crossover::None => "None",
        };
        parts.push(format!(
            "MACD: {} (histogram {:+.4}), Crossover: {}",
            macd.trend.as_str(),
            macd.histogram,
            crossover
        ));
    }

    if let Some(bb) = &snapshot.bollinger {
        parts.push(format!(
            "Bollinger (20, 2): %B {:.2}, band ${:.2} - ${:.2}",
            bb.percent_b, bb.lower, bb.upper
        ));
    }

    parts.push(format!(
        "Volume: {:.2}x 20-day average",
        snapshot.volume.ratio
    ));
    parts.push(format!(
        "Support: ${:.2} / ${:.2}",
        snapshot.levels.support_1, snapshot.levels.support_2
    ));
    parts.push(format!(
        "Resistance: ${:.2} / ${:.2}",
        snapshot.levels.resistance_1, snapshot.levels.resistance_2
    ));

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars_from_closes(closes: &[f64]) -> Vec<OhlcvBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| OhlcvBar {
                date: NaiveDate::from_ymd_opt(2025, 1, 1)
                    .expect("valid date")
                    .checked_add_days(chrono::Days::new(i as u64))
                    .expect("valid date"),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                adj_close: None,
                volume: 1_000_000,
            })
            .collect()
    }

    #[test]
    fn sma_of_last_period() {
        let prices = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        assert!((calculate_sma(&prices, 3) - 13.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_of_monotonic_gain_is_100() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert_eq!(calculate_rsi(&prices, 14), Some(100.0));
    }

    #[test]
    fn rsi_of_monotonic_loss_is_0() {
        let prices: Vec<f64> = (0..15).map(|i| 100.0 - i as f64).collect();
        let rsi = calculate_rsi(&prices, 14).expect("enough history");
        assert!(rsi.abs() < 1e-9);
    }

    #[test]
    fn rsi_requires_period_plus_one_prices() {
        let prices: Vec<f64> = (0..14).map(|i| 100.0 + i as f64).collect();
        assert_eq!(calculate_rsi(&prices, 14), None);
    }

    #[test]
    fn mixed_series_rsi_is_interior() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.25, 44.5, 44.75, 45.0, 45.25, 45.5, 45.75, 46.0,
            45.75, 45.5,
        ];
        let rsi = calculate_rsi(&prices, 14).expect("enough history");
        assert!(rsi > 50.0 && rsi < 100.0);
    }

    #[test]
    fn macd_turns_bullish_on_uptrend() {
        // Flat then rising: fast EMA overtakes slow EMA
        let mut prices = vec![100.0; 30];
        prices.extend((1..=10).map(|i| 100.0 + i as f64 * 2.0));
        let macd = calculate_macd(&prices, 12, 26, 9).expect("enough history");
        assert!(macd.macd_line > macd.signal_line);
        assert_eq!(macd.trend, Direction::Bullish);
    }

    #[test]
    fn macd_needs_slow_period() {
        let prices = vec![100.0; 25];
        assert!(calculate_macd(&prices, 12, 26, 9).is_none());
    }

    #[test]
    fn bollinger_percent_b_is_high_after_breakout() {
        let mut prices = vec![100.0; 19];
        prices.push(110.0);
        let bb = bollinger_bands(&prices, 20, 2.0).expect("enough history");
        assert!(bb.upper > bb.middle && bb.middle > bb.lower);
        assert!(bb.percent_b > 0.8, "percent_b = {}", bb.percent_b);
    }

    #[test]
    fn flat_series_has_centered_percent_b() {
        let prices = vec![100.0; 20];
        let bb = bollinger_bands(&prices, 20, 2.0).expect("enough history");
        assert_eq!(bb.percent_b, 0.5);
        assert_eq!(bb.bandwidth, 0.0);
    }

    #[test]
    fn composite_is_symmetric_for_mirrored_series() {
        let up: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..60).map(|i| 160.0 - i as f64).collect();

        let bullish = analyze("UP", &bars_from_closes(&up)).expect("non-empty");
        let bearish = analyze("DOWN", &bars_from_closes(&down)).expect("non-empty");

        assert_eq!(bullish.signal.direction, Direction::Bullish);
        assert_eq!(bearish.signal.direction, Direction::Bearish);
        assert!(
            (bullish.signal.strength_pct - bearish.signal.strength_pct).abs() < 1e-9,
            "strengths should mirror: {} vs {}",
            bullish.signal.strength_pct,
            bearish.signal.strength_pct
        );
    }

    #[test]
    fn empty_series_yields_no_snapshot() {
        assert!(analyze("AAPL", &[]).is_none());
    }

    #[test]
    fn pivot_levels_bracket_the_pivot() {
        let bars = bars_from_closes(&[100.0, 101.0, 102.0]);
        let snapshot = analyze("AAPL", &bars).expect("non-empty");
        let levels = &snapshot.levels;
        assert!(levels.resistance_2 > levels.resistance_1);
        assert!(levels.resistance_1 > levels.pivot);
        assert!(levels.pivot > levels.support_1);
        assert!(levels.support_1 > levels.support_2);
    }

    #[test]
    fn summary_mentions_signal_and_levels() {
        let bars = bars_from_closes(&(0..60).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let snapshot = analyze("NVDA", &bars).expect("non-empty");
        let text = summary(&snapshot);
        assert!(text.contains("NVDA"));
        assert!(text.contains("Overall Signal: BULLISH"));
        assert!(text.contains("Support:"));
        assert!(text.contains("Resistance:"));
    }
}
