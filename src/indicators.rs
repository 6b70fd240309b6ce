//! Technical indicators over a cached valuation series.
//!
//! Every function is pure and returns one entry per input value, `None`
//! where the indicator is not yet defined.

use serde::Serialize;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Simple moving average of the `period` values ending at each index.
///
/// Each window is summed on its own, so a date's average does not depend on
/// how much history precedes it.
pub fn moving_average(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            (i + 1 >= period).then(|| {
                values[i + 1 - period..=i].iter().sum::<f64>() / period as f64
            })
        })
        .collect()
}

/// Exponential moving average seeded with the first value, `k = 2 / (n + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let k = 2.0 / (period.max(1) as f64 + 1.0);
    let mut out: Vec<f64> = Vec::with_capacity(values.len());
    for value in values {
        let next = match out.last() {
            Some(prev) => value * k + prev * (1.0 - k),
            None => *value,
        };
        out.push(next);
    }
    out
}

/// Relative strength index with Wilder smoothing. The first value appears at
/// index `period`, once `period` changes are known.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period + 1 {
        return out;
    }

    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: f64| c.max(0.0);
    let loss = |c: f64| (-c).max(0.0);

    let n = period as f64;
    let mut avg_gain = changes[..period].iter().map(|c| gain(*c)).sum::<f64>() / n;
    let mut avg_loss = changes[..period].iter().map(|c| loss(*c)).sum::<f64>() / n;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    for (i, change) in changes.iter().enumerate().skip(period) {
        avg_gain = (avg_gain * (n - 1.0) + gain(*change)) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss(*change)) / n;
        out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Macd {
    pub dif: Vec<Option<f64>>,
    pub dea: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

/// MACD: `dif = ema(fast) - ema(slow)`, `dea = ema(dif, signal)`,
/// `histogram = 2 * (dif - dea)`. Undefined throughout when the series is
/// shorter than `slow`.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Macd {
    if values.len() < slow {
        let empty = vec![None; values.len()];
        return Macd {
            dif: empty.clone(),
            dea: empty.clone(),
            histogram: empty,
        };
    }

    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let dif: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let dea = ema(&dif, signal);
    let histogram = dif.iter().zip(&dea).map(|(d, e)| 2.0 * (d - e)).collect::<Vec<_>>();

    Macd {
        dif: dif.into_iter().map(Some).collect(),
        dea: dea.into_iter().map(Some).collect(),
        histogram: histogram.into_iter().map(Some).collect(),
    }
}

/// Chart overlays for one window of values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub ma5: Vec<Option<f64>>,
    pub ma10: Vec<Option<f64>>,
    pub ma20: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Macd,
}

impl IndicatorSnapshot {
    pub fn compute(values: &[f64]) -> Self {
        Self {
            ma5: moving_average(values, 5),
            ma10: moving_average(values, 10),
            ma20: moving_average(values, 20),
            rsi: rsi(values, RSI_PERIOD),
            macd: macd(values, MACD_FAST, MACD_SLOW, MACD_SIGNAL),
        }
    }
}
