//! # Time Series Analyzer
//! Stateless statistical primitives over dense, ordered daily sequences.
//!
//! Every function here is total: inputs shorter than the required window
//! degrade to all-zero outputs (or an empty result where documented), so
//! downstream aggregation never needs null-checking. Callers are expected
//! to fill missing days with zeros before handing a sequence over.

/// Digest of one topic's daily magnitude series.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SeriesSummary {
    pub total_events: f64,
    pub avg_daily_events: f64,
    pub max_daily_events: f64,
    pub current_velocity: f64,
    pub current_acceleration: f64,
    /// Trailing 3-day moving average at the latest point.
    pub smoothed_latest: f64,
    /// R^2 of a linear fit: how much of the series a straight trend explains.
    pub trend_strength: f64,
    pub avg_volatility: f64,
    /// Indices whose absolute z-score exceeded 2.0.
    pub change_point_count: usize,
}

/// Statistical primitives with a fixed smoothing factor and z-score window.
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesAnalyzer {
    /// EWMA smoothing factor: each new point weighted `alpha`, history `1 - alpha`.
    pub alpha: f64,
    /// Trailing window for the z-score spike detector.
    pub z_window: usize,
}

impl Default for TimeSeriesAnalyzer {
    fn default() -> Self {
        Self {
            alpha: 0.3,
            z_window: 7,
        }
    }
}

impl TimeSeriesAnalyzer {
    pub fn new(alpha: f64, z_window: usize) -> Self {
        Self { alpha, z_window }
    }

    /// Rate of change of the EWMA-smoothed sequence. Same length as the
    /// input; the first element has no prior point and is always 0.
    pub fn velocity(&self, values: &[f64]) -> Vec<f64> {
        if values.len() < 2 {
            return vec![0.0; values.len()];
        }

        let mut ewma = Vec::with_capacity(values.len());
        let mut prev = values[0];
        ewma.push(prev);
        for &v in &values[1..] {
            prev = self.alpha * v + (1.0 - self.alpha) * prev;
            ewma.push(prev);
        }

        let mut velocity = Vec::with_capacity(values.len());
        velocity.push(0.0);
        for i in 1..ewma.len() {
            velocity.push(ewma[i] - ewma[i - 1]);
        }
        velocity
    }

    /// First difference of a velocity sequence; first element 0.
    pub fn acceleration(velocity: &[f64]) -> Vec<f64> {
        if velocity.len() < 2 {
            return vec![0.0; velocity.len()];
        }
        let mut acc = Vec::with_capacity(velocity.len());
        acc.push(0.0);
        for i in 1..velocity.len() {
            acc.push(velocity[i] - velocity[i - 1]);
        }
        acc
    }

    /// Leading-window anomaly score: `(v[i] - mean) / std` over the trailing
    /// `z_window` values *excluding* the current point. Indices before a full
    /// window return 0. A zero-variance window scores 0 when the current
    /// value matches it and falls back to a unit std otherwise, so a spike
    /// out of a perfectly flat stretch is still flagged. Uses only past
    /// data, never the current or future value.
    pub fn z_score_spike(&self, values: &[f64]) -> Vec<f64> {
        self.z_score_spike_with(values, self.z_window)
    }

    pub fn z_score_spike_with(&self, values: &[f64], window: usize) -> Vec<f64> {
        if window == 0 || values.len() < window {
            return vec![0.0; values.len()];
        }

        let mut scores = Vec::with_capacity(values.len());
        for i in 0..values.len() {
            if i < window {
                scores.push(0.0);
                continue;
            }
            let past = &values[i - window..i];
            let mean = mean(past);
            let std = std_dev(past);
            let effective_std = if std == 0.0 { 1.0 } else { std };
            scores.push((values[i] - mean) / effective_std);
        }
        scores
    }

    /// Fraction of sources with a strictly positive count at each index.
    /// All sequences are truncated to the shortest one before indexing;
    /// an empty source set yields an empty result.
    pub fn convergence(per_source_counts: &[Vec<u32>]) -> Vec<f64> {
        if per_source_counts.is_empty() {
            return Vec::new();
        }
        let min_len = per_source_counts
            .iter()
            .map(|c| c.len())
            .min()
            .unwrap_or(0);
        let total = per_source_counts.len() as f64;

        (0..min_len)
            .map(|i| {
                let active = per_source_counts.iter().filter(|c| c[i] > 0).count();
                active as f64 / total
            })
            .collect()
    }

    /// Indices where the absolute z-score spike exceeds `threshold`.
    pub fn change_points(&self, values: &[f64], threshold: f64) -> Vec<usize> {
        if values.len() < 3 {
            return Vec::new();
        }
        self.z_score_spike(values)
            .iter()
            .enumerate()
            .filter(|(_, z)| z.abs() > threshold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Trailing moving average. Before a full window is available, averages
    /// all prior points including the current one.
    pub fn smooth(values: &[f64], window: usize) -> Vec<f64> {
        if window == 0 || values.len() < window {
            return values.to_vec();
        }
        (0..values.len())
            .map(|i| {
                if i + 1 < window {
                    mean(&values[..=i])
                } else {
                    mean(&values[i + 1 - window..=i])
                }
            })
            .collect()
    }

    /// Coefficient of determination (R^2) of an ordinary least-squares line
    /// fit against the index. Exactly 0 for constant or too-short series.
    pub fn trend_strength(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let (slope, intercept) = ols_line(values);
        let y_mean = mean(values);

        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for (i, &y) in values.iter().enumerate() {
            let pred = intercept + slope * i as f64;
            ss_res += (y - pred) * (y - pred);
            ss_tot += (y - y_mean) * (y - y_mean);
        }

        if ss_tot == 0.0 {
            0.0
        } else {
            1.0 - ss_res / ss_tot
        }
    }

    /// Summary statistics over a daily magnitude series; `None` for fewer
    /// than two points.
    pub fn summarize(&self, values: &[f64]) -> Option<SeriesSummary> {
        if values.len() < 2 {
            return None;
        }
        let velocity = self.velocity(values);
        let acceleration = Self::acceleration(&velocity);
        let volatility = Self::volatility(values, self.z_window);
        let smoothed = Self::smooth(values, 3);

        Some(SeriesSummary {
            total_events: values.iter().sum(),
            avg_daily_events: mean(values),
            max_daily_events: values.iter().copied().fold(f64::MIN, f64::max),
            current_velocity: velocity.last().copied().unwrap_or(0.0),
            current_acceleration: acceleration.last().copied().unwrap_or(0.0),
            smoothed_latest: smoothed.last().copied().unwrap_or(0.0),
            trend_strength: Self::trend_strength(values),
            avg_volatility: mean(&volatility),
            change_point_count: self.change_points(values, 2.0).len(),
        })
    }

    /// Trailing-window standard deviation; 0 for indices before a full
    /// window exists, and all zeros for inputs shorter than the window.
    pub fn volatility(values: &[f64], window: usize) -> Vec<f64> {
        if window == 0 || values.len() < window {
            return vec![0.0; values.len()];
        }
        (0..values.len())
            .map(|i| {
                if i + 1 < window {
                    0.0
                } else {
                    std_dev(&values[i + 1 - window..=i])
                }
            })
            .collect()
    }
}

/// Arithmetic mean; 0 on empty input.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation; 0 on empty input.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Ordinary least-squares line against the index: returns (slope, intercept).
/// Assumes `values.len() >= 2`.
pub(crate) fn ols_line(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    let slope = if sxx == 0.0 { 0.0 } else { sxy / sxx };
    (slope, y_mean - slope * x_mean)
}
