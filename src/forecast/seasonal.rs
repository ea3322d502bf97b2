// src/forecast/seasonal.rs
//! # Seasonal Scoring Family
//! Additive decomposition of the velocity series into a linear trend, a
//! weekly day-of-week cycle and a residual. The curve carries 80% intervals
//! from the residual spread, and the surge score is a sigmoid over a
//! weighted signal sum, so it saturates instead of clipping.

use chrono::{Datelike, Days, NaiveDate, Utc};

use crate::config::{PipelineConfig, SeasonalSurgeWeights};
use crate::forecast::ForecastOutcome;
use crate::timeseries::{mean, ols_line, std_dev};
use crate::types::{clamp01, DailyFeatureVector, ForecastPoint, ForecastRecord, ModelFamily, ModelMetrics};

/// 80% interval half-width in residual standard deviations.
const Z_80: f64 = 1.282;

pub struct SeasonalForecaster {
    min_data_points: usize,
    weights: SeasonalSurgeWeights,
}

impl SeasonalForecaster {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            min_data_points: cfg.min_data_points,
            weights: cfg.seasonal_surge_weights,
        }
    }

    pub fn new(min_data_points: usize, weights: SeasonalSurgeWeights) -> Self {
        Self {
            min_data_points,
            weights,
        }
    }

    /// Decompose the topic's velocity series and produce the seasonal-family
    /// record for one horizon.
    pub fn select(&self, features: &[DailyFeatureVector], horizon_days: u32) -> ForecastOutcome {
        if features.len() < self.min_data_points {
            return ForecastOutcome::InsufficientData {
                points: features.len(),
                required: self.min_data_points,
            };
        }

        let series: Vec<f64> = features
            .iter()
            .map(|f| if f.velocity.is_finite() { f.velocity } else { 0.0 })
            .collect();
        let n = series.len();
        let (slope, intercept) = ols_line(&series);

        // Weekly cycle: mean detrended value per weekday, zero where a
        // weekday never occurs in the window.
        let mut cycle_sum = [0.0_f64; 7];
        let mut cycle_count = [0_usize; 7];
        for (i, f) in features.iter().enumerate() {
            let wd = f.date.weekday().num_days_from_monday() as usize;
            cycle_sum[wd] += series[i] - (intercept + slope * i as f64);
            cycle_count[wd] += 1;
        }
        let cycle: Vec<f64> = (0..7)
            .map(|wd| {
                if cycle_count[wd] == 0 {
                    0.0
                } else {
                    cycle_sum[wd] / cycle_count[wd] as f64
                }
            })
            .collect();

        // Residual spread drives the interval width and the fit metrics.
        let mut abs_err = 0.0;
        let mut sq_err = 0.0;
        let mut residuals = Vec::with_capacity(n);
        for (i, f) in features.iter().enumerate() {
            let wd = f.date.weekday().num_days_from_monday() as usize;
            let fitted = intercept + slope * i as f64 + cycle[wd];
            let r = series[i] - fitted;
            abs_err += r.abs();
            sq_err += r * r;
            residuals.push(r);
        }
        let metrics = ModelMetrics {
            mae: abs_err / n as f64,
            mse: sq_err / n as f64,
        };
        let sigma = std_dev(&residuals);

        let start = features
            .last()
            .map(|f| f.date)
            .unwrap_or_else(|| Utc::now().date_naive())
            .checked_add_days(Days::new(1))
            .unwrap_or_else(|| Utc::now().date_naive());
        let curve = forecast_curve(slope, intercept, &cycle, sigma, n, horizon_days, start);

        let confidence = interval_confidence(&curve);
        let surge = seasonal_surge_score(&self.weights, features, confidence);

        ForecastOutcome::Forecast(Box::new(ForecastRecord {
            topic_id: features[0].topic_id.clone(),
            horizon_days,
            model_family: ModelFamily::Seasonal,
            forecast_curve: curve,
            surge_score: surge,
            confidence_score: confidence,
            model_type: "SeasonalDecomposition".to_string(),
            model_params: serde_json::json!({
                "trend_slope": slope,
                "trend_intercept": intercept,
                "weekly_cycle": cycle,
                "residual_sigma": sigma,
            }),
            model_metrics: metrics,
            updated_at: Utc::now(),
        }))
    }
}

fn forecast_curve(
    slope: f64,
    intercept: f64,
    cycle: &[f64],
    sigma: f64,
    n: usize,
    horizon_days: u32,
    start: NaiveDate,
) -> Vec<ForecastPoint> {
    (0..horizon_days as usize)
        .map(|i| {
            let date = start + Days::new(i as u64);
            let wd = date.weekday().num_days_from_monday() as usize;
            let yhat = (intercept + slope * (n + i) as f64 + cycle[wd]).max(0.0);
            ForecastPoint::with_bounds(date, yhat, yhat - Z_80 * sigma, yhat + Z_80 * sigma)
        })
        .collect()
}

/// Narrow intervals relative to the curve level mean a confident fit:
/// `1 - avg_width / (avg_yhat + 1)`, clamped into [0,1].
fn interval_confidence(curve: &[ForecastPoint]) -> f64 {
    if curve.is_empty() {
        return 0.0;
    }
    let n = curve.len() as f64;
    let avg_yhat = curve.iter().map(|p| p.yhat).sum::<f64>() / n;
    let avg_width = curve
        .iter()
        .map(|p| p.yhat_upper.unwrap_or(p.yhat) - p.yhat_lower.unwrap_or(p.yhat))
        .sum::<f64>()
        / n;
    clamp01(1.0 - avg_width / (avg_yhat + 1.0))
}

/// Sigmoid surge over recent velocity growth, the strongest recent spike,
/// mean convergence and the fit confidence.
fn seasonal_surge_score(
    weights: &SeasonalSurgeWeights,
    features: &[DailyFeatureVector],
    confidence: f64,
) -> f64 {
    let recent_start = features.len().saturating_sub(30);
    let recent = &features[recent_start..];
    let (Some(first), Some(last)) = (recent.first(), recent.last()) else {
        return 0.0;
    };

    let velocity_growth = if first.velocity.abs() > 1e-9 {
        (last.velocity - first.velocity) / first.velocity
    } else {
        0.0
    };

    let max_z = recent.iter().map(|f| f.z_spike).fold(f64::MIN, f64::max);
    let z_norm = ((max_z + 2.0) / 4.0).clamp(0.0, 1.0);

    let conv: Vec<f64> = recent.iter().map(|f| f.convergence).collect();
    let convergence = mean(&conv);

    let signal = weights.velocity_growth * velocity_growth
        + weights.z_spike * z_norm
        + weights.convergence * convergence
        + weights.confidence * confidence;

    sigmoid(5.0 * signal)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
