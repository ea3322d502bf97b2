//! # Forecast Model Selector
//! Fits competing forecast models over a topic's velocity series, picks the
//! best by in-sample error and derives the bounded surge score.
//!
//! Candidates implement the [`ForecastModel`] capability and are tried in a
//! fixed order {autoregressive, exponential-smoothing, linear-trend}; the
//! lowest MAE wins with strict improvement only, so selection stays
//! deterministic. A candidate failing its numerical fit is skipped, never
//! fatal; all candidates failing is a typed "no forecast", not an error.

pub mod arima;
pub mod holt;
pub mod linear;
pub mod seasonal;

use chrono::{Days, NaiveDate, Utc};
use metrics::counter;
use std::time::Duration;

use crate::config::{PipelineConfig, SurgeWeights};
use crate::timeseries::{mean, std_dev};
use crate::types::{
    clamp01, DailyFeatureVector, ForecastPoint, ForecastRecord, ModelFamily, ModelMetrics,
};

/// A forecast model candidate: fitting may fail, in which case the selector
/// moves on to the next candidate.
pub trait ForecastModel: Send + Sync {
    fn name(&self) -> &'static str;
    fn fit(&self, series: &[f64]) -> anyhow::Result<Box<dyn FittedModel>>;
}

/// A fitted model, able to extend its curve forward and report fit quality.
pub trait FittedModel: Send {
    fn model_type(&self) -> &'static str;
    fn params(&self) -> serde_json::Value;
    fn in_sample_error(&self) -> ModelMetrics;
    /// Curve of exactly `horizon_days` future points starting at `start`.
    fn forecast(&self, horizon_days: usize, start: NaiveDate) -> Vec<ForecastPoint>;
}

/// Typed outcome of one selection run. The first two non-forecast variants
/// are expected conditions, not errors; batch callers tally them as zero.
#[derive(Debug)]
pub enum ForecastOutcome {
    Forecast(Box<ForecastRecord>),
    InsufficientData { points: usize, required: usize },
    AllModelsFailed,
}

impl ForecastOutcome {
    pub fn record(self) -> Option<ForecastRecord> {
        match self {
            ForecastOutcome::Forecast(rec) => Some(*rec),
            _ => None,
        }
    }
}

/// Selects among the baseline candidate family and scores the result.
pub struct ForecastModelSelector {
    min_data_points: usize,
    surge_weights: SurgeWeights,
    models: Vec<Box<dyn ForecastModel>>,
}

impl ForecastModelSelector {
    /// Candidate set and options from the pipeline configuration.
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self::with_models(
            cfg.min_data_points,
            cfg.surge_weights,
            vec![
                Box::new(arima::AutoregressiveModel::new(Duration::from_millis(
                    cfg.arima_grid_budget_ms,
                ))),
                Box::new(holt::HoltLinearModel),
                Box::new(linear::LinearTrendModel),
            ],
        )
    }

    /// Explicit candidate list, mainly for tests.
    pub fn with_models(
        min_data_points: usize,
        surge_weights: SurgeWeights,
        models: Vec<Box<dyn ForecastModel>>,
    ) -> Self {
        Self {
            min_data_points,
            surge_weights,
            models,
        }
    }

    /// Fit every candidate on the topic's velocity series and keep the best.
    pub fn select(&self, features: &[DailyFeatureVector], horizon_days: u32) -> ForecastOutcome {
        if features.len() < self.min_data_points {
            return ForecastOutcome::InsufficientData {
                points: features.len(),
                required: self.min_data_points,
            };
        }

        // Velocity is the primary series; gaps and NaNs become zeros.
        let series: Vec<f64> = features
            .iter()
            .map(|f| if f.velocity.is_finite() { f.velocity } else { 0.0 })
            .collect();

        let mut best: Option<Box<dyn FittedModel>> = None;
        for model in &self.models {
            match model.fit(&series) {
                Ok(fitted) => {
                    let improves = best
                        .as_ref()
                        .map(|b| fitted.in_sample_error().mae < b.in_sample_error().mae)
                        .unwrap_or(true);
                    if improves {
                        best = Some(fitted);
                    }
                }
                Err(e) => {
                    counter!("surgecast_model_fit_failures_total").increment(1);
                    tracing::warn!(model = model.name(), error = %e, "candidate fit failed");
                }
            }
        }

        let Some(fitted) = best else {
            tracing::error!("all forecasting candidates failed");
            return ForecastOutcome::AllModelsFailed;
        };

        let topic_id = features[0].topic_id.clone();
        let start = features
            .last()
            .map(|f| f.date)
            .unwrap_or_else(|| Utc::now().date_naive())
            .checked_add_days(Days::new(1))
            .unwrap_or_else(|| Utc::now().date_naive());

        let curve = fitted.forecast(horizon_days as usize, start);
        let metrics = fitted.in_sample_error();
        let confidence = confidence_score(metrics.mae, &series);
        let surge = baseline_surge_score(&self.surge_weights, features, &curve);

        ForecastOutcome::Forecast(Box::new(ForecastRecord {
            topic_id,
            horizon_days,
            model_family: ModelFamily::Baseline,
            forecast_curve: curve,
            surge_score: surge,
            confidence_score: confidence,
            model_type: fitted.model_type().to_string(),
            model_params: fitted.params(),
            model_metrics: metrics,
            updated_at: Utc::now(),
        }))
    }
}

/// `max(0, 1 - mae/std(series))`, clamped; 0 for a zero-variance series.
pub(crate) fn confidence_score(mae: f64, series: &[f64]) -> f64 {
    let std = std_dev(series);
    if std == 0.0 {
        0.0
    } else {
        clamp01(1.0 - mae / std)
    }
}

/// Baseline (linear weighted sum) surge score from the last 7 feature days
/// and the winning curve. Always clamped into [0,1].
pub(crate) fn baseline_surge_score(
    weights: &SurgeWeights,
    features: &[DailyFeatureVector],
    curve: &[ForecastPoint],
) -> f64 {
    let recent_start = features.len().saturating_sub(7);
    let recent = &features[recent_start..];
    let Some(last) = recent.last() else {
        return 0.0;
    };

    // 30-day-ahead velocity growth; no growth delta on shorter curves.
    let current_velocity = last.velocity;
    let future_velocity = curve
        .get(29)
        .map(|p| p.yhat)
        .unwrap_or(current_velocity);
    let velocity_growth = (future_velocity - current_velocity) / current_velocity.max(0.001);

    // Momentum counts only positive mean acceleration.
    let accel: Vec<f64> = recent.iter().map(|f| f.acceleration).collect();
    let momentum = mean(&accel).max(0.0);

    // Only spikes past two standard deviations contribute.
    let max_z = recent.iter().map(|f| f.z_spike).fold(f64::MIN, f64::max);
    let z_component = (max_z - 2.0).max(0.0);

    let conv: Vec<f64> = recent.iter().map(|f| f.convergence).collect();
    let convergence_term = mean(&conv);

    let mut surge = weights.velocity_growth * velocity_growth
        + weights.momentum * momentum
        + weights.z_spike * z_component
        + weights.convergence * convergence_term;

    if convergence_term > 0.5 {
        surge *= 1.2;
    }

    clamp01(surge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn feature(day: u32, velocity: f64, accel: f64, z: f64, conv: f64) -> DailyFeatureVector {
        let mut f = DailyFeatureVector::empty(
            "t1",
            NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
        );
        f.velocity = velocity;
        f.acceleration = accel;
        f.z_spike = z;
        f.convergence = conv;
        f
    }

    fn features(n: usize) -> Vec<DailyFeatureVector> {
        (0..n)
            .map(|i| feature(1 + i as u32, 1.0 + i as f64 * 0.2, 0.1, 0.5, 0.5))
            .collect()
    }

    #[test]
    fn insufficient_data_is_typed_not_an_error() {
        let selector = ForecastModelSelector::with_models(
            14,
            SurgeWeights::default(),
            vec![Box::new(linear::LinearTrendModel)],
        );
        match selector.select(&features(5), 30) {
            ForecastOutcome::InsufficientData { points, required } => {
                assert_eq!(points, 5);
                assert_eq!(required, 14);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn failing_candidate_does_not_disqualify_others() {
        struct AlwaysFails;
        impl ForecastModel for AlwaysFails {
            fn name(&self) -> &'static str {
                "AlwaysFails"
            }
            fn fit(&self, _: &[f64]) -> anyhow::Result<Box<dyn FittedModel>> {
                anyhow::bail!("singular matrix")
            }
        }

        let selector = ForecastModelSelector::with_models(
            14,
            SurgeWeights::default(),
            vec![Box::new(AlwaysFails), Box::new(linear::LinearTrendModel)],
        );
        let rec = selector.select(&features(20), 30).record().expect("forecast");
        assert_eq!(rec.model_type, "LinearTrend");
        assert_eq!(rec.forecast_curve.len(), 30);
    }

    #[test]
    fn all_candidates_failing_yields_typed_no_result() {
        struct AlwaysFails;
        impl ForecastModel for AlwaysFails {
            fn name(&self) -> &'static str {
                "AlwaysFails"
            }
            fn fit(&self, _: &[f64]) -> anyhow::Result<Box<dyn FittedModel>> {
                anyhow::bail!("nope")
            }
        }
        let selector = ForecastModelSelector::with_models(
            14,
            SurgeWeights::default(),
            vec![Box::new(AlwaysFails)],
        );
        assert!(matches!(
            selector.select(&features(20), 30),
            ForecastOutcome::AllModelsFailed
        ));
    }

    #[test]
    fn surge_score_clamped_under_adversarial_weights() {
        let weights = SurgeWeights {
            velocity_growth: 100.0,
            momentum: -50.0,
            z_spike: 100.0,
            convergence: -100.0,
        };
        let rows = features(20);
        let curve: Vec<ForecastPoint> = (0..30)
            .map(|i| {
                ForecastPoint::point(
                    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap() + Days::new(i),
                    1_000.0,
                )
            })
            .collect();
        let s = baseline_surge_score(&weights, &rows, &curve);
        assert!((0.0..=1.0).contains(&s), "surge {} out of bounds", s);

        let negative = SurgeWeights {
            velocity_growth: -10.0,
            momentum: -10.0,
            z_spike: -10.0,
            convergence: -10.0,
        };
        let s2 = baseline_surge_score(&negative, &rows, &curve);
        assert_eq!(s2, 0.0);
    }

    #[test]
    fn short_curve_means_zero_growth_delta() {
        // 7-point curve: future velocity falls back to the current one.
        let rows = features(20);
        let flat_weights = SurgeWeights {
            velocity_growth: 1.0,
            momentum: 0.0,
            z_spike: 0.0,
            convergence: 0.0,
        };
        let curve: Vec<ForecastPoint> = (0..7)
            .map(|i| {
                ForecastPoint::point(
                    NaiveDate::from_ymd_opt(2025, 7, 1).unwrap() + Days::new(i),
                    99.0,
                )
            })
            .collect();
        let s = baseline_surge_score(&flat_weights, &rows, &curve);
        assert_eq!(s, 0.0, "no 30-day point, so growth term must vanish");
    }

    #[test]
    fn confidence_zero_for_flat_series() {
        assert_eq!(confidence_score(0.5, &[2.0, 2.0, 2.0]), 0.0);
        let varied = [1.0, 5.0, 2.0, 8.0];
        let c = confidence_score(0.1, &varied);
        assert!((0.0..=1.0).contains(&c) && c > 0.9);
    }
}
