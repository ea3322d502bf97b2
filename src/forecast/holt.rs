// src/forecast/holt.rs
//! Exponential smoothing with an additive trend (Holt's linear method), no
//! seasonal term. Smoothing parameters come from a coarse grid minimizing
//! the one-step-ahead squared error; the curve carries point estimates only.

use anyhow::bail;
use chrono::{Days, NaiveDate};

use crate::forecast::{ForecastModel, FittedModel};
use crate::types::{ForecastPoint, ModelMetrics};

const PARAM_GRID: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

pub struct HoltLinearModel;

impl ForecastModel for HoltLinearModel {
    fn name(&self) -> &'static str {
        "ExponentialSmoothing"
    }

    fn fit(&self, series: &[f64]) -> anyhow::Result<Box<dyn FittedModel>> {
        if series.len() < 3 {
            bail!(
                "exponential smoothing needs at least 3 points, got {}",
                series.len()
            );
        }

        let mut best: Option<FittedHolt> = None;
        for &alpha in &PARAM_GRID {
            for &beta in &PARAM_GRID {
                let candidate = run_holt(series, alpha, beta);
                let better = best
                    .as_ref()
                    .map(|b| candidate.sse < b.sse)
                    .unwrap_or(true);
                if better {
                    best = Some(candidate);
                }
            }
        }

        // Grid is non-empty, so a candidate always exists.
        Ok(Box::new(best.expect("non-empty parameter grid")))
    }
}

/// One smoothing pass with fixed parameters; tracks one-step-ahead errors.
fn run_holt(series: &[f64], alpha: f64, beta: f64) -> FittedHolt {
    let mut level = series[0];
    let mut trend = series[1] - series[0];

    let mut abs_err = 0.0;
    let mut sq_err = 0.0;
    for &y in &series[1..] {
        let pred = level + trend;
        let err = y - pred;
        abs_err += err.abs();
        sq_err += err * err;

        let new_level = alpha * y + (1.0 - alpha) * (level + trend);
        trend = beta * (new_level - level) + (1.0 - beta) * trend;
        level = new_level;
    }
    let n = (series.len() - 1) as f64;

    FittedHolt {
        alpha,
        beta,
        level,
        trend,
        sse: sq_err,
        metrics: ModelMetrics {
            mae: abs_err / n,
            mse: sq_err / n,
        },
    }
}

struct FittedHolt {
    alpha: f64,
    beta: f64,
    level: f64,
    trend: f64,
    sse: f64,
    metrics: ModelMetrics,
}

impl FittedModel for FittedHolt {
    fn model_type(&self) -> &'static str {
        "ExponentialSmoothing"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "alpha": self.alpha, "beta": self.beta })
    }

    fn in_sample_error(&self) -> ModelMetrics {
        self.metrics
    }

    fn forecast(&self, horizon_days: usize, start: NaiveDate) -> Vec<ForecastPoint> {
        (0..horizon_days)
            .map(|i| {
                let value = self.level + (i as f64 + 1.0) * self.trend;
                ForecastPoint::point(start + Days::new(i as u64), value)
            })
            .collect()
    }
}
