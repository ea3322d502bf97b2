// src/forecast/linear.rs
//! Ordinary least-squares trend candidate. Extrapolated values are clamped
//! non-negative: surge velocity below zero is meaningless for ranking.

use anyhow::bail;
use chrono::{Days, NaiveDate};

use crate::forecast::{ForecastModel, FittedModel};
use crate::timeseries::ols_line;
use crate::types::{ForecastPoint, ModelMetrics};

pub struct LinearTrendModel;

impl ForecastModel for LinearTrendModel {
    fn name(&self) -> &'static str {
        "LinearTrend"
    }

    fn fit(&self, series: &[f64]) -> anyhow::Result<Box<dyn FittedModel>> {
        if series.len() < 2 {
            bail!("linear trend needs at least 2 points, got {}", series.len());
        }
        let (slope, intercept) = ols_line(series);

        let mut abs_err = 0.0;
        let mut sq_err = 0.0;
        for (i, &y) in series.iter().enumerate() {
            let err = y - (intercept + slope * i as f64);
            abs_err += err.abs();
            sq_err += err * err;
        }
        let n = series.len() as f64;

        Ok(Box::new(FittedLinear {
            slope,
            intercept,
            n: series.len(),
            metrics: ModelMetrics {
                mae: abs_err / n,
                mse: sq_err / n,
            },
        }))
    }
}

struct FittedLinear {
    slope: f64,
    intercept: f64,
    n: usize,
    metrics: ModelMetrics,
}

impl FittedModel for FittedLinear {
    fn model_type(&self) -> &'static str {
        "LinearTrend"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({ "slope": self.slope, "intercept": self.intercept })
    }

    fn in_sample_error(&self) -> ModelMetrics {
        self.metrics
    }

    fn forecast(&self, horizon_days: usize, start: NaiveDate) -> Vec<ForecastPoint> {
        (0..horizon_days)
            .map(|i| {
                let value = self.intercept + self.slope * (self.n + i) as f64;
                ForecastPoint::point(start + Days::new(i as u64), value.max(0.0))
            })
            .collect()
    }
}
