// src/types.rs
//! Core domain records shared across the pipeline: signal events, daily
//! feature vectors, forecast records and the ephemeral ranking inputs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of signal sources the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Arxiv,
    Github,
    Jobs,
    Funding,
}

impl Source {
    /// All known sources, in a stable order.
    pub const ALL: [Source; 4] = [Source::Arxiv, Source::Github, Source::Jobs, Source::Funding];
}

/// One raw observation attached to a topic. Immutable once ingested;
/// many events per topic per day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub topic_id: String,
    pub source: Source,
    pub timestamp: DateTime<Utc>,
    /// Source-specific magnitude (stars, citations, posting count, ...); >= 0.
    pub magnitude: f64,
}

/// Minimal topic handle the pipeline carries around. The full topic record
/// (keywords, descriptions) lives with the event-store collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRef {
    pub id: String,
    pub name: String,
}

impl TopicRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One feature row per `(topic, date)`, built over days that saw at least
/// one event. `mention_count_total` always equals the sum of the per-source
/// counts and `unique_sources <= 4`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFeatureVector {
    pub topic_id: String,
    pub date: NaiveDate,

    // Count metrics
    pub mention_count_total: u32,
    pub mention_count_arxiv: u32,
    pub mention_count_github: u32,
    pub mention_count_jobs: u32,
    pub mention_count_funding: u32,

    // Magnitude / breadth
    pub magnitude_sum: f64,
    pub unique_sources: u32,

    // Time-series features (most recent value of the prefix window)
    pub velocity: f64,
    pub acceleration: f64,
    pub z_spike: f64,
    pub convergence: f64,
}

impl DailyFeatureVector {
    /// Zeroed vector for a topic/date, used as the base before filling counts.
    pub fn empty(topic_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            topic_id: topic_id.into(),
            date,
            mention_count_total: 0,
            mention_count_arxiv: 0,
            mention_count_github: 0,
            mention_count_jobs: 0,
            mention_count_funding: 0,
            magnitude_sum: 0.0,
            unique_sources: 0,
            velocity: 0.0,
            acceleration: 0.0,
            z_spike: 0.0,
            convergence: 0.0,
        }
    }

    pub fn source_count(&self, source: Source) -> u32 {
        match source {
            Source::Arxiv => self.mention_count_arxiv,
            Source::Github => self.mention_count_github,
            Source::Jobs => self.mention_count_jobs,
            Source::Funding => self.mention_count_funding,
        }
    }
}

/// Which scoring family produced a forecast. The two families compute surge
/// differently (linear weighted sum vs sigmoid) and are kept distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Baseline,
    Seasonal,
}

/// A single point of a forecast curve. Bounds are present only for models
/// that produce prediction intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub yhat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yhat_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yhat_upper: Option<f64>,
}

impl ForecastPoint {
    pub fn point(date: NaiveDate, yhat: f64) -> Self {
        Self {
            date,
            yhat,
            yhat_lower: None,
            yhat_upper: None,
        }
    }

    pub fn with_bounds(date: NaiveDate, yhat: f64, lower: f64, upper: f64) -> Self {
        Self {
            date,
            yhat,
            yhat_lower: Some(lower),
            yhat_upper: Some(upper),
        }
    }
}

/// In-sample fit quality of the winning model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelMetrics {
    pub mae: f64,
    pub mse: f64,
}

/// The persisted outcome of one model selection, keyed by
/// `(topic_id, horizon_days, model_family)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    pub topic_id: String,
    pub horizon_days: u32,
    pub model_family: ModelFamily,
    /// Ordered forecast curve; length always equals `horizon_days`.
    pub forecast_curve: Vec<ForecastPoint>,
    /// Bounded [0,1] composite surge indicator.
    pub surge_score: f64,
    /// Bounded [0,1] fit confidence.
    pub confidence_score: f64,
    pub model_type: String,
    pub model_params: serde_json::Value,
    pub model_metrics: ModelMetrics,
    pub updated_at: DateTime<Utc>,
}

impl ForecastRecord {
    /// Projected growth over the curve, derived from its first and last
    /// points rather than stored redundantly.
    pub fn growth_rate(&self) -> f64 {
        match (self.forecast_curve.first(), self.forecast_curve.last()) {
            (Some(first), Some(last)) if self.forecast_curve.len() > 1 => {
                (last.yhat - first.yhat) / (first.yhat + 1e-6)
            }
            _ => 0.0,
        }
    }
}

/// Clamp to [0.0, 1.0].
pub(crate) fn clamp01(x: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else if x > 1.0 {
        1.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn growth_rate_from_curve_endpoints() {
        let rec = ForecastRecord {
            topic_id: "t1".into(),
            horizon_days: 3,
            model_family: ModelFamily::Baseline,
            forecast_curve: vec![
                ForecastPoint::point(d("2025-01-01"), 2.0),
                ForecastPoint::point(d("2025-01-02"), 3.0),
                ForecastPoint::point(d("2025-01-03"), 4.0),
            ],
            surge_score: 0.5,
            confidence_score: 0.5,
            model_type: "LinearTrend".into(),
            model_params: serde_json::json!({}),
            model_metrics: ModelMetrics::default(),
            updated_at: Utc::now(),
        };
        assert!((rec.growth_rate() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn growth_rate_degenerate_curves() {
        let mut rec = ForecastRecord {
            topic_id: "t1".into(),
            horizon_days: 0,
            model_family: ModelFamily::Baseline,
            forecast_curve: vec![],
            surge_score: 0.0,
            confidence_score: 0.0,
            model_type: "LinearTrend".into(),
            model_params: serde_json::json!({}),
            model_metrics: ModelMetrics::default(),
            updated_at: Utc::now(),
        };
        assert_eq!(rec.growth_rate(), 0.0);
        rec.forecast_curve = vec![ForecastPoint::point(d("2025-01-01"), 5.0)];
        assert_eq!(rec.growth_rate(), 0.0);
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Source::Arxiv).unwrap(), "\"arxiv\"");
        assert_eq!(
            serde_json::from_str::<Source>("\"funding\"").unwrap(),
            Source::Funding
        );
    }
}
