// tests/forecast_selection.rs
// Selection contract: the winning record's in-sample MAE is never worse
// than any individual candidate's, curves have the requested length, and
// the bounded scores hold under rough data.

use chrono::{Days, NaiveDate};

use surgecast::config::SurgeWeights;
use surgecast::forecast::linear::LinearTrendModel;
use surgecast::forecast::{ForecastModel, ForecastModelSelector, ForecastOutcome};
use surgecast::types::DailyFeatureVector;

fn feature_rows(velocities: &[f64]) -> Vec<DailyFeatureVector> {
    let start = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
    velocities
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let mut f = DailyFeatureVector::empty("topic", start + Days::new(i as u64));
            f.velocity = v;
            f.acceleration = if i > 0 { v - velocities[i - 1] } else { 0.0 };
            f.convergence = 0.5;
            f
        })
        .collect()
}

fn noisy_trend(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 1.0 + i as f64 * 0.4 + ((i as f64) * 1.3).sin() * 0.6)
        .collect()
}

#[test]
fn winner_is_at_least_as_good_as_the_linear_candidate() {
    let velocities = noisy_trend(40);
    let rows = feature_rows(&velocities);

    let selector = ForecastModelSelector::from_config(&surgecast::PipelineConfig::default());
    let record = selector.select(&rows, 30).record().expect("forecast");

    let linear_mae = LinearTrendModel
        .fit(&velocities)
        .expect("linear fit")
        .in_sample_error()
        .mae;
    assert!(
        record.model_metrics.mae <= linear_mae + 1e-9,
        "selected {} with mae {} but plain linear scores {}",
        record.model_type,
        record.model_metrics.mae,
        linear_mae
    );
}

#[test]
fn record_shape_and_bounds() {
    let rows = feature_rows(&noisy_trend(30));
    let selector = ForecastModelSelector::from_config(&surgecast::PipelineConfig::default());

    for horizon in [30_u32, 90, 180] {
        let record = selector.select(&rows, horizon).record().expect("forecast");
        assert_eq!(record.forecast_curve.len(), horizon as usize);
        assert_eq!(record.horizon_days, horizon);
        assert!((0.0..=1.0).contains(&record.surge_score), "surge bounded");
        assert!(
            (0.0..=1.0).contains(&record.confidence_score),
            "confidence bounded"
        );
        // Curve starts the day after the last feature row.
        let last_feature = rows.last().unwrap().date;
        assert_eq!(
            record.forecast_curve[0].date,
            last_feature + Days::new(1)
        );
        // Dates are consecutive.
        assert!(record
            .forecast_curve
            .windows(2)
            .all(|w| w[1].date == w[0].date + Days::new(1)));
    }
}

#[test]
fn nan_velocities_are_treated_as_zero_not_poison() {
    let mut rows = feature_rows(&noisy_trend(20));
    rows[4].velocity = f64::NAN;
    rows[11].velocity = f64::INFINITY;

    let selector = ForecastModelSelector::from_config(&surgecast::PipelineConfig::default());
    let record = selector.select(&rows, 30).record().expect("forecast");
    assert!(record.model_metrics.mae.is_finite());
    assert!(record.surge_score.is_finite());
    assert!(record
        .forecast_curve
        .iter()
        .all(|p| p.yhat.is_finite()));
}

#[test]
fn selector_with_only_failing_candidates_reports_typed_outcome() {
    struct Broken;
    impl ForecastModel for Broken {
        fn name(&self) -> &'static str {
            "Broken"
        }
        fn fit(
            &self,
            _: &[f64],
        ) -> anyhow::Result<Box<dyn surgecast::forecast::FittedModel>> {
            anyhow::bail!("no fit")
        }
    }

    let selector =
        ForecastModelSelector::with_models(14, SurgeWeights::default(), vec![Box::new(Broken)]);
    assert!(matches!(
        selector.select(&feature_rows(&noisy_trend(20)), 30),
        ForecastOutcome::AllModelsFailed
    ));
}
