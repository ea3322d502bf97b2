// src/pipeline.rs
//! # Surge Pipeline
//! Orchestrates a batch run: per topic, rebuild the daily feature matrix,
//! fan out over the configured horizons with the active scoring family and
//! persist the winning records, then rank the whole horizon into a
//! leaderboard. Topics run concurrently under a worker limit; one topic
//! failing never aborts the batch.

use anyhow::{Context, Result};
use chrono::{Days, NaiveTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::PipelineConfig;
use crate::features::FeatureMatrixBuilder;
use crate::forecast::seasonal::SeasonalForecaster;
use crate::forecast::{ForecastModelSelector, ForecastOutcome};
use crate::ranker::{self, Alert, EmergingTopic, RankingCandidate, RankingEntry, SurgeRanker};
use crate::store::{EventStore, FeatureStore, ForecastStore};
use crate::timeseries::{SeriesSummary, TimeSeriesAnalyzer};
use crate::types::{ModelFamily, TopicRef};

static METRICS_DESCRIBED: OnceCell<()> = OnceCell::new();

/// The emerging shortlist always looks at the 30-day horizon with a
/// 50-topic candidate pool, whatever horizons the batch is configured for.
const EMERGING_HORIZON_DAYS: u32 = 30;
const EMERGING_POOL: usize = 50;

fn ensure_metrics_described() {
    METRICS_DESCRIBED.get_or_init(|| {
        describe_counter!(
            "surgecast_features_built_total",
            "Daily feature vectors written by rebuilds"
        );
        describe_counter!(
            "surgecast_forecasts_written_total",
            "Forecast records upserted across horizons and families"
        );
        describe_counter!(
            "surgecast_model_fit_failures_total",
            "Candidate model fits that errored and were skipped"
        );
        describe_counter!(
            "surgecast_topics_failed_total",
            "Topics whose batch step ended in an error"
        );
        describe_gauge!(
            "surgecast_last_batch_unix_seconds",
            "Completion time of the most recent batch run"
        );
    });
}

/// One horizon's digest inside a topic's forecast summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ForecastSummary {
    pub surge_score: f64,
    pub confidence_score: f64,
    pub growth_rate: f64,
    pub model_type: String,
    pub updated_at: chrono::DateTime<Utc>,
}

/// What happened to one topic during a batch.
#[derive(Debug, Clone)]
pub struct TopicOutcome {
    pub topic_id: String,
    pub features_built: usize,
    /// Records written, across all horizons.
    pub forecasts_written: usize,
    /// Horizons skipped for a typed reason (insufficient data, no usable fit).
    pub horizons_skipped: usize,
    /// Horizons left as is because a record already existed (unforced runs).
    pub horizons_current: usize,
    pub error: Option<String>,
}

/// Batch-level tallies; per-topic detail stays in `outcomes`.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub topics_processed: usize,
    pub topics_failed: usize,
    pub features_built: usize,
    pub forecasts_written: usize,
    pub outcomes: Vec<TopicOutcome>,
}

#[derive(Clone)]
pub struct SurgePipeline {
    config: PipelineConfig,
    events: Arc<dyn EventStore>,
    features: Arc<dyn FeatureStore>,
    forecasts: Arc<dyn ForecastStore>,
}

impl SurgePipeline {
    pub fn new(
        config: PipelineConfig,
        events: Arc<dyn EventStore>,
        features: Arc<dyn FeatureStore>,
        forecasts: Arc<dyn ForecastStore>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            config,
            events,
            features,
            forecasts,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Feature rebuild plus horizon fan-out for one topic. Existing and not
    /// forced is a no-op per horizon: a live record for `(topic, horizon,
    /// family)` suppresses the refit until `force_rebuild`.
    pub async fn run_topic(&self, topic: &TopicRef, force_rebuild: bool) -> Result<TopicOutcome> {
        let window_start = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(self.config.lookback_days as u64))
            .unwrap_or_else(|| Utc::now().date_naive());

        let builder = FeatureMatrixBuilder::new(TimeSeriesAnalyzer::new(
            self.config.ewma_alpha,
            self.config.z_window,
        ));
        let features_built = builder
            .build_topic(
                self.events.as_ref(),
                self.features.as_ref(),
                &topic.id,
                window_start,
                force_rebuild,
            )
            .await
            .with_context(|| format!("feature build for topic {}", topic.id))?;

        let rows = self.features.get_features(&topic.id, window_start).await?;

        let mut forecasts_written = 0;
        let mut horizons_skipped = 0;
        let mut horizons_current = 0;
        for &horizon in &self.config.forecast_horizons {
            if !force_rebuild {
                let existing = self
                    .forecasts
                    .get_forecast(&topic.id, horizon, Some(self.config.model_family))
                    .await?;
                if existing.is_some() {
                    tracing::debug!(
                        topic_id = %topic.id,
                        horizon,
                        "record already live, refit skipped"
                    );
                    horizons_current += 1;
                    continue;
                }
            }
            let outcome = match self.config.model_family {
                ModelFamily::Baseline => {
                    ForecastModelSelector::from_config(&self.config).select(&rows, horizon)
                }
                ModelFamily::Seasonal => {
                    SeasonalForecaster::from_config(&self.config).select(&rows, horizon)
                }
            };
            match outcome {
                ForecastOutcome::Forecast(record) => {
                    self.forecasts
                        .upsert_forecast(*record)
                        .await
                        .with_context(|| {
                            format!("persist forecast {}/{}d", topic.id, horizon)
                        })?;
                    counter!("surgecast_forecasts_written_total").increment(1);
                    forecasts_written += 1;
                }
                ForecastOutcome::InsufficientData { points, required } => {
                    tracing::info!(
                        topic_id = %topic.id,
                        horizon,
                        points,
                        required,
                        "not enough feature rows, horizon skipped"
                    );
                    horizons_skipped += 1;
                }
                ForecastOutcome::AllModelsFailed => {
                    tracing::warn!(topic_id = %topic.id, horizon, "no usable model fit");
                    horizons_skipped += 1;
                }
            }
        }

        Ok(TopicOutcome {
            topic_id: topic.id.clone(),
            features_built,
            forecasts_written,
            horizons_skipped,
            horizons_current,
            error: None,
        })
    }

    /// Run every topic under the worker limit. Errors are contained per
    /// topic and tallied, never propagated.
    pub async fn run_batch(&self, topics: &[TopicRef], force_rebuild: bool) -> BatchReport {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_limit.max(1)));
        let mut set = JoinSet::new();

        for topic in topics.iter().cloned() {
            let pipeline = self.clone();
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                match pipeline.run_topic(&topic, force_rebuild).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        counter!("surgecast_topics_failed_total").increment(1);
                        tracing::error!(topic_id = %topic.id, error = ?e, "topic run failed");
                        TopicOutcome {
                            topic_id: topic.id,
                            features_built: 0,
                            forecasts_written: 0,
                            horizons_skipped: 0,
                            horizons_current: 0,
                            error: Some(format!("{e:#}")),
                        }
                    }
                }
            });
        }

        let mut report = BatchReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.topics_processed += 1;
                    if outcome.error.is_some() {
                        report.topics_failed += 1;
                    }
                    report.features_built += outcome.features_built;
                    report.forecasts_written += outcome.forecasts_written;
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    report.topics_processed += 1;
                    report.topics_failed += 1;
                    tracing::error!(error = ?e, "topic task panicked");
                }
            }
        }
        report.outcomes.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));

        gauge!("surgecast_last_batch_unix_seconds").set(Utc::now().timestamp() as f64);
        tracing::info!(
            topics = report.topics_processed,
            failed = report.topics_failed,
            features = report.features_built,
            forecasts = report.forecasts_written,
            "batch run finished"
        );
        report
    }

    /// Leaderboard for one horizon under the active family. Topic names come
    /// from `topics`; unknown ids fall back to the id itself.
    pub async fn leaderboard(
        &self,
        topics: &[TopicRef],
        horizon_days: u32,
        limit: usize,
    ) -> Result<Vec<RankingEntry>> {
        let records = self
            .forecasts
            .list_forecasts(horizon_days, self.config.model_family)
            .await?;

        let window_start = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(self.config.lookback_days as u64))
            .unwrap_or_else(|| Utc::now().date_naive());

        let mut candidates = Vec::with_capacity(records.len());
        for record in records {
            let topic = topics
                .iter()
                .find(|t| t.id == record.topic_id)
                .cloned()
                .unwrap_or_else(|| TopicRef {
                    id: record.topic_id.clone(),
                    name: record.topic_id.clone(),
                });
            let recent = self
                .features
                .get_features(&record.topic_id, window_start)
                .await?
                .pop();
            candidates.push(RankingCandidate {
                topic,
                forecast: record,
                recent,
            });
        }

        Ok(SurgeRanker::new(self.config.ranking_weights).rank(candidates, limit))
    }

    /// Emerging-topics shortlist. Ranks its own candidate pool at the fixed
    /// 30-day horizon, 50 deep, independent of whatever leaderboard the
    /// caller displays. Without run history to compare against, every topic
    /// gets the same neutral consistency; a history-aware caller passes its
    /// own via [`ranker::emerging_topics`].
    pub async fn emerging(&self, topics: &[TopicRef]) -> Result<Vec<EmergingTopic>> {
        let pool = self
            .leaderboard(topics, EMERGING_HORIZON_DAYS, EMERGING_POOL)
            .await?;
        Ok(ranker::emerging_topics(
            &pool,
            self.config.emerging_threshold,
            |_| 0.8,
        ))
    }

    pub fn alerts(&self, entries: &[RankingEntry]) -> Vec<Alert> {
        ranker::alerts(entries)
    }

    /// Per-topic digest of the live records under the active family, keyed
    /// `horizon_{n}d`. Horizons without a record are absent.
    pub async fn forecast_summary(
        &self,
        topic_id: &str,
    ) -> Result<BTreeMap<String, ForecastSummary>> {
        let mut out = BTreeMap::new();
        for &horizon in &self.config.forecast_horizons {
            let record = self
                .forecasts
                .get_forecast(topic_id, horizon, Some(self.config.model_family))
                .await?;
            if let Some(record) = record {
                out.insert(
                    format!("horizon_{horizon}d"),
                    ForecastSummary {
                        surge_score: record.surge_score,
                        confidence_score: record.confidence_score,
                        growth_rate: record.growth_rate(),
                        model_type: record.model_type,
                        updated_at: record.updated_at,
                    },
                );
            }
        }
        Ok(out)
    }

    /// Summary statistics over a topic's stored daily magnitude series;
    /// `None` when fewer than two feature rows exist in the window.
    pub async fn topic_summary(&self, topic_id: &str) -> Result<Option<SeriesSummary>> {
        let window_start = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(self.config.lookback_days as u64))
            .unwrap_or_else(|| Utc::now().date_naive());
        let rows = self.features.get_features(topic_id, window_start).await?;
        let values: Vec<f64> = rows.iter().map(|r| r.magnitude_sum).collect();

        let analyzer = TimeSeriesAnalyzer::new(self.config.ewma_alpha, self.config.z_window);
        Ok(analyzer.summarize(&values))
    }

    /// Retention pass: drop feature rows and forecast records older than the
    /// lookback window. Returns `(features_removed, forecasts_removed)`.
    pub async fn cleanup(&self) -> Result<(usize, usize)> {
        let cutoff_date = Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(self.config.lookback_days as u64))
            .unwrap_or_else(|| Utc::now().date_naive());
        let cutoff_ts = cutoff_date
            .and_time(NaiveTime::MIN)
            .and_utc();

        let features_removed = self.features.cleanup_old_features(cutoff_date).await?;
        let forecasts_removed = self.forecasts.cleanup_old_forecasts(cutoff_ts).await?;
        if features_removed + forecasts_removed > 0 {
            tracing::info!(features_removed, forecasts_removed, "retention cleanup done");
        }
        Ok((features_removed, forecasts_removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ForecastStore, MemoryStore};
    use crate::types::{SignalEvent, Source};
    use chrono::{DateTime, Duration as ChronoDuration};

    fn pipeline(store: Arc<MemoryStore>, mut config: PipelineConfig) -> SurgePipeline {
        config.forecast_horizons = vec![30];
        config.arima_grid_budget_ms = 200;
        SurgePipeline::new(config, store.clone(), store.clone(), store)
    }

    fn growing_events(topic: &str, days: i64) -> Vec<SignalEvent> {
        let now = Utc::now();
        let mut events = Vec::new();
        for d in 0..days {
            let ts: DateTime<Utc> = now - ChronoDuration::days(days - d);
            let per_day = 1 + (d / 3) as usize;
            for i in 0..per_day {
                events.push(SignalEvent {
                    topic_id: topic.to_string(),
                    source: if i % 2 == 0 { Source::Github } else { Source::Arxiv },
                    timestamp: ts,
                    magnitude: 1.0,
                });
            }
        }
        events
    }

    #[tokio::test]
    async fn sparse_topic_is_skipped_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        store.seed_events(growing_events("thin", 3)).await;
        let p = pipeline(store, PipelineConfig::default());

        let topic = TopicRef {
            id: "thin".into(),
            name: "Thin Topic".into(),
        };
        let outcome = p.run_topic(&topic, false).await.unwrap();
        assert_eq!(outcome.forecasts_written, 0);
        assert_eq!(outcome.horizons_skipped, 1);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn unforced_rerun_leaves_existing_records_untouched() {
        let store = Arc::new(MemoryStore::new());
        store.seed_events(growing_events("solid", 30)).await;
        let p = pipeline(store.clone(), PipelineConfig::default());
        let topic = TopicRef {
            id: "solid".into(),
            name: "Solid".into(),
        };

        let first = p.run_topic(&topic, false).await.unwrap();
        assert_eq!(first.forecasts_written, 1);
        let stamped = store
            .get_forecast("solid", 30, Some(ModelFamily::Baseline))
            .await
            .unwrap()
            .expect("record after first run");

        // Second unforced run finds the record and leaves it alone.
        let second = p.run_topic(&topic, false).await.unwrap();
        assert_eq!(second.forecasts_written, 0);
        assert_eq!(second.horizons_current, 1);
        let untouched = store
            .get_forecast("solid", 30, Some(ModelFamily::Baseline))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.updated_at, stamped.updated_at);

        // Forcing refits and re-stamps the record.
        let forced = p.run_topic(&topic, true).await.unwrap();
        assert_eq!(forced.forecasts_written, 1);
        assert_eq!(forced.horizons_current, 0);
        let refit = store
            .get_forecast("solid", 30, Some(ModelFamily::Baseline))
            .await
            .unwrap()
            .unwrap();
        assert!(refit.updated_at >= untouched.updated_at);
    }

    #[tokio::test]
    async fn batch_contains_failures_and_keeps_going() {
        let store = Arc::new(MemoryStore::new());
        store.seed_events(growing_events("solid", 30)).await;
        let p = pipeline(store.clone(), PipelineConfig::default());

        let topics = vec![
            TopicRef {
                id: "solid".into(),
                name: "Solid".into(),
            },
            TopicRef {
                id: "ghost".into(),
                name: "No Events".into(),
            },
        ];
        let report = p.run_batch(&topics, false).await;
        assert_eq!(report.topics_processed, 2);
        // A topic without events builds zero features and skips its
        // horizons; that is a typed outcome, not a failure.
        assert_eq!(report.topics_failed, 0);
        assert!(report.forecasts_written >= 1);
        assert!(store.feature_count("solid").await >= 14);
    }

    #[tokio::test]
    async fn leaderboard_reflects_persisted_forecasts() {
        let store = Arc::new(MemoryStore::new());
        store.seed_events(growing_events("alpha", 30)).await;
        store.seed_events(growing_events("beta", 30)).await;
        let p = pipeline(store, PipelineConfig::default());

        let topics = vec![
            TopicRef {
                id: "alpha".into(),
                name: "Alpha".into(),
            },
            TopicRef {
                id: "beta".into(),
                name: "Beta".into(),
            },
        ];
        p.run_batch(&topics, false).await;

        let board = p.leaderboard(&topics, 30, 10).await.unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].rank, 1);
        assert!(board.iter().all(|e| e.ranking_score >= 0.0));
        assert!(board.iter().all(|e| e.topic.name == "Alpha" || e.topic.name == "Beta"));
    }
}
