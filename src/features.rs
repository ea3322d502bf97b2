//! # Feature Matrix Builder
//! Turns a topic's raw event stream into one `DailyFeatureVector` per
//! calendar day that saw at least one event, within a lookback window.
//!
//! For each day the time-series features are computed over the full prefix
//! up to and including that day and the last element is taken, so
//! early-window edge effects resolve exactly as a live, append-only
//! computation would. Only past data feeds the z-spike (no lookahead).

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use std::collections::BTreeMap;

use crate::store::{EventStore, FeatureStore};
use crate::timeseries::TimeSeriesAnalyzer;
use crate::types::{DailyFeatureVector, SignalEvent, Source};

/// Per-day, per-source tally used while bucketing.
#[derive(Debug, Default, Clone, Copy)]
struct SourceTally {
    count: u32,
    magnitude_sum: f64,
}

/// Builds the daily feature matrix for one topic at a time.
#[derive(Debug, Clone, Copy)]
pub struct FeatureMatrixBuilder {
    analyzer: TimeSeriesAnalyzer,
}

impl FeatureMatrixBuilder {
    pub fn new(analyzer: TimeSeriesAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Pure core: bucket events by `(day, source)` and emit one vector per
    /// event day, in chronological order. Zero events yield zero vectors.
    pub fn build_vectors(&self, topic_id: &str, events: &[SignalEvent]) -> Vec<DailyFeatureVector> {
        let mut days: BTreeMap<NaiveDate, BTreeMap<Source, SourceTally>> = BTreeMap::new();
        for event in events {
            let tally = days
                .entry(event.timestamp.date_naive())
                .or_default()
                .entry(event.source)
                .or_default();
            tally.count += 1;
            tally.magnitude_sum += event.magnitude;
        }

        // Running prefix series, one entry per event day.
        let mut values: Vec<f64> = Vec::with_capacity(days.len());
        let mut source_counts: Vec<Vec<u32>> = vec![Vec::with_capacity(days.len()); Source::ALL.len()];

        let mut vectors = Vec::with_capacity(days.len());
        for (date, tallies) in &days {
            let daily_magnitude: f64 = tallies.values().map(|t| t.magnitude_sum).sum();
            values.push(daily_magnitude);
            for (slot, source) in source_counts.iter_mut().zip(Source::ALL) {
                slot.push(tallies.get(&source).map(|t| t.count).unwrap_or(0));
            }

            let mut vector = DailyFeatureVector::empty(topic_id, *date);
            for (source, tally) in tallies {
                match source {
                    Source::Arxiv => vector.mention_count_arxiv = tally.count,
                    Source::Github => vector.mention_count_github = tally.count,
                    Source::Jobs => vector.mention_count_jobs = tally.count,
                    Source::Funding => vector.mention_count_funding = tally.count,
                }
                vector.mention_count_total += tally.count;
                vector.magnitude_sum += tally.magnitude_sum;
            }
            vector.unique_sources = tallies.len() as u32;

            let (velocity, acceleration, z_spike, convergence) =
                self.prefix_features(&values, &source_counts);
            vector.velocity = velocity;
            vector.acceleration = acceleration;
            vector.z_spike = z_spike;
            vector.convergence = convergence;

            vectors.push(vector);
        }

        vectors
    }

    /// Most recent value of each feature over the current prefix. Fewer than
    /// two days collapse everything to zero.
    fn prefix_features(&self, values: &[f64], source_counts: &[Vec<u32>]) -> (f64, f64, f64, f64) {
        if values.len() < 2 {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let velocity = self.analyzer.velocity(values);
        let acceleration = TimeSeriesAnalyzer::acceleration(&velocity);
        let z_spikes = self.analyzer.z_score_spike(values);
        let convergence = TimeSeriesAnalyzer::convergence(source_counts);

        (
            velocity.last().copied().unwrap_or(0.0),
            acceleration.last().copied().unwrap_or(0.0),
            z_spikes.last().copied().unwrap_or(0.0),
            convergence.last().copied().unwrap_or(0.0),
        )
    }

    /// Build and persist features for one topic within the window starting
    /// at `window_start`. Idempotent: existing rows are reused unless
    /// `force_rebuild`, in which case the window's whole set is replaced.
    /// Returns the number of feature rows live for the window.
    pub async fn build_topic(
        &self,
        events: &dyn EventStore,
        features: &dyn FeatureStore,
        topic_id: &str,
        window_start: NaiveDate,
        force_rebuild: bool,
    ) -> Result<usize> {
        let existing = features.get_features(topic_id, window_start).await?;
        if !existing.is_empty() && !force_rebuild {
            tracing::debug!(topic_id, rows = existing.len(), "features exist, skipping rebuild");
            return Ok(existing.len());
        }

        let since = window_start
            .and_hms_opt(0, 0, 0)
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
            .unwrap_or_else(Utc::now);
        let topic_events = events.list_events(topic_id, since).await?;
        if topic_events.is_empty() {
            tracing::warn!(topic_id, "no events in window, no features built");
            return Ok(0);
        }

        let vectors = self.build_vectors(topic_id, &topic_events);
        let built = vectors.len();
        features.replace_features(topic_id, window_start, vectors).await?;

        counter!("surgecast_features_built_total").increment(built as u64);
        tracing::info!(topic_id, rows = built, "stored feature rows");
        Ok(built)
    }
}

/// Aggregate view of a topic's recent feature rows.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FeatureSummary {
    pub total_mentions: u64,
    pub avg_velocity: f64,
    pub avg_acceleration: f64,
    pub max_z_spike: f64,
    pub avg_convergence: f64,
    pub feature_count: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Summarize ordered feature rows; `None` when there are none.
pub fn summarize_features(features: &[DailyFeatureVector]) -> Option<FeatureSummary> {
    let (first, last) = (features.first()?, features.last()?);
    let n = features.len() as f64;
    Some(FeatureSummary {
        total_mentions: features.iter().map(|f| f.mention_count_total as u64).sum(),
        avg_velocity: features.iter().map(|f| f.velocity).sum::<f64>() / n,
        avg_acceleration: features.iter().map(|f| f.acceleration).sum::<f64>() / n,
        max_z_spike: features.iter().map(|f| f.z_spike).fold(f64::MIN, f64::max),
        avg_convergence: features.iter().map(|f| f.convergence).sum::<f64>() / n,
        feature_count: features.len(),
        start_date: first.date,
        end_date: last.date,
    })
}
