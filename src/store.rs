//! # Store Contracts
//! Abstract load/save seams between the pipeline and its collaborators.
//! The pipeline owns feature/forecast derivation; event ingestion and
//! storage policy live behind these traits. An in-memory implementation
//! ships for tests and the demo binary.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::{DailyFeatureVector, ForecastRecord, ModelFamily, SignalEvent};

/// Supplies, per topic, an ordered sequence of raw observations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events for a topic on or after `since`, ordered by timestamp.
    async fn list_events(&self, topic_id: &str, since: DateTime<Utc>) -> Result<Vec<SignalEvent>>;
}

/// Persists daily feature vectors.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    /// Feature rows for a topic on or after `since`, ordered by date.
    async fn get_features(&self, topic_id: &str, since: NaiveDate)
        -> Result<Vec<DailyFeatureVector>>;

    /// Replace the topic's rows within the window starting at `since` with
    /// `vectors`, all-or-nothing. Old rows absent from the new set are gone.
    async fn replace_features(
        &self,
        topic_id: &str,
        since: NaiveDate,
        vectors: Vec<DailyFeatureVector>,
    ) -> Result<()>;

    /// Retention hook: drop rows older than `cutoff`, returning the count.
    async fn cleanup_old_features(&self, cutoff: NaiveDate) -> Result<usize>;
}

/// Persists forecast records keyed by `(topic_id, horizon_days, model_family)`.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// The live record for a key, if any. With `family == None`, any family
    /// for the `(topic, horizon)` pair qualifies.
    async fn get_forecast(
        &self,
        topic_id: &str,
        horizon_days: u32,
        family: Option<ModelFamily>,
    ) -> Result<Option<ForecastRecord>>;

    /// Forecasts for a whole horizon, across topics (ranking input).
    async fn list_forecasts(&self, horizon_days: u32, family: ModelFamily)
        -> Result<Vec<ForecastRecord>>;

    /// Insert or overwrite the record for its key. Single-writer per key;
    /// a concurrent overwrite is last-write-wins, never a partial merge.
    async fn upsert_forecast(&self, record: ForecastRecord) -> Result<()>;

    /// Retention hook: drop records not updated since `cutoff`.
    async fn cleanup_old_forecasts(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

type ForecastKey = (String, u32, ModelFamily);

/// In-memory store backing all three contracts. Suitable for tests and the
/// demo binary; a real deployment plugs a database-backed implementation in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<Vec<SignalEvent>>,
    features: RwLock<HashMap<String, Vec<DailyFeatureVector>>>,
    forecasts: RwLock<HashMap<ForecastKey, ForecastRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw events (ingestion is the collaborator's job; tests use this).
    pub async fn seed_events(&self, mut events: Vec<SignalEvent>) {
        events.sort_by_key(|e| e.timestamp);
        self.events.write().await.extend(events);
    }

    pub async fn feature_count(&self, topic_id: &str) -> usize {
        self.features
            .read()
            .await
            .get(topic_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn list_events(&self, topic_id: &str, since: DateTime<Utc>) -> Result<Vec<SignalEvent>> {
        let events = self.events.read().await;
        let mut out: Vec<_> = events
            .iter()
            .filter(|e| e.topic_id == topic_id && e.timestamp >= since)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn get_features(
        &self,
        topic_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<DailyFeatureVector>> {
        let features = self.features.read().await;
        let mut rows: Vec<_> = features
            .get(topic_id)
            .map(|v| v.iter().filter(|f| f.date >= since).cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|f| f.date);
        Ok(rows)
    }

    async fn replace_features(
        &self,
        topic_id: &str,
        since: NaiveDate,
        vectors: Vec<DailyFeatureVector>,
    ) -> Result<()> {
        let mut features = self.features.write().await;
        let rows = features.entry(topic_id.to_string()).or_default();
        rows.retain(|f| f.date < since);
        rows.extend(vectors);
        rows.sort_by_key(|f| f.date);
        Ok(())
    }

    async fn cleanup_old_features(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut features = self.features.write().await;
        let mut removed = 0;
        for rows in features.values_mut() {
            let before = rows.len();
            rows.retain(|f| f.date >= cutoff);
            removed += before - rows.len();
        }
        Ok(removed)
    }
}

#[async_trait]
impl ForecastStore for MemoryStore {
    async fn get_forecast(
        &self,
        topic_id: &str,
        horizon_days: u32,
        family: Option<ModelFamily>,
    ) -> Result<Option<ForecastRecord>> {
        let forecasts = self.forecasts.read().await;
        Ok(match family {
            Some(f) => forecasts
                .get(&(topic_id.to_string(), horizon_days, f))
                .cloned(),
            None => forecasts
                .iter()
                .find(|((t, h, _), _)| t == topic_id && *h == horizon_days)
                .map(|(_, r)| r.clone()),
        })
    }

    async fn list_forecasts(
        &self,
        horizon_days: u32,
        family: ModelFamily,
    ) -> Result<Vec<ForecastRecord>> {
        let forecasts = self.forecasts.read().await;
        let mut out: Vec<_> = forecasts
            .values()
            .filter(|r| r.horizon_days == horizon_days && r.model_family == family)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.topic_id.cmp(&b.topic_id));
        Ok(out)
    }

    async fn upsert_forecast(&self, record: ForecastRecord) -> Result<()> {
        let key = (
            record.topic_id.clone(),
            record.horizon_days,
            record.model_family,
        );
        let mut forecasts = self.forecasts.write().await;
        if let Some(prev) = forecasts.insert(key, record) {
            // Last write wins; the replaced fit is only worth a debug line.
            tracing::debug!(
                topic_id = %prev.topic_id,
                horizon = prev.horizon_days,
                "overwrote existing forecast record"
            );
        }
        Ok(())
    }

    async fn cleanup_old_forecasts(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut forecasts = self.forecasts.write().await;
        let before = forecasts.len();
        forecasts.retain(|_, r| r.updated_at >= cutoff);
        Ok(before - forecasts.len())
    }
}
