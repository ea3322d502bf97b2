// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod features;
pub mod forecast;
pub mod pipeline;
pub mod ranker;
pub mod store;
pub mod timeseries;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::features::FeatureMatrixBuilder;
pub use crate::forecast::{ForecastModelSelector, ForecastOutcome};
pub use crate::pipeline::{BatchReport, SurgePipeline, TopicOutcome};
pub use crate::ranker::{RankingEntry, SurgeRanker};
pub use crate::store::{EventStore, FeatureStore, ForecastStore, MemoryStore};
pub use crate::timeseries::{SeriesSummary, TimeSeriesAnalyzer};
pub use crate::types::{
    DailyFeatureVector, ForecastRecord, ModelFamily, SignalEvent, Source, TopicRef,
};
