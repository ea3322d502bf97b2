// src/ranker.rs
//! # Surge Ranker
//! Turns per-topic forecast records into a leaderboard: a composite score
//! over surge, confidence, recent velocity, convergence and projected
//! growth, plus derived insights, alerts and the emerging-topics shortlist.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::RankingWeights;
use crate::types::{clamp01, DailyFeatureVector, ForecastRecord, TopicRef};

/// One topic entering the ranking: its winning forecast and, when feature
/// rows exist, the most recent one.
pub struct RankingCandidate {
    pub topic: TopicRef,
    pub forecast: ForecastRecord,
    pub recent: Option<DailyFeatureVector>,
}

/// A scored leaderboard row.
#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub topic: TopicRef,
    pub ranking_score: f64,
    pub surge_score: f64,
    pub confidence_score: f64,
    pub growth_rate: f64,
    pub recent_velocity: f64,
    pub convergence: f64,
    pub model_type: String,
}

/// Aggregate view over a finished leaderboard.
#[derive(Debug, Clone, Serialize)]
pub struct RankingInsights {
    pub total_topics: usize,
    pub avg_surge: f64,
    pub max_surge: f64,
    pub min_surge: f64,
    pub avg_confidence: f64,
    /// Entries with confidence above 0.7.
    pub high_confidence_count: usize,
    pub top_topic: Option<String>,
    pub model_distribution: BTreeMap<String, usize>,
}

/// An operator-facing flag derived from the leaderboard's top entry.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: &'static str,
    pub severity: &'static str,
    pub topic_id: String,
    pub value: f64,
    pub message: String,
}

/// A shortlist row: high surge weighted by cross-run consistency.
#[derive(Debug, Clone, Serialize)]
pub struct EmergingTopic {
    pub topic: TopicRef,
    pub surge_score: f64,
    pub consistency: f64,
    pub emergence_score: f64,
}

pub struct SurgeRanker {
    weights: RankingWeights,
}

impl SurgeRanker {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    /// Score and order candidates; ranks are 1-based, ties keep input order.
    pub fn rank(&self, candidates: Vec<RankingCandidate>, limit: usize) -> Vec<RankingEntry> {
        let mut entries: Vec<RankingEntry> = candidates
            .into_iter()
            .map(|c| self.score_candidate(c))
            .collect();

        // Stable sort keeps the incoming order for exact ties.
        entries.sort_by(|a, b| {
            b.ranking_score
                .partial_cmp(&a.ranking_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        entries.truncate(limit);
        entries
    }

    fn score_candidate(&self, c: RankingCandidate) -> RankingEntry {
        let recent_velocity = c.recent.as_ref().map(|f| f.velocity).unwrap_or(0.0);
        let convergence = c.recent.as_ref().map(|f| f.convergence).unwrap_or(0.0);
        let growth_rate = c.forecast.growth_rate();

        let velocity_score = (recent_velocity / 10.0).clamp(0.0, 1.0);
        let growth_score = growth_rate.clamp(0.0, 1.0);

        let mut score = self.weights.surge_score * c.forecast.surge_score
            + self.weights.confidence * c.forecast.confidence_score
            + self.weights.recent_velocity * velocity_score
            + self.weights.convergence * convergence
            + self.weights.growth_rate * growth_score;

        // Multi-source agreement is rewarded, a shaky fit discounted.
        if convergence > 0.7 {
            score *= 1.1;
        }
        if c.forecast.confidence_score < 0.3 {
            score *= 0.8;
        }

        // The bonus can push strong topics past 1.0; the raw score is kept
        // so they stay distinguishable in the ordering.
        RankingEntry {
            rank: 0,
            topic: c.topic,
            ranking_score: score,
            surge_score: c.forecast.surge_score,
            confidence_score: c.forecast.confidence_score,
            growth_rate,
            recent_velocity,
            convergence,
            model_type: c.forecast.model_type,
        }
    }
}

/// Summary statistics over a leaderboard; empty input gives zeroed insights.
pub fn insights(entries: &[RankingEntry]) -> RankingInsights {
    if entries.is_empty() {
        return RankingInsights {
            total_topics: 0,
            avg_surge: 0.0,
            max_surge: 0.0,
            min_surge: 0.0,
            avg_confidence: 0.0,
            high_confidence_count: 0,
            top_topic: None,
            model_distribution: BTreeMap::new(),
        };
    }

    let n = entries.len() as f64;
    let mut model_distribution = BTreeMap::new();
    for e in entries {
        *model_distribution.entry(e.model_type.clone()).or_insert(0) += 1;
    }
    RankingInsights {
        total_topics: entries.len(),
        avg_surge: entries.iter().map(|e| e.surge_score).sum::<f64>() / n,
        max_surge: entries.iter().map(|e| e.surge_score).fold(f64::MIN, f64::max),
        min_surge: entries.iter().map(|e| e.surge_score).fold(f64::MAX, f64::min),
        avg_confidence: entries.iter().map(|e| e.confidence_score).sum::<f64>() / n,
        high_confidence_count: entries.iter().filter(|e| e.confidence_score > 0.7).count(),
        top_topic: entries.first().map(|e| e.topic.name.clone()),
        model_distribution,
    }
}

/// Operator alerts for the leaderboard's top entry only; lower rows are
/// visible in the leaderboard itself.
pub fn alerts(entries: &[RankingEntry]) -> Vec<Alert> {
    let Some(top) = entries.first() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    if top.surge_score > 0.8 {
        out.push(Alert {
            kind: "high_surge",
            severity: "high",
            topic_id: top.topic.id.clone(),
            value: top.surge_score,
            message: format!(
                "{} shows a very high surge score ({:.2})",
                top.topic.name, top.surge_score
            ),
        });
    }
    if top.confidence_score < 0.4 {
        out.push(Alert {
            kind: "low_confidence",
            severity: "medium",
            topic_id: top.topic.id.clone(),
            value: top.confidence_score,
            message: format!(
                "top-ranked {} has low model confidence ({:.2})",
                top.topic.name, top.confidence_score
            ),
        });
    }
    if top.growth_rate > 1.0 {
        out.push(Alert {
            kind: "high_growth",
            severity: "high",
            topic_id: top.topic.id.clone(),
            value: top.growth_rate,
            message: format!(
                "{} is projected to more than double ({:.0}% growth)",
                top.topic.name,
                top.growth_rate * 100.0
            ),
        });
    }
    out
}

/// Shortlist of topics whose surge reaches `threshold`, ordered by surge
/// weighted with a per-topic consistency in [0,1] supplied by the caller
/// (typically agreement across recent runs).
pub fn emerging_topics<F>(
    entries: &[RankingEntry],
    threshold: f64,
    consistency: F,
) -> Vec<EmergingTopic>
where
    F: Fn(&str) -> f64,
{
    let mut out: Vec<EmergingTopic> = entries
        .iter()
        .filter(|e| e.surge_score >= threshold)
        .map(|e| {
            let consistency = clamp01(consistency(&e.topic.id));
            EmergingTopic {
                topic: e.topic.clone(),
                surge_score: e.surge_score,
                consistency,
                emergence_score: e.surge_score * consistency,
            }
        })
        .collect();
    out.sort_by(|a, b| {
        b.emergence_score
            .partial_cmp(&a.emergence_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForecastPoint, ModelFamily, ModelMetrics};
    use chrono::{NaiveDate, Utc};

    fn record(topic: &str, surge: f64, confidence: f64) -> ForecastRecord {
        let d = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        ForecastRecord {
            topic_id: topic.to_string(),
            horizon_days: 2,
            model_family: ModelFamily::Baseline,
            forecast_curve: vec![
                ForecastPoint::point(d, 1.0),
                ForecastPoint::point(d.succ_opt().unwrap(), 1.5),
            ],
            surge_score: surge,
            confidence_score: confidence,
            model_type: "LinearTrend".into(),
            model_params: serde_json::json!({}),
            model_metrics: ModelMetrics::default(),
            updated_at: Utc::now(),
        }
    }

    fn candidate(topic: &str, surge: f64, confidence: f64) -> RankingCandidate {
        RankingCandidate {
            topic: TopicRef {
                id: topic.to_string(),
                name: topic.to_string(),
            },
            forecast: record(topic, surge, confidence),
            recent: None,
        }
    }

    #[test]
    fn low_confidence_penalty_reorders_topics() {
        // "rust-gpu" has the highest raw surge but an untrustworthy fit;
        // the 0.8x penalty pushes it below the well-fitted runner-up.
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(
            vec![
                candidate("rust-gpu", 0.9, 0.2),
                candidate("wasm-ai", 0.7, 0.5),
                candidate("edge-db", 0.4, 0.5),
            ],
            10,
        );
        assert_eq!(ranked[0].topic.id, "wasm-ai");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].topic.id, "rust-gpu");
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn penalty_boundary_is_strict() {
        // Confidence exactly 0.3 sits on the boundary and is not penalized;
        // just below it the 0.8x factor shows up in the score delta.
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(
            vec![
                candidate("a", 0.9, 0.3),
                candidate("b", 0.9, 0.299),
                candidate("c", 0.6, 0.7),
            ],
            10,
        );
        let at = ranked.iter().find(|e| e.topic.id == "a").unwrap();
        let below = ranked.iter().find(|e| e.topic.id == "b").unwrap();
        // Unpenalized: 0.4*0.9 + 0.2*0.3 + 0.1*growth_score.
        assert!((at.ranking_score - 0.47).abs() < 1e-6);
        assert!(below.ranking_score < at.ranking_score * 0.85);
    }

    #[test]
    fn scores_above_one_stay_distinct() {
        // Two maxed-out topics whose bonused scores both pass 1.0 must not
        // collapse to a tie.
        let recent = {
            let mut r =
                DailyFeatureVector::empty("x", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
            r.convergence = 1.0;
            r.velocity = 20.0;
            r
        };
        let mut a = candidate("a", 1.0, 1.0);
        a.recent = Some(recent.clone());
        let mut b = candidate("b", 0.9, 1.0);
        b.recent = Some(recent);

        let ranked = SurgeRanker::new(RankingWeights::default()).rank(vec![b, a], 10);
        assert_eq!(ranked[0].topic.id, "a");
        // a: (0.4 + 0.2 + 0.2 + 0.1 + 0.1*0.5) * 1.1; b trails by 0.4*0.1*1.1.
        assert!((ranked[0].ranking_score - 1.045).abs() < 1e-6);
        assert!((ranked[1].ranking_score - 1.001).abs() < 1e-6);
        assert!(ranked[0].ranking_score > ranked[1].ranking_score);
    }

    #[test]
    fn convergence_bonus_applies_above_threshold() {
        let mut with_conv = candidate("a", 0.5, 0.5);
        let mut recent = DailyFeatureVector::empty("a", NaiveDate::from_ymd_opt(2025, 7, 1).unwrap());
        recent.convergence = 0.8;
        with_conv.recent = Some(recent);

        let without = candidate("b", 0.5, 0.5);
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(vec![without, with_conv], 10);
        assert_eq!(ranked[0].topic.id, "a");
        assert!(ranked[0].ranking_score > ranked[1].ranking_score);
    }

    #[test]
    fn limit_truncates_after_ranking() {
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(
            vec![
                candidate("a", 0.2, 0.5),
                candidate("b", 0.9, 0.5),
                candidate("c", 0.5, 0.5),
            ],
            2,
        );
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].topic.id, "b");
    }

    #[test]
    fn alerts_fire_only_for_the_top_entry() {
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(
            vec![candidate("hot", 0.95, 0.2), candidate("calm", 0.1, 0.9)],
            10,
        );
        let alerts = alerts(&ranked);
        let kinds: Vec<&str> = alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&"high_surge"));
        assert!(kinds.contains(&"low_confidence"));
        assert!(alerts.iter().all(|a| a.topic_id == "hot"));
    }

    #[test]
    fn insights_summarize_the_board() {
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(
            vec![candidate("a", 0.8, 0.9), candidate("b", 0.4, 0.5)],
            10,
        );
        let s = insights(&ranked);
        assert_eq!(s.total_topics, 2);
        assert!((s.avg_surge - 0.6).abs() < 1e-9);
        assert_eq!(s.high_confidence_count, 1);
        assert_eq!(s.top_topic.as_deref(), Some("a"));
        assert_eq!(s.model_distribution.get("LinearTrend"), Some(&2));
    }

    #[test]
    fn emerging_sorted_by_surge_times_consistency() {
        let ranked = SurgeRanker::new(RankingWeights::default()).rank(
            vec![
                candidate("steady", 0.7, 0.8),
                candidate("flash", 0.9, 0.8),
                candidate("quiet", 0.3, 0.8),
            ],
            10,
        );
        // "flash" has a higher surge but no run-to-run consistency.
        let shortlist = emerging_topics(&ranked, 0.6, |id| if id == "steady" { 1.0 } else { 0.3 });
        assert_eq!(shortlist.len(), 2);
        assert_eq!(shortlist[0].topic.id, "steady");
        assert!(shortlist.iter().all(|e| e.surge_score > 0.6));
    }
}
