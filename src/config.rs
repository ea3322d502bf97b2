//! # Pipeline Configuration
//!
//! Explicit configuration for the signal-to-forecast pipeline. Weights are
//! plain structs handed to the scorer/ranker at construction time, never
//! ambient globals, so per-run overrides and deterministic tests are cheap.
//!
//! Loads from TOML or JSON with a seeded default fallback:
//! 1) `$SURGECAST_CONFIG`
//! 2) `config/surgecast.toml`
//! 3) `config/surgecast.json`

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::ModelFamily;

pub const ENV_CONFIG_PATH: &str = "SURGECAST_CONFIG";

/// Weights for the baseline surge-score formula (linear weighted sum with a
/// convergence multiplier). They may sum to any positive total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SurgeWeights {
    #[serde(default = "default_w_velocity_growth")]
    pub velocity_growth: f64,
    #[serde(default = "default_w_momentum")]
    pub momentum: f64,
    #[serde(default = "default_w_z_spike")]
    pub z_spike: f64,
    #[serde(default = "default_w_convergence")]
    pub convergence: f64,
}

fn default_w_velocity_growth() -> f64 {
    0.4
}
fn default_w_momentum() -> f64 {
    0.3
}
fn default_w_z_spike() -> f64 {
    0.2
}
fn default_w_convergence() -> f64 {
    0.1
}

impl Default for SurgeWeights {
    fn default() -> Self {
        Self {
            velocity_growth: 0.4,
            momentum: 0.3,
            z_spike: 0.2,
            convergence: 0.1,
        }
    }
}

/// Weights for the seasonal family's sigmoid surge score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeasonalSurgeWeights {
    pub velocity_growth: f64,
    pub z_spike: f64,
    pub convergence: f64,
    pub confidence: f64,
}

impl Default for SeasonalSurgeWeights {
    fn default() -> Self {
        Self {
            velocity_growth: 0.4,
            z_spike: 0.3,
            convergence: 0.2,
            confidence: 0.1,
        }
    }
}

/// Weights for the composite leaderboard score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankingWeights {
    pub surge_score: f64,
    pub confidence: f64,
    pub recent_velocity: f64,
    pub convergence: f64,
    pub growth_rate: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            surge_score: 0.4,
            confidence: 0.2,
            recent_velocity: 0.2,
            convergence: 0.1,
            growth_rate: 0.1,
        }
    }
}

/// All recognized pipeline options, with serde defaults so partial config
/// files stay valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Historical window for feature building, in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Minimum feature rows required before a forecast is attempted.
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
    /// EWMA smoothing factor for velocity.
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    /// Trailing window for z-score spike detection.
    #[serde(default = "default_z_window")]
    pub z_window: usize,
    /// Forecast horizons to fan out over, in days.
    #[serde(default = "default_horizons")]
    pub forecast_horizons: Vec<u32>,
    /// Which scoring family the batch runs.
    #[serde(default = "default_model_family")]
    pub model_family: ModelFamily,
    /// Surge threshold for the emerging-topics shortlist.
    #[serde(default = "default_emerging_threshold")]
    pub emerging_threshold: f64,
    /// Maximum topics processed concurrently.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    /// Wall-clock budget for the autoregressive order grid search, ms.
    #[serde(default = "default_grid_budget_ms")]
    pub arima_grid_budget_ms: u64,

    #[serde(default)]
    pub surge_weights: SurgeWeights,
    #[serde(default)]
    pub seasonal_surge_weights: SeasonalSurgeWeights,
    #[serde(default)]
    pub ranking_weights: RankingWeights,
}

fn default_lookback_days() -> u32 {
    90
}
fn default_min_data_points() -> usize {
    14
}
fn default_ewma_alpha() -> f64 {
    0.3
}
fn default_z_window() -> usize {
    7
}
fn default_horizons() -> Vec<u32> {
    vec![30, 90, 180]
}
fn default_model_family() -> ModelFamily {
    ModelFamily::Baseline
}
fn default_emerging_threshold() -> f64 {
    0.6
}
fn default_worker_limit() -> usize {
    4
}
fn default_grid_budget_ms() -> u64 {
    2_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // All serde defaults; a missing config file means this.
        serde_json::from_str("{}").expect("defaults deserialize")
    }
}

impl PipelineConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
    }

    /// Load using env var + fallbacks; seeded defaults when nothing exists.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("SURGECAST_CONFIG points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/surgecast.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/surgecast.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    if hint_ext == "json" || s.trim_start().starts_with('{') {
        return serde_json::from_str(s).context("parsing JSON pipeline config");
    }
    toml::from_str(s).context("parsing TOML pipeline config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.lookback_days, 90);
        assert_eq!(cfg.min_data_points, 14);
        assert!((cfg.ewma_alpha - 0.3).abs() < 1e-12);
        assert_eq!(cfg.z_window, 7);
        assert_eq!(cfg.forecast_horizons, vec![30, 90, 180]);
        assert_eq!(cfg.model_family, ModelFamily::Baseline);
        assert!((cfg.emerging_threshold - 0.6).abs() < 1e-12);
        assert!((cfg.surge_weights.velocity_growth - 0.4).abs() < 1e-12);
        assert!((cfg.ranking_weights.surge_score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn partial_toml_overrides_keep_defaults_elsewhere() {
        let toml = r#"
            lookback_days = 30
            forecast_horizons = [30]

            [surge_weights]
            velocity_growth = 0.7
        "#;
        let cfg = parse_config(toml, "toml").unwrap();
        assert_eq!(cfg.lookback_days, 30);
        assert_eq!(cfg.forecast_horizons, vec![30]);
        assert!((cfg.surge_weights.velocity_growth - 0.7).abs() < 1e-12);
        // Untouched fields fall back to serde defaults.
        assert!((cfg.surge_weights.momentum - 0.3).abs() < 1e-12);
        assert_eq!(cfg.min_data_points, 14);
    }

    #[test]
    fn json_config_parses_by_content_sniffing() {
        let json = r#"{"min_data_points": 7, "model_family": "seasonal"}"#;
        let cfg = parse_config(json, "").unwrap();
        assert_eq!(cfg.min_data_points, 7);
        assert_eq!(cfg.model_family, ModelFamily::Seasonal);
    }

    #[serial_test::serial]
    #[test]
    fn env_path_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("surgecast.json");
        let mut f = fs::File::create(&path).unwrap();
        write!(f, r#"{{"lookback_days": 10}}"#).unwrap();

        std::env::set_var(ENV_CONFIG_PATH, path.display().to_string());
        let cfg = PipelineConfig::load_default().unwrap();
        assert_eq!(cfg.lookback_days, 10);
        std::env::remove_var(ENV_CONFIG_PATH);
    }
}
