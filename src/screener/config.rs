//! Strategy parameters for the breakout screening funnel.

use serde::{Deserialize, Serialize};

/// Tunable parameters for universe selection and the four-stage funnel.
///
/// Defaults reproduce the production strategy: a 55-day box breakout with
/// 1% margin, 1.5x volume confirmation over a 20-day average, relative
/// strength against CSI 300 over the 20-day window, and 3 consecutive days
/// of net money inflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// Box (trailing high) window in trading days
    #[serde(default = "default_box_days")]
    pub box_days: usize,

    /// Close must exceed the box high by this multiplier (1.01 = +1%)
    #[serde(default = "default_breakout_threshold")]
    pub breakout_threshold: f64,

    /// Volume moving-average window in trading days
    #[serde(default = "default_vol_ma_days")]
    pub vol_ma_days: usize,

    /// Today's volume must exceed the average by this multiplier
    #[serde(default = "default_vol_multiplier")]
    pub vol_multiplier: f64,

    /// Required consecutive days of positive net money flow
    #[serde(default = "default_flow_days")]
    pub flow_days: usize,

    /// Fraction of top-performing sectors forming the primary universe
    #[serde(default = "default_sector_top_pct")]
    pub sector_top_pct: f64,

    /// Benchmark index for the relative-strength stage
    #[serde(default = "default_benchmark")]
    pub benchmark: String,

    /// Instruments per screening batch (memory bound, not parallelism)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum candidate count before falling back to the full market
    #[serde(default = "default_min_universe")]
    pub min_universe: usize,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            box_days: default_box_days(),
            breakout_threshold: default_breakout_threshold(),
            vol_ma_days: default_vol_ma_days(),
            vol_multiplier: default_vol_multiplier(),
            flow_days: default_flow_days(),
            sector_top_pct: default_sector_top_pct(),
            benchmark: default_benchmark(),
            batch_size: default_batch_size(),
            min_universe: default_min_universe(),
        }
    }
}

fn default_box_days() -> usize {
    55
}

fn default_breakout_threshold() -> f64 {
    1.01
}

fn default_vol_ma_days() -> usize {
    20
}

fn default_vol_multiplier() -> f64 {
    1.5
}

fn default_flow_days() -> usize {
    3
}

fn default_sector_top_pct() -> f64 {
    0.2
}

fn default_benchmark() -> String {
    "000300.SH".to_string() // CSI 300
}

fn default_batch_size() -> usize {
    50
}

fn default_min_universe() -> usize {
    50
}
