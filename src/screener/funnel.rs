//! The four-stage screening funnel for one instrument.
//!
//! All stages must pass; the first failure classifies the skip. The
//! evaluation is pure so every stage boundary is directly testable.

use chrono::NaiveDate;
use std::fmt;

use super::config::StrategyParams;
use crate::data::{DailyBar, MoneyFlowRecord};

// ============================================================================
// Skip Reason
// ============================================================================

/// Why an instrument was excluded. One unit of work, one inspectable
/// outcome; the engine logs these instead of swallowing faults.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    InsufficientHistory { have: usize, need: usize },
    NoBreakout { close: f64, box_high: f64 },
    VolumeBelowThreshold { volume: f64, vol_ma: f64 },
    LaggingBenchmark { stock_return: f64, benchmark_return: f64 },
    FlowDataMissing { have: usize, need: usize },
    FlowNotPositive { date: NaiveDate },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientHistory { have, need } => {
                write!(f, "insufficient history: {} of {} bars", have, need)
            }
            Self::NoBreakout { close, box_high } => {
                write!(f, "no breakout: close {:.2} vs box high {:.2}", close, box_high)
            }
            Self::VolumeBelowThreshold { volume, vol_ma } => {
                write!(f, "volume not confirmed: {:.0} vs ma {:.0}", volume, vol_ma)
            }
            Self::LaggingBenchmark {
                stock_return,
                benchmark_return,
            } => write!(
                f,
                "lagging benchmark: {:.3} < {:.3}",
                stock_return, benchmark_return
            ),
            Self::FlowDataMissing { have, need } => {
                write!(f, "money-flow data missing: {} of {} days", have, need)
            }
            Self::FlowNotPositive { date } => {
                write!(f, "net outflow on {}", date)
            }
        }
    }
}

// ============================================================================
// Funnel Pass
// ============================================================================

/// Measurements from a fully-passed funnel, used for scoring and the
/// result's reason text.
#[derive(Debug, Clone)]
pub struct FunnelPass {
    pub close: f64,
    pub pct_change: f64,
    pub box_high: f64,
    /// Today's volume over the volume moving average
    pub volume_ratio: f64,
    pub stock_return: f64,
}

// ============================================================================
// Evaluation
// ============================================================================

/// Run the funnel for one instrument.
///
/// `bars` and `flows` may arrive in any order; they are evaluated most
/// recent first (index 0 = the scan date). Stages short-circuit on the
/// first failure.
pub fn evaluate(
    bars: &[DailyBar],
    flows: &[MoneyFlowRecord],
    benchmark_return: f64,
    params: &StrategyParams,
) -> Result<FunnelPass, SkipReason> {
    // Stage 0: minimum history.
    if bars.len() < params.box_days {
        return Err(SkipReason::InsufficientHistory {
            have: bars.len(),
            need: params.box_days,
        });
    }

    let mut bars: Vec<&DailyBar> = bars.iter().collect();
    bars.sort_by(|a, b| b.trade_date.cmp(&a.trade_date));

    let today = bars[0];
    // The box: up to box_days bars preceding today, today excluded.
    let past = &bars[1..bars.len().min(params.box_days + 1)];

    // Stage 1: breakout above the prior box ceiling.
    let box_high = past.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    if today.close <= box_high * params.breakout_threshold {
        return Err(SkipReason::NoBreakout {
            close: today.close,
            box_high,
        });
    }

    // Stage 2: volume confirmation over the most recent sub-window of the
    // lookback, not the full box.
    let vol_window = &past[..past.len().min(params.vol_ma_days)];
    let vol_ma = vol_window.iter().map(|b| b.volume).sum::<f64>() / vol_window.len() as f64;
    if vol_ma <= 0.0 || today.volume <= vol_ma * params.vol_multiplier {
        return Err(SkipReason::VolumeBelowThreshold {
            volume: today.volume,
            vol_ma,
        });
    }

    // Stage 3: relative strength, measured over the vol_ma_days window
    // rather than the full box.
    let anchor = bars
        .get(params.vol_ma_days)
        .ok_or(SkipReason::InsufficientHistory {
            have: bars.len(),
            need: params.vol_ma_days + 1,
        })?;
    let stock_return = (today.close - anchor.close) / anchor.close;
    if stock_return < benchmark_return {
        return Err(SkipReason::LaggingBenchmark {
            stock_return,
            benchmark_return,
        });
    }

    // Stage 4: money-flow confirmation. Missing data is a hard fail.
    if flows.len() < params.flow_days {
        return Err(SkipReason::FlowDataMissing {
            have: flows.len(),
            need: params.flow_days,
        });
    }
    let mut flows: Vec<&MoneyFlowRecord> = flows.iter().collect();
    flows.sort_by(|a, b| b.trade_date.cmp(&a.trade_date));
    for flow in &flows[..params.flow_days] {
        if flow.net_amount <= 0.0 {
            return Err(SkipReason::FlowNotPositive {
                date: flow.trade_date,
            });
        }
    }

    Ok(FunnelPass {
        close: today.close,
        pct_change: today.pct_change,
        box_high,
        volume_ratio: today.volume / vol_ma,
        stock_return,
    })
}

// ============================================================================
// Tests
// ============================================================================
