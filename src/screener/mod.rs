//! Breakout screening.
//!
//! `UniverseSelector` narrows the market to candidates from the strongest
//! sectors, `funnel` applies the four confirmation stages to each
//! candidate, and `ScreeningEngine` drives both over batched store reads
//! and ranks the survivors.

mod config;
mod engine;
pub mod funnel;
mod universe;

pub use config::StrategyParams;
pub use engine::{InstrumentCheck, ScreenResult, ScreeningEngine};
pub use funnel::{FunnelPass, SkipReason};
pub use universe::UniverseSelector;
