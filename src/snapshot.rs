//! Owned, read-only views of pipeline state for broadcast and rendering.
//!
//! A snapshot is a copy. Holding one never blocks or mutates the pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::core::{PairKey, Symbol};
use crate::feeds::RankedEntry;
use crate::spread::PairSpread;
use crate::trigger::{TrackView, TriggerStats};

/// Counters kept by the tick-processing step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub ticks: u64,
    /// Records dropped by the filter as unusable.
    pub malformed: u64,
    pub new_legs: u64,
    pub new_references: u64,
    pub samples: u64,
    pub dispatches: u64,
    pub rejected_commands: u64,
    pub trimmed_samples: u64,
    /// Trigger events the event consumer had no room for.
    pub dropped_events: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedView {
    pub rank: usize,
    pub symbol: Symbol,
    pub volume: f64,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub last_trade: Option<Decimal>,
    /// Updated within the highlight window.
    pub recent: bool,
}

impl RankedView {
    pub fn from_entries(entries: &[RankedEntry], now: Instant, highlight: Duration) -> Vec<Self> {
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| Self {
                rank: i + 1,
                symbol: e.quote.symbol.clone(),
                volume: e.quote.volume,
                bid_price: e.quote.bid_price,
                ask_price: e.quote.ask_price,
                bid_size: e.quote.bid_size,
                ask_size: e.quote.ask_size,
                last_trade: e.quote.last_trade,
                recent: e.is_recent(now, highlight),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairView {
    pub pair: PairKey,
    pub leg: Symbol,
    pub reference: Symbol,
    pub major: Option<Decimal>,
    pub minor: Option<Decimal>,
    pub max_major: Option<Decimal>,
    pub min_minor: Option<Decimal>,
    /// Smallest gap worth trading: reference last trade × ratio.
    pub min_gap: Option<Decimal>,
    pub major_samples: u64,
    pub minor_samples: u64,
}

impl PairView {
    pub fn new(spread: &PairSpread, min_gap_ratio: Decimal) -> Self {
        Self {
            pair: spread.pair.clone(),
            leg: spread.leg.clone(),
            reference: spread.reference.clone(),
            major: spread.major,
            minor: spread.minor,
            max_major: spread.max_major,
            min_minor: spread.min_minor,
            min_gap: spread.reference_last_trade.and_then(|lt| lt.checked_mul(min_gap_ratio)),
            major_samples: spread.major_samples,
            minor_samples: spread.minor_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub legs: Vec<RankedView>,
    pub references: Vec<RankedView>,
    /// Sorted by pair key.
    pub pairs: Vec<PairView>,
    pub triggers: Vec<TrackView>,
    pub stats: PipelineStats,
    pub trigger_stats: TriggerStats,
}

impl Snapshot {
    pub fn pair(&self, pair: &PairKey) -> Option<&PairView> {
        self.pairs.iter().find(|p| &p.pair == pair)
    }

    pub fn trigger(&self, pair: &PairKey) -> impl Iterator<Item = &TrackView> {
        self.triggers.iter().filter(move |t| &t.pair == pair)
    }
}
