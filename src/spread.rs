//! Spread engine - Major/Minor metrics per leg/reference pair and their extremes.
//!
//!   Major = leg.bid − reference.ask      (best ever = running maximum)
//!   Minor = |reference.bid − leg.ask|    (best ever = running minimum)
//!
//! Each metric needs both of its operands quoted (non-zero). The two metrics
//! read opposite sides of the book, so either may be available without the other.

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::core::{MetricKind, PairKey, Quote, Symbol};

/// One computed metric value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadSample {
    pub pair: PairKey,
    pub metric: MetricKind,
    pub value: Decimal,
}

/// Result of one `compute` call.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpreadReading {
    pub major: Option<Decimal>,
    pub minor: Option<Decimal>,
}

impl SpreadReading {
    pub fn get(&self, metric: MetricKind) -> Option<Decimal> {
        match metric {
            MetricKind::Major => self.major,
            MetricKind::Minor => self.minor,
        }
    }
}

/// Live state of one monitored pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairSpread {
    pub pair: PairKey,
    pub leg: Symbol,
    pub reference: Symbol,
    pub leg_bid: Decimal,
    pub reference_last_trade: Option<Decimal>,
    pub major: Option<Decimal>,
    pub minor: Option<Decimal>,
    /// Never decreases over the life of the pair.
    pub max_major: Option<Decimal>,
    /// Never increases over the life of the pair.
    pub min_minor: Option<Decimal>,
    pub major_samples: u64,
    pub minor_samples: u64,
}

impl PairSpread {
    fn new(pair: PairKey, leg: &Quote, reference: &Quote) -> Self {
        Self {
            pair,
            leg: leg.symbol.clone(),
            reference: reference.symbol.clone(),
            leg_bid: leg.bid_price,
            reference_last_trade: reference.last_trade,
            major: None,
            minor: None,
            max_major: None,
            min_minor: None,
            major_samples: 0,
            minor_samples: 0,
        }
    }

    pub fn current(&self, metric: MetricKind) -> Option<Decimal> {
        match metric {
            MetricKind::Major => self.major,
            MetricKind::Minor => self.minor,
        }
    }

    pub fn extreme(&self, metric: MetricKind) -> Option<Decimal> {
        match metric {
            MetricKind::Major => self.max_major,
            MetricKind::Minor => self.min_minor,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpreadEngine {
    pairs: HashMap<PairKey, PairSpread>,
    major_history: VecDeque<SpreadSample>,
    minor_history: VecDeque<SpreadSample>,
}

impl SpreadEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn major(leg: &Quote, reference: &Quote) -> Option<Decimal> {
        if !leg.bid_price.is_zero() && !reference.ask_price.is_zero() {
            Some(leg.bid_price - reference.ask_price)
        } else {
            None
        }
    }

    #[inline]
    pub fn minor(leg: &Quote, reference: &Quote) -> Option<Decimal> {
        if !reference.bid_price.is_zero() && !leg.ask_price.is_zero() {
            Some((reference.bid_price - leg.ask_price).abs())
        } else {
            None
        }
    }

    /// Compute both metrics for `pair`, record every available one as a sample,
    /// and fold it into the pair's extremes.
    ///
    /// The pair record is created on the first call that yields any metric.
    pub fn compute(&mut self, pair: &PairKey, leg: &Quote, reference: &Quote) -> SpreadReading {
        let reading = SpreadReading {
            major: Self::major(leg, reference),
            minor: Self::minor(leg, reference),
        };
        if reading.major.is_none() && reading.minor.is_none() {
            if let Some(state) = self.pairs.get_mut(pair) {
                state.major = None;
                state.minor = None;
            }
            return reading;
        }

        let state = self
            .pairs
            .entry(pair.clone())
            .or_insert_with(|| PairSpread::new(pair.clone(), leg, reference));
        state.leg_bid = leg.bid_price;
        state.reference_last_trade = reference.last_trade;
        state.major = reading.major;
        state.minor = reading.minor;

        if let Some(major) = reading.major {
            state.max_major = Some(state.max_major.map_or(major, |m| m.max(major)));
            state.major_samples += 1;
            self.major_history.push_back(SpreadSample {
                pair: pair.clone(),
                metric: MetricKind::Major,
                value: major,
            });
        }
        if let Some(minor) = reading.minor {
            state.min_minor = Some(state.min_minor.map_or(minor, |m| m.min(minor)));
            state.minor_samples += 1;
            self.minor_history.push_back(SpreadSample {
                pair: pair.clone(),
                metric: MetricKind::Minor,
                value: minor,
            });
        }

        reading
    }

    pub fn pair(&self, pair: &PairKey) -> Option<&PairSpread> {
        self.pairs.get(pair)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &PairSpread> {
        self.pairs.values()
    }

    pub fn history(&self, metric: MetricKind) -> &VecDeque<SpreadSample> {
        match metric {
            MetricKind::Major => &self.major_history,
            MetricKind::Minor => &self.minor_history,
        }
    }

    /// Retained samples of one pair/metric, oldest first.
    pub fn pair_history(&self, pair: &PairKey, metric: MetricKind) -> Vec<Decimal> {
        self.history(metric)
            .iter()
            .filter(|s| &s.pair == pair)
            .map(|s| s.value)
            .collect()
    }

    /// Keep only the most recent `window` samples per metric. Returns how many
    /// samples were dropped. Extremes are unaffected.
    pub fn trim_history(&mut self, window: usize) -> usize {
        let mut dropped = 0;
        for history in [&mut self.major_history, &mut self.minor_history] {
            let excess = history.len().saturating_sub(window);
            history.drain(..excess);
            dropped += excess;
        }
        dropped
    }

    /// Forget every pair and sample.
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.major_history.clear();
        self.minor_history.clear();
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
