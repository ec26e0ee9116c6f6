//! Bounded, volume-ranked working set of quotes.
//!
//! Entries stay sorted by volume, highest first. The sort is stable, so entries
//! with equal volume keep their previous relative order and the one that was
//! behind is the one dropped when the cap is exceeded.

use std::time::{Duration, Instant};

use crate::core::{Quote, Symbol};

#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub quote: Quote,
    pub updated_at: Instant,
    /// Set-wide update counter value at the last upsert of this entry.
    pub seq: u64,
}

impl RankedEntry {
    pub fn symbol(&self) -> &Symbol {
        &self.quote.symbol
    }

    pub fn is_recent(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.updated_at) < window
    }
}

#[derive(Debug)]
pub struct RankedSet {
    cap: usize,
    entries: Vec<RankedEntry>,
    seq: u64,
}

impl RankedSet {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: Vec::with_capacity(cap + 1),
            seq: 0,
        }
    }

    /// Insert or refresh `quote`, then re-rank and truncate to the cap.
    /// Returns whether the symbol was not present before.
    ///
    /// On refresh every market field is overwritten except `last_trade`, which
    /// keeps its previous value when the new quote has none.
    pub fn upsert(&mut self, quote: Quote) -> bool {
        self.upsert_at(quote, Instant::now())
    }

    pub fn upsert_at(&mut self, mut quote: Quote, now: Instant) -> bool {
        self.seq += 1;
        let seq = self.seq;

        let is_new = match self.entries.iter_mut().find(|e| e.quote.symbol == quote.symbol) {
            Some(entry) => {
                if quote.last_trade.is_none() {
                    quote.last_trade = entry.quote.last_trade;
                }
                entry.quote = quote;
                entry.updated_at = now;
                entry.seq = seq;
                false
            }
            None => {
                self.entries.push(RankedEntry {
                    quote,
                    updated_at: now,
                    seq,
                });
                true
            }
        };

        self.entries
            .sort_by(|a, b| b.quote.volume.total_cmp(&a.quote.volume));
        self.entries.truncate(self.cap);
        is_new
    }

    /// Entries in rank order.
    pub fn top_n(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&RankedEntry> {
        self.entries.iter().find(|e| &e.quote.symbol == symbol)
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.get(symbol).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}
