//! Quote filter - turns raw feed records into validated quotes and decides
//! which of them are relevant leg instruments.
//!
//! Parsing fails closed: a record without a symbol, or with an unusable number,
//! yields `None` and never an error, so one bad line cannot stop the stream.

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::core::config::FilterConfig;
use crate::core::{Quote, RawNumber, RawTick, Symbol};

pub struct QuoteFilter {
    class_tag: String,
    min_volume: f64,
    excluded_suffixes: HashSet<String>,
    separator: char,
}

impl QuoteFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            class_tag: config.class_tag.clone(),
            min_volume: config.min_volume,
            excluded_suffixes: config.excluded_suffixes.iter().cloned().collect(),
            separator: config.family_separator,
        }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Validate a raw record into a `Quote` without applying relevance.
    ///
    /// Only the symbol is required. A missing class is empty and a missing
    /// volume is zero, so such a record can never be a leg but can still serve
    /// as a reference. Prices and sizes default to zero when absent; a zero
    /// price means "not quoted" downstream.
    pub fn parse(&self, raw: &RawTick) -> Option<Quote> {
        let symbol = raw.symbol.as_deref()?.trim();
        if symbol.is_empty() {
            return None;
        }
        let class = raw.class.as_deref().unwrap_or_default().trim();

        let volume = match raw.volume.as_ref() {
            Some(volume) => volume.as_f64().filter(|v| *v >= 0.0)?,
            None => 0.0,
        };
        let last_trade = match raw.last_trade.as_ref().and_then(|lt| lt.price()) {
            Some(price) => Some(non_negative(price)?).filter(|p| !p.is_zero()),
            None => None,
        };

        Some(Quote {
            symbol: Symbol::new(symbol),
            class: class.to_string(),
            volume,
            ask_price: optional_field(raw.ask_price.as_ref())?,
            bid_price: optional_field(raw.bid_price.as_ref())?,
            ask_size: optional_field(raw.ask_size.as_ref())?,
            bid_size: optional_field(raw.bid_size.as_ref())?,
            last_trade,
        })
    }

    /// Leg relevance: class tag, volume floor and suffix exclusion must all pass.
    pub fn is_relevant(&self, quote: &Quote) -> bool {
        if quote.class != self.class_tag || quote.volume <= self.min_volume {
            return false;
        }
        match quote.symbol.suffix(self.separator) {
            Some(suffix) => !self.excluded_suffixes.contains(suffix),
            None => true,
        }
    }

    /// Parse and apply the leg relevance rule in one step.
    pub fn classify(&self, raw: &RawTick) -> Option<Quote> {
        self.parse(raw).filter(|quote| self.is_relevant(quote))
    }
}

fn non_negative(raw: &RawNumber) -> Option<Decimal> {
    raw.as_decimal().filter(|v| !v.is_sign_negative() || v.is_zero())
}

/// Absent is zero; present but unusable poisons the whole record.
fn optional_field(raw: Option<&RawNumber>) -> Option<Decimal> {
    match raw {
        Some(value) => non_negative(value),
        None => Some(Decimal::ZERO),
    }
}
