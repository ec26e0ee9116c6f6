//! Pair matcher - links each leg to a reference instrument of the same family.
//!
//! Family = symbol prefix before the separator ("ABC-FUT" → "ABC"). References are
//! plain symbols, so a reference's family is the whole symbol.

use crate::core::Symbol;
use crate::feeds::{RankedEntry, RankedSet};

#[derive(Debug, Clone, Copy)]
pub struct PairMatcher {
    separator: char,
}

impl PairMatcher {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    pub fn family<'a>(&self, symbol: &'a Symbol) -> &'a str {
        symbol.family(self.separator)
    }

    /// A symbol may enter the reference set when it is plain and its family is
    /// shared by at least one leg currently held.
    pub fn admits_reference(&self, symbol: &Symbol, legs: &RankedSet) -> bool {
        symbol.is_plain(self.separator) && self.shares_family(symbol, legs)
    }

    /// Whether any held leg has the same family as `symbol`.
    pub fn shares_family(&self, symbol: &Symbol, legs: &RankedSet) -> bool {
        let family = self.family(symbol);
        legs.top_n().iter().any(|leg| self.family(leg.symbol()) == family)
    }

    /// First reference in current rank order whose family equals `leg_family`.
    ///
    /// First-match is intentional: with two same-family references the one that
    /// ranks earlier wins, regardless of anything else.
    pub fn find_reference<'a>(
        &self,
        leg_family: &str,
        references: &'a RankedSet,
    ) -> Option<&'a RankedEntry> {
        references
            .top_n()
            .iter()
            .find(|reference| self.family(reference.symbol()) == leg_family)
    }
}
