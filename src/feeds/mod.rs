//! Feed-side processing: record validation, leg relevance and ranking

pub mod filter;
pub mod ranked;

pub use filter::QuoteFilter;
pub use ranked::{RankedEntry, RankedSet};
