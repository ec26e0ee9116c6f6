//! Core types - Strong typing for quotes, pairs and orders

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument symbol as published by the feed (e.g. "ABC-FUT", "ABC").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix before the first separator, or the whole symbol.
    pub fn family(&self, separator: char) -> &str {
        match self.0.split_once(separator) {
            Some((family, _)) => family,
            None => &self.0,
        }
    }

    /// Everything after the first separator, if the symbol has one.
    pub fn suffix(&self, separator: char) -> Option<&str> {
        self.0.split_once(separator).map(|(_, suffix)| suffix)
    }

    /// Plain symbols carry no family suffix (reference instruments).
    pub fn is_plain(&self, separator: char) -> bool {
        !self.0.contains(separator)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies one monitored leg/reference relationship: `"{leg}-{reference}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey(String);

impl PairKey {
    pub fn new(leg: &Symbol, reference: &Symbol) -> Self {
        Self(format!("{}-{}", leg, reference))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PairKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PairKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The two directional spread metrics computed per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// leg bid - reference ask; watched for an upper breakout.
    Major,
    /// |reference bid - leg ask|; watched for a lower convergence.
    Minor,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Major, MetricKind::Minor];
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Major => write!(f, "major"),
            MetricKind::Minor => write!(f, "minor"),
        }
    }
}

/// Validated market quote for one instrument.
///
/// Prices and sizes are exact decimals so spreads compare against operator
/// targets without binary rounding; volume only orders the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub class: String,
    pub volume: f64,
    pub ask_price: Decimal,
    pub bid_price: Decimal,
    pub ask_size: Decimal,
    pub bid_size: Decimal,
    /// Sticky: retained across updates that omit it.
    pub last_trade: Option<Decimal>,
}

/// Numeric feed field: the feed sends either JSON numbers or numeric strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

impl RawNumber {
    /// Finite numeric value. An empty string counts as zero (field not populated).
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            RawNumber::Number(n) => *n,
            RawNumber::Text(s) if s.trim().is_empty() => 0.0,
            RawNumber::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }

    /// Exact decimal value, read from the shortest text form of the number so
    /// `10.4` stays `10.4` rather than its nearest binary double.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            RawNumber::Number(n) if !n.is_finite() => None,
            RawNumber::Number(n) => Decimal::from_str(&n.to_string())
                .ok()
                .or_else(|| Decimal::try_from(*n).ok()),
            RawNumber::Text(s) if s.trim().is_empty() => Some(Decimal::ZERO),
            RawNumber::Text(s) => {
                let s = s.trim();
                Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s)).ok()
            }
        }
    }
}

impl std::fmt::Display for RawNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawNumber::Number(n) => write!(f, "{}", n),
            RawNumber::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<f64> for RawNumber {
    fn from(n: f64) -> Self {
        RawNumber::Number(n)
    }
}

impl From<&str> for RawNumber {
    fn from(s: &str) -> Self {
        RawNumber::Text(s.to_string())
    }
}

/// Last-trade payload: a bare price or an object carrying the price in `x`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawLastTrade {
    Price(RawNumber),
    Detail {
        #[serde(default, alias = "x")]
        price: Option<RawNumber>,
    },
}

impl RawLastTrade {
    pub fn price(&self) -> Option<&RawNumber> {
        match self {
            RawLastTrade::Price(p) => Some(p),
            RawLastTrade::Detail { price } => price.as_ref(),
        }
    }
}

/// Tick record as parsed off the wire, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawTick {
    #[serde(default, alias = "m")]
    pub class: Option<String>,
    #[serde(default, alias = "s")]
    pub symbol: Option<String>,
    #[serde(default, alias = "v")]
    pub volume: Option<RawNumber>,
    #[serde(default, rename = "askPrice", alias = "ap")]
    pub ask_price: Option<RawNumber>,
    #[serde(default, rename = "bidPrice", alias = "bp")]
    pub bid_price: Option<RawNumber>,
    #[serde(default, rename = "askSize", alias = "av")]
    pub ask_size: Option<RawNumber>,
    #[serde(default, rename = "bidSize", alias = "bv")]
    pub bid_size: Option<RawNumber>,
    #[serde(default, rename = "lastTrade", alias = "lt")]
    pub last_trade: Option<RawLastTrade>,
}

/// A feed line is either the record itself or wrapped in `{"data": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TickFrame {
    Envelope { data: RawTick },
    Bare(RawTick),
}

impl TickFrame {
    pub fn into_tick(self) -> RawTick {
        match self {
            TickFrame::Envelope { data } => data,
            TickFrame::Bare(tick) => tick,
        }
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MKT"),
            OrderType::Limit => write!(f, "LMT"),
        }
    }
}

/// Board the order is routed to: legs trade on futures, references on the ready market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    Futures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Rejected,
}

/// Order request handed to the order-entry collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub market: Market,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    /// Account code forwarded to the order-entry link, if configured.
    pub account: Option<String>,
    /// Pair and metric that caused this order, for audit trails.
    pub tag: String,
}

/// Acknowledgement from the order-entry collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub created_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_raw_number_as_decimal_is_exact() {
        assert_eq!(RawNumber::Number(10.4).as_decimal(), Some(d("10.4")));
        assert_eq!(RawNumber::from("10.50").as_decimal(), Some(d("10.50")));
        assert_eq!(RawNumber::from(" 2.5e-3 ").as_decimal(), Some(d("0.0025")));
        assert_eq!(RawNumber::from("").as_decimal(), Some(Decimal::ZERO));
        assert_eq!(RawNumber::from("abc").as_decimal(), None);
        assert_eq!(RawNumber::Number(f64::INFINITY).as_decimal(), None);

        // the binary difference is 0.09999999999999964; the decimal one is exact
        let spread = RawNumber::Number(10.50).as_decimal().unwrap() - RawNumber::Number(10.40).as_decimal().unwrap();
        assert_eq!(spread, d("0.10"));
    }

    #[test]
    fn test_pair_key_format() {
        let key = PairKey::new(&Symbol::new("ABC-FUT"), &Symbol::new("ABC"));
        assert_eq!(key.as_str(), "ABC-FUT-ABC");
        assert_eq!(Symbol::new("ABC-FUT").family('-'), "ABC");
        assert!(Symbol::new("ABC").is_plain('-'));
    }
}
