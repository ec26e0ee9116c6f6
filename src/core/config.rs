//! Central configuration for spread-tx.
//!
//! Loads from `spread-tx.toml`. Every field has a default, so a partial file (or
//! no file at all) yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Leg relevance rule
    pub filter: FilterConfig,

    /// Ranked set caps and highlighting
    pub ranking: RankingConfig,

    /// Spread sample history housekeeping
    pub history: HistoryConfig,

    /// Order placement parameters
    pub execution: ExecutionConfig,

    /// Tick / control sockets and snapshot cadence
    pub ipc: IpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Instrument class a leg must carry (e.g. "FUT")
    pub class_tag: String,

    /// Legs need strictly more volume than this
    pub min_volume: f64,

    /// Family suffixes that are never admitted as legs (e.g. "OCT")
    pub excluded_suffixes: Vec<String>,

    /// Separates the family prefix from the contract suffix
    pub family_separator: char,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            class_tag: "FUT".to_string(),
            min_volume: 100_000.0,
            excluded_suffixes: vec!["OCT".to_string(), "OCTB".to_string()],
            family_separator: '-',
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub leg_cap: usize,
    pub reference_cap: usize,
    /// How long an entry is flagged as recently updated in snapshots
    pub highlight_ms: u64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            leg_cap: 20,
            reference_cap: 20,
            highlight_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Samples retained per metric after each trim
    pub window: usize,
    pub trim_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            window: 2000,
            trim_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Lot size of every order leg
    pub quantity: u64,

    /// A dispatch still outstanding after this long counts as failed
    pub dispatch_timeout_ms: u64,

    /// Minimum profitable gap as a fraction of the reference last trade
    pub min_gap_ratio: f64,

    /// Account code forwarded to the order-entry link
    pub client_code: Option<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            quantity: 500,
            dispatch_timeout_ms: 5000,
            min_gap_ratio: 0.00112,
            client_code: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub tick_socket: String,
    pub control_socket: String,
    pub snapshot_interval_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            tick_socket: "/tmp/spread-tx-ticks.sock".to_string(),
            control_socket: "/tmp/spread-tx-control.sock".to_string(),
            snapshot_interval_ms: 2000,
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the default locations, falling back to built-in defaults.
    pub fn load_default() -> Self {
        let candidates = [
            "spread-tx.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/spread-tx.toml"),
        ];

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("📋 Loaded config from {}", path);
                    return cfg;
                }
                Err(e) if Path::new(path).exists() => {
                    tracing::warn!("⚠️ Ignoring {}: {}", path, e);
                }
                Err(_) => {}
            }
        }

        tracing::warn!("⚠️ No spread-tx.toml found, using defaults");
        Self::default()
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.filter.class_tag.is_empty() {
            return Err(Error::Config("filter.class_tag must not be empty".into()));
        }
        if !self.filter.min_volume.is_finite() || self.filter.min_volume < 0.0 {
            return Err(Error::Config("filter.min_volume must be a non-negative number".into()));
        }
        if self.ranking.leg_cap == 0 || self.ranking.reference_cap == 0 {
            return Err(Error::Config("ranking caps must be at least 1".into()));
        }
        if self.history.window == 0 {
            return Err(Error::Config("history.window must be at least 1".into()));
        }
        if self.history.trim_interval_secs == 0 || self.ipc.snapshot_interval_ms == 0 {
            return Err(Error::Config("timer intervals must be non-zero".into()));
        }
        if !self.execution.min_gap_ratio.is_finite() || self.execution.min_gap_ratio < 0.0 {
            return Err(Error::Config("execution.min_gap_ratio must be a non-negative number".into()));
        }
        if self.execution.quantity == 0 {
            return Err(Error::Config("execution.quantity must be at least 1".into()));
        }
        Ok(())
    }
}
