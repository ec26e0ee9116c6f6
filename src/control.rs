//! Control surface - operator commands arriving as JSON lines
//!
//! ```json
//! {"action":"activate","pairKey":"ABC-FUT-ABC","metric":"major","target":0.05,"depth":3}
//! {"action":"release","pairKey":"ABC-FUT-ABC","metric":"minor"}
//! {"action":"executionActivated","pairKey":"ABC-FUT-ABC","major":{"target":0.05,"depth":1}}
//! ```
//!
//! `executionActivated` is the older combined message. It is split here into
//! independent per-metric activations and never reaches the trigger engine as-is.
//! Targets may be JSON numbers or numeric strings; they become exact decimals
//! when the activation is applied.

use serde::{Deserialize, Serialize};

use crate::core::{MetricKind, PairKey, RawNumber, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlCommand {
    #[serde(rename_all = "camelCase")]
    Activate {
        pair_key: PairKey,
        metric: MetricKind,
        target: Option<RawNumber>,
        depth: Option<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Release { pair_key: PairKey, metric: MetricKind },
    #[serde(rename_all = "camelCase")]
    ExecutionActivated {
        pair_key: PairKey,
        major: Option<Threshold>,
        minor: Option<Threshold>,
    },
}

/// Target and depth of one metric inside a combined activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub target: Option<RawNumber>,
    pub depth: Option<i64>,
}

/// A single trigger operation, after any legacy message has been split.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    Activate {
        pair: PairKey,
        metric: MetricKind,
        target: Option<RawNumber>,
        depth: Option<i64>,
    },
    Release {
        pair: PairKey,
        metric: MetricKind,
    },
}

impl ControlAction {
    pub fn pair(&self) -> &PairKey {
        match self {
            ControlAction::Activate { pair, .. } | ControlAction::Release { pair, .. } => pair,
        }
    }

    pub fn metric(&self) -> MetricKind {
        match self {
            ControlAction::Activate { metric, .. } | ControlAction::Release { metric, .. } => *metric,
        }
    }
}

impl ControlCommand {
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Split into per-metric actions. Major comes before Minor.
    pub fn into_actions(self) -> Vec<ControlAction> {
        match self {
            ControlCommand::Activate {
                pair_key,
                metric,
                target,
                depth,
            } => vec![ControlAction::Activate {
                pair: pair_key,
                metric,
                target,
                depth,
            }],
            ControlCommand::Release { pair_key, metric } => vec![ControlAction::Release {
                pair: pair_key,
                metric,
            }],
            ControlCommand::ExecutionActivated { pair_key, major, minor } => [
                (MetricKind::Major, major),
                (MetricKind::Minor, minor),
            ]
            .into_iter()
            .filter_map(|(metric, threshold)| {
                threshold.map(|t| ControlAction::Activate {
                    pair: pair_key.clone(),
                    metric,
                    target: t.target,
                    depth: t.depth,
                })
            })
            .collect(),
        }
    }
}
