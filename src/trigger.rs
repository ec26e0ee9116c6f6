//! Trigger engine - one threshold-crossing state machine per (pair, metric).
//!
//! ```text
//!   Idle ──activate──▶ Active ──crossing──▶ Active + in flight
//!    ▲                   ▲  │                  │
//!    │                   │  └──release────┐    ├─ failure: budget kept, retry on next crossing
//!    │                   └─ success, n>0 ─┼────┤
//!    └──────── success, n=0 / release ◀───┘────┘
//! ```
//!
//! Major fires on `value >= target`, Minor on `value <= target`. While a dispatch
//! is outstanding further crossings for that (pair, metric) are ignored, so it
//! never has two dispatches in flight. The guard belongs to the slot rather than
//! the track: re-arming or releasing does not lift it until the outstanding
//! dispatch reports back.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::core::{MetricKind, PairKey};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivationError {
    #[error("missing target for {0} activation")]
    MissingTarget(MetricKind),

    #[error("missing depth for {0} activation")]
    MissingDepth(MetricKind),

    #[error("target {0} is not a decimal number")]
    InvalidTarget(String),

    #[error("depth {0} must be between 1 and {max}", max = u32::MAX)]
    InvalidDepth(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Idle,
    Active,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerTrack {
    pub target: Decimal,
    pub depth: u32,
    pub remaining: u32,
    pub generation: u64,
}

/// Armed track plus the dispatch guard for one (pair, metric).
#[derive(Debug, Default)]
struct Slot {
    track: Option<TriggerTrack>,
    /// Ticket id of the outstanding dispatch, if any.
    in_flight: Option<u64>,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.track.is_none() && self.in_flight.is_none()
    }
}

#[derive(Debug, Default)]
struct PairTracks {
    major: Slot,
    minor: Slot,
}

impl PairTracks {
    fn slot_mut(&mut self, metric: MetricKind) -> &mut Slot {
        match metric {
            MetricKind::Major => &mut self.major,
            MetricKind::Minor => &mut self.minor,
        }
    }

    fn slot(&self, metric: MetricKind) -> &Slot {
        match metric {
            MetricKind::Major => &self.major,
            MetricKind::Minor => &self.minor,
        }
    }

    fn is_vacant(&self) -> bool {
        self.major.is_vacant() && self.minor.is_vacant()
    }
}

/// Handed out when a track fires; must come back through `complete`.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTicket {
    pub id: u64,
    pub pair: PairKey,
    pub metric: MetricKind,
    pub generation: u64,
    pub value: Decimal,
    pub target: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    Exhausted,
    Released,
    InvariantViolation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Activated {
        pair: PairKey,
        metric: MetricKind,
        target: Decimal,
        depth: u32,
    },
    Fired {
        pair: PairKey,
        metric: MetricKind,
        ticket: u64,
        value: Decimal,
        target: Decimal,
    },
    Dispatched {
        pair: PairKey,
        metric: MetricKind,
        remaining: u32,
    },
    DispatchFailed {
        pair: PairKey,
        metric: MetricKind,
        reason: String,
    },
    Reset {
        pair: PairKey,
        metric: MetricKind,
        reason: ResetReason,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TriggerStats {
    pub fired: u64,
    pub dispatched: u64,
    pub failed: u64,
    /// Crossings ignored because the slot already had a dispatch in flight.
    pub suppressed: u64,
    pub stale_completions: u64,
    pub invariant_violations: u64,
}

/// Read-only view of one track for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackView {
    pub pair: PairKey,
    pub metric: MetricKind,
    pub state: TrackState,
    pub target: Decimal,
    pub depth: u32,
    pub remaining: u32,
    pub in_flight: bool,
}

/// Fixed, asymmetric crossing rule.
#[inline]
pub fn crossed(metric: MetricKind, value: Decimal, target: Decimal) -> bool {
    match metric {
        MetricKind::Major => value >= target,
        MetricKind::Minor => value <= target,
    }
}

#[derive(Debug, Default)]
pub struct TriggerEngine {
    tracks: HashMap<PairKey, PairTracks>,
    next_ticket: u64,
    next_generation: u64,
    events: Vec<TriggerEvent>,
    stats: TriggerStats,
}

impl TriggerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) a track. A rejected request leaves every track untouched.
    ///
    /// Re-arming replaces the track wholesale; the outcome of a dispatch that was
    /// in flight for the old track no longer affects the budget, but it still
    /// holds the slot until it reports back.
    pub fn activate(
        &mut self,
        pair: PairKey,
        metric: MetricKind,
        target: Option<Decimal>,
        depth: Option<i64>,
    ) -> Result<(), ActivationError> {
        let target = target.ok_or(ActivationError::MissingTarget(metric))?;
        let depth = depth.ok_or(ActivationError::MissingDepth(metric))?;
        let depth = u32::try_from(depth)
            .ok()
            .filter(|d| *d >= 1)
            .ok_or(ActivationError::InvalidDepth(depth))?;

        self.next_generation += 1;
        let track = TriggerTrack {
            target,
            depth,
            remaining: depth,
            generation: self.next_generation,
        };

        let slot = self.tracks.entry(pair.clone()).or_default().slot_mut(metric);
        slot.track = Some(track);
        if let Some(ticket) = slot.in_flight {
            tracing::debug!(%pair, %metric, ticket, "re-armed track with a dispatch still in flight");
        }

        tracing::info!(%pair, %metric, %target, depth, "🎯 trigger armed");
        self.events.push(TriggerEvent::Activated {
            pair,
            metric,
            target,
            depth,
        });
        Ok(())
    }

    /// Manually disarm a track. Returns false when there was nothing to release.
    pub fn release(&mut self, pair: &PairKey, metric: MetricKind) -> bool {
        let present = self.track(pair, metric).is_some();
        if present {
            self.clear(pair, metric, ResetReason::Released);
        }
        present
    }

    /// Feed one sample. Returns a ticket when the track fires and a dispatch
    /// must be started.
    pub fn on_sample(&mut self, pair: &PairKey, metric: MetricKind, value: Decimal) -> Option<DispatchTicket> {
        let slot = self.tracks.get_mut(pair)?.slot_mut(metric);
        let track = slot.track.as_ref()?;

        if track.remaining == 0 {
            self.stats.invariant_violations += 1;
            tracing::error!(%pair, %metric, "active track with no remaining budget, forcing release");
            self.clear(pair, metric, ResetReason::InvariantViolation);
            return None;
        }

        if !crossed(metric, value, track.target) {
            return None;
        }

        if slot.in_flight.is_some() {
            self.stats.suppressed += 1;
            tracing::trace!(%pair, %metric, %value, "crossing ignored, dispatch in flight");
            return None;
        }

        self.next_ticket += 1;
        let ticket = DispatchTicket {
            id: self.next_ticket,
            pair: pair.clone(),
            metric,
            generation: track.generation,
            value,
            target: track.target,
        };
        slot.in_flight = Some(ticket.id);

        self.stats.fired += 1;
        tracing::info!(%pair, %metric, %value, target = %ticket.target, remaining = track.remaining, "🚨 trigger fired");
        self.events.push(TriggerEvent::Fired {
            pair: pair.clone(),
            metric,
            ticket: ticket.id,
            value,
            target: ticket.target,
        });
        Some(ticket)
    }

    /// Apply the outcome of a dispatch started by `on_sample`.
    ///
    /// The outcome always lifts the slot's guard when it matches the
    /// outstanding ticket. Only a success for the same generation consumes
    /// budget; outcomes for released or re-armed tracks are discarded.
    pub fn complete(&mut self, ticket: &DispatchTicket, outcome: DispatchOutcome) {
        let pair = &ticket.pair;
        let metric = ticket.metric;

        let Some(tracks) = self.tracks.get_mut(pair) else {
            self.stats.stale_completions += 1;
            tracing::debug!(%pair, %metric, ticket = ticket.id, ?outcome, "discarding outcome for an unknown pair");
            return;
        };
        let slot = tracks.slot_mut(metric);
        if slot.in_flight != Some(ticket.id) {
            self.stats.stale_completions += 1;
            tracing::debug!(%pair, %metric, ticket = ticket.id, ?outcome, "discarding outcome for a ticket no longer outstanding");
            return;
        }
        slot.in_flight = None;

        let track = match slot.track.as_mut().filter(|t| t.generation == ticket.generation) {
            Some(track) => track,
            None => {
                self.stats.stale_completions += 1;
                tracing::debug!(%pair, %metric, ticket = ticket.id, ?outcome, "discarding outcome for a released track");
                if tracks.is_vacant() {
                    self.tracks.remove(pair);
                }
                return;
            }
        };

        match outcome {
            DispatchOutcome::Success => match track.remaining.checked_sub(1) {
                Some(remaining) => {
                    track.remaining = remaining;
                    self.stats.dispatched += 1;
                    tracing::info!(%pair, %metric, remaining, "✅ execution dispatched");
                    self.events.push(TriggerEvent::Dispatched {
                        pair: pair.clone(),
                        metric,
                        remaining,
                    });
                    if remaining == 0 {
                        self.clear(pair, metric, ResetReason::Exhausted);
                    }
                }
                None => {
                    self.stats.invariant_violations += 1;
                    tracing::error!(%pair, %metric, "budget underflow on dispatch success, forcing release");
                    self.clear(pair, metric, ResetReason::InvariantViolation);
                }
            },
            DispatchOutcome::Failed(reason) => {
                self.stats.failed += 1;
                tracing::warn!(%pair, %metric, remaining = track.remaining, %reason, "❌ execution dispatch failed, budget kept");
                self.events.push(TriggerEvent::DispatchFailed {
                    pair: pair.clone(),
                    metric,
                    reason,
                });
            }
        }
    }

    fn clear(&mut self, pair: &PairKey, metric: MetricKind, reason: ResetReason) {
        if let Some(tracks) = self.tracks.get_mut(pair) {
            tracks.slot_mut(metric).track = None;
            if tracks.is_vacant() {
                self.tracks.remove(pair);
            }
        }
        tracing::info!(%pair, %metric, ?reason, "trigger reset");
        self.events.push(TriggerEvent::Reset {
            pair: pair.clone(),
            metric,
            reason,
        });
    }

    pub fn track(&self, pair: &PairKey, metric: MetricKind) -> Option<&TriggerTrack> {
        self.tracks.get(pair)?.slot(metric).track.as_ref()
    }

    pub fn state(&self, pair: &PairKey, metric: MetricKind) -> TrackState {
        match self.track(pair, metric) {
            Some(_) => TrackState::Active,
            None => TrackState::Idle,
        }
    }

    pub fn remaining(&self, pair: &PairKey, metric: MetricKind) -> Option<u32> {
        self.track(pair, metric).map(|t| t.remaining)
    }

    pub fn is_in_flight(&self, pair: &PairKey, metric: MetricKind) -> bool {
        self.tracks
            .get(pair)
            .is_some_and(|tracks| tracks.slot(metric).in_flight.is_some())
    }

    /// Whether any track (either metric) is armed for `pair`.
    pub fn has_pair(&self, pair: &PairKey) -> bool {
        self.tracks.get(pair).is_some_and(|tracks| {
            MetricKind::ALL
                .into_iter()
                .any(|metric| tracks.slot(metric).track.is_some())
        })
    }

    /// Active tracks, sorted by pair then metric.
    pub fn tracks(&self) -> Vec<TrackView> {
        let mut views: Vec<TrackView> = self
            .tracks
            .iter()
            .flat_map(|(pair, tracks)| {
                MetricKind::ALL.into_iter().filter_map(move |metric| {
                    let slot = tracks.slot(metric);
                    slot.track.as_ref().map(|t| TrackView {
                        pair: pair.clone(),
                        metric,
                        state: TrackState::Active,
                        target: t.target,
                        depth: t.depth,
                        remaining: t.remaining,
                        in_flight: slot.in_flight.is_some(),
                    })
                })
            })
            .collect();
        views.sort_by(|a, b| {
            a.pair
                .cmp(&b.pair)
                .then_with(|| (a.metric == MetricKind::Minor).cmp(&(b.metric == MetricKind::Minor)))
        });
        views
    }

    /// Take the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<TriggerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn stats(&self) -> TriggerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> PairKey {
        PairKey::from("ABC-FUT-ABC")
    }

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn armed(metric: MetricKind, target: &str, depth: i64) -> TriggerEngine {
        let mut engine = TriggerEngine::new();
        engine.activate(pair(), metric, Some(d(target)), Some(depth)).unwrap();
        engine
    }

    #[test]
    fn test_crossing_directions() {
        assert!(crossed(MetricKind::Major, d("5.0"), d("5.0")));
        assert!(crossed(MetricKind::Major, d("5.1"), d("5.0")));
        assert!(!crossed(MetricKind::Major, d("4.9"), d("5.0")));
        assert!(crossed(MetricKind::Minor, d("0.5"), d("0.5")));
        assert!(crossed(MetricKind::Minor, d("0.4"), d("0.5")));
        assert!(!crossed(MetricKind::Minor, d("0.6"), d("0.5")));
    }

    #[test]
    fn test_budget_exhausts_after_depth() {
        let mut engine = armed(MetricKind::Major, "5.0", 3);
        let mut fired = 0;

        for _ in 0..4 {
            if let Some(ticket) = engine.on_sample(&pair(), MetricKind::Major, d("5.0")) {
                fired += 1;
                engine.complete(&ticket, DispatchOutcome::Success);
            }
        }

        assert_eq!(fired, 3);
        assert_eq!(engine.state(&pair(), MetricKind::Major), TrackState::Idle);
        assert!(!engine.has_pair(&pair()));

        let events = engine.drain_events();
        let remaining: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TriggerEvent::Dispatched { remaining, .. } => Some(*remaining),
                _ => None,
            })
            .collect();
        assert_eq!(remaining, vec![2, 1, 0]);
        assert!(matches!(
            events.last(),
            Some(TriggerEvent::Reset {
                reason: ResetReason::Exhausted,
                ..
            })
        ));
    }

    #[test]
    fn test_failure_keeps_budget_and_retries() {
        let mut engine = armed(MetricKind::Major, "5.0", 3);

        let t1 = engine.on_sample(&pair(), MetricKind::Major, d("5.0")).unwrap();
        engine.complete(&t1, DispatchOutcome::Success);
        assert_eq!(engine.remaining(&pair(), MetricKind::Major), Some(2));

        let t2 = engine.on_sample(&pair(), MetricKind::Major, d("5.0")).unwrap();
        engine.complete(&t2, DispatchOutcome::Failed("session down".into()));
        assert_eq!(engine.remaining(&pair(), MetricKind::Major), Some(2));
        assert_eq!(engine.state(&pair(), MetricKind::Major), TrackState::Active);
        assert!(!engine.is_in_flight(&pair(), MetricKind::Major));

        // next qualifying sample retries
        let t3 = engine.on_sample(&pair(), MetricKind::Major, d("5.2")).unwrap();
        assert_ne!(t3.id, t2.id);
        engine.complete(&t3, DispatchOutcome::Success);
        assert_eq!(engine.remaining(&pair(), MetricKind::Major), Some(1));

        assert_eq!(engine.stats().failed, 1);
        assert!(engine.drain_events().iter().any(|e| matches!(
            e,
            TriggerEvent::DispatchFailed { reason, .. } if reason == "session down"
        )));
    }

    #[test]
    fn test_single_dispatch_in_flight() {
        let mut engine = armed(MetricKind::Minor, "0.5", 5);

        let first = engine.on_sample(&pair(), MetricKind::Minor, d("0.4"));
        assert!(first.is_some());
        // more qualifying samples before the first resolves
        assert!(engine.on_sample(&pair(), MetricKind::Minor, d("0.3")).is_none());
        assert!(engine.on_sample(&pair(), MetricKind::Minor, d("0.2")).is_none());
        assert_eq!(engine.stats().suppressed, 2);
        assert_eq!(engine.stats().fired, 1);

        engine.complete(&first.unwrap(), DispatchOutcome::Success);
        assert_eq!(engine.remaining(&pair(), MetricKind::Minor), Some(4));
        assert!(engine.on_sample(&pair(), MetricKind::Minor, d("0.2")).is_some());
    }

    #[test]
    fn test_non_crossing_sample_does_nothing() {
        let mut engine = armed(MetricKind::Minor, "0.5", 1);
        assert!(engine.on_sample(&pair(), MetricKind::Minor, d("0.51")).is_none());
        assert!(engine.on_sample(&pair(), MetricKind::Major, d("100.0")).is_none());
        assert_eq!(engine.stats(), TriggerStats::default());
    }

    #[test]
    fn test_metrics_are_independent() {
        let mut engine = armed(MetricKind::Major, "1.0", 1);
        engine.activate(pair(), MetricKind::Minor, Some(d("0.1")), Some(2)).unwrap();

        let ticket = engine.on_sample(&pair(), MetricKind::Major, d("1.5")).unwrap();
        engine.complete(&ticket, DispatchOutcome::Success);

        // Major exhausted, Minor untouched and the pair record survives
        assert_eq!(engine.state(&pair(), MetricKind::Major), TrackState::Idle);
        assert_eq!(engine.remaining(&pair(), MetricKind::Minor), Some(2));
        assert!(engine.has_pair(&pair()));

        assert!(engine.release(&pair(), MetricKind::Minor));
        assert!(!engine.has_pair(&pair()));
    }

    #[test]
    fn test_release_discards_in_flight_outcome() {
        let mut engine = armed(MetricKind::Major, "1.0", 2);
        let ticket = engine.on_sample(&pair(), MetricKind::Major, d("2.0")).unwrap();

        assert!(engine.release(&pair(), MetricKind::Major));
        assert!(!engine.release(&pair(), MetricKind::Major));

        engine.complete(&ticket, DispatchOutcome::Success);
        assert_eq!(engine.state(&pair(), MetricKind::Major), TrackState::Idle);
        assert_eq!(engine.stats().stale_completions, 1);
        assert_eq!(engine.stats().dispatched, 0);
    }

    #[test]
    fn test_rearm_ignores_old_ticket() {
        let mut engine = armed(MetricKind::Major, "1.0", 2);
        let old = engine.on_sample(&pair(), MetricKind::Major, d("2.0")).unwrap();

        engine.activate(pair(), MetricKind::Major, Some(d("3.0")), Some(4)).unwrap();
        engine.complete(&old, DispatchOutcome::Success);

        let track = engine.track(&pair(), MetricKind::Major).unwrap();
        assert_eq!(track.remaining, 4);
        assert_eq!(track.target, d("3"));
        assert!(!engine.is_in_flight(&pair(), MetricKind::Major));
        assert_eq!(engine.stats().stale_completions, 1);
        assert_eq!(engine.stats().dispatched, 0);
    }

    #[test]
    fn test_rearm_keeps_dispatch_guard() {
        let mut engine = armed(MetricKind::Major, "1.0", 2);
        let first = engine.on_sample(&pair(), MetricKind::Major, d("2.0"));
        assert!(first.is_some());

        engine.activate(pair(), MetricKind::Major, Some(d("1.0")), Some(2)).unwrap();
        assert!(engine.is_in_flight(&pair(), MetricKind::Major));
        assert!(engine.tracks()[0].in_flight);

        // still one dispatch outstanding for this slot
        assert!(engine.on_sample(&pair(), MetricKind::Major, d("2.0")).is_none());
        assert_eq!(engine.stats().fired, 1);
        assert_eq!(engine.stats().suppressed, 1);

        // the old outcome lifts the guard without touching the new budget
        engine.complete(&first.unwrap(), DispatchOutcome::Success);
        assert_eq!(engine.remaining(&pair(), MetricKind::Major), Some(2));
        let next = engine.on_sample(&pair(), MetricKind::Major, d("2.0")).unwrap();
        engine.complete(&next, DispatchOutcome::Success);
        assert_eq!(engine.remaining(&pair(), MetricKind::Major), Some(1));
    }

    #[test]
    fn test_release_then_rearm_keeps_dispatch_guard() {
        let mut engine = armed(MetricKind::Minor, "0.5", 1);
        let first = engine.on_sample(&pair(), MetricKind::Minor, d("0.4")).unwrap();

        assert!(engine.release(&pair(), MetricKind::Minor));
        assert!(!engine.has_pair(&pair()));
        assert!(engine.tracks().is_empty());

        engine.activate(pair(), MetricKind::Minor, Some(d("0.5")), Some(1)).unwrap();
        assert!(engine.on_sample(&pair(), MetricKind::Minor, d("0.4")).is_none());

        engine.complete(&first, DispatchOutcome::Failed("late".into()));
        assert_eq!(engine.stats().failed, 0);
        assert_eq!(engine.stats().stale_completions, 1);
        assert!(engine.on_sample(&pair(), MetricKind::Minor, d("0.4")).is_some());
    }

    #[test]
    fn test_target_equal_to_spread_fires() {
        let mut engine = armed(MetricKind::Major, "0.10", 1);
        // 10.50 bid against a 10.40 ask
        let value = d("10.50") - d("10.40");
        assert!(engine.on_sample(&pair(), MetricKind::Major, value).is_some());

        let mut engine = armed(MetricKind::Minor, "0.30", 1);
        let value = (d("10.30") - d("10.60")).abs();
        assert!(engine.on_sample(&pair(), MetricKind::Minor, value).is_some());
    }

    #[test]
    fn test_invalid_activation_keeps_state() {
        let mut engine = armed(MetricKind::Major, "1.0", 2);

        assert_eq!(
            engine.activate(pair(), MetricKind::Major, None, Some(3)),
            Err(ActivationError::MissingTarget(MetricKind::Major))
        );
        assert_eq!(
            engine.activate(pair(), MetricKind::Major, Some(d("2.0")), None),
            Err(ActivationError::MissingDepth(MetricKind::Major))
        );
        assert_eq!(
            engine.activate(pair(), MetricKind::Major, Some(d("2.0")), Some(0)),
            Err(ActivationError::InvalidDepth(0))
        );
        assert_eq!(
            engine.activate(pair(), MetricKind::Major, Some(d("2.0")), Some(i64::from(u32::MAX) + 1)),
            Err(ActivationError::InvalidDepth(i64::from(u32::MAX) + 1))
        );

        let track = engine.track(&pair(), MetricKind::Major).unwrap();
        assert_eq!(track.target, Decimal::ONE);
        assert_eq!(track.remaining, 2);
        // rejected requests do not touch the other metric either
        assert_eq!(engine.state(&pair(), MetricKind::Minor), TrackState::Idle);
    }

    #[test]
    fn test_tracks_view_sorted() {
        let mut engine = TriggerEngine::new();
        engine.activate(PairKey::from("B-F-B"), MetricKind::Minor, Some(d("0.1")), Some(1)).unwrap();
        engine.activate(PairKey::from("A-F-A"), MetricKind::Minor, Some(d("0.1")), Some(1)).unwrap();
        engine.activate(PairKey::from("A-F-A"), MetricKind::Major, Some(d("0.1")), Some(1)).unwrap();

        let views = engine.tracks();
        let order: Vec<(&str, MetricKind)> = views.iter().map(|v| (v.pair.as_str(), v.metric)).collect();
        assert_eq!(
            order,
            vec![
                ("A-F-A", MetricKind::Major),
                ("A-F-A", MetricKind::Minor),
                ("B-F-B", MetricKind::Minor)
            ]
        );
    }
}
