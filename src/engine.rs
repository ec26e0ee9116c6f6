//! Spread pipeline - the single synchronous tick-processing step.
//!
//! Owns every piece of mutable state: the filter, both ranked sets, the spread
//! engine and the trigger engine. The runner is the only caller, so nothing here
//! is locked. Dispatches are not performed here; `on_tick` returns the jobs and
//! the outcome comes back later through `on_completion`.

use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use crate::control::{ControlAction, ControlCommand};
use crate::core::{Config, Error, MetricKind, PairKey, RawNumber, RawTick, Result, Symbol};
use crate::execution::DispatchJob;
use crate::feeds::{QuoteFilter, RankedSet};
use crate::pairing::PairMatcher;
use crate::snapshot::{PairView, PipelineStats, RankedView, Snapshot};
use crate::spread::{SpreadEngine, SpreadSample};
use crate::trigger::{ActivationError, DispatchOutcome, DispatchTicket, TriggerEngine, TriggerEvent};

pub struct SpreadPipeline {
    filter: QuoteFilter,
    legs: RankedSet,
    references: RankedSet,
    matcher: PairMatcher,
    spreads: SpreadEngine,
    triggers: TriggerEngine,
    stats: PipelineStats,
    history_window: usize,
    highlight: Duration,
    min_gap_ratio: Decimal,
}

impl SpreadPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            filter: QuoteFilter::new(&config.filter),
            legs: RankedSet::new(config.ranking.leg_cap),
            references: RankedSet::new(config.ranking.reference_cap),
            matcher: PairMatcher::new(config.filter.family_separator),
            spreads: SpreadEngine::new(),
            triggers: TriggerEngine::new(),
            stats: PipelineStats::default(),
            history_window: config.history.window,
            highlight: Duration::from_millis(config.ranking.highlight_ms),
            min_gap_ratio: RawNumber::Number(config.execution.min_gap_ratio)
                .as_decimal()
                .unwrap_or(Decimal::ZERO),
        }
    }

    pub fn on_tick(&mut self, raw: &RawTick) -> Vec<DispatchJob> {
        self.on_tick_at(raw, Instant::now())
    }

    /// Process one tick: rank it, recompute the affected pairs and feed every
    /// new sample to the triggers. Returns the dispatches that must be started.
    pub fn on_tick_at(&mut self, raw: &RawTick, now: Instant) -> Vec<DispatchJob> {
        self.stats.ticks += 1;

        let Some(quote) = self.filter.parse(raw) else {
            self.stats.malformed += 1;
            tracing::trace!(?raw, "dropping malformed tick");
            return Vec::new();
        };

        if self.filter.is_relevant(&quote) && self.legs.upsert_at(quote.clone(), now) {
            self.stats.new_legs += 1;
            tracing::debug!(symbol = %quote.symbol, volume = quote.volume, "new leg");
        }

        // Runs for every tick, relevant or not: references are admitted by
        // family membership alone.
        if self.matcher.admits_reference(&quote.symbol, &self.legs)
            && self.references.upsert_at(quote.clone(), now)
        {
            self.stats.new_references += 1;
            tracing::debug!(symbol = %quote.symbol, volume = quote.volume, "new reference");
        }

        let family = self.matcher.family(&quote.symbol).to_string();
        let samples = self.recompute_family(&family);
        self.stats.samples += samples.len() as u64;

        let mut jobs = Vec::new();
        for sample in samples {
            if let Some(ticket) = self.triggers.on_sample(&sample.pair, sample.metric, sample.value) {
                match self.job_for(ticket) {
                    Some(job) => jobs.push(job),
                    None => tracing::error!(pair = %sample.pair, "fired for a pair with no spread state"),
                }
            }
        }
        self.stats.dispatches += jobs.len() as u64;
        jobs
    }

    /// Recompute every held leg of `family` against its matched reference.
    fn recompute_family(&mut self, family: &str) -> Vec<SpreadSample> {
        let Self {
            legs,
            references,
            matcher,
            spreads,
            ..
        } = self;

        let mut samples = Vec::new();
        for leg in legs.top_n().iter().filter(|l| matcher.family(l.symbol()) == family) {
            let Some(reference) = matcher.find_reference(family, references) else {
                continue;
            };
            let pair = PairKey::new(leg.symbol(), reference.symbol());
            let reading = spreads.compute(&pair, &leg.quote, &reference.quote);
            for metric in MetricKind::ALL {
                if let Some(value) = reading.get(metric) {
                    samples.push(SpreadSample {
                        pair: pair.clone(),
                        metric,
                        value,
                    });
                }
            }
        }
        samples
    }

    fn job_for(&self, ticket: DispatchTicket) -> Option<DispatchJob> {
        let spread = self.spreads.pair(&ticket.pair)?;
        Some(DispatchJob {
            leg: spread.leg.clone(),
            reference: spread.reference.clone(),
            leg_bid: spread.leg_bid,
            ticket,
        })
    }

    /// Feed back the outcome of a dispatch returned by `on_tick`.
    pub fn on_completion(&mut self, ticket: &DispatchTicket, outcome: DispatchOutcome) {
        self.triggers.complete(ticket, outcome);
    }

    /// Apply an operator command. Returns one result per action; a rejected
    /// action changes nothing.
    pub fn apply_control(&mut self, command: ControlCommand) -> Vec<Result<()>> {
        let actions = command.into_actions();
        if actions.is_empty() {
            tracing::warn!("control command carried no activations");
        }
        actions.into_iter().map(|action| self.apply_action(action)).collect()
    }

    pub fn apply_action(&mut self, action: ControlAction) -> Result<()> {
        let result = match action {
            ControlAction::Activate {
                pair,
                metric,
                target,
                depth,
            } => decimal_target(target)
                .and_then(|target| self.triggers.activate(pair, metric, target, depth))
                .map_err(Error::from),
            ControlAction::Release { pair, metric } => {
                if self.triggers.release(&pair, metric) {
                    Ok(())
                } else {
                    Err(Error::InvalidState(format!("no {} trigger armed for {}", metric, pair)))
                }
            }
        };
        if let Err(e) = &result {
            self.stats.rejected_commands += 1;
            tracing::warn!("⚠️ control command rejected: {}", e);
        }
        result
    }

    /// Trim sample history to the configured window. Returns samples dropped.
    pub fn housekeeping(&mut self) -> usize {
        let dropped = self.spreads.trim_history(self.history_window);
        self.stats.trimmed_samples += dropped as u64;
        if dropped > 0 {
            tracing::debug!(dropped, window = self.history_window, "trimmed spread history");
        }
        dropped
    }

    pub fn drain_events(&mut self) -> Vec<TriggerEvent> {
        self.triggers.drain_events()
    }

    /// Count trigger events that could not be handed to the event consumer.
    pub fn record_dropped_events(&mut self, count: u64) {
        self.stats.dropped_events += count;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Snapshot {
        let mut pairs: Vec<PairView> = self
            .spreads
            .pairs()
            .map(|spread| PairView::new(spread, self.min_gap_ratio))
            .collect();
        pairs.sort_by(|a, b| a.pair.cmp(&b.pair));

        Snapshot {
            taken_at: chrono::Utc::now(),
            legs: RankedView::from_entries(self.legs.top_n(), now, self.highlight),
            references: RankedView::from_entries(self.references.top_n(), now, self.highlight),
            pairs,
            triggers: self.triggers.tracks(),
            stats: self.stats,
            trigger_stats: self.triggers.stats(),
        }
    }

    pub fn legs(&self) -> &RankedSet {
        &self.legs
    }

    pub fn references(&self) -> &RankedSet {
        &self.references
    }

    pub fn spreads(&self) -> &SpreadEngine {
        &self.spreads
    }

    pub fn triggers(&self) -> &TriggerEngine {
        &self.triggers
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Pair key a leg is currently matched under, if it has a reference.
    pub fn pair_for(&self, leg: &Symbol) -> Option<PairKey> {
        let entry = self.legs.get(leg)?;
        let family = self.matcher.family(entry.symbol());
        let reference = self.matcher.find_reference(family, &self.references)?;
        Some(PairKey::new(entry.symbol(), reference.symbol()))
    }
}

/// Operator targets must be decimal numbers; an empty string is not one.
fn decimal_target(target: Option<RawNumber>) -> std::result::Result<Option<Decimal>, ActivationError> {
    match target {
        None => Ok(None),
        Some(RawNumber::Text(s)) if s.trim().is_empty() => Err(ActivationError::InvalidTarget(s)),
        Some(raw) => raw
            .as_decimal()
            .map(Some)
            .ok_or_else(|| ActivationError::InvalidTarget(raw.to_string())),
    }
}
