//! Cooperative runtime: one task owns the pipeline and multiplexes ticks,
//! operator commands, dispatch completions and the housekeeping timers.
//!
//! Dispatches run on their own tasks and only ever talk back through the
//! completion channel, so pipeline state is mutated from this loop alone.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{MissedTickBehavior, interval};

use crate::control::ControlCommand;
use crate::core::{Config, RawTick};
use crate::engine::SpreadPipeline;
use crate::execution::{DispatchJob, ExecutionDispatcher};
use crate::snapshot::Snapshot;
use crate::trigger::{DispatchOutcome, DispatchTicket, TriggerEvent};

#[derive(Debug)]
struct Completion {
    ticket: DispatchTicket,
    outcome: DispatchOutcome,
}

pub struct Runner {
    pipeline: SpreadPipeline,
    dispatcher: Arc<dyn ExecutionDispatcher>,
    dispatch_timeout: Duration,
    trim_every: Duration,
    snapshot_every: Duration,
    snapshots: watch::Sender<Snapshot>,
    events: Option<flume::Sender<TriggerEvent>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
}

impl Runner {
    pub fn new(config: &Config, dispatcher: Arc<dyn ExecutionDispatcher>) -> (Self, watch::Receiver<Snapshot>) {
        let pipeline = SpreadPipeline::new(config);
        let (snapshots, snapshot_rx) = watch::channel(pipeline.snapshot());
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let runner = Self {
            pipeline,
            dispatcher,
            dispatch_timeout: Duration::from_millis(config.execution.dispatch_timeout_ms),
            trim_every: Duration::from_secs(config.history.trim_interval_secs),
            snapshot_every: Duration::from_millis(config.ipc.snapshot_interval_ms),
            snapshots,
            events: None,
            completions_tx,
            completions_rx,
            in_flight: 0,
        };
        (runner, snapshot_rx)
    }

    /// Forward trigger events (fired, dispatched, failed, reset) to `tx`.
    pub fn with_events(mut self, tx: flume::Sender<TriggerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Run until `shutdown` resolves or both input channels close. Outstanding
    /// dispatches are awaited before returning. Returns the final pipeline.
    pub async fn run(
        mut self,
        ticks: flume::Receiver<RawTick>,
        control: flume::Receiver<ControlCommand>,
        shutdown: impl Future<Output = ()>,
    ) -> SpreadPipeline {
        let mut trim = interval(self.trim_every);
        trim.set_missed_tick_behavior(MissedTickBehavior::Delay);
        trim.tick().await;
        let mut snapshot = interval(self.snapshot_every);
        snapshot.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);
        let mut ticks_open = true;
        let mut control_open = true;

        tracing::info!("🚀 spread pipeline running");
        while ticks_open || control_open {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }

                tick = ticks.recv_async(), if ticks_open => match tick {
                    Ok(raw) => self.handle_tick(raw),
                    Err(_) => {
                        tracing::info!("tick channel closed");
                        ticks_open = false;
                    }
                },

                command = control.recv_async(), if control_open => match command {
                    Ok(command) => self.handle_command(command),
                    Err(_) => {
                        tracing::debug!("control channel closed");
                        control_open = false;
                    }
                },

                Some(done) = self.completions_rx.recv() => self.handle_completion(done),

                _ = trim.tick() => {
                    self.pipeline.housekeeping();
                }

                _ = snapshot.tick() => self.publish(),
            }
        }

        if self.in_flight > 0 {
            tracing::info!(in_flight = self.in_flight, "waiting for outstanding dispatches");
        }
        while self.in_flight > 0 {
            match self.completions_rx.recv().await {
                Some(done) => self.handle_completion(done),
                None => break,
            }
        }

        self.publish();
        self.pipeline
    }

    fn handle_tick(&mut self, raw: RawTick) {
        for job in self.pipeline.on_tick(&raw) {
            self.spawn_dispatch(job);
        }
        self.forward_events();
    }

    fn handle_command(&mut self, command: ControlCommand) {
        tracing::debug!(?command, "control command");
        let accepted = self
            .pipeline
            .apply_control(command)
            .iter()
            .filter(|r| r.is_ok())
            .count();
        tracing::debug!(accepted, "control command applied");
        self.forward_events();
    }

    fn handle_completion(&mut self, done: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.pipeline.on_completion(&done.ticket, done.outcome);
        self.forward_events();
    }

    fn spawn_dispatch(&mut self, job: DispatchJob) {
        let dispatcher = self.dispatcher.clone();
        let tx = self.completions_tx.clone();
        let timeout = self.dispatch_timeout;
        self.in_flight += 1;

        tokio::spawn(async move {
            let attempt = AssertUnwindSafe(job.run(dispatcher.as_ref())).catch_unwind();
            let outcome = match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(Ok(()))) => DispatchOutcome::Success,
                Ok(Ok(Err(e))) => DispatchOutcome::Failed(e.to_string()),
                Ok(Err(_)) => DispatchOutcome::Failed("dispatcher panicked".to_string()),
                Err(_) => DispatchOutcome::Failed(format!("no outcome after {:?}", timeout)),
            };
            let _ = tx.send(Completion {
                ticket: job.ticket,
                outcome,
            });
        });
    }

    /// Hand drained events to the consumer without blocking the loop. Events
    /// that do not fit are dropped and counted in the pipeline stats.
    fn forward_events(&mut self) {
        let events = self.pipeline.drain_events();
        let Some(tx) = &self.events else {
            return;
        };

        let mut dropped = 0;
        for event in events {
            if tx.try_send(event).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.pipeline.record_dropped_events(dropped);
            tracing::warn!(
                dropped,
                total = self.pipeline.stats().dropped_events,
                "⚠️ event consumer lagging, trigger events dropped"
            );
        }
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.pipeline.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, MetricKind, PairKey, RawNumber, Result, Symbol};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Panicking;

    #[async_trait]
    impl ExecutionDispatcher for Panicking {
        async fn place_major_execution(&self, _: &PairKey, _: &Symbol, _: &Symbol, _: Decimal) -> Result<()> {
            panic!("order link exploded");
        }

        async fn place_minor_execution(&self, _: &PairKey, _: &Symbol, _: &Symbol) -> Result<()> {
            Err(Error::Dispatch("unused".into()))
        }
    }

    struct Hanging(AtomicUsize);

    #[async_trait]
    impl ExecutionDispatcher for Hanging {
        async fn place_major_execution(&self, _: &PairKey, _: &Symbol, _: &Symbol, _: Decimal) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn place_minor_execution(&self, _: &PairKey, _: &Symbol, _: &Symbol) -> Result<()> {
            Ok(())
        }
    }

    fn tick(class: &str, symbol: &str, volume: f64, bid: f64, ask: f64) -> RawTick {
        RawTick {
            class: Some(class.into()),
            symbol: Some(symbol.into()),
            volume: Some(RawNumber::Number(volume)),
            ask_price: Some(RawNumber::Number(ask)),
            bid_price: Some(RawNumber::Number(bid)),
            ..RawTick::default()
        }
    }

    fn activate_major(depth: i64) -> ControlCommand {
        ControlCommand::Activate {
            pair_key: PairKey::from("ABC-FUT-ABC"),
            metric: MetricKind::Major,
            target: Some(RawNumber::Number(0.05)),
            depth: Some(depth),
        }
    }

    async fn wait_for(snapshots: &mut watch::Receiver<Snapshot>, ready: impl Fn(&Snapshot) -> bool) {
        loop {
            if ready(&*snapshots.borrow_and_update()) {
                return;
            }
            snapshots.changed().await.unwrap();
        }
    }

    /// Builds the pair, arms Major with depth 1, then sends one crossing tick.
    async fn drive(dispatcher: Arc<dyn ExecutionDispatcher>, config: Config) -> SpreadPipeline {
        let (runner, mut snapshots) = Runner::new(&config, dispatcher);
        let (tick_tx, tick_rx) = flume::unbounded();
        let (ctl_tx, ctl_rx) = flume::unbounded();
        let handle = tokio::spawn(runner.run(tick_rx, ctl_rx, std::future::pending()));

        tick_tx.send(tick("FUT", "ABC-FUT", 200_000.0, 10.50, 10.60)).unwrap();
        tick_tx.send(tick("REG", "ABC", 5_000_000.0, 10.30, 10.40)).unwrap();
        wait_for(&mut snapshots, |s| !s.pairs.is_empty()).await;

        ctl_tx.send(activate_major(1)).unwrap();
        wait_for(&mut snapshots, |s| !s.triggers.is_empty()).await;

        tick_tx.send(tick("FUT", "ABC-FUT", 200_000.0, 10.50, 10.60)).unwrap();
        drop(tick_tx);
        drop(ctl_tx);

        handle.await.unwrap()
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.ipc.snapshot_interval_ms = 5;
        config.execution.dispatch_timeout_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_panicking_dispatch_is_a_failure() {
        let pipeline = drive(Arc::new(Panicking), fast_config()).await;
        let pair = PairKey::from("ABC-FUT-ABC");

        // budget untouched, track still armed
        assert_eq!(pipeline.triggers().remaining(&pair, MetricKind::Major), Some(1));
        assert!(!pipeline.triggers().is_in_flight(&pair, MetricKind::Major));
        assert_eq!(pipeline.triggers().stats().failed, 1);
    }

    #[tokio::test]
    async fn test_hanging_dispatch_times_out() {
        let hanging = Arc::new(Hanging(AtomicUsize::new(0)));
        let pipeline = drive(hanging.clone(), fast_config()).await;
        let pair = PairKey::from("ABC-FUT-ABC");

        assert_eq!(hanging.0.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.triggers().remaining(&pair, MetricKind::Major), Some(1));
        assert_eq!(pipeline.triggers().stats().failed, 1);
    }

    #[tokio::test]
    async fn test_full_event_channel_counts_drops() {
        let (runner, _snapshots) = Runner::new(&fast_config(), Arc::new(Panicking));
        let (event_tx, event_rx) = flume::bounded(1);
        let runner = runner.with_events(event_tx);
        let (tick_tx, tick_rx) = flume::unbounded::<RawTick>();
        let (ctl_tx, ctl_rx) = flume::unbounded();

        // each activation emits one event; nobody drains the channel
        ctl_tx.send(activate_major(1)).unwrap();
        ctl_tx.send(activate_major(2)).unwrap();
        drop(tick_tx);
        drop(ctl_tx);

        let pipeline = runner.run(tick_rx, ctl_rx, std::future::pending()).await;
        assert_eq!(event_rx.len(), 1);
        assert_eq!(pipeline.stats().dropped_events, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let (runner, snapshots) = Runner::new(&Config::default(), Arc::new(Panicking));
        let (_tick_tx, tick_rx) = flume::unbounded::<RawTick>();
        let (_ctl_tx, ctl_rx) = flume::unbounded::<ControlCommand>();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(runner.run(tick_rx, ctl_rx, async {
            let _ = stop_rx.await;
        }));
        stop_tx.send(()).unwrap();

        let pipeline = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pipeline.stats().ticks, 0);
        assert!(snapshots.borrow().legs.is_empty());
    }
}
