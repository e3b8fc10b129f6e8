//! The Component Runtime (§4.E): the central piece that drives one
//! component's tick loop, health-check pipeline, result fan-out, and
//! lifecycle operations. Generic over [`Collector`] so the pipeline,
//! locking, and cancellation machinery are written once and shared by
//! every concrete hardware component.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::checker::Checker;
use crate::collector::{Collector, HandleState};
use crate::config::ComponentConfig;
use crate::error::{Error, Result};
use crate::harness;
use crate::metrics::MetricsRegistry;
use crate::model::{CheckerResult, HealthResult, Severity};
use crate::registry::FrequencyController;
use crate::ring::ResultRing;

/// Spawns an already-constructed poller against the channel and
/// cancellation token the Runtime hands it, breaking the
/// Component/Poller cyclic reference called out in §9 design notes: the
/// poller never holds a back-pointer to its owning Runtime.
pub type PollerFactory =
    Arc<dyn Fn(mpsc::Sender<HealthResult>, CancellationToken) -> JoinHandle<()> + Send + Sync>;

/// Extracts `(field_name, value)` pairs to push to the metrics sink for
/// one snapshot (§4.E step 3). Which fields exist is component-specific
/// and out of scope for the generic runtime (§1), so this is supplied by
/// the concrete component exactly like a [`Checker`]'s extraction
/// closure.
pub type SnapshotMetricsExtract<S> = Box<dyn Fn(&S) -> Vec<(String, f64)> + Send + Sync>;

struct ServiceState {
    running: bool,
    cancel: CancellationToken,
    tick_handle: Option<JoinHandle<()>>,
    poller_handle: Option<JoinHandle<()>>,
    /// Kept around so a reinit can respawn the poller against the same
    /// result channel (§4.F "the Runtime must stop and recreate the
    /// poller with the new handle before marking the component running
    /// again").
    tx: Option<mpsc::Sender<HealthResult>>,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            running: false,
            cancel: CancellationToken::new(),
            tick_handle: None,
            poller_handle: None,
            tx: None,
        }
    }
}

/// Drives one component's lifecycle (§4.E). Construct via [`ComponentRuntime::new`],
/// which returns an `Arc` since the tick loop and poller both need a
/// shared handle to call back into it.
pub struct ComponentRuntime<C: Collector> {
    name: String,
    node: String,
    collector: C,
    checkers: Vec<Box<dyn Checker<C::Snapshot>>>,
    config: RwLock<ComponentConfig>,
    ring: ResultRing<C::Snapshot>,
    /// Serializes one pipeline pass per component at a time, and is also
    /// held around the best-effort reinit the tick loop triggers after a
    /// timeout (§4.E lock discipline: `healthCheckMtx` first in order).
    health_check_mtx: Mutex<()>,
    service: Mutex<ServiceState>,
    init_error: parking_lot::RwLock<Option<String>>,
    poller_factory: Option<PollerFactory>,
    metrics: Option<Arc<MetricsRegistry>>,
    snapshot_metrics_extract: Option<SnapshotMetricsExtract<C::Snapshot>>,
    frequency: Option<Arc<FrequencyController>>,
}

impl<C: Collector> ComponentRuntime<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        node: impl Into<String>,
        collector: C,
        checkers: Vec<Box<dyn Checker<C::Snapshot>>>,
        config: ComponentConfig,
        poller_factory: Option<PollerFactory>,
        metrics: Option<Arc<MetricsRegistry>>,
        snapshot_metrics_extract: Option<SnapshotMetricsExtract<C::Snapshot>>,
        frequency: Option<Arc<FrequencyController>>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let node = node.into();
        let ring = ResultRing::new(config.cache_size)?;
        if let Some(fc) = &frequency {
            fc.register(&name, config.query_interval);
        }
        Ok(Arc::new(Self {
            name,
            node,
            collector,
            checkers,
            config: RwLock::new(config),
            ring,
            health_check_mtx: Mutex::new(()),
            service: Mutex::new(ServiceState::new()),
            init_error: parking_lot::RwLock::new(None),
            poller_factory,
            metrics,
            snapshot_metrics_extract,
            frequency,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records a deferred initialization failure (§4.E "Initialization
    /// failures"): construction never fails outright for a recoverable
    /// setup problem; instead every `healthCheck` until the condition is
    /// cleared reports an `InitError` Result.
    pub fn set_init_error(&self, message: impl Into<String>) {
        *self.init_error.write() = Some(message.into());
    }

    pub fn clear_init_error(&self) {
        *self.init_error.write() = None;
    }

    /// Launches the tick loop and, if configured, the async poller.
    /// Idempotent in spirit but not in practice: a `mpsc::Receiver`
    /// cannot be handed out twice, so a second call while already
    /// running is rejected rather than silently duplicating the channel
    /// (§11 open-question style decision, recorded in the design doc).
    pub async fn start(self: &Arc<Self>) -> Result<mpsc::Receiver<HealthResult>> {
        let mut service = self.service.lock().await;
        if service.running {
            return Err(Error::Config(format!("component '{}' is already running", self.name)));
        }

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let tick_rt = Arc::clone(self);
        let tick_tx = tx.clone();
        let tick_cancel = cancel.clone();
        let tick_handle = tokio::spawn(async move { tick_rt.tick_loop(tick_tx, tick_cancel).await });

        let poller_handle = self
            .poller_factory
            .as_ref()
            .map(|factory| factory(tx.clone(), cancel.child_token()));

        service.cancel = cancel;
        service.tick_handle = Some(tick_handle);
        service.poller_handle = poller_handle;
        service.tx = Some(tx);
        service.running = true;

        info!(component = %self.name, "component runtime started");
        Ok(rx)
    }

    /// Cancels the tick loop and poller and waits for both to exit. The
    /// result channel closes on its own once every sender-holding task
    /// has ended (§4.E "stop: closes the result channel").
    pub async fn stop(&self) {
        let mut service = self.service.lock().await;
        if !service.running {
            return;
        }
        service.cancel.cancel();
        if let Some(h) = service.poller_handle.take() {
            let _ = h.await;
        }
        if let Some(h) = service.tick_handle.take() {
            let _ = h.await;
        }
        service.tx = None;
        service.running = false;
        info!(component = %self.name, "component runtime stopped");
    }

    /// Stops and recreates the poller against the new (post-reinit)
    /// collector handle, without disturbing the tick loop or the result
    /// channel (§4.F). A no-op if no poller is configured or the
    /// component isn't running — reinit can be triggered by a stray
    /// pipeline pass racing a `stop()`.
    async fn restart_poller(&self) {
        let Some(factory) = &self.poller_factory else {
            return;
        };
        let mut service = self.service.lock().await;
        if !service.running {
            return;
        }
        if let Some(old) = service.poller_handle.take() {
            old.abort();
        }
        if let Some(tx) = service.tx.clone() {
            let child = service.cancel.child_token();
            service.poller_handle = Some(factory(tx, child));
        }
    }

    pub async fn status(&self) -> bool {
        self.service.lock().await.running
    }

    /// Atomically swaps the component's config (§4.E `update(cfg)`).
    /// Rust's static typing makes the "wrong concrete type is rejected"
    /// clause of the original contract a compile-time property rather
    /// than a runtime check: only a `ComponentConfig` can ever be passed
    /// here.
    pub async fn update(&self, cfg: ComponentConfig) {
        if let Some(fc) = &self.frequency {
            fc.register(&self.name, cfg.query_interval);
        }
        *self.config.write().await = cfg;
    }

    pub fn last_result(&self) -> Option<HealthResult> {
        self.ring.last()
    }

    pub fn cache_results(&self) -> Vec<HealthResult> {
        self.ring.all()
    }

    /// Runs one pipeline pass synchronously, outside the tick loop
    /// (§4.E `healthCheck(ctx)`), still serialized against the tick
    /// loop's own passes via `health_check_mtx`.
    pub async fn health_check(&self) -> HealthResult {
        let _guard = self.health_check_mtx.lock().await;
        match self.run_pipeline().await {
            Ok(result) => result,
            Err(e) => {
                error!(component = %self.name, error = %e, "health check pipeline returned an unexpected error");
                HealthResult::synthetic(
                    &self.name,
                    &self.node,
                    Utc::now(),
                    CheckerResult::synthetic(format!("{}HealthCheckError", self.name), Severity::Critical, e.to_string()),
                )
            }
        }
    }

    async fn current_query_interval(&self) -> Duration {
        let fallback = self.config.read().await.query_interval;
        match &self.frequency {
            Some(fc) => fc.current_interval(&self.name, fallback),
            None => fallback,
        }
    }

    async fn tick_loop(self: Arc<Self>, tx: mpsc::Sender<HealthResult>, cancel: CancellationToken) {
        let mut interval = self.current_query_interval().await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let new_interval = self.current_query_interval().await;
                    if new_interval != interval {
                        interval = new_interval;
                        ticker = tokio::time::interval(interval);
                        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    }

                    let timeout = self.config.read().await.timeout;
                    let rt = Arc::clone(&self);
                    let name = self.name.clone();
                    let node = self.node.clone();
                    let outcome = harness::run_with_timeout(&name, &node, timeout, &cancel, move |_child_ct| async move {
                        let _guard = rt.health_check_mtx.lock().await;
                        rt.run_pipeline().await
                    })
                    .await;

                    let result = match outcome {
                        Ok(result) => result,
                        Err(e) => {
                            // run_pipeline always synthesizes rather than
                            // returning Err; reachable only if a future
                            // change to the pipeline starts propagating
                            // raw errors.
                            error!(component = %self.name, error = %e, "health check pipeline returned an unexpected error");
                            continue;
                        }
                    };

                    if self.is_abnormal_timeout(&result) {
                        {
                            let _guard = self.health_check_mtx.lock().await;
                            if let Err(e) = self.collector.reinit().await {
                                warn!(component = %self.name, error = %e, "best-effort reinit after timeout failed");
                            }
                        }
                        self.restart_poller().await;
                    }

                    if tx.send(result).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn is_abnormal_timeout(&self, result: &HealthResult) -> bool {
        result
            .checkers
            .first()
            .map(|c| c.name.ends_with("HealthCheckTimeout") && c.status.is_abnormal())
            .unwrap_or(false)
    }

    /// The health-check pipeline, one pass (§4.E numbered steps 1-5).
    /// Every failure path synthesizes a well-formed Result rather than
    /// returning `Err` (§7 policy, §11 decision #1); the `Result` return
    /// type exists only so this can be handed to
    /// [`harness::run_with_timeout`] directly.
    async fn run_pipeline(&self) -> Result<HealthResult> {
        if let Some(message) = self.init_error.read().clone() {
            let result = HealthResult::synthetic(
                &self.name,
                &self.node,
                Utc::now(),
                CheckerResult::synthetic(format!("{}InitError", self.name), Severity::Fatal, message),
            );
            self.ring.append(None, result.clone());
            return Ok(result);
        }

        if self.collector.handle_state() == HandleState::Invalid {
            let reinit_outcome = self.collector.reinit().await;
            self.restart_poller().await;
            if let Err(e) = reinit_outcome {
                let result = HealthResult::synthetic(
                    &self.name,
                    &self.node,
                    Utc::now(),
                    CheckerResult::synthetic("InitFailed", Severity::Critical, e.to_string()),
                );
                self.ring.append(None, result.clone());
                return Ok(result);
            }
        }

        let snapshot = match self.collector.collect().await {
            Ok(s) => s,
            Err(e) if e.is_handle_invalidation() => {
                let result = HealthResult::synthetic(
                    &self.name,
                    &self.node,
                    Utc::now(),
                    CheckerResult::synthetic("NVMLInitFailed", Severity::Critical, e.to_string()),
                );
                self.ring.append(None, result.clone());
                return Ok(result);
            }
            Err(e) => {
                let result = HealthResult::synthetic(
                    &self.name,
                    &self.node,
                    Utc::now(),
                    CheckerResult::synthetic("CollectFailed", Severity::Critical, e.to_string()),
                );
                self.ring.append(None, result.clone());
                return Ok(result);
            }
        };

        let cfg = self.config.read().await;
        let ignored = cfg.ignored_checkers.clone();
        let enable_metrics = cfg.enable_metrics;
        drop(cfg);

        if enable_metrics {
            self.push_snapshot_metrics(&snapshot);
        }

        let mut checker_results = Vec::with_capacity(self.checkers.len());
        for checker in &self.checkers {
            if ignored.contains(checker.name()) {
                continue;
            }
            match checker.check(&snapshot) {
                Ok(Some(result)) => checker_results.push(result),
                Ok(None) => {}
                Err(e) => {
                    warn!(component = %self.name, checker = checker.name(), error = %e, "checker failed, skipping this tick");
                }
            }
        }

        if enable_metrics {
            for checker_result in &checker_results {
                self.push_checker_metric(checker_result);
            }
        }

        let result = HealthResult::aggregate(&self.name, &self.node, snapshot.timestamp(), checker_results);
        self.ring.append(Some(snapshot), result.clone());
        Ok(result)
    }

    fn push_snapshot_metrics(&self, snapshot: &C::Snapshot) {
        let (Some(metrics), Some(extract)) = (&self.metrics, &self.snapshot_metrics_extract) else {
            return;
        };
        for (field, value) in extract(snapshot) {
            if let Err(e) = metrics.set_component_gauge(&self.name, &field, &self.node, &[], value) {
                warn!(component = %self.name, field = %field, error = %e, "failed to push snapshot metric");
            }
        }
    }

    fn push_checker_metric(&self, checker_result: &CheckerResult) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        if let Err(e) = metrics.set_checker_gauge(
            &self.name,
            &checker_result.error_name,
            &self.node,
            checker_result.status.is_abnormal(),
        ) {
            warn!(component = %self.name, checker = %checker_result.name, error = %e, "failed to push checker metric");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{Checker as CheckerTrait, Observation, ThresholdChecker};
    use crate::model::Subject;
    use crate::snapshot::SnapshotData;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

    #[derive(Debug, Clone)]
    struct FakeSnapshot {
        ts: chrono::DateTime<Utc>,
        ecc: f64,
    }

    impl SnapshotData for FakeSnapshot {
        fn timestamp(&self) -> chrono::DateTime<Utc> {
            self.ts
        }
        fn partial_errors(&self) -> &[String] {
            &[]
        }
    }

    /// Collector stub driven by a tiny script of outcomes, one per
    /// `collect()` call, so tests can reproduce the exact tick sequences
    /// from spec scenarios without sleeping real collector latency.
    struct ScriptedCollector {
        tick: AtomicU32,
        handle_state: AtomicU8,
        behavior: fn(u32) -> Result<FakeSnapshot>,
    }

    impl ScriptedCollector {
        fn new(behavior: fn(u32) -> Result<FakeSnapshot>) -> Self {
            Self {
                tick: AtomicU32::new(0),
                handle_state: AtomicU8::new(0),
                behavior,
            }
        }
    }

    #[async_trait]
    impl Collector for ScriptedCollector {
        type Snapshot = FakeSnapshot;

        async fn collect(&self) -> Result<FakeSnapshot> {
            let n = self.tick.fetch_add(1, Ordering::SeqCst);
            let outcome = (self.behavior)(n);
            if let Err(e) = &outcome {
                if e.is_handle_invalidation() {
                    self.handle_state.store(1, Ordering::SeqCst);
                }
            }
            outcome
        }

        async fn reinit(&self) -> Result<()> {
            self.handle_state.store(0, Ordering::SeqCst);
            Ok(())
        }

        fn handle_state(&self) -> HandleState {
            match self.handle_state.load(Ordering::SeqCst) {
                0 => HandleState::Valid,
                _ => HandleState::Invalid,
            }
        }
    }

    fn config(cache_size: usize) -> ComponentConfig {
        ComponentConfig {
            query_interval: Duration::from_millis(20),
            cache_size,
            ignored_checkers: Default::default(),
            enable_metrics: false,
            timeout: Duration::from_millis(200),
        }
    }

    fn threshold_checker() -> Box<dyn CheckerTrait<FakeSnapshot>> {
        Box::new(ThresholdChecker::new(
            "ECCErrors",
            0.0,
            "Uncorrectable ECC error count",
            Severity::Critical,
            "ECC_UNCORRECTABLE",
            "drain and reboot",
            |s: &FakeSnapshot| vec![Observation::new(Subject::new("GPU-0"), s.ecc)],
        ))
    }

    #[tokio::test]
    async fn scenario_1_cache_size_three_after_five_ticks() {
        let collector = ScriptedCollector::new(|_| {
            Ok(FakeSnapshot {
                ts: Utc::now(),
                ecc: 0.0,
            })
        });
        let runtime = ComponentRuntime::new(
            "Gpu",
            "node-1",
            collector,
            vec![threshold_checker()],
            config(3),
            None,
            None,
            None,
            None,
        )
        .unwrap();

        for _ in 0..5 {
            runtime.health_check().await;
        }

        assert_eq!(runtime.cache_results().len(), 3);
        assert_eq!(runtime.last_result().unwrap().status, crate::model::Status::Normal);
    }

    #[tokio::test]
    async fn scenario_2_ignored_checker_excluded_from_result() {
        let collector = ScriptedCollector::new(|_| {
            Ok(FakeSnapshot {
                ts: Utc::now(),
                ecc: 1.0,
            })
        });
        let mut cfg = config(1);
        cfg.ignored_checkers.insert("ECCErrors".to_string());
        let runtime = ComponentRuntime::new(
            "Gpu",
            "node-1",
            collector,
            vec![threshold_checker()],
            cfg,
            None,
            None,
            None,
            None,
        )
        .unwrap();

        let result = runtime.health_check().await;
        assert!(result.checkers.iter().all(|c| c.name != "ECCErrors"));
    }

    #[tokio::test]
    async fn scenario_3_handle_invalid_then_reinitialized() {
        let collector = ScriptedCollector::new(|tick| {
            if tick == 1 {
                Err(Error::HandleInvalidated("xid 79".into()))
            } else {
                Ok(FakeSnapshot {
                    ts: Utc::now(),
                    ecc: 0.0,
                })
            }
        });
        let runtime = ComponentRuntime::new(
            "Gpu",
            "node-1",
            collector,
            vec![threshold_checker()],
            config(5),
            None,
            None,
            None,
            None,
        )
        .unwrap();

        let tick1 = runtime.health_check().await;
        assert_eq!(tick1.status, crate::model::Status::Normal);

        let tick2 = runtime.health_check().await;
        assert_eq!(tick2.checkers.len(), 1);
        assert_eq!(tick2.checkers[0].name, "NVMLInitFailed");
        assert_eq!(tick2.checkers[0].status, crate::model::Status::Abnormal);
        assert_eq!(tick2.checkers[0].level, Severity::Critical);

        let tick3 = runtime.health_check().await;
        assert_eq!(tick3.status, crate::model::Status::Normal);
    }

    #[tokio::test]
    async fn init_error_is_reported_every_tick_until_cleared() {
        let collector = ScriptedCollector::new(|_| {
            Ok(FakeSnapshot {
                ts: Utc::now(),
                ecc: 0.0,
            })
        });
        let runtime = ComponentRuntime::new(
            "Gpu",
            "node-1",
            collector,
            vec![threshold_checker()],
            config(2),
            None,
            None,
            None,
            None,
        )
        .unwrap();
        runtime.set_init_error("spec catalog missing for this machine class");

        let result = runtime.health_check().await;
        assert_eq!(result.checkers[0].name, "GpuInitError");
        assert_eq!(result.level, Severity::Fatal);

        runtime.clear_init_error();
        let result2 = runtime.health_check().await;
        assert_eq!(result2.status, crate::model::Status::Normal);
    }

    #[tokio::test]
    async fn start_stop_lifecycle_delivers_ticks_and_closes_channel() {
        let collector = ScriptedCollector::new(|_| {
            Ok(FakeSnapshot {
                ts: Utc::now(),
                ecc: 0.0,
            })
        });
        let runtime = ComponentRuntime::new(
            "Gpu",
            "node-1",
            collector,
            vec![threshold_checker()],
            config(3),
            None,
            None,
            None,
            None,
        )
        .unwrap();

        assert!(!runtime.status().await);
        let mut rx = runtime.start().await.unwrap();
        assert!(runtime.status().await);

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("should receive a tick within 1s")
            .expect("channel should still be open");
        assert_eq!(first.item, "Gpu");

        runtime.stop().await;
        assert!(!runtime.status().await);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let collector = ScriptedCollector::new(|_| {
            Ok(FakeSnapshot {
                ts: Utc::now(),
                ecc: 0.0,
            })
        });
        let runtime = ComponentRuntime::new(
            "Gpu",
            "node-1",
            collector,
            vec![threshold_checker()],
            config(3),
            None,
            None,
            None,
            None,
        )
        .unwrap();
        let _rx = runtime.start().await.unwrap();
        assert!(runtime.start().await.is_err());
        runtime.stop().await;
    }

    #[tokio::test]
    async fn scenario_6_timeout_then_reinit_then_fresh_result() {
        struct SlowThenFastCollector {
            tick: AtomicU32,
        }
        #[async_trait]
        impl Collector for SlowThenFastCollector {
            type Snapshot = FakeSnapshot;
            async fn collect(&self) -> Result<FakeSnapshot> {
                let n = self.tick.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
                Ok(FakeSnapshot {
                    ts: Utc::now(),
                    ecc: 0.0,
                })
            }
            async fn reinit(&self) -> Result<()> {
                Ok(())
            }
            fn handle_state(&self) -> HandleState {
                HandleState::Valid
            }
        }

        let collector = SlowThenFastCollector { tick: AtomicU32::new(0) };
        let mut cfg = config(3);
        cfg.timeout = Duration::from_millis(500);
        cfg.query_interval = Duration::from_secs(1);
        let runtime = ComponentRuntime::new("Gpu", "node-1", collector, vec![threshold_checker()], cfg, None, None, None, None)
            .unwrap();

        let start = std::time::Instant::now();
        let mut rx = runtime.start().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(700));
        assert_eq!(first.checkers[0].name, "GpuHealthCheckTimeout");

        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, crate::model::Status::Normal);

        runtime.stop().await;
    }
}
