//! Training scheduler
//!
//! Two independent producers decide when training happens:
//! - a debounce timer that collapses bursts of new interactions into one
//!   delayed run, with its flags kept in preferences;
//! - a periodic sweep that re-evaluates the training criteria.
//!
//! Both, along with manual and feedback triggers, push requests onto one
//! queue drained by a single worker, so fitting and promotion never overlap
//! and the last request drained owns the version pointer.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::pipeline::{TrainingPipeline, TrainingReport};
use super::prefs::Preferences;
use super::store::LearningStore;
use crate::config::LearnerConfig;
use crate::error::TrainingError;

/// What asked for a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainTrigger {
    Debounced,
    Periodic,
    Manual,
    Feedback,
    ScreenView,
    Refine,
}

impl std::fmt::Display for TrainTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainTrigger::Debounced => write!(f, "debounced"),
            TrainTrigger::Periodic => write!(f, "periodic"),
            TrainTrigger::Manual => write!(f, "manual"),
            TrainTrigger::Feedback => write!(f, "feedback"),
            TrainTrigger::ScreenView => write!(f, "screen-view"),
            TrainTrigger::Refine => write!(f, "refine"),
        }
    }
}

pub type TrainingOutcome = Result<TrainingReport, TrainingError>;

/// A queued training request
pub struct TrainRequest {
    pub trigger: TrainTrigger,
    /// Stored interactions required before the pipeline runs
    pub min_interactions: Option<usize>,
    reply: Option<oneshot::Sender<TrainingOutcome>>,
}

/// Producer side of the training queue
#[derive(Clone)]
pub struct TrainingQueue {
    tx: mpsc::UnboundedSender<TrainRequest>,
}

impl TrainingQueue {
    /// Enqueue without waiting for the outcome
    pub fn submit(&self, trigger: TrainTrigger, min_interactions: Option<usize>) -> bool {
        let request = TrainRequest {
            trigger,
            min_interactions,
            reply: None,
        };
        if self.tx.send(request).is_err() {
            warn!("Training worker stopped; dropping {} request", trigger);
            return false;
        }
        debug!("Queued {} training request", trigger);
        true
    }

    /// Enqueue and wait for the worker to finish this request
    pub async fn submit_and_wait(&self, trigger: TrainTrigger, min_interactions: Option<usize>) -> TrainingOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = TrainRequest {
            trigger,
            min_interactions,
            reply: Some(reply_tx),
        };
        self.tx
            .send(request)
            .map_err(|_| TrainingError::WorkerUnavailable)?;
        reply_rx.await.map_err(|_| TrainingError::WorkerUnavailable)?
    }
}

/// Start the single consumer that runs queued requests in order
pub fn spawn_training_worker(runtime: &Handle, pipeline: Arc<TrainingPipeline>) -> (TrainingQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<TrainRequest>();

    let worker = runtime.spawn(async move {
        while let Some(request) = rx.recv().await {
            info!("Running {} training request", request.trigger);
            let pipeline = Arc::clone(&pipeline);
            let min_interactions = request.min_interactions;

            let outcome = match tokio::task::spawn_blocking(move || pipeline.run_with_threshold(min_interactions)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Training task aborted: {}", e);
                    Err(TrainingError::WorkerUnavailable)
                }
            };

            if let Some(reply) = request.reply {
                let _ = reply.send(outcome);
            }
        }
        debug!("Training worker exiting");
    });

    (TrainingQueue { tx }, worker)
}

/// Timing and threshold policy for the two producers
#[derive(Debug, Clone)]
pub struct SchedulePolicy {
    pub debounce_delay: Duration,
    pub evaluation_interval: Duration,
    pub min_training_interactions: usize,
    pub min_days_between_training: i64,
}

impl SchedulePolicy {
    pub fn from_config(config: &LearnerConfig) -> Self {
        Self {
            debounce_delay: config.debounce_delay(),
            evaluation_interval: config.evaluation_interval(),
            min_training_interactions: config.min_training_interactions,
            min_days_between_training: config.min_days_between_training,
        }
    }
}

/// Debounce and periodic producers
#[derive(Clone)]
pub struct Scheduler {
    prefs: Arc<Preferences>,
    store: Arc<LearningStore>,
    queue: TrainingQueue,
    policy: SchedulePolicy,
    runtime: Handle,
    periodic: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(
        prefs: Arc<Preferences>,
        store: Arc<LearningStore>,
        queue: TrainingQueue,
        policy: SchedulePolicy,
        runtime: Handle,
    ) -> Self {
        Self {
            prefs,
            store,
            queue,
            policy,
            runtime,
            periodic: Arc::new(Mutex::new(None)),
        }
    }

    pub fn queue(&self) -> &TrainingQueue {
        &self.queue
    }

    /// Mark that new data needs processing and arm the debounce timer unless
    /// one is already pending
    pub fn request_processing(&self) {
        if !self.prefs.learning_enabled() {
            return;
        }

        let arm = self.prefs.update(|p| {
            p.needs_local_processing = true;
            if p.local_processing_scheduled {
                false
            } else {
                p.local_processing_scheduled = true;
                true
            }
        });

        if !arm {
            debug!("Local processing already scheduled");
            return;
        }

        debug!("Local processing scheduled in {:?}", self.policy.debounce_delay);
        let this = self.clone();
        self.runtime.spawn(async move {
            sleep(this.policy.debounce_delay).await;
            this.fire_debounced();
        });
    }

    fn fire_debounced(&self) {
        let needed = self.prefs.update(|p| {
            p.local_processing_scheduled = false;
            std::mem::take(&mut p.needs_local_processing)
        });
        if needed {
            self.queue
                .submit(TrainTrigger::Debounced, Some(self.policy.min_training_interactions));
        }
    }

    /// Whether the periodic sweep should train at `now`
    pub fn periodic_training_due(&self, now: DateTime<Utc>) -> bool {
        if !self.prefs.learning_enabled() {
            return false;
        }

        let interactions = self.store.interactions.len();
        if interactions < self.policy.min_training_interactions {
            debug!(
                "Periodic evaluation: {} interactions, need {}",
                interactions, self.policy.min_training_interactions
            );
            return false;
        }

        match self.prefs.last_training() {
            Some(last) => {
                let days = (now - last).num_days();
                if days < self.policy.min_days_between_training {
                    debug!("Periodic evaluation: last trained {} day(s) ago", days);
                    return false;
                }
                true
            }
            None => true,
        }
    }

    /// One periodic sweep
    pub fn evaluate(&self) -> bool {
        if self.periodic_training_due(Utc::now()) {
            info!("Training criteria met; queueing periodic training");
            return self.queue.submit(TrainTrigger::Periodic, None);
        }
        false
    }

    /// Start the recurring sweep; the first one fires after a full interval
    pub fn start_periodic(&self) {
        let mut slot = self.periodic.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Periodic training evaluation already running");
            return;
        }

        let this = self.clone();
        let period = self.policy.evaluation_interval;
        *slot = Some(self.runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.evaluate();
            }
        }));
        info!("Periodic training evaluation every {:?}", period);
    }

    /// Clear a "scheduled" flag left behind by a previous process and re-arm
    /// the debounce if processing was still wanted
    pub fn reconcile_stale_schedule(&self) {
        let (was_scheduled, needed) = self.prefs.update(|p| {
            let was = std::mem::replace(&mut p.local_processing_scheduled, false);
            (was, p.needs_local_processing)
        });
        if was_scheduled {
            info!("Cleared stale local processing flag");
        }
        if needed {
            self.request_processing();
        }
    }

    /// Stop the periodic sweep; queued and running training is unaffected
    pub fn shutdown(&self) {
        if let Some(handle) = self.periodic.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
            debug!("Periodic training evaluation stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::engine::{MockTrainingEngine, NaiveBayesEngine, TrainingEngine};
    use crate::learning::pipeline::ModelEvent;
    use crate::learning::records::Interaction;
    use tokio::sync::broadcast;

    struct Fixture {
        _dir: tempfile::TempDir,
        prefs: Arc<Preferences>,
        store: Arc<LearningStore>,
        scheduler: Scheduler,
        events: broadcast::Receiver<ModelEvent>,
    }

    fn fixture(engine: Arc<dyn TrainingEngine>, debounce_ms: u64) -> Fixture {
        fixture_with_interval(engine, debounce_ms, Duration::from_secs(3600))
    }

    fn fixture_with_interval(engine: Arc<dyn TrainingEngine>, debounce_ms: u64, interval: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LearningStore::open(dir.path()).unwrap());
        let prefs = Arc::new(Preferences::in_memory());
        prefs.set_learning_enabled(true);
        let (tx, rx) = broadcast::channel(8);
        let pipeline = Arc::new(TrainingPipeline::new(
            Arc::clone(&store),
            Arc::clone(&prefs),
            engine,
            dir.path().join("models"),
            "1.0",
            "1.0.0",
            tx,
        ));
        let runtime = Handle::current();
        let (queue, _worker) = spawn_training_worker(&runtime, pipeline);
        let policy = SchedulePolicy {
            debounce_delay: Duration::from_millis(debounce_ms),
            evaluation_interval: interval,
            min_training_interactions: 5,
            min_days_between_training: 1,
        };
        let scheduler = Scheduler::new(Arc::clone(&prefs), Arc::clone(&store), queue, policy, runtime);
        Fixture { _dir: dir, prefs, store, scheduler, events: rx }
    }

    fn add_interactions(store: &LearningStore, n: usize) {
        for i in 0..n {
            store.interactions.append(Interaction::new(&format!("message {i}"), "ok", "chat", 0.5, None, "1.0", "1.0.0"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_debounce_collapses_bursts() {
        let mut engine = MockTrainingEngine::new();
        let real = NaiveBayesEngine::new();
        engine.expect_fit().times(1).returning(move |table| real.fit(table));
        let mut fx = fixture(Arc::new(engine), 100);
        add_interactions(&fx.store, 5);

        for _ in 0..10 {
            fx.scheduler.request_processing();
        }
        assert!(fx.prefs.local_processing_scheduled());
        assert!(fx.prefs.needs_local_processing());

        let event = tokio::time::timeout(Duration::from_secs(5), fx.events.recv()).await;
        assert!(matches!(event, Ok(Ok(ModelEvent::Updated { .. }))));
        assert!(!fx.prefs.local_processing_scheduled());
        assert!(!fx.prefs.needs_local_processing());

        // Nothing else was armed
        sleep(Duration::from_millis(300)).await;
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_request_processing_ignored_when_disabled() {
        let fx = fixture(Arc::new(NaiveBayesEngine::new()), 10);
        fx.prefs.set_learning_enabled(false);
        fx.scheduler.request_processing();
        assert!(!fx.prefs.needs_local_processing());
        assert!(!fx.prefs.local_processing_scheduled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_debounce_below_threshold_does_not_train() {
        let mut engine = MockTrainingEngine::new();
        engine.expect_fit().never();
        let fx = fixture(Arc::new(engine), 20);
        add_interactions(&fx.store, 2);

        fx.scheduler.request_processing();
        sleep(Duration::from_millis(200)).await;
        assert!(!fx.prefs.local_processing_scheduled());
        assert!(fx.prefs.model_version().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_periodic_sweep_trains_once_per_window() {
        let mut engine = MockTrainingEngine::new();
        let real = NaiveBayesEngine::new();
        engine.expect_fit().times(1).returning(move |table| real.fit(table));
        let mut fx = fixture_with_interval(Arc::new(engine), 60_000, Duration::from_millis(200));
        add_interactions(&fx.store, 5);

        let started = std::time::Instant::now();
        fx.scheduler.start_periodic();

        let event = tokio::time::timeout(Duration::from_secs(5), fx.events.recv()).await;
        assert!(matches!(event, Ok(Ok(ModelEvent::Updated { .. }))));
        assert!(started.elapsed() >= Duration::from_millis(190), "first sweep waits a full interval");

        // Later sweeps fall inside the minimum gap between trainings
        sleep(Duration::from_millis(700)).await;
        assert!(fx.events.try_recv().is_err());
        assert!(!fx.scheduler.evaluate());

        fx.scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_periodic_sweep() {
        let mut engine = MockTrainingEngine::new();
        engine.expect_fit().never();
        let mut fx = fixture_with_interval(Arc::new(engine), 60_000, Duration::from_millis(100));
        add_interactions(&fx.store, 5);

        fx.scheduler.start_periodic();
        fx.scheduler.shutdown();

        sleep(Duration::from_millis(400)).await;
        assert!(fx.events.try_recv().is_err());
        assert!(fx.prefs.model_version().is_none());
    }

    #[tokio::test]
    async fn test_periodic_criteria() {
        let fx = fixture(Arc::new(NaiveBayesEngine::new()), 10);
        let now = Utc::now();

        add_interactions(&fx.store, 4);
        assert!(!fx.scheduler.periodic_training_due(now));

        add_interactions(&fx.store, 1);
        assert!(fx.scheduler.periodic_training_due(now), "never trained counts as due");

        fx.prefs.record_promotion("1.0.5", now - chrono::Duration::hours(3));
        assert!(!fx.scheduler.periodic_training_due(now));

        fx.prefs.record_promotion("1.0.6", now - chrono::Duration::days(2));
        assert!(fx.scheduler.periodic_training_due(now));

        fx.prefs.set_learning_enabled(false);
        assert!(!fx.scheduler.periodic_training_due(now));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queue_reports_outcome() {
        let fx = fixture(Arc::new(NaiveBayesEngine::new()), 10);
        add_interactions(&fx.store, 3);

        let err = fx
            .scheduler
            .queue()
            .submit_and_wait(TrainTrigger::Manual, Some(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::NotEnoughInteractions { needed: 5, found: 3 }));

        let report = fx
            .scheduler
            .queue()
            .submit_and_wait(TrainTrigger::Feedback, Some(3))
            .await
            .unwrap();
        assert_eq!(fx.prefs.model_version(), Some(report.version));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reconcile_clears_stale_flag_and_rearms() {
        let mut fx = fixture(Arc::new(NaiveBayesEngine::new()), 20);
        add_interactions(&fx.store, 5);
        fx.prefs.update(|p| {
            p.local_processing_scheduled = true;
            p.needs_local_processing = true;
        });

        // A stuck flag suppresses new debounce timers
        fx.scheduler.request_processing();
        sleep(Duration::from_millis(100)).await;
        assert!(fx.events.try_recv().is_err());

        fx.scheduler.reconcile_stale_schedule();
        let event = tokio::time::timeout(Duration::from_secs(5), fx.events.recv()).await;
        assert!(matches!(event, Ok(Ok(ModelEvent::Updated { .. }))));
    }
}
