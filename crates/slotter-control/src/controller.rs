//! The orchestration loop: one worker, one ticking schedule, one attempt in
//! flight at a time.
//!
//! The controller lives in the async domain and talks to the worker thread
//! only through its command bridge. Attempts are single-flight: a tick that
//! lands while the previous attempt still runs is skipped, never queued, and
//! `run_once` shares the same guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use slotter_browser::{CommandBridge, FlowConfig, SessionFactory, Worker, WorkerError};
use slotter_core::{
    BookingOutcome, BookingRequest, Carousel, JobStatus, NewJobRecord, Store, User, UserStatus,
};

use crate::notify::Notifier;

/// Builds a fresh session factory for each worker lifetime.
pub type SessionBuilder = Box<dyn Fn() -> SessionFactory + Send + Sync>;

#[derive(Clone)]
pub struct ControllerConfig {
    /// Base schedule between attempts.
    pub interval: Duration,
    /// Random extra delay added to each tick, spreading the traffic pattern.
    pub jitter_max: Duration,
    /// Bound on waiting for one attempt's result. The attempt itself keeps
    /// running in the worker when the bound is hit; only the wait ends.
    pub attempt_timeout: Duration,
    /// Bound on waiting for the worker thread during stop.
    pub stop_join_bound: Duration,
    /// Cities to pick from when a user has no stored preference.
    pub cities: Vec<String>,
    /// Chats that receive pause notices and attempt summaries.
    pub operator_chats: Vec<i64>,
    pub flow: FlowConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            jitter_max: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(120),
            stop_join_bound: Duration::from_secs(10),
            cities: Vec::new(),
            operator_chats: Vec::new(),
            flow: FlowConfig::default(),
        }
    }
}

struct Running {
    worker: Worker,
    bridge: CommandBridge,
    shutdown: watch::Sender<bool>,
    ticker: tokio::task::JoinHandle<()>,
    pump: tokio::task::JoinHandle<()>,
}

pub struct Controller {
    store: Arc<dyn Store>,
    notifier: Arc<Notifier>,
    session_builder: SessionBuilder,
    cfg: ControllerConfig,
    inner: tokio::sync::Mutex<Option<Running>>,
    /// Single-flight guard shared by the ticker and `run_once`.
    busy: Arc<AtomicBool>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<Notifier>,
        session_builder: SessionBuilder,
        cfg: ControllerConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            session_builder,
            cfg,
            inner: tokio::sync::Mutex::new(None),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the worker and the schedule. Idempotent.
    pub async fn start(self: &Arc<Self>) -> String {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return "already running".into();
        }

        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = match Worker::spawn(
            (self.session_builder)(),
            events_tx,
            self.cfg.flow.clone(),
            self.cfg.stop_join_bound,
        ) {
            Ok(worker) => worker,
            Err(e) => {
                warn!(error = %e, "worker spawn failed");
                return format!("failed to start: {e}");
            }
        };
        let bridge = worker.bridge();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        // Pause notices go straight to the operator chats. The pump ends on
        // its own once the worker thread drops the event sender.
        let pump = {
            let notifier = self.notifier.clone();
            let chats = self.cfg.operator_chats.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    notifier.operator_event(&chats, &event).await;
                }
            })
        };

        let ticker = {
            let controller = self.clone();
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(controller.cfg.interval);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                tick.tick().await; // the immediate first tick
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = tick.tick() => {}
                    }
                    if !controller.jittered_delay(&mut shutdown_rx).await {
                        break;
                    }
                    let summary = controller.attempt(&bridge).await;
                    debug!(summary, "scheduled attempt");
                }
            })
        };

        *inner = Some(Running {
            worker,
            bridge,
            shutdown,
            ticker,
            pump,
        });
        info!("controller started");
        "started".into()
    }

    /// Stop the schedule and the worker. Idempotent.
    pub async fn stop(&self) -> String {
        let mut inner = self.inner.lock().await;
        let Some(running) = inner.take() else {
            return "not running".into();
        };
        let _ = running.shutdown.send(true);

        // Stopping the worker first cancels any in-flight attempt, which in
        // turn lets the ticker task finish its current iteration.
        let mut worker = running.worker;
        if tokio::task::spawn_blocking(move || worker.stop()).await.is_err() {
            warn!("worker stop task panicked");
        }
        let _ = running.ticker.await;
        // The pump drains naturally when the worker drops its event sender;
        // abort covers the detached-worker case.
        running.pump.abort();
        let _ = running.pump.await;
        info!("controller stopped");
        "stopped".into()
    }

    /// Trigger one attempt immediately, sharing the single-flight guard
    /// with the schedule.
    pub async fn run_once(&self) -> String {
        let bridge = {
            let inner = self.inner.lock().await;
            match inner.as_ref() {
                Some(running) => running.bridge.clone(),
                None => return "not running".into(),
            }
        };
        self.attempt(&bridge).await
    }

    /// Release a pending manual pause in the worker.
    pub async fn resume(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.as_ref().is_some_and(|r| r.worker.resume())
    }

    pub async fn status(&self) -> String {
        let running = self.inner.lock().await.is_some();
        let busy = self.busy.load(Ordering::Acquire);
        match (running, busy) {
            (false, _) => "stopped".into(),
            (true, true) => "running (attempt in flight)".into(),
            (true, false) => "running (idle)".into(),
        }
    }

    /// Sleep the random jitter, abandoning early on shutdown. Returns false
    /// when shutdown was signalled.
    async fn jittered_delay(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        if self.cfg.jitter_max.is_zero() {
            return true;
        }
        let ms = rand::rng().random_range(0..self.cfg.jitter_max.as_millis() as u64);
        tokio::select! {
            _ = shutdown_rx.changed() => false,
            _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
        }
    }

    async fn attempt(&self, bridge: &CommandBridge) -> String {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous attempt still in flight, skipping");
            return "skipped: attempt already in flight".into();
        }
        let _guard = BusyGuard(self.busy.clone());

        let allocation = {
            let store = self.store.clone();
            match tokio::task::spawn_blocking(move || Carousel::new(store).next()).await {
                Ok(Ok(allocation)) => allocation,
                Ok(Err(e)) => {
                    warn!(error = %e, "user allocation failed");
                    return format!("failed: {e}");
                }
                Err(_) => return "failed: allocation task panicked".into(),
            }
        };
        let Some(allocation) = allocation else {
            debug!("no users waiting for a turn");
            return "idle: no users waiting".into();
        };
        let user = allocation.user;
        if allocation.resumed {
            debug!(user_id = user.id, "lone active user keeps the turn");
        }

        let Some(request) = self.build_request(&user).await else {
            return format!("failed: user {} not bookable", user.id);
        };

        info!(user_id = user.id, city = %request.city, "booking attempt started");
        let city = request.city.clone();
        let reply = bridge.submit_booking(request);
        let outcome = match tokio::time::timeout(self.cfg.attempt_timeout, reply).await {
            Ok(Ok(Ok(outcome))) => outcome,
            Ok(Ok(Err(WorkerError::Cancelled))) => {
                // Stop in flight; leave the rotation untouched.
                info!(user_id = user.id, "attempt cancelled by stop");
                return "cancelled".into();
            }
            Ok(Ok(Err(e))) => {
                self.record_failure(user.id, &e.to_string(), None).await;
                self.release(user.id).await;
                return format!("failed: {e}");
            }
            Ok(Err(_closed)) => {
                self.record_failure(user.id, "worker unavailable", None).await;
                self.release(user.id).await;
                return "failed: worker unavailable".into();
            }
            Err(_elapsed) => {
                // The command keeps running in the worker; only the wait ends.
                warn!(user_id = user.id, "attempt result wait timed out");
                self.record_failure(user.id, "timeout", None).await;
                self.release(user.id).await;
                return "failed: timeout".into();
            }
        };

        self.settle_outcome(&user, &city, &outcome).await;
        format!("finished: {}", outcome.label())
    }

    /// Credentials plus city preference; the stored preference wins, the
    /// configured city list is the fallback.
    async fn build_request(&self, user: &User) -> Option<BookingRequest> {
        let (Some(login), Some(password)) = (user.login.clone(), user.password.clone()) else {
            warn!(user_id = user.id, "user has no credential pair");
            self.record_failure(user.id, "missing credentials", None).await;
            self.release(user.id).await;
            return None;
        };
        let city = match user.city.clone().filter(|c| !c.trim().is_empty()) {
            Some(city) => city,
            None if !self.cfg.cities.is_empty() => {
                let i = rand::rng().random_range(0..self.cfg.cities.len());
                self.cfg.cities[i].clone()
            }
            None => {
                warn!(user_id = user.id, "no city preference and no city list configured");
                self.record_failure(user.id, "no city configured", None).await;
                self.release(user.id).await;
                return None;
            }
        };
        Some(BookingRequest {
            user_id: user.id,
            login,
            password,
            city,
        })
    }

    /// Persistence, rotation and notification consequences of a classified
    /// outcome.
    ///
    /// Success keeps the token with the holder so the operator can finish
    /// the application before the user is marked applied. NoSlots also keeps
    /// the token: the same user retries next tick. Blocked and Failure put
    /// the user back in the queue so one stuck account cannot starve others.
    /// Registered users hear about every completion, success or not.
    async fn settle_outcome(&self, user: &User, city: &str, outcome: &BookingOutcome) {
        let status = if outcome.is_success() {
            JobStatus::Ok
        } else {
            JobStatus::Fail
        };
        let payload = serde_json::to_value(outcome).unwrap_or_else(|_| json!(null));
        self.append_job(NewJobRecord {
            user_id: user.id,
            status,
            url: outcome.url().map(str::to_string),
            payload,
        })
        .await;

        match outcome {
            BookingOutcome::Success { .. } => {}
            BookingOutcome::NoSlots { .. } => {
                debug!(user_id = user.id, "no slots, holder keeps the turn");
            }
            BookingOutcome::Blocked { .. } | BookingOutcome::Failure { .. } => {
                self.release(user.id).await;
            }
        }

        let text = match outcome {
            BookingOutcome::Success { url } => format!(
                "Appointment slots found in {city} for {}.\n{url}",
                user.login.as_deref().unwrap_or("the current user")
            ),
            _ => format!("No appointment slots secured in {city} this time."),
        };
        self.notifier.broadcast(&self.registered_chats().await, &text).await;

        let summary = format!("Attempt for user {}: {}", user.id, outcome.label());
        self.notifier
            .broadcast(&self.cfg.operator_chats, &summary)
            .await;
    }

    async fn registered_chats(&self) -> Vec<i64> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.chat_ids_by_status(UserStatus::Registered))
            .await
            .ok()
            .and_then(|r| r.ok())
            .unwrap_or_default()
    }

    async fn record_failure(&self, user_id: i64, reason: &str, url: Option<String>) {
        self.append_job(NewJobRecord {
            user_id,
            status: JobStatus::Fail,
            url,
            payload: json!({ "error": reason }),
        })
        .await;
    }

    async fn append_job(&self, rec: NewJobRecord) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.append_job(rec)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "job record append failed"),
            Err(_) => warn!("job record task panicked"),
        }
    }

    async fn release(&self, user_id: i64) {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || Carousel::new(store).release(user_id)).await {
            Ok(Ok(released)) => {
                if !released {
                    debug!(user_id, "release skipped, token not held");
                }
            }
            Ok(Err(e)) => warn!(error = %e, "token release failed"),
            Err(_) => warn!("token release task panicked"),
        }
    }
}

/// Clears the single-flight flag on every exit path of an attempt.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
