//! Periodic scheduler driving the fulfillment controller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::controller::FulfillmentController;
use super::types::{AttemptError, AttemptOutcome, SchedulerState, SchedulerStatus};

/// Fires one attempt per scan interval on its own task, with bounded concurrency.
///
/// `stop()` drains in-flight attempts for up to the drain timeout and then
/// cancels whatever is left. Cancelling the parent token stops the loop and
/// cancels in-flight attempts right away.
pub struct FulfillmentScheduler {
    controller: Arc<FulfillmentController>,
    scan_interval: Duration,
    drain_timeout: Duration,
    max_concurrent_attempts: usize,
    state: Arc<Mutex<SchedulerState>>,
    in_flight: Arc<AtomicUsize>,
    /// Stops the tick loop.
    shutdown: CancellationToken,
    /// Cancels running attempts.
    abort: CancellationToken,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FulfillmentScheduler {
    /// Create a scheduler using the controller's configuration.
    pub fn new(controller: Arc<FulfillmentController>, parent: &CancellationToken) -> Self {
        let config = controller.config();
        let scan_interval = config.scan_interval();
        let drain_timeout = config.drain_timeout();
        let max_concurrent_attempts = config.max_concurrent_attempts;

        Self {
            controller,
            scan_interval,
            drain_timeout,
            max_concurrent_attempts,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown: parent.child_token(),
            abort: parent.child_token(),
            loop_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *lock(&self.state)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            max_concurrent_attempts: self.max_concurrent_attempts,
            scan_interval_ms: self.scan_interval.as_millis() as u64,
        }
    }

    /// Start the tick loop. Only an idle scheduler can be started.
    pub async fn start(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SchedulerState::Idle {
                warn!(state = ?*state, "Scheduler cannot be started");
                return;
            }
            *state = SchedulerState::Running;
        }

        info!(
            scan_interval_ms = self.scan_interval.as_millis() as u64,
            max_concurrent_attempts = self.max_concurrent_attempts,
            "Starting fulfillment scheduler"
        );

        let semaphore = match self.max_concurrent_attempts {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };

        let handle = tokio::spawn(run_loop(LoopContext {
            controller: Arc::clone(&self.controller),
            scan_interval: self.scan_interval,
            drain_timeout: self.drain_timeout,
            semaphore,
            state: Arc::clone(&self.state),
            in_flight: Arc::clone(&self.in_flight),
            shutdown: self.shutdown.clone(),
            abort: self.abort.clone(),
        }));

        *self.loop_handle.lock().await = Some(handle);
    }

    /// Stop the loop, drain in-flight attempts, and wait for it to finish.
    pub async fn stop(&self) {
        {
            let mut state = lock(&self.state);
            match *state {
                SchedulerState::Idle => {
                    *state = SchedulerState::Stopped;
                    return;
                }
                SchedulerState::Stopped => {
                    debug!("Scheduler already stopped");
                    return;
                }
                SchedulerState::Running => {}
            }
        }

        info!("Stopping fulfillment scheduler");
        self.shutdown.cancel();

        if let Some(handle) = self.loop_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler loop terminated abnormally");
                *lock(&self.state) = SchedulerState::Stopped;
            }
        }

        info!("Fulfillment scheduler stopped");
    }
}

struct LoopContext {
    controller: Arc<FulfillmentController>,
    scan_interval: Duration,
    drain_timeout: Duration,
    semaphore: Option<Arc<Semaphore>>,
    state: Arc<Mutex<SchedulerState>>,
    in_flight: Arc<AtomicUsize>,
    shutdown: CancellationToken,
    abort: CancellationToken,
}

async fn run_loop(ctx: LoopContext) {
    let mut ticker = tokio::time::interval(ctx.scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut attempts: JoinSet<()> = JoinSet::new();

    info!("Scheduler loop started");
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                info!("Scheduler loop received shutdown signal");
                break;
            }
            Some(res) = attempts.join_next(), if !attempts.is_empty() => {
                log_join(res);
            }
            _ = ticker.tick() => {
                let permit = match &ctx.semaphore {
                    Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            debug!("All attempt slots busy, skipping tick");
                            continue;
                        }
                    },
                    None => None,
                };

                let controller = Arc::clone(&ctx.controller);
                let abort = ctx.abort.clone();
                let guard = InFlightGuard::enter(&ctx.in_flight);

                attempts.spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    log_outcome(controller.attempt(&abort).await);
                });
            }
        }
    }

    if !attempts.is_empty() {
        info!(
            in_flight = attempts.len(),
            drain_timeout_secs = ctx.drain_timeout.as_secs(),
            "Draining in-flight attempts"
        );

        let drained = tokio::time::timeout(ctx.drain_timeout, async {
            while let Some(res) = attempts.join_next().await {
                log_join(res);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = attempts.len(),
                "Drain timeout elapsed, cancelling in-flight attempts"
            );
            ctx.abort.cancel();
            while let Some(res) = attempts.join_next().await {
                log_join(res);
            }
        }
    }

    *lock(&ctx.state) = SchedulerState::Stopped;
    info!("Scheduler loop stopped");
}

/// Counts one running attempt until dropped, panics included.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn log_outcome(result: Result<AttemptOutcome, AttemptError>) {
    match result {
        Ok(AttemptOutcome::NoEligibleRequest) => {
            debug!("No eligible request");
        }
        Ok(AttemptOutcome::Delivered {
            request_id,
            delivery_ref,
        }) => {
            info!(request_id = %request_id, delivery_ref = %delivery_ref, "Attempt delivered");
        }
        // Already logged at error level where it happened.
        Err(AttemptError::StatusWrite { .. }) => {}
        Err(e) => {
            warn!(
                request_id = e.request_id().unwrap_or("-"),
                kind = e.kind(),
                error = %e,
                "Attempt failed"
            );
        }
    }
}

fn log_join(res: Result<(), JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            error!(error = %e, "Attempt task panicked");
        }
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
