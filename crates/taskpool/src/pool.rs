//! src/pool.rs
//!
//! The dispatch core.
//!
//! A `Pool` owns a fixed set of worker controllers and routes every submission
//! to exactly one worker that reported itself ready:
//!
//! ```text
//!   send_work(x) ──► Select over every readiness receiver ──► claim worker k
//!                                                               │
//!          result ◄── output slot ◄── controller k runs job(x) ◄┘
//! ```
//!
//! # Modes
//! - `send_work`: blocks until some worker is claimed and returns its result.
//! - `send_work_with_timeout`: the same, bounded by one deadline covering both
//!   the claim and the wait for the result. A job already handed to a worker is
//!   not retracted when the deadline passes: the worker finishes it and the
//!   result is dropped.
//! - `send_async_work[_with_timeout]`: runs the blocking variant on its own
//!   thread and hands the outcome to an optional completion.
//!
//! # Locking
//! `start`/`stop` take the pool lock exclusively; submissions hold it shared
//! for their whole duration, so they run concurrently with each other and
//! never overlap a start or stop. No lock is held on a controller thread.

use crossbeam_channel::{Receiver, RecvTimeoutError, Select};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::controller::{JobOutcome, WorkerController};
use crate::error::{PoolError, PoolResult};
use crate::worker::{AnyWorker, FnWorker, Interrupt};

/// Callback receiving the outcome of an asynchronous submission.
pub type Completion<O> = Box<dyn FnOnce(PoolResult<O>) + Send + 'static>;

struct Shared<I, O> {
    controllers: RwLock<Vec<WorkerController<I, O>>>,
    /// Interrupt handles by worker index, fixed at construction and read without locking.
    interrupters: Vec<Option<Arc<dyn Interrupt>>>,
    running: AtomicBool,
    pending: Arc<AtomicUsize>,
    config: PoolConfig,
}

impl<I, O> Drop for Shared<I, O> {
    fn drop(&mut self) {
        if !*self.running.get_mut() {
            return;
        }

        let controllers = self.controllers.get_mut();
        for controller in controllers.iter_mut() {
            controller.close();
        }
        for controller in controllers.iter_mut() {
            controller.join();
        }
        debug!(workers = controllers.len(), "running pool dropped, workers drained");
    }
}

/// Fixed-size pool of workers fed through readiness-based dispatch.
///
/// Cloning is cheap and yields another handle to the same pool.
pub struct Pool<I, O> {
    shared: Arc<Shared<I, O>>,
}

impl<I, O> Clone for Pool<I, O> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<I, O> Pool<I, O> {
    /// Number of workers, fixed at construction.
    pub fn size(&self) -> usize {
        self.shared.interrupters.len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Asynchronous submissions issued but not yet completed.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    /// Forwards an interrupt request to worker `worker_id`.
    ///
    /// Returns false when the id is out of range or the worker has no
    /// lifecycle hooks. Safe to call at any time, including while a `stop`
    /// is waiting for jobs to finish.
    pub fn interrupt(&self, worker_id: usize) -> bool {
        match self.shared.interrupters.get(worker_id) {
            Some(Some(interrupter)) => {
                interrupter.interrupt();
                true
            }
            _ => false,
        }
    }
}

impl<I, O> Pool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Builds a pool with one controller per worker, using the default config.
    pub fn new(workers: Vec<AnyWorker<I, O>>) -> Self {
        Self::with_config(workers, PoolConfig::default())
    }

    pub fn with_config(workers: Vec<AnyWorker<I, O>>, config: PoolConfig) -> Self {
        let controllers: Vec<_> = workers
            .into_iter()
            .enumerate()
            .map(|(id, worker)| WorkerController::new(id, worker))
            .collect();
        let interrupters = controllers.iter().map(WorkerController::interrupter).collect();

        Self {
            shared: Arc::new(Shared {
                controllers: RwLock::new(controllers),
                interrupters,
                running: AtomicBool::new(false),
                pending: Arc::new(AtomicUsize::new(0)),
                config,
            }),
        }
    }

    /// Builds a pool of `n` identical workers sharing one job function.
    pub fn homogeneous<F>(n: usize, job: F) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        Self::homogeneous_with_config(n, job, PoolConfig::default())
    }

    pub fn homogeneous_with_config<F>(n: usize, job: F, config: PoolConfig) -> Self
    where
        F: Fn(I) -> O + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let workers = (0..n)
            .map(|_| AnyWorker::basic(FnWorker::new(Arc::clone(&job))))
            .collect();
        Self::with_config(workers, config)
    }

    /// Starts one control thread per worker.
    ///
    /// If a thread cannot be spawned, the controllers started so far are
    /// stopped again and the pool stays stopped.
    pub fn start(&self) -> PoolResult<()> {
        let mut controllers = self.shared.controllers.write();
        if self.is_running() {
            return Err(PoolError::AlreadyRunning);
        }

        for index in 0..controllers.len() {
            if let Err(err) = controllers[index].start(&self.shared.config) {
                error!(worker_id = index, error = %err, "failed to start worker pool");
                let started = &mut controllers[..index];
                for controller in started.iter_mut() {
                    controller.close();
                }
                for controller in started.iter_mut() {
                    controller.join();
                }
                return Err(err);
            }
        }

        self.shared.running.store(true, Ordering::Release);
        info!(workers = controllers.len(), "worker pool started");
        Ok(())
    }

    /// Closes every controller and blocks until all of them have drained.
    ///
    /// Waits for in-flight synchronous submissions to finish first.
    pub fn stop(&self) -> PoolResult<()> {
        let mut controllers = self.shared.controllers.write();
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }

        for controller in controllers.iter_mut() {
            controller.close();
        }
        for controller in controllers.iter_mut() {
            controller.join();
        }

        self.shared.running.store(false, Ordering::Release);
        info!(workers = controllers.len(), "worker pool stopped");
        Ok(())
    }

    /// Runs `input` on the first worker to become ready and returns its output.
    pub fn send_work(&self, input: I) -> PoolResult<O> {
        let controllers = self.shared.controllers.read();
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }

        let worker_id = claim(controllers.as_slice(), None)?;
        let dispatched = controllers[worker_id].send(input)?;
        let received = dispatched
            .output
            .recv()
            .map_err(|_| RecvTimeoutError::Disconnected);
        finish(worker_id, received)
    }

    /// Like `send_work`, but gives up with `JobTimedOut` once `timeout` has
    /// elapsed. A budget that is already used up fails without dispatching
    /// anything, and so does a claim that completes after the deadline.
    ///
    /// If the deadline passes after the job was handed over, the worker keeps
    /// running it to completion and the result is discarded.
    pub fn send_work_with_timeout(&self, timeout: Duration, input: I) -> PoolResult<O> {
        let controllers = self.shared.controllers.read();
        if !self.is_running() {
            return Err(PoolError::NotRunning);
        }
        if timeout.is_zero() {
            return Err(PoolError::JobTimedOut);
        }

        // A deadline too far out to represent is no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        if expired(deadline) {
            return Err(PoolError::JobTimedOut);
        }

        let worker_id = claim(controllers.as_slice(), deadline)?;
        if expired(deadline) {
            controllers[worker_id].release();
            debug!(worker_id, "claim completed past the deadline, released");
            return Err(PoolError::JobTimedOut);
        }

        let dispatched = controllers[worker_id].send(input)?;
        let received = match deadline {
            Some(deadline) => dispatched.output.recv_deadline(deadline),
            None => dispatched
                .output
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        if matches!(received, Err(RecvTimeoutError::Timeout)) {
            warn!(
                worker_id,
                timeout_ms = timeout.as_millis() as u64,
                "timed out waiting for result, job keeps running"
            );
            if self.shared.config.interrupt_on_timeout {
                controllers[worker_id].interrupt_job(dispatched.ticket);
            }
        }
        finish(worker_id, received)
    }

    /// Submits `input` from a new thread; `on_complete` receives the outcome.
    pub fn send_async_work(&self, input: I, on_complete: Option<Completion<O>>) {
        self.spawn_async(on_complete, move |pool| pool.send_work(input));
    }

    pub fn send_async_work_with_timeout(
        &self,
        timeout: Duration,
        input: I,
        on_complete: Option<Completion<O>>,
    ) {
        self.spawn_async(on_complete, move |pool| {
            pool.send_work_with_timeout(timeout, input)
        });
    }

    fn spawn_async<F>(&self, on_complete: Option<Completion<O>>, submit: F)
    where
        F: FnOnce(&Self) -> PoolResult<O> + Send + 'static,
    {
        let guard = PendingGuard::enter(&self.shared.pending);
        let pool = self.clone();

        let spawned = thread::Builder::new()
            .name(format!("{}-async", self.shared.config.thread_name))
            .spawn(move || {
                let _guard = guard;
                let outcome = submit(&pool);
                if let Some(on_complete) = on_complete {
                    on_complete(outcome);
                }
            });

        if let Err(err) = spawned {
            error!(error = %err, "failed to spawn async submission thread, job dropped");
        }
    }
}

/// Waits on every live readiness receiver and claims the first worker to
/// signal. Disconnected receivers drop out of the wait; when none are left the
/// claim fails with `WorkerClosed`.
fn claim<I, O>(
    controllers: &[WorkerController<I, O>],
    deadline: Option<Instant>,
) -> PoolResult<usize> {
    let routes: Vec<(usize, &Receiver<()>)> = controllers
        .iter()
        .enumerate()
        .filter_map(|(id, controller)| controller.ready_signal().map(|ready| (id, ready)))
        .collect();

    let mut select = Select::new();
    for &(_, ready) in &routes {
        select.recv(ready);
    }

    let mut live = routes.len();
    while live > 0 {
        let operation = match deadline {
            Some(deadline) => select
                .select_deadline(deadline)
                .map_err(|_| PoolError::JobTimedOut)?,
            None => select.select(),
        };

        let index = operation.index();
        let (worker_id, ready) = routes[index];
        match operation.recv(ready) {
            Ok(()) => {
                debug!(worker_id, "claimed worker");
                return Ok(worker_id);
            }
            Err(_) => {
                select.remove(index);
                live -= 1;
            }
        }
    }

    Err(PoolError::WorkerClosed)
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}

fn finish<O>(
    worker_id: usize,
    received: Result<JobOutcome<O>, RecvTimeoutError>,
) -> PoolResult<O> {
    match received {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(message)) => Err(PoolError::JobPanicked { worker_id, message }),
        Err(RecvTimeoutError::Timeout) => Err(PoolError::JobTimedOut),
        Err(RecvTimeoutError::Disconnected) => Err(PoolError::WorkerClosed),
    }
}

/// Counts an asynchronous submission as pending for as long as it lives.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
}

impl PendingGuard {
    fn enter(pending: &Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);
        Self {
            pending: Arc::clone(pending),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}
