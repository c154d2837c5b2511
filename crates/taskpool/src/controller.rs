//! src/controller.rs
//!
//! Per-worker control loop.
//!
//! A `WorkerController` bridges one exclusively owned worker into the pool's
//! channel protocol. While the pool runs, a dedicated thread drives the worker:
//!
//! ```text
//!   poll ready() ──► send readiness ──► recv job ──► run job ──► send outcome
//!        ▲          (rendezvous, one       │                        │
//!        │           claimant only)        │                        │
//!        └─────────────────────────────────┴────────────────────────┘
//! ```
//!
//! # Channels
//! - Readiness: zero-capacity, controller -> dispatcher. A signal is handed to
//!   exactly one receiver, which is what makes a claim exclusive.
//! - Input: capacity one, dispatcher -> controller. Carries either a job or a
//!   release for a claim the dispatcher no longer wants. Dropped on `close`.
//! - Output: a fresh single-slot channel travels with every job, so a result
//!   nobody waits for anymore is dropped with its slot and never reaches the
//!   next caller.
//! - Shutdown: never carries a value; dropping the sender wakes a controller
//!   that is polling or offering readiness.
//!
//! The worker lives in a shared slot. The control thread takes it out for the
//! duration of a run and puts it back before exiting, so the controller can be
//! started again after a stop.

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::thread::set_worker_id;
use crate::worker::{AnyWorker, Interrupt};

/// Result of one job: the output, or the message of the panic it raised.
pub(crate) type JobOutcome<O> = Result<O, String>;

/// A job on its way to a controller, with the slot its outcome goes to.
pub(crate) struct Envelope<I, O> {
    ticket: u64,
    input: I,
    output: Sender<JobOutcome<O>>,
}

/// What follows a claimed readiness signal.
enum Dispatch<I, O> {
    Job(Envelope<I, O>),
    /// The claimant gave up before sending; the worker returns to polling.
    Release,
}

/// A job handed to a controller.
pub(crate) struct Dispatched<O> {
    pub(crate) ticket: u64,
    pub(crate) output: Receiver<JobOutcome<O>>,
}

/// Dispatcher-side ends of a running controller.
struct Link<I, O> {
    ready_rx: Receiver<()>,
    input_tx: Option<Sender<Dispatch<I, O>>>,
    shutdown_tx: Option<Sender<()>>,
    handle: JoinHandle<()>,
}

pub(crate) struct WorkerController<I, O> {
    id: usize,
    slot: Arc<Mutex<Option<AnyWorker<I, O>>>>,
    open: Arc<AtomicBool>,
    interrupter: Option<Arc<dyn Interrupt>>,
    next_ticket: AtomicU64,
    /// Ticket of the job currently inside `Worker::job`.
    active: Arc<Mutex<Option<u64>>>,
    link: Option<Link<I, O>>,
}

impl<I, O> WorkerController<I, O> {
    pub(crate) fn new(id: usize, worker: AnyWorker<I, O>) -> Self {
        let interrupter = worker.interrupter();
        Self {
            id,
            slot: Arc::new(Mutex::new(Some(worker))),
            open: Arc::new(AtomicBool::new(false)),
            interrupter,
            next_ticket: AtomicU64::new(0),
            active: Arc::new(Mutex::new(None)),
            link: None,
        }
    }

    pub(crate) fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        self.interrupter.clone()
    }

    /// Readiness receiver of the running control thread, if any.
    pub(crate) fn ready_signal(&self) -> Option<&Receiver<()>> {
        self.link.as_ref().map(|link| &link.ready_rx)
    }

    fn input(&self) -> PoolResult<&Sender<Dispatch<I, O>>> {
        self.link
            .as_ref()
            .and_then(|link| link.input_tx.as_ref())
            .ok_or(PoolError::WorkerClosed)
    }

    /// Hands a job to the controller after its readiness signal was claimed.
    pub(crate) fn send(&self, input: I) -> PoolResult<Dispatched<O>> {
        let input_tx = self.input()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        let (output_tx, output_rx) = bounded(1);
        input_tx
            .send(Dispatch::Job(Envelope {
                ticket,
                input,
                output: output_tx,
            }))
            .map_err(|_| PoolError::WorkerClosed)?;

        Ok(Dispatched {
            ticket,
            output: output_rx,
        })
    }

    /// Returns a claimed worker to polling without giving it a job.
    pub(crate) fn release(&self) {
        if let Ok(input_tx) = self.input() {
            // A closed controller has nothing to release.
            let _ = input_tx.send(Dispatch::Release);
        }
    }

    /// Interrupts the worker only while it is still running job `ticket`.
    /// Returns false for workers without lifecycle hooks.
    ///
    /// The check and the interrupt happen under the lock the control thread
    /// takes to switch jobs, so a later job is never the one interrupted.
    pub(crate) fn interrupt_job(&self, ticket: u64) -> bool {
        let active = self.active.lock();
        match &self.interrupter {
            Some(interrupter) if *active == Some(ticket) => {
                interrupter.interrupt();
                true
            }
            _ => false,
        }
    }

    /// Signals the control thread to stop. Does not wait; see `join`.
    pub(crate) fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        if let Some(link) = self.link.as_mut() {
            link.shutdown_tx.take();
            link.input_tx.take();
        }
    }

    /// Waits for the control thread to exit, then runs the terminate hook.
    pub(crate) fn join(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        if link.handle.join().is_err() {
            error!(worker_id = self.id, "controller thread panicked");
        }

        match self.slot.lock().as_mut() {
            Some(worker) => {
                let _ = run_hook(self.id, "terminate", || worker.terminate());
            }
            None => error!(
                worker_id = self.id,
                "worker was lost with its controller thread"
            ),
        }
    }
}

impl<I, O> WorkerController<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Runs the initialize hook and spawns the control thread.
    ///
    /// A worker lost to an earlier thread failure is skipped: the controller
    /// publishes no readiness and is never claimed.
    ///
    /// A panicking initialize hook fails the start with `HookPanicked`; the
    /// worker gets no terminate call for that cycle.
    pub(crate) fn start(&mut self, config: &PoolConfig) -> PoolResult<()> {
        match self.slot.lock().as_mut() {
            Some(worker) => {
                run_hook(self.id, "initialize", || worker.initialize()).map_err(|message| {
                    PoolError::HookPanicked {
                        worker_id: self.id,
                        hook: "initialize",
                        message,
                    }
                })?
            }
            None => {
                error!(worker_id = self.id, "no worker to start, controller skipped");
                return Ok(());
            }
        }

        let (ready_tx, ready_rx) = bounded(0);
        let (input_tx, input_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        self.open.store(true, Ordering::Release);

        let control = ControlLoop {
            id: self.id,
            slot: Arc::clone(&self.slot),
            open: Arc::clone(&self.open),
            active: Arc::clone(&self.active),
            poll_interval: config.effective_poll_interval(),
            ready_tx,
            input_rx,
            shutdown_rx,
        };

        let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, self.id));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let handle = match builder.spawn(move || control.run()) {
            Ok(handle) => handle,
            Err(source) => {
                self.open.store(false, Ordering::Release);
                if let Some(worker) = self.slot.lock().as_mut() {
                    let _ = run_hook(self.id, "terminate", || worker.terminate());
                }
                return Err(PoolError::Spawn {
                    worker_id: self.id,
                    source,
                });
            }
        };

        self.link = Some(Link {
            ready_rx,
            input_tx: Some(input_tx),
            shutdown_tx: Some(shutdown_tx),
            handle,
        });
        Ok(())
    }
}

/// State owned by a control thread for one run.
struct ControlLoop<I, O> {
    id: usize,
    slot: Arc<Mutex<Option<AnyWorker<I, O>>>>,
    open: Arc<AtomicBool>,
    active: Arc<Mutex<Option<u64>>>,
    poll_interval: Duration,
    ready_tx: Sender<()>,
    input_rx: Receiver<Dispatch<I, O>>,
    shutdown_rx: Receiver<()>,
}

impl<I, O> ControlLoop<I, O> {
    fn run(self) {
        set_worker_id(self.id);

        let Some(mut worker) = self.slot.lock().take() else {
            return;
        };
        debug!(worker_id = self.id, "controller started");

        self.serve(&mut worker);

        *self.slot.lock() = Some(worker);
        debug!(worker_id = self.id, "controller exiting");
        // Dropping `self` disconnects the readiness channel.
    }

    fn serve(&self, worker: &mut AnyWorker<I, O>) {
        loop {
            if !self.await_ready(worker) {
                return;
            }

            select! {
                send(self.ready_tx, ()) -> claimed => {
                    if claimed.is_err() {
                        return;
                    }
                }
                recv(self.shutdown_rx) -> _ => return,
            }

            match self.input_rx.recv() {
                Ok(Dispatch::Job(envelope)) => self.run_job(worker, envelope),
                Ok(Dispatch::Release) => debug!(worker_id = self.id, "claim released"),
                Err(_) => return,
            }
        }
    }

    /// Polls `ready()` until it holds. Returns false once the controller is
    /// closed or the readiness check panics.
    fn await_ready(&self, worker: &AnyWorker<I, O>) -> bool {
        loop {
            if !self.open.load(Ordering::Acquire) {
                return false;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| worker.ready())) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(payload) => {
                    error!(
                        worker_id = self.id,
                        panic_message = %panic_message(payload.as_ref()),
                        "readiness check panicked, worker leaves rotation until restart"
                    );
                    return false;
                }
            }

            match self.shutdown_rx.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return false,
            }
        }
    }

    fn run_job(&self, worker: &mut AnyWorker<I, O>, envelope: Envelope<I, O>) {
        let Envelope {
            ticket,
            input,
            output,
        } = envelope;

        *self.active.lock() = Some(ticket);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.job(input))).map_err(|payload| {
            let message = panic_message(payload.as_ref());
            error!(worker_id = self.id, panic_message = %message, "job panicked");
            message
        });
        *self.active.lock() = None;

        if output.send(outcome).is_err() {
            debug!(worker_id = self.id, "caller stopped waiting, result discarded");
        }
    }
}

/// Runs a lifecycle hook, turning a panic into its message.
fn run_hook<F: FnOnce()>(worker_id: usize, hook: &'static str, f: F) -> Result<(), String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!(worker_id, hook, panic_message = %message, "lifecycle hook panicked");
        message
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
