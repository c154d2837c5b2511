//! src/worker.rs
//!
//! The worker abstraction driven by the pool.
//!
//! A `Worker` runs one job at a time and answers a cheap readiness check.
//! Workers that need setup, teardown, or cooperative cancellation implement
//! `LifecycleWorker` on top. The pool is told which kind it holds through the
//! `AnyWorker` tag, never by inspecting the type at runtime.

use std::sync::Arc;

/// A unit of work execution owned by exactly one controller.
///
/// `I` is the job input, `O` the job output. Application-level failures
/// belong in `O` (for example `O = Result<T, E>`).
pub trait Worker<I, O>: Send {
    /// Runs one job to completion on the controller thread.
    fn job(&mut self, input: I) -> O;

    /// Whether the worker can accept a job right now.
    ///
    /// Must be non-blocking and idempotent; the controller polls it while
    /// the worker reports busy.
    fn ready(&self) -> bool {
        true
    }
}

/// Cooperative cancellation request for in-flight work.
///
/// Called from arbitrary threads while the owning worker may be inside `job`,
/// so implementations usually flip an atomic the job checks. A request can
/// land just as a job returns, so workers should clear it when a job begins.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

impl<F> Interrupt for F
where
    F: Fn() + Send + Sync,
{
    fn interrupt(&self) {
        self()
    }
}

/// A worker with lifecycle hooks.
///
/// `initialize` runs once each time the pool starts, before the first job.
/// `terminate` runs once each time the pool stops, after the last job.
pub trait LifecycleWorker<I, O>: Worker<I, O> {
    fn initialize(&mut self);

    fn terminate(&mut self);

    /// Handle used to interrupt this worker. Fetched once, when the pool is built.
    fn interrupter(&self) -> Arc<dyn Interrupt>;
}

/// A worker together with its capability tag.
pub enum AnyWorker<I, O> {
    Basic(Box<dyn Worker<I, O>>),
    Lifecycle(Box<dyn LifecycleWorker<I, O>>),
}

impl<I, O> AnyWorker<I, O> {
    pub fn basic<W>(worker: W) -> Self
    where
        W: Worker<I, O> + 'static,
    {
        Self::Basic(Box::new(worker))
    }

    pub fn lifecycle<W>(worker: W) -> Self
    where
        W: LifecycleWorker<I, O> + 'static,
    {
        Self::Lifecycle(Box::new(worker))
    }

    pub fn has_lifecycle(&self) -> bool {
        matches!(self, Self::Lifecycle(_))
    }

    pub(crate) fn job(&mut self, input: I) -> O {
        match self {
            Self::Basic(worker) => worker.job(input),
            Self::Lifecycle(worker) => worker.job(input),
        }
    }

    pub(crate) fn ready(&self) -> bool {
        match self {
            Self::Basic(worker) => worker.ready(),
            Self::Lifecycle(worker) => worker.ready(),
        }
    }

    pub(crate) fn initialize(&mut self) {
        if let Self::Lifecycle(worker) = self {
            worker.initialize();
        }
    }

    pub(crate) fn terminate(&mut self) {
        if let Self::Lifecycle(worker) = self {
            worker.terminate();
        }
    }

    pub(crate) fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        match self {
            Self::Basic(_) => None,
            Self::Lifecycle(worker) => Some(worker.interrupter()),
        }
    }
}

/// Stateless worker built from a shared job function.
pub(crate) struct FnWorker<F> {
    job: Arc<F>,
}

impl<F> FnWorker<F> {
    pub(crate) fn new(job: Arc<F>) -> Self {
        Self { job }
    }
}

impl<I, O, F> Worker<I, O> for FnWorker<F>
where
    F: Fn(I) -> O + Send + Sync,
{
    fn job(&mut self, input: I) -> O {
        (self.job)(input)
    }
}
