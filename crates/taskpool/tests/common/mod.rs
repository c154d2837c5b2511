#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};
use taskpool::{Interrupt, LifecycleWorker, Worker};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Routes pool logs to the test harness. Filter with `RUST_LOG`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn double(x: u64) -> u64 {
    x * 2
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub struct AddOne;

impl Worker<u64, u64> for AddOne {
    fn job(&mut self, x: u64) -> u64 {
        x + 1
    }
}

pub struct TimesTen;

impl Worker<u64, u64> for TimesTen {
    fn job(&mut self, x: u64) -> u64 {
        x * 10
    }
}

/// Sleeps for `delay`, then echoes its input.
pub struct SlowEcho {
    pub delay: Duration,
}

impl Worker<u64, u64> for SlowEcho {
    fn job(&mut self, x: u64) -> u64 {
        thread::sleep(self.delay);
        x
    }
}

/// Ready only while its gate is open; counts readiness polls and tags its output.
pub struct GatedWorker {
    pub tag: &'static str,
    pub gate: Arc<AtomicBool>,
    pub polls: Arc<AtomicUsize>,
}

impl GatedWorker {
    pub fn new(tag: &'static str, open: bool) -> Self {
        Self {
            tag,
            gate: Arc::new(AtomicBool::new(open)),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Worker<u64, (&'static str, u64)> for GatedWorker {
    fn job(&mut self, x: u64) -> (&'static str, u64) {
        (self.tag, x)
    }

    fn ready(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.gate.load(Ordering::SeqCst)
    }
}

/// Records how many jobs overlap on one worker.
pub struct FlightRecorder {
    pub delay: Duration,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl Worker<u64, u64> for FlightRecorder {
    fn job(&mut self, x: u64) -> u64 {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        x
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialize,
    Job(u64),
    Terminate,
}

/// Lifecycle worker that logs every hook and job.
pub struct TrackingWorker {
    pub events: Arc<Mutex<Vec<Event>>>,
    pub interrupted: Arc<AtomicBool>,
}

impl TrackingWorker {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Worker<u64, u64> for TrackingWorker {
    fn job(&mut self, x: u64) -> u64 {
        self.record(Event::Job(x));
        x
    }
}

impl LifecycleWorker<u64, u64> for TrackingWorker {
    fn initialize(&mut self) {
        self.record(Event::Initialize);
    }

    fn terminate(&mut self) {
        self.record(Event::Terminate);
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        let flag = Arc::clone(&self.interrupted);
        Arc::new(move || flag.store(true, Ordering::SeqCst))
    }
}

/// Spins until interrupted or until `cap` elapses. Returns whether the job
/// ended because of an interrupt.
pub struct Interruptible {
    pub cap: Duration,
    pub flag: Arc<AtomicBool>,
    pub interrupted_jobs: Arc<AtomicUsize>,
}

impl Interruptible {
    pub fn new(cap: Duration) -> Self {
        Self {
            cap,
            flag: Arc::new(AtomicBool::new(false)),
            interrupted_jobs: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Worker<u64, bool> for Interruptible {
    fn job(&mut self, _: u64) -> bool {
        let deadline = Instant::now() + self.cap;
        while Instant::now() < deadline {
            if self.flag.swap(false, Ordering::SeqCst) {
                self.interrupted_jobs.fetch_add(1, Ordering::SeqCst);
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

impl LifecycleWorker<u64, bool> for Interruptible {
    fn initialize(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    fn terminate(&mut self) {}

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        let flag = Arc::clone(&self.flag);
        Arc::new(move || flag.store(true, Ordering::SeqCst))
    }
}

/// Panics on one specific input.
pub struct PanicOn {
    pub value: u64,
}

impl Worker<u64, u64> for PanicOn {
    fn job(&mut self, x: u64) -> u64 {
        if x == self.value {
            panic!("refusing {}", x);
        }
        x
    }
}

/// A worker whose readiness check panics.
pub struct BrokenReady;

impl Worker<u64, u64> for BrokenReady {
    fn job(&mut self, x: u64) -> u64 {
        x
    }

    fn ready(&self) -> bool {
        panic!("readiness probe failed");
    }
}

/// Lifecycle worker whose hooks panic on request.
pub struct PanickyHooks {
    pub on_initialize: bool,
    pub on_terminate: bool,
}

impl Worker<u64, u64> for PanickyHooks {
    fn job(&mut self, x: u64) -> u64 {
        x
    }
}

impl LifecycleWorker<u64, u64> for PanickyHooks {
    fn initialize(&mut self) {
        if self.on_initialize {
            panic!("device unavailable");
        }
    }

    fn terminate(&mut self) {
        if self.on_terminate {
            panic!("flush failed");
        }
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        Arc::new(|| {})
    }
}
