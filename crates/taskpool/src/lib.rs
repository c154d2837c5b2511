//! Fixed-size worker pool with readiness-based dispatch.
//!
//! Each worker is driven by its own controller thread, which polls the worker
//! for readiness and offers a one-shot readiness signal. A submission waits on
//! the signals of all workers at once, claims the first one to fire, and hands
//! that worker the job. Jobs never overlap on a worker, and a signal is only
//! ever claimed by one submission.
//!
//! ```ignore
//! let pool = Pool::homogeneous(4, |x: u64| x * 2);
//! pool.start()?;
//!
//! assert_eq!(pool.send_work(21)?, 42);
//! let late = pool.send_work_with_timeout(Duration::from_millis(50), 1);
//!
//! pool.send_async_work(5, Some(Box::new(|result| println!("{:?}", result))));
//! pool.stop()?;
//! ```
//!
//! # Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs          # Public API exports
//! ├── config.rs       # PoolConfig, builder, environment loading
//! ├── error.rs        # PoolError
//! ├── worker.rs       # Worker, LifecycleWorker, Interrupt, AnyWorker
//! ├── controller.rs   # Per-worker control loop
//! ├── pool.rs         # Pool: start/stop and job routing
//! └── thread.rs       # Thread-local worker id
//! ```

mod config;
mod controller;
mod error;
mod pool;
mod thread;
mod worker;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use error::{PoolError, PoolResult};
pub use pool::{Completion, Pool};
pub use thread::current_worker_id;
pub use worker::{AnyWorker, Interrupt, LifecycleWorker, Worker};
