//! src/error.rs
//!
//! Errors returned by the dispatch core.
//!
//! None of these are retried internally. A worker's own failures are part of
//! its output type and never show up here, with the exception of a panic
//! inside `Worker::job`, which the controller captures and reports as
//! `JobPanicked`, and a panic inside `LifecycleWorker::initialize`, which
//! fails `start` with `HookPanicked`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// `start` was called on a running pool.
    #[error("the pool is already running")]
    AlreadyRunning,

    /// A submission or `stop` was issued against a stopped pool.
    #[error("the pool is not running")]
    NotRunning,

    /// The claimed or awaited worker shut down mid-operation. The job is lost.
    #[error("worker was closed")]
    WorkerClosed,

    /// The caller's wait budget ran out. The job may still be running.
    #[error("job request timed out")]
    JobTimedOut,

    #[error("worker {worker_id} panicked while running a job: {message}")]
    JobPanicked { worker_id: usize, message: String },

    /// A lifecycle hook panicked while the pool was starting.
    #[error("worker {worker_id} panicked in {hook}: {message}")]
    HookPanicked {
        worker_id: usize,
        hook: &'static str,
        message: String,
    },

    #[error("failed to spawn thread for worker {worker_id}")]
    Spawn {
        worker_id: usize,
        #[source]
        source: std::io::Error,
    },
}

pub type PoolResult<T> = Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            PoolError::AlreadyRunning.to_string(),
            "the pool is already running"
        );
        assert_eq!(PoolError::NotRunning.to_string(), "the pool is not running");
        assert_eq!(PoolError::WorkerClosed.to_string(), "worker was closed");
        assert_eq!(PoolError::JobTimedOut.to_string(), "job request timed out");

        let panicked = PoolError::JobPanicked {
            worker_id: 2,
            message: "boom".to_string(),
        };
        assert_eq!(
            panicked.to_string(),
            "worker 2 panicked while running a job: boom"
        );

        let hook = PoolError::HookPanicked {
            worker_id: 1,
            hook: "initialize",
            message: "no device".to_string(),
        };
        assert_eq!(hook.to_string(), "worker 1 panicked in initialize: no device");
    }

    #[test]
    fn spawn_error_keeps_its_source() {
        use std::error::Error as _;

        let err = PoolError::Spawn {
            worker_id: 0,
            source: std::io::Error::new(std::io::ErrorKind::Other, "no threads left"),
        };
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("no threads left"));
    }
}
