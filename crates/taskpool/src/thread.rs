//! src/thread.rs
//!
//! Thread-local storage for worker identification.
//!
//! Every controller thread records the pool index of the worker it drives, so
//! worker code can find out which slot it occupies (for logging, error
//! messages, or sharding per-worker resources).

use std::cell::Cell;

thread_local! {
    /// Pool index of the worker driven by the current thread.
    ///
    /// `None` on any thread that is not a controller thread.
    static WORKER_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

pub(crate) fn set_worker_id(id: usize) {
    WORKER_ID.with(|cell| cell.set(Some(id)));
}

/// Returns the pool index of the worker running on the current thread, or
/// `None` when called from outside a controller thread.
pub fn current_worker_id() -> Option<usize> {
    WORKER_ID.with(Cell::get)
}
