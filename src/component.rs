//! The Start/Stop/IsStopped contract every pipeline stage implements.
//!
//! `stop` must be idempotent and safe to call concurrently with itself; the
//! standard implementation is a compare-and-swap on a `done` flag.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::PipelineError;

pub trait Component {
    /// Spins up the stage's worker thread(s). Called sinks-first by the
    /// orchestrator, so no producer ever blocks on an un-started consumer.
    fn start(&mut self) -> Result<(), PipelineError>;

    /// Idempotent. Closes the stage's input, waits for the worker to drain
    /// and exit, then returns.
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Blocks until the worker thread has actually exited. Unlike polling
    /// `is_stopped()`, this never spins: it parks on the underlying
    /// `JoinHandle`. Safe to call after the stage's input has closed
    /// (naturally via upstream completion, or via `stop`); idempotent.
    fn join(&mut self);
}

/// Guards a stage's stop/done transition with a single CAS.
#[derive(Default)]
pub struct StopFlag {
    done: AtomicBool,
}

impl StopFlag {
    pub fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
        }
    }

    /// Returns true exactly once: the caller that wins the race is
    /// responsible for actually closing channels and joining the worker.
    pub fn begin_stop(&self) -> bool {
        self.done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn mark_stopped(&self) {
        self.done.store(true, Ordering::Release);
    }
}
