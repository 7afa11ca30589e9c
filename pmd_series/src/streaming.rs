//! Iteration adapters enforcing stream ordering.
//!
//! `write_iterations()` guarantees that all tasks of iteration *i* are
//! flushed before any task of iteration *j > i* is enqueued, and that
//! closed iterations are not reopened. `read_iterations()` walks a series
//! in index order, closing each iteration before the next one opens.

use crate::{wrong_api, CloseStatus, Iteration, Result, Series, StepStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Write-side adapter handing out one open iteration at a time.
#[derive(Debug, Clone)]
pub struct WriteIterations {
    series: Series,
    currently_open: Arc<Mutex<Option<u64>>>,
}

impl WriteIterations {
    pub(crate) fn new(series: Series) -> Self {
        Self {
            series,
            currently_open: Arc::new(Mutex::new(None)),
        }
    }

    /// The iteration with the given index, closing and flushing the
    /// previously open one first.
    pub fn iteration(&self, index: u64) -> Result<Iteration> {
        let mut open = self.currently_open.lock();
        if let Some(previous) = *open {
            if previous != index {
                let previous_iteration = self.series.iteration(previous);
                if !matches!(
                    previous_iteration.close_status(),
                    CloseStatus::ClosedInBackend
                ) {
                    previous_iteration.close()?;
                }
                // all of the previous iteration's tasks reach the backend
                // before the new iteration enqueues anything
                self.series.flush()?;
                debug!(previous, index, "rolled over to the next iteration");
            }
        }

        if let Some(existing) = self.series.iterations().find(index) {
            if existing.closed() {
                return Err(wrong_api(format!(
                    "iteration {index} was closed; streaming writers must not reopen it"
                )));
            }
        }

        let iteration = self.series.iteration(index);
        if self.series.step_status() == StepStatus::NoStep {
            self.series.begin_step()?;
            iteration.set_step_status(StepStatus::DuringStep);
        }
        *open = Some(index);
        Ok(iteration)
    }

    /// Close the currently open iteration, if any, and flush.
    pub fn finish(&self) -> Result<()> {
        let mut open = self.currently_open.lock();
        if let Some(index) = open.take() {
            let iteration = self.series.iteration(index);
            if !matches!(iteration.close_status(), CloseStatus::ClosedInBackend) {
                iteration.close()?;
            }
            self.series.flush()?;
            if self.series.step_status() == StepStatus::DuringStep {
                self.series.end_step()?;
            }
        }
        Ok(())
    }
}

/// An iteration paired with its index, as produced by [`ReadIterations`].
#[derive(Debug, Clone)]
pub struct IndexedIteration {
    pub index: u64,
    pub iteration: Iteration,
}

impl IndexedIteration {
    /// Close this iteration, releasing its backend resources.
    pub fn close(&self) -> Result<()> {
        self.iteration.close()?;
        Ok(())
    }
}

/// Read-side adapter walking iterations in stream order.
///
/// The next iteration only becomes observable once the previous one has
/// been closed; dropping the handle without closing closes implicitly on
/// the next step.
#[derive(Debug)]
pub struct ReadIterations {
    series: Series,
    remaining: Vec<u64>,
    current: Option<u64>,
}

impl ReadIterations {
    pub(crate) fn new(series: Series) -> Self {
        let mut remaining = series.sorted_iteration_indices();
        remaining.reverse(); // pop from the back yields ascending order
        Self {
            series,
            remaining,
            current: None,
        }
    }
}

impl Iterator for ReadIterations {
    type Item = Result<IndexedIteration>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(previous) = self.current.take() {
            let iteration = self.series.iteration(previous);
            if !iteration.closed() {
                if let Err(e) = iteration.close() {
                    return Some(Err(e));
                }
            }
        }
        let index = self.remaining.pop()?;
        let iteration = self.series.iteration(index);
        if iteration.close_status() == CloseStatus::ClosedInBackend {
            return Some(Err(wrong_api(format!(
                "iteration {index} has already been consumed from this stream"
            ))));
        }
        if let Err(e) = iteration.run_deferred_parse_access() {
            return Some(Err(e));
        }
        self.current = Some(index);
        Some(Ok(IndexedIteration { index, iteration }))
    }
}
