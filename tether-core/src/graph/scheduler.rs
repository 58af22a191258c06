//! Update Scheduler
//!
//! Non-lazy watchers do not re-run the moment a dependency notifies them.
//! They are queued, and the queue is drained once the current synchronous
//! burst of writes is over:
//!
//! 1. A notified watcher is appended to the pending queue unless it is
//!    already there. Three writes read by the same watcher queue it once.
//!
//! 2. The first watcher queued in a burst registers a flush callback with
//!    [`next_tick`].
//!
//! 3. The host drives the tick by calling [`flush`] (or awaiting [`tick`])
//!    from its event loop. That is the batch boundary: every pending callback
//!    runs, including the queue flush, which re-runs watchers in the order
//!    they were first queued.
//!
//! Watchers queued while the flush is running are appended and run in the
//! same flush. A watcher that keeps re-queueing itself is cut off after
//! [`Config::max_update_count`] runs.
//!
//! Everything here is thread-confined: each thread has its own queue.
//!
//! [`Config::max_update_count`]: crate::config::Config::max_update_count

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use indexmap::IndexSet;
use tokio::sync::oneshot;

use super::id::WatcherId;
use super::runtime::Runtime;
use crate::config;
use crate::error::warn;
use crate::reactive::Watcher;

/// Completion signal returned by [`next_tick`].
///
/// Resolves once the batch containing the callback has run. Dropping it is
/// fine; the callback still runs.
pub type Completion = oneshot::Receiver<()>;

type TickCallback = Box<dyn FnOnce()>;

#[derive(Default)]
struct TickState {
    /// Callbacks paired with the signal of the caller that scheduled them.
    pending: VecDeque<(TickCallback, oneshot::Sender<()>)>,
}

/// One drained batch of tick callbacks.
///
/// Dropping the batch signals every callback that ran. If a callback
/// unwinds, the ones that did not run go back to the front of the pending
/// list for the next flush.
struct TickBatch {
    pending: VecDeque<(TickCallback, oneshot::Sender<()>)>,
    done: Vec<oneshot::Sender<()>>,
}

impl TickBatch {
    fn run(&mut self) {
        while let Some((callback, signal)) = self.pending.pop_front() {
            callback();
            self.done.push(signal);
        }
    }
}

impl Drop for TickBatch {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let _ = TICKS.try_with(|ticks| {
                if let Ok(mut ticks) = ticks.try_borrow_mut() {
                    for entry in rest.into_iter().rev() {
                        ticks.pending.push_front(entry);
                    }
                }
            });
        }
        for signal in self.done.drain(..) {
            let _ = signal.send(());
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// Pending watchers, FIFO by first scheduling.
    queue: IndexSet<WatcherId>,
    /// A flush callback is registered for the current burst.
    waiting: bool,
    /// Runs per watcher in the current flush.
    runs: HashMap<WatcherId, usize>,
}

thread_local! {
    static TICKS: RefCell<TickState> = RefCell::new(TickState::default());
    static QUEUE: RefCell<QueueState> = RefCell::new(QueueState::default());
}

/// Run `callback` after the current synchronous work, at the next flush.
pub fn next_tick<F>(callback: F) -> Completion
where
    F: FnOnce() + 'static,
{
    let (tx, rx) = oneshot::channel();
    let callback: TickCallback = Box::new(callback);
    TICKS.with(|ticks| ticks.borrow_mut().pending.push_back((callback, tx)));
    rx
}

/// Run every pending tick callback, repeating until nothing is left.
///
/// Returns the number of callbacks that ran.
pub fn flush() -> usize {
    let mut ran = 0;
    loop {
        let pending = TICKS.with(|ticks| std::mem::take(&mut ticks.borrow_mut().pending));
        if pending.is_empty() {
            break;
        }

        tracing::debug!(callbacks = pending.len(), "flushing tick");
        ran += pending.len();
        let mut batch = TickBatch {
            pending,
            done: Vec::new(),
        };
        batch.run();
    }
    ran
}

/// Yield to the async runtime once, then [`flush`].
///
/// Lets hosts running a local async loop treat an `.await` point as the batch
/// boundary.
pub async fn tick() -> usize {
    tokio::task::yield_now().await;
    flush()
}

/// Whether any tick callbacks are waiting for a flush.
pub fn has_pending() -> bool {
    TICKS.with(|ticks| !ticks.borrow().pending.is_empty())
}

/// Watchers currently waiting to re-run, in run order.
pub fn queued_watchers() -> Vec<WatcherId> {
    QUEUE.with(|queue| queue.borrow().queue.iter().copied().collect())
}

/// Queue a watcher for the next flush. Duplicates collapse into one entry.
pub(crate) fn queue_watcher(watcher: &Watcher) {
    let schedule = QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        if !queue.queue.insert(watcher.id()) {
            return false;
        }
        tracing::trace!(watcher = %watcher.id(), "queued");
        if queue.waiting {
            false
        } else {
            queue.waiting = true;
            true
        }
    });

    if schedule {
        // The completion signal is not needed internally.
        let _ = next_tick(flush_queue);
    }
}

/// Remove a watcher from the pending queue.
///
/// Tolerates being called while thread-local storage is torn down, since
/// watchers may be dropped at thread exit.
pub(crate) fn dequeue(id: WatcherId) {
    let _ = QUEUE.try_with(|queue| {
        if let Ok(mut queue) = queue.try_borrow_mut() {
            queue.queue.shift_remove(&id);
        }
    });
}

/// Resets the watcher queue when a flush ends, including by unwinding, so a
/// panicking watcher cannot leave `waiting` set forever.
struct QueueReset;

impl Drop for QueueReset {
    fn drop(&mut self) {
        let _ = QUEUE.try_with(|queue| {
            if let Ok(mut queue) = queue.try_borrow_mut() {
                tracing::debug!(watchers = queue.runs.len(), "flushed watcher queue");
                queue.queue.clear();
                queue.runs.clear();
                queue.waiting = false;
            }
        });
    }
}

fn flush_queue() {
    let _reset = QueueReset;
    let limit = config::get().max_update_count;
    loop {
        let next = QUEUE.with(|queue| {
            let mut queue = queue.borrow_mut();
            let id = queue.queue.shift_remove_index(0)?;
            let runs = queue.runs.entry(id).or_insert(0);
            *runs += 1;
            Some((id, *runs))
        });
        let Some((id, runs)) = next else {
            break;
        };

        if runs > limit {
            let expression = Runtime::watcher(id)
                .map(|w| w.expression().to_string())
                .unwrap_or_default();
            warn(&format!(
                "You may have an infinite update loop in watcher with expression \"{expression}\""
            ));
            break;
        }

        // Dropped watchers resolve to nothing and are skipped
        if let Some(watcher) = Runtime::watcher(id) {
            watcher.run();
        }
    }
}
