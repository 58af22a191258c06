//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating. This
//! enables automatic dependency tracking: when a reactive slot is read, the
//! current watcher subscribes to the slot's dependency.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a context (evaluating a watcher)
//! pushes the watcher; the returned guard pops it when dropped. A computed
//! value evaluated in the middle of a render evaluation pushes on top and,
//! once done, leaves the render watcher active again.
//!
//! A frame may also be empty: [`untracked`] pushes one so that reads inside
//! it register nothing, even when a watcher is evaluating further down.

use std::cell::RefCell;

use super::watcher::Watcher;
use crate::graph::WatcherId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Option<Watcher>>> = RefCell::new(Vec::new());
}

/// Guard that pops the context when dropped.
///
/// This keeps the stack balanced even if the computation returns early or
/// panics.
pub struct ReactiveContext {
    watcher_id: Option<WatcherId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given watcher.
    ///
    /// While this context is active, reactive reads subscribe the watcher.
    pub fn enter(watcher: &Watcher) -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(Some(watcher.clone())));
        Self {
            watcher_id: Some(watcher.id()),
        }
    }

    /// Enter a context in which reads are not tracked.
    pub fn suspend() -> Self {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { watcher_id: None }
    }

    /// Check if a watcher is collecting dependencies right now.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// The watcher currently collecting dependencies, if any.
    pub fn current() -> Option<Watcher> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let popped = CONTEXT_STACK.with(|stack| stack.borrow_mut().pop());

        // Verify we're popping the right context.
        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(Watcher::id),
                self.watcher_id,
                "ReactiveContext mismatch"
            );
        }
    }
}

/// Run `f` with dependency tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::suspend();
    f()
}
