//! Error Handling
//!
//! Nothing in the reactive core is fatal. Failures fall into two channels:
//!
//! - **Errors** raised while evaluating a watcher getter or a data factory.
//!   They are caught at the evaluation boundary and routed to
//!   [`handle_error`] together with a description of where they happened.
//!
//! - **Warnings** about disallowed or suspicious operations (adding keys to
//!   root data, a computed property without a getter, ...). They go through
//!   [`warn`] and the offending operation is skipped.
//!
//! Both channels log through `tracing` by default. Hosts that want to collect
//! them can install per-thread hooks with [`set_error_handler`] and
//! [`set_warn_handler`].

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::config;

/// Errors produced by the reactive runtime.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A getter or data factory failed.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// A watch expression could not be parsed as a dotted path.
    #[error("invalid watch path \"{0}\"")]
    InvalidPath(String),

    /// A configuration document could not be decoded.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl ReactiveError {
    /// Shorthand for an [`ReactiveError::Evaluation`] error.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ReactiveError>;

type ErrorHook = Rc<dyn Fn(&ReactiveError, &str)>;
type WarnHook = Rc<dyn Fn(&str)>;

#[derive(Default)]
struct Hooks {
    error: Option<ErrorHook>,
    warn: Option<WarnHook>,
}

thread_local! {
    static HOOKS: RefCell<Hooks> = RefCell::new(Hooks::default());
}

/// Install an error handler for the current thread.
///
/// The handler receives the error and the context it was raised in, e.g.
/// `getter for watcher "b.c"` or `data()`.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&ReactiveError, &str) + 'static,
{
    HOOKS.with(|hooks| hooks.borrow_mut().error = Some(Rc::new(handler)));
}

/// Install a warning handler for the current thread.
///
/// The handler is called even when [`config::Config::silent`] is set.
pub fn set_warn_handler<F>(handler: F)
where
    F: Fn(&str) + 'static,
{
    HOOKS.with(|hooks| hooks.borrow_mut().warn = Some(Rc::new(handler)));
}

/// Remove both hooks for the current thread.
pub fn clear_handlers() {
    HOOKS.with(|hooks| *hooks.borrow_mut() = Hooks::default());
}

/// Route an evaluation error to the central handler.
pub fn handle_error(err: &ReactiveError, context: &str) {
    // Clone the hook out so it may install a new handler while running.
    let hook = HOOKS.with(|hooks| hooks.borrow().error.clone());
    match hook {
        Some(hook) => hook(err, context),
        None => tracing::error!(context, error = %err, "error in {context}"),
    }
}

/// Report a non-fatal warning.
pub fn warn(message: &str) {
    if !config::get().silent {
        tracing::warn!("{message}");
    }
    let hook = HOOKS.with(|hooks| hooks.borrow().warn.clone());
    if let Some(hook) = hook {
        hook(message);
    }
}
