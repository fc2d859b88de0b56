//! Dispatch-chain stage contract
//!
//! A stage is a function of the next stage that returns a handler of one
//! action. In Rust terms a [`Middleware`] wraps a [`Next`] and returns a new
//! [`Next`]; a terminal consumer is any [`Dispatch`] implementation.
//!
//! Dispatch is synchronous. A stage either forwards immediately, fails
//! immediately with a [`DispatchError`], or returns a [`Dispatched::Pending`]
//! handle the caller can await.

use crate::action::Action;
use crate::error::DispatchError;
use crate::operation::OperationHandle;
use std::fmt;
use std::sync::Arc;

/// Handles one action at a time
pub trait Dispatch<T>: Send + Sync {
    /// Handle an action, returning whatever the rest of the chain returns
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] when this stage (or any stage after it)
    /// aborts the dispatch.
    fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError>;
}

impl<T, F> Dispatch<T> for F
where
    F: Fn(Action<T>) -> Result<Dispatched<T>, DispatchError> + Send + Sync,
{
    fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
        self(action)
    }
}

/// The next stage in a chain
pub type Next<T> = Arc<dyn Dispatch<T>>;

/// Turn a closure into a stage
///
/// # Example
///
/// ```
/// use async_taxi_core::action::Action;
/// use async_taxi_core::dispatch::{self, Dispatched};
///
/// let sink = dispatch::from_fn(|_action: Action<u8>| Ok(Dispatched::Accepted));
/// assert!(sink.dispatch(Action::new("PING")).is_ok());
/// ```
pub fn from_fn<T, F>(handler: F) -> Next<T>
where
    T: 'static,
    F: Fn(Action<T>) -> Result<Dispatched<T>, DispatchError> + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// A dispatch-chain stage: wraps the next stage into a new handler
pub trait Middleware<T>: Send + Sync {
    /// Build this stage's handler around `next`
    fn wrap(&self, next: Next<T>) -> Next<T>;
}

/// What a dispatch returned
pub enum Dispatched<T> {
    /// A terminal consumer accepted the action synchronously
    Accepted,
    /// The action carried a pending operation; await the handle for its outcome
    Pending(OperationHandle<T>),
}

impl<T> Dispatched<T> {
    /// Whether an async handle was returned
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Take the async handle, if any
    #[must_use]
    pub fn into_handle(self) -> Option<OperationHandle<T>> {
        match self {
            Self::Pending(handle) => Some(handle),
            Self::Accepted => None,
        }
    }
}

impl<T> fmt::Debug for Dispatched<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "Dispatched::Accepted"),
            Self::Pending(handle) => f.debug_tuple("Dispatched::Pending").field(handle).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tagging {
        tag: &'static str,
    }

    impl Middleware<Vec<&'static str>> for Tagging {
        fn wrap(&self, next: Next<Vec<&'static str>>) -> Next<Vec<&'static str>> {
            let tag = self.tag;
            from_fn(move |mut action: Action<Vec<&'static str>>| {
                if let crate::action::ActionBody::Payload(tags) = &mut action.body {
                    tags.push(tag);
                }
                next.dispatch(action)
            })
        }
    }

    #[test]
    fn closures_are_terminal_stages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let sink = from_fn(move |_action: Action<u8>| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Dispatched::Accepted)
        });

        let result = sink.dispatch(Action::with_payload("PING", 1));

        assert!(matches!(result, Ok(Dispatched::Accepted)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outer_stage_sees_action_first() {
        let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
        let record = Arc::clone(&observed);
        let sink = from_fn(move |action: Action<Vec<&'static str>>| {
            if let Some(tags) = action.payload() {
                record
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .extend(tags.iter().copied());
            }
            Ok(Dispatched::Accepted)
        });

        let inner = Tagging { tag: "inner" }.wrap(sink);
        let outer = Tagging { tag: "outer" }.wrap(inner);
        let _ = outer.dispatch(Action::with_payload("TAG", Vec::new()));

        let tags = observed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(tags, vec!["outer", "inner"]);
    }

    #[test]
    fn accepted_has_no_handle() {
        let dispatched: Dispatched<u8> = Dispatched::Accepted;

        assert!(!dispatched.is_pending());
        assert!(dispatched.into_handle().is_none());
    }
}
