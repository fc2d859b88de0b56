//! # Async Taxi Core
//!
//! Core types and traits for coordinating asynchronous actions that flow
//! through a dispatch chain.
//!
//! A server-side renderer needs to know which operations are in flight so it
//! can wait for them before producing output. A client-side renderer fires the
//! same actions without that constraint. This crate holds the vocabulary both
//! sides share; the middleware stages themselves live in `async-taxi-runtime`.
//!
//! ## Core Concepts
//!
//! - **Action**: a kind plus either a payload or a pending operation
//! - **Pending operation**: a shared, multi-consumer async computation
//! - **Dispatch chain**: stages that wrap the next stage (`Middleware`)
//! - **Sequence descriptor**: correlation id + phase attached to derived actions
//! - **Environment**: injected dependencies such as the correlation-id generator
//!
//! ## Example
//!
//! ```
//! use async_taxi_core::action::{Action, ActionKind};
//! use async_taxi_core::operation::PendingOperation;
//!
//! let sync = Action::with_payload("SET_NAME", "ada".to_string());
//! assert!(!sync.has_pending_operation());
//!
//! let fetch: Action<String> =
//!     Action::pending("FETCH_USER", PendingOperation::resolved("ada".to_string()));
//! assert!(fetch.has_pending_operation());
//! assert_eq!(fetch.kind, ActionKind::from("FETCH_USER"));
//! ```

/// Actions, kinds and sequence descriptors
pub mod action;

/// Pending operations, failure reasons and normalization
pub mod operation;

/// The dispatch-chain stage contract
pub mod dispatch;

/// Error types shared by every dispatch stage
pub mod error {
    use crate::action::ActionKind;
    use thiserror::Error;

    /// An asynchronous action reached the gate without being registered.
    ///
    /// This is a programming error: it aborts the dispatch and is expected to
    /// crash the server render rather than be retried or swallowed.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    #[error("{}", unregistered_message(.kind))]
    pub struct RegistrationError {
        /// The offending action kind
        pub kind: ActionKind,
    }

    impl RegistrationError {
        /// Create a registration error for the given kind
        #[must_use]
        pub fn new(kind: impl Into<ActionKind>) -> Self {
            Self { kind: kind.into() }
        }
    }

    fn unregistered_message(kind: &ActionKind) -> String {
        format!(
            "The async action {kind} was dispatched in a server context without being explicitly registered.

This usually means an action carrying a pending operation was dispatched while the view tree was being constructed.

If you DON'T want to delay rendering on the server, move the dispatch to a client-only lifecycle point (one that never runs during server rendering).

If you DO want the server to wait for the action to resolve (or reject) before rendering, register the kind ahead of time:
    RenderPass::builder().register(\"{kind}\")
or declare it on the view type through the AsyncKinds trait."
        )
    }

    /// Errors returned synchronously from a dispatch chain
    #[derive(Error, Debug, Clone)]
    pub enum DispatchError {
        /// The gate refused an asynchronous action whose kind was not registered
        #[error(transparent)]
        Unregistered(#[from] RegistrationError),

        /// A downstream consumer refused the action
        #[error("Action {kind} rejected downstream: {reason}")]
        Rejected {
            /// Kind of the refused action
            kind: ActionKind,
            /// Human-readable explanation
            reason: String,
        },

        /// A pending action was dispatched with no async runtime to drive it
        ///
        /// The sequencer spawns its continuation onto the current tokio
        /// runtime, so dispatching a pending action needs one.
        ///
        /// On a server chain the gate has already collected the operation
        /// when this is returned. The registry keeps that entry, no START or
        /// DONE action is ever forwarded for it, and settling counts it by
        /// the operation's own outcome. The same holds when a downstream
        /// stage refuses the START action.
        #[error("No async runtime available to drive action {0}")]
        RuntimeUnavailable(ActionKind),
    }

    impl DispatchError {
        /// Build a [`DispatchError::Rejected`]
        #[must_use]
        pub fn rejected(kind: impl Into<ActionKind>, reason: impl Into<String>) -> Self {
            Self::Rejected {
                kind: kind.into(),
                reason: reason.into(),
            }
        }

        /// Whether this error came from an unregistered kind
        #[must_use]
        pub const fn is_unregistered(&self) -> bool {
            matches!(self, Self::Unregistered(_))
        }
    }
}

/// Reducer module - the synchronous downstream consumer
///
/// Reducers sit at the end of a dispatch chain. They see every forwarded
/// action, including the START/DONE/ERROR actions produced by the sequencer,
/// and fold them into state.
pub mod reducer {
    use crate::action::Action;

    /// The Reducer trait - folds forwarded actions into state
    ///
    /// # Example
    ///
    /// ```
    /// use async_taxi_core::action::Action;
    /// use async_taxi_core::reducer::Reducer;
    ///
    /// struct Counter;
    ///
    /// impl Reducer<u32> for Counter {
    ///     type State = u32;
    ///
    ///     fn reduce(&self, state: &mut u32, action: Action<u32>) {
    ///         if let Some(n) = action.payload() {
    ///             *state += n;
    ///         }
    ///     }
    /// }
    ///
    /// let mut total = 0;
    /// Counter.reduce(&mut total, Action::with_payload("ADD", 2));
    /// assert_eq!(total, 2);
    /// ```
    pub trait Reducer<T> {
        /// The state type this reducer operates on
        type State;

        /// Apply one forwarded action to the state
        fn reduce(&self, state: &mut Self::State, action: Action<T>);
    }
}

/// Environment module - injected dependencies
///
/// Dependencies that vary between production and tests are abstracted behind
/// traits and passed to the stages that need them.
pub mod environment {
    use crate::action::CorrelationId;

    /// Produces correlation ids for pending actions
    ///
    /// Ids only need to be unique within one rendering pass. Production uses a
    /// short random token; tests use a predictable sequence.
    ///
    /// # Examples
    ///
    /// ```
    /// use async_taxi_core::action::CorrelationId;
    /// use async_taxi_core::environment::IdGenerator;
    ///
    /// struct Constant;
    ///
    /// impl IdGenerator for Constant {
    ///     fn next_id(&self) -> CorrelationId {
    ///         CorrelationId::new("fixed")
    ///     }
    /// }
    ///
    /// assert_eq!(Constant.next_id().as_str(), "fixed");
    /// ```
    pub trait IdGenerator: Send + Sync {
        /// Produce the next correlation id
        fn next_id(&self) -> CorrelationId;
    }
}

pub use action::{Action, ActionBody, ActionKind, CorrelationId, Phase, SequenceDescriptor};
pub use dispatch::{Dispatch, Dispatched, Middleware, Next};
pub use error::{DispatchError, RegistrationError};
pub use operation::{NormalizedFailure, OperationHandle, Outcome, PendingOperation, Reason};
