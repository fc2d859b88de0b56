//! # Async Taxi Testing
//!
//! Testing utilities and helpers for async action coordination.
//!
//! This crate provides:
//! - Mock dispatch stages that record or refuse what they receive
//! - A predictable correlation-id generator
//! - Pending operations whose settlement the test controls
//! - Property-based testing strategies
//! - A Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```
//! use async_taxi_core::action::Action;
//! use async_taxi_core::dispatch::Middleware;
//! use async_taxi_runtime::sequencer::SequencerMiddleware;
//! use async_taxi_testing::{RecordingSink, SequentialIdGenerator, deferred};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let sink = RecordingSink::new();
//! let chain = SequencerMiddleware::with_id_generator(Arc::new(SequentialIdGenerator::new()))
//!     .wrap(sink.as_next());
//! let (operation, resolver) = deferred::<u32>();
//!
//! let handle = chain
//!     .dispatch(Action::pending("FETCH", operation))
//!     .unwrap()
//!     .into_handle()
//!     .unwrap();
//! assert_eq!(sink.call_count(), 1);
//!
//! resolver.resolve(42);
//! assert_eq!(handle.await, Ok(42));
//! assert_eq!(sink.call_count(), 2);
//! # });
//! ```

/// Given-When-Then testing for reducers
pub mod reducer_test;

/// Mock dispatch stages and environment implementations
pub mod mocks {
    use async_taxi_core::action::{Action, ActionKind, CorrelationId, SequenceDescriptor};
    use async_taxi_core::dispatch::{Dispatch, Dispatched, Next};
    use async_taxi_core::environment::IdGenerator;
    use async_taxi_core::error::DispatchError;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::Notify;

    struct Recorded<T> {
        actions: Mutex<Vec<Action<T>>>,
        notify: Notify,
    }

    /// Terminal stage that records every action it receives
    ///
    /// Clones share the recording, so keep one clone for assertions and hand
    /// another to the chain.
    pub struct RecordingSink<T> {
        recorded: Arc<Recorded<T>>,
    }

    impl<T> RecordingSink<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        /// Create an empty recording
        #[must_use]
        pub fn new() -> Self {
            Self {
                recorded: Arc::new(Recorded {
                    actions: Mutex::new(Vec::new()),
                    notify: Notify::new(),
                }),
            }
        }

        /// This sink as a chain stage
        #[must_use]
        pub fn as_next(&self) -> Next<T> {
            Arc::new(self.clone())
        }

        /// Snapshot of the recorded actions, in arrival order
        #[must_use]
        pub fn actions(&self) -> Vec<Action<T>> {
            self.lock().clone()
        }

        /// Number of actions received
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.lock().len()
        }

        /// Kinds of the recorded actions, in arrival order
        #[must_use]
        pub fn kinds(&self) -> Vec<ActionKind> {
            self.lock().iter().map(|action| action.kind.clone()).collect()
        }

        /// Sequence descriptors of the recorded actions, in arrival order
        #[must_use]
        pub fn sequences(&self) -> Vec<Option<SequenceDescriptor>> {
            self.lock().iter().map(|action| action.sequence.clone()).collect()
        }

        /// Wait until at least `count` actions have been received
        pub async fn wait_for_calls(&self, count: usize) {
            loop {
                let notified = self.recorded.notify.notified();
                if self.call_count() >= count {
                    return;
                }
                notified.await;
            }
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Action<T>>> {
            self.recorded.actions.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl<T> Clone for RecordingSink<T> {
        fn clone(&self) -> Self {
            Self {
                recorded: Arc::clone(&self.recorded),
            }
        }
    }

    impl<T> Default for RecordingSink<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T> Dispatch<T> for RecordingSink<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
            self.lock().push(action);
            self.recorded.notify.notify_waiters();
            Ok(Dispatched::Accepted)
        }
    }

    impl<T> std::fmt::Debug for RecordingSink<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RecordingSink")
                .field("calls", &self.call_count())
                .finish()
        }
    }

    /// Terminal stage that refuses every action
    #[derive(Debug, Clone)]
    pub struct FailingSink {
        reason: String,
    }

    impl FailingSink {
        /// Refuse with the given reason
        #[must_use]
        pub fn new(reason: impl Into<String>) -> Self {
            Self {
                reason: reason.into(),
            }
        }

        /// This sink as a chain stage
        #[must_use]
        pub fn as_next<T: 'static>(&self) -> Next<T> {
            Arc::new(self.clone())
        }
    }

    impl<T> Dispatch<T> for FailingSink {
        fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
            Err(DispatchError::rejected(action.kind, self.reason.clone()))
        }
    }

    /// Sequential id generator for predictable tests
    ///
    /// Produces "seq-1", "seq-2", ...
    ///
    /// # Example
    ///
    /// ```
    /// use async_taxi_core::environment::IdGenerator;
    /// use async_taxi_testing::mocks::SequentialIdGenerator;
    ///
    /// let ids = SequentialIdGenerator::new();
    /// assert_eq!(ids.next_id().as_str(), "seq-1");
    /// assert_eq!(ids.next_id().as_str(), "seq-2");
    /// ```
    #[derive(Debug, Default)]
    pub struct SequentialIdGenerator {
        counter: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start counting from one
        #[must_use]
        pub const fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
            }
        }

        /// Ids handed out so far
        #[must_use]
        pub fn issued(&self) -> u64 {
            self.counter.load(Ordering::SeqCst)
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> CorrelationId {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            CorrelationId::new(format!("seq-{n}"))
        }
    }
}

/// Pending operations settled by the test
pub mod operations {
    use async_taxi_core::operation::{Outcome, PendingOperation, Reason};
    use tokio::sync::oneshot;

    /// Message of the failure seen when a [`Resolver`] is dropped unused
    pub const RESOLVER_DROPPED: &str = "resolver dropped before settling";

    /// Settles the operation returned alongside it by [`deferred`]
    #[derive(Debug)]
    pub struct Resolver<T> {
        sender: oneshot::Sender<Outcome<T>>,
    }

    impl<T> Resolver<T> {
        /// Resolve with a value
        pub fn resolve(self, value: T) {
            let _ = self.sender.send(Ok(value));
        }

        /// Fail with a reason
        pub fn reject(self, reason: impl Into<Reason>) {
            let _ = self.sender.send(Err(reason.into()));
        }
    }

    /// An operation that settles only when the test says so
    ///
    /// Dropping the [`Resolver`] without using it rejects the operation with
    /// [`RESOLVER_DROPPED`].
    #[must_use]
    pub fn deferred<T>() -> (PendingOperation<T>, Resolver<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let operation = PendingOperation::new(async move {
            receiver
                .await
                .unwrap_or_else(|_| Err(Reason::message(RESOLVER_DROPPED)))
        });
        (operation, Resolver { sender })
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use async_taxi_core::action::ActionKind;
    use proptest::prelude::*;

    /// Upper-snake-case action kinds such as `FETCH_USER`
    pub fn arb_kind() -> impl Strategy<Value = ActionKind> {
        "[A-Z][A-Z0-9_]{0,15}".prop_map(ActionKind::from)
    }

    /// Small JSON objects for action metadata
    pub fn arb_meta() -> impl Strategy<Value = serde_json::Value> {
        prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..4).prop_map(|fields| {
            serde_json::Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, serde_json::Value::from(value)))
                    .collect(),
            )
        })
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use helpers::init_tracing;
pub use mocks::{FailingSink, RecordingSink, SequentialIdGenerator};
pub use operations::{Resolver, deferred};
pub use reducer_test::ReducerTest;
