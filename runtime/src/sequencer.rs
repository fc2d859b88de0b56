//! Sequencer middleware
//!
//! Expands one promise-bearing action into a START action, forwarded
//! immediately, and a DONE or ERROR action forwarded once the operation
//! settles. All three share a correlation id.
//!
//! ```text
//! DISPATCHED ──▶ START emitted ──┬──▶ DONE emitted    (terminal)
//!                                └──▶ ERROR emitted   (terminal)
//! ```
//!
//! The ERROR action's descriptor has no phase; consumers tell it apart by
//! `error == true`. There is no retry: a failure is surfaced exactly once.
//!
//! The continuation that forwards DONE/ERROR runs on a spawned tokio task and
//! is attached to the operation, so [`PendingOperation::settled`] does not
//! resolve before it has run.
//!
//! [`PendingOperation::settled`]: async_taxi_core::operation::PendingOperation::settled

use crate::ids::RandomIdGenerator;
use async_taxi_core::action::{Action, ActionBody, SequenceDescriptor};
use async_taxi_core::dispatch::{Dispatch, Dispatched, Middleware, Next};
use async_taxi_core::environment::IdGenerator;
use async_taxi_core::error::DispatchError;
use async_taxi_core::operation::{NormalizedFailure, OperationHandle, Reason};
use std::fmt;
use std::sync::Arc;

/// Turns pending actions into START/DONE/ERROR sequences
///
/// # Example
///
/// ```
/// use async_taxi_core::action::Action;
/// use async_taxi_core::dispatch::{self, Dispatched, Middleware};
/// use async_taxi_core::operation::PendingOperation;
/// use async_taxi_runtime::sequencer::SequencerMiddleware;
///
/// # tokio_test::block_on(async {
/// let sink = dispatch::from_fn(|_action: Action<u32>| Ok(Dispatched::Accepted));
/// let chain = SequencerMiddleware::new().wrap(sink);
///
/// let handle = chain
///     .dispatch(Action::pending("FETCH", PendingOperation::resolved(42)))
///     .unwrap()
///     .into_handle()
///     .unwrap();
///
/// assert_eq!(handle.await, Ok(42));
/// # });
/// ```
#[derive(Clone)]
pub struct SequencerMiddleware {
    ids: Arc<dyn IdGenerator>,
}

impl SequencerMiddleware {
    /// Sequencer using random correlation ids
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(RandomIdGenerator::new()))
    }

    /// Sequencer using the given id generator
    #[must_use]
    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }
}

impl Default for SequencerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SequencerMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequencerMiddleware").finish_non_exhaustive()
    }
}

impl<T> Middleware<T> for SequencerMiddleware
where
    T: Clone + Send + Sync + 'static,
{
    fn wrap(&self, next: Next<T>) -> Next<T> {
        Arc::new(SequencerStage {
            ids: Arc::clone(&self.ids),
            next,
        })
    }
}

struct SequencerStage<T> {
    ids: Arc<dyn IdGenerator>,
    next: Next<T>,
}

impl<T> Dispatch<T> for SequencerStage<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
        let (operation, rest) = match action.split_pending() {
            Ok(parts) => parts,
            Err(action) => return self.next.dispatch(action),
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(kind = %rest.kind, "Pending action dispatched outside a tokio runtime");
            return Err(DispatchError::RuntimeUnavailable(rest.kind));
        };

        let id = self.ids.next_id();
        tracing::debug!(kind = %rest.kind, %id, "Sequence started");
        metrics::counter!("taxi.sequence.started", "kind" => rest.kind.to_string()).increment(1);
        self.next.dispatch(rest.derive(
            ActionBody::Empty,
            SequenceDescriptor::start(id.clone()),
            rest.error,
        ))?;

        // Counted from here until the terminal action has been forwarded.
        let guard = operation.attach_continuation();
        let next = Arc::clone(&self.next);

        let continuation = runtime.spawn(async move {
            let _guard = guard;
            let outcome = operation.outcome().await;

            match &outcome {
                Ok(value) => {
                    tracing::debug!(kind = %rest.kind, %id, "Sequence done");
                    metrics::counter!("taxi.sequence.done", "kind" => rest.kind.to_string())
                        .increment(1);
                    let done = rest.derive(
                        ActionBody::Payload(value.clone()),
                        SequenceDescriptor::done(id),
                        rest.error,
                    );
                    if let Err(err) = next.dispatch(done) {
                        tracing::error!(kind = %rest.kind, error = %err, "Forwarding DONE action failed");
                        return Err(Reason::error(err));
                    }
                },
                Err(reason) => {
                    tracing::warn!(kind = %rest.kind, %id, %reason, "Sequence failed");
                    metrics::counter!("taxi.sequence.failed", "kind" => rest.kind.to_string())
                        .increment(1);
                    let failed = rest.derive(
                        ActionBody::Failure(NormalizedFailure::from_reason(reason)),
                        SequenceDescriptor::failure(id),
                        true,
                    );
                    if let Err(err) = next.dispatch(failed) {
                        tracing::error!(kind = %rest.kind, error = %err, "Forwarding ERROR action failed");
                    }
                },
            }

            // The caller sees the original reason, not the normalized payload.
            outcome
        });

        Ok(Dispatched::Pending(OperationHandle::new(async move {
            match continuation.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(Reason::error(join_error)),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use async_taxi_core::action::Phase;
    use async_taxi_core::operation::PendingOperation;
    use async_taxi_testing::{FailingSink, RecordingSink, SequentialIdGenerator, deferred};
    use serde_json::json;
    use std::time::Duration;

    fn sequencer_over(sink: &RecordingSink<u32>) -> Next<u32> {
        SequencerMiddleware::with_id_generator(Arc::new(SequentialIdGenerator::new()))
            .wrap(sink.as_next())
    }

    #[tokio::test]
    async fn sync_actions_pass_through_without_sequence() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);

        let result = chain.dispatch(Action::with_payload("SET", 1)).unwrap();

        assert!(!result.is_pending());
        let forwarded = sink.actions();
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].sequence.is_none());
        assert_eq!(forwarded[0].payload(), Some(&1));
    }

    #[tokio::test]
    async fn start_is_forwarded_before_resolution() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);
        let (operation, resolver) = deferred::<u32>();

        let handle = chain
            .dispatch(Action::pending("FETCH", operation))
            .unwrap()
            .into_handle()
            .unwrap();

        let forwarded = sink.actions();
        assert_eq!(forwarded.len(), 1);
        let start = &forwarded[0];
        assert_eq!(start.kind, "FETCH");
        assert!(matches!(start.body, ActionBody::Empty));
        let sequence = start.sequence.clone().unwrap();
        assert_eq!(sequence.phase, Some(Phase::Start));

        resolver.resolve(42);
        assert_eq!(handle.await, Ok(42));

        let forwarded = sink.actions();
        assert_eq!(forwarded.len(), 2);
        let done = &forwarded[1];
        assert_eq!(done.kind, "FETCH");
        assert_eq!(done.payload(), Some(&42));
        assert!(!done.error);
        assert_eq!(done.sequence, Some(SequenceDescriptor::done(sequence.id)));
    }

    #[tokio::test]
    async fn string_rejection_is_normalized_for_the_chain_only() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);

        let handle = chain
            .dispatch(Action::pending("FETCH", PendingOperation::rejected("boom")))
            .unwrap()
            .into_handle()
            .unwrap();

        assert_eq!(handle.await, Err(Reason::message("boom")));

        let forwarded = sink.actions();
        assert_eq!(forwarded.len(), 2);
        let start_id = forwarded[0].sequence.clone().unwrap().id;
        let failed = &forwarded[1];
        assert!(failed.error);
        assert_eq!(failed.sequence, Some(SequenceDescriptor::failure(start_id)));
        let failure = failed.failure().expect("error payload");
        assert_eq!(failure.message(), "boom");
        assert_eq!(failure.data(), Some(&Reason::message("boom")));
    }

    #[tokio::test]
    async fn data_rejection_keeps_raw_reason_as_data() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);
        let reason = Reason::data(json!({ "status": 404 }));

        let handle = chain
            .dispatch(Action::pending("FETCH", PendingOperation::rejected(reason.clone())))
            .unwrap()
            .into_handle()
            .unwrap();

        assert_eq!(handle.await, Err(reason.clone()));
        let failure = sink.actions()[1].failure().cloned().unwrap();
        assert_eq!(
            failure.message(),
            async_taxi_core::operation::REJECTED_WITH_DATA
        );
        assert_eq!(failure.data(), Some(&reason));
    }

    #[tokio::test]
    async fn meta_is_copied_onto_every_derived_action() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);

        let handle = chain
            .dispatch(
                Action::pending("FETCH", PendingOperation::resolved(3))
                    .with_meta(json!({ "user": 7 })),
            )
            .unwrap()
            .into_handle()
            .unwrap();
        handle.await.unwrap();

        for action in sink.actions() {
            assert_eq!(action.meta, Some(json!({ "user": 7 })));
        }
    }

    #[tokio::test]
    async fn start_order_follows_dispatch_order() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);
        let (slow, slow_resolver) = deferred::<u32>();
        let (fast, fast_resolver) = deferred::<u32>();

        let slow_handle = chain.dispatch(Action::pending("SLOW", slow)).unwrap().into_handle().unwrap();
        let fast_handle = chain.dispatch(Action::pending("FAST", fast)).unwrap().into_handle().unwrap();

        fast_resolver.resolve(2);
        assert_eq!(fast_handle.await, Ok(2));
        slow_resolver.resolve(1);
        assert_eq!(slow_handle.await, Ok(1));

        let kinds: Vec<_> = sink.actions().iter().map(|a| a.kind.to_string()).collect();
        assert_eq!(kinds, vec!["SLOW", "FAST", "FAST", "SLOW"]);
        let ids: Vec<_> = sink.sequences().into_iter().flatten().map(|s| s.id).collect();
        assert_eq!(ids[0], ids[3]);
        assert_eq!(ids[1], ids[2]);
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn settled_waits_for_terminal_action() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);
        let operation = PendingOperation::resolved(5);

        let _handle = chain.dispatch(Action::pending("FETCH", operation.clone())).unwrap();
        operation.settled().await.unwrap();

        assert_eq!(sink.call_count(), 2);
        assert!(sink.actions()[1].sequence.as_ref().unwrap().is_done());
    }

    #[tokio::test]
    async fn never_settling_operation_leaves_sequence_open() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);
        let (operation, _resolver) = deferred::<u32>();

        let handle = chain
            .dispatch(Action::pending("HANG", operation))
            .unwrap()
            .into_handle()
            .unwrap();

        assert!(tokio::time::timeout(Duration::from_millis(30), handle).await.is_err());
        assert_eq!(sink.call_count(), 1);
    }

    #[tokio::test]
    async fn failing_start_aborts_the_dispatch() {
        let sink = FailingSink::new("store closed");
        let chain = SequencerMiddleware::new().wrap(sink.as_next());
        let operation = PendingOperation::resolved(1);

        let err = chain
            .dispatch(Action::pending("FETCH", operation.clone()))
            .unwrap_err();

        assert!(matches!(err, DispatchError::Rejected { .. }));
        assert_eq!(operation.attached_continuations(), 0);
    }

    #[test]
    fn pending_dispatch_needs_a_runtime() {
        let sink = RecordingSink::new();
        let chain = sequencer_over(&sink);

        let err = chain
            .dispatch(Action::pending("FETCH", PendingOperation::resolved(1)))
            .unwrap_err();

        assert!(matches!(err, DispatchError::RuntimeUnavailable(_)));
        assert_eq!(sink.call_count(), 0);
    }

    /// Accepts START actions and refuses everything after them
    fn start_only(sink: &RecordingSink<u32>) -> Next<u32> {
        let record = sink.as_next();
        let inner = async_taxi_core::dispatch::from_fn(move |action: Action<u32>| {
            let starting = action.sequence.as_ref().is_some_and(SequenceDescriptor::is_start);
            let kind = action.kind.clone();
            record.dispatch(action)?;
            if starting {
                Ok(Dispatched::Accepted)
            } else {
                Err(DispatchError::rejected(kind, "closed"))
            }
        });
        SequencerMiddleware::with_id_generator(Arc::new(SequentialIdGenerator::new())).wrap(inner)
    }

    #[tokio::test]
    async fn refused_done_fails_the_caller_with_the_dispatch_error() {
        let sink = RecordingSink::new();
        let chain = start_only(&sink);

        let handle = chain
            .dispatch(Action::pending("FETCH", PendingOperation::resolved(9)))
            .unwrap()
            .into_handle()
            .unwrap();

        let Err(Reason::Error(error)) = handle.await else {
            panic!("expected the DONE refusal to reach the caller");
        };
        let refusal = error.downcast_ref::<DispatchError>().unwrap();
        assert!(matches!(refusal, DispatchError::Rejected { reason, .. } if reason == "closed"));
        assert_eq!(sink.call_count(), 2);
        assert_eq!(sink.actions()[1].payload(), Some(&9));
    }

    #[tokio::test]
    async fn refused_error_still_returns_the_original_reason() {
        let sink = RecordingSink::new();
        let chain = start_only(&sink);

        let handle = chain
            .dispatch(Action::pending("FETCH", PendingOperation::rejected("boom")))
            .unwrap()
            .into_handle()
            .unwrap();

        assert_eq!(handle.await, Err(Reason::message("boom")));
        assert_eq!(sink.call_count(), 2);
        assert!(sink.actions()[1].error);
    }

    #[tokio::test]
    async fn aborted_continuation_surfaces_as_an_error_reason() {
        let sink = async_taxi_core::dispatch::from_fn(|action: Action<u32>| {
            if action.sequence.as_ref().is_some_and(SequenceDescriptor::is_done) {
                panic!("consumer crashed on DONE");
            }
            Ok(Dispatched::Accepted)
        });
        let chain = SequencerMiddleware::new().wrap(sink);
        let operation = PendingOperation::resolved(1);

        let handle = chain
            .dispatch(Action::pending("FETCH", operation.clone()))
            .unwrap()
            .into_handle()
            .unwrap();

        let Err(Reason::Error(error)) = handle.await else {
            panic!("expected the aborted continuation to fail the caller");
        };
        assert!(error.downcast_ref::<tokio::task::JoinError>().is_some_and(|e| e.is_panic()));
        // The continuation guard is released during unwinding.
        assert_eq!(operation.attached_continuations(), 0);
    }
}
