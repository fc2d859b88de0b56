//! Gate middleware
//!
//! The gate sits first in the server-side dispatch chain. Synchronous actions
//! pass straight through. An action carrying a pending operation must have a
//! registered kind: if it does, its operation is collected into the registry
//! and the action continues unchanged; if not, the dispatch is aborted with a
//! [`RegistrationError`].
//!
//! Client-side chains leave the gate out, so registration is advisory there.
//!
//! The gate must run before the sequencer. Placed after it, the gate would
//! never see a pending operation.

use crate::registry::ActionRegistry;
use async_taxi_core::action::Action;
use async_taxi_core::dispatch::{Dispatch, Dispatched, Middleware, Next};
use async_taxi_core::error::{DispatchError, RegistrationError};
use std::sync::Arc;

/// Enforces registration and collects in-flight operations
///
/// # Example
///
/// ```
/// use async_taxi_core::action::Action;
/// use async_taxi_core::dispatch::{self, Dispatched, Middleware};
/// use async_taxi_core::operation::PendingOperation;
/// use async_taxi_runtime::gate::GateMiddleware;
/// use async_taxi_runtime::registry::ActionRegistry;
/// use std::sync::Arc;
///
/// let registry = Arc::new(ActionRegistry::new());
/// registry.register("FETCH");
///
/// let sink = dispatch::from_fn(|_action: Action<u32>| Ok(Dispatched::Accepted));
/// let gate = GateMiddleware::new(Arc::clone(&registry)).wrap(sink);
///
/// gate.dispatch(Action::pending("FETCH", PendingOperation::resolved(1))).unwrap();
/// assert_eq!(registry.operation_count(), 1);
///
/// let refused = gate.dispatch(Action::pending("OTHER", PendingOperation::resolved(2)));
/// assert!(refused.unwrap_err().is_unregistered());
/// ```
#[derive(Debug)]
pub struct GateMiddleware<T> {
    registry: Arc<ActionRegistry<T>>,
}

impl<T> GateMiddleware<T> {
    /// Create a gate over the pass registry
    #[must_use]
    pub const fn new(registry: Arc<ActionRegistry<T>>) -> Self {
        Self { registry }
    }

    /// The registry this gate reads and writes
    #[must_use]
    pub const fn registry(&self) -> &Arc<ActionRegistry<T>> {
        &self.registry
    }
}

impl<T> Clone for GateMiddleware<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Middleware<T> for GateMiddleware<T>
where
    T: Send + Sync + 'static,
{
    fn wrap(&self, next: Next<T>) -> Next<T> {
        Arc::new(GateStage {
            registry: Arc::clone(&self.registry),
            next,
        })
    }
}

struct GateStage<T> {
    registry: Arc<ActionRegistry<T>>,
    next: Next<T>,
}

impl<T> Dispatch<T> for GateStage<T>
where
    T: Send + Sync + 'static,
{
    fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
        let Some(operation) = action.pending_operation() else {
            metrics::counter!("taxi.gate.forwarded").increment(1);
            return self.next.dispatch(action);
        };

        if !self.registry.is_registered(action.kind.as_str()) {
            tracing::error!(kind = %action.kind, "Unregistered async action dispatched through the gate");
            metrics::counter!("taxi.gate.rejected", "kind" => action.kind.to_string()).increment(1);
            return Err(RegistrationError::new(action.kind).into());
        }

        self.registry.collect_operation(operation.clone());
        tracing::debug!(
            kind = %action.kind,
            collected = self.registry.operation_count(),
            "Collected pending operation"
        );
        metrics::counter!("taxi.gate.collected", "kind" => action.kind.to_string()).increment(1);

        self.next.dispatch(action)
    }
}
