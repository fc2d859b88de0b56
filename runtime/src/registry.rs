//! Action registry
//!
//! One [`ActionRegistry`] exists per server rendering pass. It records which
//! action kinds are expected to carry asynchronous work and collects, in
//! dispatch order, the operations that the gate let through.
//!
//! Registration happens at composition time, before any dispatch of the
//! corresponding kind. Kinds are never removed and the operation sequence only
//! grows for the lifetime of the registry.

use async_taxi_core::action::ActionKind;
use async_taxi_core::operation::PendingOperation;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Declares the async action kinds a type dispatches
///
/// Implemented by view or component types so their required kinds can be
/// registered in one explicit step when the pass is composed.
///
/// # Example
///
/// ```
/// use async_taxi_core::action::ActionKind;
/// use async_taxi_runtime::registry::{ActionRegistry, AsyncKinds};
///
/// struct UserProfile;
///
/// impl AsyncKinds for UserProfile {
///     fn async_kinds() -> Vec<ActionKind> {
///         vec!["FETCH_USER".into(), "FETCH_AVATAR".into()]
///     }
/// }
///
/// let registry: ActionRegistry<String> = ActionRegistry::new();
/// registry.declare::<UserProfile>();
/// assert!(registry.is_registered("FETCH_AVATAR"));
/// ```
pub trait AsyncKinds {
    /// Kinds this type may dispatch with a pending operation
    fn async_kinds() -> Vec<ActionKind>;
}

/// Registered kinds plus collected operations for one rendering pass
///
/// Shared between the gate and the rendering driver behind an `Arc`. Every
/// method runs to completion without suspending.
pub struct ActionRegistry<T> {
    kinds: RwLock<HashSet<ActionKind>>,
    operations: Mutex<Vec<PendingOperation<T>>>,
}

impl<T> ActionRegistry<T> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            kinds: RwLock::new(HashSet::new()),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Register a kind. Registering twice has no further effect.
    pub fn register(&self, kind: impl Into<ActionKind>) {
        let kind = kind.into();
        if self.write_kinds().insert(kind.clone()) {
            tracing::trace!(%kind, "Registered async action kind");
        }
    }

    /// Register every kind in `kinds`
    pub fn register_all<I, K>(&self, kinds: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<ActionKind>,
    {
        for kind in kinds {
            self.register(kind);
        }
    }

    /// Register the kinds a type declares
    pub fn declare<C: AsyncKinds>(&self) {
        self.register_all(C::async_kinds());
    }

    /// Whether `kind` has been registered
    #[must_use]
    pub fn is_registered(&self, kind: &str) -> bool {
        self.read_kinds().contains(kind)
    }

    /// Snapshot of the registered kinds
    ///
    /// The snapshot is owned; mutating it does not touch the registry.
    #[must_use]
    pub fn registered_kinds(&self) -> HashSet<ActionKind> {
        self.read_kinds().clone()
    }

    /// Append an operation. No deduplication.
    pub fn collect_operation(&self, operation: PendingOperation<T>) {
        self.lock_operations().push(operation);
    }

    /// Snapshot of the collected operations, in collection order
    #[must_use]
    pub fn all_operations(&self) -> Vec<PendingOperation<T>> {
        self.lock_operations().clone()
    }

    /// Operations collected at or after position `start`
    #[must_use]
    pub fn operations_since(&self, start: usize) -> Vec<PendingOperation<T>> {
        self.lock_operations()
            .get(start..)
            .map(<[_]>::to_vec)
            .unwrap_or_default()
    }

    /// Number of collected operations
    #[must_use]
    pub fn operation_count(&self) -> usize {
        self.lock_operations().len()
    }

    /// Whether nothing has been registered or collected yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_kinds().is_empty() && self.lock_operations().is_empty()
    }

    // Poisoning only means a panic elsewhere; the set and the append-only
    // sequence are still consistent, so keep using them.

    fn read_kinds(&self) -> RwLockReadGuard<'_, HashSet<ActionKind>> {
        self.kinds.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_kinds(&self) -> RwLockWriteGuard<'_, HashSet<ActionKind>> {
        self.kinds.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_operations(&self) -> MutexGuard<'_, Vec<PendingOperation<T>>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for ActionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ActionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("kinds", &*self.read_kinds())
            .field("operations", &self.operation_count())
            .finish()
    }
}
