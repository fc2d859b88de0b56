//! Pending operations and their failures
//!
//! A [`PendingOperation`] is the asynchronous half of an action. It is cloned
//! freely: the gate hands one clone to the registry, the sequencer keeps
//! another, and the rendering driver awaits the registry's copies. Every clone
//! observes the same single computation.
//!
//! Besides the computation itself, an operation tracks the continuations
//! attached to it (the sequencer's DONE/ERROR forwarding). [`PendingOperation::settled`]
//! resolves only once the computation has finished *and* every attached
//! continuation has run, so a driver that awaits `settled()` is guaranteed to
//! have seen the terminal action for that operation.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::sync::watch;

/// Message used when an operation fails with a reason that is neither an
/// error nor a string.
pub const REJECTED_WITH_DATA: &str = "Promise rejected with data. See error.data field.";

/// Result of a settled operation
pub type Outcome<T> = Result<T, Reason>;

/// The original value an operation failed with
#[derive(Debug, Clone)]
pub enum Reason {
    /// An error-shaped reason
    Error(Arc<dyn Error + Send + Sync>),
    /// A plain string reason
    Message(String),
    /// Any other value
    Data(serde_json::Value),
}

impl Reason {
    /// Wrap an error value
    #[must_use]
    pub fn error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Error(Arc::new(error))
    }

    /// Wrap a plain string
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wrap an arbitrary value
    #[must_use]
    pub fn data(data: impl Into<serde_json::Value>) -> Self {
        Self::Data(data.into())
    }

    /// Whether the reason is already error-shaped
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => write!(f, "{error}"),
            Self::Message(message) => f.write_str(message),
            Self::Data(data) => write!(f, "{data}"),
        }
    }
}

impl Error for Reason {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Error(error) => Some(&**error),
            _ => None,
        }
    }
}

// Errors compare by identity
impl PartialEq for Reason {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Error(a), Self::Error(b)) => Arc::ptr_eq(a, b),
            (Self::Message(a), Self::Message(b)) => a == b,
            (Self::Data(a), Self::Data(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Reason {
    fn from(message: &str) -> Self {
        Self::Message(message.to_owned())
    }
}

impl From<String> for Reason {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<serde_json::Value> for Reason {
    fn from(data: serde_json::Value) -> Self {
        Self::Data(data)
    }
}

/// A failure guaranteed to expose a human-readable message
///
/// Produced from a [`Reason`] for the ERROR action's payload:
///
/// - an error-shaped reason is used as-is (its message, its source chain)
/// - a string reason becomes the message and is kept as `data`
/// - any other reason gets [`REJECTED_WITH_DATA`] as message and is kept as `data`
#[derive(Debug, Clone)]
pub struct NormalizedFailure {
    message: String,
    data: Option<Reason>,
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl NormalizedFailure {
    /// Normalize a failure reason
    #[must_use]
    pub fn from_reason(reason: &Reason) -> Self {
        match reason {
            Reason::Error(error) => Self {
                message: error.to_string(),
                data: None,
                source: Some(Arc::clone(error)),
            },
            Reason::Message(message) => Self {
                message: message.clone(),
                data: Some(reason.clone()),
                source: None,
            },
            Reason::Data(_) => Self {
                message: REJECTED_WITH_DATA.to_owned(),
                data: Some(reason.clone()),
                source: None,
            },
        }
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The raw reason, when it was not error-shaped
    #[must_use]
    pub const fn data(&self) -> Option<&Reason> {
        self.data.as_ref()
    }
}

impl fmt::Display for NormalizedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for NormalizedFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_deref()
            .map(|error| error as &(dyn Error + 'static))
    }
}

/// Continuation bookkeeping shared by every clone of an operation
struct Continuations {
    attached: AtomicUsize,
    notifier: watch::Sender<()>,
}

/// Keeps a continuation counted as running until dropped
///
/// Returned by [`PendingOperation::attach_continuation`]. Dropping it (on
/// completion or on panic) releases any `settled()` waiters.
pub struct ContinuationGuard(Arc<Continuations>);

impl Drop for ContinuationGuard {
    fn drop(&mut self) {
        if self.0.attached.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.notifier.send_replace(());
        }
    }
}

impl fmt::Debug for ContinuationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuationGuard").finish_non_exhaustive()
    }
}

/// An asynchronous computation attached to an action
///
/// # Example
///
/// ```
/// use async_taxi_core::operation::{PendingOperation, Reason};
///
/// # tokio_test::block_on(async {
/// let op = PendingOperation::new(async { Ok::<_, Reason>(42) });
/// let other = op.clone();
///
/// assert_eq!(op.outcome().await, Ok(42));
/// assert_eq!(other.outcome().await, Ok(42));
/// # });
/// ```
pub struct PendingOperation<T> {
    outcome: Shared<BoxFuture<'static, Outcome<T>>>,
    continuations: Arc<Continuations>,
}

impl<T> PendingOperation<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a future
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        let (notifier, _) = watch::channel(());
        Self {
            outcome: future.boxed().shared(),
            continuations: Arc::new(Continuations {
                attached: AtomicUsize::new(0),
                notifier,
            }),
        }
    }

    /// An operation that has already resolved
    #[must_use]
    pub fn resolved(value: T) -> Self {
        Self::new(futures::future::ready(Ok(value)))
    }

    /// An operation that has already failed
    #[must_use]
    pub fn rejected(reason: impl Into<Reason>) -> Self {
        Self::new(futures::future::ready(Err(reason.into())))
    }

    /// Wait for the computation only
    pub fn outcome(&self) -> impl Future<Output = Outcome<T>> + Send + 'static {
        self.outcome.clone()
    }

    /// Wait for the computation and every attached continuation
    ///
    /// Never resolves if the computation never settles; callers that need a
    /// deadline race this against a timer.
    pub async fn settled(&self) -> Outcome<T> {
        let outcome = self.outcome.clone().await;

        // Subscribe before checking so a release between the check and the
        // wait is still observed.
        let mut released = self.continuations.notifier.subscribe();
        while self.continuations.attached.load(Ordering::SeqCst) > 0 {
            if released.changed().await.is_err() {
                break;
            }
        }

        outcome
    }

    /// The outcome, if some consumer has already driven it to completion
    #[must_use]
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.outcome.peek().cloned()
    }
}

impl<T> PendingOperation<T> {
    /// Count a continuation as running until the returned guard is dropped
    #[must_use]
    pub fn attach_continuation(&self) -> ContinuationGuard {
        self.continuations.attached.fetch_add(1, Ordering::SeqCst);
        ContinuationGuard(Arc::clone(&self.continuations))
    }

    /// Number of continuations currently running
    #[must_use]
    pub fn attached_continuations(&self) -> usize {
        self.continuations.attached.load(Ordering::SeqCst)
    }

    /// Whether two handles refer to the same computation
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.continuations, &other.continuations)
    }
}

impl<T> Clone for PendingOperation<T> {
    fn clone(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
            continuations: Arc::clone(&self.continuations),
        }
    }
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("attached_continuations", &self.attached_continuations())
            .finish_non_exhaustive()
    }
}

/// Asynchronous handle returned to the caller of a pending dispatch
///
/// Resolves with the settled value, or fails with the operation's original,
/// un-normalized reason.
pub struct OperationHandle<T> {
    inner: BoxFuture<'static, Outcome<T>>,
}

impl<T> OperationHandle<T> {
    /// Wrap a future
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Outcome<T>> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle").finish_non_exhaustive()
    }
}
