//! Dispatch-chain composition
//!
//! [`DispatchChain`] folds a list of middleware around a terminal consumer.
//! The first middleware added is the outermost stage and sees each action
//! first.
//!
//! Two presets cover the usual environments:
//!
//! - [`DispatchChain::server`]: gate → sequencer → sink
//! - [`DispatchChain::client`]: sequencer → sink

use crate::gate::GateMiddleware;
use crate::registry::ActionRegistry;
use crate::sequencer::SequencerMiddleware;
use async_taxi_core::action::Action;
use async_taxi_core::dispatch::{Dispatch, Dispatched, Middleware, Next};
use async_taxi_core::environment::IdGenerator;
use async_taxi_core::error::DispatchError;
use async_taxi_core::reducer::Reducer;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

/// An assembled dispatch chain
pub struct DispatchChain<T> {
    head: Next<T>,
}

impl<T> DispatchChain<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start assembling a chain
    #[must_use]
    pub fn builder() -> DispatchChainBuilder<T> {
        DispatchChainBuilder::new()
    }

    /// Server-side chain: gate, then sequencer, then `sink`
    #[must_use]
    pub fn server<D>(registry: Arc<ActionRegistry<T>>, ids: Arc<dyn IdGenerator>, sink: D) -> Self
    where
        D: Dispatch<T> + 'static,
    {
        Self::builder()
            .with(GateMiddleware::new(registry))
            .with(SequencerMiddleware::with_id_generator(ids))
            .build(sink)
    }

    /// Client-side chain: sequencer, then `sink`. No registration is enforced.
    #[must_use]
    pub fn client<D>(ids: Arc<dyn IdGenerator>, sink: D) -> Self
    where
        D: Dispatch<T> + 'static,
    {
        Self::builder()
            .with(SequencerMiddleware::with_id_generator(ids))
            .build(sink)
    }
}

impl<T> DispatchChain<T> {
    /// Dispatch an action through every stage
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`] raised by any stage.
    pub fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
        self.head.dispatch(action)
    }

    /// The outermost stage, for handing the chain to other components
    #[must_use]
    pub fn head(&self) -> Next<T> {
        Arc::clone(&self.head)
    }
}

impl<T> Dispatch<T> for DispatchChain<T> {
    fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
        self.head.dispatch(action)
    }
}

impl<T> Clone for DispatchChain<T> {
    fn clone(&self) -> Self {
        Self {
            head: Arc::clone(&self.head),
        }
    }
}

impl<T> fmt::Debug for DispatchChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchChain").finish_non_exhaustive()
    }
}

/// Collects middleware, outermost first
pub struct DispatchChainBuilder<T> {
    middleware: Vec<Box<dyn Middleware<T>>>,
}

impl<T> DispatchChainBuilder<T>
where
    T: 'static,
{
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Append a stage; it wraps every stage added after it
    #[must_use]
    pub fn with<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<T> + 'static,
    {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Terminate the chain with `sink`
    #[must_use]
    pub fn build<D>(self, sink: D) -> DispatchChain<T>
    where
        D: Dispatch<T> + 'static,
    {
        self.build_shared(Arc::new(sink))
    }

    /// Terminate the chain with an already shared stage
    #[must_use]
    pub fn build_shared(self, sink: Next<T>) -> DispatchChain<T> {
        let head = self
            .middleware
            .iter()
            .rev()
            .fold(sink, |next, middleware| middleware.wrap(next));
        DispatchChain { head }
    }
}

impl<T: 'static> Default for DispatchChainBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for DispatchChainBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchChainBuilder")
            .field("stages", &self.middleware.len())
            .finish()
    }
}

/// Terminal stage that folds actions into state with a [`Reducer`]
///
/// Cloning shares the state, so keep a clone to read it after handing the
/// sink to a chain.
///
/// # Example
///
/// ```
/// use async_taxi_core::action::Action;
/// use async_taxi_core::dispatch::Dispatch;
/// use async_taxi_core::reducer::Reducer;
/// use async_taxi_runtime::chain::ReducerSink;
///
/// struct Log;
///
/// impl Reducer<u8> for Log {
///     type State = Vec<String>;
///
///     fn reduce(&self, state: &mut Vec<String>, action: Action<u8>) {
///         state.push(action.kind.to_string());
///     }
/// }
///
/// let sink: ReducerSink<Log, u8> = ReducerSink::new(Log, Vec::new());
/// sink.dispatch(Action::new("PING")).unwrap();
/// assert_eq!(sink.state(|log| log.clone()), vec!["PING".to_string()]);
/// ```
pub struct ReducerSink<R, T>
where
    R: Reducer<T>,
{
    reducer: Arc<R>,
    state: Arc<Mutex<R::State>>,
    _action: PhantomData<fn(T)>,
}

impl<R, T> ReducerSink<R, T>
where
    R: Reducer<T>,
{
    /// Create a sink with initial state
    #[must_use]
    pub fn new(reducer: R, initial_state: R::State) -> Self {
        Self {
            reducer: Arc::new(reducer),
            state: Arc::new(Mutex::new(initial_state)),
            _action: PhantomData,
        }
    }

    /// Read the current state
    pub fn state<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&R::State) -> U,
    {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

impl<R, T> Clone for ReducerSink<R, T>
where
    R: Reducer<T>,
{
    fn clone(&self) -> Self {
        Self {
            reducer: Arc::clone(&self.reducer),
            state: Arc::clone(&self.state),
            _action: PhantomData,
        }
    }
}

impl<R, T> Dispatch<T> for ReducerSink<R, T>
where
    R: Reducer<T> + Send + Sync,
    R::State: Send,
{
    fn dispatch(&self, action: Action<T>) -> Result<Dispatched<T>, DispatchError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.reducer.reduce(&mut state, action);
        Ok(Dispatched::Accepted)
    }
}

impl<R, T> fmt::Debug for ReducerSink<R, T>
where
    R: Reducer<T>,
    R::State: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("ReducerSink").field("state", &*state).finish()
    }
}
