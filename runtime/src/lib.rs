//! # Async Taxi Runtime
//!
//! Middleware stages and the rendering-pass driver for coordinating async
//! actions.
//!
//! ## Core Components
//!
//! - **ActionRegistry**: which async kinds the server may wait for, and which
//!   operations are in flight
//! - **GateMiddleware**: refuses unregistered async actions and collects the
//!   operations of registered ones
//! - **SequencerMiddleware**: turns one async action into a START action plus a
//!   DONE or ERROR action sharing a correlation id
//! - **RenderPass**: owns a registry for one server render and awaits every
//!   collected operation before output is produced
//!
//! ## Example
//!
//! ```
//! use async_taxi_core::action::Action;
//! use async_taxi_core::dispatch::Dispatched;
//! use async_taxi_core::error::DispatchError;
//! use async_taxi_core::operation::PendingOperation;
//! use async_taxi_runtime::RenderPass;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pass: RenderPass<String> = RenderPass::builder().register("FETCH_USER").build();
//! let sink = |action: Action<String>| -> Result<Dispatched<String>, DispatchError> {
//!     println!("{} {:?}", action.kind, action.sequence);
//!     Ok(Dispatched::Accepted)
//! };
//! let chain = pass.server_chain(sink);
//!
//! chain
//!     .dispatch(Action::pending(
//!         "FETCH_USER",
//!         PendingOperation::resolved("ada".to_string()),
//!     ))
//!     .unwrap();
//!
//! let report = pass.settle().await;
//! assert_eq!(report.fulfilled, 1);
//! # }
//! ```

/// Registered kinds and collected operations
pub mod registry;

/// The registration gate
pub mod gate;

/// The START / DONE / ERROR sequencer
pub mod sequencer;

/// Correlation-id generation
pub mod ids;

/// Chain composition and terminal consumers
pub mod chain;

/// The server rendering pass
pub mod pass;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the rendering pass
pub mod error {
    use std::time::Duration;
    use thiserror::Error;

    /// Errors that can occur while driving a render pass
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum PassError {
        /// Collected operations did not all settle before the deadline
        ///
        /// The operations keep running; only the wait was abandoned.
        #[error("Render pass did not settle within {timeout:?}: {pending} operation(s) still pending")]
        SettleTimeout {
            /// Operations without an outcome when the deadline passed
            pending: usize,
            /// The deadline that was exceeded
            timeout: Duration,
        },
    }
}

pub use chain::{DispatchChain, DispatchChainBuilder, ReducerSink};
pub use error::PassError;
pub use gate::GateMiddleware;
pub use ids::{DEFAULT_ID_LENGTH, RandomIdGenerator};
pub use pass::{PassConfig, RenderPass, RenderPassBuilder, SettleReport};
pub use registry::{ActionRegistry, AsyncKinds};
pub use sequencer::SequencerMiddleware;
