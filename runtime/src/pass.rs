//! Server rendering pass
//!
//! A [`RenderPass`] owns the registry for one server-side render. The driver:
//!
//! 1. builds the pass, registering the async kinds the view tree needs
//! 2. builds the server chain and constructs the view tree, which dispatches
//! 3. calls [`RenderPass::settle`] (or a timed variant) before producing output
//!
//! Settling ignores individual failures; each one has already been reported
//! down the chain as an ERROR action.

use crate::chain::DispatchChain;
use crate::error::PassError;
use crate::ids::{DEFAULT_ID_LENGTH, RandomIdGenerator};
use crate::registry::{ActionRegistry, AsyncKinds};
use async_taxi_core::action::ActionKind;
use async_taxi_core::dispatch::Dispatch;
use async_taxi_core::environment::IdGenerator;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for a rendering pass
///
/// # Example
///
/// ```
/// use async_taxi_runtime::pass::PassConfig;
/// use std::time::Duration;
///
/// let config = PassConfig::default()
///     .with_settle_timeout(Duration::from_secs(2))
///     .with_id_length(8);
/// assert_eq!(config.id_length, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassConfig {
    /// Deadline for [`RenderPass::settle_with_config`]
    pub settle_timeout: Duration,
    /// Length of generated correlation ids
    pub id_length: usize,
}

impl PassConfig {
    /// Create a configuration with custom values
    #[must_use]
    pub const fn new(settle_timeout: Duration, id_length: usize) -> Self {
        Self {
            settle_timeout,
            id_length,
        }
    }

    /// Set the settle deadline
    #[must_use]
    pub const fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Set the correlation-id length
    #[must_use]
    pub const fn with_id_length(mut self, length: usize) -> Self {
        self.id_length = length;
        self
    }
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            settle_timeout: Duration::from_secs(30),
            id_length: DEFAULT_ID_LENGTH,
        }
    }
}

/// How the collected operations settled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleReport {
    /// Operations that resolved
    pub fulfilled: usize,
    /// Operations that failed
    pub rejected: usize,
}

impl SettleReport {
    /// Total operations awaited
    #[must_use]
    pub const fn total(&self) -> usize {
        self.fulfilled + self.rejected
    }
}

/// One server-side rendering pass
pub struct RenderPass<T> {
    registry: Arc<ActionRegistry<T>>,
    ids: Arc<dyn IdGenerator>,
    config: PassConfig,
}

impl<T> RenderPass<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Pass with default configuration and nothing registered
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start composing a pass
    #[must_use]
    pub fn builder() -> RenderPassBuilder<T> {
        RenderPassBuilder::new()
    }

    /// The pass registry
    #[must_use]
    pub const fn registry(&self) -> &Arc<ActionRegistry<T>> {
        &self.registry
    }

    /// The pass configuration
    #[must_use]
    pub const fn config(&self) -> &PassConfig {
        &self.config
    }

    /// Gate → sequencer → `sink`, sharing this pass's registry
    #[must_use]
    pub fn server_chain<D>(&self, sink: D) -> DispatchChain<T>
    where
        D: Dispatch<T> + 'static,
    {
        DispatchChain::server(Arc::clone(&self.registry), Arc::clone(&self.ids), sink)
    }

    /// Wait for every collected operation to settle
    ///
    /// Operations collected while settling (for example by a consumer that
    /// dispatches more async work when it sees a DONE action) are awaited too.
    /// Never returns if some operation never settles; see
    /// [`settle_with_timeout`](Self::settle_with_timeout).
    #[tracing::instrument(skip(self), name = "render_pass_settle")]
    pub async fn settle(&self) -> SettleReport {
        let started = Instant::now();
        let mut report = SettleReport::default();
        let mut seen = 0;

        loop {
            let batch = self.registry.operations_since(seen);
            if batch.is_empty() {
                break;
            }
            seen += batch.len();
            tracing::debug!(operations = batch.len(), "Awaiting collected operations");

            let outcomes = futures::future::join_all(batch.iter().map(|operation| operation.settled())).await;
            for outcome in outcomes {
                match outcome {
                    Ok(_) => report.fulfilled += 1,
                    Err(reason) => {
                        tracing::debug!(%reason, "Collected operation failed");
                        report.rejected += 1;
                    },
                }
            }
        }

        metrics::histogram!("taxi.pass.settle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            fulfilled = report.fulfilled,
            rejected = report.rejected,
            elapsed_ms = started.elapsed().as_millis(),
            "Render pass settled"
        );
        report
    }

    /// [`settle`](Self::settle) with a deadline
    ///
    /// # Errors
    ///
    /// Returns [`PassError::SettleTimeout`] if the deadline passes first. The
    /// operations themselves are not cancelled.
    pub async fn settle_with_timeout(&self, timeout: Duration) -> Result<SettleReport, PassError> {
        if let Ok(report) = tokio::time::timeout(timeout, self.settle()).await {
            Ok(report)
        } else {
            let pending = self.pending_operations();
            tracing::error!(pending, ?timeout, "Render pass did not settle in time");
            Err(PassError::SettleTimeout { pending, timeout })
        }
    }

    /// [`settle_with_timeout`](Self::settle_with_timeout) using the configured deadline
    ///
    /// # Errors
    ///
    /// Returns [`PassError::SettleTimeout`] if the configured deadline passes first.
    pub async fn settle_with_config(&self) -> Result<SettleReport, PassError> {
        self.settle_with_timeout(self.config.settle_timeout).await
    }

    /// Collected operations that have not produced an outcome yet
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.registry
            .all_operations()
            .iter()
            .filter(|operation| operation.peek().is_none())
            .count()
    }
}

impl<T> Default for RenderPass<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RenderPass<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPass")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Registers async kinds before the pass is used
///
/// # Example
///
/// ```
/// use async_taxi_runtime::pass::RenderPass;
///
/// let pass: RenderPass<String> = RenderPass::builder()
///     .register("FETCH_USER")
///     .register("FETCH_POSTS")
///     .build();
///
/// assert!(pass.registry().is_registered("FETCH_POSTS"));
/// ```
pub struct RenderPassBuilder<T> {
    registry: ActionRegistry<T>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: PassConfig,
}

impl<T> RenderPassBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            registry: ActionRegistry::new(),
            ids: None,
            config: PassConfig::default(),
        }
    }

    /// Register one kind
    #[must_use]
    pub fn register(self, kind: impl Into<ActionKind>) -> Self {
        self.registry.register(kind);
        self
    }

    /// Register several kinds
    #[must_use]
    pub fn register_all<I, K>(self, kinds: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ActionKind>,
    {
        self.registry.register_all(kinds);
        self
    }

    /// Register the kinds a type declares
    #[must_use]
    pub fn declare<C: AsyncKinds>(self) -> Self {
        self.registry.declare::<C>();
        self
    }

    /// Use a specific id generator instead of random ids
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Use a custom configuration
    #[must_use]
    pub fn with_config(mut self, config: PassConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish composing
    #[must_use]
    pub fn build(self) -> RenderPass<T> {
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(RandomIdGenerator::with_length(self.config.id_length)));
        RenderPass {
            registry: Arc::new(self.registry),
            ids,
            config: self.config,
        }
    }
}

impl<T> fmt::Debug for RenderPassBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPassBuilder")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
