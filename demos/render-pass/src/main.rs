//! Render pass example binary
//!
//! Renders a profile page on the server, waiting for its fetches, then drives
//! the same page through a client chain.

use async_taxi_core::action::{Action, ActionKind};
use async_taxi_core::operation::PendingOperation;
use async_taxi_runtime::metrics::MetricsRecorder;
use async_taxi_runtime::{DispatchChain, PassConfig, RandomIdGenerator, ReducerSink, RenderPass};
use render_pass::{MISSING_USER_THRESHOLD, PageData, PageReducer, PageState, ProfilePage, render};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "render_pass=debug,async_taxi_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut recorder = MetricsRecorder::new();
    recorder.install()?;

    println!("=== Render Pass Example: Async Action Coordination ===\n");

    // Server: one pass per request
    let pass = RenderPass::builder()
        .declare::<ProfilePage>()
        .with_config(PassConfig::default().with_settle_timeout(Duration::from_secs(5)))
        .build();
    let sink = ReducerSink::new(PageReducer, PageState::default());
    let chain = pass.server_chain(sink.clone());

    println!(">>> Server: constructing ProfilePage(7)");
    ProfilePage::new(7).construct(&chain)?;
    println!("Collected operations: {}", pass.registry().operation_count());
    println!("Before settle: {}", sink.state(render));

    let report = pass.settle_with_config().await?;
    println!(
        "Settled: {} fulfilled, {} rejected",
        report.fulfilled, report.rejected
    );
    println!("Server HTML: {}", sink.state(render));

    // An async kind nobody declared aborts the server dispatch
    println!("\n>>> Server: dispatching an undeclared async action");
    let undeclared = Action::pending(
        ActionKind::from_static("FETCH_FRIENDS"),
        PendingOperation::resolved(PageData::Posts(Vec::new())),
    );
    if let Err(err) = chain.dispatch(undeclared) {
        println!("Refused:\n{err}");
    }

    // Server pass for a missing user: failures settle too
    println!("\n>>> Server: constructing ProfilePage({MISSING_USER_THRESHOLD})");
    let missing_pass = RenderPass::builder().declare::<ProfilePage>().build();
    let missing_sink = ReducerSink::new(PageReducer, PageState::default());
    let missing_chain = missing_pass.server_chain(missing_sink.clone());
    ProfilePage::new(MISSING_USER_THRESHOLD).construct(&missing_chain)?;
    let report = missing_pass.settle().await;
    println!(
        "Settled: {} fulfilled, {} rejected",
        report.fulfilled, report.rejected
    );
    println!("Server HTML: {}", missing_sink.state(render));

    // Client: no registry, no waiting for the whole pass
    println!("\n>>> Client: constructing ProfilePage(8)");
    let client_sink = ReducerSink::new(PageReducer, PageState::default());
    let client = DispatchChain::client(Arc::new(RandomIdGenerator::new()), client_sink.clone());
    let handle = client
        .dispatch(Action::pending(
            ActionKind::from_static("FETCH_FRIENDS"),
            PendingOperation::resolved(PageData::Posts(vec!["friend list".to_string()])),
        ))?
        .into_handle();
    ProfilePage::new(8).construct(&client)?;
    if let Some(handle) = handle {
        let _ = handle.await;
    }
    println!("Client HTML right away: {}", client_sink.state(render));
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("Client HTML later: {}", client_sink.state(render));

    if let Some(metrics) = recorder.render() {
        println!("\n=== Metrics ===\n{metrics}");
    }

    println!("\n=== Demonstration Complete ===");
    println!("\nKey concepts demonstrated:");
    println!("  • Registration: ProfilePage declares FETCH_USER and FETCH_POSTS");
    println!("  • Gate: undeclared async actions abort server dispatches");
    println!("  • Sequencer: START then DONE or ERROR, sharing a correlation id");
    println!("  • Render pass: the server waits for every collected fetch");
    println!("  • Client chain: same actions, no registration required");

    Ok(())
}
