//! # Profile Page Example
//!
//! A profile page that loads a user and their posts, rendered once on the
//! server and then driven again on the client.
//!
//! This example showcases:
//! - Declaring the async kinds a view dispatches ([`AsyncKinds`])
//! - A server render pass that waits for every fetch before rendering
//! - A client chain that fires the same actions without registration
//! - A reducer that tracks loading state from START / DONE / ERROR actions
//!
//! ## Example
//!
//! ```
//! use async_taxi_runtime::{ReducerSink, RenderPass};
//! use render_pass::{PageReducer, PageState, ProfilePage, render};
//!
//! # tokio_test::block_on(async {
//! let pass = RenderPass::builder().declare::<ProfilePage>().build();
//! let sink = ReducerSink::new(PageReducer, PageState::default());
//! let chain = pass.server_chain(sink.clone());
//!
//! ProfilePage::new(7).construct(&chain).unwrap();
//! pass.settle().await;
//!
//! let html = sink.state(render);
//! assert!(html.contains("user-7"));
//! # });
//! ```

use async_taxi_core::action::{Action, ActionBody, ActionKind, CorrelationId};
use async_taxi_core::dispatch::Dispatch;
use async_taxi_core::error::DispatchError;
use async_taxi_core::operation::{PendingOperation, Reason};
use async_taxi_core::reducer::Reducer;
use async_taxi_runtime::AsyncKinds;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;

/// Loads the profile's user record
pub const FETCH_USER: ActionKind = ActionKind::from_static("FETCH_USER");

/// Loads the profile's posts
pub const FETCH_POSTS: ActionKind = ActionKind::from_static("FETCH_POSTS");

/// Selects which tab is shown; synchronous
pub const SELECT_TAB: ActionKind = ActionKind::from_static("SELECT_TAB");

/// User ids at or above this value do not exist
pub const MISSING_USER_THRESHOLD: u32 = 1_000;

/// A user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id
    pub id: u32,
    /// Display name
    pub name: String,
}

/// Payloads carried through the page's dispatch chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageData {
    /// A loaded user
    User(User),
    /// Loaded post titles
    Posts(Vec<String>),
    /// The selected tab
    Tab(String),
}

/// Page state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageState {
    /// Correlation ids of fetches still in flight
    pub loading: BTreeSet<CorrelationId>,
    /// The loaded user
    pub user: Option<User>,
    /// The loaded posts
    pub posts: Vec<String>,
    /// The selected tab
    pub tab: Option<String>,
    /// Failure messages, in arrival order
    pub errors: Vec<String>,
}

impl PageState {
    /// Whether any fetch is still in flight
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.loading.is_empty()
    }
}

/// Folds page actions into [`PageState`]
#[derive(Debug, Clone, Copy, Default)]
pub struct PageReducer;

impl Reducer<PageData> for PageReducer {
    type State = PageState;

    fn reduce(&self, state: &mut PageState, action: Action<PageData>) {
        if let Some(sequence) = &action.sequence {
            if sequence.is_start() {
                state.loading.insert(sequence.id.clone());
                return;
            }
            state.loading.remove(&sequence.id);
        }

        match action.body {
            ActionBody::Payload(PageData::User(user)) => state.user = Some(user),
            ActionBody::Payload(PageData::Posts(posts)) => state.posts = posts,
            ActionBody::Payload(PageData::Tab(tab)) => state.tab = Some(tab),
            ActionBody::Failure(failure) => {
                tracing::warn!(kind = %action.kind, error = %failure, "Page fetch failed");
                state.errors.push(failure.message().to_string());
            },
            ActionBody::Empty | ActionBody::Pending(_) => {},
        }
    }
}

/// The profile view
#[derive(Debug, Clone, Copy)]
pub struct ProfilePage {
    user_id: u32,
    latency: Duration,
}

impl AsyncKinds for ProfilePage {
    fn async_kinds() -> Vec<ActionKind> {
        vec![FETCH_USER, FETCH_POSTS]
    }
}

impl ProfilePage {
    /// Profile of `user_id` with a small simulated fetch latency
    #[must_use]
    pub const fn new(user_id: u32) -> Self {
        Self {
            user_id,
            latency: Duration::from_millis(10),
        }
    }

    /// Override the simulated fetch latency
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Dispatch everything the view needs while it is being constructed
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`] from the chain, for example when a
    /// server chain was built without registering this view's kinds.
    pub fn construct<D>(&self, chain: &D) -> Result<(), DispatchError>
    where
        D: Dispatch<PageData> + ?Sized,
    {
        let meta = json!({ "userId": self.user_id });

        chain.dispatch(Action::with_payload(SELECT_TAB, PageData::Tab("posts".to_string())))?;
        chain.dispatch(
            Action::pending(FETCH_USER, fetch_user(self.user_id, self.latency)).with_meta(meta.clone()),
        )?;
        chain.dispatch(
            Action::pending(FETCH_POSTS, fetch_posts(self.user_id, self.latency)).with_meta(meta),
        )?;
        Ok(())
    }
}

/// Simulated user lookup
#[must_use]
pub fn fetch_user(user_id: u32, latency: Duration) -> PendingOperation<PageData> {
    PendingOperation::new(async move {
        tokio::time::sleep(latency).await;
        if user_id >= MISSING_USER_THRESHOLD {
            return Err(Reason::data(json!({ "status": 404, "userId": user_id })));
        }
        Ok(PageData::User(User {
            id: user_id,
            name: format!("user-{user_id}"),
        }))
    })
}

/// Simulated post listing
#[must_use]
pub fn fetch_posts(user_id: u32, latency: Duration) -> PendingOperation<PageData> {
    PendingOperation::new(async move {
        tokio::time::sleep(latency * 2).await;
        if user_id >= MISSING_USER_THRESHOLD {
            return Err(Reason::message("posts unavailable"));
        }
        Ok(PageData::Posts(
            (1..=3).map(|n| format!("post {n} by user-{user_id}")).collect(),
        ))
    })
}

/// Render the page as HTML
#[must_use]
pub fn render(state: &PageState) -> String {
    let mut html = String::from("<main>");
    if state.is_loading() {
        html.push_str("<p class=\"loading\">Loading…</p>");
    }
    if let Some(user) = &state.user {
        let _ = write!(html, "<h1>{}</h1>", user.name);
    }
    if !state.posts.is_empty() {
        html.push_str("<ul>");
        for post in &state.posts {
            let _ = write!(html, "<li>{post}</li>");
        }
        html.push_str("</ul>");
    }
    for error in &state.errors {
        let _ = write!(html, "<p class=\"error\">{error}</p>");
    }
    html.push_str("</main>");
    html
}
