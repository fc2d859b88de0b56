//! Action types
//!
//! An [`Action`] is a tagged record: a [`ActionKind`] plus a body that is
//! either a plain payload or a pending operation. The kind alone does not say
//! which; the body does.
//!
//! The sequencer derives START/DONE/ERROR actions from a pending action. Those
//! derived actions carry a [`SequenceDescriptor`] linking them by
//! [`CorrelationId`].

use crate::operation::{NormalizedFailure, PendingOperation};
use serde::{Deserialize, Serialize};
use std::borrow::{Borrow, Cow};
use std::fmt;

/// String identifier of an action
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionKind(Cow<'static, str>);

impl ActionKind {
    /// Create a kind from a static string without allocating
    #[must_use]
    pub const fn from_static(kind: &'static str) -> Self {
        Self(Cow::Borrowed(kind))
    }

    /// Borrow the kind as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ActionKind {
    fn from(kind: &'static str) -> Self {
        Self::from_static(kind)
    }
}

impl From<String> for ActionKind {
    fn from(kind: String) -> Self {
        Self(Cow::Owned(kind))
    }
}

impl Borrow<str> for ActionKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ActionKind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ActionKind {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ActionKind {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token linking a START action to its DONE/ERROR action
///
/// Uniqueness only has to hold within one rendering pass.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap a token
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the token
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phase of a sequenced action
///
/// There is deliberately no failure phase. An ERROR action carries a
/// descriptor with no phase and sets [`Action::error`] instead; consumers
/// discriminate failures on that flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// The operation has begun
    Start,
    /// The operation resolved
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => f.write_str("START"),
            Self::Done => f.write_str("DONE"),
        }
    }
}

/// Sequence metadata attached to actions derived by the sequencer
///
/// Serializes as `{"id": "...", "type": "START"}`; the `type` key is omitted
/// for failures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceDescriptor {
    /// Correlation id shared by every action derived from one dispatch
    pub id: CorrelationId,
    /// `None` on the failure action
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

impl SequenceDescriptor {
    /// Descriptor for the START action
    #[must_use]
    pub const fn start(id: CorrelationId) -> Self {
        Self {
            id,
            phase: Some(Phase::Start),
        }
    }

    /// Descriptor for the DONE action
    #[must_use]
    pub const fn done(id: CorrelationId) -> Self {
        Self {
            id,
            phase: Some(Phase::Done),
        }
    }

    /// Descriptor for the ERROR action (no phase tag)
    #[must_use]
    pub const fn failure(id: CorrelationId) -> Self {
        Self { id, phase: None }
    }

    /// Whether this is a START descriptor
    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(self.phase, Some(Phase::Start))
    }

    /// Whether this is a DONE descriptor
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.phase, Some(Phase::Done))
    }
}

/// What an action carries besides its kind
#[derive(Debug, Clone)]
pub enum ActionBody<T> {
    /// Nothing (e.g. a START action)
    Empty,
    /// A plain, synchronous value
    Payload(T),
    /// A normalized failure (only produced on ERROR actions)
    Failure(NormalizedFailure),
    /// An asynchronous computation not yet settled at dispatch time
    Pending(PendingOperation<T>),
}

/// A dispatched unit of intent
///
/// `meta` holds any extra fields the caller attached; they are copied verbatim
/// onto every action the sequencer derives.
#[derive(Debug, Clone)]
pub struct Action<T> {
    /// Action identifier
    pub kind: ActionKind,
    /// Payload, failure, pending operation, or nothing
    pub body: ActionBody<T>,
    /// Caller-supplied extra fields
    pub meta: Option<serde_json::Value>,
    /// Present on actions produced by the sequencer
    pub sequence: Option<SequenceDescriptor>,
    /// Set on ERROR actions
    pub error: bool,
}

impl<T> Action<T> {
    /// An action with no body
    #[must_use]
    pub fn new(kind: impl Into<ActionKind>) -> Self {
        Self {
            kind: kind.into(),
            body: ActionBody::Empty,
            meta: None,
            sequence: None,
            error: false,
        }
    }

    /// A synchronous action carrying a payload
    #[must_use]
    pub fn with_payload(kind: impl Into<ActionKind>, payload: T) -> Self {
        Self {
            body: ActionBody::Payload(payload),
            ..Self::new(kind)
        }
    }

    /// An asynchronous action carrying a pending operation
    #[must_use]
    pub fn pending(kind: impl Into<ActionKind>, operation: PendingOperation<T>) -> Self {
        Self {
            body: ActionBody::Pending(operation),
            ..Self::new(kind)
        }
    }

    /// Attach extra fields
    #[must_use]
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The payload, if this action carries one
    #[must_use]
    pub const fn payload(&self) -> Option<&T> {
        match &self.body {
            ActionBody::Payload(payload) => Some(payload),
            _ => None,
        }
    }

    /// The normalized failure, if this is an ERROR action
    #[must_use]
    pub const fn failure(&self) -> Option<&NormalizedFailure> {
        match &self.body {
            ActionBody::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    /// The pending operation, if this action carries one
    #[must_use]
    pub const fn pending_operation(&self) -> Option<&PendingOperation<T>> {
        match &self.body {
            ActionBody::Pending(operation) => Some(operation),
            _ => None,
        }
    }

    /// Whether this action carries a pending operation
    #[must_use]
    pub const fn has_pending_operation(&self) -> bool {
        matches!(self.body, ActionBody::Pending(_))
    }

    /// Separate the pending operation from the rest of the action
    ///
    /// On success the returned action has an empty body and keeps every other
    /// field. Actions without a pending operation are handed back unchanged.
    ///
    /// # Errors
    ///
    /// Returns the original action when it carries no pending operation.
    pub fn split_pending(self) -> Result<(PendingOperation<T>, Self), Self> {
        match self.body {
            ActionBody::Pending(operation) => Ok((
                operation,
                Self {
                    body: ActionBody::Empty,
                    ..self
                },
            )),
            body => Err(Self { body, ..self }),
        }
    }

    /// Derive a sibling action sharing kind and meta
    #[must_use]
    pub fn derive(&self, body: ActionBody<T>, sequence: SequenceDescriptor, error: bool) -> Self {
        Self {
            kind: self.kind.clone(),
            body,
            meta: self.meta.clone(),
            sequence: Some(sequence),
            error,
        }
    }
}
