//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use async_taxi_core::action::Action;
use async_taxi_core::reducer::Reducer;

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// Actions are applied in the order given, which lets a test replay the
/// START / DONE pair a sequencer would forward.
///
/// # Example
///
/// ```
/// use async_taxi_core::action::{Action, ActionBody, CorrelationId, SequenceDescriptor};
/// use async_taxi_core::reducer::Reducer;
/// use async_taxi_testing::ReducerTest;
///
/// struct Loading;
///
/// impl Reducer<u32> for Loading {
///     type State = bool;
///
///     fn reduce(&self, state: &mut bool, action: Action<u32>) {
///         *state = action.sequence.is_some_and(|s| s.is_start());
///     }
/// }
///
/// let start: Action<u32> = Action::new("FETCH").derive(
///     ActionBody::Empty,
///     SequenceDescriptor::start(CorrelationId::new("a")),
///     false,
/// );
///
/// ReducerTest::new(Loading)
///     .given_state(false)
///     .when_action(start)
///     .then_state(|loading| assert!(*loading))
///     .run();
/// ```
pub struct ReducerTest<R, T>
where
    R: Reducer<T>,
{
    reducer: R,
    initial_state: Option<R::State>,
    actions: Vec<Action<T>>,
    state_assertions: Vec<StateAssertion<R::State>>,
}

impl<R, T> ReducerTest<R, T>
where
    R: Reducer<T>,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            initial_state: None,
            actions: Vec::new(),
            state_assertions: Vec::new(),
        }
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Add an action to apply (When)
    #[must_use]
    pub fn when_action(mut self, action: Action<T>) -> Self {
        self.actions.push(action);
        self
    }

    /// Add several actions to apply, in order (When)
    #[must_use]
    pub fn when_actions(mut self, actions: impl IntoIterator<Item = Action<T>>) -> Self {
        self.actions.extend(actions);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state or at least one action is not set,
    /// or if any assertions fail.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("Initial state must be set with given_state()");

        assert!(
            !self.actions.is_empty(),
            "At least one action must be set with when_action()"
        );

        for action in self.actions {
            self.reducer.reduce(&mut state, action);
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

/// Helper assertions for forwarded action sequences
pub mod assertions {
    use async_taxi_core::action::{Action, CorrelationId};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Seen {
        start: Option<usize>,
        terminal: Vec<usize>,
    }

    fn by_id<T>(actions: &[Action<T>]) -> HashMap<CorrelationId, Seen> {
        let mut seen: HashMap<CorrelationId, Seen> = HashMap::new();
        for (index, action) in actions.iter().enumerate() {
            if let Some(sequence) = &action.sequence {
                let entry = seen.entry(sequence.id.clone()).or_default();
                if sequence.is_start() {
                    entry.start = Some(index);
                } else {
                    entry.terminal.push(index);
                }
            }
        }
        seen
    }

    /// Assert every correlation id has one START followed by exactly one DONE or ERROR
    ///
    /// # Panics
    ///
    /// Panics if a sequence is missing its START, has no terminal action, has
    /// more than one, or has its terminal action before its START.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_sequences_complete<T>(actions: &[Action<T>]) {
        for (id, seen) in by_id(actions) {
            let Some(start) = seen.start else {
                panic!("Sequence {id} has no START action");
            };
            assert_eq!(
                seen.terminal.len(),
                1,
                "Sequence {id} should have exactly one DONE or ERROR action, found {}",
                seen.terminal.len()
            );
            assert!(
                seen.terminal[0] > start,
                "Sequence {id} terminal action arrived before its START"
            );
        }
    }

    /// Assert the number of distinct correlation ids
    ///
    /// # Panics
    ///
    /// Panics if the number of sequences doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_sequence_count<T>(actions: &[Action<T>], expected: usize) {
        let found = by_id(actions).len();
        assert_eq!(
            found, expected,
            "Expected {expected} sequences, but found {found}"
        );
    }

    /// Assert that no forwarded action is marked as an error
    ///
    /// # Panics
    ///
    /// Panics if any action has `error == true`.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_errors<T>(actions: &[Action<T>]) {
        let failed = actions.iter().filter(|action| action.error).count();
        assert_eq!(failed, 0, "Expected no ERROR actions, but found {failed}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_taxi_core::action::{ActionBody, CorrelationId, SequenceDescriptor};
    use async_taxi_core::operation::{NormalizedFailure, Reason};

    #[derive(Clone, Debug, Default, PartialEq)]
    struct TestState {
        loading: usize,
        total: i32,
        errors: usize,
    }

    struct TestReducer;

    impl Reducer<i32> for TestReducer {
        type State = TestState;

        fn reduce(&self, state: &mut TestState, action: Action<i32>) {
            match (&action.sequence, action.body) {
                (Some(sequence), _) if sequence.is_start() => state.loading += 1,
                (Some(_), ActionBody::Payload(n)) => {
                    state.loading -= 1;
                    state.total += n;
                },
                (Some(_), ActionBody::Failure(_)) => {
                    state.loading -= 1;
                    state.errors += 1;
                },
                (None, ActionBody::Payload(n)) => state.total += n,
                _ => {},
            }
        }
    }

    fn start(id: &str) -> Action<i32> {
        Action::new("LOAD").derive(
            ActionBody::Empty,
            SequenceDescriptor::start(CorrelationId::new(id)),
            false,
        )
    }

    fn done(id: &str, n: i32) -> Action<i32> {
        Action::new("LOAD").derive(
            ActionBody::Payload(n),
            SequenceDescriptor::done(CorrelationId::new(id)),
            false,
        )
    }

    fn failed(id: &str) -> Action<i32> {
        Action::new("LOAD").derive(
            ActionBody::Failure(NormalizedFailure::from_reason(&Reason::message("nope"))),
            SequenceDescriptor::failure(CorrelationId::new(id)),
            true,
        )
    }

    #[test]
    fn test_reducer_test_sequence() {
        ReducerTest::new(TestReducer)
            .given_state(TestState::default())
            .when_actions([start("a"), done("a", 3)])
            .then_state(|state| {
                assert_eq!(state.loading, 0);
                assert_eq!(state.total, 3);
            })
            .run();
    }

    #[test]
    fn test_reducer_test_failure() {
        ReducerTest::new(TestReducer)
            .given_state(TestState { total: 5, ..TestState::default() })
            .when_action(start("a"))
            .when_action(failed("a"))
            .then_state(|state| {
                assert_eq!(state.errors, 1);
                assert_eq!(state.total, 5);
            })
            .run();
    }

    #[test]
    fn test_assertions_complete_sequences() {
        let actions = vec![start("a"), start("b"), failed("b"), done("a", 1)];

        assertions::assert_sequences_complete(&actions);
        assertions::assert_sequence_count(&actions, 2);
    }

    #[test]
    #[should_panic(expected = "exactly one DONE or ERROR")]
    fn test_assertions_open_sequence() {
        assertions::assert_sequences_complete(&[start("a")]);
    }

    #[test]
    fn test_assertions_no_errors() {
        assertions::assert_no_errors(&[start("a"), done("a", 2)]);
    }
}
