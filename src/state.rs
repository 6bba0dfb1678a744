//! Operation lifecycle states and the pure transition function.
//!
//! The lifecycle is monotonic: `Ready -> Executing -> Finished`, or
//! `Ready -> Finished` when an operation is cancelled before it starts.
//! `Finished` is terminal. All state changes go through [`transition`], which
//! rejects anything outside that table instead of relying on callers to keep
//! the ordering straight.

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Created and registered, not yet started.
    Ready,
    /// Work function invoked; a transport call may be outstanding.
    Executing,
    /// Terminal. The result has been set exactly once.
    Finished,
}

/// Lifecycle events that drive transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateEvent {
    /// The execution pool picked the operation up.
    Start,
    /// Cancellation observed before the operation started.
    Cancel,
    /// The work function set a terminal result.
    Resolve,
}

/// A transition that is not in the lifecycle table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidTransition {
    pub(crate) from: State,
    pub(crate) event: StateEvent,
}

/// Apply a lifecycle event to a state.
///
/// Setting a result ([`StateEvent::Resolve`]) is the only way to reach
/// `Finished` from `Executing`; [`StateEvent::Cancel`] only finishes an
/// operation that never started. Everything else is rejected.
pub(crate) const fn transition(state: State, event: StateEvent) -> Result<State, InvalidTransition> {
    match (state, event) {
        (State::Ready, StateEvent::Start) => Ok(State::Executing),
        (State::Ready, StateEvent::Cancel) => Ok(State::Finished),
        (State::Executing, StateEvent::Resolve) => Ok(State::Finished),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}
