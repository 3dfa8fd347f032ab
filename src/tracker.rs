//! Change detection for classified alarm states.
//!
//! The tracker holds the last published state for the lifetime of the process.
//! It is owned by the supervisor and lent to each poll loop run, so it survives
//! reconnects but never a restart.

use crate::state::{AlarmState, Classification};

/// A change from one alarm state to another, ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State held before this transition.
    pub from: AlarmState,
    /// Newly observed state.
    pub to: AlarmState,
    /// Who triggered the change, `"unknown"` when not reported.
    pub actor: String,
    previous_actor: Option<String>,
}

/// Result of feeding a classification to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The state changed and must be published.
    Transition(Transition),
    /// Unrecognized, or the same state as last published.
    NoChange,
}

/// Last published alarm state and actor.
#[derive(Debug, Default)]
pub struct StateTracker {
    state: AlarmState,
    actor: Option<String>,
}

impl StateTracker {
    /// Creates a tracker starting from [`AlarmState::Unknown`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last published state.
    #[must_use]
    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// The actor of the last published state.
    #[must_use]
    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Records `result` and reports whether it is a change worth publishing.
    ///
    /// On a transition the held state is updated before returning.
    pub fn observe(&mut self, result: &Classification) -> Observation {
        if !result.recognized || result.state == AlarmState::Unknown || result.state == self.state {
            return Observation::NoChange;
        }

        let actor = result.actor_or_unknown().to_string();
        let transition = Transition {
            from: self.state,
            to: result.state,
            actor: actor.clone(),
            previous_actor: self.actor.replace(actor),
        };
        self.state = result.state;

        Observation::Transition(transition)
    }

    /// Restores the state held before `transition`, so it is emitted again.
    pub fn revert(&mut self, transition: Transition) {
        if self.state == transition.to {
            self.state = transition.from;
            self.actor = transition.previous_actor;
        }
    }
}
