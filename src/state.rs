//! Alarm state values and per-message classification results.

use std::fmt;

/// Arm/disarm mode reported by the alarm system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AlarmState {
    /// Nothing recognized yet.
    #[default]
    Unknown,
    /// Disarmed.
    Off,
    /// Fully armed, nobody home.
    ArmedAway,
    /// Partially armed, someone home.
    ArmedHome,
}

impl AlarmState {
    /// Level code mirrored on the automation dimmer.
    ///
    /// `Unknown` has no level and is never published.
    #[must_use]
    pub fn level(self) -> Option<u8> {
        match self {
            AlarmState::Unknown => None,
            AlarmState::Off => Some(0),
            AlarmState::ArmedAway => Some(10),
            AlarmState::ArmedHome => Some(20),
        }
    }

    /// Canonical label sent to the automation endpoint.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            AlarmState::Unknown => "UNKNOWN",
            AlarmState::Off => "OFF",
            AlarmState::ArmedAway => "ARMED_AWAY",
            AlarmState::ArmedHome => "ARMED_HOME",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Actor reported when the body names nobody.
pub const UNKNOWN_ACTOR: &str = "unknown";

/// Outcome of classifying one notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The state the subject maps to, `Unknown` when unrecognized.
    pub state: AlarmState,
    /// Who triggered the change, if the body says.
    pub actor: Option<String>,
    /// Whether the subject matched a known notification.
    pub recognized: bool,
}

impl Classification {
    /// A recognized classification.
    #[must_use]
    pub fn recognized(state: AlarmState, actor: Option<String>) -> Self {
        Self {
            state,
            actor,
            recognized: true,
        }
    }

    /// An unrecognized classification.
    #[must_use]
    pub fn unrecognized(actor: Option<String>) -> Self {
        Self {
            state: AlarmState::Unknown,
            actor,
            recognized: false,
        }
    }

    /// The actor, or `"unknown"` when none was found.
    #[must_use]
    pub fn actor_or_unknown(&self) -> &str {
        self.actor.as_deref().unwrap_or(UNKNOWN_ACTOR)
    }
}
