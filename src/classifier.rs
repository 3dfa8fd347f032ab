//! Mapping of alarm notification messages to alarm states.
//!
//! The subject decides the state; the body only contributes the actor.
//!
//! ```
//! use alarm_mail_sync::classifier::classify;
//! use alarm_mail_sync::AlarmState;
//!
//! let result = classify(
//!     "Subject: Systeem ingeschakeld\r\n",
//!     "Het systeem Bongerd 36 werd ingeschakeld met een Starkey door R. Doorn.",
//! );
//! assert!(result.recognized);
//! assert_eq!(result.state, AlarmState::ArmedAway);
//! assert_eq!(result.actor.as_deref(), Some("R. Doorn"));
//! ```

use crate::state::{AlarmState, Classification};
use once_cell::sync::Lazy;
use regex::Regex;

/// Header label some servers leave in front of the subject value.
const SUBJECT_LABEL: &str = "Subject: ";

/// "Het systeem <site> werd <action> met een <key> door <actor>."
static ACTOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Het systeem .* door (.*).").expect("valid regex"));

/// Classifies a notification by its subject, reading the actor from the body.
#[must_use]
pub fn classify(subject: &str, body: &str) -> Classification {
    let actor = extract_actor(body);
    match state_from_subject(subject) {
        Some(state) => Classification::recognized(state, actor),
        None => Classification::unrecognized(actor),
    }
}

/// Maps a subject to its alarm state, `None` when the subject is not a known notification.
#[must_use]
pub fn state_from_subject(subject: &str) -> Option<AlarmState> {
    match normalize_subject(subject) {
        "Systeem uitgeschakeld" | "Uitgeschakeld" => Some(AlarmState::Off),
        "Systeem ingeschakeld" => Some(AlarmState::ArmedAway),
        "Gedeeltelijk ingeschakeld" => Some(AlarmState::ArmedHome),
        _ => None,
    }
}

/// Strips the header label and any trailing CR/LF run.
#[must_use]
pub fn normalize_subject(subject: &str) -> &str {
    let subject = subject.trim_end_matches(['\r', '\n']);
    subject.strip_prefix(SUBJECT_LABEL).unwrap_or(subject)
}

/// Finds who changed the alarm state, trailing periods removed.
#[must_use]
pub fn extract_actor(body: &str) -> Option<String> {
    ACTOR_PATTERN
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches('.'))
        .filter(|actor| !actor.is_empty())
        .map(ToString::to_string)
}
