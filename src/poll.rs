//! The polling state machine run on one open mail session.
//!
//! Each cycle idles for the poll interval, checks the session, searches for
//! messages from the alarm sender and scans them newest first. The first
//! recognized message decides the state; older messages are never looked at
//! once a newer one is recognized.
//!
//! A run ends on shutdown, when the session lifetime elapses, or on the first
//! failed mail operation. Only shutdown stops the supervisor from reconnecting.

use crate::classifier;
use crate::config::PollingConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::error::Error;
use crate::mailbox::MailSession;
use crate::state::Classification;
use crate::tracker::{Observation, StateTracker};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a poll loop run ended.
#[derive(Debug)]
pub enum PollExit {
    /// The shutdown signal was observed.
    UserCancelled,
    /// The session lifetime elapsed; the session is recycled.
    SessionExpired,
    /// The health check or the search failed.
    SearchFailed(Error),
    /// Fetching a message failed.
    FetchFailed(Error),
}

impl PollExit {
    /// Whether the supervisor should open a new session after this exit.
    #[must_use]
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, PollExit::UserCancelled)
    }

    /// The mail error that ended the run, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        match self {
            PollExit::SearchFailed(e) | PollExit::FetchFailed(e) => Some(e),
            PollExit::UserCancelled | PollExit::SessionExpired => None,
        }
    }
}

impl fmt::Display for PollExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollExit::UserCancelled => write!(f, "user cancelled"),
            PollExit::SessionExpired => write!(f, "session expired"),
            PollExit::SearchFailed(e) => write!(f, "search failed: {e}"),
            PollExit::FetchFailed(e) => write!(f, "fetch failed: {e}"),
        }
    }
}

/// Polls one session until it has to be closed.
#[derive(Debug, Clone)]
pub struct PollLoop {
    dispatcher: NotificationDispatcher,
    sender: String,
    interval: Duration,
    session_lifetime: Duration,
    cancel: CancellationToken,
}

impl PollLoop {
    /// Creates a loop searching for messages from `sender`.
    #[must_use]
    pub fn new(
        dispatcher: NotificationDispatcher,
        sender: impl Into<String>,
        polling: &PollingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            sender: sender.into(),
            interval: polling.interval,
            session_lifetime: polling.session_lifetime,
            cancel,
        }
    }

    /// Polls `session` until shutdown, lifetime expiry or a mail error.
    ///
    /// Transitions are published through the dispatcher and committed to
    /// `tracker` only when the state label was accepted.
    #[instrument(name = "PollLoop::run", skip_all, fields(sender = %self.sender))]
    pub async fn run<S: MailSession>(
        &self,
        session: &mut S,
        tracker: &mut StateTracker,
    ) -> PollExit {
        let expiry = tokio::time::sleep(self.session_lifetime);
        tokio::pin!(expiry);

        loop {
            let found = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return PollExit::UserCancelled,
                () = &mut expiry => return PollExit::SessionExpired,
                found = self.cycle(session) => found,
            };

            let classification = match found {
                Ok(Some(classification)) => classification,
                Ok(None) => continue,
                Err(exit) => return exit,
            };

            let transition = match tracker.observe(&classification) {
                Observation::Transition(transition) => transition,
                Observation::NoChange => {
                    debug!(state = %tracker.state(), "Alarm state unchanged");
                    continue;
                }
            };

            info!(
                from = %transition.from,
                to = %transition.to,
                actor = %transition.actor,
                "Alarm state changed"
            );

            // A started publication only yields to shutdown.
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                outcome = self.dispatcher.publish(&transition) => Some(outcome),
            };

            match outcome {
                Some(outcome) if outcome.is_committed() => {}
                Some(_) => {
                    warn!(state = %transition.to, "State label not accepted, retrying next cycle");
                    tracker.revert(transition);
                }
                None => {
                    tracker.revert(transition);
                    return PollExit::UserCancelled;
                }
            }
        }
    }

    /// Idle, Searching and Scanning.
    async fn cycle<S: MailSession>(
        &self,
        session: &mut S,
    ) -> Result<Option<Classification>, PollExit> {
        tokio::time::sleep(self.interval).await;

        session
            .health_check()
            .await
            .map_err(PollExit::SearchFailed)?;

        let uids = session
            .search_by_sender(&self.sender)
            .await
            .map_err(PollExit::SearchFailed)?;

        if uids.is_empty() {
            debug!("No messages from sender");
            return Ok(None);
        }

        self.scan(session, &uids).await
    }

    /// Returns the classification of the newest recognized message.
    async fn scan<S: MailSession>(
        &self,
        session: &mut S,
        uids: &[u32],
    ) -> Result<Option<Classification>, PollExit> {
        for &uid in uids.iter().rev() {
            let subject = session
                .fetch_subject(uid)
                .await
                .map_err(PollExit::FetchFailed)?;

            if classifier::state_from_subject(&subject).is_none() {
                debug!(
                    uid,
                    subject = classifier::normalize_subject(&subject),
                    "Unrecognized subject, looking at older messages"
                );
                continue;
            }

            let body = session
                .fetch_body(uid)
                .await
                .map_err(PollExit::FetchFailed)?;

            let classification = classifier::classify(&subject, &body);
            debug!(uid, state = %classification.state, "Newest recognized message");
            return Ok(Some(classification));
        }

        debug!(messages = uids.len(), "No recognized alarm message");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Automation;
    use crate::error::Result;
    use crate::state::AlarmState;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct ScriptedSession {
        uids: Vec<u32>,
        subjects: HashMap<u32, String>,
        fetched: Vec<u32>,
        fail_search: bool,
    }

    #[async_trait]
    impl MailSession for ScriptedSession {
        async fn health_check(&mut self) -> Result<()> {
            Ok(())
        }

        async fn search_by_sender(&mut self, _sender: &str) -> Result<Vec<u32>> {
            if self.fail_search {
                return Err(Error::SearchTimeout {
                    sender: "Verisure".into(),
                    timeout: Duration::from_secs(10),
                });
            }
            Ok(self.uids.clone())
        }

        async fn fetch_subject(&mut self, uid: u32) -> Result<String> {
            self.fetched.push(uid);
            Ok(self.subjects.get(&uid).cloned().unwrap_or_default())
        }

        async fn fetch_body(&mut self, _uid: u32) -> Result<String> {
            Ok(String::new())
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NullAutomation {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Automation for NullAutomation {
        async fn set_variable(&self, name: &str, value: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{name}={value}"));
            Ok(())
        }

        async fn set_level(&self, level: u8) -> Result<()> {
            self.calls.lock().unwrap().push(format!("level={level}"));
            Ok(())
        }
    }

    fn poll_loop(cancel: CancellationToken) -> PollLoop {
        PollLoop::new(
            NotificationDispatcher::new(Arc::new(NullAutomation::default())),
            "Verisure",
            &PollingConfig::default(),
            cancel,
        )
    }

    fn session(subjects: &[(u32, &str)]) -> ScriptedSession {
        ScriptedSession {
            uids: subjects.iter().map(|(uid, _)| *uid).collect(),
            subjects: subjects
                .iter()
                .map(|(uid, s)| (*uid, (*s).to_string()))
                .collect(),
            ..ScriptedSession::default()
        }
    }

    #[tokio::test]
    async fn test_scan_skips_newer_unrecognized() {
        let poll = poll_loop(CancellationToken::new());
        let mut session = session(&[
            (5, "Systeem uitgeschakeld"),
            (6, "Systeem ingeschakeld"),
            (7, "Uw maandoverzicht"),
        ]);

        let found = poll.scan(&mut session, &[5, 6, 7]).await.unwrap().unwrap();

        assert_eq!(found.state, AlarmState::ArmedAway);
        assert_eq!(session.fetched, vec![7, 6]);
    }

    #[tokio::test]
    async fn test_scan_newest_recognized_wins() {
        let poll = poll_loop(CancellationToken::new());
        let mut session = session(&[
            (5, "Systeem uitgeschakeld"),
            (6, "Systeem ingeschakeld"),
            (7, "Gedeeltelijk ingeschakeld"),
        ]);

        let found = poll.scan(&mut session, &[5, 6, 7]).await.unwrap().unwrap();

        assert_eq!(found.state, AlarmState::ArmedHome);
        assert_eq!(session.fetched, vec![7]);
    }

    #[tokio::test]
    async fn test_scan_without_recognized_message() {
        let poll = poll_loop(CancellationToken::new());
        let mut session = session(&[(1, "Hallo"), (2, "Factuur")]);

        assert!(poll.scan(&mut session, &[1, 2]).await.unwrap().is_none());
        assert_eq!(session.fetched, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_failure_ends_run() {
        let poll = poll_loop(CancellationToken::new());
        let mut session = ScriptedSession {
            fail_search: true,
            ..ScriptedSession::default()
        };
        let mut tracker = StateTracker::new();

        let exit = poll.run(&mut session, &mut tracker).await;

        assert!(matches!(exit, PollExit::SearchFailed(_)));
        assert!(exit.should_reconnect());
        assert!(exit.error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_expires_while_idle() {
        let poll = poll_loop(CancellationToken::new());
        let mut session = ScriptedSession::default();
        let mut tracker = StateTracker::new();

        let exit = poll.run(&mut session, &mut tracker).await;

        assert!(matches!(exit, PollExit::SessionExpired));
        assert!(exit.should_reconnect());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_idle() {
        let cancel = CancellationToken::new();
        let poll = poll_loop(cancel.clone());
        let mut session = ScriptedSession::default();
        let mut tracker = StateTracker::new();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        });

        let exit = poll.run(&mut session, &mut tracker).await;
        canceller.await.unwrap();

        assert!(matches!(exit, PollExit::UserCancelled));
        assert!(!exit.should_reconnect());
        assert_eq!(exit.to_string(), "user cancelled");
    }
}
