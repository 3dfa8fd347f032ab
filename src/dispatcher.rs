//! Propagation of alarm state transitions to the external collaborators.
//!
//! The dispatcher talks to two narrow interfaces: [`Automation`] (user variables
//! and the level-mirroring dimmer) and [`AccessControl`] (remote access of the
//! camera devices on the router). Every step returns a typed result that is
//! collected in a [`PublishOutcome`]; no step aborts another.

use crate::error::{Error, Result};
use crate::state::AlarmState;
use crate::tracker::Transition;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// User variable receiving the actor.
pub const ACTOR_VARIABLE: &str = "alarm_state_by";

/// User variable receiving the state label.
pub const STATE_VARIABLE: &str = "alarm_state";

/// Home-automation endpoint.
#[async_trait]
pub trait Automation: Send + Sync {
    /// Sets user variable `name` to `value`.
    async fn set_variable(&self, name: &str, value: &str) -> Result<()>;

    /// Sets the level of the alarm-mirroring dimmer.
    async fn set_level(&self, level: u8) -> Result<()>;
}

/// Router-level remote access control for a set of devices.
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Allows remote access for every device.
    async fn allow(&self, devices: &[String]) -> Result<()>;

    /// Denies remote access for every device.
    async fn deny(&self, devices: &[String]) -> Result<()>;
}

/// Remote-access policy applied for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAccess {
    /// Cameras may be viewed remotely.
    Allow,
    /// Cameras are private.
    Deny,
}

impl RemoteAccess {
    /// Remote viewing is only allowed while everybody is away.
    #[must_use]
    pub fn for_state(state: AlarmState) -> Self {
        if state == AlarmState::ArmedAway {
            RemoteAccess::Allow
        } else {
            RemoteAccess::Deny
        }
    }
}

/// Per-step results of one publication.
#[derive(Debug)]
pub struct PublishOutcome {
    /// Setting the actor variable.
    pub actor_variable: Result<()>,
    /// Setting the state-label variable.
    pub state_variable: Result<()>,
    /// Policy that was applied on the router.
    pub remote_access: RemoteAccess,
    /// Router step result, `None` when no router is configured.
    pub access_control: Option<Result<()>>,
    /// Setting the mirror level.
    pub level: Result<()>,
}

impl PublishOutcome {
    /// Whether the state label reached the automation endpoint.
    ///
    /// Only then may the tracker keep the new state.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state_variable.is_ok()
    }

    /// The failed steps, by name.
    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &Error)> {
        [
            ("actor_variable", self.actor_variable.as_ref().err()),
            ("state_variable", self.state_variable.as_ref().err()),
            (
                "access_control",
                self.access_control.as_ref().and_then(|r| r.as_ref().err()),
            ),
            ("level", self.level.as_ref().err()),
        ]
        .into_iter()
        .filter_map(|(step, err)| err.map(|e| (step, e)))
    }
}

/// Drives the side effects of a state transition.
#[derive(Clone)]
pub struct NotificationDispatcher {
    automation: Arc<dyn Automation>,
    access_control: Option<Arc<dyn AccessControl>>,
    devices: Vec<String>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher that only notifies the automation endpoint.
    #[must_use]
    pub fn new(automation: Arc<dyn Automation>) -> Self {
        Self {
            automation,
            access_control: None,
            devices: Vec::new(),
        }
    }

    /// Adds the router step for `devices`.
    #[must_use]
    pub fn with_access_control(
        mut self,
        access_control: Arc<dyn AccessControl>,
        devices: Vec<String>,
    ) -> Self {
        self.access_control = Some(access_control);
        self.devices = devices;
        self
    }

    /// Publishes `transition`: actor and label variables, router policy, then level.
    #[instrument(
        name = "NotificationDispatcher::publish",
        skip_all,
        fields(from = %transition.from, to = %transition.to, actor = %transition.actor)
    )]
    pub async fn publish(&self, transition: &Transition) -> PublishOutcome {
        let state = transition.to;

        let actor_variable = self
            .automation
            .set_variable(ACTOR_VARIABLE, &transition.actor)
            .await;
        let state_variable = self
            .automation
            .set_variable(STATE_VARIABLE, state.label())
            .await;

        let remote_access = RemoteAccess::for_state(state);
        let access_control = match &self.access_control {
            Some(router) => Some(match remote_access {
                RemoteAccess::Allow => router.allow(&self.devices).await,
                RemoteAccess::Deny => router.deny(&self.devices).await,
            }),
            None => {
                debug!("No access control configured, skipping");
                None
            }
        };

        // Transitions never target Unknown, so a level is always present.
        let level = self
            .automation
            .set_level(state.level().unwrap_or_default())
            .await;

        let outcome = PublishOutcome {
            actor_variable,
            state_variable,
            remote_access,
            access_control,
            level,
        };

        for (step, error) in outcome.failures() {
            warn!(
                step,
                error = %error,
                category = %error.category(),
                "Publication step failed"
            );
        }
        if outcome.is_committed() {
            info!(access = ?remote_access, "Alarm state published");
        }

        outcome
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("access_control", &self.access_control.is_some())
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Classification;
    use crate::tracker::{Observation, StateTracker};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingAutomation {
        calls: Mutex<Vec<String>>,
        fail_variable: Option<&'static str>,
    }

    #[async_trait]
    impl Automation for RecordingAutomation {
        async fn set_variable(&self, name: &str, value: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("{name}={value}"));
            if self.fail_variable == Some(name) {
                return Err(Error::HttpStatus {
                    operation: format!("set {name}"),
                    status: 500,
                });
            }
            Ok(())
        }

        async fn set_level(&self, level: u8) -> Result<()> {
            self.calls.lock().unwrap().push(format!("level={level}"));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRouter {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AccessControl for RecordingRouter {
        async fn allow(&self, devices: &[String]) -> Result<()> {
            self.record("allow", devices)
        }

        async fn deny(&self, devices: &[String]) -> Result<()> {
            self.record("deny", devices)
        }
    }

    impl RecordingRouter {
        fn record(&self, action: &str, devices: &[String]) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{action}:{}", devices.join(",")));
            if self.fail {
                return Err(Error::AccessControl {
                    step: "login",
                    message: "refused".into(),
                });
            }
            Ok(())
        }
    }

    fn transition_to(state: AlarmState) -> Transition {
        let mut tracker = StateTracker::new();
        match tracker.observe(&Classification::recognized(state, Some("R. Doorn".into()))) {
            Observation::Transition(t) => t,
            Observation::NoChange => panic!("expected a transition"),
        }
    }

    fn devices() -> Vec<String> {
        vec!["aa:bb:cc:dd:ee:01".into(), "aa:bb:cc:dd:ee:02".into()]
    }

    #[tokio::test]
    async fn test_armed_away_allows_remote_access() {
        let automation = Arc::new(RecordingAutomation::default());
        let router = Arc::new(RecordingRouter::default());
        let dispatcher = NotificationDispatcher::new(automation.clone())
            .with_access_control(router.clone(), devices());

        let outcome = dispatcher.publish(&transition_to(AlarmState::ArmedAway)).await;

        assert!(outcome.is_committed());
        assert_eq!(outcome.remote_access, RemoteAccess::Allow);
        assert_eq!(
            *automation.calls.lock().unwrap(),
            vec![
                "alarm_state_by=R. Doorn",
                "alarm_state=ARMED_AWAY",
                "level=10"
            ]
        );
        assert_eq!(
            *router.calls.lock().unwrap(),
            vec!["allow:aa:bb:cc:dd:ee:01,aa:bb:cc:dd:ee:02"]
        );
    }

    #[tokio::test]
    async fn test_home_and_off_deny_remote_access() {
        for (state, level) in [(AlarmState::ArmedHome, 20), (AlarmState::Off, 0)] {
            let automation = Arc::new(RecordingAutomation::default());
            let router = Arc::new(RecordingRouter::default());
            let dispatcher = NotificationDispatcher::new(automation.clone())
                .with_access_control(router.clone(), devices());

            let outcome = dispatcher.publish(&transition_to(state)).await;

            assert_eq!(outcome.remote_access, RemoteAccess::Deny);
            assert!(router.calls.lock().unwrap()[0].starts_with("deny:"));
            assert_eq!(
                automation.calls.lock().unwrap().last().unwrap(),
                &format!("level={level}")
            );
        }
    }

    #[tokio::test]
    async fn test_router_failure_does_not_block_level() {
        let automation = Arc::new(RecordingAutomation::default());
        let router = Arc::new(RecordingRouter {
            fail: true,
            ..RecordingRouter::default()
        });
        let dispatcher =
            NotificationDispatcher::new(automation.clone()).with_access_control(router, devices());

        let outcome = dispatcher.publish(&transition_to(AlarmState::ArmedHome)).await;

        assert!(outcome.is_committed());
        assert!(matches!(outcome.access_control, Some(Err(_))));
        assert!(outcome.level.is_ok());
        assert_eq!(outcome.failures().count(), 1);
        assert_eq!(outcome.failures().next().unwrap().0, "access_control");
    }

    #[tokio::test]
    async fn test_state_label_failure_is_not_committed() {
        let automation = Arc::new(RecordingAutomation {
            fail_variable: Some(STATE_VARIABLE),
            ..RecordingAutomation::default()
        });
        let dispatcher = NotificationDispatcher::new(automation.clone());

        let outcome = dispatcher.publish(&transition_to(AlarmState::Off)).await;

        assert!(!outcome.is_committed());
        assert!(outcome.access_control.is_none());
        // The level call is still attempted.
        assert_eq!(automation.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_actor_failure_still_commits() {
        let automation = Arc::new(RecordingAutomation {
            fail_variable: Some(ACTOR_VARIABLE),
            ..RecordingAutomation::default()
        });
        let dispatcher = NotificationDispatcher::new(automation);

        let outcome = dispatcher.publish(&transition_to(AlarmState::Off)).await;

        assert!(outcome.is_committed());
        assert!(outcome.actor_variable.is_err());
    }

    #[test]
    fn test_remote_access_mapping() {
        assert_eq!(RemoteAccess::for_state(AlarmState::ArmedAway), RemoteAccess::Allow);
        assert_eq!(RemoteAccess::for_state(AlarmState::ArmedHome), RemoteAccess::Deny);
        assert_eq!(RemoteAccess::for_state(AlarmState::Off), RemoteAccess::Deny);
    }
}
