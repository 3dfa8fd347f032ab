//! Reconnecting outer loop around [`PollLoop`].

use crate::config::PollingConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::mailbox::{MailConnector, MailSession};
use crate::poll::{PollExit, PollLoop};
use crate::tracker::StateTracker;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Counters reported when the supervisor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Sessions that were opened successfully.
    pub sessions: u64,
    /// Attempts to open a session that failed.
    pub failed_opens: u64,
}

/// Opens mail sessions and polls them until shutdown.
///
/// Any poll exit other than [`PollExit::UserCancelled`] is followed by a new
/// session. The [`StateTracker`] lives here, so the last published state
/// survives reconnects.
#[derive(Debug)]
pub struct SessionSupervisor<C> {
    connector: C,
    poll: PollLoop,
    tracker: StateTracker,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl<C: MailConnector> SessionSupervisor<C> {
    /// Creates a supervisor; `cancel` is the shutdown signal.
    #[must_use]
    pub fn new(
        connector: C,
        dispatcher: NotificationDispatcher,
        sender: impl Into<String>,
        polling: PollingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            poll: PollLoop::new(dispatcher, sender, &polling, cancel.clone()),
            connector,
            tracker: StateTracker::new(),
            reconnect_delay: polling.reconnect_delay,
            cancel,
        }
    }

    /// The last published state.
    #[must_use]
    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// Runs until the shutdown signal fires.
    #[instrument(name = "SessionSupervisor::run", skip_all)]
    pub async fn run(&mut self) -> SupervisorReport {
        let mut report = SupervisorReport::default();

        loop {
            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                opened = self.connector.open() => opened,
            };

            let mut session = match opened {
                Ok(session) => session,
                Err(e) => {
                    report.failed_opens += 1;
                    warn!(
                        error = %e,
                        category = %e.category(),
                        retry_in = ?self.reconnect_delay,
                        "Failed to open mail session"
                    );

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(self.reconnect_delay) => continue,
                    }
                }
            };

            report.sessions += 1;
            info!(session = report.sessions, "Mail session opened");

            let exit = self.poll.run(&mut session, &mut self.tracker).await;
            match &exit {
                PollExit::UserCancelled => info!("Shutdown requested"),
                PollExit::SessionExpired => info!("Session lifetime elapsed, reconnecting"),
                other => warn!(
                    reason = %other,
                    category = %other.error().map(|e| e.category().to_string()).unwrap_or_default(),
                    "Poll loop failed, reconnecting"
                ),
            }

            if let Err(e) = session.close().await {
                warn!(error = %e, "Mail session did not close cleanly");
            }

            if !exit.should_reconnect() {
                break;
            }
        }

        info!(
            sessions = report.sessions,
            failed_opens = report.failed_opens,
            "Supervisor stopped"
        );
        report
    }
}
