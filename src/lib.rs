//! # alarm-mail-sync
//!
//! Mirrors the arm/disarm state of a home alarm system into a home-automation
//! controller by reading the alarm's notification emails over IMAP.
//!
//! This crate provides:
//! - A long-running IMAP poller that reconnects on every failure
//! - Classification of the alarm's notification subjects into alarm states
//! - Change detection, so every distinct state is published exactly once
//! - Publication to Domoticz (user variables and a level-mirroring dimmer)
//! - Remote-access toggling of camera devices on a Connect Box router
//!
//! ## Quick Start
//!
//! ```no_run
//! use alarm_mail_sync::{
//!     DomoticzClient, DomoticzConfig, ImapConnector, MailConfig, NotificationDispatcher,
//!     PollingConfig, SessionSupervisor,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> alarm_mail_sync::Result<()> {
//! let mail = MailConfig::builder()
//!     .address("imap.example.com:993")
//!     .login("alarm@example.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let domoticz = DomoticzClient::new(
//!     DomoticzConfig::new("https://domoticz.local:8443").with_credentials("admin", "secret"),
//! )?;
//! let dispatcher = NotificationDispatcher::new(Arc::new(domoticz));
//!
//! let cancel = CancellationToken::new();
//! let sender = mail.sender.clone();
//! let mut supervisor = SessionSupervisor::new(
//!     ImapConnector::new(mail),
//!     dispatcher,
//!     sender,
//!     PollingConfig::default(),
//!     cancel.clone(),
//! );
//!
//! // Runs until `cancel.cancel()` is called.
//! let report = supervisor.run().await;
//! println!("opened {} sessions", report.sessions);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! and [`Error::category`] to decide how to report them:
//!
//! ```
//! use alarm_mail_sync::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient {} error: {}", error.category(), error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation.
//!
//! ### Span Naming Convention
//!
//! - `SessionSupervisor::run` - Reconnect loop
//! - `ImapConnector::open` - Connect, authenticate and select
//! - `PollLoop::run` - Polling one session
//! - `NotificationDispatcher::publish` - Publishing a transition
//! - `DomoticzClient::set_variable` / `DomoticzClient::set_level` - Automation calls
//! - `ConnectBoxClient::apply` - Router session
//! - `session::authenticate` - IMAP authentication
//! - `connection::establish` - TCP and TLS setup
//!
//! ### Standard Fields
//!
//! - `imap_host` - IMAP server hostname
//! - `mailbox` - Selected mailbox
//! - `sender` - Sender searched for
//! - `uid` - Message UID
//! - `from` / `to` / `actor` - Transition details

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod access_control;
pub mod automation;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mailbox;
pub mod poll;
pub mod state;
pub mod supervisor;
pub mod tracker;

// Internal modules
mod connection;
mod parser;
mod session;

// Re-exports for ergonomic API
pub use access_control::ConnectBoxClient;
pub use automation::DomoticzClient;
pub use config::{
    ConnectBoxConfig, DomoticzConfig, MailConfig, MailConfigBuilder, PollingConfig,
    TimeoutConfig, TlsMode,
};
pub use dispatcher::{AccessControl, Automation, NotificationDispatcher, PublishOutcome, RemoteAccess};
pub use error::{Error, ErrorCategory, Result};
pub use mailbox::{ImapConnector, ImapMailSession, MailConnector, MailSession};
pub use poll::{PollExit, PollLoop};
pub use state::{AlarmState, Classification};
pub use supervisor::{SessionSupervisor, SupervisorReport};
pub use tracker::{Observation, StateTracker, Transition};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = MailConfig::builder();
        let _ = PollingConfig::default();
        let _ = StateTracker::new();
        let _ = classifier::classify("Uitgeschakeld", "");
    }
}
