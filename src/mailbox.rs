//! Mail session interface and its IMAP implementation.
//!
//! The poll loop only sees [`MailSession`] and [`MailConnector`]; the IMAP
//! adapter wraps each protocol operation in its configured timeout.
//!
//! # Example
//!
//! ```no_run
//! use alarm_mail_sync::{ImapConnector, MailConfig, MailConnector, MailSession};
//!
//! # async fn example() -> alarm_mail_sync::Result<()> {
//! let config = MailConfig::builder()
//!     .address("imap.example.com:993")
//!     .login("alarm@example.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let mut session = ImapConnector::new(config).open().await?;
//! let uids = session.search_by_sender("Verisure").await?;
//! if let Some(&newest) = uids.last() {
//!     println!("newest subject: {}", session.fetch_subject(newest).await?);
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{MailConfig, TimeoutConfig};
use crate::connection;
use crate::error::{Error, Result};
use crate::parser;
use crate::session::{self, AuthConfig, ImapSession};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

/// An open, authenticated session with the watched mailbox selected.
#[async_trait]
pub trait MailSession: Send {
    /// Cheap round trip proving the session is alive.
    async fn health_check(&mut self) -> Result<()>;

    /// UIDs of messages from `sender`, oldest first.
    async fn search_by_sender(&mut self, sender: &str) -> Result<Vec<u32>>;

    /// Decoded subject of message `uid`.
    async fn fetch_subject(&mut self, uid: u32) -> Result<String>;

    /// Text body of message `uid`.
    async fn fetch_body(&mut self, uid: u32) -> Result<String>;

    /// Ends the session.
    async fn close(&mut self) -> Result<()>;
}

/// Opens mail sessions; called again for every reconnect.
#[async_trait]
pub trait MailConnector: Send + Sync {
    /// Session type produced by this connector.
    type Session: MailSession;

    /// Connects, authenticates and selects the mailbox.
    async fn open(&self) -> Result<Self::Session>;
}

/// [`MailConnector`] for a real IMAP server.
#[derive(Debug, Clone)]
pub struct ImapConnector {
    config: MailConfig,
}

impl ImapConnector {
    /// Creates a connector for `config`.
    #[must_use]
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// The configuration sessions are opened with.
    #[must_use]
    pub fn config(&self) -> &MailConfig {
        &self.config
    }
}

#[async_trait]
impl MailConnector for ImapConnector {
    type Session = ImapMailSession;

    #[instrument(
        name = "ImapConnector::open",
        skip_all,
        fields(
            imap_host = %self.config.host(),
            login = %self.config.login(),
            mailbox = %self.config.mailbox
        )
    )]
    async fn open(&self) -> Result<ImapMailSession> {
        let config = &self.config;
        let target_addr = config.server_address();
        let timeouts = &config.timeouts;

        let stream = tokio::time::timeout(
            timeouts.connect,
            connection::establish(config.host(), &target_addr, config.tls_mode),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: timeouts.connect,
        })??;

        debug!(encrypted = stream.is_encrypted(), "Connection established");

        let auth_config = AuthConfig {
            login: config.login(),
            password: config.password(),
        };

        let mut session = tokio::time::timeout(
            timeouts.auth,
            session::authenticate(stream, &auth_config),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            login: config.login().to_string(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        // Client identification is a courtesy; failures do not end the session.
        match tokio::time::timeout(timeouts.select, session::identify(&mut session)).await {
            Ok(Ok(true)) => debug!("Client identity announced"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "ID command failed, continuing"),
            Err(_) => warn!(
                timeout_secs = timeouts.select.as_secs(),
                "ID command timed out, continuing"
            ),
        }

        tokio::time::timeout(
            timeouts.select,
            session::select_mailbox(&mut session, &config.mailbox),
        )
        .await
        .map_err(|_| Error::SelectTimeout {
            mailbox: config.mailbox.clone(),
            timeout: timeouts.select,
        })??;

        debug!("Selected mailbox");

        Ok(ImapMailSession {
            session: Box::new(session),
            timeouts: timeouts.clone(),
        })
    }
}

/// [`MailSession`] over async-imap.
pub struct ImapMailSession {
    session: Box<ImapSession>,
    timeouts: TimeoutConfig,
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn health_check(&mut self) -> Result<()> {
        let timeout = self.timeouts.noop;

        tokio::time::timeout(timeout, session::noop(&mut self.session))
            .await
            .map_err(|_| Error::NoopTimeout { timeout })?
    }

    async fn search_by_sender(&mut self, sender: &str) -> Result<Vec<u32>> {
        let timeout = self.timeouts.search;

        tokio::time::timeout(timeout, session::search_from(&mut self.session, sender))
            .await
            .map_err(|_| Error::SearchTimeout {
                sender: sender.to_string(),
                timeout,
            })?
    }

    async fn fetch_subject(&mut self, uid: u32) -> Result<String> {
        let timeout = self.timeouts.fetch;

        let raw = tokio::time::timeout(timeout, session::fetch_header(&mut self.session, uid))
            .await
            .map_err(|_| Error::FetchTimeout { uid, timeout })??;

        Ok(parser::subject_from_header(uid, &raw))
    }

    async fn fetch_body(&mut self, uid: u32) -> Result<String> {
        let timeout = self.timeouts.fetch;

        let raw = tokio::time::timeout(timeout, session::fetch_message(&mut self.session, uid))
            .await
            .map_err(|_| Error::FetchTimeout { uid, timeout })??;

        Ok(parser::body_text(uid, &raw))
    }

    async fn close(&mut self) -> Result<()> {
        let timeout = self.timeouts.logout;

        tokio::time::timeout(timeout, session::logout(&mut self.session))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
    }
}

impl std::fmt::Debug for ImapMailSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailSession")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
