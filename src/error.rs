//! Error types for the alarm-mail-sync crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].
//!
//! An unrecognized notification subject is not an error: the poll loop logs it and
//! keeps scanning older messages.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while watching the mailbox or notifying collaborators.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Mail server address is not of the form `host[:port]`.
    #[error("invalid mail server address '{address}'")]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (mixed retryability)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {login} after {timeout:?}")]
    AuthTimeout {
        /// The login used for authentication.
        login: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Health-check (NOOP) timeout.
    #[error("NOOP timeout after {timeout:?}")]
    NoopTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Sender search timeout.
    #[error("search timeout for sender '{sender}' after {timeout:?}")]
    SearchTimeout {
        /// The sender token searched for.
        sender: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("fetch timeout for UID {uid} after {timeout:?}")]
    FetchTimeout {
        /// The UID being fetched.
        uid: u32,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// STARTTLS negotiation failed on the transport level.
    #[error("STARTTLS negotiation with {target} failed")]
    StartTls {
        /// The target address.
        target: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP login failed.
    #[error("IMAP login failed for {login}")]
    ImapLogin {
        /// The login used.
        login: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP NOOP failed.
    #[error("IMAP NOOP command failed")]
    ImapNoop {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed for query {query}")]
    ImapSearch {
        /// The search query sent to the server.
        query: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch of {section} failed for UID {uid}")]
    ImapFetch {
        /// The UID that failed.
        uid: u32,
        /// The requested section.
        section: &'static str,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// The server completed a fetch without returning the requested section.
    #[error("server returned no {section} for UID {uid}")]
    MissingSection {
        /// The UID that was fetched.
        uid: u32,
        /// The requested section.
        section: &'static str,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Notification errors (RETRYABLE - next transition or cycle tries again)
    // ─────────────────────────────────────────────────────────────────────────
    /// An HTTP request to a collaborator could not be completed.
    #[error("{operation} request failed")]
    Http {
        /// The collaborator operation that failed.
        operation: String,
        /// The underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// A collaborator answered with a non-success HTTP status.
    #[error("{operation} returned HTTP {status}")]
    HttpStatus {
        /// The collaborator operation that failed.
        operation: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The router access-control sequence failed at a protocol step.
    #[error("access control {step} failed: {message}")]
    AccessControl {
        /// The step of the router sequence that failed.
        step: &'static str,
        /// What the router answered.
        message: String,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::NoopTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::StartTls { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::MissingSection { .. }
            | Error::Http { .. }
            | Error::HttpStatus { .. }
            | Error::AccessControl { .. } => true,

            // NOT retryable: config errors and logout (the session is being dropped anyway)
            Error::InvalidConfig { .. }
            | Error::InvalidAddress { .. }
            | Error::InvalidDnsName { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. } => false,
        }
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::InvalidAddress { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::NoopTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::StartTls { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::MissingSection { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::Http { .. } | Error::HttpStatus { .. } | Error::AccessControl { .. } => {
                ErrorCategory::Notification
            }
        }
    }
}

/// Error categories for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Automation or access-control collaborator errors.
    Notification,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Notification => write!(f, "notification"),
        }
    }
}
