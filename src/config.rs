//! Configuration for the mailbox watcher and its collaborators.
//!
//! Use the builders to create configurations with sensible defaults:
//!
//! ```
//! use alarm_mail_sync::MailConfig;
//!
//! let config = MailConfig::builder()
//!     .address("imap.example.com:993")
//!     .login("alarm@example.com")
//!     .password("app-password")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.mailbox, "INBOX");
//! assert_eq!(config.sender, "Verisure");
//! ```

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Port on which IMAP servers speak TLS from the first byte.
pub const IMPLICIT_TLS_PORT: u16 = 993;

/// Mailbox selected when none is configured.
pub const DEFAULT_MAILBOX: &str = "INBOX";

/// Sender token used to find alarm notifications.
pub const DEFAULT_SENDER: &str = "Verisure";

/// How the mail connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// TLS handshake right after the TCP connect (IMAPS).
    Implicit,
    /// Plaintext connect, upgraded with `STARTTLS` when the server accepts it.
    StartTls,
}

impl TlsMode {
    /// Picks the mode conventionally used on `port`.
    #[must_use]
    pub fn for_port(port: u16) -> Self {
        if port == IMPLICIT_TLS_PORT {
            TlsMode::Implicit
        } else {
            TlsMode::StartTls
        }
    }
}

/// Configuration for connecting to the IMAP server.
///
/// Create using [`MailConfig::builder()`].
///
/// The `password` field is stored as a [`SecretString`] to prevent
/// accidental logging of credentials.
#[derive(Clone)]
pub struct MailConfig {
    host: String,
    port: u16,
    login: String,
    password: SecretString,
    /// Mailbox to watch.
    pub mailbox: String,
    /// Sender token the search filters on.
    pub sender: String,
    /// Transport security mode.
    pub tls_mode: TlsMode,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .field("mailbox", &self.mailbox)
            .field("sender", &self.sender)
            .field("tls_mode", &self.tls_mode)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl MailConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> MailConfigBuilder {
        MailConfigBuilder::default()
    }

    /// Returns the IMAP server hostname.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the IMAP server port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the login name.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the password as a string slice.
    ///
    /// The password is intentionally not directly accessible to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Timeout configuration for the individual IMAP operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for the NOOP health check.
    pub noop: Duration,
    /// Timeout for the sender search.
    pub search: Duration,
    /// Timeout for fetching one message section.
    pub fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            noop: Duration::from_secs(10),
            search: Duration::from_secs(10),
            fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Timing of the poll loop and the supervisor around it.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Sleep before every polling cycle.
    pub interval: Duration,
    /// How long one mail session is used before it is closed and reopened.
    pub session_lifetime: Duration,
    /// Pause after a session could not be opened.
    pub reconnect_delay: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            session_lifetime: Duration::from_secs(60),
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Splits a `host[:port]` address, defaulting the port to 993.
fn parse_address(address: &str) -> Result<(String, u16)> {
    let invalid = || Error::InvalidAddress {
        address: address.to_string(),
    };

    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (address, IMPLICIT_TLS_PORT),
    };

    if host.is_empty() || host.contains(':') {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}

/// Builder for [`MailConfig`].
#[derive(Debug, Default)]
pub struct MailConfigBuilder {
    address: Option<String>,
    login: Option<String>,
    password: Option<SecretString>,
    mailbox: Option<String>,
    sender: Option<String>,
    tls_mode: Option<TlsMode>,
    timeouts: Option<TimeoutConfig>,
}

impl MailConfigBuilder {
    /// Sets the server address as `host:port` (required).
    ///
    /// Without a port, 993 is used.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the login name (required).
    #[must_use]
    pub fn login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the mailbox to watch. Default is `INBOX`.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets the sender token to search for. Default is `Verisure`.
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Forces a transport security mode instead of deriving it from the port.
    #[must_use]
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = Some(mode);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets the message fetch timeout.
    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .fetch = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or the address is malformed.
    pub fn build(self) -> Result<MailConfig> {
        let address = non_empty(self.address, "mail address is required")?;
        let (host, port) = parse_address(&address)?;
        let login = non_empty(self.login, "mail login is required")?;
        let password = self
            .password
            .filter(|p| !p.expose_secret().is_empty())
            .ok_or_else(|| Error::InvalidConfig {
                message: "mail password is required".into(),
            })?;

        let mailbox = self
            .mailbox
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MAILBOX.to_string());
        let sender = self
            .sender
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());

        Ok(MailConfig {
            tls_mode: self.tls_mode.unwrap_or_else(|| TlsMode::for_port(port)),
            host,
            port,
            login,
            password,
            mailbox,
            sender,
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>, message: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidConfig {
            message: message.into(),
        })
}

/// Splits a comma-separated device list, trimming entries and dropping empty ones.
#[must_use]
pub fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Default Domoticz base URL.
pub const DEFAULT_DOMOTICZ_URL: &str = "http://localhost:8443";

/// Default user-variable path; `{name}` and `{value}` are substituted per call.
pub const DEFAULT_VARIABLE_PATH: &str =
    "/json.htm?type=command&param=updateuservariable&vname={name}&vtype=2&vvalue={value}";

/// Index of the virtual dimmer that mirrors the alarm level.
pub const DEFAULT_LEVEL_DEVICE_IDX: u32 = 230;

/// Configuration of the Domoticz automation endpoint.
#[derive(Clone)]
pub struct DomoticzConfig {
    /// Base URL, without trailing path.
    pub base_url: String,
    /// Path template for user-variable updates.
    pub variable_path: String,
    /// Device index of the level-mirroring dimmer.
    pub level_device_idx: u32,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Accept self-signed certificates.
    pub accept_invalid_certs: bool,
    login: Option<String>,
    password: Option<SecretString>,
}

impl std::fmt::Debug for DomoticzConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomoticzConfig")
            .field("base_url", &self.base_url)
            .field("variable_path", &self.variable_path)
            .field("level_device_idx", &self.level_device_idx)
            .field("request_timeout", &self.request_timeout)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Default for DomoticzConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_DOMOTICZ_URL.to_string(),
            variable_path: DEFAULT_VARIABLE_PATH.to_string(),
            level_device_idx: DEFAULT_LEVEL_DEVICE_IDX,
            request_timeout: Duration::from_secs(10),
            accept_invalid_certs: false,
            login: None,
            password: None,
        }
    }
}

impl DomoticzConfig {
    /// Creates a configuration for the given base URL with default path and device index.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the user-variable path template.
    #[must_use]
    pub fn with_variable_path(mut self, path: impl Into<String>) -> Self {
        self.variable_path = path.into();
        self
    }

    /// Sets the device index of the level-mirroring dimmer.
    #[must_use]
    pub fn with_level_device_idx(mut self, idx: u32) -> Self {
        self.level_device_idx = idx;
        self
    }

    /// Returns the basic-auth credentials, if configured.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) => Some((login, password.expose_secret())),
            _ => None,
        }
    }
}

/// Login the Connect Box firmware expects for its single admin account.
pub const DEFAULT_ROUTER_LOGIN: &str = "NULL";

/// Configuration of the router access-control endpoint.
#[derive(Clone)]
pub struct ConnectBoxConfig {
    /// Router base URL, e.g. `http://192.168.178.1`.
    pub base_url: String,
    /// Devices (MAC addresses) whose remote access is toggled.
    pub devices: Vec<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    login: String,
    password: SecretString,
}

impl std::fmt::Debug for ConnectBoxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectBoxConfig")
            .field("base_url", &self.base_url)
            .field("devices", &self.devices)
            .field("request_timeout", &self.request_timeout)
            .field("login", &self.login)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl ConnectBoxConfig {
    /// Creates a router configuration.
    ///
    /// An empty `login` falls back to `NULL`.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
        devices: Vec<String>,
    ) -> Self {
        let login = login.into();
        Self {
            base_url: base_url.into(),
            devices,
            request_timeout: Duration::from_secs(10),
            login: if login.is_empty() {
                DEFAULT_ROUTER_LOGIN.to_string()
            } else {
                login
            },
            password: SecretString::from(password.into()),
        }
    }

    /// Returns the router login name.
    #[must_use]
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Returns the router password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}
