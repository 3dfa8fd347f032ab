//! Connect Box router client for the [`AccessControl`] interface.
//!
//! Every allow/deny runs a complete router session: fetch the login page for
//! the initial `sessionToken` cookie, log in, read the access level, toggle
//! each device, log out. The router rotates `sessionToken` on every answer,
//! so the token is read back from the cookie jar before each call.

use crate::config::ConnectBoxConfig;
use crate::dispatcher::AccessControl;
use crate::error::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, Url};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const LOGIN_PAGE: &str = "/common_page/login.html";
const GETTER: &str = "/xml/getter.fun";
const SETTER: &str = "/xml/setter.fun";

const TOKEN_COOKIE: &str = "sessionToken";

const FUN_GLOBAL_SETTINGS: u32 = 1;
const FUN_LOGIN: u32 = 15;
const FUN_LOGOUT: u32 = 16;
/// Setter toggling remote access of a pre-configured device.
const FUN_DEVICE_ACCESS: u32 = 122;

/// Access level of the administrator account.
const ADMIN_ACCESS_LEVEL: u32 = 1;

static ACCESS_LEVEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<AccessLevel>\s*(\d+)\s*</AccessLevel>").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceAction {
    Allow,
    Deny,
}

impl DeviceAction {
    fn as_param(self) -> &'static str {
        match self {
            DeviceAction::Allow => "allow",
            DeviceAction::Deny => "deny",
        }
    }
}

/// Client for the Connect Box cable router.
#[derive(Debug, Clone)]
pub struct ConnectBoxClient {
    config: ConnectBoxConfig,
    base_url: Url,
}

impl ConnectBoxClient {
    /// Creates a client for `config`.
    pub fn new(config: ConnectBoxConfig) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            Error::InvalidConfig {
                message: format!("invalid router URL {:?}: {e}", config.base_url),
            }
        })?;

        Ok(Self { config, base_url })
    }

    /// The devices configured for this router.
    #[must_use]
    pub fn devices(&self) -> &[String] {
        &self.config.devices
    }

    #[instrument(
        name = "ConnectBoxClient::apply",
        skip_all,
        fields(action = action.as_param(), devices = devices.len())
    )]
    async fn apply(&self, action: DeviceAction, devices: &[String]) -> Result<()> {
        if devices.is_empty() {
            debug!("No devices configured, skipping router");
            return Ok(());
        }

        let router = RouterSession::new(&self.config, self.base_url.clone())?;
        router.initialize().await?;
        router
            .login(self.config.login(), self.config.password())
            .await?;

        let result = router.configure(action, devices).await;

        // Logged in: always log out, whatever the device steps did.
        if let Err(e) = router.logout().await {
            warn!(error = %e, "Router logout failed");
        }

        if result.is_ok() {
            info!("Router remote access updated");
        }
        result
    }
}

#[async_trait]
impl AccessControl for ConnectBoxClient {
    async fn allow(&self, devices: &[String]) -> Result<()> {
        self.apply(DeviceAction::Allow, devices).await
    }

    async fn deny(&self, devices: &[String]) -> Result<()> {
        self.apply(DeviceAction::Deny, devices).await
    }
}

/// One login-to-logout conversation with the router.
struct RouterSession {
    http: Client,
    jar: Arc<Jar>,
    base_url: Url,
}

impl RouterSession {
    fn new(config: &ConnectBoxConfig, base_url: Url) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| Error::Http {
                operation: "build router client".to_string(),
                source,
            })?;

        Ok(Self {
            http,
            jar,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    async fn initialize(&self) -> Result<()> {
        let response = self
            .http
            .get(self.url(LOGIN_PAGE))
            .send()
            .await
            .map_err(|source| Error::Http {
                operation: "router initialize".to_string(),
                source,
            })?;

        check_status("router initialize", response.status())?;

        self.token("initialize")?;
        debug!("Router session token issued");
        Ok(())
    }

    fn token(&self, step: &'static str) -> Result<String> {
        let header = self.jar.cookies(&self.base_url).ok_or_else(|| Error::AccessControl {
            step,
            message: "router issued no session token".to_string(),
        })?;

        header
            .to_str()
            .ok()
            .and_then(|cookies| {
                cookies
                    .split(';')
                    .filter_map(|pair| pair.trim().split_once('='))
                    .find(|(name, _)| *name == TOKEN_COOKIE)
                    .map(|(_, value)| value.to_string())
            })
            .ok_or_else(|| Error::AccessControl {
                step,
                message: "router issued no session token".to_string(),
            })
    }

    async fn call(
        &self,
        step: &'static str,
        endpoint: &str,
        fun: u32,
        params: &[(&str, &str)],
    ) -> Result<String> {
        let token = self.token(step)?;
        let fun = fun.to_string();

        let mut form: Vec<(&str, &str)> = vec![("token", token.as_str()), ("fun", fun.as_str())];
        form.extend_from_slice(params);

        let response = self
            .http
            .post(self.url(endpoint))
            .form(&form)
            .send()
            .await
            .map_err(|source| Error::Http {
                operation: format!("router {step}"),
                source,
            })?;

        check_status(&format!("router {step}"), response.status())?;

        response.text().await.map_err(|source| Error::Http {
            operation: format!("router {step}"),
            source,
        })
    }

    async fn login(&self, login: &str, password: &str) -> Result<()> {
        let answer = self
            .call(
                "login",
                SETTER,
                FUN_LOGIN,
                &[("Username", login), ("Password", password)],
            )
            .await?;

        let Some(sid) = answer.trim().strip_prefix("successful;SID=") else {
            return Err(Error::AccessControl {
                step: "login",
                message: answer.trim().to_string(),
            });
        };

        self.jar
            .add_cookie_str(&format!("SID={sid}"), &self.base_url);
        debug!("Logged in to router");
        Ok(())
    }

    async fn configure(&self, action: DeviceAction, devices: &[String]) -> Result<()> {
        let settings = self
            .call("access level", GETTER, FUN_GLOBAL_SETTINGS, &[])
            .await?;

        match parse_access_level(&settings) {
            Some(ADMIN_ACCESS_LEVEL) => debug!("Router session has admin access"),
            level => warn!(?level, "Router session lacks admin access, continuing"),
        }

        for device in devices {
            self.call(
                "device access",
                SETTER,
                FUN_DEVICE_ACCESS,
                &[("MAC", device), ("action", action.as_param())],
            )
            .await
            .inspect_err(|e| warn!(device, error = %e, "Device access update failed"))?;
            debug!(device, "Device access updated");
        }

        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.call("logout", SETTER, FUN_LOGOUT, &[]).await?;
        debug!("Logged out of router");
        Ok(())
    }
}

fn check_status(operation: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::HttpStatus {
            operation: operation.to_string(),
            status: status.as_u16(),
        })
    }
}

fn parse_access_level(settings: &str) -> Option<u32> {
    ACCESS_LEVEL
        .captures(settings)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
