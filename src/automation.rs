//! Domoticz client for the [`Automation`] interface.
//!
//! User variables are set through a configurable path template and the alarm
//! level through a fixed dimmer device. Every call is a `GET`, with basic auth
//! when credentials are configured.

use crate::config::DomoticzConfig;
use crate::dispatcher::Automation;
use crate::error::{Error, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use tracing::{debug, instrument};

/// Everything but RFC 3986 unreserved characters.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// HTTP client for the Domoticz JSON API.
#[derive(Debug, Clone)]
pub struct DomoticzClient {
    http: Client,
    config: DomoticzConfig,
}

impl DomoticzClient {
    /// Creates a client for `config`.
    pub fn new(config: DomoticzConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|source| Error::Http {
                operation: "build domoticz client".to_string(),
                source,
            })?;

        Ok(Self { http, config })
    }

    /// URL setting user variable `name` to `value`.
    ///
    /// The template takes `{name}`/`{value}` placeholders, or two positional `%s`.
    #[must_use]
    pub fn variable_url(&self, name: &str, value: &str) -> String {
        let name = encode(name);
        let value = encode(value);
        let template = &self.config.variable_path;

        let path = if template.contains("{name}") || template.contains("{value}") {
            template.replace("{name}", &name).replace("{value}", &value)
        } else {
            template.replacen("%s", &name, 1).replacen("%s", &value, 1)
        };

        format!("{}{path}", self.base_url())
    }

    /// URL setting the mirror dimmer to `level`.
    #[must_use]
    pub fn level_url(&self, level: u8) -> String {
        format!(
            "{}/json.htm?type=command&param=switchlight&idx={}&switchcmd=SetLevel&level={level}",
            self.base_url(),
            self.config.level_device_idx
        )
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn get(&self, operation: String, url: String) -> Result<()> {
        let mut request = self.http.get(&url);
        if let Some((login, password)) = self.config.credentials() {
            request = request.basic_auth(login, Some(password));
        }

        let response = request.send().await.map_err(|source| Error::Http {
            operation: operation.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                operation,
                status: status.as_u16(),
            });
        }

        debug!(status = status.as_u16(), "Domoticz accepted request");
        Ok(())
    }
}

#[async_trait]
impl Automation for DomoticzClient {
    #[instrument(name = "DomoticzClient::set_variable", skip(self))]
    async fn set_variable(&self, name: &str, value: &str) -> Result<()> {
        let url = self.variable_url(name, value);
        self.get(format!("set variable {name}"), url).await
    }

    #[instrument(name = "DomoticzClient::set_level", skip(self))]
    async fn set_level(&self, level: u8) -> Result<()> {
        let url = self.level_url(level);
        self.get("set level".to_string(), url).await
    }
}

fn encode(raw: &str) -> String {
    utf8_percent_encode(raw, QUERY_VALUE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: DomoticzConfig) -> DomoticzClient {
        DomoticzClient::new(config).unwrap()
    }

    #[test]
    fn test_variable_url_with_named_placeholders() {
        let client = client(DomoticzConfig::new("http://domo.local:8080/"));

        assert_eq!(
            client.variable_url("alarm_state_by", "R. Doorn"),
            "http://domo.local:8080/json.htm?type=command&param=updateuservariable\
             &vname=alarm_state_by&vtype=2&vvalue=R.%20Doorn"
        );
    }

    #[test]
    fn test_variable_url_with_positional_placeholders() {
        let config = DomoticzConfig::new("http://domo.local")
            .with_variable_path("/json.htm?param=updateuservariable&vname=%s&vtype=2&vvalue=%s");

        assert_eq!(
            client(config).variable_url("alarm_state", "ARMED_AWAY"),
            "http://domo.local/json.htm?param=updateuservariable&vname=alarm_state&vtype=2&vvalue=ARMED_AWAY"
        );
    }

    #[test]
    fn test_values_are_encoded() {
        let client = client(DomoticzConfig::default());
        let url = client.variable_url("who", "Jan & Piet/ü");

        assert!(url.ends_with("vvalue=Jan%20%26%20Piet%2F%C3%BC"), "{url}");
    }

    #[test]
    fn test_level_url() {
        let client = client(DomoticzConfig::new("http://domo.local").with_level_device_idx(42));

        assert_eq!(
            client.level_url(20),
            "http://domo.local/json.htm?type=command&param=switchlight&idx=42&switchcmd=SetLevel&level=20"
        );
    }

    #[test]
    fn test_default_level_device() {
        let client = client(DomoticzConfig::default());
        assert!(client.level_url(0).contains("idx=230&"));
        assert!(client.level_url(0).starts_with("http://localhost:8443/"));
    }
}
