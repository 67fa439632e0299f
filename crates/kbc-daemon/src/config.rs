//! Server and per-session configuration.
//!
//! A session's [`Config`] starts from the server defaults (environment) and is
//! overlaid with whatever the client sends when it initializes: HTTP headers
//! and, when allowed, query parameters. Keys are matched loosely so that
//! `KBC_STORAGE_TOKEN`, `X-StorageApi-Token` and `storage_token` all land in
//! the same field.

use std::{env, fmt, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};
use kbc_storage::DEFAULT_STORAGE_API_URL;
use thiserror::Error;

use crate::session::DEFAULT_SESSION_IDLE_TIMEOUT;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("storage token is not configured")]
    MissingToken,
    #[error("workspace schema is not configured")]
    MissingWorkspaceSchema,
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub storage_token: Option<String>,
    pub storage_api_url: Option<String>,
    pub workspace_schema: Option<String>,
    pub accept_secrets_in_url: Option<bool>,
    pub bigquery_api_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("storage_api_url", &self.storage_api_url)
            .field("storage_token", &self.storage_token.as_ref().map(|_| "****"))
            .field("workspace_schema", &self.workspace_schema)
            .field("accept_secrets_in_url", &self.accept_secrets_in_url)
            .field("bigquery_api_url", &self.bigquery_api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    StorageToken,
    StorageApiUrl,
    WorkspaceSchema,
    AcceptSecretsInUrl,
    BigQueryApiUrl,
}

impl Field {
    fn from_key(key: &str) -> Option<Self> {
        let normalized = key.trim().to_ascii_lowercase().replace('-', "_");
        let name = normalized
            .strip_prefix("kbc_")
            .or_else(|| normalized.strip_prefix("x_"))
            .unwrap_or(&normalized);
        match name {
            "storage_token" | "storageapi_token" | "storage_api_token" => Some(Field::StorageToken),
            "storage_api_url" | "storageapi_url" => Some(Field::StorageApiUrl),
            "workspace_schema" => Some(Field::WorkspaceSchema),
            "accept_secrets_in_url" => Some(Field::AcceptSecretsInUrl),
            "bigquery_api_url" => Some(Field::BigQueryApiUrl),
            _ => None,
        }
    }
}

impl Config {
    /// Builds a config from loosely named keys; unknown keys are ignored.
    pub fn from_params<'a, I>(params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        Config::default().replace_by(params)
    }

    /// Overlays `params` on top of `self`. A present key with an empty or
    /// missing value clears the field.
    pub fn replace_by<'a, I>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
    {
        for (key, value) in params {
            let Some(field) = Field::from_key(key) else {
                continue;
            };
            let value = value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string);
            match field {
                Field::StorageToken => self.storage_token = value,
                Field::StorageApiUrl => self.storage_api_url = value,
                Field::WorkspaceSchema => self.workspace_schema = value,
                Field::AcceptSecretsInUrl => {
                    self.accept_secrets_in_url = value.as_deref().and_then(parse_bool)
                }
                Field::BigQueryApiUrl => self.bigquery_api_url = value,
            }
        }
        self
    }

    /// Reads every recognised `KBC_*` variable from the process environment.
    pub fn from_env() -> Self {
        let vars: Vec<(String, String)> = env::vars()
            .filter(|(key, _)| key.to_ascii_uppercase().starts_with("KBC_"))
            .collect();
        Config::from_params(
            vars.iter()
                .map(|(key, value)| (key.as_str(), Some(value.as_str()))),
        )
    }

    /// Storage API URL with scheme, falling back to the public stack.
    pub fn storage_api_url(&self) -> String {
        match self.storage_api_url.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                url.trim_end_matches('/').to_string()
            }
            Some(url) => format!("https://{}", url.trim_end_matches('/')),
            None => DEFAULT_STORAGE_API_URL.to_string(),
        }
    }

    pub fn accepts_secrets_in_url(&self) -> bool {
        self.accept_secrets_in_url.unwrap_or(false)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_token.is_none() {
            return Err(ConfigError::MissingToken);
        }
        if self.workspace_schema.is_none() {
            return Err(ConfigError::MissingWorkspaceSchema);
        }
        Ok(())
    }
}

/// Process-level settings of the daemon.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub session_idle_timeout: Duration,
    pub defaults: Config,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr = env::var("KBC_MCP_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("invalid KBC_MCP_ADDR")?;
        let session_idle_timeout = match env::var("KBC_SESSION_IDLE_TIMEOUT_SECS") {
            Ok(raw) => parse_idle_timeout(&raw)?,
            Err(_) => DEFAULT_SESSION_IDLE_TIMEOUT,
        };

        Ok(Self {
            listen_addr,
            session_idle_timeout,
            defaults: Config::from_env(),
        })
    }
}

fn parse_idle_timeout(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid KBC_SESSION_IDLE_TIMEOUT_SECS '{raw}'"))?;
    anyhow::ensure!(secs > 0, "KBC_SESSION_IDLE_TIMEOUT_SECS must be positive");
    Ok(Duration::from_secs(secs))
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, Option<&str>)]) -> Config {
        Config::from_params(pairs.iter().copied())
    }

    #[test]
    fn keys_are_matched_loosely() {
        let expected = Config {
            storage_token: Some("foo".into()),
            workspace_schema: Some("bar".into()),
            ..Config::default()
        };
        for token_key in [
            "storage_token",
            "KBC_STORAGE_TOKEN",
            "X-Storage_Token",
            "X-StorageApi_Token",
            "X-StorageApi-Token",
        ] {
            assert_eq!(
                config(&[(token_key, Some("foo")), ("KBC_WORKSPACE_SCHEMA", Some("bar"))]),
                expected,
                "{token_key}"
            );
        }
    }

    #[test]
    fn unknown_keys_are_ignored() {
        assert_eq!(
            config(&[("foo", Some("bar")), ("storage_api_url", Some("http://nowhere"))]),
            Config {
                storage_api_url: Some("http://nowhere".into()),
                ..Config::default()
            }
        );
    }

    #[test]
    fn accept_secrets_in_url_parses_booleans() {
        assert_eq!(
            config(&[("accept_secrets_in_url", Some("true"))]).accept_secrets_in_url,
            Some(true)
        );
        assert_eq!(
            config(&[("ACCEPT-SECRETS-IN-URL", Some("off"))]).accept_secrets_in_url,
            Some(false)
        );
        assert_eq!(
            config(&[("accept_secrets_in_url", Some("maybe"))]).accept_secrets_in_url,
            None
        );
    }

    #[test]
    fn replace_by_overrides_and_clears() {
        let base = Config {
            storage_token: Some("bar".into()),
            ..Config::default()
        };

        let replaced = base
            .clone()
            .replace_by([("storage_token", Some("foo")), ("workspace_schema", Some("bar"))]);
        assert_eq!(replaced.storage_token.as_deref(), Some("foo"));
        assert_eq!(replaced.workspace_schema.as_deref(), Some("bar"));

        let cleared = base.replace_by([("storage_token", None), ("workspace_schema", Some("bar"))]);
        assert_eq!(
            cleared,
            Config {
                workspace_schema: Some("bar".into()),
                ..Config::default()
            }
        );
    }

    #[test]
    fn defaults_are_empty() {
        let config = Config::default();
        assert!(config.storage_token.is_none());
        assert!(config.storage_api_url.is_none());
        assert!(config.workspace_schema.is_none());
        assert!(config.accept_secrets_in_url.is_none());
        assert_eq!(config.storage_api_url(), "https://connection.keboola.com");
        assert!(!config.accepts_secrets_in_url());
    }

    #[test]
    fn debug_masks_the_token() {
        let config = Config {
            storage_token: Some("foo".into()),
            ..Config::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("storage_token: Some(\"****\")"));
        assert!(!rendered.contains("foo"));
    }

    #[test]
    fn storage_url_gets_a_scheme() {
        let config = config(&[("KBC_STORAGE_API_URL", Some("connection.eu-central-1.keboola.com/"))]);
        assert_eq!(
            config.storage_api_url(),
            "https://connection.eu-central-1.keboola.com"
        );
    }

    #[test]
    fn idle_timeout_is_positive_seconds() {
        assert_eq!(parse_idle_timeout(" 90 ").unwrap(), Duration::from_secs(90));
        assert!(parse_idle_timeout("0").is_err());
        assert!(parse_idle_timeout("1h").is_err());
    }

    #[test]
    fn validation_requires_token_and_schema() {
        assert_eq!(Config::default().validate(), Err(ConfigError::MissingToken));
        assert_eq!(
            config(&[("storage_token", Some("t"))]).validate(),
            Err(ConfigError::MissingWorkspaceSchema)
        );
        assert!(config(&[("storage_token", Some("t")), ("workspace_schema", Some("w"))])
            .validate()
            .is_ok());
    }
}
