//! Configuration file handling for geyser-tail

use std::path::Path;

use anyhow::{bail, Context, Result};
use geyser_client::ClientConfig;
use geyser_core::Method;
use serde::{Deserialize, Serialize};

/// Contents of the TOML file passed with `--config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    /// Subscriptions registered right after connecting
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionEntry>,
    /// Passed to the client unchanged
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// `host:port` of the stream server
    pub address: Option<String>,
    /// Sent as the `x-token` preamble
    pub token: Option<String>,
}

/// One `[[subscriptions]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEntry {
    /// Generated by the client when absent
    #[serde(default)]
    pub id: Option<String>,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl TailConfig {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .client
            .validate()
            .with_context(|| format!("Invalid client settings in {}", path.display()))?;
        for entry in &config.subscriptions {
            entry
                .method
                .parse::<Method>()
                .with_context(|| format!("Invalid subscription in {}", path.display()))?;
        }
        Ok(config)
    }
}

impl SubscriptionEntry {
    /// Parse `method[:id][=params]`, where params is a JSON object
    ///
    /// `slots`, `accounts:wallet={"account":["P1"]}` and `blocks_meta=null`
    /// are all accepted.
    pub fn parse(spec: &str) -> Result<Self> {
        let (head, params) = match spec.split_once('=') {
            Some((head, raw)) => {
                let params = serde_json::from_str(raw)
                    .with_context(|| format!("Invalid JSON params in '{}'", spec))?;
                (head, params)
            }
            None => (spec, empty_params()),
        };

        let (method, id) = match head.split_once(':') {
            Some((_, "")) => bail!("Empty subscription id in '{}'", spec),
            Some((method, id)) => (method, Some(id.to_string())),
            None => (head, None),
        };
        method
            .parse::<Method>()
            .with_context(|| format!("Unknown method in '{}'", spec))?;

        Ok(Self {
            id,
            method: method.to_string(),
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_bare_method() {
        let entry = SubscriptionEntry::parse("slots").unwrap();
        assert_eq!(entry.method, "slots");
        assert_eq!(entry.id, None);
        assert_eq!(entry.params, json!({}));
    }

    #[test]
    fn test_parse_id_and_params() {
        let entry = SubscriptionEntry::parse(r#"accounts:wallet={"account":["P1"]}"#).unwrap();
        assert_eq!(entry.method, "accounts");
        assert_eq!(entry.id.as_deref(), Some("wallet"));
        assert_eq!(entry.params, json!({"account": ["P1"]}));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(SubscriptionEntry::parse("accountsDataSlice").is_err());
        assert!(SubscriptionEntry::parse("slots:").is_err());
        assert!(SubscriptionEntry::parse("slots={not json").is_err());
    }

    #[test]
    fn test_load_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.toml");
        std::fs::write(
            &path,
            r#"
[endpoint]
address = "127.0.0.1:10000"
token = "secret"

[[subscriptions]]
id = "tip"
method = "slots"

[[subscriptions]]
method = "transactions"
params = { vote = false }

[client]
heartbeat = false

[client.reconnect]
max_attempts = 10
"#,
        )
        .unwrap();

        let config = TailConfig::load_from(&path).unwrap();

        assert_eq!(config.endpoint.address.as_deref(), Some("127.0.0.1:10000"));
        assert_eq!(config.endpoint.token.as_deref(), Some("secret"));
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[0].params, json!({}));
        assert_eq!(config.subscriptions[1].params, json!({"vote": false}));
        assert!(!config.client.heartbeat.enabled);
        assert_eq!(config.client.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_load_rejects_unknown_method() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.toml");
        std::fs::write(&path, "[[subscriptions]]\nmethod = \"votes\"\n").unwrap();

        let err = TailConfig::load_from(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("votes"));
    }
}
