use serde::{Deserialize, Serialize};

use crate::embeddings::VoyageConfig;
use crate::ringcentral::RingCentralConfig;

/// Contents of `~/.policydesk/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub ringcentral: RingCentralConfig,
    #[serde(default)]
    pub voyage: VoyageConfig,
    /// SQLite file; defaults to `~/.policydesk/policydesk.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// Workspace used by `embed` and `search` when none is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_workspace_id: Option<String>,
}

/// Environment variables that take precedence over the file.
pub const ENV_VOYAGE_API_KEY: &str = "VOYAGE_API_KEY";
pub const ENV_API_BASE_URL: &str = "POLICYDESK_API_BASE_URL";

impl Config {
    /// Overlay environment values. `lookup` is `std::env::var` in production.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup(ENV_VOYAGE_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.voyage.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_API_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.ringcentral.api_base_url = url;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_gets_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"ringcentral": {"apiBaseUrl": "https://crm.example.com"}, "voyage": {}}"#,
        )
        .unwrap();
        assert_eq!(config.ringcentral.api_base_url, "https://crm.example.com");
        assert_eq!(config.ringcentral.poll_interval_ms, 15_000);
        assert_eq!(config.voyage.model, "voyage-3-large");
        assert_eq!(config.voyage.output_dimension, 1024);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_env_overrides_win() {
        let config = Config::default().with_env_overrides(|k| match k {
            ENV_VOYAGE_API_KEY => Some("pa-test".to_string()),
            ENV_API_BASE_URL => Some(" ".to_string()),
            _ => None,
        });
        assert_eq!(config.voyage.api_key.as_deref(), Some("pa-test"));
        // Blank values are ignored.
        assert_eq!(config.ringcentral.api_base_url, "http://localhost:3000");
    }
}
