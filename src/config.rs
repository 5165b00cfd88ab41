use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::in_app_message::PlatformType;

const DEFAULT_IMPRESSION_HISTORY_LIMIT: usize = 100;
const DEFAULT_HIDDEN_DURATION_SECONDS: u64 = 86_400;

/// Config holds the host settings evaluation depends on.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// The platform in-app messages are shown on.
    pub platform: PlatformType,
    /// Impressions kept per in-app message for frequency capping.
    pub impression_history_limit: usize,
    /// How long a message hidden by the user stays hidden.
    pub hidden_duration_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            platform: PlatformType::Ios,
            impression_history_limit: DEFAULT_IMPRESSION_HISTORY_LIMIT,
            hidden_duration_seconds: DEFAULT_HIDDEN_DURATION_SECONDS,
        }
    }
}

impl Config {
    /// Parses a config document. Missing settings keep their defaults.
    pub fn from_json(json: &str) -> Result<Config> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_that!(config.platform).is_equal_to(PlatformType::Ios);
        assert_that!(config.impression_history_limit).is_equal_to(100);
        assert_that!(config.hidden_duration_seconds).is_equal_to(86_400);
    }

    #[test]
    fn partial_documents_keep_defaults() {
        let config = Config::from_json(r#"{"platform": "ANDROID"}"#).unwrap();
        assert_that!(config).is_equal_to(Config {
            platform: PlatformType::Android,
            ..Config::default()
        });

        let config = Config::from_json(r#"{"impressionHistoryLimit": 5}"#).unwrap();
        assert_that!(config.impression_history_limit).is_equal_to(5);
    }

    #[test]
    fn unknown_platform_is_an_error() {
        assert!(Config::from_json(r#"{"platform": "TV"}"#).is_err());
    }
}
