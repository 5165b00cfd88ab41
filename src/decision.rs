use serde_json::{Map, Value};

use crate::experiment::ParameterConfiguration;
use crate::reason::DecisionReason;
use crate::value::HackleValue;

/// The variation a user sees in an A/B test.
#[derive(Clone, Debug, PartialEq)]
pub struct Decision {
    pub variation: String,
    pub reason: DecisionReason,
    pub config: Option<ParameterConfiguration>,
    pub properties: Map<String, Value>,
}

impl Decision {
    pub(crate) fn of(variation: impl Into<String>, reason: DecisionReason) -> Self {
        Decision {
            variation: variation.into(),
            reason,
            config: None,
            properties: Map::new(),
        }
    }

    pub fn get_string(&self, key: &str, default_value: &str) -> String {
        match &self.config {
            Some(config) => config.get_string(key, default_value),
            None => default_value.to_string(),
        }
    }

    pub fn get_f64(&self, key: &str, default_value: f64) -> f64 {
        self.config
            .as_ref()
            .map_or(default_value, |c| c.get_f64(key, default_value))
    }

    pub fn get_i64(&self, key: &str, default_value: i64) -> i64 {
        self.config
            .as_ref()
            .map_or(default_value, |c| c.get_i64(key, default_value))
    }

    pub fn get_bool(&self, key: &str, default_value: bool) -> bool {
        self.config
            .as_ref()
            .map_or(default_value, |c| c.get_bool(key, default_value))
    }
}

/// Whether a feature flag is on for a user.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureFlagDecision {
    pub is_on: bool,
    pub reason: DecisionReason,
    pub config: Option<ParameterConfiguration>,
    pub properties: Map<String, Value>,
}

impl FeatureFlagDecision {
    pub(crate) fn off(reason: DecisionReason) -> Self {
        FeatureFlagDecision {
            is_on: false,
            reason,
            config: None,
            properties: Map::new(),
        }
    }

    pub fn get_string(&self, key: &str, default_value: &str) -> String {
        match &self.config {
            Some(config) => config.get_string(key, default_value),
            None => default_value.to_string(),
        }
    }
}

/// The value of a remote config parameter for a user.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigDecision {
    pub value: HackleValue,
    pub reason: DecisionReason,
    pub properties: Map<String, Value>,
}

impl RemoteConfigDecision {
    pub(crate) fn of(value: HackleValue, reason: DecisionReason) -> Self {
        RemoteConfigDecision {
            value,
            reason,
            properties: Map::new(),
        }
    }
}

/// Whether an in-app message may be shown to a user, and in which language.
#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageDecision {
    pub is_eligible: bool,
    pub reason: DecisionReason,
    /// The language of the resolved message. Only set when a layout was resolved.
    pub message_lang: Option<String>,
    pub properties: Map<String, Value>,
}

impl InAppMessageDecision {
    pub(crate) fn ineligible(reason: DecisionReason) -> Self {
        InAppMessageDecision {
            is_eligible: false,
            reason,
            message_lang: None,
            properties: Map::new(),
        }
    }
}
