use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::rule::KeyType;
use crate::value::HackleValue;

const USER_PROPERTIES_STARTING_CAPACITY: usize = 10;

/// Well-known identifier types. Any other string is a custom identifier type.
pub struct IdentifierType;

impl IdentifierType {
    pub const ID: &'static str = "$id";
    pub const USER: &'static str = "$userId";
    pub const DEVICE: &'static str = "$deviceId";
    pub const SESSION: &'static str = "$sessionId";
}

/// HackleUser is the user an evaluation is performed for.
///
/// A user is a set of identifiers keyed by identifier type (see [IdentifierType]), plain
/// properties set by the application, and properties collected by the SDK itself ("hackle
/// properties"). It may also carry the cohorts the user belongs to and event statistics used by
/// NUMBER_OF_EVENTS_IN_DAYS conditions.
///
/// Users are immutable; construct them with [HackleUser::builder].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HackleUser {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    identifiers: HashMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    properties: HashMap<String, HackleValue>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    hackle_properties: HashMap<String, HackleValue>,
    #[serde(default)]
    cohorts: Vec<i64>,
    #[serde(default)]
    target_events: Vec<TargetEvent>,
}

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

impl HackleUser {
    pub fn builder() -> HackleUserBuilder {
        HackleUserBuilder::new()
    }

    pub fn identifiers(&self) -> &HashMap<String, String> {
        &self.identifiers
    }

    /// Returns the identifier of the given type, if the user has one.
    pub fn identifier(&self, identifier_type: &str) -> Option<&str> {
        self.identifiers.get(identifier_type).map(String::as_str)
    }

    pub fn properties(&self) -> &HashMap<String, HackleValue> {
        &self.properties
    }

    pub fn hackle_properties(&self) -> &HashMap<String, HackleValue> {
        &self.hackle_properties
    }

    pub fn cohorts(&self) -> &[i64] {
        &self.cohorts
    }

    pub fn target_events(&self) -> &[TargetEvent] {
        &self.target_events
    }
}

/// Contains methods for configuring a [HackleUser].
#[derive(Clone, Debug)]
pub struct HackleUserBuilder {
    identifiers: HashMap<String, String>,
    properties: HashMap<String, HackleValue>,
    hackle_properties: HashMap<String, HackleValue>,
    cohorts: Vec<i64>,
    target_events: Vec<TargetEvent>,
}

impl Default for HackleUserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HackleUserBuilder {
    pub fn new() -> Self {
        Self {
            identifiers: HashMap::new(),
            properties: HashMap::with_capacity(USER_PROPERTIES_STARTING_CAPACITY),
            hackle_properties: HashMap::new(),
            cohorts: Vec::new(),
            target_events: Vec::new(),
        }
    }

    /// Set the identifier of `identifier_type`. Empty identifiers are ignored.
    pub fn identifier(
        &mut self,
        identifier_type: impl Into<String>,
        identifier: impl Into<String>,
    ) -> &mut Self {
        let identifier = identifier.into();
        if !identifier.is_empty() {
            self.identifiers.insert(identifier_type.into(), identifier);
        }
        self
    }

    pub fn id(&mut self, id: impl Into<String>) -> &mut Self {
        self.identifier(IdentifierType::ID, id)
    }

    pub fn user_id(&mut self, user_id: impl Into<String>) -> &mut Self {
        self.identifier(IdentifierType::USER, user_id)
    }

    pub fn device_id(&mut self, device_id: impl Into<String>) -> &mut Self {
        self.identifier(IdentifierType::DEVICE, device_id)
    }

    pub fn session_id(&mut self, session_id: impl Into<String>) -> &mut Self {
        self.identifier(IdentifierType::SESSION, session_id)
    }

    pub fn property(&mut self, key: impl Into<String>, value: impl Into<HackleValue>) -> &mut Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn hackle_property(
        &mut self,
        key: impl Into<String>,
        value: impl Into<HackleValue>,
    ) -> &mut Self {
        self.hackle_properties.insert(key.into(), value.into());
        self
    }

    pub fn cohort(&mut self, cohort_id: i64) -> &mut Self {
        self.cohorts.push(cohort_id);
        self
    }

    pub fn target_event(&mut self, target_event: TargetEvent) -> &mut Self {
        self.target_events.push(target_event);
        self
    }

    pub fn build(&self) -> HackleUser {
        HackleUser {
            identifiers: self.identifiers.clone(),
            properties: self.properties.clone(),
            hackle_properties: self.hackle_properties.clone(),
            cohorts: self.cohorts.clone(),
            target_events: self.target_events.clone(),
        }
    }
}

/// Per-day occurrence statistics of one event for one user, used for audience targeting.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetEvent {
    pub event_key: String,
    pub stats: Vec<TargetEventStat>,
    #[serde(default)]
    pub property: Option<TargetEventProperty>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TargetEventStat {
    /// Start of the day, epoch millis (UTC).
    pub date: i64,
    pub count: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TargetEventProperty {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub value: HackleValue,
}

impl TargetEvent {
    pub(crate) fn count_since(&self, since_millis: i64) -> i64 {
        self.stats
            .iter()
            .filter(|stat| stat.date >= since_millis)
            .map(|stat| stat.count)
            .sum()
    }
}

/// An event tracked for a user. Only its key and properties take part in evaluation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct UserEvent {
    pub key: String,
    #[serde(default)]
    pub properties: HashMap<String, HackleValue>,
}

impl UserEvent {
    pub fn new(key: impl Into<String>) -> Self {
        UserEvent {
            key: key.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<HackleValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use spectral::prelude::*;

    #[test]
    fn builder_sets_identifiers_and_properties() {
        let user = HackleUser::builder()
            .id("id")
            .user_id("user")
            .device_id("device")
            .identifier("custom", "c")
            .property("age", 30)
            .hackle_property("osName", "iOS")
            .cohort(42)
            .build();

        assert_that!(user.identifiers()).is_equal_to(&hashmap! {
            "$id".to_string() => "id".to_string(),
            "$userId".to_string() => "user".to_string(),
            "$deviceId".to_string() => "device".to_string(),
            "custom".to_string() => "c".to_string(),
        });
        assert_that!(user.identifier(IdentifierType::SESSION)).is_none();
        assert_that!(user.properties().get("age")).contains_value(&HackleValue::Int(30));
        assert_that!(user.hackle_properties().get("osName"))
            .contains_value(&HackleValue::from("iOS"));
        assert_that!(user.cohorts().to_vec()).is_equal_to(vec![42]);
    }

    #[test]
    fn empty_identifiers_are_ignored() {
        let user = HackleUser::builder().id("").build();
        assert_that!(user.identifier(IdentifierType::ID)).is_none();
    }

    #[test]
    fn deserializes_with_null_maps() {
        let user: HackleUser = serde_json::from_str(
            r#"{"identifiers": {"$id": "a"}, "properties": null, "hackleProperties": null}"#,
        )
        .unwrap();
        assert_that!(user.identifier("$id")).contains_value("a");
        assert_that!(user.properties().is_empty()).is_true();
    }

    #[test]
    fn counts_target_event_stats_since() {
        let event = TargetEvent {
            event_key: "purchase".into(),
            stats: vec![
                TargetEventStat { date: 100, count: 1 },
                TargetEventStat { date: 200, count: 2 },
                TargetEventStat { date: 300, count: 3 },
            ],
            property: None,
        };
        assert_eq!(5, event.count_since(200));
        assert_eq!(0, event.count_since(301));
    }
}
