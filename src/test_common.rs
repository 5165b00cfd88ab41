#![cfg(test)]

use serde_json::{json, Value};

use crate::eval::Evaluator;
use crate::store::Clock;
use crate::workspace::Workspace;

pub const AB_TEST_KEY: i64 = 1;
pub const FEATURE_FLAG_KEY: i64 = 2;
pub const IN_APP_MESSAGE_KEY: i64 = 1;

/// A workspace with one A/B test splitting everyone between A and B, one feature flag that is on
/// for everyone with a `color` config, and one in-app message eligible for everyone on iOS.
pub fn test_workspace() -> Workspace {
    test_workspace_from(json!({
        "workspace": {"id": 1, "environment": {"id": 2}},
        "experiments": [{
            "id": 100, "key": AB_TEST_KEY, "status": "RUNNING", "identifierType": "$id",
            "version": 1, "bucketId": 1,
            "variations": [
                {"id": 1001, "key": "A", "status": "ACTIVE"},
                {"id": 1002, "key": "B", "status": "ACTIVE"}
            ],
            "execution": {
                "status": "RUNNING", "version": 1, "userOverrides": [], "segmentOverrides": [],
                "targetAudiences": [], "targetRules": [],
                "defaultRule": {"type": "BUCKET", "bucketId": 1}
            }
        }],
        "featureFlags": [{
            "id": 200, "key": FEATURE_FLAG_KEY, "status": "RUNNING", "identifierType": "$id",
            "version": 1, "bucketId": 2,
            "variations": [
                {"id": 2001, "key": "A", "status": "ACTIVE"},
                {"id": 2002, "key": "B", "status": "ACTIVE", "parameterConfigurationId": 1}
            ],
            "execution": {
                "status": "RUNNING", "version": 1, "userOverrides": [], "segmentOverrides": [],
                "targetAudiences": [], "targetRules": [],
                "defaultRule": {"type": "VARIATION", "variationId": 2002}
            }
        }],
        "buckets": [{"id": 1, "seed": 508_703_396, "slotSize": 10000, "slots": [
            {"startInclusive": 0, "endExclusive": 5000, "variationId": 1001},
            {"startInclusive": 5000, "endExclusive": 10000, "variationId": 1002}
        ]}],
        "events": [{"id": 3, "key": "purchase"}],
        "parameterConfigurations": [{"id": 1, "parameters": [{"key": "color", "value": "red"}]}],
        "inAppMessages": [{
            "id": 10, "key": IN_APP_MESSAGE_KEY, "timeUnit": "IMMEDIATE", "status": "ACTIVE",
            "eventTriggerRules": [{"eventKey": "open", "targets": []}],
            "targetContext": {"targets": [], "overrides": []},
            "messageContext": {
                "defaultLang": "ko", "exposure": {"type": "DEFAULT"},
                "platformTypes": ["IOS"], "orientations": ["VERTICAL"],
                "messages": [
                    {"lang": "ko", "layout": {"displayType": "MODAL", "layoutType": "IMAGE_ONLY"}}
                ]
            }
        }]
    }))
}

pub fn test_workspace_from(document: Value) -> Workspace {
    Workspace::from_json(&document.to_string()).unwrap()
}

pub fn test_evaluator() -> Evaluator {
    Evaluator::builder().build()
}

/// Recursively merges `overrides` into `base`. Objects merge key by key; anything else replaces.
pub fn merge(mut base: Value, overrides: Value) -> Value {
    match (&mut base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
        }
        (base, overrides) => *base = overrides,
    }
    base
}

pub struct TestClock {
    now: i64,
}

impl TestClock {
    pub fn new(now: i64) -> Self {
        TestClock { now }
    }
}

impl Clock for TestClock {
    fn now_millis(&self) -> i64 {
        self.now
    }
}
