use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::{HackleValue, HackleValueType};
use crate::variation::Action;

/// A Target is satisfied when every one of its conditions matches.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub key: TargetKey,
    pub target_match: TargetMatch,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetKey {
    pub key_type: KeyType,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TargetMatch {
    pub match_type: MatchType,
    pub operator: Operator,
    pub value_type: HackleValueType,
    pub values: Vec<HackleValue>,
}

/// An ordered rule: when the target matches, the action decides the variation.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetRule {
    pub target: Target,
    pub action: Action,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    UserId,
    UserProperty,
    HackleProperty,
    EventProperty,
    Segment,
    AbTest,
    FeatureFlag,
    Cohort,
    NumberOfEventsInDays,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Match,
    NotMatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    In,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
    Regex,
}

/// The place a target is used in decides which key types its conditions may reference.
/// Conditions with any other key type are dropped when the workspace is loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetingType {
    /// Segment overrides
    Identifier,
    /// Audiences, target rules, remote config rules and in-app message targets
    Property,
    /// Targets inside a segment
    Segment,
    /// In-app message trigger rules, matched against the triggering event
    Event,
}

impl TargetingType {
    pub fn supports(&self, key_type: KeyType) -> bool {
        use KeyType::*;
        match self {
            TargetingType::Identifier => matches!(key_type, Segment),
            TargetingType::Property => !matches!(key_type, EventProperty),
            TargetingType::Segment => {
                matches!(key_type, UserId | UserProperty | HackleProperty | Cohort)
            }
            TargetingType::Event => {
                matches!(key_type, EventProperty | UserProperty | HackleProperty)
            }
        }
    }
}

impl Target {
    /// Returns true if every condition matches, stopping at the first that does not.
    pub fn matches_with<F>(&self, mut condition_matches: F) -> Result<bool>
    where
        F: FnMut(&Condition) -> Result<bool>,
    {
        for condition in &self.conditions {
            if !condition_matches(condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl MatchType {
    pub fn apply(&self, matched: bool) -> bool {
        match self {
            MatchType::Match => matched,
            MatchType::NotMatch => !matched,
        }
    }
}

impl TargetMatch {
    /// Matches a resolved user-side value. An array matches if any of its non-null elements does.
    /// The match type is applied once, after the values have been combined.
    pub fn matches(&self, user_value: Option<&HackleValue>) -> bool {
        let matched = match user_value {
            Some(HackleValue::Array(values)) => values
                .iter()
                .filter(|v| !v.is_null())
                .any(|v| self.single_matches(Some(v))),
            _ => self.single_matches(user_value),
        };
        self.match_type.apply(matched)
    }

    fn single_matches(&self, user_value: Option<&HackleValue>) -> bool {
        let user_value = match user_value {
            Some(v) if !v.is_null() => v,
            _ => return false,
        };

        match self.operator {
            Operator::Exists => true,
            Operator::Regex if user_value.as_str().is_none() => false,
            _ => self
                .values
                .iter()
                .any(|match_value| self.value_matches(user_value, match_value)),
        }
    }

    fn value_matches(&self, user_value: &HackleValue, match_value: &HackleValue) -> bool {
        match self.value_type {
            HackleValueType::String | HackleValueType::Json => {
                string_op(user_value, match_value, self.operator)
            }
            HackleValueType::Number => numeric_op(user_value, match_value, self.operator),
            HackleValueType::Bool => bool_op(user_value, match_value, self.operator),
            HackleValueType::Version => version_op(user_value, match_value, self.operator),
            HackleValueType::Null => false,
        }
    }
}

impl Operator {
    fn compare<T: PartialOrd>(&self, l: T, r: T) -> bool {
        match self {
            Operator::In => l == r,
            Operator::Gt => l > r,
            Operator::Gte => l >= r,
            Operator::Lt => l < r,
            Operator::Lte => l <= r,
            _ => false,
        }
    }
}

fn string_op(lhs: &HackleValue, rhs: &HackleValue, op: Operator) -> bool {
    let (l, r) = match (lhs.to_string_value(), rhs.to_string_value()) {
        (Some(l), Some(r)) => (l, r),
        _ => return false,
    };
    match op {
        Operator::Contains => l.contains(&r),
        Operator::StartsWith => l.starts_with(&r),
        Operator::EndsWith => l.ends_with(&r),
        Operator::Regex => match Regex::new(&r) {
            Ok(re) => re.is_match(&l),
            Err(e) => {
                warn!("Invalid regex for 'REGEX' operator ({}): {}", e, r);
                false
            }
        },
        _ => op.compare(l, r),
    }
}

fn numeric_op(lhs: &HackleValue, rhs: &HackleValue, op: Operator) -> bool {
    match (lhs.to_f64(), rhs.to_f64()) {
        (Some(l), Some(r)) => op.compare(l, r),
        _ => false,
    }
}

fn bool_op(lhs: &HackleValue, rhs: &HackleValue, op: Operator) -> bool {
    if op != Operator::In {
        return false;
    }
    match (lhs.to_bool(), rhs.to_bool()) {
        (Some(l), Some(r)) => l == r,
        _ => false,
    }
}

fn version_op(lhs: &HackleValue, rhs: &HackleValue, op: Operator) -> bool {
    match (lhs.to_version(), rhs.to_version()) {
        (Some(l), Some(r)) => op.compare(l, r),
        _ => false,
    }
}
