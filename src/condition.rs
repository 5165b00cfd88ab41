use itertools::Itertools;
use log::debug;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::eval::{Evaluator, EvaluatorContext, EvaluatorRequest, EvaluatorType};
use crate::experiment::{ExperimentEvaluation, ExperimentRequest};
use crate::reason::DecisionReason;
use crate::rule::{Condition, KeyType, MatchType, Operator, TargetMatch};
use crate::user::TargetEvent;
use crate::util::MILLIS_PER_DAY;
use crate::value::{HackleValue, HackleValueType};

/// Target events without a property are grouped under this key.
const DEFAULT_TARGET_EVENT_PROPERTY: &str = "DEFAULT_HACKLE_PROPERTY";

/// Nested A/B test evaluations with any other reason never satisfy an AB_TEST condition.
const AB_TEST_MATCHED_REASONS: [DecisionReason; 4] = [
    DecisionReason::Overridden,
    DecisionReason::TrafficAllocated,
    DecisionReason::ExperimentCompleted,
    DecisionReason::TrafficAllocatedByTargeting,
];

/// ConditionMatcher decides a single condition for the user of `request`.
pub trait ConditionMatcher: Send + Sync {
    fn matches<'a>(
        &self,
        evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool>;
}

/// Matches identifiers, user properties and hackle properties.
#[derive(Debug, Default)]
pub struct UserConditionMatcher;

impl ConditionMatcher for UserConditionMatcher {
    fn matches<'a>(
        &self,
        _evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        _context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        let user = request.user();
        let name = condition.key.name.as_str();
        let user_value = match condition.key.key_type {
            KeyType::UserId => user.identifier(name).map(HackleValue::from),
            KeyType::UserProperty => user.properties().get(name).cloned(),
            KeyType::HackleProperty => user.hackle_properties().get(name).cloned(),
            other => return Err(Error::UnsupportedKeyType(other)),
        };
        Ok(condition.target_match.matches(user_value.as_ref()))
    }
}

/// Matches properties of the event the request was triggered by.
#[derive(Debug, Default)]
pub struct EventConditionMatcher;

impl ConditionMatcher for EventConditionMatcher {
    fn matches<'a>(
        &self,
        _evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        _context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        let event = match request.event() {
            Some(event) => event,
            None => return Ok(false),
        };
        let value = event.properties.get(&condition.key.name);
        Ok(condition.target_match.matches(value))
    }
}

/// Every match value names a segment; the condition holds if the user is in any of them.
#[derive(Debug, Default)]
pub struct SegmentConditionMatcher;

impl ConditionMatcher for SegmentConditionMatcher {
    fn matches<'a>(
        &self,
        evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        let workspace = request.workspace();
        let mut matched = false;
        for value in &condition.target_match.values {
            let segment_key = value.as_str().ok_or_else(|| {
                Error::InvalidCondition(format!("segment key must be a string [{:?}]", value))
            })?;
            let segment = workspace
                .get_segment(segment_key)
                .ok_or_else(|| Error::SegmentNotFound(segment_key.to_string()))?;
            if segment.matches_with(|target| evaluator.target_matches(request, context, target))? {
                matched = true;
                break;
            }
        }
        Ok(condition.target_match.match_type.apply(matched))
    }
}

/// Evaluates the referenced A/B test or feature flag and matches on its outcome.
#[derive(Debug, Default)]
pub struct ExperimentConditionMatcher;

impl ExperimentConditionMatcher {
    fn evaluation<'a>(
        evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        key_type: KeyType,
        experiment_key: i64,
    ) -> Result<Option<ExperimentEvaluation<'a>>> {
        let workspace = request.workspace();
        let experiment = match key_type {
            KeyType::AbTest => workspace.get_experiment(experiment_key),
            KeyType::FeatureFlag => workspace.get_feature_flag(experiment_key),
            other => return Err(Error::UnsupportedKeyType(other)),
        };
        let experiment = match experiment {
            Some(experiment) => experiment,
            None => {
                debug!("{:?} condition references missing key {}", key_type, experiment_key);
                return Ok(None);
            }
        };

        if let Some(evaluation) = context.get(experiment.id) {
            return Ok(Some(evaluation.clone()));
        }

        let nested = ExperimentRequest::requested_by(request, experiment);
        let mut evaluation = evaluator.evaluate_experiment(&nested, context)?;
        if key_type == KeyType::AbTest
            && request.key().evaluator_type == EvaluatorType::Experiment
            && evaluation.reason == DecisionReason::TrafficAllocated
        {
            evaluation = evaluation.with_reason(DecisionReason::TrafficAllocatedByTargeting);
        }
        context.add_evaluation(evaluation.clone());
        Ok(Some(evaluation))
    }
}

impl ConditionMatcher for ExperimentConditionMatcher {
    fn matches<'a>(
        &self,
        evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        let experiment_key: i64 = condition.key.name.parse().map_err(|_| {
            Error::InvalidCondition(format!("experiment key [{}]", condition.key.name))
        })?;
        let key_type = condition.key.key_type;

        let evaluation =
            match Self::evaluation(evaluator, request, context, key_type, experiment_key)? {
                Some(evaluation) => evaluation,
                None => return Ok(false),
            };

        let user_value = match key_type {
            KeyType::AbTest => {
                if !AB_TEST_MATCHED_REASONS.contains(&evaluation.reason) {
                    return Ok(false);
                }
                HackleValue::Str(evaluation.variation_key)
            }
            _ => HackleValue::Bool(evaluation.is_on()),
        };
        Ok(condition.target_match.matches(Some(&user_value)))
    }
}

/// Matches the ids of the cohorts the user belongs to.
#[derive(Debug, Default)]
pub struct CohortConditionMatcher;

impl ConditionMatcher for CohortConditionMatcher {
    fn matches<'a>(
        &self,
        _evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        _context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        let cohorts: Vec<HackleValue> = request
            .user()
            .cohorts()
            .iter()
            .map(|&id| HackleValue::Int(id))
            .collect();
        Ok(condition
            .target_match
            .matches(Some(&HackleValue::Array(cohorts))))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NumberOfEventsInDays {
    event_key: String,
    time_range: TimeRange,
    filters: Option<Vec<PropertyFilter>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeRange {
    period: i64,
    time_unit: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyFilter {
    property_key: PropertyKey,
    #[serde(rename = "match")]
    property_match: PropertyMatch,
}

#[derive(Debug, Deserialize)]
struct PropertyKey {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyMatch {
    #[serde(rename = "type")]
    match_type: MatchType,
    operator: Operator,
    value_type: HackleValueType,
    values: Vec<HackleValue>,
}

impl From<PropertyMatch> for TargetMatch {
    fn from(m: PropertyMatch) -> Self {
        TargetMatch {
            match_type: m.match_type,
            operator: m.operator,
            value_type: m.value_type,
            values: m.values,
        }
    }
}

/// Counts how often the user triggered an event in the last days.
///
/// The condition name is a JSON document naming the event, the window and optional property
/// filters; the condition's own match applies to the count.
#[derive(Debug, Default)]
pub struct TargetEventConditionMatcher;

impl TargetEventConditionMatcher {
    fn parse(name: &str) -> Result<NumberOfEventsInDays> {
        let parsed: NumberOfEventsInDays = serde_json::from_str(name)
            .map_err(|e| Error::InvalidCondition(format!("target event [{}]: {}", name, e)))?;
        if parsed.time_range.time_unit != "DAYS" {
            return Err(Error::InvalidCondition(format!(
                "unsupported time unit [{}]",
                parsed.time_range.time_unit
            )));
        }
        Ok(parsed)
    }
}

impl ConditionMatcher for TargetEventConditionMatcher {
    fn matches<'a>(
        &self,
        evaluator: &Evaluator,
        request: &dyn EvaluatorRequest<'a>,
        _context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        let query = Self::parse(&condition.key.name)?;
        let since = evaluator.clock().now_millis() - query.time_range.period * MILLIS_PER_DAY;

        let by_property = request
            .user()
            .target_events()
            .iter()
            .filter(|event| event.event_key == query.event_key)
            .map(|event| (property_key(event), event))
            .into_group_map();

        let count_matches = |event: &TargetEvent| {
            let count = HackleValue::Int(event.count_since(since));
            condition.target_match.matches(Some(&count))
        };

        // An absent filter list counts property-less stats; an empty one matches vacuously.
        let filters = match query.filters {
            Some(filters) => filters,
            None => {
                return Ok(by_property
                    .get(DEFAULT_TARGET_EVENT_PROPERTY)
                    .map_or(false, |events| events.iter().any(|e| count_matches(*e))))
            }
        };

        Ok(filters.into_iter().all(|filter| {
            let events = match by_property.get(filter.property_key.name.as_str()) {
                Some(events) => events,
                None => return false,
            };
            let property_match = TargetMatch::from(filter.property_match);
            events.iter().any(|event| {
                let property_matches = event
                    .property
                    .as_ref()
                    .map_or(false, |p| property_match.matches(Some(&p.value)));
                property_matches && count_matches(*event)
            })
        }))
    }
}

fn property_key(event: &TargetEvent) -> &str {
    event
        .property
        .as_ref()
        .map_or(DEFAULT_TARGET_EVENT_PROPERTY, |p| p.key.as_str())
}

/// Routes each condition key type to its matcher.
#[derive(Debug, Default)]
pub(crate) struct ConditionMatcherFactory {
    user: UserConditionMatcher,
    event: EventConditionMatcher,
    segment: SegmentConditionMatcher,
    experiment: ExperimentConditionMatcher,
    cohort: CohortConditionMatcher,
    target_event: TargetEventConditionMatcher,
}

impl ConditionMatcherFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_matcher(&self, key_type: KeyType) -> &dyn ConditionMatcher {
        match key_type {
            KeyType::UserId | KeyType::UserProperty | KeyType::HackleProperty => &self.user,
            KeyType::EventProperty => &self.event,
            KeyType::Segment => &self.segment,
            KeyType::AbTest | KeyType::FeatureFlag => &self.experiment,
            KeyType::Cohort => &self.cohort,
            KeyType::NumberOfEventsInDays => &self.target_event,
        }
    }
}
