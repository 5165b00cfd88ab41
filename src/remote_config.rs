use serde_json::{Map, Value};

use crate::bucket::bucketing;
use crate::error::{Error, Result};
use crate::eval::{Evaluator, EvaluatorContext, EvaluatorKey, EvaluatorRequest, EvaluatorType};
use crate::experiment::ExperimentEvaluation;
use crate::reason::DecisionReason;
use crate::rule::Target;
use crate::user::HackleUser;
use crate::value::{HackleValue, HackleValueType};
use crate::workspace::Workspace;

/// A remote config parameter: a keyed value served per user through target rules.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigParameter {
    pub id: i64,
    pub key: String,
    pub value_type: HackleValueType,
    pub identifier_type: String,
    pub target_rules: Vec<RemoteConfigTargetRule>,
    pub default_value: RemoteConfigValue,
}

/// Serves `value` to users matching `target` who also land in a slot of `bucket_id`.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigTargetRule {
    pub key: String,
    pub name: String,
    pub target: Target,
    pub bucket_id: i64,
    pub value: RemoteConfigValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigValue {
    pub id: i64,
    pub value: HackleValue,
}

pub struct RemoteConfigRequest<'a> {
    pub workspace: &'a Workspace,
    pub user: &'a HackleUser,
    pub parameter: &'a RemoteConfigParameter,
    /// Returned on a type mismatch. Its type is the type the caller expects.
    pub default_value: HackleValue,
}

impl<'a> RemoteConfigRequest<'a> {
    pub fn of(
        workspace: &'a Workspace,
        user: &'a HackleUser,
        parameter: &'a RemoteConfigParameter,
        default_value: impl Into<HackleValue>,
    ) -> Self {
        RemoteConfigRequest {
            workspace,
            user,
            parameter,
            default_value: default_value.into(),
        }
    }
}

impl<'a> EvaluatorRequest<'a> for RemoteConfigRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::new(EvaluatorType::RemoteConfig, self.parameter.id)
    }

    fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RemoteConfigEvaluation<'a> {
    pub reason: DecisionReason,
    pub target_evaluations: Vec<ExperimentEvaluation<'a>>,
    pub parameter: &'a RemoteConfigParameter,
    /// `None` when the caller default was returned.
    pub value_id: Option<i64>,
    pub value: HackleValue,
    pub properties: Map<String, Value>,
}

impl Evaluator {
    /// Evaluates a remote config parameter.
    ///
    /// The first target rule whose target matches and whose bucket has a slot for the user wins;
    /// otherwise the parameter's default value is served. A served value whose type differs from
    /// the caller default's is replaced by the caller default.
    pub fn evaluate_remote_config<'a>(
        &self,
        request: &RemoteConfigRequest<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<RemoteConfigEvaluation<'a>> {
        self.in_context(request.key(), context, |context| {
            let requested_type = request.default_value.value_type();
            context.set_property("requestValueType", requested_type.as_str());
            context.set_property("requestDefaultValue", request.default_value.clone());

            let (mut value_id, mut value, mut reason) = self.serve_remote_config(request, context)?;

            if value.value_type() != requested_type {
                value_id = None;
                value = request.default_value.clone();
                reason = DecisionReason::TypeMismatch;
            }
            context.set_property("returnValue", value.clone());

            Ok(RemoteConfigEvaluation {
                reason,
                target_evaluations: context.target_evaluations().to_vec(),
                parameter: request.parameter,
                value_id,
                value,
                properties: context.properties().clone(),
            })
        })
    }

    fn serve_remote_config<'a>(
        &self,
        request: &RemoteConfigRequest<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<(Option<i64>, HackleValue, DecisionReason)> {
        let parameter = request.parameter;
        let default_value = &parameter.default_value;

        let identifier = match request.user.identifier(&parameter.identifier_type) {
            Some(identifier) => identifier,
            None => {
                return Ok((
                    None,
                    request.default_value.clone(),
                    DecisionReason::IdentifierNotFound,
                ))
            }
        };

        for rule in &parameter.target_rules {
            if !self.target_matches(request, context, &rule.target)? {
                continue;
            }
            let bucket = request
                .workspace
                .get_bucket(rule.bucket_id)
                .ok_or(Error::BucketNotFound(rule.bucket_id))?;
            if bucketing(bucket, identifier)?.is_none() {
                continue;
            }
            context.set_property("targetRuleKey", rule.key.as_str());
            context.set_property("targetRuleName", rule.name.as_str());
            return Ok((
                Some(rule.value.id),
                rule.value.value.clone(),
                DecisionReason::TargetRuleMatch,
            ));
        }

        Ok((
            Some(default_value.id),
            default_value.value.clone(),
            DecisionReason::DefaultRule,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{test_evaluator, test_workspace_from};
    use assert_json_diff::assert_json_eq;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    // "banner" serves "vip" to gold users in bucket 1 (full), "beta" to testers in bucket 2
    // (empty), and "plain" otherwise.
    fn workspace() -> Workspace {
        test_workspace_from(json!({
            "buckets": [
                {"id": 1, "seed": 1, "slotSize": 10000, "slots": [
                    {"startInclusive": 0, "endExclusive": 10000, "variationId": 1}
                ]},
                {"id": 2, "seed": 1, "slotSize": 10000, "slots": []}
            ],
            "remoteConfigParameters": [{
                "id": 7, "key": "banner", "type": "STRING", "identifierType": "$id",
                "targetRules": [
                    {
                        "key": "beta-rule", "name": "beta testers",
                        "target": {"conditions": [{
                            "key": {"type": "USER_PROPERTY", "name": "beta"},
                            "match": {"type": "MATCH", "operator": "IN", "valueType": "BOOLEAN", "values": [true]}
                        }]},
                        "bucketId": 2,
                        "value": {"id": 72, "value": "beta"}
                    },
                    {
                        "key": "vip-rule", "name": "gold members",
                        "target": {"conditions": [{
                            "key": {"type": "USER_PROPERTY", "name": "grade"},
                            "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["gold"]}
                        }]},
                        "bucketId": 1,
                        "value": {"id": 71, "value": "vip"}
                    }
                ],
                "defaultValue": {"id": 70, "value": "plain"}
            }]
        }))
    }

    fn evaluate(user: &HackleUser, default_value: HackleValue) -> (Option<i64>, HackleValue, DecisionReason) {
        let workspace = workspace();
        let parameter = workspace.get_remote_config_parameter("banner").unwrap();
        let request = RemoteConfigRequest::of(&workspace, user, parameter, default_value);
        let evaluation = test_evaluator()
            .evaluate_remote_config(&request, &mut EvaluatorContext::new())
            .unwrap();
        (evaluation.value_id, evaluation.value, evaluation.reason)
    }

    #[test_case(HackleUser::builder().id("u1").property("grade", "gold").build(), Some(71), "vip", DecisionReason::TargetRuleMatch)]
    #[test_case(HackleUser::builder().id("u1").build(), Some(70), "plain", DecisionReason::DefaultRule)]
    fn serves_by_rule(user: HackleUser, value_id: Option<i64>, value: &str, reason: DecisionReason) {
        let (actual_id, actual_value, actual_reason) = evaluate(&user, "fallback".into());
        assert_that!(actual_id).is_equal_to(value_id);
        assert_that!(actual_value).is_equal_to(HackleValue::from(value));
        assert_that!(actual_reason).is_equal_to(reason);
    }

    #[test]
    fn matching_target_with_a_missed_bucket_falls_through() {
        let user = HackleUser::builder()
            .id("u1")
            .property("beta", true)
            .property("grade", "gold")
            .build();
        let (_, value, reason) = evaluate(&user, "fallback".into());
        assert_that!(value).is_equal_to(HackleValue::from("vip"));
        assert_that!(reason).is_equal_to(DecisionReason::TargetRuleMatch);

        let beta_only = HackleUser::builder().id("u1").property("beta", true).build();
        let (_, value, reason) = evaluate(&beta_only, "fallback".into());
        assert_that!(value).is_equal_to(HackleValue::from("plain"));
        assert_that!(reason).is_equal_to(DecisionReason::DefaultRule);
    }

    #[test]
    fn type_mismatch_returns_the_caller_default() {
        let user = HackleUser::builder().id("u1").build();
        let (value_id, value, reason) = evaluate(&user, HackleValue::Int(3));
        assert_that!(value_id).is_none();
        assert_that!(value).is_equal_to(HackleValue::Int(3));
        assert_that!(reason).is_equal_to(DecisionReason::TypeMismatch);
    }

    #[test]
    fn null_default_only_accepts_null() {
        let user = HackleUser::builder().id("u1").build();
        let (value_id, value, reason) = evaluate(&user, HackleValue::Null);
        assert_that!(value_id).is_none();
        assert_that!(value).is_equal_to(HackleValue::Null);
        assert_that!(reason).is_equal_to(DecisionReason::TypeMismatch);
    }

    #[test]
    fn missing_identifier_returns_the_caller_default() {
        let workspace = workspace();
        let parameter = workspace.get_remote_config_parameter("banner").unwrap();
        let user = HackleUser::builder()
            .device_id("d1")
            .property("grade", "gold")
            .build();
        let request = RemoteConfigRequest::of(&workspace, &user, parameter, "fallback");

        let evaluation = test_evaluator()
            .evaluate_remote_config(&request, &mut EvaluatorContext::new())
            .unwrap();

        assert_that!(evaluation.value_id).is_none();
        assert_that!(evaluation.value).is_equal_to(HackleValue::from("fallback"));
        assert_that!(evaluation.reason).is_equal_to(DecisionReason::IdentifierNotFound);
        assert_json_eq!(
            Value::Object(evaluation.properties),
            json!({
                "requestValueType": "STRING",
                "requestDefaultValue": "fallback",
                "returnValue": "fallback"
            })
        );
    }

    #[test]
    fn records_request_and_rule_properties() {
        let workspace = workspace();
        let parameter = workspace.get_remote_config_parameter("banner").unwrap();
        let user = HackleUser::builder().id("u1").property("grade", "gold").build();
        let request = RemoteConfigRequest::of(&workspace, &user, parameter, "fallback");

        let evaluation = test_evaluator()
            .evaluate_remote_config(&request, &mut EvaluatorContext::new())
            .unwrap();

        assert_json_eq!(
            Value::Object(evaluation.properties),
            json!({
                "requestValueType": "STRING",
                "requestDefaultValue": "fallback",
                "returnValue": "vip",
                "targetRuleKey": "vip-rule",
                "targetRuleName": "gold members"
            })
        );
    }

    #[test]
    fn missing_rule_bucket_is_an_error() {
        let workspace = test_workspace_from(json!({
            "remoteConfigParameters": [{
                "id": 1, "key": "p", "type": "NUMBER", "identifierType": "$id",
                "targetRules": [{
                    "key": "r", "name": "r",
                    "target": {"conditions": [{
                        "key": {"type": "USER_ID", "name": "$id"},
                        "match": {"type": "MATCH", "operator": "EXISTS", "valueType": "STRING", "values": []}
                    }]},
                    "bucketId": 404,
                    "value": {"id": 2, "value": 1}
                }],
                "defaultValue": {"id": 3, "value": 0}
            }]
        }));
        let parameter = workspace.get_remote_config_parameter("p").unwrap();
        let user = HackleUser::builder().id("u1").build();
        let request = RemoteConfigRequest::of(&workspace, &user, parameter, 0);

        let result = test_evaluator().evaluate_remote_config(&request, &mut EvaluatorContext::new());
        assert!(matches!(result, Err(Error::BucketNotFound(404))));
    }
}
