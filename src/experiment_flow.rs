use log::debug;

use crate::bucket::bucketing;
use crate::error::{Error, Result};
use crate::eval::{Evaluator, EvaluatorContext};
use crate::experiment::{
    Container, ExperimentEvaluation, ExperimentRequest, ExperimentStatus, ExperimentType,
};
use crate::flow::{evaluate_next, EvaluationFlow, FlowEvaluator};
use crate::overrides::resolve_override;
use crate::reason::DecisionReason;
use crate::rule::TargetRule;
use crate::variation::resolve_action;

/// The steps an experiment evaluation is made of. A/B tests and feature flags run the same steps
/// in different orders; see [ExperimentFlowStep::ab_test_flow] and
/// [ExperimentFlowStep::feature_flag_flow].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentFlowStep {
    Override,
    Identifier,
    Container,
    ExperimentTarget,
    Draft,
    Paused,
    Completed,
    TrafficAllocate,
    TargetRule,
    DefaultRule,
}

impl ExperimentFlowStep {
    pub fn ab_test_flow() -> EvaluationFlow<Self> {
        use ExperimentFlowStep::*;
        EvaluationFlow::of(vec![
            Override,
            Identifier,
            Container,
            ExperimentTarget,
            Draft,
            Paused,
            Completed,
            TrafficAllocate,
        ])
    }

    pub fn feature_flag_flow() -> EvaluationFlow<Self> {
        use ExperimentFlowStep::*;
        EvaluationFlow::of(vec![
            Draft,
            Paused,
            Completed,
            Override,
            Identifier,
            TargetRule,
            DefaultRule,
        ])
    }
}

type Evaluation<'a> = Result<Option<ExperimentEvaluation<'a>>>;

impl FlowEvaluator for ExperimentFlowStep {
    type Request<'a> = ExperimentRequest<'a>;
    type Evaluation<'a> = ExperimentEvaluation<'a>;

    fn evaluate<'a>(
        &self,
        evaluator: &Evaluator,
        request: &ExperimentRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        next_flow: &[Self],
    ) -> Evaluation<'a> {
        match self {
            ExperimentFlowStep::Override => evaluate_override(evaluator, request, context, next_flow),
            ExperimentFlowStep::Identifier => {
                evaluate_identifier(evaluator, request, context, next_flow)
            }
            ExperimentFlowStep::Container => {
                evaluate_container(evaluator, request, context, next_flow)
            }
            ExperimentFlowStep::ExperimentTarget => {
                evaluate_experiment_target(evaluator, request, context, next_flow)
            }
            ExperimentFlowStep::Draft => evaluate_draft(evaluator, request, context, next_flow),
            ExperimentFlowStep::Paused => evaluate_paused(evaluator, request, context, next_flow),
            ExperimentFlowStep::Completed => {
                evaluate_completed(evaluator, request, context, next_flow)
            }
            ExperimentFlowStep::TrafficAllocate => evaluate_traffic_allocate(request, context),
            ExperimentFlowStep::TargetRule => {
                evaluate_target_rule(evaluator, request, context, next_flow)
            }
            ExperimentFlowStep::DefaultRule => evaluate_default_rule(request, context),
        }
    }
}

fn evaluate_override<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    match resolve_override(evaluator, request, context)? {
        Some(variation) => {
            let reason = match request.experiment.experiment_type {
                ExperimentType::AbTest => DecisionReason::Overridden,
                ExperimentType::FeatureFlag => DecisionReason::IndividualTargetMatch,
            };
            ExperimentEvaluation::of(request, context, variation, reason).map(Some)
        }
        None => evaluate_next(next_flow, evaluator, request, context),
    }
}

fn evaluate_identifier<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    if request
        .user
        .identifier(&request.experiment.identifier_type)
        .is_some()
    {
        return evaluate_next(next_flow, evaluator, request, context);
    }
    ExperimentEvaluation::of_default(request, context, DecisionReason::IdentifierNotFound)
        .map(Some)
}

fn evaluate_container<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    let container_id = match request.experiment.container_id {
        Some(id) => id,
        None => return evaluate_next(next_flow, evaluator, request, context),
    };
    let container = request
        .workspace
        .get_container(container_id)
        .ok_or(Error::ContainerNotFound(container_id))?;

    if is_user_in_container_group(request, container)? {
        evaluate_next(next_flow, evaluator, request, context)
    } else {
        ExperimentEvaluation::of_default(
            request,
            context,
            DecisionReason::NotInMutualExclusionExperiment,
        )
        .map(Some)
    }
}

fn is_user_in_container_group(request: &ExperimentRequest, container: &Container) -> Result<bool> {
    let bucket = request
        .workspace
        .get_bucket(container.bucket_id)
        .ok_or(Error::BucketNotFound(container.bucket_id))?;
    let identifier = match request.user.identifier(&request.experiment.identifier_type) {
        Some(identifier) => identifier,
        None => return Ok(false),
    };
    let slot = match bucketing(bucket, identifier)? {
        Some(slot) => slot,
        None => return Ok(false),
    };
    // container slots point at group ids
    match container.get_group(slot.variation_id) {
        Some(group) => Ok(group.experiments.contains(&request.experiment.id)),
        None => {
            debug!(
                "container {} has no group {}",
                container.id, slot.variation_id
            );
            Ok(false)
        }
    }
}

fn evaluate_experiment_target<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    let audiences = &request.experiment.target_audiences;
    let in_target =
        audiences.is_empty() || evaluator.any_target_matches(request, context, audiences)?;

    if in_target {
        evaluate_next(next_flow, evaluator, request, context)
    } else {
        ExperimentEvaluation::of_default(request, context, DecisionReason::NotInExperimentTarget)
            .map(Some)
    }
}

fn evaluate_draft<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    if request.experiment.status == ExperimentStatus::Draft {
        return ExperimentEvaluation::of_default(request, context, DecisionReason::ExperimentDraft)
            .map(Some);
    }
    evaluate_next(next_flow, evaluator, request, context)
}

fn evaluate_paused<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    if request.experiment.status == ExperimentStatus::Paused {
        let reason = match request.experiment.experiment_type {
            ExperimentType::AbTest => DecisionReason::ExperimentPaused,
            ExperimentType::FeatureFlag => DecisionReason::FeatureFlagInactive,
        };
        return ExperimentEvaluation::of_default(request, context, reason).map(Some);
    }
    evaluate_next(next_flow, evaluator, request, context)
}

fn evaluate_completed<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    if request.experiment.status == ExperimentStatus::Completed {
        let winner = request
            .experiment
            .winner_variation()
            .ok_or(Error::WinnerVariationNotFound(request.experiment.id))?;
        return ExperimentEvaluation::of(
            request,
            context,
            winner,
            DecisionReason::ExperimentCompleted,
        )
        .map(Some);
    }
    evaluate_next(next_flow, evaluator, request, context)
}

fn evaluate_traffic_allocate<'a>(
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Evaluation<'a> {
    let experiment = request.experiment;
    let variation = match resolve_action(
        request.workspace,
        experiment,
        request.user,
        &experiment.default_rule,
    )? {
        Some(variation) => variation,
        None => {
            return ExperimentEvaluation::of_default(
                request,
                context,
                DecisionReason::TrafficNotAllocated,
            )
            .map(Some)
        }
    };

    if variation.is_dropped {
        return ExperimentEvaluation::of_default(request, context, DecisionReason::VariationDropped)
            .map(Some);
    }

    ExperimentEvaluation::of(request, context, variation, DecisionReason::TrafficAllocated)
        .map(Some)
}

fn evaluate_target_rule<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
    next_flow: &[ExperimentFlowStep],
) -> Evaluation<'a> {
    let rule = match determine_target_rule(evaluator, request, context)? {
        Some(rule) => rule,
        None => return evaluate_next(next_flow, evaluator, request, context),
    };

    let variation = resolve_action(request.workspace, request.experiment, request.user, &rule.action)?
        .ok_or(Error::VariationNotDecided(request.experiment.id))?;
    ExperimentEvaluation::of(request, context, variation, DecisionReason::TargetRuleMatch).map(Some)
}

fn determine_target_rule<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Result<Option<&'a TargetRule>> {
    for rule in &request.experiment.target_rules {
        if evaluator.target_matches(request, context, &rule.target)? {
            return Ok(Some(rule));
        }
    }
    Ok(None)
}

fn evaluate_default_rule<'a>(
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Evaluation<'a> {
    let experiment = request.experiment;
    let variation = resolve_action(
        request.workspace,
        experiment,
        request.user,
        &experiment.default_rule,
    )?
    .ok_or(Error::VariationNotDecided(experiment.id))?;
    ExperimentEvaluation::of(request, context, variation, DecisionReason::DefaultRule).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Experiment;
    use crate::test_common::{test_evaluator, test_workspace_from};
    use crate::user::HackleUser;
    use crate::workspace::Workspace;
    use serde_json::{json, Value};
    use spectral::prelude::*;
    use test_case::test_case;

    fn ab_test(id: i64, status: &str, overrides: Value) -> Value {
        let mut experiment = json!({
            "id": id, "key": id, "status": status, "identifierType": "$id", "version": 1,
            "bucketId": 1,
            "variations": [
                {"id": id * 10 + 1, "key": "A", "status": "ACTIVE"},
                {"id": id * 10 + 2, "key": "B", "status": "ACTIVE"}
            ],
            "winnerVariationId": id * 10 + 2,
            "execution": {
                "status": status, "version": 1, "userOverrides": [], "segmentOverrides": [],
                "targetAudiences": [], "targetRules": [],
                "defaultRule": {"type": "BUCKET", "bucketId": 1}
            }
        });
        if let (Some(target), Some(source)) = (experiment.as_object_mut(), overrides.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        experiment
    }

    fn all_b_bucket(id: i64, variation_id: i64) -> Value {
        json!({"id": id, "seed": 7, "slotSize": 10000, "slots": [
            {"startInclusive": 0, "endExclusive": 10000, "variationId": variation_id}
        ]})
    }

    fn evaluate_on<'a>(
        workspace: &'a Workspace,
        user: &'a HackleUser,
        experiment: &'a Experiment,
    ) -> Result<ExperimentEvaluation<'a>> {
        let request = ExperimentRequest::of(workspace, user, experiment, "A");
        test_evaluator().evaluate_experiment(&request, &mut EvaluatorContext::new())
    }

    #[test_case("READY", DecisionReason::ExperimentDraft, "A")]
    #[test_case("PAUSED", DecisionReason::ExperimentPaused, "A")]
    #[test_case("STOPPED", DecisionReason::ExperimentCompleted, "B")]
    #[test_case("RUNNING", DecisionReason::TrafficAllocated, "B")]
    fn ab_test_status_gates(status: &str, reason: DecisionReason, variation_key: &str) {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, status, json!({}))],
            "buckets": [all_b_bucket(1, 12)]
        }));
        let user = HackleUser::builder().id("u1").build();

        let evaluation =
            evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap()).unwrap();
        assert_that!(evaluation.reason).is_equal_to(reason);
        assert_that!(evaluation.variation_key.as_str()).is_equal_to(variation_key);
    }

    #[test]
    fn missing_identifier_is_not_an_error() {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, "RUNNING", json!({}))],
            "buckets": [all_b_bucket(1, 12)]
        }));
        let user = HackleUser::builder().device_id("d1").build();

        let evaluation =
            evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap()).unwrap();
        assert_that!(evaluation.reason).is_equal_to(DecisionReason::IdentifierNotFound);
        assert_that!(evaluation.variation_key.as_str()).is_equal_to("A");
    }

    #[test]
    fn completed_without_winner_is_an_error() {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, "STOPPED", json!({"winnerVariationId": null}))],
            "buckets": [all_b_bucket(1, 12)]
        }));
        let user = HackleUser::builder().id("u1").build();

        let result = evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap());
        assert!(matches!(result, Err(Error::WinnerVariationNotFound(1))));
    }

    #[test]
    fn empty_slot_is_not_allocated() {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, "RUNNING", json!({}))],
            "buckets": [{"id": 1, "seed": 7, "slotSize": 10000, "slots": []}]
        }));
        let user = HackleUser::builder().id("u1").build();

        let evaluation =
            evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap()).unwrap();
        assert_that!(evaluation.reason).is_equal_to(DecisionReason::TrafficNotAllocated);
    }

    #[test]
    fn dropped_variation_is_never_served() {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, "RUNNING", json!({
                "variations": [
                    {"id": 11, "key": "A", "status": "ACTIVE"},
                    {"id": 12, "key": "B", "status": "DROPPED"}
                ]
            }))],
            "buckets": [all_b_bucket(1, 12)]
        }));
        let user = HackleUser::builder().id("u1").build();

        let evaluation =
            evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap()).unwrap();
        assert_that!(evaluation.reason).is_equal_to(DecisionReason::VariationDropped);
        assert_that!(evaluation.variation_key.as_str()).is_equal_to("A");
    }

    #[test]
    fn audiences_gate_the_test() {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, "RUNNING", json!({"execution": {
                "status": "RUNNING", "version": 1, "userOverrides": [], "segmentOverrides": [],
                "targetAudiences": [{"conditions": [{
                    "key": {"type": "USER_PROPERTY", "name": "age"},
                    "match": {"type": "MATCH", "operator": "GTE", "valueType": "NUMBER", "values": [20]}
                }]}],
                "targetRules": [],
                "defaultRule": {"type": "BUCKET", "bucketId": 1}
            }}))],
            "buckets": [all_b_bucket(1, 12)]
        }));
        let experiment = workspace.get_experiment(1).unwrap();

        let adult = HackleUser::builder().id("u1").property("age", 30).build();
        let child = HackleUser::builder().id("u2").property("age", 10).build();

        assert_that!(evaluate_on(&workspace, &adult, experiment).unwrap().reason)
            .is_equal_to(DecisionReason::TrafficAllocated);
        assert_that!(evaluate_on(&workspace, &child, experiment).unwrap().reason)
            .is_equal_to(DecisionReason::NotInExperimentTarget);
    }

    #[test]
    fn container_excludes_users_of_other_groups() {
        let workspace = test_workspace_from(json!({
            "experiments": [
                ab_test(1, "RUNNING", json!({"containerId": 100})),
                ab_test(2, "RUNNING", json!({"containerId": 100}))
            ],
            "buckets": [
                all_b_bucket(1, 12),
                {"id": 100, "seed": 3, "slotSize": 10000, "slots": [
                    {"startInclusive": 0, "endExclusive": 10000, "variationId": 1000}
                ]}
            ],
            "containers": [{"id": 100, "bucketId": 100, "groups": [
                {"id": 1000, "experiments": [1]},
                {"id": 1001, "experiments": [2]}
            ]}]
        }));
        let user = HackleUser::builder().id("u1").build();

        let first = evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap()).unwrap();
        let second =
            evaluate_on(&workspace, &user, workspace.get_experiment(2).unwrap()).unwrap();
        assert_that!(first.reason).is_equal_to(DecisionReason::TrafficAllocated);
        assert_that!(second.reason).is_equal_to(DecisionReason::NotInMutualExclusionExperiment);
    }

    #[test]
    fn missing_container_is_an_error() {
        let workspace = test_workspace_from(json!({
            "experiments": [ab_test(1, "RUNNING", json!({"containerId": 404}))],
            "buckets": [all_b_bucket(1, 12)]
        }));
        let user = HackleUser::builder().id("u1").build();

        let result = evaluate_on(&workspace, &user, workspace.get_experiment(1).unwrap());
        assert!(matches!(result, Err(Error::ContainerNotFound(404))));
    }

    fn feature_flag(status: &str) -> Value {
        json!({
            "id": 9, "key": 9, "status": status, "identifierType": "$id", "version": 1,
            "bucketId": 1,
            "variations": [
                {"id": 91, "key": "A", "status": "ACTIVE"},
                {"id": 92, "key": "B", "status": "ACTIVE"}
            ],
            "execution": {
                "status": status, "version": 1,
                "userOverrides": [{"userId": "tester", "variationId": 92}],
                "segmentOverrides": [],
                "targetAudiences": [],
                "targetRules": [{
                    "target": {"conditions": [{
                        "key": {"type": "USER_PROPERTY", "name": "beta"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "BOOLEAN", "values": [true]}
                    }]},
                    "action": {"type": "VARIATION", "variationId": 92}
                }],
                "defaultRule": {"type": "VARIATION", "variationId": 91}
            }
        })
    }

    #[test_case(HackleUser::builder().id("tester").build(), DecisionReason::IndividualTargetMatch, true)]
    #[test_case(HackleUser::builder().id("u1").property("beta", true).build(), DecisionReason::TargetRuleMatch, true)]
    #[test_case(HackleUser::builder().id("u1").build(), DecisionReason::DefaultRule, false)]
    #[test_case(HackleUser::builder().device_id("d1").property("beta", true).build(), DecisionReason::IdentifierNotFound, false)]
    fn feature_flag_rules(user: HackleUser, reason: DecisionReason, is_on: bool) {
        let workspace = test_workspace_from(json!({
            "featureFlags": [feature_flag("RUNNING")],
            "buckets": [all_b_bucket(1, 91)]
        }));

        let evaluation =
            evaluate_on(&workspace, &user, workspace.get_feature_flag(9).unwrap()).unwrap();
        assert_that!(evaluation.reason).is_equal_to(reason);
        assert_that!(evaluation.is_on()).is_equal_to(is_on);
    }

    #[test]
    fn paused_feature_flag_is_inactive_even_for_overridden_users() {
        let workspace = test_workspace_from(json!({
            "featureFlags": [feature_flag("PAUSED")],
            "buckets": [all_b_bucket(1, 91)]
        }));
        let user = HackleUser::builder().id("tester").build();

        let evaluation =
            evaluate_on(&workspace, &user, workspace.get_feature_flag(9).unwrap()).unwrap();
        assert_that!(evaluation.reason).is_equal_to(DecisionReason::FeatureFlagInactive);
        assert!(!evaluation.is_on());
    }

    #[test]
    fn feature_flag_bucket_rule_must_decide() {
        let mut flag = feature_flag("RUNNING");
        flag["execution"]["defaultRule"] = json!({"type": "BUCKET", "bucketId": 1});
        let workspace = test_workspace_from(json!({
            "featureFlags": [flag],
            "buckets": [{"id": 1, "seed": 7, "slotSize": 10000, "slots": []}]
        }));
        let user = HackleUser::builder().id("u1").build();

        let result = evaluate_on(&workspace, &user, workspace.get_feature_flag(9).unwrap());
        assert!(matches!(result, Err(Error::VariationNotDecided(9))));
    }

    #[test]
    fn flows_have_the_documented_order() {
        use ExperimentFlowStep::*;
        assert_that!(ExperimentFlowStep::ab_test_flow().steps().to_vec()).is_equal_to(vec![
            Override,
            Identifier,
            Container,
            ExperimentTarget,
            Draft,
            Paused,
            Completed,
            TrafficAllocate,
        ]);
        assert_that!(ExperimentFlowStep::feature_flag_flow().steps().first().copied())
            .contains_value(Draft);
    }
}
