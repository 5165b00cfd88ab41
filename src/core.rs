use std::sync::{Arc, RwLock};

use log::{debug, error};

use crate::decision::{Decision, FeatureFlagDecision, InAppMessageDecision, RemoteConfigDecision};
use crate::eval::{Evaluator, EvaluatorContext};
use crate::experiment::{ExperimentRequest, DEFAULT_VARIATION_KEY};
use crate::in_app_message::InAppMessageEligibilityRequest;
use crate::reason::DecisionReason;
use crate::remote_config::RemoteConfigRequest;
use crate::user::HackleUser;
use crate::value::HackleValue;
use crate::workspace::Workspace;

/// HackleCore is the decision surface handed to applications.
///
/// It never fails: a missing workspace, an unknown key or an evaluation error all degrade to the
/// caller's default with a [DecisionReason] saying why. The workspace can be replaced at any
/// time; calls already running keep the snapshot they started with.
pub struct HackleCore {
    evaluator: Evaluator,
    workspace: RwLock<Option<Arc<Workspace>>>,
}

impl HackleCore {
    pub fn new(evaluator: Evaluator) -> Self {
        HackleCore {
            evaluator,
            workspace: RwLock::new(None),
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Replaces the workspace snapshot used by subsequent calls.
    pub fn set_workspace(&self, workspace: Workspace) {
        let workspace = Some(Arc::new(workspace));
        match self.workspace.write() {
            Ok(mut guard) => *guard = workspace,
            Err(poisoned) => *poisoned.into_inner() = workspace,
        }
        debug!("workspace replaced");
    }

    pub fn workspace(&self) -> Option<Arc<Workspace>> {
        match self.workspace.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Decides the variation of the A/B test `experiment_key` for `user`.
    pub fn experiment(
        &self,
        experiment_key: i64,
        user: &HackleUser,
        default_variation_key: &str,
    ) -> Decision {
        let workspace = match self.workspace() {
            Some(workspace) => workspace,
            None => return Decision::of(default_variation_key, DecisionReason::SdkNotReady),
        };
        let experiment = match workspace.get_experiment(experiment_key) {
            Some(experiment) => experiment,
            None => {
                return Decision::of(default_variation_key, DecisionReason::ExperimentNotFound)
            }
        };

        let request = ExperimentRequest::of(&workspace, user, experiment, default_variation_key);
        let mut context = EvaluatorContext::new();
        match self.evaluator.evaluate_experiment(&request, &mut context) {
            Ok(evaluation) => Decision {
                variation: evaluation.variation_key,
                reason: evaluation.reason,
                config: evaluation.config.cloned(),
                properties: context.properties().clone(),
            },
            Err(e) => {
                error!("Unexpected exception while deciding experiment[{}]: {}", experiment_key, e);
                Decision::of(default_variation_key, DecisionReason::Exception)
            }
        }
    }

    /// Decides every A/B test of the workspace for `user`, ordered by experiment key.
    pub fn experiments(&self, user: &HackleUser) -> Vec<(i64, Decision)> {
        let workspace = match self.workspace() {
            Some(workspace) => workspace,
            None => return Vec::new(),
        };
        let mut keys: Vec<i64> = workspace.experiments().map(|e| e.key).collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|key| (key, self.experiment(key, user, DEFAULT_VARIATION_KEY)))
            .collect()
    }

    /// Decides whether the feature flag `feature_key` is on for `user`.
    pub fn feature_flag(&self, feature_key: i64, user: &HackleUser) -> FeatureFlagDecision {
        let workspace = match self.workspace() {
            Some(workspace) => workspace,
            None => return FeatureFlagDecision::off(DecisionReason::SdkNotReady),
        };
        let feature_flag = match workspace.get_feature_flag(feature_key) {
            Some(feature_flag) => feature_flag,
            None => return FeatureFlagDecision::off(DecisionReason::FeatureFlagNotFound),
        };

        let request = ExperimentRequest::of(&workspace, user, feature_flag, DEFAULT_VARIATION_KEY);
        let mut context = EvaluatorContext::new();
        match self.evaluator.evaluate_experiment(&request, &mut context) {
            Ok(evaluation) => FeatureFlagDecision {
                is_on: evaluation.is_on(),
                reason: evaluation.reason,
                config: evaluation.config.cloned(),
                properties: context.properties().clone(),
            },
            Err(e) => {
                error!("Unexpected exception while deciding feature flag[{}]: {}", feature_key, e);
                FeatureFlagDecision::off(DecisionReason::Exception)
            }
        }
    }

    /// Resolves the remote config parameter `parameter_key` for `user`. `default_value` is
    /// returned when the parameter cannot be resolved to a value of the same type.
    pub fn remote_config(
        &self,
        parameter_key: &str,
        user: &HackleUser,
        default_value: impl Into<HackleValue>,
    ) -> RemoteConfigDecision {
        let default_value = default_value.into();
        let workspace = match self.workspace() {
            Some(workspace) => workspace,
            None => return RemoteConfigDecision::of(default_value, DecisionReason::SdkNotReady),
        };
        let parameter = match workspace.get_remote_config_parameter(parameter_key) {
            Some(parameter) => parameter,
            None => {
                return RemoteConfigDecision::of(
                    default_value,
                    DecisionReason::RemoteConfigParameterNotFound,
                )
            }
        };

        let request = RemoteConfigRequest::of(&workspace, user, parameter, default_value.clone());
        match self
            .evaluator
            .evaluate_remote_config(&request, &mut EvaluatorContext::new())
        {
            Ok(evaluation) => RemoteConfigDecision {
                value: evaluation.value,
                reason: evaluation.reason,
                properties: evaluation.properties,
            },
            Err(e) => {
                error!("Unexpected exception while deciding remote config parameter[{}]: {}", parameter_key, e);
                RemoteConfigDecision::of(default_value, DecisionReason::Exception)
            }
        }
    }

    /// Decides whether the in-app message `in_app_message_key`, triggered at `timestamp`, may be
    /// shown to `user`.
    pub fn in_app_message_trigger(
        &self,
        in_app_message_key: i64,
        user: &HackleUser,
        timestamp: i64,
    ) -> InAppMessageDecision {
        self.in_app_message(in_app_message_key, user, timestamp, None)
    }

    /// Decides whether a triggered in-app message may still be delivered at `timestamp`.
    pub fn in_app_message_deliver(
        &self,
        in_app_message_key: i64,
        user: &HackleUser,
        timestamp: i64,
        re_evaluate: bool,
    ) -> InAppMessageDecision {
        self.in_app_message(in_app_message_key, user, timestamp, Some(re_evaluate))
    }

    // `deliver` is `None` for a trigger and carries `re_evaluate` for a delivery.
    fn in_app_message(
        &self,
        in_app_message_key: i64,
        user: &HackleUser,
        timestamp: i64,
        deliver: Option<bool>,
    ) -> InAppMessageDecision {
        let workspace = match self.workspace() {
            Some(workspace) => workspace,
            None => return InAppMessageDecision::ineligible(DecisionReason::SdkNotReady),
        };
        let in_app_message = match workspace.get_in_app_message(in_app_message_key) {
            Some(in_app_message) => in_app_message,
            None => return InAppMessageDecision::ineligible(DecisionReason::InAppMessageNotFound),
        };

        let request = InAppMessageEligibilityRequest::of(&workspace, user, in_app_message, timestamp);
        let mut context = EvaluatorContext::new();
        let evaluation = match deliver {
            None => self
                .evaluator
                .evaluate_in_app_message_trigger(&request, &mut context),
            Some(re_evaluate) => {
                self.evaluator
                    .evaluate_in_app_message_deliver(&request, &mut context, re_evaluate)
            }
        };
        match evaluation {
            Ok(evaluation) => InAppMessageDecision {
                is_eligible: evaluation.is_eligible,
                reason: evaluation.reason,
                message_lang: evaluation
                    .layout_evaluation
                    .map(|layout| layout.message.lang.clone()),
                properties: evaluation.properties,
            },
            Err(e) => {
                error!("Unexpected exception while deciding in-app message[{}]: {}", in_app_message_key, e);
                InAppMessageDecision::ineligible(DecisionReason::Exception)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::bucketing;
    use crate::test_common::{
        test_evaluator, test_workspace, test_workspace_from, AB_TEST_KEY, FEATURE_FLAG_KEY,
        IN_APP_MESSAGE_KEY,
    };
    use serde_json::json;
    use spectral::prelude::*;

    fn ready_core() -> HackleCore {
        let core = HackleCore::new(test_evaluator());
        core.set_workspace(test_workspace());
        core
    }

    fn user(id: &str) -> HackleUser {
        HackleUser::builder().id(id).build()
    }

    #[test]
    fn not_ready_without_a_workspace() {
        let core = HackleCore::new(test_evaluator());
        let user = user("u1");

        let decision = core.experiment(AB_TEST_KEY, &user, "A");
        assert_that!(decision.reason).is_equal_to(DecisionReason::SdkNotReady);
        assert_that!(decision.variation.as_str()).is_equal_to("A");

        assert_that!(core.feature_flag(FEATURE_FLAG_KEY, &user).reason)
            .is_equal_to(DecisionReason::SdkNotReady);
        assert_that!(core.remote_config("banner", &user, "x").value)
            .is_equal_to(HackleValue::from("x"));
        assert_that!(core.in_app_message_trigger(IN_APP_MESSAGE_KEY, &user, 0).reason)
            .is_equal_to(DecisionReason::SdkNotReady);
        assert_that!(core.experiments(&user)).is_empty();
    }

    #[test]
    fn unknown_keys() {
        let core = ready_core();
        let user = user("u1");

        asserting!("experiment")
            .that(&core.experiment(404, &user, "C"))
            .is_equal_to(Decision::of("C", DecisionReason::ExperimentNotFound));
        asserting!("feature flag")
            .that(&core.feature_flag(404, &user))
            .is_equal_to(FeatureFlagDecision::off(DecisionReason::FeatureFlagNotFound));
        asserting!("remote config")
            .that(&core.remote_config("missing", &user, 7))
            .is_equal_to(RemoteConfigDecision::of(
                HackleValue::Int(7),
                DecisionReason::RemoteConfigParameterNotFound,
            ));
        asserting!("in-app message")
            .that(&core.in_app_message_deliver(404, &user, 0, true))
            .is_equal_to(InAppMessageDecision::ineligible(DecisionReason::InAppMessageNotFound));
    }

    #[test]
    fn experiment_decisions_are_stable_and_follow_the_bucket() {
        let core = ready_core();
        let user = user("u1");
        let workspace = core.workspace().unwrap();
        let experiment = workspace.get_experiment(AB_TEST_KEY).unwrap();
        let bucket = match experiment.default_rule {
            crate::variation::Action::Bucket(bucket_id) => workspace.get_bucket(bucket_id).unwrap(),
            other => panic!("unexpected default rule {:?}", other),
        };
        let slot = bucketing(bucket, "u1").unwrap().unwrap();
        let expected = experiment.get_variation(slot.variation_id).unwrap().key.clone();

        for _ in 0..10 {
            let decision = core.experiment(AB_TEST_KEY, &user, "A");
            assert_that!(decision.variation).is_equal_to(expected.clone());
            assert_that!(decision.reason).is_equal_to(DecisionReason::TrafficAllocated);
        }
    }

    #[test]
    fn feature_flag_carries_its_config() {
        let core = ready_core();
        let decision = core.feature_flag(FEATURE_FLAG_KEY, &user("u1"));

        assert!(decision.is_on);
        assert_that!(decision.reason).is_equal_to(DecisionReason::DefaultRule);
        assert_that!(decision.get_string("color", "none")).is_equal_to("red".to_string());
    }

    #[test]
    fn evaluation_errors_become_exceptions() {
        let core = HackleCore::new(test_evaluator());
        core.set_workspace(test_workspace_from(json!({
            "experiments": [{
                "id": 1, "key": 1, "status": "RUNNING", "identifierType": "$id", "version": 1,
                "variations": [{"id": 11, "key": "A", "status": "ACTIVE"}],
                "execution": {
                    "status": "RUNNING", "version": 1,
                    "defaultRule": {"type": "BUCKET", "bucketId": 404}
                }
            }]
        })));

        let decision = core.experiment(1, &user("u1"), "B");
        assert_that!(decision.reason).is_equal_to(DecisionReason::Exception);
        assert_that!(decision.variation.as_str()).is_equal_to("B");
    }

    #[test]
    fn in_app_message_trigger_resolves_the_language() {
        let core = ready_core();
        let decision = core.in_app_message_trigger(IN_APP_MESSAGE_KEY, &user("u1"), 0);

        assert!(decision.is_eligible);
        assert_that!(decision.reason).is_equal_to(DecisionReason::InAppMessageTarget);
        assert_that!(decision.message_lang).contains_value("ko".to_string());
    }

    #[test]
    fn swapping_the_workspace_keeps_held_snapshots() {
        let core = ready_core();
        let held = core.workspace().unwrap();

        core.set_workspace(test_workspace_from(json!({})));

        assert_that!(held.get_experiment(AB_TEST_KEY)).is_some();
        assert_that!(core.experiment(AB_TEST_KEY, &user("u1"), "A").reason)
            .is_equal_to(DecisionReason::ExperimentNotFound);
    }

    #[test]
    fn lists_every_experiment() {
        let core = ready_core();
        let decisions = core.experiments(&user("u1"));
        assert_that!(decisions.iter().map(|(key, _)| *key).collect::<Vec<_>>())
            .is_equal_to(vec![AB_TEST_KEY]);
    }
}
