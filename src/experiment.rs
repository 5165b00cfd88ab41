use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::eval::{EvaluatorContext, EvaluatorKey, EvaluatorRequest, EvaluatorType};
use crate::reason::DecisionReason;
use crate::rule::{Target, TargetRule};
use crate::user::{HackleUser, UserEvent};
use crate::value::HackleValue;
use crate::variation::{Action, Variation};
use crate::workspace::Workspace;

/// The variation key every experiment falls back to.
pub const DEFAULT_VARIATION_KEY: &str = "A";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentType {
    AbTest,
    FeatureFlag,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

/// Experiment describes an A/B test or a feature flag. Both share the same shape and are told
/// apart by [Experiment::experiment_type].
#[derive(Clone, Debug, PartialEq)]
pub struct Experiment {
    pub id: i64,
    pub key: i64,
    pub name: Option<String>,
    pub experiment_type: ExperimentType,
    pub identifier_type: String,
    pub status: ExperimentStatus,
    pub version: i64,
    pub execution_version: i64,
    pub variations: Vec<Variation>,
    /// identifier -> variation id
    pub user_overrides: HashMap<String, i64>,
    pub segment_overrides: Vec<TargetRule>,
    pub target_audiences: Vec<Target>,
    pub target_rules: Vec<TargetRule>,
    pub default_rule: Action,
    pub container_id: Option<i64>,
    pub winner_variation_id: Option<i64>,
}

impl Experiment {
    pub fn get_variation(&self, variation_id: i64) -> Option<&Variation> {
        self.variations.iter().find(|v| v.id == variation_id)
    }

    pub fn get_variation_by_key(&self, variation_key: &str) -> Option<&Variation> {
        self.variations.iter().find(|v| v.key == variation_key)
    }

    pub fn winner_variation(&self) -> Option<&Variation> {
        self.winner_variation_id
            .and_then(|id| self.get_variation(id))
    }
}

/// A mutual exclusion group. Users are bucketed into exactly one of its groups and may only
/// take part in that group's experiments.
#[derive(Clone, Debug, PartialEq)]
pub struct Container {
    pub id: i64,
    pub bucket_id: i64,
    pub groups: Vec<ContainerGroup>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContainerGroup {
    pub id: i64,
    pub experiments: Vec<i64>,
}

impl Container {
    pub fn get_group(&self, group_id: i64) -> Option<&ContainerGroup> {
        self.groups.iter().find(|g| g.id == group_id)
    }
}

/// Remote parameters attached to a variation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterConfiguration {
    pub id: i64,
    pub parameters: HashMap<String, HackleValue>,
}

impl ParameterConfiguration {
    pub fn get(&self, key: &str) -> Option<&HackleValue> {
        self.parameters.get(key)
    }

    pub fn get_string(&self, key: &str, default_value: &str) -> String {
        match self.get(key) {
            Some(HackleValue::Str(s)) => s.clone(),
            _ => default_value.to_string(),
        }
    }

    pub fn get_f64(&self, key: &str, default_value: f64) -> f64 {
        match self.get(key) {
            Some(v @ (HackleValue::Int(_) | HackleValue::Double(_))) => {
                v.to_f64().unwrap_or(default_value)
            }
            _ => default_value,
        }
    }

    pub fn get_i64(&self, key: &str, default_value: i64) -> i64 {
        self.get(key)
            .and_then(HackleValue::to_i64)
            .unwrap_or(default_value)
    }

    pub fn get_bool(&self, key: &str, default_value: bool) -> bool {
        match self.get(key) {
            Some(HackleValue::Bool(b)) => *b,
            _ => default_value,
        }
    }
}

/// A request to evaluate one experiment or feature flag for one user.
#[derive(Clone, Debug)]
pub struct ExperimentRequest<'a> {
    pub workspace: &'a Workspace,
    pub user: &'a HackleUser,
    pub event: Option<&'a UserEvent>,
    pub experiment: &'a Experiment,
    pub default_variation_key: String,
}

impl<'a> ExperimentRequest<'a> {
    pub fn of(
        workspace: &'a Workspace,
        user: &'a HackleUser,
        experiment: &'a Experiment,
        default_variation_key: impl Into<String>,
    ) -> Self {
        ExperimentRequest {
            workspace,
            user,
            event: None,
            experiment,
            default_variation_key: default_variation_key.into(),
        }
    }

    /// A nested request, issued while evaluating `request`, for another experiment.
    pub fn requested_by(request: &dyn EvaluatorRequest<'a>, experiment: &'a Experiment) -> Self {
        ExperimentRequest {
            workspace: request.workspace(),
            user: request.user(),
            event: request.event(),
            experiment,
            default_variation_key: DEFAULT_VARIATION_KEY.to_string(),
        }
    }
}

impl<'a> EvaluatorRequest<'a> for ExperimentRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::new(EvaluatorType::Experiment, self.experiment.id)
    }

    fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }

    fn event(&self) -> Option<&'a UserEvent> {
        self.event
    }
}

/// The outcome of an experiment evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct ExperimentEvaluation<'a> {
    pub reason: DecisionReason,
    /// Experiments evaluated as conditions while producing this evaluation.
    pub target_evaluations: Vec<ExperimentEvaluation<'a>>,
    pub experiment: &'a Experiment,
    pub variation_id: Option<i64>,
    pub variation_key: String,
    pub config: Option<&'a ParameterConfiguration>,
}

impl<'a> ExperimentEvaluation<'a> {
    pub(crate) fn of(
        request: &ExperimentRequest<'a>,
        context: &EvaluatorContext<'a>,
        variation: &Variation,
        reason: DecisionReason,
    ) -> Result<Self> {
        let config = match variation.parameter_configuration_id {
            Some(id) => Some(
                request
                    .workspace
                    .get_parameter_configuration(id)
                    .ok_or(Error::ParameterConfigurationNotFound(id))?,
            ),
            None => None,
        };
        Ok(ExperimentEvaluation {
            reason,
            target_evaluations: context.target_evaluations().to_vec(),
            experiment: request.experiment,
            variation_id: Some(variation.id),
            variation_key: variation.key.clone(),
            config,
        })
    }

    /// Evaluates to the request's default variation. If the experiment has no variation with that
    /// key, the key is still reported but without an id or configuration.
    pub(crate) fn of_default(
        request: &ExperimentRequest<'a>,
        context: &EvaluatorContext<'a>,
        reason: DecisionReason,
    ) -> Result<Self> {
        match request
            .experiment
            .get_variation_by_key(&request.default_variation_key)
        {
            Some(variation) => Self::of(request, context, variation, reason),
            None => Ok(ExperimentEvaluation {
                reason,
                target_evaluations: context.target_evaluations().to_vec(),
                experiment: request.experiment,
                variation_id: None,
                variation_key: request.default_variation_key.clone(),
                config: None,
            }),
        }
    }

    pub fn with_reason(self, reason: DecisionReason) -> Self {
        ExperimentEvaluation { reason, ..self }
    }

    /// A feature flag is on unless it resolved to the default variation.
    pub fn is_on(&self) -> bool {
        self.variation_key != DEFAULT_VARIATION_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_common::{test_workspace, AB_TEST_KEY, FEATURE_FLAG_KEY};
    use maplit::hashmap;
    use spectral::prelude::*;

    #[test]
    fn finds_variations_by_id_and_key() {
        let workspace = test_workspace();
        let experiment = workspace.get_experiment(AB_TEST_KEY).unwrap();

        assert_that!(experiment.get_variation(1001).map(|v| v.key.as_str())).contains_value("A");
        assert_that!(experiment.get_variation_by_key("B").map(|v| v.id)).contains_value(1002);
        assert_that!(experiment.get_variation(42)).is_none();
    }

    #[test]
    fn of_default_falls_back_to_the_requested_key() {
        let workspace = test_workspace();
        let user = HackleUser::builder().id("u1").build();
        let experiment = workspace.get_experiment(AB_TEST_KEY).unwrap();
        let request = ExperimentRequest::of(&workspace, &user, experiment, "Z");
        let context = EvaluatorContext::new();

        let evaluation =
            ExperimentEvaluation::of_default(&request, &context, DecisionReason::ExperimentDraft)
                .unwrap();

        assert_that!(evaluation.variation_id).is_none();
        assert_that!(evaluation.variation_key.as_str()).is_equal_to("Z");
        assert_that!(evaluation.reason).is_equal_to(DecisionReason::ExperimentDraft);
    }

    #[test]
    fn of_attaches_the_parameter_configuration() {
        let workspace = test_workspace();
        let user = HackleUser::builder().id("u1").build();
        let experiment = workspace.get_feature_flag(FEATURE_FLAG_KEY).unwrap();
        let request = ExperimentRequest::of(&workspace, &user, experiment, "A");
        let context = EvaluatorContext::new();
        let on = experiment.get_variation_by_key("B").unwrap();

        let evaluation =
            ExperimentEvaluation::of(&request, &context, on, DecisionReason::DefaultRule).unwrap();

        let config = evaluation.config.unwrap();
        assert_that!(config.get_string("color", "none")).is_equal_to("red".to_string());
        assert!(evaluation.is_on());
    }

    #[test]
    fn of_fails_on_a_missing_parameter_configuration() {
        let workspace = test_workspace();
        let user = HackleUser::builder().id("u1").build();
        let experiment = workspace.get_experiment(AB_TEST_KEY).unwrap();
        let request = ExperimentRequest::of(&workspace, &user, experiment, "A");
        let context = EvaluatorContext::new();
        let broken = Variation {
            id: 1,
            key: "X".into(),
            is_dropped: false,
            parameter_configuration_id: Some(404),
        };

        let result =
            ExperimentEvaluation::of(&request, &context, &broken, DecisionReason::DefaultRule);
        assert!(matches!(result, Err(Error::ParameterConfigurationNotFound(404))));
    }

    #[test]
    fn parameter_configuration_typed_getters() {
        let config = ParameterConfiguration {
            id: 1,
            parameters: hashmap! {
                "s".to_string() => HackleValue::from("text"),
                "i".to_string() => HackleValue::Int(3),
                "d".to_string() => HackleValue::Double(1.5),
                "w".to_string() => HackleValue::Double(10.0),
                "b".to_string() => HackleValue::Bool(true),
            },
        };

        assert_that!(config.get_string("s", "x")).is_equal_to("text".to_string());
        assert_that!(config.get_string("i", "x")).is_equal_to("x".to_string());
        assert_that!(config.get_i64("i", 0)).is_equal_to(3);
        assert_that!(config.get_i64("w", 0)).is_equal_to(10);
        assert_that!(config.get_i64("d", 4)).is_equal_to(4);
        assert_that!(config.get_f64("d", 0.0)).is_equal_to(1.5);
        assert_that!(config.get_f64("s", 7.0)).is_equal_to(7.0);
        assert_that!(config.get_bool("b", false)).is_true();
        assert_that!(config.get_bool("missing", false)).is_false();
    }
}
