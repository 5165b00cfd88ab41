use std::fmt;
use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use crate::condition::ConditionMatcherFactory;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::experiment::{ExperimentEvaluation, ExperimentRequest, ExperimentType};
use crate::experiment_flow::ExperimentFlowStep;
use crate::flow::EvaluationFlow;
use crate::in_app_message::{InAppMessageEligibilityStep, InAppMessageLayoutEvaluation};
use crate::reason::DecisionReason;
use crate::rule::{Condition, Target};
use crate::store::{
    Clock, InAppMessageHiddenStorage, InAppMessageImpressionStorage, InMemoryInAppMessageHiddenStorage,
    InMemoryInAppMessageImpressionStorage, InMemoryManualOverrideStorage, ManualOverrideStorage,
    SystemClock,
};
use crate::user::{HackleUser, UserEvent};
use crate::workspace::Workspace;

const PREALLOCATED_STACK_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvaluatorType {
    Experiment,
    RemoteConfig,
    InAppMessage,
}

impl fmt::Display for EvaluatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluatorType::Experiment => "EXPERIMENT",
            EvaluatorType::RemoteConfig => "REMOTE_CONFIG",
            EvaluatorType::InAppMessage => "IN_APP_MESSAGE",
        };
        f.write_str(s)
    }
}

/// Identifies one evaluation in flight. Two requests with the same key are the same evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EvaluatorKey {
    pub evaluator_type: EvaluatorType,
    pub id: i64,
}

impl EvaluatorKey {
    pub fn new(evaluator_type: EvaluatorType, id: i64) -> Self {
        EvaluatorKey { evaluator_type, id }
    }
}

impl fmt::Display for EvaluatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.evaluator_type, self.id)
    }
}

/// Common view of every evaluation request, used by condition matchers.
///
/// `'a` is the lifetime of the workspace snapshot and of the user being evaluated; everything an
/// evaluation returns borrows from them.
pub trait EvaluatorRequest<'a> {
    fn key(&self) -> EvaluatorKey;
    fn workspace(&self) -> &'a Workspace;
    fn user(&self) -> &'a HackleUser;

    /// The event being evaluated against, for requests triggered by an event.
    fn event(&self) -> Option<&'a UserEvent> {
        None
    }
}

/// EvaluatorContext is the scratch state of one top-level evaluation.
///
/// It tracks the evaluations in flight so that a condition referring back to an enclosing
/// experiment is reported instead of recursing forever, memoizes the experiments evaluated as
/// conditions, and accumulates the properties attached to the resulting decision.
///
/// A context is created per call and never shared.
#[derive(Debug)]
pub struct EvaluatorContext<'a> {
    stack: Vec<EvaluatorKey>,
    target_evaluations: Vec<ExperimentEvaluation<'a>>,
    properties: Map<String, Value>,
    layout_evaluation: Option<InAppMessageLayoutEvaluation<'a>>,
}

impl<'a> Default for EvaluatorContext<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> EvaluatorContext<'a> {
    pub fn new() -> Self {
        EvaluatorContext {
            stack: Vec::with_capacity(PREALLOCATED_STACK_SIZE),
            target_evaluations: Vec::new(),
            properties: Map::new(),
            layout_evaluation: None,
        }
    }

    pub fn stack(&self) -> &[EvaluatorKey] {
        &self.stack
    }

    pub fn contains(&self, key: &EvaluatorKey) -> bool {
        self.stack.contains(key)
    }

    pub fn add(&mut self, key: EvaluatorKey) {
        self.stack.push(key);
    }

    pub fn remove(&mut self, key: &EvaluatorKey) {
        self.stack.retain(|k| k != key);
    }

    pub fn target_evaluations(&self) -> &[ExperimentEvaluation<'a>] {
        &self.target_evaluations
    }

    /// Returns the memoized evaluation of `experiment_id`, if it was already evaluated as a
    /// condition during this call.
    pub fn get(&self, experiment_id: i64) -> Option<&ExperimentEvaluation<'a>> {
        self.target_evaluations
            .iter()
            .find(|e| e.experiment.id == experiment_id)
    }

    pub fn add_evaluation(&mut self, evaluation: ExperimentEvaluation<'a>) {
        self.target_evaluations.push(evaluation);
    }

    /// Sets a decision property. Null values are ignored.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        if !value.is_null() {
            self.properties.insert(key.into(), value);
        }
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub(crate) fn layout_evaluation(&self) -> Option<&InAppMessageLayoutEvaluation<'a>> {
        self.layout_evaluation.as_ref()
    }

    pub(crate) fn set_layout_evaluation(&mut self, evaluation: InAppMessageLayoutEvaluation<'a>) {
        self.layout_evaluation = Some(evaluation);
    }
}

/// Evaluator runs every decision policy against a workspace snapshot.
///
/// It owns the storages and the clock the policies consult, and the prebuilt flows of each
/// policy. An Evaluator holds no per-call state and may be shared between threads.
pub struct Evaluator {
    manual_override_storage: Arc<dyn ManualOverrideStorage>,
    hidden_storage: Arc<dyn InAppMessageHiddenStorage>,
    impression_storage: Arc<dyn InAppMessageImpressionStorage>,
    clock: Arc<dyn Clock>,
    config: Config,
    condition_matchers: ConditionMatcherFactory,
    ab_test_flow: EvaluationFlow<ExperimentFlowStep>,
    feature_flag_flow: EvaluationFlow<ExperimentFlowStep>,
    pub(crate) trigger_flow: EvaluationFlow<InAppMessageEligibilityStep>,
    pub(crate) deliver_flow: EvaluationFlow<InAppMessageEligibilityStep>,
    pub(crate) deliver_re_evaluate_flow: EvaluationFlow<InAppMessageEligibilityStep>,
}

impl Evaluator {
    pub fn builder() -> EvaluatorBuilder {
        EvaluatorBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn manual_override_storage(&self) -> &dyn ManualOverrideStorage {
        self.manual_override_storage.as_ref()
    }

    pub(crate) fn hidden_storage(&self) -> &dyn InAppMessageHiddenStorage {
        self.hidden_storage.as_ref()
    }

    pub(crate) fn impression_storage(&self) -> &dyn InAppMessageImpressionStorage {
        self.impression_storage.as_ref()
    }

    /// Evaluates an A/B test or a feature flag.
    ///
    /// A flow that decides nothing falls back to the default variation with
    /// [DecisionReason::TrafficNotAllocated].
    pub fn evaluate_experiment<'a>(
        &self,
        request: &ExperimentRequest<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<ExperimentEvaluation<'a>> {
        self.in_context(request.key(), context, |context| {
            let flow = match request.experiment.experiment_type {
                ExperimentType::AbTest => &self.ab_test_flow,
                ExperimentType::FeatureFlag => &self.feature_flag_flow,
            };
            match flow.evaluate(self, request, context)? {
                Some(evaluation) => Ok(evaluation),
                None => ExperimentEvaluation::of_default(
                    request,
                    context,
                    DecisionReason::TrafficNotAllocated,
                ),
            }
        })
    }

    /// Runs `f` with `key` pushed on the evaluation stack.
    pub(crate) fn in_context<'a, T, F>(
        &self,
        key: EvaluatorKey,
        context: &mut EvaluatorContext<'a>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut EvaluatorContext<'a>) -> Result<T>,
    {
        if context.contains(&key) {
            let mut chain = context.stack().to_vec();
            chain.push(key);
            debug!("evaluation of {} re-entered itself", key);
            return Err(Error::CircularEvaluation(chain));
        }

        context.add(key);
        let result = f(context);
        context.remove(&key);
        result
    }

    /// A target matches when all of its conditions do.
    pub(crate) fn target_matches<'a>(
        &self,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        target: &Target,
    ) -> Result<bool> {
        target.matches_with(|condition| self.condition_matches(request, context, condition))
    }

    /// Returns true if any of `targets` matches. Empty targets match nobody.
    pub(crate) fn any_target_matches<'a>(
        &self,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        targets: &[Target],
    ) -> Result<bool> {
        for target in targets {
            if self.target_matches(request, context, target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub(crate) fn condition_matches<'a>(
        &self,
        request: &dyn EvaluatorRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        condition: &Condition,
    ) -> Result<bool> {
        self.condition_matchers
            .get_matcher(condition.key.key_type)
            .matches(self, request, context, condition)
    }
}

/// Contains methods for configuring an [Evaluator]. Anything left unset gets an in-memory storage,
/// the system clock or the default [Config].
#[derive(Clone, Default)]
pub struct EvaluatorBuilder {
    manual_override_storage: Option<Arc<dyn ManualOverrideStorage>>,
    hidden_storage: Option<Arc<dyn InAppMessageHiddenStorage>>,
    impression_storage: Option<Arc<dyn InAppMessageImpressionStorage>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<Config>,
}

impl EvaluatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn manual_override_storage(&mut self, storage: Arc<dyn ManualOverrideStorage>) -> &mut Self {
        self.manual_override_storage = Some(storage);
        self
    }

    pub fn hidden_storage(&mut self, storage: Arc<dyn InAppMessageHiddenStorage>) -> &mut Self {
        self.hidden_storage = Some(storage);
        self
    }

    pub fn impression_storage(
        &mut self,
        storage: Arc<dyn InAppMessageImpressionStorage>,
    ) -> &mut Self {
        self.impression_storage = Some(storage);
        self
    }

    pub fn clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(&mut self, config: Config) -> &mut Self {
        self.config = Some(config);
        self
    }

    pub fn build(&self) -> Evaluator {
        let (trigger_flow, deliver_flow, deliver_re_evaluate_flow) =
            InAppMessageEligibilityStep::flows();
        Evaluator {
            manual_override_storage: self
                .manual_override_storage
                .clone()
                .unwrap_or_else(|| Arc::new(InMemoryManualOverrideStorage::new())),
            hidden_storage: self
                .hidden_storage
                .clone()
                .unwrap_or_else(|| Arc::new(InMemoryInAppMessageHiddenStorage::new())),
            impression_storage: self
                .impression_storage
                .clone()
                .unwrap_or_else(|| Arc::new(InMemoryInAppMessageImpressionStorage::new())),
            clock: self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config.clone().unwrap_or_default(),
            condition_matchers: ConditionMatcherFactory::new(),
            ab_test_flow: ExperimentFlowStep::ab_test_flow(),
            feature_flag_flow: ExperimentFlowStep::feature_flag_flow(),
            trigger_flow,
            deliver_flow,
            deliver_re_evaluate_flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::DEFAULT_VARIATION_KEY;
    use crate::test_common::{
        test_evaluator, test_workspace, test_workspace_from, AB_TEST_KEY, FEATURE_FLAG_KEY,
    };
    use serde_json::json;
    use spectral::prelude::*;

    #[test]
    fn evaluator_key_display() {
        let key = EvaluatorKey::new(EvaluatorType::RemoteConfig, 7);
        assert_that!(key.to_string()).is_equal_to("REMOTE_CONFIG(7)".to_string());
    }

    #[test]
    fn context_tracks_the_stack() {
        let mut context = EvaluatorContext::new();
        let a = EvaluatorKey::new(EvaluatorType::Experiment, 1);
        let b = EvaluatorKey::new(EvaluatorType::Experiment, 2);

        context.add(a);
        context.add(b);
        assert!(context.contains(&a));
        context.remove(&a);
        assert!(!context.contains(&a));
        assert_that!(context.stack().to_vec()).is_equal_to(vec![b]);
    }

    #[test]
    fn context_ignores_null_properties() {
        let mut context = EvaluatorContext::new();
        context.set_property("a", 1);
        context.set_property("b", Value::Null);
        context.set_property("c", Option::<i64>::None);
        assert_that!(context.properties().len()).is_equal_to(1);
    }

    #[test]
    fn in_context_rejects_re_entry() {
        let evaluator = test_evaluator();
        let mut context = EvaluatorContext::new();
        let key = EvaluatorKey::new(EvaluatorType::Experiment, 1);

        let result = evaluator.in_context(key, &mut context, |context| {
            evaluator.in_context(key, context, |_| Ok(()))
        });

        match result {
            Err(Error::CircularEvaluation(chain)) => assert_that!(chain).is_equal_to(vec![key, key]),
            other => panic!("expected a circular evaluation, got {:?}", other),
        }
        assert_that!(context.stack().is_empty()).is_true();
    }

    #[test]
    fn in_context_pops_the_key_after_an_error() {
        let evaluator = test_evaluator();
        let mut context = EvaluatorContext::new();
        let key = EvaluatorKey::new(EvaluatorType::Experiment, 1);

        let result: Result<()> =
            evaluator.in_context(key, &mut context, |_| Err(Error::BucketNotFound(1)));
        assert!(result.is_err());
        assert!(!context.contains(&key));
    }

    #[test]
    fn evaluates_ab_tests_deterministically() {
        let workspace = test_workspace();
        let evaluator = test_evaluator();
        let user = HackleUser::builder().id("u1").build();
        let experiment = workspace.get_experiment(AB_TEST_KEY).unwrap();

        let keys: Vec<String> = (0..5)
            .map(|_| {
                let request =
                    ExperimentRequest::of(&workspace, &user, experiment, DEFAULT_VARIATION_KEY);
                evaluator
                    .evaluate_experiment(&request, &mut EvaluatorContext::new())
                    .unwrap()
                    .variation_key
            })
            .collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn evaluates_feature_flags() {
        let workspace = test_workspace();
        let evaluator = test_evaluator();
        let user = HackleUser::builder().id("u1").build();
        let flag = workspace.get_feature_flag(FEATURE_FLAG_KEY).unwrap();
        let request = ExperimentRequest::of(&workspace, &user, flag, DEFAULT_VARIATION_KEY);

        let evaluation = evaluator
            .evaluate_experiment(&request, &mut EvaluatorContext::new())
            .unwrap();

        asserting!("the default rule of the flag turns it on")
            .that(&evaluation.reason)
            .is_equal_to(DecisionReason::DefaultRule);
        assert!(evaluation.is_on());
    }

    #[test]
    fn self_referencing_experiment_is_an_error() {
        let workspace = test_workspace_from(json!({
            "experiments": [{
                "id": 1, "key": 1, "status": "RUNNING", "identifierType": "$id", "version": 1,
                "bucketId": 1,
                "variations": [
                    {"id": 11, "key": "A", "status": "ACTIVE"},
                    {"id": 12, "key": "B", "status": "ACTIVE"}
                ],
                "execution": {
                    "status": "RUNNING", "version": 1, "userOverrides": [], "segmentOverrides": [],
                    "targetAudiences": [{"conditions": [{
                        "key": {"type": "AB_TEST", "name": "1"},
                        "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
                    }]}],
                    "targetRules": [],
                    "defaultRule": {"type": "BUCKET", "bucketId": 1}
                }
            }],
            "buckets": [{"id": 1, "seed": 1, "slotSize": 10000, "slots": []}]
        }));
        let evaluator = test_evaluator();
        let user = HackleUser::builder().id("u1").build();
        let experiment = workspace.get_experiment(1).unwrap();
        let request = ExperimentRequest::of(&workspace, &user, experiment, DEFAULT_VARIATION_KEY);

        let result = evaluator.evaluate_experiment(&request, &mut EvaluatorContext::new());
        assert!(matches!(result, Err(Error::CircularEvaluation(_))));
    }

    #[test]
    fn transitive_cycles_are_errors_too() {
        let condition = |key: i64| {
            json!({"conditions": [{
                "key": {"type": "AB_TEST", "name": key.to_string()},
                "match": {"type": "MATCH", "operator": "IN", "valueType": "STRING", "values": ["A"]}
            }]})
        };
        let experiment = |id: i64, references: i64| {
            json!({
                "id": id, "key": id, "status": "RUNNING", "identifierType": "$id", "version": 1,
                "bucketId": 1,
                "variations": [{"id": id * 10, "key": "A", "status": "ACTIVE"}],
                "execution": {
                    "status": "RUNNING", "version": 1, "userOverrides": [], "segmentOverrides": [],
                    "targetAudiences": [condition(references)],
                    "targetRules": [],
                    "defaultRule": {"type": "BUCKET", "bucketId": 1}
                }
            })
        };
        let workspace = test_workspace_from(json!({
            "experiments": [experiment(1, 2), experiment(2, 3), experiment(3, 1)],
            "buckets": [{"id": 1, "seed": 1, "slotSize": 10000, "slots": []}]
        }));
        let evaluator = test_evaluator();
        let user = HackleUser::builder().id("u1").build();
        let request = ExperimentRequest::of(
            &workspace,
            &user,
            workspace.get_experiment(1).unwrap(),
            DEFAULT_VARIATION_KEY,
        );

        match evaluator.evaluate_experiment(&request, &mut EvaluatorContext::new()) {
            Err(e @ Error::CircularEvaluation(_)) => assert_that!(e.to_string()).is_equal_to(
                "circular evaluation has occurred [EXPERIMENT(1) -> EXPERIMENT(2) -> EXPERIMENT(3) -> EXPERIMENT(1)]".to_string(),
            ),
            other => panic!("expected a circular evaluation, got {:?}", other),
        }
    }
}
