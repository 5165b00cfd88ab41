use chrono::{Datelike, TimeZone, Utc, Weekday};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::eval::{Evaluator, EvaluatorContext, EvaluatorKey, EvaluatorRequest, EvaluatorType};
use crate::experiment::{ExperimentEvaluation, ExperimentRequest};
use crate::flow::{evaluate_next, EvaluationFlow, FlowEvaluator};
use crate::reason::DecisionReason;
use crate::rule::Target;
use crate::store::InAppMessageImpression;
use crate::user::{HackleUser, UserEvent};
use crate::util::{MILLIS_PER_DAY, MILLIS_PER_SECOND};
use crate::workspace::Workspace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InAppMessageStatus {
    Initialized,
    Draft,
    Active,
    Pause,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformType {
    Android,
    Ios,
    Web,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Orientation {
    Vertical,
    Horizontal,
}

/// An in-app message: when it may be shown, to whom, and in which layouts.
#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessage {
    pub id: i64,
    pub key: i64,
    pub status: InAppMessageStatus,
    pub period: InAppMessagePeriod,
    pub timetable: InAppMessageTimetable,
    pub event_trigger: InAppMessageEventTrigger,
    pub target_context: InAppMessageTargetContext,
    pub message_context: InAppMessageMessageContext,
}

impl InAppMessage {
    pub fn supports(&self, platform: PlatformType) -> bool {
        self.message_context.platform_types.contains(&platform)
    }
}

/// The epoch-millis window a message is live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InAppMessagePeriod {
    Always,
    Range {
        start_inclusive: i64,
        end_exclusive: i64,
    },
}

impl InAppMessagePeriod {
    pub fn within(&self, timestamp: i64) -> bool {
        match *self {
            InAppMessagePeriod::Always => true,
            InAppMessagePeriod::Range {
                start_inclusive,
                end_exclusive,
            } => start_inclusive <= timestamp && timestamp < end_exclusive,
        }
    }
}

/// Weekly UTC time-of-day windows a message may be shown in.
#[derive(Clone, Debug, PartialEq)]
pub enum InAppMessageTimetable {
    All,
    Custom(Vec<TimetableSlot>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimetableSlot {
    pub day_of_week: Weekday,
    /// millis since UTC midnight
    pub start_millis_inclusive: i64,
    pub end_millis_exclusive: i64,
}

impl TimetableSlot {
    fn contains(&self, day_of_week: Weekday, millis_of_day: i64) -> bool {
        self.day_of_week == day_of_week
            && self.start_millis_inclusive <= millis_of_day
            && millis_of_day < self.end_millis_exclusive
    }
}

impl InAppMessageTimetable {
    pub fn within(&self, timestamp: i64) -> bool {
        let slots = match self {
            InAppMessageTimetable::All => return true,
            InAppMessageTimetable::Custom(slots) => slots,
        };
        let day_of_week = match Utc.timestamp_millis_opt(timestamp).single() {
            Some(time) => time.weekday(),
            None => return false,
        };
        let millis_of_day = timestamp.rem_euclid(MILLIS_PER_DAY);
        slots
            .iter()
            .any(|slot| slot.contains(day_of_week, millis_of_day))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageEventTrigger {
    pub rules: Vec<InAppMessageTriggerRule>,
    pub frequency_cap: Option<InAppMessageFrequencyCap>,
    pub delay: InAppMessageDelay,
}

/// Fires on events named `event_key` whose properties match any of `targets`. No targets means
/// every such event.
#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageTriggerRule {
    pub event_key: String,
    pub targets: Vec<Target>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageFrequencyCap {
    pub identifier_caps: Vec<IdentifierCap>,
    pub duration_cap: Option<DurationCap>,
}

/// At most `count` impressions per identifier of `identifier_type`.
#[derive(Clone, Debug, PartialEq)]
pub struct IdentifierCap {
    pub identifier_type: String,
    pub count: i64,
}

/// At most `count` impressions within the last `duration_millis`.
#[derive(Clone, Debug, PartialEq)]
pub struct DurationCap {
    pub duration_millis: i64,
    pub count: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InAppMessageDelay {
    #[default]
    Immediate,
    After {
        delay_millis: i64,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InAppMessageTargetContext {
    pub overrides: Vec<InAppMessageUserOverride>,
    pub targets: Vec<Target>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageUserOverride {
    pub identifier_type: String,
    pub identifiers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageMessageContext {
    pub default_lang: String,
    /// Key of the A/B test deciding which variation's messages are shown.
    pub experiment_key: Option<i64>,
    pub platform_types: Vec<PlatformType>,
    pub orientations: Vec<Orientation>,
    pub messages: Vec<InAppMessageMessage>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageMessage {
    pub variation_key: Option<String>,
    pub lang: String,
    pub layout: InAppMessageLayout,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageLayout {
    pub display_type: String,
    pub layout_type: String,
}

pub struct InAppMessageEligibilityRequest<'a> {
    pub workspace: &'a Workspace,
    pub user: &'a HackleUser,
    pub in_app_message: &'a InAppMessage,
    /// epoch millis
    pub timestamp: i64,
}

impl<'a> InAppMessageEligibilityRequest<'a> {
    pub fn of(
        workspace: &'a Workspace,
        user: &'a HackleUser,
        in_app_message: &'a InAppMessage,
        timestamp: i64,
    ) -> Self {
        InAppMessageEligibilityRequest {
            workspace,
            user,
            in_app_message,
            timestamp,
        }
    }
}

impl<'a> EvaluatorRequest<'a> for InAppMessageEligibilityRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::new(EvaluatorType::InAppMessage, self.in_app_message.id)
    }

    fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageEligibilityEvaluation<'a> {
    pub reason: DecisionReason,
    pub target_evaluations: Vec<ExperimentEvaluation<'a>>,
    pub in_app_message: &'a InAppMessage,
    pub is_eligible: bool,
    pub layout_evaluation: Option<InAppMessageLayoutEvaluation<'a>>,
    /// Properties of this evaluation, followed by those of its layout evaluation.
    pub properties: Map<String, Value>,
}

impl<'a> InAppMessageEligibilityEvaluation<'a> {
    fn of(
        request: &InAppMessageEligibilityRequest<'a>,
        context: &EvaluatorContext<'a>,
        reason: DecisionReason,
        is_eligible: bool,
    ) -> Self {
        let layout_evaluation = context.layout_evaluation().cloned();
        let mut properties = context.properties().clone();
        if let Some(layout) = &layout_evaluation {
            properties.extend(layout.properties.clone());
        }
        InAppMessageEligibilityEvaluation {
            reason,
            target_evaluations: context.target_evaluations().to_vec(),
            in_app_message: request.in_app_message,
            is_eligible,
            layout_evaluation,
            properties,
        }
    }

    fn eligible(
        request: &InAppMessageEligibilityRequest<'a>,
        context: &EvaluatorContext<'a>,
        reason: DecisionReason,
    ) -> Self {
        Self::of(request, context, reason, true)
    }

    fn ineligible(
        request: &InAppMessageEligibilityRequest<'a>,
        context: &EvaluatorContext<'a>,
        reason: DecisionReason,
    ) -> Self {
        Self::of(request, context, reason, false)
    }
}

pub struct InAppMessageLayoutRequest<'a> {
    pub workspace: &'a Workspace,
    pub user: &'a HackleUser,
    pub in_app_message: &'a InAppMessage,
}

impl<'a> EvaluatorRequest<'a> for InAppMessageLayoutRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::new(EvaluatorType::InAppMessage, self.in_app_message.id)
    }

    fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }
}

/// The message picked for display.
#[derive(Clone, Debug, PartialEq)]
pub struct InAppMessageLayoutEvaluation<'a> {
    pub in_app_message: &'a InAppMessage,
    pub message: &'a InAppMessageMessage,
    pub properties: Map<String, Value>,
}

// Carries the triggering event so EVENT_PROPERTY conditions of trigger rules can see it.
struct TriggerEventRequest<'a> {
    workspace: &'a Workspace,
    user: &'a HackleUser,
    in_app_message: &'a InAppMessage,
    event: &'a UserEvent,
}

impl<'a> EvaluatorRequest<'a> for TriggerEventRequest<'a> {
    fn key(&self) -> EvaluatorKey {
        EvaluatorKey::new(EvaluatorType::InAppMessage, self.in_app_message.id)
    }

    fn workspace(&self) -> &'a Workspace {
        self.workspace
    }

    fn user(&self) -> &'a HackleUser {
        self.user
    }

    fn event(&self) -> Option<&'a UserEvent> {
        Some(self.event)
    }
}

/// The steps of the in-app message eligibility flows. See [InAppMessageEligibilityStep::flows].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InAppMessageEligibilityStep {
    Platform,
    Override,
    Draft,
    Paused,
    Period,
    Timetable,
    Target,
    LayoutResolve,
    FrequencyCap,
    Hidden,
    Eligible,
}

impl InAppMessageEligibilityStep {
    /// Returns the trigger flow, the deliver flow and the re-evaluating deliver flow.
    pub fn flows() -> (
        EvaluationFlow<Self>,
        EvaluationFlow<Self>,
        EvaluationFlow<Self>,
    ) {
        use InAppMessageEligibilityStep::*;
        let evaluate = EvaluationFlow::of(vec![
            Platform, Override, Draft, Paused, Period, Timetable, Target,
        ]);
        let layout = EvaluationFlow::of(vec![LayoutResolve]);
        let dedup = EvaluationFlow::of(vec![FrequencyCap, Hidden]);
        let eligible = EvaluationFlow::of(vec![Eligible]);

        let trigger = &(&(&evaluate + &layout) + &dedup) + &eligible;
        let deliver = &dedup + &eligible;
        let deliver_re_evaluate = &(&evaluate + &dedup) + &eligible;
        (trigger, deliver, deliver_re_evaluate)
    }
}

type Evaluation<'a> = Result<Option<InAppMessageEligibilityEvaluation<'a>>>;

impl FlowEvaluator for InAppMessageEligibilityStep {
    type Request<'a> = InAppMessageEligibilityRequest<'a>;
    type Evaluation<'a> = InAppMessageEligibilityEvaluation<'a>;

    fn evaluate<'a>(
        &self,
        evaluator: &Evaluator,
        request: &InAppMessageEligibilityRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        next_flow: &[Self],
    ) -> Evaluation<'a> {
        use InAppMessageEligibilityStep::*;
        let message = request.in_app_message;
        let ineligible = |context: &EvaluatorContext<'a>, reason| -> Evaluation<'a> {
            Ok(Some(InAppMessageEligibilityEvaluation::ineligible(
                request, context, reason,
            )))
        };

        match self {
            Platform if !message.supports(evaluator.config().platform) => {
                ineligible(context, DecisionReason::UnsupportedPlatform)
            }
            Override if is_user_overridden(request) => Ok(Some(
                InAppMessageEligibilityEvaluation::eligible(
                    request,
                    context,
                    DecisionReason::Overridden,
                ),
            )),
            Draft if message.status == InAppMessageStatus::Draft => {
                ineligible(context, DecisionReason::InAppMessageDraft)
            }
            Paused if message.status == InAppMessageStatus::Pause => {
                ineligible(context, DecisionReason::InAppMessagePaused)
            }
            Period if !message.period.within(request.timestamp) => {
                ineligible(context, DecisionReason::NotInInAppMessagePeriod)
            }
            Timetable if !message.timetable.within(request.timestamp) => {
                ineligible(context, DecisionReason::NotInInAppMessageTimetable)
            }
            Target if !is_in_target(evaluator, request, context)? => {
                ineligible(context, DecisionReason::NotInInAppMessageTarget)
            }
            LayoutResolve => {
                let layout_request = InAppMessageLayoutRequest {
                    workspace: request.workspace,
                    user: request.user,
                    in_app_message: message,
                };
                let layout = evaluator
                    .evaluate_in_app_message_layout(&layout_request, &mut EvaluatorContext::new())?;
                context.set_layout_evaluation(layout);
                evaluate_next(next_flow, evaluator, request, context)
            }
            FrequencyCap if is_frequency_capped(evaluator, request) => {
                ineligible(context, DecisionReason::InAppMessageFrequencyCapped)
            }
            Hidden if evaluator.hidden_storage().exist(message, request.timestamp) => {
                ineligible(context, DecisionReason::InAppMessageHidden)
            }
            Eligible => Ok(Some(InAppMessageEligibilityEvaluation::eligible(
                request,
                context,
                DecisionReason::InAppMessageTarget,
            ))),
            _ => evaluate_next(next_flow, evaluator, request, context),
        }
    }
}

fn is_user_overridden(request: &InAppMessageEligibilityRequest) -> bool {
    request
        .in_app_message
        .target_context
        .overrides
        .iter()
        .any(|o| match request.user.identifier(&o.identifier_type) {
            Some(identifier) => o.identifiers.iter().any(|i| i == identifier),
            None => false,
        })
}

fn is_in_target<'a>(
    evaluator: &Evaluator,
    request: &InAppMessageEligibilityRequest<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Result<bool> {
    let targets = &request.in_app_message.target_context.targets;
    Ok(targets.is_empty() || evaluator.any_target_matches(request, context, targets)?)
}

/// One counter per cap. A cap is hit once its counter reaches the cap's count.
struct FrequencyCapCounter<'c> {
    predicate: Box<dyn Fn(&InAppMessageImpression) -> bool + 'c>,
    threshold: i64,
    count: i64,
}

impl<'c> FrequencyCapCounter<'c> {
    fn record(&mut self, impression: &InAppMessageImpression) -> bool {
        if (self.predicate)(impression) {
            self.count += 1;
        }
        self.count >= self.threshold
    }
}

fn is_frequency_capped(evaluator: &Evaluator, request: &InAppMessageEligibilityRequest) -> bool {
    let frequency_cap = match &request.in_app_message.event_trigger.frequency_cap {
        Some(frequency_cap) => frequency_cap,
        None => return false,
    };

    let user = request.user;
    let now = request.timestamp;
    let mut counters: Vec<FrequencyCapCounter> = frequency_cap
        .identifier_caps
        .iter()
        .map(|cap| FrequencyCapCounter {
            predicate: Box::new(move |impression: &InAppMessageImpression| {
                match (
                    user.identifier(&cap.identifier_type),
                    impression.identifiers.get(&cap.identifier_type),
                ) {
                    (Some(mine), Some(theirs)) => mine == theirs,
                    _ => false,
                }
            }),
            threshold: cap.count,
            count: 0,
        })
        .collect();
    if let Some(cap) = &frequency_cap.duration_cap {
        counters.push(FrequencyCapCounter {
            predicate: Box::new(move |impression: &InAppMessageImpression| {
                now - impression.timestamp <= cap.duration_millis
            }),
            threshold: cap.count,
            count: 0,
        });
    }
    if counters.is_empty() {
        return false;
    }

    let impressions = evaluator.impression_storage().get(request.in_app_message);
    impressions
        .iter()
        .any(|impression| counters.iter_mut().any(|c| c.record(impression)))
}

impl Evaluator {
    /// Decides whether an in-app message triggered by an event may be shown, and resolves the
    /// message to show.
    pub fn evaluate_in_app_message_trigger<'a>(
        &self,
        request: &InAppMessageEligibilityRequest<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<InAppMessageEligibilityEvaluation<'a>> {
        self.evaluate_eligibility(&self.trigger_flow, request, context)
    }

    /// Decides whether a previously triggered in-app message may still be delivered. Unless
    /// `re_evaluate` is set, only the frequency cap and hidden state are checked again.
    pub fn evaluate_in_app_message_deliver<'a>(
        &self,
        request: &InAppMessageEligibilityRequest<'a>,
        context: &mut EvaluatorContext<'a>,
        re_evaluate: bool,
    ) -> Result<InAppMessageEligibilityEvaluation<'a>> {
        let flow = if re_evaluate {
            &self.deliver_re_evaluate_flow
        } else {
            &self.deliver_flow
        };
        self.evaluate_eligibility(flow, request, context)
    }

    fn evaluate_eligibility<'a>(
        &self,
        flow: &EvaluationFlow<InAppMessageEligibilityStep>,
        request: &InAppMessageEligibilityRequest<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<InAppMessageEligibilityEvaluation<'a>> {
        self.in_context(request.key(), context, |context| {
            flow.evaluate(self, request, context)?
                .ok_or(Error::MessageNotDecided(request.in_app_message.key))
        })
    }

    /// Picks the message to display: the default language message of the variation the user is
    /// in, when the message runs an A/B test, or of the default language only.
    pub fn evaluate_in_app_message_layout<'a>(
        &self,
        request: &InAppMessageLayoutRequest<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<InAppMessageLayoutEvaluation<'a>> {
        self.in_context(request.key(), context, |context| {
            let message_context = &request.in_app_message.message_context;
            let default_lang = message_context.default_lang.as_str();

            let message = match message_context.experiment_key {
                Some(experiment_key) => {
                    let experiment = request
                        .workspace
                        .get_experiment(experiment_key)
                        .ok_or(Error::ExperimentNotFound(experiment_key))?;
                    let experiment_request = ExperimentRequest::requested_by(request, experiment);
                    let evaluation = self.evaluate_experiment(&experiment_request, context)?;
                    context.add_evaluation(evaluation.clone());
                    context.set_property("experiment_id", experiment.id);
                    context.set_property("experiment_key", experiment.key);
                    context.set_property("variation_id", evaluation.variation_id);
                    context.set_property("variation_key", evaluation.variation_key.as_str());
                    context.set_property("experiment_decision_reason", evaluation.reason.as_str());

                    message_context.messages.iter().find(|m| {
                        m.lang == default_lang
                            && m.variation_key.as_deref() == Some(evaluation.variation_key.as_str())
                    })
                }
                None => message_context
                    .messages
                    .iter()
                    .find(|m| m.lang == default_lang),
            };

            let message =
                message.ok_or(Error::MessageNotDecided(request.in_app_message.key))?;
            Ok(InAppMessageLayoutEvaluation {
                in_app_message: request.in_app_message,
                message,
                properties: context.properties().clone(),
            })
        })
    }

    /// Returns the first trigger rule of `in_app_message` fired by `event`, if any.
    pub fn determine_trigger_rule<'a>(
        &self,
        workspace: &'a Workspace,
        in_app_message: &'a InAppMessage,
        user: &'a HackleUser,
        event: &'a UserEvent,
    ) -> Result<Option<&'a InAppMessageTriggerRule>> {
        let request = TriggerEventRequest {
            workspace,
            user,
            in_app_message,
            event,
        };
        for rule in &in_app_message.event_trigger.rules {
            if rule.event_key != event.key {
                continue;
            }
            if rule.targets.is_empty()
                || self.any_target_matches(&request, &mut EvaluatorContext::new(), &rule.targets)?
            {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    /// Appends an impression of `in_app_message` for `user`, dropping the oldest impressions
    /// beyond the configured history limit.
    pub fn record_impression(
        &self,
        in_app_message: &InAppMessage,
        user: &HackleUser,
        timestamp: i64,
    ) {
        let limit = self.config().impression_history_limit;
        let impression = InAppMessageImpression {
            identifiers: user.identifiers().clone(),
            timestamp,
        };
        let mut impression = Some(impression);
        self.impression_storage()
            .update(in_app_message, &mut |impressions| {
                if let Some(impression) = impression.take() {
                    impressions.push(impression);
                }
                if impressions.len() > limit {
                    let excess = impressions.len() - limit;
                    impressions.drain(..excess);
                }
            });
        debug!("recorded impression of in-app message {}", in_app_message.key);
    }

    /// Hides `in_app_message` from now for the configured hidden duration.
    pub fn hide_in_app_message(&self, in_app_message: &InAppMessage) {
        let now = self.clock().now_millis();
        let duration_millis = self.config().hidden_duration_seconds as i64 * MILLIS_PER_SECOND;
        self.hidden_storage()
            .put(in_app_message, now.saturating_add(duration_millis));
    }
}
