use std::collections::HashMap;

use chrono::Weekday;
use log::debug;
use serde::de::{value, DeserializeOwned, IntoDeserializer};
use serde::Deserialize;

use crate::bucket::Bucket;
use crate::error::Result;
use crate::experiment::{
    Container, ContainerGroup, Experiment, ExperimentStatus, ExperimentType,
    ParameterConfiguration,
};
use crate::in_app_message::{
    DurationCap, IdentifierCap, InAppMessage, InAppMessageDelay, InAppMessageEventTrigger,
    InAppMessageFrequencyCap, InAppMessageLayout, InAppMessageMessage,
    InAppMessageMessageContext, InAppMessagePeriod, InAppMessageStatus,
    InAppMessageTargetContext, InAppMessageTimetable, InAppMessageTriggerRule,
    InAppMessageUserOverride, Orientation, PlatformType, TimetableSlot,
};
use crate::remote_config::{RemoteConfigParameter, RemoteConfigTargetRule, RemoteConfigValue};
use crate::rule::{
    Condition, KeyType, MatchType, Operator, Target, TargetKey, TargetMatch, TargetRule,
    TargetingType,
};
use crate::segment::{Segment, SegmentType};
use crate::util::MILLIS_PER_SECOND;
use crate::value::{HackleValue, HackleValueType};
use crate::variation::{Action, Variation};

/// An event type known to the workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventType {
    pub id: i64,
    pub key: String,
}

/// Workspace is an immutable snapshot of everything evaluation reads: experiments, feature flags,
/// buckets, segments, containers, remote config parameters and in-app messages.
///
/// Build one with [Workspace::from_json]. Entities the snapshot cannot represent are skipped
/// rather than failing the whole document.
#[derive(Clone, Debug, Default)]
pub struct Workspace {
    id: i64,
    environment_id: i64,
    experiments: HashMap<i64, Experiment>,
    feature_flags: HashMap<i64, Experiment>,
    buckets: HashMap<i64, Bucket>,
    event_types: HashMap<String, EventType>,
    segments: HashMap<String, Segment>,
    containers: HashMap<i64, Container>,
    parameter_configurations: HashMap<i64, ParameterConfiguration>,
    remote_config_parameters: HashMap<String, RemoteConfigParameter>,
    in_app_messages: HashMap<i64, InAppMessage>,
}

impl Workspace {
    /// Parses a workspace document.
    ///
    /// Fails only if the document is not well-formed JSON of the expected shape.
    pub fn from_json(json: &str) -> Result<Workspace> {
        let dto: WorkspaceDto = serde_json::from_str(json)?;
        Ok(Workspace::from_dto(dto))
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn environment_id(&self) -> i64 {
        self.environment_id
    }

    pub fn get_experiment(&self, experiment_key: i64) -> Option<&Experiment> {
        self.experiments.get(&experiment_key)
    }

    pub fn get_experiment_by_id(&self, experiment_id: i64) -> Option<&Experiment> {
        self.experiments.values().find(|e| e.id == experiment_id)
    }

    pub fn experiments(&self) -> impl Iterator<Item = &Experiment> {
        self.experiments.values()
    }

    pub fn feature_flags(&self) -> impl Iterator<Item = &Experiment> {
        self.feature_flags.values()
    }

    pub fn get_feature_flag(&self, feature_key: i64) -> Option<&Experiment> {
        self.feature_flags.get(&feature_key)
    }

    pub fn get_bucket(&self, bucket_id: i64) -> Option<&Bucket> {
        self.buckets.get(&bucket_id)
    }

    pub fn get_event_type(&self, event_key: &str) -> Option<&EventType> {
        self.event_types.get(event_key)
    }

    pub fn get_segment(&self, segment_key: &str) -> Option<&Segment> {
        self.segments.get(segment_key)
    }

    pub fn get_container(&self, container_id: i64) -> Option<&Container> {
        self.containers.get(&container_id)
    }

    pub fn get_parameter_configuration(&self, id: i64) -> Option<&ParameterConfiguration> {
        self.parameter_configurations.get(&id)
    }

    pub fn get_remote_config_parameter(&self, parameter_key: &str) -> Option<&RemoteConfigParameter> {
        self.remote_config_parameters.get(parameter_key)
    }

    pub fn get_in_app_message(&self, in_app_message_key: i64) -> Option<&InAppMessage> {
        self.in_app_messages.get(&in_app_message_key)
    }

    pub fn get_in_app_message_by_id(&self, in_app_message_id: i64) -> Option<&InAppMessage> {
        self.in_app_messages
            .values()
            .find(|m| m.id == in_app_message_id)
    }

    pub fn in_app_messages(&self) -> impl Iterator<Item = &InAppMessage> {
        self.in_app_messages.values()
    }
}

impl Workspace {
    fn from_dto(dto: WorkspaceDto) -> Self {
        let (id, environment_id) = match &dto.workspace {
            Some(w) => (w.id, w.environment.as_ref().map_or(0, |e| e.id)),
            None => (0, 0),
        };

        let experiments = dto
            .experiments
            .into_iter()
            .filter_map(|e| e.into_experiment(ExperimentType::AbTest))
            .map(|e| (e.key, e))
            .collect();
        let feature_flags = dto
            .feature_flags
            .into_iter()
            .filter_map(|e| e.into_experiment(ExperimentType::FeatureFlag))
            .map(|e| (e.key, e))
            .collect();
        let buckets = dto.buckets.into_iter().map(|b| (b.id, b)).collect();
        let event_types = dto
            .events
            .into_iter()
            .map(|e| {
                (
                    e.key.clone(),
                    EventType {
                        id: e.id,
                        key: e.key,
                    },
                )
            })
            .collect();
        let segments = dto
            .segments
            .into_iter()
            .filter_map(SegmentDto::into_segment)
            .map(|s| (s.key.clone(), s))
            .collect();
        let containers = dto
            .containers
            .into_iter()
            .map(|c| {
                let container = Container {
                    id: c.id,
                    bucket_id: c.bucket_id,
                    groups: c
                        .groups
                        .into_iter()
                        .map(|g| ContainerGroup {
                            id: g.id,
                            experiments: g.experiments,
                        })
                        .collect(),
                };
                (container.id, container)
            })
            .collect();
        let parameter_configurations = dto
            .parameter_configurations
            .into_iter()
            .map(|p| {
                let configuration = ParameterConfiguration {
                    id: p.id,
                    parameters: p.parameters.into_iter().map(|p| (p.key, p.value)).collect(),
                };
                (configuration.id, configuration)
            })
            .collect();
        let remote_config_parameters = dto
            .remote_config_parameters
            .into_iter()
            .filter_map(RemoteConfigParameterDto::into_parameter)
            .map(|p| (p.key.clone(), p))
            .collect();
        let in_app_messages = dto
            .in_app_messages
            .into_iter()
            .filter_map(InAppMessageDto::into_in_app_message)
            .map(|m| (m.key, m))
            .collect();

        Workspace {
            id,
            environment_id,
            experiments,
            feature_flags,
            buckets,
            event_types,
            segments,
            containers,
            parameter_configurations,
            remote_config_parameters,
            in_app_messages,
        }
    }
}

// Parses a SCREAMING_SNAKE_CASE string into one of the model's enums.
fn parse_enum<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let deserializer: value::StrDeserializer<'_, value::Error> = raw.into_deserializer();
    T::deserialize(deserializer).ok()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceDto {
    #[serde(default)]
    workspace: Option<WorkspaceInfoDto>,
    #[serde(default)]
    experiments: Vec<ExperimentDto>,
    #[serde(default)]
    feature_flags: Vec<ExperimentDto>,
    #[serde(default)]
    buckets: Vec<Bucket>,
    #[serde(default)]
    events: Vec<EventTypeDto>,
    #[serde(default)]
    segments: Vec<SegmentDto>,
    #[serde(default)]
    containers: Vec<ContainerDto>,
    #[serde(default)]
    parameter_configurations: Vec<ParameterConfigurationDto>,
    #[serde(default)]
    remote_config_parameters: Vec<RemoteConfigParameterDto>,
    #[serde(default)]
    in_app_messages: Vec<InAppMessageDto>,
}

#[derive(Deserialize)]
struct WorkspaceInfoDto {
    id: i64,
    #[serde(default)]
    environment: Option<EnvironmentDto>,
}

#[derive(Deserialize)]
struct EnvironmentDto {
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperimentDto {
    id: i64,
    key: i64,
    #[serde(default)]
    name: Option<String>,
    identifier_type: String,
    version: i64,
    variations: Vec<VariationDto>,
    execution: ExecutionDto,
    #[serde(default)]
    winner_variation_id: Option<i64>,
    #[serde(default)]
    container_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariationDto {
    id: i64,
    key: String,
    status: String,
    #[serde(default)]
    parameter_configuration_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionDto {
    status: String,
    version: i64,
    #[serde(default)]
    user_overrides: Vec<UserOverrideDto>,
    #[serde(default)]
    segment_overrides: Vec<TargetRuleDto>,
    #[serde(default)]
    target_audiences: Vec<TargetDto>,
    #[serde(default)]
    target_rules: Vec<TargetRuleDto>,
    default_rule: ActionDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOverrideDto {
    user_id: String,
    variation_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionDto {
    #[serde(rename = "type")]
    action_type: String,
    #[serde(default)]
    variation_id: Option<i64>,
    #[serde(default)]
    bucket_id: Option<i64>,
}

#[derive(Deserialize)]
struct TargetRuleDto {
    target: TargetDto,
    action: ActionDto,
}

#[derive(Deserialize)]
struct TargetDto {
    #[serde(default)]
    conditions: Vec<ConditionDto>,
}

#[derive(Deserialize)]
struct ConditionDto {
    key: KeyDto,
    #[serde(rename = "match")]
    target_match: MatchDto,
}

#[derive(Deserialize)]
struct KeyDto {
    #[serde(rename = "type")]
    key_type: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatchDto {
    #[serde(rename = "type")]
    match_type: String,
    operator: String,
    value_type: String,
    #[serde(default)]
    values: Vec<HackleValue>,
}

#[derive(Deserialize)]
struct EventTypeDto {
    id: i64,
    key: String,
}

#[derive(Deserialize)]
struct SegmentDto {
    id: i64,
    key: String,
    #[serde(rename = "type")]
    segment_type: String,
    #[serde(default)]
    targets: Vec<TargetDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerDto {
    id: i64,
    bucket_id: i64,
    #[serde(default)]
    groups: Vec<ContainerGroupDto>,
}

#[derive(Deserialize)]
struct ContainerGroupDto {
    id: i64,
    #[serde(default)]
    experiments: Vec<i64>,
}

#[derive(Deserialize)]
struct ParameterConfigurationDto {
    id: i64,
    #[serde(default)]
    parameters: Vec<ParameterDto>,
}

#[derive(Deserialize)]
struct ParameterDto {
    key: String,
    value: HackleValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteConfigParameterDto {
    id: i64,
    key: String,
    #[serde(rename = "type")]
    value_type: String,
    identifier_type: String,
    #[serde(default)]
    target_rules: Vec<RemoteConfigTargetRuleDto>,
    default_value: RemoteConfigValueDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteConfigTargetRuleDto {
    key: String,
    name: String,
    target: TargetDto,
    bucket_id: i64,
    value: RemoteConfigValueDto,
}

#[derive(Deserialize)]
struct RemoteConfigValueDto {
    id: i64,
    value: HackleValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InAppMessageDto {
    id: i64,
    key: i64,
    time_unit: String,
    #[serde(default)]
    start_epoch_time_millis: Option<i64>,
    #[serde(default)]
    end_epoch_time_millis: Option<i64>,
    #[serde(default)]
    timetable: Option<TimetableDto>,
    status: String,
    #[serde(default)]
    event_trigger_rules: Vec<EventTriggerRuleDto>,
    #[serde(default)]
    event_frequency_cap: Option<EventFrequencyCapDto>,
    #[serde(default)]
    event_trigger_delay: Option<EventTriggerDelayDto>,
    target_context: TargetContextDto,
    message_context: MessageContextDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DurationDto {
    time_unit: String,
    amount: i64,
}

impl DurationDto {
    fn to_millis(&self) -> Option<i64> {
        let unit = match self.time_unit.as_str() {
            "MILLISECONDS" => 1,
            "SECONDS" => MILLIS_PER_SECOND,
            "MINUTES" => 60 * MILLIS_PER_SECOND,
            "HOURS" => 3_600 * MILLIS_PER_SECOND,
            "DAYS" => 86_400 * MILLIS_PER_SECOND,
            _ => return None,
        };
        self.amount.checked_mul(unit)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimetableDto {
    #[serde(rename = "type")]
    timetable_type: String,
    #[serde(default)]
    slots: Vec<TimetableSlotDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimetableSlotDto {
    day_of_week: String,
    #[serde(default)]
    start_millis_inclusive: Option<i64>,
    #[serde(default)]
    end_millis_exclusive: Option<i64>,
    #[serde(default)]
    start_seconds_inclusive: Option<i64>,
    #[serde(default)]
    end_seconds_exclusive: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTriggerRuleDto {
    event_key: String,
    #[serde(default)]
    targets: Vec<TargetDto>,
}

#[derive(Deserialize)]
struct EventFrequencyCapDto {
    #[serde(default)]
    identifiers: Vec<IdentifierCapDto>,
    #[serde(default)]
    duration: Option<DurationCapDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentifierCapDto {
    identifier_type: String,
    count_per_identifier: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DurationCapDto {
    duration_unit: DurationDto,
    count_per_duration: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTriggerDelayDto {
    #[serde(rename = "type")]
    delay_type: String,
    #[serde(default)]
    after_condition: Option<AfterConditionDto>,
}

#[derive(Deserialize)]
struct AfterConditionDto {
    duration: DurationDto,
}

#[derive(Deserialize)]
struct TargetContextDto {
    #[serde(default)]
    targets: Vec<TargetDto>,
    #[serde(default)]
    overrides: Vec<InAppMessageUserOverrideDto>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InAppMessageUserOverrideDto {
    identifier_type: String,
    #[serde(default)]
    identifiers: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageContextDto {
    default_lang: String,
    exposure: ExposureDto,
    #[serde(default)]
    platform_types: Vec<String>,
    #[serde(default)]
    orientations: Vec<String>,
    #[serde(default)]
    messages: Vec<MessageDto>,
}

#[derive(Deserialize)]
struct ExposureDto {
    #[serde(rename = "type")]
    exposure_type: String,
    #[serde(default)]
    key: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDto {
    #[serde(default)]
    variation_key: Option<String>,
    lang: String,
    layout: LayoutDto,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutDto {
    display_type: String,
    layout_type: String,
}

impl ExperimentDto {
    fn into_experiment(self, experiment_type: ExperimentType) -> Option<Experiment> {
        let status = match self.execution.status.as_str() {
            "READY" => ExperimentStatus::Draft,
            "RUNNING" => ExperimentStatus::Running,
            "PAUSED" => ExperimentStatus::Paused,
            "STOPPED" => ExperimentStatus::Completed,
            unknown => {
                debug!("Unsupported experiment status [{}]", unknown);
                return None;
            }
        };
        let default_rule = match self.execution.default_rule.to_action() {
            Some(action) => action,
            None => {
                debug!("experiment {} dropped: unsupported default rule", self.key);
                return None;
            }
        };

        let execution = self.execution;
        Some(Experiment {
            id: self.id,
            key: self.key,
            name: self.name,
            experiment_type,
            identifier_type: self.identifier_type,
            status,
            version: self.version,
            execution_version: execution.version,
            variations: self
                .variations
                .into_iter()
                .map(|v| Variation {
                    id: v.id,
                    key: v.key,
                    is_dropped: v.status == "DROPPED",
                    parameter_configuration_id: v.parameter_configuration_id,
                })
                .collect(),
            user_overrides: execution
                .user_overrides
                .into_iter()
                .map(|o| (o.user_id, o.variation_id))
                .collect(),
            segment_overrides: execution
                .segment_overrides
                .iter()
                .filter_map(|r| r.to_target_rule(TargetingType::Identifier))
                .collect(),
            target_audiences: execution
                .target_audiences
                .iter()
                .filter_map(|t| t.to_target(TargetingType::Property))
                .collect(),
            target_rules: execution
                .target_rules
                .iter()
                .filter_map(|r| r.to_target_rule(TargetingType::Property))
                .collect(),
            default_rule,
            container_id: self.container_id,
            winner_variation_id: self.winner_variation_id,
        })
    }
}

impl ActionDto {
    fn to_action(&self) -> Option<Action> {
        match (self.action_type.as_str(), self.variation_id, self.bucket_id) {
            ("VARIATION", Some(variation_id), _) => Some(Action::Variation(variation_id)),
            ("BUCKET", _, Some(bucket_id)) => Some(Action::Bucket(bucket_id)),
            _ => {
                debug!("Unsupported action [{}]", self.action_type);
                None
            }
        }
    }
}

impl TargetRuleDto {
    fn to_target_rule(&self, targeting_type: TargetingType) -> Option<TargetRule> {
        Some(TargetRule {
            target: self.target.to_target(targeting_type)?,
            action: self.action.to_action()?,
        })
    }
}

impl TargetDto {
    /// Keeps the conditions valid for `targeting_type`. A target left without conditions is
    /// dropped.
    fn to_target(&self, targeting_type: TargetingType) -> Option<Target> {
        let conditions: Vec<Condition> = self
            .conditions
            .iter()
            .filter_map(|c| c.to_condition(targeting_type))
            .collect();
        if conditions.is_empty() {
            debug!("target dropped: no supported conditions");
            return None;
        }
        Some(Target { conditions })
    }
}

impl ConditionDto {
    fn to_condition(&self, targeting_type: TargetingType) -> Option<Condition> {
        let key_type: KeyType = match parse_enum(&self.key.key_type) {
            Some(key_type) if targeting_type.supports(key_type) => key_type,
            _ => {
                debug!(
                    "condition dropped: key type [{}] not supported for {:?} targeting",
                    self.key.key_type, targeting_type
                );
                return None;
            }
        };
        let m = &self.target_match;
        let (match_type, operator, value_type): (MatchType, Operator, HackleValueType) = match (
            parse_enum(&m.match_type),
            parse_enum(&m.operator),
            parse_enum(&m.value_type),
        ) {
            (Some(match_type), Some(operator), Some(value_type)) => {
                (match_type, operator, value_type)
            }
            _ => {
                debug!(
                    "condition dropped: match [{} {} {}]",
                    m.match_type, m.operator, m.value_type
                );
                return None;
            }
        };
        Some(Condition {
            key: TargetKey {
                key_type,
                name: self.key.name.clone(),
            },
            target_match: TargetMatch {
                match_type,
                operator,
                value_type,
                values: m.values.clone(),
            },
        })
    }
}

impl SegmentDto {
    fn into_segment(self) -> Option<Segment> {
        let segment_type: SegmentType = match parse_enum(&self.segment_type) {
            Some(segment_type) => segment_type,
            None => {
                debug!("segment {} dropped: type [{}]", self.key, self.segment_type);
                return None;
            }
        };
        Some(Segment {
            id: self.id,
            segment_type,
            targets: self
                .targets
                .iter()
                .filter_map(|t| t.to_target(TargetingType::Segment))
                .collect(),
            key: self.key,
        })
    }
}

impl RemoteConfigParameterDto {
    fn into_parameter(self) -> Option<RemoteConfigParameter> {
        let value_type: HackleValueType = match parse_enum(&self.value_type) {
            Some(value_type) => value_type,
            None => {
                debug!("remote config parameter {} dropped: type [{}]", self.key, self.value_type);
                return None;
            }
        };
        Some(RemoteConfigParameter {
            id: self.id,
            key: self.key,
            value_type,
            identifier_type: self.identifier_type,
            target_rules: self
                .target_rules
                .into_iter()
                .filter_map(|r| {
                    Some(RemoteConfigTargetRule {
                        target: r.target.to_target(TargetingType::Property)?,
                        key: r.key,
                        name: r.name,
                        bucket_id: r.bucket_id,
                        value: RemoteConfigValue {
                            id: r.value.id,
                            value: r.value.value,
                        },
                    })
                })
                .collect(),
            default_value: RemoteConfigValue {
                id: self.default_value.id,
                value: self.default_value.value,
            },
        })
    }
}

impl InAppMessageDto {
    fn into_in_app_message(self) -> Option<InAppMessage> {
        let key = self.key;
        let dropped = |what: &str| {
            debug!("in-app message {} dropped: invalid {}", key, what);
        };

        let status: InAppMessageStatus = match parse_enum(&self.status) {
            Some(status) => status,
            None => {
                dropped("status");
                return None;
            }
        };
        let period = match (
            self.time_unit.as_str(),
            self.start_epoch_time_millis,
            self.end_epoch_time_millis,
        ) {
            ("IMMEDIATE", _, _) => InAppMessagePeriod::Always,
            ("CUSTOM", Some(start_inclusive), Some(end_exclusive)) => InAppMessagePeriod::Range {
                start_inclusive,
                end_exclusive,
            },
            _ => {
                dropped("period");
                return None;
            }
        };
        let timetable = match self.timetable.as_ref().map(TimetableDto::to_timetable) {
            None => InAppMessageTimetable::All,
            Some(Some(timetable)) => timetable,
            Some(None) => {
                dropped("timetable");
                return None;
            }
        };
        let message_context = match self.message_context.into_message_context() {
            Some(message_context) => message_context,
            None => {
                dropped("message context");
                return None;
            }
        };
        let delay = match self.event_trigger_delay.as_ref().map(EventTriggerDelayDto::to_delay) {
            None => InAppMessageDelay::Immediate,
            Some(Some(delay)) => delay,
            Some(None) => {
                dropped("trigger delay");
                return None;
            }
        };

        Some(InAppMessage {
            id: self.id,
            key,
            status,
            period,
            timetable,
            event_trigger: InAppMessageEventTrigger {
                rules: self
                    .event_trigger_rules
                    .into_iter()
                    .map(|r| InAppMessageTriggerRule {
                        targets: r
                            .targets
                            .iter()
                            .filter_map(|t| t.to_target(TargetingType::Event))
                            .collect(),
                        event_key: r.event_key,
                    })
                    .collect(),
                frequency_cap: self.event_frequency_cap.map(|cap| InAppMessageFrequencyCap {
                    identifier_caps: cap
                        .identifiers
                        .into_iter()
                        .map(|c| IdentifierCap {
                            identifier_type: c.identifier_type,
                            count: c.count_per_identifier,
                        })
                        .collect(),
                    duration_cap: cap.duration.and_then(|d| {
                        Some(DurationCap {
                            duration_millis: d.duration_unit.to_millis()?,
                            count: d.count_per_duration,
                        })
                    }),
                }),
                delay,
            },
            target_context: InAppMessageTargetContext {
                overrides: self
                    .target_context
                    .overrides
                    .into_iter()
                    .map(|o| InAppMessageUserOverride {
                        identifier_type: o.identifier_type,
                        identifiers: o.identifiers,
                    })
                    .collect(),
                targets: self
                    .target_context
                    .targets
                    .iter()
                    .filter_map(|t| t.to_target(TargetingType::Property))
                    .collect(),
            },
            message_context,
        })
    }
}

impl TimetableDto {
    fn to_timetable(&self) -> Option<InAppMessageTimetable> {
        match self.timetable_type.as_str() {
            "ALL" => Some(InAppMessageTimetable::All),
            "CUSTOM" => self
                .slots
                .iter()
                .map(TimetableSlotDto::to_slot)
                .collect::<Option<Vec<_>>>()
                .map(InAppMessageTimetable::Custom),
            _ => None,
        }
    }
}

impl TimetableSlotDto {
    fn to_slot(&self) -> Option<TimetableSlot> {
        let seconds = |s: Option<i64>| s.and_then(|s| s.checked_mul(MILLIS_PER_SECOND));
        Some(TimetableSlot {
            day_of_week: parse_day_of_week(&self.day_of_week)?,
            start_millis_inclusive: self
                .start_millis_inclusive
                .or_else(|| seconds(self.start_seconds_inclusive))?,
            end_millis_exclusive: self
                .end_millis_exclusive
                .or_else(|| seconds(self.end_seconds_exclusive))?,
        })
    }
}

fn parse_day_of_week(day: &str) -> Option<Weekday> {
    match day {
        "MONDAY" => Some(Weekday::Mon),
        "TUESDAY" => Some(Weekday::Tue),
        "WEDNESDAY" => Some(Weekday::Wed),
        "THURSDAY" => Some(Weekday::Thu),
        "FRIDAY" => Some(Weekday::Fri),
        "SATURDAY" => Some(Weekday::Sat),
        "SUNDAY" => Some(Weekday::Sun),
        _ => None,
    }
}

impl EventTriggerDelayDto {
    fn to_delay(&self) -> Option<InAppMessageDelay> {
        match self.delay_type.as_str() {
            "IMMEDIATE" => Some(InAppMessageDelay::Immediate),
            "AFTER" => Some(InAppMessageDelay::After {
                delay_millis: self.after_condition.as_ref()?.duration.to_millis()?,
            }),
            _ => None,
        }
    }
}

impl MessageContextDto {
    fn into_message_context(self) -> Option<InAppMessageMessageContext> {
        let experiment_key = match (self.exposure.exposure_type.as_str(), self.exposure.key) {
            ("AB_TEST", Some(key)) => Some(key),
            _ => None,
        };
        let platform_types = self
            .platform_types
            .iter()
            .map(|p| parse_enum::<PlatformType>(p))
            .collect::<Option<Vec<_>>>()?;
        let orientations = self
            .orientations
            .iter()
            .map(|o| parse_enum::<Orientation>(o))
            .collect::<Option<Vec<_>>>()?;
        Some(InAppMessageMessageContext {
            default_lang: self.default_lang,
            experiment_key,
            platform_types,
            orientations,
            messages: self
                .messages
                .into_iter()
                .map(|m| InAppMessageMessage {
                    variation_key: m.variation_key,
                    lang: m.lang,
                    layout: InAppMessageLayout {
                        display_type: m.layout.display_type,
                        layout_type: m.layout.layout_type,
                    },
                })
                .collect(),
        })
    }
}
