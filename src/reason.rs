use std::fmt;

use serde::{Deserialize, Serialize};

/// DecisionReason explains why an evaluation produced its outcome.
///
/// The serialized names are a stable analytics contract and must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionReason {
    SdkNotReady,
    Exception,
    InvalidInput,

    ExperimentNotFound,
    ExperimentDraft,
    ExperimentPaused,
    ExperimentCompleted,
    Overridden,
    TrafficNotAllocated,
    TrafficAllocated,
    TrafficAllocatedByTargeting,
    NotInMutualExclusionExperiment,
    IdentifierNotFound,
    VariationDropped,
    NotInExperimentTarget,
    ExperimentControlGroup,

    FeatureFlagNotFound,
    FeatureFlagInactive,
    IndividualTargetMatch,
    TargetRuleMatch,
    DefaultRule,

    RemoteConfigParameterNotFound,
    TypeMismatch,

    UnsupportedPlatform,
    InAppMessageNotFound,
    InAppMessageDraft,
    InAppMessagePaused,
    InAppMessageHidden,
    InAppMessageTarget,
    NotInInAppMessagePeriod,
    NotInInAppMessageTimetable,
    NotInInAppMessageTarget,
    InAppMessageFrequencyCapped,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        use DecisionReason::*;
        match self {
            SdkNotReady => "SDK_NOT_READY",
            Exception => "EXCEPTION",
            InvalidInput => "INVALID_INPUT",
            ExperimentNotFound => "EXPERIMENT_NOT_FOUND",
            ExperimentDraft => "EXPERIMENT_DRAFT",
            ExperimentPaused => "EXPERIMENT_PAUSED",
            ExperimentCompleted => "EXPERIMENT_COMPLETED",
            Overridden => "OVERRIDDEN",
            TrafficNotAllocated => "TRAFFIC_NOT_ALLOCATED",
            TrafficAllocated => "TRAFFIC_ALLOCATED",
            TrafficAllocatedByTargeting => "TRAFFIC_ALLOCATED_BY_TARGETING",
            NotInMutualExclusionExperiment => "NOT_IN_MUTUAL_EXCLUSION_EXPERIMENT",
            IdentifierNotFound => "IDENTIFIER_NOT_FOUND",
            VariationDropped => "VARIATION_DROPPED",
            NotInExperimentTarget => "NOT_IN_EXPERIMENT_TARGET",
            ExperimentControlGroup => "EXPERIMENT_CONTROL_GROUP",
            FeatureFlagNotFound => "FEATURE_FLAG_NOT_FOUND",
            FeatureFlagInactive => "FEATURE_FLAG_INACTIVE",
            IndividualTargetMatch => "INDIVIDUAL_TARGET_MATCH",
            TargetRuleMatch => "TARGET_RULE_MATCH",
            DefaultRule => "DEFAULT_RULE",
            RemoteConfigParameterNotFound => "REMOTE_CONFIG_PARAMETER_NOT_FOUND",
            TypeMismatch => "TYPE_MISMATCH",
            UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            InAppMessageNotFound => "IN_APP_MESSAGE_NOT_FOUND",
            InAppMessageDraft => "IN_APP_MESSAGE_DRAFT",
            InAppMessagePaused => "IN_APP_MESSAGE_PAUSED",
            InAppMessageHidden => "IN_APP_MESSAGE_HIDDEN",
            InAppMessageTarget => "IN_APP_MESSAGE_TARGET",
            NotInInAppMessagePeriod => "NOT_IN_IN_APP_MESSAGE_PERIOD",
            NotInInAppMessageTimetable => "NOT_IN_IN_APP_MESSAGE_TIMETABLE",
            NotInInAppMessageTarget => "NOT_IN_IN_APP_MESSAGE_TARGET",
            InAppMessageFrequencyCapped => "IN_APP_MESSAGE_FREQUENCY_CAPPED",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
