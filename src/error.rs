use thiserror::Error;

use crate::eval::EvaluatorKey;
use crate::rule::KeyType;

pub type Result<T> = std::result::Result<T, Error>;

/// Error is returned when an evaluation cannot proceed because the workspace is internally
/// inconsistent, or because evaluation re-entered itself.
///
/// These are never expected in a well-formed workspace. [crate::HackleCore] turns every one of
/// them into the caller default with [crate::DecisionReason::Exception].
#[derive(Debug, Error)]
pub enum Error {
    #[error("circular evaluation has occurred [{}]", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "))]
    CircularEvaluation(Vec<EvaluatorKey>),

    #[error("Unsupported TargetKeyType [{0:?}]")]
    UnsupportedKeyType(KeyType),

    #[error("Bucket[{0}]")]
    BucketNotFound(i64),

    #[error("Variation[{0}]")]
    VariationNotFound(i64),

    #[error("Segment[{0}]")]
    SegmentNotFound(String),

    #[error("Container[{0}]")]
    ContainerNotFound(i64),

    #[error("ParameterConfiguration[{0}]")]
    ParameterConfigurationNotFound(i64),

    #[error("Experiment[{0}]")]
    ExperimentNotFound(i64),

    #[error("InAppMessage[{0}]")]
    InAppMessageNotFound(i64),

    #[error("winner variation [{0}]")]
    WinnerVariationNotFound(i64),

    #[error("variation not decided [{0}]")]
    VariationNotDecided(i64),

    #[error("InAppMessage must be decided [{0}]")]
    MessageNotDecided(i64),

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error(transparent)]
    Hash(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
