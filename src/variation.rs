use crate::bucket::bucketing;
use crate::error::{Error, Result};
use crate::experiment::Experiment;
use crate::user::HackleUser;
use crate::workspace::Workspace;

/// One arm of an experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct Variation {
    pub id: i64,
    pub key: String,
    pub is_dropped: bool,
    pub parameter_configuration_id: Option<i64>,
}

/// What a matched rule does: pin a fixed variation or bucket the user into one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Variation(i64),
    Bucket(i64),
}

/// Resolves an action into a variation of `experiment`.
///
/// A fixed variation must exist on the experiment. A bucket action must point at an existing
/// bucket; it yields nothing if the user lacks the experiment's identifier or lands in an empty
/// slot.
pub(crate) fn resolve_action<'a>(
    workspace: &'a Workspace,
    experiment: &'a Experiment,
    user: &HackleUser,
    action: &Action,
) -> Result<Option<&'a Variation>> {
    match *action {
        Action::Variation(variation_id) => experiment
            .get_variation(variation_id)
            .map(Some)
            .ok_or(Error::VariationNotFound(variation_id)),
        Action::Bucket(bucket_id) => {
            let bucket = workspace
                .get_bucket(bucket_id)
                .ok_or(Error::BucketNotFound(bucket_id))?;
            let identifier = match user.identifier(&experiment.identifier_type) {
                Some(identifier) => identifier,
                None => return Ok(None),
            };
            Ok(bucketing(bucket, identifier)?
                .and_then(|slot| experiment.get_variation(slot.variation_id)))
        }
    }
}
