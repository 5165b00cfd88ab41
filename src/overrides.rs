use crate::error::Result;
use crate::eval::{Evaluator, EvaluatorContext};
use crate::experiment::ExperimentRequest;
use crate::variation::{resolve_action, Variation};

/// Finds a variation forced on the user, checking in order: the manual override storage, the
/// experiment's per-identifier overrides and its segment override rules.
pub(crate) fn resolve_override<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Result<Option<&'a Variation>> {
    if let Some(variation) = resolve_manual_override(evaluator, request) {
        return Ok(Some(variation));
    }
    if let Some(variation) = resolve_user_override(request) {
        return Ok(Some(variation));
    }
    resolve_segment_override(evaluator, request, context)
}

fn resolve_manual_override<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
) -> Option<&'a Variation> {
    let variation_id = evaluator
        .manual_override_storage()
        .get(request.experiment, request.user)?;
    request.experiment.get_variation(variation_id)
}

fn resolve_user_override<'a>(request: &ExperimentRequest<'a>) -> Option<&'a Variation> {
    let experiment = request.experiment;
    let identifier = request.user.identifier(&experiment.identifier_type)?;
    let variation_id = experiment.user_overrides.get(identifier)?;
    experiment.get_variation(*variation_id)
}

fn resolve_segment_override<'a>(
    evaluator: &Evaluator,
    request: &ExperimentRequest<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Result<Option<&'a Variation>> {
    for rule in &request.experiment.segment_overrides {
        if evaluator.target_matches(request, context, &rule.target)? {
            return resolve_action(
                request.workspace,
                request.experiment,
                request.user,
                &rule.action,
            );
        }
    }
    Ok(None)
}
