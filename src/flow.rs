use std::ops::Add;

use crate::error::Result;
use crate::eval::{Evaluator, EvaluatorContext};

/// FlowEvaluator is one step of an [EvaluationFlow].
///
/// A step either decides (returns an evaluation) or hands the request to the rest of the flow
/// with [evaluate_next]. Steps are plain enums so that a flow is a fixed list checked at compile
/// time, and a step can never be handed a request or flow of the wrong kind.
pub trait FlowEvaluator: Sized {
    type Request<'a>;
    type Evaluation<'a>;

    fn evaluate<'a>(
        &self,
        evaluator: &Evaluator,
        request: &Self::Request<'a>,
        context: &mut EvaluatorContext<'a>,
        next_flow: &[Self],
    ) -> Result<Option<Self::Evaluation<'a>>>;
}

/// An ordered chain of steps. Running off the end yields `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct EvaluationFlow<S> {
    steps: Vec<S>,
}

impl<S> EvaluationFlow<S> {
    pub fn of(steps: Vec<S>) -> Self {
        EvaluationFlow { steps }
    }

    pub fn end() -> Self {
        EvaluationFlow { steps: Vec::new() }
    }

    pub fn steps(&self) -> &[S] {
        &self.steps
    }
}

impl<S: FlowEvaluator> EvaluationFlow<S> {
    pub fn evaluate<'a>(
        &self,
        evaluator: &Evaluator,
        request: &S::Request<'a>,
        context: &mut EvaluatorContext<'a>,
    ) -> Result<Option<S::Evaluation<'a>>> {
        evaluate_next(&self.steps, evaluator, request, context)
    }
}

/// Runs the first step of `next_flow` against the remaining steps.
pub fn evaluate_next<'a, S: FlowEvaluator>(
    next_flow: &[S],
    evaluator: &Evaluator,
    request: &S::Request<'a>,
    context: &mut EvaluatorContext<'a>,
) -> Result<Option<S::Evaluation<'a>>> {
    match next_flow.split_first() {
        Some((step, rest)) => step.evaluate(evaluator, request, context, rest),
        None => Ok(None),
    }
}

impl<S: Clone> Add for &EvaluationFlow<S> {
    type Output = EvaluationFlow<S>;

    fn add(self, rhs: Self) -> EvaluationFlow<S> {
        let mut steps = self.steps.clone();
        steps.extend(rhs.steps.iter().cloned());
        EvaluationFlow { steps }
    }
}

impl<S> Add for EvaluationFlow<S> {
    type Output = EvaluationFlow<S>;

    fn add(mut self, rhs: Self) -> EvaluationFlow<S> {
        self.steps.extend(rhs.steps);
        self
    }
}
