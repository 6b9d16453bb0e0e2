//! Walking one participant through a step flow.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::AnswerRetention;
use crate::store::LocalStore;

use super::graph::{ResolvedNext, StepFlow};
use super::step::{Answer, AnswerRequirement, Step, StepOutput};
use super::FlowError;

/// Invoked when the participant abandons the flow. User-initiated exit is an
/// expected path, so it reports through this callback instead of an error.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Result of one [`FlowTraversal::advance`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// Moved to the next step; the flow continues.
    Moved,
    /// A terminal step was acknowledged; the traversal is finished.
    Completed(FlowCompletion),
}

/// Summary of a finished traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCompletion {
    pub flow_id: String,
    /// The terminal step the route ended on (e.g. the eligibility outcome).
    pub terminal_step_id: String,
    /// Answers collected along the route, in the order they were recorded.
    pub answers: Vec<Answer>,
}

/// A single run through a [`StepFlow`]: current step pointer plus the answers
/// collected so far.
///
/// Answers are immutable once the pointer moves past the step that produced
/// them; re-answering a question later in the same run is rejected. Branch
/// resolution is a pure function of the answers, so identical answers always
/// take identical routes.
pub struct FlowTraversal {
    flow: Arc<StepFlow>,
    current: Option<usize>,
    answers: Vec<Answer>,
    answered: HashSet<String>,
    retention: AnswerRetention,
    store: Option<Arc<dyn LocalStore>>,
    on_cancel: Option<CancelCallback>,
}

impl FlowTraversal {
    /// Start a traversal at the flow's entry step. Answers are discarded on
    /// completion unless a store and retention policy are attached.
    pub fn new(flow: Arc<StepFlow>) -> Self {
        let entry = flow.entry();
        Self {
            flow,
            current: Some(entry),
            answers: Vec::new(),
            answered: HashSet::new(),
            retention: AnswerRetention::Discard,
            store: None,
            on_cancel: None,
        }
    }

    /// Persist collected answers through `store` on completion, per `policy`.
    pub fn with_retention(mut self, policy: AnswerRetention, store: Arc<dyn LocalStore>) -> Self {
        self.retention = policy;
        self.store = Some(store);
        self
    }

    pub fn with_cancel_callback(mut self, callback: CancelCallback) -> Self {
        self.on_cancel = Some(callback);
        self
    }

    /// The step the flow is presently on; `None` once a terminal step has
    /// been acknowledged or the traversal was canceled.
    pub fn current(&self) -> Option<&Step> {
        self.current.map(|idx| self.flow.step(idx))
    }

    /// Answers collected so far, in recording order.
    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    /// Record the current step's output and move to its successor.
    ///
    /// Advancing on a terminal step finishes the traversal and returns
    /// [`AdvanceOutcome::Completed`].
    ///
    /// # Errors
    /// - `TraversalFinished` if the flow already ended
    /// - `AnswerAlreadyRecorded` if `output` re-answers a question from an
    ///   earlier step
    /// - `UnresolvedBranch` if the current step branches on a question that
    ///   has no recorded answer
    pub async fn advance(&mut self, output: StepOutput) -> Result<AdvanceOutcome, FlowError> {
        let current = self.current.ok_or(FlowError::TraversalFinished)?;

        for answer in &output.answers {
            if self.answered.contains(&answer.question_id) {
                return Err(FlowError::AnswerAlreadyRecorded {
                    question_id: answer.question_id.clone(),
                });
            }
        }
        for answer in output.answers {
            self.answered.insert(answer.question_id.clone());
            self.answers.push(answer);
        }

        match self.flow.next_of(current) {
            ResolvedNext::Terminal => {
                let completion = FlowCompletion {
                    flow_id: self.flow.id().to_string(),
                    terminal_step_id: self.flow.step(current).id().to_string(),
                    answers: self.answers.clone(),
                };
                self.current = None;
                info!(
                    flow = %completion.flow_id,
                    outcome = %completion.terminal_step_id,
                    "Flow completed"
                );
                self.retain_answers(&completion).await;
                Ok(AdvanceOutcome::Completed(completion))
            }
            ResolvedNext::Fixed(to) => {
                self.current = Some(*to);
                debug!(flow = %self.flow.id(), step = %self.flow.step(*to).id(), "Flow advanced");
                Ok(AdvanceOutcome::Moved)
            }
            ResolvedNext::Branch { arms, otherwise } => {
                let to = self.resolve_branch(current, arms, *otherwise)?;
                self.current = Some(to);
                debug!(flow = %self.flow.id(), step = %self.flow.step(to).id(), "Flow branched");
                Ok(AdvanceOutcome::Moved)
            }
        }
    }

    /// Abort the traversal, discarding unsaved answers.
    pub fn cancel(&mut self) {
        if self.current.is_none() {
            return;
        }
        self.current = None;
        self.answers.clear();
        self.answered.clear();
        info!(flow = %self.flow.id(), "Flow canceled");
        if let Some(callback) = &self.on_cancel {
            callback(self.flow.id());
        }
    }

    /// Pure branch evaluation: first arm whose requirements all match wins;
    /// a requirement over an unanswered question aborts with
    /// `UnresolvedBranch`.
    fn resolve_branch(
        &self,
        current: usize,
        arms: &[(Vec<AnswerRequirement>, usize)],
        otherwise: usize,
    ) -> Result<usize, FlowError> {
        for (requirements, target) in arms {
            let mut all_match = true;
            for req in requirements {
                let answer = self
                    .answers
                    .iter()
                    .find(|a| a.question_id == req.question_id)
                    .ok_or_else(|| FlowError::UnresolvedBranch {
                        step: self.flow.step(current).id().to_string(),
                        question_id: req.question_id.clone(),
                    })?;
                if answer.value != req.expected {
                    all_match = false;
                    break;
                }
            }
            if all_match {
                return Ok(*target);
            }
        }
        Ok(otherwise)
    }

    async fn retain_answers(&self, completion: &FlowCompletion) {
        if self.retention != AnswerRetention::Persist {
            return;
        }
        let Some(store) = &self.store else { return };
        // Persistence trouble is transient; the completed flow still
        // completes and the failure surfaces in the log.
        if let Err(err) = store
            .put_answers(&completion.flow_id, &completion.answers)
            .await
        {
            error!(flow = %completion.flow_id, error = %err, "Failed to persist flow answers");
        }
    }
}
