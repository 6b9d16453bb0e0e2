//! Multi-step flow engine (onboarding, sign-up).
//!
//! A [`StepFlow`] describes the steps and their branching; a
//! [`FlowTraversal`] walks one participant through it, collecting
//! [`Answer`]s and resolving branches deterministically. Flows are validated
//! at construction so a malformed study configuration fails at startup, not
//! mid-onboarding.

mod graph;
mod step;
mod traversal;

pub use graph::StepFlow;
pub use step::{Answer, AnswerRequirement, BranchArm, NextStep, Step, StepOutput};
pub use traversal::{AdvanceOutcome, FlowCompletion, FlowTraversal};

/// Errors from flow construction and traversal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    // Construction-time: a malformed flow must not be allowed to run.
    #[error("duplicate step id {step}")]
    DuplicateStep { step: String },

    #[error("unknown step {step}")]
    UnknownStep { step: String },

    #[error("step {step} is not reachable from the entry step")]
    UnreachableStep { step: String },

    #[error("step {step} is its own transitive successor")]
    CycleDetected { step: String },

    #[error("flow {flow} has no terminal step")]
    NoTerminalStep { flow: String },

    // Traversal-time.
    #[error("cannot resolve branch at step {step}: no answer for {question_id}")]
    UnresolvedBranch { step: String, question_id: String },

    #[error("answer for {question_id} was already recorded in this traversal")]
    AnswerAlreadyRecorded { question_id: String },

    #[error("traversal already finished")]
    TraversalFinished,
}
