//! Step and answer types for multi-step flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One screen's worth of a flow (intro, eligibility questions, consent, …).
///
/// `content` is display data owned by the UI layer; the core never inspects
/// it. Steps are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    id: String,
    title: String,
    content: serde_json::Value,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }
}

/// How a step resolves its successor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NextStep {
    /// The flow ends here (e.g. "you're in" / "not eligible" outcomes).
    Terminal,
    /// Unconditional successor.
    Fixed { to: String },
    /// Successor chosen by matching collected answers against each arm in
    /// order; `otherwise` is taken when no arm matches.
    Branch {
        arms: Vec<BranchArm>,
        otherwise: String,
    },
}

/// One conditional route out of a branching step. The arm matches when every
/// requirement is satisfied by the answers collected so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchArm {
    pub requirements: Vec<AnswerRequirement>,
    pub to: String,
}

/// A single condition over a collected answer, e.g. `hasWearableDevice ==
/// "Yes"`. Evaluation is pure: the same answers always produce the same
/// verdict, so re-entering a flow after a restart reproduces the route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRequirement {
    pub question_id: String,
    pub expected: serde_json::Value,
}

impl AnswerRequirement {
    pub fn equals(question_id: impl Into<String>, expected: serde_json::Value) -> Self {
        Self {
            question_id: question_id.into(),
            expected,
        }
    }
}

/// A participant's answer to one question, scoped to a single flow traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub value: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl Answer {
    pub fn new(question_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            question_id: question_id.into(),
            value,
            recorded_at: Utc::now(),
        }
    }
}

/// What the UI hands back when the participant finishes the current step.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    pub answers: Vec<Answer>,
}

impl StepOutput {
    /// A step that produced no answers (intro screens, result screens).
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_answer(mut self, question_id: impl Into<String>, value: serde_json::Value) -> Self {
        self.answers.push(Answer::new(question_id, value));
        self
    }
}
