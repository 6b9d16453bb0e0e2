//! Core study task type and its lifecycle state machine.
//!
//! # Invariants
//! - `completed_at.is_some()` if and only if `state == Completed`
//! - `window_start < window_end`
//! - Terminal states are final for a given occurrence; recurring tasks get a
//!   fresh occurrence (new `TaskId`) instead of reusing a terminal one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::TimeRange;

/// Unique identifier for one task occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a fresh occurrence id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a task's occurrences happen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// A single occurrence at a fixed time.
    OneOff { at: DateTime<Utc> },
    /// Occurrences at `first_at`, `first_at + every`, `first_at + 2*every`, …
    Recurring {
        first_at: DateTime<Utc>,
        every: std::time::Duration,
    },
}

impl Schedule {
    /// Start of the earliest occurrence at or after `after`, if any.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::OneOff { at } => (*at >= after).then_some(*at),
            Schedule::Recurring { first_at, every } => {
                if *first_at >= after {
                    return Some(*first_at);
                }
                let every_ms = every.as_millis() as i64;
                if every_ms <= 0 {
                    return None;
                }
                let elapsed_ms = (after - *first_at).num_milliseconds();
                let periods = elapsed_ms.div_euclid(every_ms)
                    + if elapsed_ms.rem_euclid(every_ms) == 0 { 0 } else { 1 };
                Some(*first_at + chrono::Duration::milliseconds(periods * every_ms))
            }
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, Schedule::Recurring { .. })
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::OneOff { at } => write!(f, "once at {}", at.to_rfc3339()),
            Schedule::Recurring { every, .. } => {
                let secs = every.as_secs();
                if secs >= 86_400 {
                    write!(f, "every {} days", secs / 86_400)
                } else if secs >= 3600 {
                    write!(f, "every {} hours", secs / 3600)
                } else {
                    write!(f, "every {} minutes", secs / 60)
                }
            }
        }
    }
}

/// Lifecycle state of one task occurrence.
///
/// # State Machine
/// ```text
/// Scheduled -> Active -> InProgress -> Completed
///                    \            \-> Canceled
///                     \-> Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Occurrence exists but its window has not opened.
    Scheduled,
    /// Window is open; the participant can start it.
    Active,
    /// The participant has started working on it.
    InProgress,
    /// Finished by the participant.
    Completed,
    /// Ended without completion (user cancel or missed window).
    Canceled,
}

impl TaskState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Canceled)
    }

    /// States in which the participant can act on the task.
    pub fn is_actionable(&self) -> bool {
        matches!(self, TaskState::Active | TaskState::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Scheduled => "scheduled",
            TaskState::Active => "active",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schedulable unit of study participation (a survey, a sensor recording
/// session) with a completion window and lifecycle state.
///
/// All fields are immutable after construction except `state`/`completed_at`,
/// which change only through the validated transition methods below. The
/// lifecycle engine is the sole mutator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyTask {
    id: TaskId,
    /// Stable definition id shared by all occurrences of the same task.
    definition_id: String,
    title: String,
    description: String,
    schedule: Schedule,
    required_data_types: Vec<String>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    state: TaskState,
    completed_at: Option<DateTime<Utc>>,
}

impl StudyTask {
    /// Create a new occurrence in `Scheduled` state.
    ///
    /// # Errors
    /// `EmptyTitle` if the title is blank, `InvalidWindow` if the window is
    /// not a non-empty half-open interval.
    pub fn new(
        definition_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        schedule: Schedule,
        required_data_types: Vec<String>,
        window: TimeRange,
    ) -> Result<Self, TaskError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }
        if window.is_empty() {
            return Err(TaskError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }

        Ok(Self {
            id: TaskId::new(),
            definition_id: definition_id.into(),
            title,
            description: description.into(),
            schedule,
            required_data_types,
            window_start: window.start,
            window_end: window.end,
            state: TaskState::Scheduled,
            completed_at: None,
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn required_data_types(&self) -> &[String] {
        &self.required_data_types
    }

    pub fn window(&self) -> TimeRange {
        TimeRange::new(self.window_start, self.window_end)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Whether the completion window has fully passed.
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end
    }

    /// Refresh display fields from an updated definition.
    pub(crate) fn apply_definition(&mut self, title: &str, description: &str) {
        self.title = title.to_string();
        self.description = description.to_string();
    }

    // State transitions - explicit and validated.

    /// `Scheduled -> Active` when the window opens.
    pub fn activate(&mut self) -> Result<(), TaskError> {
        match self.state {
            TaskState::Scheduled => {
                self.state = TaskState::Active;
                Ok(())
            }
            other => Err(TaskError::invalid(other, TaskState::Active)),
        }
    }

    /// `Active -> InProgress` when the participant opens the task.
    pub fn begin(&mut self) -> Result<(), TaskError> {
        match self.state {
            TaskState::Active => {
                self.state = TaskState::InProgress;
                Ok(())
            }
            other => Err(TaskError::invalid(other, TaskState::InProgress)),
        }
    }

    /// `Active | InProgress -> Completed`, stamping `completed_at`.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), TaskError> {
        if self.state.is_actionable() {
            self.state = TaskState::Completed;
            self.completed_at = Some(at);
            Ok(())
        } else {
            Err(TaskError::invalid(self.state, TaskState::Completed))
        }
    }

    /// `Active | InProgress -> Canceled` (participant-initiated).
    pub fn cancel(&mut self) -> Result<(), TaskError> {
        if self.state.is_actionable() {
            self.state = TaskState::Canceled;
            Ok(())
        } else {
            Err(TaskError::invalid(self.state, TaskState::Canceled))
        }
    }

    /// Any non-terminal state `-> Canceled` when the window elapses unmet.
    ///
    /// Unlike [`cancel`](Self::cancel) this also applies to `Scheduled`
    /// occurrences (a restart can surface a never-activated task whose
    /// window already closed). The occurrence is kept for the audit trail.
    pub(crate) fn expire(&mut self) -> Result<(), TaskError> {
        if self.state.is_terminal() {
            return Err(TaskError::invalid(self.state, TaskState::Canceled));
        }
        self.state = TaskState::Canceled;
        Ok(())
    }
}

/// Errors from task construction and state transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("task window [{start}, {end}) is not a valid half-open interval")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
}

impl TaskError {
    fn invalid(from: TaskState, to: TaskState) -> Self {
        TaskError::InvalidTransition { from, to }
    }
}
