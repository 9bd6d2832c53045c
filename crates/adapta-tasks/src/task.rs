use adapta_core::BackendError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created, not yet dispatched to the adapter.
    Submitted,
    /// Adapter invocation in flight.
    Working,
    /// Finished with output.
    Completed,
    /// Finished with a classified backend error.
    Failed,
    /// Cancel observed before the task finished.
    Canceled,
}

impl TaskState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Submitted, Working)
                | (Submitted, Canceled)
                | (Working, Completed)
                | (Working, Failed)
                | (Working, Canceled)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Submitted => write!(f, "submitted"),
            TaskState::Working => write!(f, "working"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Canceled => write!(f, "canceled"),
        }
    }
}

/// A state change requested of the store.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    /// Submitted → Working.
    Start,
    /// Working → Completed with the final output.
    Complete(String),
    /// Working → Failed.
    Fail(BackendError),
    /// Submitted or Working → Canceled.
    Cancel,
}

impl TaskUpdate {
    /// The state this update moves a record to.
    pub fn target(&self) -> TaskState {
        match self {
            TaskUpdate::Start => TaskState::Working,
            TaskUpdate::Complete(_) => TaskState::Completed,
            TaskUpdate::Fail(_) => TaskState::Failed,
            TaskUpdate::Cancel => TaskState::Canceled,
        }
    }
}

/// One invocation and its tracked lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Unique task id.
    pub id: Uuid,
    /// Caller conversation id, passed through to the adapter.
    pub context_id: Option<String>,
    /// Raw input text. Never serialized.
    #[serde(skip)]
    pub input: String,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Final output, or the chunks streamed so far.
    pub output: String,
    /// Set only when `state` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BackendError>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A fresh `Submitted` record with a new id.
    pub fn new(input: impl Into<String>, context_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            context_id,
            input: input.into(),
            state: TaskState::Submitted,
            output: String::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `update` after checking the transition is legal. Returns the
    /// rejected target state on failure; the record is left untouched.
    pub(crate) fn apply(&mut self, update: TaskUpdate) -> Result<(), TaskState> {
        let target = update.target();
        if !self.state.can_transition_to(target) {
            return Err(target);
        }
        match update {
            TaskUpdate::Complete(output) => self.output = output,
            TaskUpdate::Fail(error) => self.error = Some(error),
            TaskUpdate::Start | TaskUpdate::Cancel => {}
        }
        self.state = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}
