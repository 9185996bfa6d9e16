use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::command::ClickAction;

/// What a task asks the pointer to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskRequest {
    Move { target: String },
    MoveAndClick { target: String, action: ClickAction },
    /// Click into `target`, then type `text`.
    Type { target: String, text: String },
}

impl TaskRequest {
    pub fn target(&self) -> &str {
        match self {
            TaskRequest::Move { target }
            | TaskRequest::MoveAndClick { target, .. }
            | TaskRequest::Type { target, .. } => target,
        }
    }

    /// The click the finished command should carry.
    pub fn desired_action(&self) -> ClickAction {
        match self {
            TaskRequest::Move { .. } => ClickAction::None,
            TaskRequest::MoveAndClick { action, .. } => *action,
            TaskRequest::Type { .. } => ClickAction::Click,
        }
    }

    /// Short imperative phrase used in prompts and logs.
    pub fn intent(&self) -> String {
        match self {
            TaskRequest::Move { target } => format!("move the pointer onto '{target}'"),
            TaskRequest::MoveAndClick { target, action } => match action {
                ClickAction::None => format!("move the pointer onto '{target}'"),
                ClickAction::Click => format!("click '{target}'"),
                ClickAction::DoubleClick => format!("double-click '{target}'"),
                ClickAction::RightClick => format!("right-click '{target}'"),
            },
            TaskRequest::Type { target, .. } => format!("click into '{target}' to type"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Executing,
    Succeeded,
    FailedRetryable,
    DeadLetter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub identifier: String,
    pub request: TaskRequest,
    /// Looser completion check run after the positional one.
    pub expected_outcome: Option<String>,
    pub state: TaskState,
    pub retry_count: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last error seen, kept for dead-letter inspection.
    pub last_error: Option<String>,
}

impl Task {
    /// A click on the element named by `identifier`.
    pub fn new(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let request = TaskRequest::MoveAndClick {
            target: identifier.clone(),
            action: ClickAction::Click,
        };
        Self::from_request(identifier, request)
    }

    pub fn from_request(identifier: impl Into<String>, request: TaskRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier: identifier.into(),
            request,
            expected_outcome: None,
            state: TaskState::Queued,
            retry_count: 0,
            created_at: chrono::Utc::now(),
            last_error: None,
        }
    }

    pub fn with_expected_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = Some(outcome.into());
        self
    }
}

/// Steps of one regeneration cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Parse,
    Validate,
    Move,
    Click,
    Verify,
    Regenerate,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Parse => "parse",
            Phase::Validate => "validate",
            Phase::Move => "move",
            Phase::Click => "click",
            Phase::Verify => "verify",
            Phase::Regenerate => "regenerate",
            Phase::Done => "done",
            Phase::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tasks_processed: u64,
    /// Failed attempts, including ones that were later retried successfully.
    pub tasks_failed: u64,
    pub dead_lettered: u64,
    /// Seconds per attempt, averaged over every attempt.
    pub average_processing_time: f64,
}

impl Metrics {
    pub fn record_attempt(&mut self, elapsed: Duration, success: bool) {
        if success {
            self.tasks_processed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let n = (self.tasks_processed + self.tasks_failed) as f64;
        self.average_processing_time += (elapsed.as_secs_f64() - self.average_processing_time) / n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_task_is_a_click() {
        let task = Task::new("Submit");
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.request.desired_action(), ClickAction::Click);
        assert_eq!(task.request.intent(), "click 'Submit'");
        assert_ne!(task.id, Task::new("Submit").id);
    }

    #[test]
    fn metrics_average_over_all_attempts() {
        let mut m = Metrics::default();
        m.record_attempt(Duration::from_secs(1), false);
        m.record_attempt(Duration::from_secs(3), true);
        assert_eq!((m.tasks_processed, m.tasks_failed), (1, 1));
        assert!((m.average_processing_time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn requests_serialize_tagged() {
        let req = TaskRequest::Type {
            target: "Search".into(),
            text: "rust".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "type");
        assert_eq!(req.desired_action(), ClickAction::Click);
    }
}
