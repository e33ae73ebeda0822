//! Task record model and its state machine.
//!
//! A record is created `Queued`, moves to `Running` once a worker slot picks it
//! up, and ends in exactly one terminal state. Terminal records never change
//! again; the transition helpers here refuse any write that would violate that.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Named artifacts produced by a successful analysis (artifact name -> content).
pub type Artifacts = BTreeMap<String, String>;

/// Globally unique task identifier (random 128-bit UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }

    /// `Completed` and `Failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// - `Queued` -> `Running`
    /// - `Running` -> `Completed` | `Failed`
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        matches!(
            (self, next),
            (TaskState::Queued, TaskState::Running)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The analysis routine returned an error or panicked.
    Worker,
    /// The controller stopped waiting after the processing timeout.
    Timeout,
    /// The recovery sweeper force-failed a task stuck in `Running`.
    Recovered,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Worker => "worker",
            FailureKind::Timeout => "timeout",
            FailureKind::Recovered => "recovered",
        }
    }
}

/// Reference to the submitted unit of work.
///
/// The bytes themselves live in the upload store; the record only keeps
/// what is needed to find and describe them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRef {
    pub filename: String,
    pub size_bytes: u64,
    pub mime_type: Option<String>,
    pub ocr: bool,
}

/// Terminal outcome written by whichever party observes the end first.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(Artifacts),
    Failed { kind: FailureKind, error: String },
}

impl TaskOutcome {
    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind,
            error: error.into(),
        }
    }

    pub fn target_state(&self) -> TaskState {
        match self {
            TaskOutcome::Completed(_) => TaskState::Completed,
            TaskOutcome::Failed { .. } => TaskState::Failed,
        }
    }
}

/// Result of attempting a terminal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The write took effect.
    Applied,
    /// The record was not in a state that allows the write; nothing changed.
    Ignored { current: TaskState },
}

/// What a client sees when asking for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactView {
    Pending(TaskState),
    Ready {
        content: String,
        elapsed_secs: Option<f64>,
    },
    Failed(String),
    Missing,
}

/// One tracked unit of analysis work.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<f64>,
    pub input: InputRef,
    pub result: Option<Artifacts>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Fired when nobody is interested in the outcome anymore.
    #[serde(skip)]
    pub(crate) cancel: CancellationToken,
}

impl TaskRecord {
    pub fn new(input: InputRef, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            state: TaskState::Queued,
            created_at: now,
            started_at: None,
            finished_at: None,
            elapsed_secs: None,
            input,
            result: None,
            error: None,
            failure: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Token handed to the worker running this task.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `Queued -> Running`; records `started_at`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Transition {
        if !self.state.can_transition_to(TaskState::Running) {
            return Transition::Ignored {
                current: self.state,
            };
        }
        self.state = TaskState::Running;
        self.started_at = Some(now);
        Transition::Applied
    }

    /// `Running -> Completed | Failed`. Write-once: any later call is ignored.
    pub fn finish(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) -> Transition {
        if !self.state.can_transition_to(outcome.target_state()) {
            return Transition::Ignored {
                current: self.state,
            };
        }

        match outcome {
            TaskOutcome::Completed(artifacts) => {
                self.state = TaskState::Completed;
                self.result = Some(artifacts);
            }
            TaskOutcome::Failed { kind, error } => {
                self.state = TaskState::Failed;
                self.error = Some(error);
                self.failure = Some(kind);
            }
        }
        self.finished_at = Some(now);
        self.elapsed_secs = self
            .started_at
            .map(|started| (now - started).num_milliseconds().max(0) as f64 / 1000.0);
        Transition::Applied
    }

    /// Resolve a named artifact against the current state.
    pub fn artifact(&self, name: &str) -> ArtifactView {
        match self.state {
            TaskState::Queued | TaskState::Running => ArtifactView::Pending(self.state),
            TaskState::Failed => ArtifactView::Failed(self.error.clone().unwrap_or_default()),
            TaskState::Completed => match self.result.as_ref().and_then(|r| r.get(name)) {
                Some(content) => ArtifactView::Ready {
                    content: content.clone(),
                    elapsed_secs: self.elapsed_secs,
                },
                None => ArtifactView::Missing,
            },
        }
    }

    /// Seconds spent in `Running` so far, if the task has started.
    pub fn running_for(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match (self.state, self.started_at) {
            (TaskState::Running, Some(started)) => Some(now - started),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn input() -> InputRef {
        InputRef {
            filename: "report.pdf".to_string(),
            size_bytes: 42,
            mime_type: Some("application/pdf".to_string()),
            ocr: true,
        }
    }

    #[test]
    fn test_allowed_edges() {
        assert!(TaskState::Queued.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Completed));
        assert!(TaskState::Running.can_transition_to(TaskState::Failed));

        assert!(!TaskState::Queued.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Completed.can_transition_to(TaskState::Running));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Completed));
        assert!(!TaskState::Running.can_transition_to(TaskState::Running));
    }

    #[test]
    fn test_complete_sets_result_and_elapsed() {
        let t0 = Utc::now();
        let mut record = TaskRecord::new(input(), t0);
        assert_eq!(record.mark_running(t0), Transition::Applied);

        let mut artifacts = Artifacts::new();
        artifacts.insert("markdown".to_string(), "# Hello".to_string());
        let t1 = t0 + Duration::milliseconds(1500);
        assert_eq!(
            record.finish(TaskOutcome::Completed(artifacts), t1),
            Transition::Applied
        );

        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.elapsed_secs, Some(1.5));
        assert!(record.error.is_none());
        assert_eq!(record.result.as_ref().unwrap()["markdown"], "# Hello");
    }

    #[test]
    fn test_terminal_state_is_write_once() {
        let now = Utc::now();
        let mut record = TaskRecord::new(input(), now);
        record.mark_running(now);
        record.finish(TaskOutcome::failed(FailureKind::Timeout, "timeout"), now);

        let second = record.finish(TaskOutcome::Completed(Artifacts::new()), now);
        assert_eq!(
            second,
            Transition::Ignored {
                current: TaskState::Failed
            }
        );
        assert!(record.result.is_none());
        assert_eq!(record.failure, Some(FailureKind::Timeout));
        assert_eq!(record.mark_running(now), second);
    }

    #[test]
    fn test_queued_cannot_finish() {
        let now = Utc::now();
        let mut record = TaskRecord::new(input(), now);
        let outcome = record.finish(TaskOutcome::failed(FailureKind::Worker, "boom"), now);
        assert_eq!(
            outcome,
            Transition::Ignored {
                current: TaskState::Queued
            }
        );
        assert!(record.error.is_none());
    }

    #[test]
    fn test_artifact_view_follows_state() {
        let now = Utc::now();
        let mut record = TaskRecord::new(input(), now);
        assert_eq!(
            record.artifact("markdown"),
            ArtifactView::Pending(TaskState::Queued)
        );

        record.mark_running(now);
        record.finish(
            TaskOutcome::failed(FailureKind::Worker, "model weights missing"),
            now,
        );
        assert_eq!(
            record.artifact("markdown"),
            ArtifactView::Failed("model weights missing".to_string())
        );
    }

    #[test]
    fn test_serialized_shape() {
        let record = TaskRecord::new(input(), Utc::now());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "queued");
        assert_eq!(json["input"]["filename"], "report.pdf");
        assert!(json["result"].is_null());
        assert!(json.get("cancel").is_none());
    }
}
