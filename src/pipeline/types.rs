use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use crate::services::BilingualPair;

/// Pipeline stages in execution order. The derived ordering is what makes
/// stage transitions monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    Received,
    HealthCheck,
    KeywordExtraction,
    ContentGeneration,
    ClipAssembly,
    VideoSpecCompilation,
    Rendering,
    Finalize,
    Completed,
    Failed,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Received => "Request received",
            Stage::HealthCheck => "Checking service health",
            Stage::KeywordExtraction => "Extracting search keyword",
            Stage::ContentGeneration => "Generating bilingual content",
            Stage::ClipAssembly => "Assembling clips",
            Stage::VideoSpecCompilation => "Compiling video specs",
            Stage::Rendering => "Rendering clips",
            Stage::Finalize => "Finalizing video",
            Stage::Completed => "Completed",
            Stage::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("invalid stage transition from {from} to {to}")]
pub struct StageError {
    pub from: Stage,
    pub to: Stage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub task_id: String,
    pub account_id: String,
    pub prompt: String,
}

impl TaskRequest {
    /// A request with a freshly generated task id.
    pub fn new(account_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutput {
    /// Storage keys of the uploaded artifacts.
    pub downloads: Vec<String>,
    pub content: Vec<BilingualPair>,
}

/// Terminal record of a task.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(PipelineOutput),
    Failed(FailureEvent),
}

/// One end-to-end request, owned and mutated by the orchestrator only.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub account_id: String,
    pub prompt: String,
    stage: Stage,
    stage_times: BTreeMap<Stage, DateTime<Utc>>,
    outcome: Option<Outcome>,
}

impl Task {
    pub fn new(request: TaskRequest) -> Self {
        let mut stage_times = BTreeMap::new();
        stage_times.insert(Stage::Received, Utc::now());
        Self {
            id: request.task_id,
            account_id: request.account_id,
            prompt: request.prompt,
            stage: Stage::Received,
            stage_times,
            outcome: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn entered_at(&self, stage: Stage) -> Option<DateTime<Utc>> {
        self.stage_times.get(&stage).copied()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Record the terminal result. The first record is kept.
    pub fn record(&mut self, outcome: Outcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
    }

    /// The output of a completed task; `None` for failed or unfinished ones.
    pub fn into_output(self) -> Option<PipelineOutput> {
        match self.outcome {
            Some(Outcome::Completed(output)) => Some(output),
            _ => None,
        }
    }

    /// Move to `next` and return the time spent since the previous stage
    /// was entered. Only strictly later stages are accepted, and nothing
    /// leaves a terminal stage.
    pub fn advance(&mut self, next: Stage) -> Result<Duration, StageError> {
        if self.stage.is_terminal() || next <= self.stage {
            return Err(StageError {
                from: self.stage,
                to: next,
            });
        }

        let now = Utc::now();
        let elapsed = self
            .entered_at(self.stage)
            .and_then(|since| (now - since).to_std().ok())
            .unwrap_or_default();
        self.stage = next;
        self.stage_times.insert(next, now);
        Ok(elapsed)
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub task_id: String,
    pub step: Stage,
    pub label: String,
    #[serde(rename = "elapsedMs", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    ServiceUnavailable,
    QueryExtractionFailed,
    ContentGenerationFailed,
    NoClipsFound,
    VideoCompilationFailed,
    RenderingFailed,
    UploadFailed,
    UnexpectedError,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub task_id: String,
    pub account_id: String,
    pub kind: FailureKind,
    pub message: String,
    pub technical_detail: String,
    pub debug_payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub task_id: String,
    pub account_id: String,
    pub downloads: Vec<String>,
    pub content: Vec<BilingualPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum PipelineEvent {
    Step(StepEvent),
    Failed(FailureEvent),
    Completed(CompletionEvent),
}

impl PipelineEvent {
    pub fn task_id(&self) -> &str {
        match self {
            PipelineEvent::Step(e) => &e.task_id,
            PipelineEvent::Failed(e) => &e.task_id,
            PipelineEvent::Completed(e) => &e.task_id,
        }
    }
}
