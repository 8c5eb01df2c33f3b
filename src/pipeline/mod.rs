//! End-to-end prompt-to-video pipeline.

pub mod callback;
pub mod error;
pub mod orchestrator;
pub mod types;


pub use callback::{EventObserver, FunctionObserver, HttpObserver, PipelineObserver};
pub use error::{install_panic_capture, PipelineError};
pub use orchestrator::{Collaborators, PipelineOrchestrator};
pub use types::{
    CompletionEvent, FailureEvent, FailureKind, Outcome, PipelineEvent, PipelineOutput, Stage,
    StageError, StepEvent, Task, TaskRequest,
};
