use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;

use once_cell::sync::Lazy;
use thiserror::Error;

use super::types::{FailureKind, StageError};
use crate::assembly::AssemblyError;

/// Terminal pipeline failures, one variant per [`FailureKind`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("The content service is currently unavailable")]
    ServiceUnavailable { detail: String },

    #[error("Could not extract a search query from the prompt")]
    QueryExtractionFailed { detail: String },

    #[error("Content generation returned no result after {attempts} attempts")]
    ContentGenerationFailed { attempts: u32, detail: String },

    #[error("Content generation returned no clips after {attempts} attempts")]
    NoClipsFound {
        attempts: u32,
        payload: Option<String>,
    },

    #[error("No video could be compiled from the generated content")]
    VideoCompilationFailed { detail: String },

    #[error("Rendering the video clips failed")]
    RenderingFailed { detail: String },

    #[error("Uploading the final video failed")]
    UploadFailed { detail: String },

    #[error("An unexpected error occurred")]
    Unexpected { error_type: String, detail: String },
}

thread_local! {
    // location and backtrace of the latest panic on this thread
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_CAPTURE: Lazy<()> = Lazy::new(|| {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        let trace = format!("at {}\n{}", location, Backtrace::force_capture());
        LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(trace));
        previous(info);
    }));
});

/// Chain a panic hook that remembers where each panic happened, so
/// [`PipelineError::from_panic`] can report it. The previous hook still runs.
pub fn install_panic_capture() {
    Lazy::force(&PANIC_CAPTURE);
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::ServiceUnavailable { .. } => FailureKind::ServiceUnavailable,
            PipelineError::QueryExtractionFailed { .. } => FailureKind::QueryExtractionFailed,
            PipelineError::ContentGenerationFailed { .. } => FailureKind::ContentGenerationFailed,
            PipelineError::NoClipsFound { .. } => FailureKind::NoClipsFound,
            PipelineError::VideoCompilationFailed { .. } => FailureKind::VideoCompilationFailed,
            PipelineError::RenderingFailed { .. } => FailureKind::RenderingFailed,
            PipelineError::UploadFailed { .. } => FailureKind::UploadFailed,
            PipelineError::Unexpected { .. } => FailureKind::UnexpectedError,
        }
    }

    pub fn technical_detail(&self) -> String {
        match self {
            PipelineError::ServiceUnavailable { detail }
            | PipelineError::QueryExtractionFailed { detail }
            | PipelineError::ContentGenerationFailed { detail, .. }
            | PipelineError::VideoCompilationFailed { detail }
            | PipelineError::RenderingFailed { detail }
            | PipelineError::UploadFailed { detail } => detail.clone(),
            PipelineError::NoClipsFound { attempts, .. } => {
                format!("{} generation attempts returned zero clip boundaries", attempts)
            }
            PipelineError::Unexpected { error_type, detail } => format!("{}: {}", error_type, detail),
        }
    }

    /// Raw upstream payload worth attaching to the failure report.
    pub fn debug_payload(&self) -> Option<String> {
        match self {
            PipelineError::NoClipsFound { payload, .. } => payload.clone(),
            _ => None,
        }
    }

    /// Convert a caught panic payload. With [`install_panic_capture`] active
    /// the detail also carries the panic location and backtrace.
    pub fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(message) = panic.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = panic.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let detail = match LAST_PANIC.with(|slot| slot.borrow_mut().take()) {
            Some(trace) => format!("{} {}", detail, trace),
            None => detail,
        };
        PipelineError::Unexpected {
            error_type: "panic".to_string(),
            detail,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(error: anyhow::Error) -> Self {
        PipelineError::Unexpected {
            error_type: "internal".to_string(),
            detail: format!("{:?}", error),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(error: std::io::Error) -> Self {
        PipelineError::Unexpected {
            error_type: "io".to_string(),
            detail: error.to_string(),
        }
    }
}

impl From<StageError> for PipelineError {
    fn from(error: StageError) -> Self {
        PipelineError::Unexpected {
            error_type: "stage".to_string(),
            detail: error.to_string(),
        }
    }
}

impl From<AssemblyError> for PipelineError {
    fn from(error: AssemblyError) -> Self {
        PipelineError::VideoCompilationFailed {
            detail: error.to_string(),
        }
    }
}
