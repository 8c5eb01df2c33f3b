pub mod clips;
pub mod words;

use thiserror::Error;

use crate::audio::AudioError;
pub use clips::{
    AssetContext, Clip, ClipAssembler, ClipIssue, CompiledSpecs, ExtractedClips, Presentation,
    TextConfig, VideoJobSpec,
};
pub use words::{normalize_words, RawSegment, RawWord, TimingError, Word};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("clip {clip}: {source}")]
    Timing {
        clip: usize,
        #[source]
        source: TimingError,
    },

    #[error("clip {clip}: {source}")]
    AudioRange {
        clip: usize,
        #[source]
        source: AudioError,
    },

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
