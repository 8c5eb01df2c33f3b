use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use super::words::{clip_duration, normalize_words, Word};
use super::AssemblyError;
use crate::audio::{AudioBuffer, AudioView};
use crate::services::{ClipBoundary, GenerationResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextConfig {
    pub font_color: String,
    pub background_color: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_color: "white".to_string(),
            background_color: "black".to_string(),
        }
    }
}

/// Fixed rendering parameters shared by every clip of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Presentation {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub text: TextConfig,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            fps: 24,
            width: 1920,
            height: 1080,
            text: TextConfig::default(),
        }
    }
}

/// Everything the clips of one task share: assets and where files go.
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub task_id: String,
    pub music_path: PathBuf,
    pub image_paths: Arc<[PathBuf]>,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub presentation: Presentation,
}

impl AssetContext {
    pub fn clip_output_path(&self, index: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}-clip-{}.mp4", self.task_id, index))
    }

    pub fn speech_path(&self, index: usize) -> PathBuf {
        self.work_dir
            .join(format!("{}-speech-{}.aac", self.task_id, index))
    }
}

#[derive(Debug, Clone)]
pub struct Clip {
    /// 1-based position in the generated stream.
    pub index: usize,
    pub task_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub audio: AudioView,
    pub words: Vec<Word>,
}

impl Clip {
    pub fn duration(&self) -> f64 {
        clip_duration(&self.words).unwrap_or(self.end_time - self.start_time)
    }
}

#[derive(Debug, Clone)]
pub struct VideoJobSpec {
    pub clip_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub speech_path: PathBuf,
    pub music_path: PathBuf,
    pub image_paths: Arc<[PathBuf]>,
    pub words: Vec<Word>,
    pub duration: f64,
    pub fps: u32,
    pub frame_size: (u32, u32),
    pub text_config: TextConfig,
    pub output_path: PathBuf,
}

/// A clip that could not be assembled. Only that clip is dropped.
#[derive(Debug)]
pub struct ClipIssue {
    pub index: usize,
    pub error: AssemblyError,
}

#[derive(Debug, Default)]
pub struct ExtractedClips {
    pub clips: Vec<Clip>,
    pub issues: Vec<ClipIssue>,
}

#[derive(Debug, Default)]
pub struct CompiledSpecs {
    /// Jobs that still have to be rendered.
    pub specs: Vec<VideoJobSpec>,
    /// Destination of every valid clip, in clip order, rendered or not.
    pub outputs: Vec<PathBuf>,
    pub skipped: usize,
}

pub struct ClipAssembler {
    context: AssetContext,
}

impl ClipAssembler {
    pub fn new(context: AssetContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &AssetContext {
        &self.context
    }

    /// Decode the shared audio once and build one [`Clip`] per boundary.
    ///
    /// A clip with corrupt word timing or an impossible audio range is
    /// reported in [`ExtractedClips::issues`]; its siblings are unaffected.
    /// Only an undecodable audio payload fails the whole call.
    pub fn extract_clips(&self, response: &GenerationResponse) -> Result<ExtractedClips, AssemblyError> {
        let buffer = AudioBuffer::from_base64(&response.audio_base64)?;
        let mut extracted = ExtractedClips::default();

        for (position, boundary) in response.clips.iter().enumerate() {
            let index = position + 1;
            match self.extract_clip(index, boundary, &buffer) {
                Ok(clip) => extracted.clips.push(clip),
                Err(error) => {
                    warn!("Skipping clip {} of task {}: {}", index, self.context.task_id, error);
                    extracted.issues.push(ClipIssue { index, error });
                }
            }
        }

        info!(
            "Extracted {} clips ({} skipped) for task {}",
            extracted.clips.len(),
            extracted.issues.len(),
            self.context.task_id
        );
        Ok(extracted)
    }

    fn extract_clip(
        &self,
        index: usize,
        boundary: &ClipBoundary,
        buffer: &AudioBuffer,
    ) -> Result<Clip, AssemblyError> {
        let audio = match (boundary.byte_offset, boundary.byte_length) {
            (None, None) => Ok(buffer.whole()),
            (offset, length) => {
                let offset = offset.unwrap_or(0);
                let length = length.unwrap_or_else(|| buffer.len().saturating_sub(offset));
                buffer.view(offset, length)
            }
        }
        .map_err(|source| AssemblyError::AudioRange { clip: index, source })?;

        let words = normalize_words(&boundary.segments)
            .map_err(|source| AssemblyError::Timing { clip: index, source })?;

        Ok(Clip {
            index,
            task_id: self.context.task_id.clone(),
            start_time: boundary.start_time,
            end_time: boundary.end_time,
            audio,
            words,
        })
    }

    /// Turn clips into render jobs, skipping clips whose output already
    /// exists so that a re-run only renders what is missing.
    pub async fn compile_specs(&self, clips: Vec<Clip>) -> Result<CompiledSpecs, AssemblyError> {
        let mut compiled = CompiledSpecs::default();

        for clip in clips {
            let output_path = self.context.clip_output_path(clip.index);
            compiled.outputs.push(output_path.clone());

            if fs::try_exists(&output_path).await? {
                info!("Clip {} already exists at {}, skipping", clip.index, output_path.display());
                compiled.skipped += 1;
                continue;
            }

            let speech_path = self.context.speech_path(clip.index);
            clip.audio.write_to(&speech_path).await?;
            compiled.specs.push(self.build_spec(clip, speech_path, output_path));
        }

        debug!(
            "Compiled {} video jobs, {} clips already rendered",
            compiled.specs.len(),
            compiled.skipped
        );
        Ok(compiled)
    }

    fn build_spec(&self, clip: Clip, speech_path: PathBuf, output_path: PathBuf) -> VideoJobSpec {
        let presentation = &self.context.presentation;
        let duration = clip.duration();
        VideoJobSpec {
            clip_index: clip.index,
            start_time: clip.start_time,
            end_time: clip.end_time,
            speech_path,
            music_path: self.context.music_path.clone(),
            image_paths: Arc::clone(&self.context.image_paths),
            words: clip.words,
            duration,
            fps: presentation.fps,
            frame_size: (presentation.width, presentation.height),
            text_config: presentation.text.clone(),
            output_path,
        }
    }
}
