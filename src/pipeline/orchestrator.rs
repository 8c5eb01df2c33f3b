use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::FutureExt;
use tokio::fs;
use tracing::{debug, error, info, warn};

use super::callback::PipelineObserver;
use super::error::{install_panic_capture, PipelineError};
use super::types::{
    CompletionEvent, FailureEvent, Outcome, PipelineEvent, PipelineOutput, Stage, StepEvent, Task,
    TaskRequest,
};
use crate::assembly::{AssetContext, ClipAssembler, CompiledSpecs, VideoJobSpec};
use crate::config::{PipelineConfig, RenderFailurePolicy};
use crate::poller::{run_attempts, Attempt, AttemptPolicy, Exhausted, JobPoller, JobService, PollConfig};
use crate::services::{
    ClipMerger, ContentGenerator, FfmpegConcatMerger, GenerationResponse, HttpContentGenerator,
    HttpImageSearch, HttpKeywordExtractor, HttpRenderService, ImageSearch, KeywordExtractor,
};
use crate::storage::ObjectStorage;
use crate::utils::http::build_client;

/// External collaborators used by one orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentGenerator>,
    pub keywords: Arc<dyn KeywordExtractor>,
    pub images: Arc<dyn ImageSearch>,
    pub renderer: Arc<dyn JobService<Spec = VideoJobSpec>>,
    pub merger: Arc<dyn ClipMerger>,
    pub storage: Arc<dyn ObjectStorage>,
}

/// Clip files expected from rendering and the lanes that failed to
/// produce theirs.
struct RenderReport {
    outputs: Vec<PathBuf>,
    failed: Vec<RenderFailure>,
}

struct RenderFailure {
    clip_index: usize,
    output: PathBuf,
    error: String,
}

impl Collaborators {
    /// HTTP adapters for every service named in `config.endpoints`, an
    /// ffmpeg merger and the given storage.
    pub fn http(config: &PipelineConfig, storage: Arc<dyn ObjectStorage>) -> Result<Self> {
        let client = build_client(std::time::Duration::from_secs(300))?;
        let endpoints = &config.endpoints;
        Ok(Self {
            content: Arc::new(HttpContentGenerator::new(
                client.clone(),
                endpoints.podcast_url.clone(),
                endpoints.languages.clone(),
            )),
            keywords: Arc::new(HttpKeywordExtractor::new(client.clone(), endpoints.keyword_url.clone())),
            images: Arc::new(HttpImageSearch::new(client.clone(), endpoints.image_search_url.clone())),
            renderer: Arc::new(HttpRenderService::new(client, endpoints.render_url.clone())),
            merger: Arc::new(FfmpegConcatMerger::default()),
            storage,
        })
    }
}

/// Why a single content generation attempt was not usable.
enum GenerationMiss {
    NoResult(Option<String>),
    NoClips(Option<String>),
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    services: Collaborators,
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, services: Collaborators) -> Self {
        install_panic_capture();
        Self {
            config,
            services,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Observers are notified in registration order.
    pub fn register_observer(&mut self, observer: Arc<dyn PipelineObserver>) -> &mut Self {
        self.observers.push(observer);
        self
    }

    /// Run one task to completion.
    ///
    /// Returns `None` on any failure after notifying observers with a
    /// [`FailureEvent`]. Never panics and never returns an error.
    pub async fn run(&self, request: TaskRequest) -> Option<PipelineOutput> {
        self.run_task(request).await.into_output()
    }

    /// Like [`run`](Self::run), but hands back the finished [`Task`] with
    /// its stage history and terminal [`Outcome`].
    pub async fn run_task(&self, request: TaskRequest) -> Task {
        let mut task = Task::new(request);
        info!(task_id = %task.id, account_id = %task.account_id, "Starting pipeline for prompt {:?}", task.prompt);

        let result = AssertUnwindSafe(self.execute(&mut task)).catch_unwind().await;
        let error = match result {
            Ok(Ok(output)) => {
                info!(task_id = %task.id, "Pipeline completed with {} downloads", output.downloads.len());
                let event = CompletionEvent {
                    task_id: task.id.clone(),
                    account_id: task.account_id.clone(),
                    downloads: output.downloads.clone(),
                    content: output.content.clone(),
                };
                task.record(Outcome::Completed(output));
                self.notify(&PipelineEvent::Completed(event)).await;
                return task;
            }
            Ok(Err(error)) => error,
            Err(panic) => PipelineError::from_panic(panic),
        };

        let failed_at = task.stage();
        if let Err(e) = task.advance(Stage::Failed) {
            debug!(task_id = %task.id, "{}", e);
        }
        error!(
            task_id = %task.id,
            kind = %error.kind(),
            "Pipeline failed during {}: {} ({})",
            failed_at,
            error,
            error.technical_detail()
        );

        let event = FailureEvent {
            task_id: task.id.clone(),
            account_id: task.account_id.clone(),
            kind: error.kind(),
            message: error.to_string(),
            technical_detail: error.technical_detail(),
            debug_payload: error.debug_payload(),
        };
        task.record(Outcome::Failed(event.clone()));
        self.notify(&PipelineEvent::Failed(event)).await;
        task
    }

    async fn execute(&self, task: &mut Task) -> Result<PipelineOutput, PipelineError> {
        self.enter(task, Stage::HealthCheck).await?;
        self.check_health().await?;

        self.enter(task, Stage::KeywordExtraction).await?;
        let keyword = self.extract_keyword(task).await?;
        let image_paths = self.fetch_images(task, &keyword).await?;

        self.enter(task, Stage::ContentGeneration).await?;
        let response = self.generate(task).await?;

        self.enter(task, Stage::ClipAssembly).await?;
        let assembler = ClipAssembler::new(AssetContext {
            task_id: task.id.clone(),
            music_path: self.config.music_path.clone(),
            image_paths,
            work_dir: self.config.work_dir.clone(),
            output_dir: self.config.output_dir.clone(),
            presentation: self.config.presentation.clone(),
        });
        let extracted = assembler.extract_clips(&response)?;
        if extracted.clips.is_empty() {
            let reasons: Vec<String> = extracted.issues.iter().map(|i| i.error.to_string()).collect();
            return Err(PipelineError::VideoCompilationFailed {
                detail: format!("no valid clips: {}", reasons.join("; ")),
            });
        }

        self.enter(task, Stage::VideoSpecCompilation).await?;
        let compiled = assembler.compile_specs(extracted.clips).await?;
        if compiled.specs.is_empty() && compiled.skipped == 0 {
            return Err(PipelineError::VideoCompilationFailed {
                detail: "zero video job specs compiled".to_string(),
            });
        }

        self.enter(task, Stage::Rendering).await?;
        let rendered = self.render(task, compiled).await?;

        self.enter(task, Stage::Finalize).await?;
        let clips = self.apply_render_policy(task, rendered)?;
        let key = self.finalize(task, &clips).await?;

        self.enter(task, Stage::Completed).await?;
        Ok(PipelineOutput {
            downloads: vec![key],
            content: response.content,
        })
    }

    async fn enter(&self, task: &mut Task, stage: Stage) -> Result<(), PipelineError> {
        let elapsed = task.advance(stage)?;
        info!(task_id = %task.id, "{} ({:?} since last step)", stage.label(), elapsed);
        let event = StepEvent {
            task_id: task.id.clone(),
            step: stage,
            label: stage.label().to_string(),
            elapsed,
        };
        self.notify(&PipelineEvent::Step(event)).await;
        Ok(())
    }

    /// Deliver `event` to every observer in order. Observer errors and
    /// panics are logged and swallowed.
    async fn notify(&self, event: &PipelineEvent) {
        for observer in &self.observers {
            let delivery = match event {
                PipelineEvent::Step(e) => observer.on_step(e),
                PipelineEvent::Failed(e) => observer.on_failure(e),
                PipelineEvent::Completed(e) => observer.on_complete(e),
            };
            match AssertUnwindSafe(delivery).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    task_id = %event.task_id(),
                    "Observer {} failed: {:#}",
                    observer.name(),
                    e
                ),
                Err(_) => warn!(task_id = %event.task_id(), "Observer {} panicked", observer.name()),
            }
        }
    }

    async fn check_health(&self) -> Result<(), PipelineError> {
        match self.services.content.check_health().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(PipelineError::ServiceUnavailable {
                detail: "health check reported the service as down".to_string(),
            }),
            Err(e) => Err(PipelineError::ServiceUnavailable {
                detail: format!("{:#}", e),
            }),
        }
    }

    async fn extract_keyword(&self, task: &Task) -> Result<String, PipelineError> {
        let raw = self
            .services
            .keywords
            .extract_keyword(
                &task.prompt,
                self.config.keyword_poll_interval,
                self.config.keyword_timeout,
            )
            .await
            .map_err(|e| PipelineError::QueryExtractionFailed {
                detail: format!("{:#}", e),
            })?;

        let keyword = raw.trim().trim_matches('"').trim();
        if keyword.is_empty() {
            return Err(PipelineError::QueryExtractionFailed {
                detail: format!("keyword service returned {:?}", raw),
            });
        }
        info!(task_id = %task.id, "Search keyword: {:?}", keyword);
        Ok(keyword.to_string())
    }

    /// Search images for `keyword` and persist them as
    /// `<work_dir>/<task_id>-image-<i>.jpg`.
    async fn fetch_images(&self, task: &Task, keyword: &str) -> Result<Arc<[PathBuf]>, PipelineError> {
        let images = self
            .services
            .images
            .search_images(keyword, self.config.image_count)
            .await
            .map_err(|e| PipelineError::QueryExtractionFailed {
                detail: format!("image search for {:?} failed: {:#}", keyword, e),
            })?;
        if images.is_empty() {
            warn!(task_id = %task.id, "Image search for {:?} returned nothing", keyword);
        }

        fs::create_dir_all(&self.config.work_dir).await?;
        let mut paths = Vec::with_capacity(images.len());
        for (position, image) in images.iter().enumerate() {
            let path = self
                .config
                .work_dir
                .join(format!("{}-image-{}.jpg", task.id, position + 1));
            fs::write(&path, image).await?;
            paths.push(path);
        }
        debug!(task_id = %task.id, "Saved {} images", paths.len());
        Ok(paths.into())
    }

    async fn generate(&self, task: &Task) -> Result<GenerationResponse, PipelineError> {
        let policy = AttemptPolicy::new(
            self.config.max_generation_attempts,
            self.config.generation_retry_delay,
        );
        let content = &self.services.content;
        let prompt = task.prompt.as_str();
        let task_id = task.id.as_str();

        let outcome = run_attempts(&policy, move |attempt| async move {
            match content.generate_content(prompt).await {
                Ok(Some(response)) if !response.clips.is_empty() => {
                    info!(task_id = %task_id, "Generated {} clips on attempt {}", response.clips.len(), attempt);
                    Attempt::Done(response)
                }
                Ok(Some(response)) => {
                    warn!(task_id = %task_id, "Attempt {} returned no clips", attempt);
                    Attempt::Retry(GenerationMiss::NoClips(serde_json::to_string(&response).ok()))
                }
                Ok(None) => {
                    warn!(task_id = %task_id, "Attempt {} returned no result", attempt);
                    Attempt::Retry(GenerationMiss::NoResult(None))
                }
                Err(e) => {
                    warn!(task_id = %task_id, "Attempt {} failed: {:#}", attempt, e);
                    Attempt::Retry(GenerationMiss::NoResult(Some(format!("{:#}", e))))
                }
            }
        })
        .await;

        outcome.map_err(|Exhausted { attempts, last }| match last {
            Some(GenerationMiss::NoClips(payload)) => PipelineError::NoClipsFound { attempts, payload },
            Some(GenerationMiss::NoResult(detail)) => PipelineError::ContentGenerationFailed {
                attempts,
                detail: detail.unwrap_or_else(|| "service returned no content".to_string()),
            },
            None => PipelineError::ContentGenerationFailed {
                attempts,
                detail: "no generation attempt was made".to_string(),
            },
        })
    }

    /// Render the pending specs. Every lane runs to completion; failed
    /// lanes are reported alongside the expected clip files, in clip order.
    async fn render(&self, task: &Task, compiled: CompiledSpecs) -> Result<RenderReport, PipelineError> {
        let CompiledSpecs { specs, outputs, skipped } = compiled;
        if specs.is_empty() {
            info!(task_id = %task.id, "All {} clips already rendered", skipped);
            return Ok(RenderReport {
                outputs,
                failed: Vec::new(),
            });
        }

        let poller = JobPoller::new(self.services.renderer.clone());
        let ids = poller
            .submit_batch(&specs)
            .await
            .map_err(|e| PipelineError::RenderingFailed { detail: e.to_string() })?;
        let destinations: Vec<PathBuf> = specs.iter().map(|s| s.output_path.clone()).collect();

        let failures: Arc<Mutex<Vec<(usize, String)>>> = Arc::default();
        let sink = failures.clone();
        let progress_task = task.id.clone();
        let poll_config = PollConfig::new(self.config.render_max_attempts, self.config.render_poll_delay)
            .on_progress(move |index, attempt, progress| {
                debug!(task_id = %progress_task, "Render job {} attempt {}: {:?}%", index, attempt, progress);
            })
            .on_error(move |index, error| {
                if let Ok(mut failures) = sink.lock() {
                    failures.push((index, error.to_string()));
                }
            });

        poller
            .poll_batch(&ids, &destinations, &poll_config)
            .await
            .map_err(|e| PipelineError::RenderingFailed { detail: e.to_string() })?;

        let mut failed: Vec<(usize, String)> = failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();
        failed.sort_by_key(|(index, _)| *index);
        let failed = failed
            .into_iter()
            .map(|(index, error)| RenderFailure {
                clip_index: specs[index].clip_index,
                output: destinations[index].clone(),
                error,
            })
            .collect();
        Ok(RenderReport { outputs, failed })
    }

    /// Decide which clips get merged. Under [`RenderFailurePolicy::Fatal`]
    /// any failed lane fails the task here, once rendering has finished.
    fn apply_render_policy(&self, task: &Task, report: RenderReport) -> Result<Vec<PathBuf>, PipelineError> {
        let RenderReport { outputs, failed } = report;
        if failed.is_empty() {
            return Ok(outputs);
        }

        let describe = failed
            .iter()
            .map(|f| format!("clip {}: {}", f.clip_index, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        match self.config.render_failure_policy {
            RenderFailurePolicy::Fatal => Err(PipelineError::RenderingFailed { detail: describe }),
            RenderFailurePolicy::Tolerate => {
                let available: Vec<PathBuf> = outputs
                    .into_iter()
                    .filter(|path| !failed.iter().any(|f| &f.output == path))
                    .collect();
                if available.is_empty() {
                    return Err(PipelineError::RenderingFailed { detail: describe });
                }
                warn!(
                    task_id = %task.id,
                    "Continuing with {} clips, dropped {}",
                    available.len(),
                    describe
                );
                Ok(available)
            }
        }
    }

    /// Merge the rendered clips into `<output_dir>/<task_id>.mp4` and upload
    /// it as `videos/<task_id>.mp4`.
    async fn finalize(&self, task: &Task, clips: &[PathBuf]) -> Result<String, PipelineError> {
        let final_path = self.config.output_dir.join(format!("{}.mp4", task.id));
        self.services
            .merger
            .merge(clips, &final_path)
            .await
            .map_err(|e| PipelineError::UploadFailed {
                detail: format!("merge failed: {:#}", e),
            })?;

        let key = format!("videos/{}.mp4", task.id);
        let location = self
            .services
            .storage
            .upload_file(&key, &final_path)
            .await
            .map_err(|e| PipelineError::UploadFailed {
                detail: format!("{:#}", e),
            })?;
        info!(task_id = %task.id, "Uploaded final video to {}", location);
        Ok(key)
    }
}
