//! Bulk submit/poll engine for slow external jobs.
//!
//! [`JobPoller::submit_batch`] hands every spec to a [`JobService`] and
//! collects correlation ids. [`JobPoller::poll_batch`] then polls each id on
//! its own lane. Lanes run concurrently on the calling task and never share
//! mutable state: a lane owns its [`JobRecord`] and writes only its own
//! destination file, so one lane timing out has no effect on the others.

pub mod attempt;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{join_all, try_join_all};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

pub use attempt::{run_attempts, Attempt, AttemptPolicy, Exhausted};

/// Status of an external job, already validated at the service boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Ready(Bytes),
    /// Still running, with an optional 0-100 progress value.
    Pending(Option<u8>),
    /// Transient failure reported by the service.
    Error(String),
}

#[async_trait]
pub trait JobService: Send + Sync {
    type Spec: Send + Sync;

    async fn submit(&self, spec: &Self::Spec) -> Result<String>;
    async fn status(&self, correlation_id: &str) -> Result<JobStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub correlation_id: String,
    pub attempts: u32,
    pub status: RecordStatus,
    pub destination: PathBuf,
}

impl JobRecord {
    fn new(correlation_id: String, destination: PathBuf) -> Self {
        Self {
            correlation_id,
            attempts: 0,
            status: RecordStatus::Pending,
            destination,
        }
    }
}

/// Why a single lane ended without a result.
#[derive(Debug, Error)]
pub enum LaneError {
    #[error("job did not complete within {attempts} attempts")]
    TimedOut {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("failed to persist result to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("submission of job {index} failed: {message}")]
    Submission { index: usize, message: String },

    #[error("correlation id {0} appears more than once in the batch")]
    DuplicateCorrelationId(String),

    #[error("{ids} correlation ids but {destinations} destinations")]
    LengthMismatch { ids: usize, destinations: usize },
}

pub type ProgressCallback = Arc<dyn Fn(usize, u32, Option<u8>) + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn(usize, &Path) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(usize, &LaneError) + Send + Sync>;

/// Per-batch polling configuration. Both limits are per item and get
/// multiplied by the batch size when the batch is polled.
#[derive(Clone)]
pub struct PollConfig {
    pub max_attempts_per_item: u32,
    pub delay_per_attempt: Duration,
    pub on_progress: Option<ProgressCallback>,
    pub on_success: Option<SuccessCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl PollConfig {
    pub fn new(max_attempts_per_item: u32, delay_per_attempt: Duration) -> Self {
        Self {
            max_attempts_per_item,
            delay_per_attempt,
            on_progress: None,
            on_success: None,
            on_error: None,
        }
    }

    pub fn on_progress(mut self, f: impl Fn(usize, u32, Option<u8>) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_success(mut self, f: impl Fn(usize, &Path) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(usize, &LaneError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

pub struct JobPoller<S: JobService + ?Sized> {
    service: Arc<S>,
}

impl<S: JobService + ?Sized> JobPoller<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// Submit every spec, returning correlation ids in input order. Any
    /// single failed submission fails the batch.
    pub async fn submit_batch(&self, specs: &[S::Spec]) -> Result<Vec<String>, PollerError> {
        let submissions = specs.iter().enumerate().map(move |(index, spec)| async move {
            self.service
                .submit(spec)
                .await
                .map_err(|e| PollerError::Submission {
                    index,
                    message: format!("{:#}", e),
                })
        });

        let ids = try_join_all(submissions).await?;
        ensure_unique(&ids)?;
        info!("Submitted {} jobs", ids.len());
        Ok(ids)
    }

    /// Poll every id until it succeeds or its lane runs out of attempts.
    ///
    /// Resolves once all lanes have terminated. Lane failures are reported
    /// through `config.on_error` only; the returned error covers invalid
    /// arguments.
    pub async fn poll_batch(
        &self,
        ids: &[String],
        destinations: &[PathBuf],
        config: &PollConfig,
    ) -> Result<(), PollerError> {
        if ids.len() != destinations.len() {
            return Err(PollerError::LengthMismatch {
                ids: ids.len(),
                destinations: destinations.len(),
            });
        }
        ensure_unique(ids)?;
        if ids.is_empty() {
            return Ok(());
        }

        let policy = AttemptPolicy::new(config.max_attempts_per_item, config.delay_per_attempt)
            .scaled_by(ids.len());
        debug!(
            "Polling {} jobs, up to {} attempts each every {:?}",
            ids.len(),
            policy.max_attempts,
            policy.delay
        );

        let lanes = ids
            .iter()
            .zip(destinations)
            .enumerate()
            .map(|(index, (id, destination))| {
                let record = JobRecord::new(id.clone(), destination.clone());
                self.poll_lane(index, record, &policy, config)
            });
        let records = join_all(lanes).await;

        let succeeded = records
            .iter()
            .filter(|r| r.status == RecordStatus::Succeeded)
            .count();
        info!("Polling finished: {}/{} jobs succeeded", succeeded, records.len());
        Ok(())
    }

    async fn poll_lane(
        &self,
        index: usize,
        mut record: JobRecord,
        policy: &AttemptPolicy,
        config: &PollConfig,
    ) -> JobRecord {
        record.status = RecordStatus::Polling;

        let service = &self.service;
        let id = record.correlation_id.as_str();
        let destination = record.destination.as_path();

        let outcome = run_attempts(policy, move |attempt| async move {
            match service.status(id).await {
                Ok(JobStatus::Ready(payload)) => Attempt::Done((attempt, persist(destination, &payload).await)),
                Ok(JobStatus::Pending(progress)) => {
                    if let Some(on_progress) = &config.on_progress {
                        on_progress(index, attempt, progress);
                    }
                    Attempt::Retry(None)
                }
                Ok(JobStatus::Error(message)) => {
                    debug!("Job {} reported an error on attempt {}: {}", id, attempt, message);
                    Attempt::Retry(Some(message))
                }
                Err(e) => {
                    debug!("Status query for job {} failed on attempt {}: {:#}", id, attempt, e);
                    Attempt::Retry(Some(format!("{:#}", e)))
                }
            }
        })
        .await;

        let failure = match outcome {
            Ok((attempts, Ok(()))) => {
                record.attempts = attempts;
                record.status = RecordStatus::Succeeded;
                None
            }
            Ok((attempts, Err(source))) => {
                record.attempts = attempts;
                record.status = RecordStatus::Failed;
                Some(LaneError::Persist {
                    path: record.destination.clone(),
                    source,
                })
            }
            Err(exhausted) => {
                record.attempts = exhausted.attempts;
                record.status = RecordStatus::TimedOut;
                Some(LaneError::TimedOut {
                    attempts: exhausted.attempts,
                    last_error: exhausted.last.flatten(),
                })
            }
        };

        match failure {
            None => {
                debug!("Job {} finished after {} attempts", record.correlation_id, record.attempts);
                if let Some(on_success) = &config.on_success {
                    on_success(index, &record.destination);
                }
            }
            Some(error) => {
                warn!("Job {} failed: {}", record.correlation_id, error);
                if let Some(on_error) = &config.on_error {
                    on_error(index, &error);
                }
            }
        }

        record
    }
}

async fn persist(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, payload).await
}

fn ensure_unique(ids: &[String]) -> Result<(), PollerError> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(PollerError::DuplicateCorrelationId(id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Job `n` becomes ready after `pending[n]` pending polls; ids in
    /// `failing` always report an error.
    struct FakeService {
        pending: Vec<u32>,
        failing: HashSet<usize>,
        reject_submit: Option<usize>,
        fixed_id: Option<String>,
        polls: Mutex<HashMap<String, u32>>,
    }

    impl FakeService {
        fn new(pending: Vec<u32>) -> Self {
            Self {
                pending,
                failing: HashSet::new(),
                reject_submit: None,
                fixed_id: None,
                polls: Mutex::new(HashMap::new()),
            }
        }

        fn polls_for(&self, id: &str) -> u32 {
            self.polls.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl JobService for FakeService {
        type Spec = usize;

        async fn submit(&self, spec: &usize) -> Result<String> {
            if self.reject_submit == Some(*spec) {
                anyhow::bail!("renderer rejected job {}", spec);
            }
            Ok(self.fixed_id.clone().unwrap_or_else(|| format!("job-{}", spec)))
        }

        async fn status(&self, correlation_id: &str) -> Result<JobStatus> {
            let n: usize = correlation_id.trim_start_matches("job-").parse()?;
            let polls = {
                let mut polls = self.polls.lock().unwrap();
                let count = polls.entry(correlation_id.to_string()).or_insert(0);
                *count += 1;
                *count
            };
            if self.failing.contains(&n) {
                return Ok(JobStatus::Error("render crashed".to_string()));
            }
            if polls > self.pending[n] {
                Ok(JobStatus::Ready(Bytes::from(format!("video-{}", n))))
            } else {
                Ok(JobStatus::Pending(Some((polls * 25).min(100) as u8)))
            }
        }
    }

    #[derive(Default)]
    struct Calls {
        progress: Mutex<Vec<(usize, u32, Option<u8>)>>,
        success: Mutex<Vec<usize>>,
        errors: Mutex<Vec<(usize, String)>>,
    }

    fn recording_config(calls: &Arc<Calls>, attempts: u32) -> PollConfig {
        let (p, s, e) = (calls.clone(), calls.clone(), calls.clone());
        PollConfig::new(attempts, Duration::from_millis(1))
            .on_progress(move |i, attempt, progress| p.progress.lock().unwrap().push((i, attempt, progress)))
            .on_success(move |i, _| s.success.lock().unwrap().push(i))
            .on_error(move |i, err| e.errors.lock().unwrap().push((i, err.to_string())))
    }

    fn destinations(dir: &Path, n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| dir.join("out").join(format!("clip-{}.mp4", i))).collect()
    }

    #[tokio::test]
    async fn test_failing_lane_does_not_affect_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let mut service = FakeService::new(vec![1, 2, 0, 3]);
        service.failing.insert(2);
        let service = Arc::new(service);
        let poller = JobPoller::new(service.clone());

        let ids = poller.submit_batch(&[0, 1, 2, 3]).await.unwrap();
        assert_eq!(ids, vec!["job-0", "job-1", "job-2", "job-3"]);

        let calls = Arc::new(Calls::default());
        let outputs = destinations(dir.path(), 4);
        poller
            .poll_batch(&ids, &outputs, &recording_config(&calls, 3))
            .await
            .unwrap();

        let mut success = calls.success.lock().unwrap().clone();
        success.sort();
        assert_eq!(success, vec![0, 1, 3]);

        let errors = calls.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 2);

        // 3 attempts per item, 4 items wide
        assert_eq!(service.polls_for("job-2"), 12);
        assert_eq!(std::fs::read(&outputs[3]).unwrap(), b"video-3");
        assert!(!outputs[2].exists());
    }

    #[tokio::test]
    async fn test_progress_is_reported_per_lane() {
        let dir = tempfile::tempdir().unwrap();
        let poller = JobPoller::new(Arc::new(FakeService::new(vec![2])));
        let calls = Arc::new(Calls::default());

        let ids = poller.submit_batch(&[0]).await.unwrap();
        poller
            .poll_batch(&ids, &destinations(dir.path(), 1), &recording_config(&calls, 5))
            .await
            .unwrap();

        let progress = calls.progress.lock().unwrap().clone();
        assert_eq!(progress, vec![(0, 1, Some(25)), (0, 2, Some(50))]);
        assert_eq!(calls.success.lock().unwrap().as_slice(), &[0]);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let poller = JobPoller::new(Arc::new(FakeService::new(vec![100])));
        let calls = Arc::new(Calls::default());

        let ids = poller.submit_batch(&[0]).await.unwrap();
        poller
            .poll_batch(&ids, &destinations(dir.path(), 1), &recording_config(&calls, 4))
            .await
            .unwrap();

        let errors = calls.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].1.contains("4 attempts"), "{}", errors[0].1);
        assert!(calls.success.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unwritable_destination_fails_only_that_lane() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let poller = JobPoller::new(Arc::new(FakeService::new(vec![0, 0])));
        let calls = Arc::new(Calls::default());
        let ids = poller.submit_batch(&[0, 1]).await.unwrap();
        let outputs = vec![blocker.join("clip-0.mp4"), dir.path().join("clip-1.mp4")];

        poller
            .poll_batch(&ids, &outputs, &recording_config(&calls, 2))
            .await
            .unwrap();

        assert_eq!(calls.success.lock().unwrap().as_slice(), &[1]);
        let errors = calls.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, 0);
        assert!(errors[0].1.contains("persist"));
    }

    #[tokio::test]
    async fn test_submission_error_fails_whole_batch() {
        let mut service = FakeService::new(vec![0, 0, 0]);
        service.reject_submit = Some(1);
        let poller = JobPoller::new(Arc::new(service));

        match poller.submit_batch(&[0, 1, 2]).await {
            Err(PollerError::Submission { index, message }) => {
                assert_eq!(index, 1);
                assert!(message.contains("rejected"));
            }
            other => panic!("expected submission error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_correlation_ids_are_rejected() {
        let mut service = FakeService::new(vec![0, 0]);
        service.fixed_id = Some("job-0".to_string());
        let poller = JobPoller::new(Arc::new(service));

        assert!(matches!(
            poller.submit_batch(&[0, 1]).await,
            Err(PollerError::DuplicateCorrelationId(id)) if id == "job-0"
        ));
    }

    #[tokio::test]
    async fn test_mismatched_destinations() {
        let poller = JobPoller::new(Arc::new(FakeService::new(vec![0])));
        let result = poller
            .poll_batch(&["job-0".to_string()], &[], &PollConfig::new(1, Duration::ZERO))
            .await;
        assert!(matches!(
            result,
            Err(PollerError::LengthMismatch { ids: 1, destinations: 0 })
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_resolves() {
        let poller = JobPoller::new(Arc::new(FakeService::new(vec![])));
        assert!(poller.submit_batch(&[]).await.unwrap().is_empty());
        poller
            .poll_batch(&[], &[], &PollConfig::new(1, Duration::ZERO))
            .await
            .unwrap();
    }
}
