//! Job orchestration: resolves a source per submitted job, hands it
//! to the engine for fetch/transcode/tag, drives the job state
//! machine, and fans progress events out to per-job subscribers and
//! the originating session.
//!
//! Jobs run as independent tasks behind a bounded semaphore. A retry
//! is a new job with a new identifier; nothing is retried in place.

mod notifier;
mod types;

use fetch_engine::{EngineError, EngineProgress, FetchEngine, Phase};
use parking_lot::Mutex;
use source_resolver::{ResolveError, SourceResolver};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Semaphore};
use track_primitives::{TrackError, TrackInfo};
use tracing::{error, info};

pub use notifier::{NullNotifier, SessionNotifier};
pub use types::{DownloadJob, JobId, JobStatus, ProgressEvent};

#[cfg(test)]
pub use notifier::stub as notifier_stub;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job {0} already exists")]
    DuplicateJob(JobId),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Jobs beyond this limit queue on the semaphore
    pub max_concurrent_jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
        }
    }
}

struct JobEntry {
    job: DownloadJob,
    events: broadcast::Sender<ProgressEvent>,
}

pub struct JobPipeline {
    resolver: Arc<SourceResolver>,
    engine: Arc<FetchEngine>,
    notifier: Arc<dyn SessionNotifier + Send + Sync>,
    limiter: Arc<Semaphore>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
}

impl JobPipeline {
    pub fn new(
        resolver: Arc<SourceResolver>,
        engine: Arc<FetchEngine>,
        notifier: Arc<dyn SessionNotifier + Send + Sync>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            resolver,
            engine,
            notifier,
            limiter: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a job and spawn its pipeline task. Returns an initial
    /// snapshot synchronously; processing continues in the background.
    pub fn submit(
        self: &Arc<Self>,
        id: JobId,
        track: TrackInfo,
        session_id: Option<String>,
    ) -> Result<DownloadJob, PipelineError> {
        track.validate()?;

        let (events, _) = broadcast::channel(32);
        let job = DownloadJob {
            id: id.clone(),
            track,
            session_id,
            status: JobStatus::Pending,
            progress: 0,
            output_path: None,
            error: None,
            created_at: chrono::Utc::now(),
        };

        {
            let mut jobs = self.jobs.lock();
            if jobs.contains_key(&id) {
                return Err(PipelineError::DuplicateJob(id));
            }
            jobs.insert(
                id.clone(),
                JobEntry {
                    job: job.clone(),
                    events,
                },
            );
        }

        info!(job = %id, track = %job.track.display_name(), "Job submitted");

        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run_job(id).await });

        Ok(job)
    }

    /// Snapshot of a job's current record.
    pub fn job(&self, id: &JobId) -> Option<DownloadJob> {
        self.jobs.lock().get(id).map(|e| e.job.clone())
    }

    /// Remove a job record and hand it to the caller. Intended for
    /// consuming terminal jobs; the record is gone afterwards.
    pub fn take_job(&self, id: &JobId) -> Option<DownloadJob> {
        self.jobs.lock().remove(id).map(|e| e.job)
    }

    /// Subscribe to a job's progress events.
    pub fn subscribe(&self, id: &JobId) -> Option<broadcast::Receiver<ProgressEvent>> {
        self.jobs.lock().get(id).map(|e| e.events.subscribe())
    }

    async fn run_job(self: Arc<Self>, id: JobId) {
        let Ok(_permit) = self.limiter.clone().acquire_owned().await else {
            // Semaphore is never closed while the pipeline lives
            return;
        };

        let Some(track) = self.job(&id).map(|j| j.track) else {
            return;
        };

        match self.execute(&id, &track).await {
            Ok(path) => {
                if let Some(entry) = self.jobs.lock().get_mut(&id) {
                    entry.job.output_path = Some(path);
                }
                self.transition(
                    &id,
                    &track,
                    JobStatus::Completed,
                    100,
                    format!("Downloaded {}", track.title),
                )
                .await;
            }
            Err(err) => {
                error!(job = %id, track = %track.display_name(), "Job failed: {err}");
                if let Some(entry) = self.jobs.lock().get_mut(&id) {
                    entry.job.error = Some(err.to_string());
                }
                // Progress stays wherever it was when the stage failed
                self.transition(
                    &id,
                    &track,
                    JobStatus::Error,
                    0,
                    format!("Error downloading {}: {err}", track.title),
                )
                .await;
            }
        }
    }

    async fn execute(&self, id: &JobId, track: &TrackInfo) -> Result<PathBuf, PipelineError> {
        self.transition(
            id,
            track,
            JobStatus::Searching,
            0,
            format!("Searching sources for {}", track.title),
        )
        .await;
        let source = self.resolver.resolve(track).await?;

        let (progress_tx, mut progress_rx) = mpsc::channel::<EngineProgress>(16);
        let forward = async {
            // The checkpoint entering the conversion stage reads
            // "Processing"; later samples within it read "Converting"
            let mut converting_seen = false;
            while let Some(sample) = progress_rx.recv().await {
                let (status, message) = match sample.phase {
                    Phase::Downloading => (
                        JobStatus::Downloading,
                        format!("Downloading {}", track.title),
                    ),
                    Phase::Converting if !converting_seen => {
                        converting_seen = true;
                        (JobStatus::Processing, format!("Processing {}", track.title))
                    }
                    Phase::Converting => {
                        (JobStatus::Processing, format!("Converting {}", track.title))
                    }
                    Phase::Tagging => (JobStatus::Tagging, format!("Tagging {}", track.title)),
                };
                self.transition(id, track, status, sample.percent, message)
                    .await;
            }
        };

        let (outcome, ()) = tokio::join!(self.engine.run(track, &source, progress_tx), forward);
        let outcome = outcome?;
        let path = outcome.path().to_owned();

        if outcome.is_cached() {
            // Finished file from an earlier job, already tagged
            info!(job = %id, "Serving cached output {}", path.display());
        }

        Ok(path)
    }

    /// Apply one state-machine transition and emit exactly one event
    /// for it. Percentages never regress; a transition carrying 0
    /// keeps the job's last percentage.
    async fn transition(
        &self,
        id: &JobId,
        track: &TrackInfo,
        status: JobStatus,
        progress: u8,
        message: String,
    ) {
        let (event, session) = {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };

            entry.job.status = status;
            entry.job.progress = entry.job.progress.max(progress);

            let event = ProgressEvent {
                id: id.clone(),
                track_id: track.id.clone(),
                status,
                message,
                progress: entry.job.progress,
            };
            // Subscribers may have gone away; that is their business
            let _ = entry.events.send(event.clone());
            (event, entry.job.session_id.clone())
        };

        info!(
            job = %id,
            track = %track.display_name(),
            status = ?status,
            progress = event.progress,
            "Job transition"
        );

        if let Some(session) = session {
            self.notifier.send_to_session(&session, &event).await;
        }
    }
}
