use crate::args::Args;
use crate::output::OutputHandler;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use fetch_engine::{FetchEngine, FfmpegTranscoder, YtDlpFetcher};
use job_pipeline::{JobId, JobPipeline, JobStatus, NullNotifier, PipelineConfig};
use source_resolver::{SearchProvider, SourceResolver, YtDlpSearch};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use track_primitives::TrackInfo;
use track_tagger::{HttpArtFetcher, TrackTagger};

pub struct App {
    args: Args,
    output: OutputHandler,
}

impl App {
    pub fn new(args: Args) -> Self {
        let output = OutputHandler::new(args.verbose);
        Self { args, output }
    }

    pub async fn run(&self) -> Result<()> {
        let provider = Arc::new(YtDlpSearch);
        provider.check_available().await?;

        let resolver = Arc::new(SourceResolver::new(provider));
        let tagger = Arc::new(
            TrackTagger::new(
                self.args.output_dir.join("temp"),
                Arc::new(HttpArtFetcher::new()),
            )
            .await?,
        );
        let engine = Arc::new(
            FetchEngine::with_bitrate(
                &self.args.output_dir,
                Arc::new(YtDlpFetcher),
                Arc::new(FfmpegTranscoder),
                tagger,
                self.args.bitrate,
            )
            .await?,
        );

        let pipeline = Arc::new(JobPipeline::new(
            resolver,
            engine,
            Arc::new(NullNotifier),
            PipelineConfig::default(),
        ));

        let track = self.track_from_args();
        tracing::info!(
            "Pipeline ready, output dir {}",
            self.args.output_dir.display()
        );
        self.output.print_job_start(&track);

        let id = JobId::new(format!("cli-{}", chrono::Utc::now().timestamp_millis()));
        pipeline.submit(id.clone(), track, None)?;
        let mut events = pipeline
            .subscribe(&id)
            .ok_or_else(|| eyre!("job {id} vanished before it started"))?;

        // The job task may already have finished between submit and
        // subscribe; the record is authoritative for that window
        let already_done = pipeline
            .job(&id)
            .is_some_and(|job| job.status.is_terminal());

        if !already_done {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.output.print_event(&event);
                        if event.status.is_terminal() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {skipped} progress events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }

        let job = pipeline
            .take_job(&id)
            .ok_or_else(|| eyre!("job {id} left no record"))?;

        match job.status {
            JobStatus::Completed => {
                let path = job
                    .output_path
                    .ok_or_else(|| eyre!("completed job {id} has no output path"))?;
                self.output.print_complete(&path);
                Ok(())
            }
            _ => Err(eyre!(job
                .error
                .unwrap_or_else(|| "download failed".to_string()))),
        }
    }

    fn track_from_args(&self) -> TrackInfo {
        TrackInfo {
            id: format!(
                "{}-{}",
                self.args.artist.to_lowercase(),
                self.args.title.to_lowercase()
            ),
            title: self.args.title.clone(),
            primary_artist: self.args.artist.clone(),
            artist: self
                .args
                .artist_credit
                .clone()
                .unwrap_or_else(|| self.args.artist.clone()),
            album: self.args.album.clone(),
            duration_ms: self.args.duration_ms,
            album_art: self.args.album_art.clone(),
            track_number: self.args.track_number,
            release_date: self.args.release_date.clone(),
        }
    }

    pub fn print_error(&self, error: &color_eyre::Report) {
        self.output.print_error(error);
    }
}
