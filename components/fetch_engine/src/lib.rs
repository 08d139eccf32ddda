//! Downloads a resolved source, transcodes it to the target format
//! and embeds its tags, with idempotent name-based caching and
//! per-key locking.
//!
//! The download phase maps onto the job-total progress range 0-50,
//! the conversion phase onto 50-100 (`50 + step/2`). All intermediate
//! files live inside a scoped [`TempDir`] so they are removed on
//! every exit path; the finished file is renamed into the output
//! directory only once it is fully transcoded and tagged, so a cache
//! hit can never observe a partial artifact.

mod fetcher;
mod transcoder;
mod types;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;
use track_primitives::{cache_key, output_filename, temp_filename, SourceRef, TrackInfo};
use track_tagger::Tagger;
use tracing::info;

pub use fetcher::{MediaFetcher, YtDlpFetcher};
pub use transcoder::{FfmpegTranscoder, Transcoder};
pub use types::{EngineError, EngineOutcome, EngineProgress, Phase};

#[cfg(test)]
pub use fetcher::stub as fetcher_stub;
#[cfg(test)]
pub use transcoder::stub as transcoder_stub;

/// Target container for finished files.
const TARGET_EXT: &str = "mp3";

/// Default encode bitrate in kbps.
pub const DEFAULT_BITRATE_KBPS: u32 = 320;

pub struct FetchEngine {
    output_dir: PathBuf,
    temp_dir: PathBuf,
    bitrate_kbps: u32,
    fetcher: Arc<dyn MediaFetcher + Send + Sync>,
    transcoder: Arc<dyn Transcoder + Send + Sync>,
    tagger: Arc<dyn Tagger + Send + Sync>,
    /// Serializes the exists-check/download/encode/tag window per
    /// cache key; entries are pruned once nobody holds them
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FetchEngine {
    /// Create an engine storing finished files in `output_dir`, with
    /// intermediate files staged under `output_dir/temp`.
    pub async fn new(
        output_dir: impl AsRef<Path>,
        fetcher: Arc<dyn MediaFetcher + Send + Sync>,
        transcoder: Arc<dyn Transcoder + Send + Sync>,
        tagger: Arc<dyn Tagger + Send + Sync>,
    ) -> Result<Self, EngineError> {
        Self::with_bitrate(output_dir, fetcher, transcoder, tagger, DEFAULT_BITRATE_KBPS).await
    }

    pub async fn with_bitrate(
        output_dir: impl AsRef<Path>,
        fetcher: Arc<dyn MediaFetcher + Send + Sync>,
        transcoder: Arc<dyn Transcoder + Send + Sync>,
        tagger: Arc<dyn Tagger + Send + Sync>,
        bitrate_kbps: u32,
    ) -> Result<Self, EngineError> {
        fetcher.check_available().await?;
        transcoder.check_available().await?;

        let output_dir = output_dir.as_ref().to_owned();
        let temp_dir = output_dir.join("temp");

        // Create directories if they don't exist
        tokio::fs::create_dir_all(&output_dir).await?;
        tokio::fs::create_dir_all(&temp_dir).await?;

        Ok(Self {
            output_dir,
            temp_dir,
            bitrate_kbps,
            fetcher,
            transcoder,
            tagger,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The output path a given track will land on.
    pub fn output_path(&self, track: &TrackInfo) -> PathBuf {
        let key = cache_key(&track.primary_artist, &track.title);
        self.output_dir.join(output_filename(&key, TARGET_EXT))
    }

    /// Fetch, transcode and tag `source` for `track`, emitting
    /// job-total progress samples over `progress`.
    ///
    /// Returns [`EngineOutcome::Cached`] without touching any adapter
    /// when a finished file already exists under the track's cache
    /// key. Two concurrent runs with the same key serialize on a
    /// per-key lock held across the whole pipeline, so the second
    /// run only ever sees a fully finished output or none at all.
    pub async fn run(
        &self,
        track: &TrackInfo,
        source: &SourceRef,
        progress: mpsc::Sender<EngineProgress>,
    ) -> Result<EngineOutcome, EngineError> {
        let key = cache_key(&track.primary_artist, &track.title);
        let result = self.run_locked(&key, track, source, progress).await;
        self.prune_key_lock(&key);
        result
    }

    async fn run_locked(
        &self,
        key: &str,
        track: &TrackInfo,
        source: &SourceRef,
        progress: mpsc::Sender<EngineProgress>,
    ) -> Result<EngineOutcome, EngineError> {
        let out_path = self.output_dir.join(output_filename(key, TARGET_EXT));

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if tokio::fs::try_exists(&out_path).await? {
            info!(key, "Output already present, skipping fetch");
            return Ok(EngineOutcome::Cached(out_path));
        }

        let _ = progress
            .send(EngineProgress {
                phase: Phase::Downloading,
                percent: 0,
            })
            .await;

        // Scoped: dropped (and deleted) on every exit path below
        let staging = TempDir::new_in(&self.temp_dir)?;
        let raw_path = staging.path().join(temp_filename(key));
        let encoded_path = staging.path().join(output_filename(key, TARGET_EXT));

        self.fetcher.fetch(source, &raw_path).await?;
        info!(key, "Fetched raw audio ({})", raw_path.display());

        let _ = progress
            .send(EngineProgress {
                phase: Phase::Converting,
                percent: 50,
            })
            .await;

        let reached = self
            .transcode_with_progress(&raw_path, &encoded_path, track.duration_ms, &progress)
            .await?;

        let _ = progress
            .send(EngineProgress {
                phase: Phase::Tagging,
                percent: reached,
            })
            .await;

        self.tagger.tag(&encoded_path, track).await?;

        // The finished file becomes visible to cache checks only now,
        // fully transcoded and tagged
        tokio::fs::rename(&encoded_path, &out_path).await?;

        info!(key, "Finished {}", out_path.display());
        Ok(EngineOutcome::Fetched(out_path))
    }

    /// Drive the transcoder, mapping its 0-100 step progress into the
    /// job-total 50-100 range and dropping non-increasing samples.
    /// Returns the highest job-total percentage reached.
    async fn transcode_with_progress(
        &self,
        input: &Path,
        output: &Path,
        duration_ms: u64,
        progress: &mpsc::Sender<EngineProgress>,
    ) -> Result<u8, EngineError> {
        let (step_tx, mut step_rx) = mpsc::channel::<u8>(16);

        let forward = async {
            let mut last = 50u8;
            while let Some(step) = step_rx.recv().await {
                let total = 50 + step.min(100) / 2;
                if total > last {
                    last = total;
                    let _ = progress
                        .send(EngineProgress {
                            phase: Phase::Converting,
                            percent: total,
                        })
                        .await;
                }
            }
            last
        };

        let transcode =
            self.transcoder
                .transcode(input, output, self.bitrate_kbps, duration_ms, step_tx);

        let (result, reached) = tokio::join!(transcode, forward);
        result.map(|()| reached)
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .entry(key.to_owned())
            .or_default()
            .clone()
    }

    /// Drop a key's lock entry once no run holds or awaits it.
    fn prune_key_lock(&self, key: &str) {
        let mut locks = self.key_locks.lock();
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn key_lock_count(&self) -> usize {
        self.key_locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::fetcher_stub::{FailingFetcher, FetcherStub};
    use super::transcoder_stub::{FailingTranscoder, TranscoderStub};
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use track_tagger::TagError;

    struct TaggerStub {
        calls: AtomicUsize,
    }

    impl TaggerStub {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tagger for TaggerStub {
        async fn tag(&self, _path: &Path, _track: &TrackInfo) -> Result<(), TagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTagger;

    #[async_trait]
    impl Tagger for FailingTagger {
        async fn tag(&self, _path: &Path, _track: &TrackInfo) -> Result<(), TagError> {
            Err(TagError::Embed("container rejected tag".to_string()))
        }
    }

    /// Fails its first call after a pause, then succeeds.
    struct FailOnceTagger {
        calls: AtomicUsize,
    }

    impl FailOnceTagger {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tagger for FailOnceTagger {
        async fn tag(&self, _path: &Path, _track: &TrackInfo) -> Result<(), TagError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if call == 0 {
                Err(TagError::Embed("container rejected tag".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn track() -> TrackInfo {
        TrackInfo {
            id: "t1".to_string(),
            title: "Blue".to_string(),
            primary_artist: "Sky".to_string(),
            artist: "Sky".to_string(),
            album: "Weather".to_string(),
            duration_ms: 210_000,
            album_art: None,
            track_number: None,
            release_date: None,
        }
    }

    fn source() -> SourceRef {
        SourceRef::new("https://www.youtube.com/watch?v=a")
    }

    async fn engine_with(
        dir: &Path,
        fetcher: Arc<dyn MediaFetcher + Send + Sync>,
        transcoder: Arc<dyn Transcoder + Send + Sync>,
        tagger: Arc<dyn Tagger + Send + Sync>,
    ) -> FetchEngine {
        FetchEngine::new(dir, fetcher, transcoder, tagger)
            .await
            .unwrap()
    }

    fn drain(mut rx: mpsc::Receiver<EngineProgress>) -> Vec<EngineProgress> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    async fn temp_is_empty(dir: &Path) -> bool {
        let mut entries = tokio::fs::read_dir(dir.join("temp")).await.unwrap();
        entries.next_entry().await.unwrap().is_none()
    }

    #[tokio::test]
    async fn creates_output_and_temp_directories() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("downloads");
        engine_with(
            &root,
            Arc::new(FetcherStub::new()),
            Arc::new(TranscoderStub::new()),
            Arc::new(TaggerStub::new()),
        )
        .await;

        assert!(root.is_dir());
        assert!(root.join("temp").is_dir());
    }

    #[tokio::test]
    async fn full_run_produces_output_and_monotone_progress() {
        let dir = tempfile::TempDir::new().unwrap();
        let tagger = Arc::new(TaggerStub::new());
        let engine = engine_with(
            dir.path(),
            Arc::new(FetcherStub::new()),
            Arc::new(TranscoderStub::new()),
            tagger.clone(),
        )
        .await;

        let (tx, rx) = mpsc::channel(64);
        let outcome = engine.run(&track(), &source(), tx).await.unwrap();

        assert_matches!(outcome, EngineOutcome::Fetched(_));
        assert!(outcome.path().ends_with("sky-blue.mp3"));
        assert!(outcome.path().exists());
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 1);

        let events = drain(rx);
        assert_eq!(events[0], EngineProgress { phase: Phase::Downloading, percent: 0 });
        assert_eq!(events[1], EngineProgress { phase: Phase::Converting, percent: 50 });
        assert_eq!(events.last().unwrap().phase, Phase::Tagging);
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn converting_progress_maps_into_upper_half() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine_with(
            dir.path(),
            Arc::new(FetcherStub::new()),
            Arc::new(TranscoderStub::new()),
            Arc::new(TaggerStub::new()),
        )
        .await;

        let (tx, rx) = mpsc::channel(64);
        engine.run(&track(), &source(), tx).await.unwrap();

        // Stub ramp 25/50/75/100 maps to 62/75/87/100
        let converting: Vec<u8> = drain(rx)
            .into_iter()
            .filter(|e| e.phase == Phase::Converting)
            .map(|e| e.percent)
            .collect();
        assert_eq!(converting, vec![50, 62, 75, 87, 100]);
    }

    #[tokio::test]
    async fn existing_output_short_circuits_without_adapters() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = Arc::new(FetcherStub::new());
        let transcoder = Arc::new(TranscoderStub::new());
        let tagger = Arc::new(TaggerStub::new());
        let engine = engine_with(dir.path(), fetcher.clone(), transcoder.clone(), tagger.clone())
            .await;

        tokio::fs::write(dir.path().join("sky-blue.mp3"), b"done")
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(64);
        let outcome = engine.run(&track(), &source(), tx).await.unwrap();

        assert!(outcome.is_cached());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(transcoder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 0);
        assert!(drain(rx).is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_and_leaves_no_residue() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine_with(
            dir.path(),
            Arc::new(FailingFetcher),
            Arc::new(TranscoderStub::new()),
            Arc::new(TaggerStub::new()),
        )
        .await;

        let (tx, _rx) = mpsc::channel(64);
        let err = engine.run(&track(), &source(), tx).await;
        assert_matches!(err, Err(EngineError::SourceUnavailable(_)));

        assert!(!dir.path().join("sky-blue.mp3").exists());
        assert!(temp_is_empty(dir.path()).await);
    }

    #[tokio::test]
    async fn transcode_failure_leaves_no_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let tagger = Arc::new(TaggerStub::new());
        let engine = engine_with(
            dir.path(),
            Arc::new(FetcherStub::new()),
            Arc::new(FailingTranscoder),
            tagger.clone(),
        )
        .await;

        let (tx, _rx) = mpsc::channel(64);
        let err = engine.run(&track(), &source(), tx).await;
        assert_matches!(err, Err(EngineError::TranscodeFailed(_)));

        assert!(!dir.path().join("sky-blue.mp3").exists());
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 0);
        assert!(temp_is_empty(dir.path()).await);
    }

    #[tokio::test]
    async fn tagging_failure_never_publishes_an_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine_with(
            dir.path(),
            Arc::new(FetcherStub::new()),
            Arc::new(TranscoderStub::new()),
            Arc::new(FailingTagger),
        )
        .await;

        let (tx, _rx) = mpsc::channel(64);
        let err = engine.run(&track(), &source(), tx).await;
        assert_matches!(err, Err(EngineError::Tag(_)));

        // The untagged file must not satisfy a later cache check
        assert!(!dir.path().join("sky-blue.mp3").exists());
        assert!(temp_is_empty(dir.path()).await);
    }

    #[tokio::test]
    async fn duplicate_concurrent_runs_fetch_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = Arc::new(FetcherStub::new());
        let tagger = Arc::new(TaggerStub::new());
        let engine = Arc::new(
            engine_with(
                dir.path(),
                fetcher.clone(),
                Arc::new(TranscoderStub::new()),
                tagger.clone(),
            )
            .await,
        );

        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(64);
                engine.run(&track(), &source(), tx).await
            }));
        }

        let mut cached = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.is_cached() {
                cached += 1;
            }
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached, 1);
    }

    #[tokio::test]
    async fn concurrent_run_never_cache_hits_a_file_still_being_tagged() {
        let dir = tempfile::TempDir::new().unwrap();
        let fetcher = Arc::new(FetcherStub::new());
        let engine = Arc::new(
            engine_with(
                dir.path(),
                fetcher.clone(),
                Arc::new(TranscoderStub::new()),
                Arc::new(FailOnceTagger::new()),
            )
            .await,
        );

        let mut handles = Vec::new();
        for _ in 0..2 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(64);
                engine.run(&track(), &source(), tx).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        // The run whose tagging failed published nothing, so the other
        // run did its own full fetch instead of trusting a half-done
        // artifact that later vanished
        let failures = outcomes.iter().filter(|o| o.is_err()).count();
        assert_eq!(failures, 1);
        let finished = outcomes
            .iter()
            .find_map(|o| o.as_ref().ok())
            .expect("one run must finish");
        assert_matches!(finished, EngineOutcome::Fetched(_));
        assert!(finished.path().exists());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn key_locks_are_pruned_after_each_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine_with(
            dir.path(),
            Arc::new(FetcherStub::new()),
            Arc::new(TranscoderStub::new()),
            Arc::new(TaggerStub::new()),
        )
        .await;

        for _ in 0..2 {
            let (tx, _rx) = mpsc::channel(64);
            engine.run(&track(), &source(), tx).await.unwrap();
        }

        assert_eq!(engine.key_lock_count(), 0);
    }
}
