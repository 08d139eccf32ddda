use crate::types::EngineError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Adapter that re-encodes a raw audio file at a target bitrate,
/// reporting intra-step progress as 0-100 over the channel.
#[async_trait]
pub trait Transcoder {
    /// Check that the transcoder's external dependencies are present
    async fn check_available(&self) -> Result<(), EngineError>;

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        duration_ms: u64,
        progress: mpsc::Sender<u8>,
    ) -> Result<(), EngineError>;
}

/// Transcoder backed by ffmpeg, reading `-progress pipe:1` key=value
/// lines off stdout to derive percentages.
pub struct FfmpegTranscoder;

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn check_available(&self) -> Result<(), EngineError> {
        which::which("ffmpeg")
            .map(|_| ())
            .map_err(|_| EngineError::DependencyNotFound("ffmpeg"))
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        duration_ms: u64,
        progress: mpsc::Sender<u8>,
    ) -> Result<(), EngineError> {
        let mut child = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .arg("-b:a")
            .arg(format!("{bitrate_kbps}k"))
            .arg("-f")
            .arg("mp3")
            .arg("-nostats")
            .arg("-loglevel")
            .arg("error")
            .arg("-progress")
            .arg("pipe:1")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::TranscodeFailed("ffmpeg stdout not captured".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(percent) = progress_percent(&line, duration_ms) {
                // Receiver gone means nobody cares about progress; keep encoding
                let _ = progress.send(percent).await;
            }
        }

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(EngineError::TranscodeFailed(
                String::from_utf8_lossy(&result.stderr).into_owned(),
            ));
        }

        Ok(())
    }
}

/// Derive a 0-100 percentage from one ffmpeg progress line.
///
/// `out_time_ms` is, despite the name, in microseconds.
fn progress_percent(line: &str, duration_ms: u64) -> Option<u8> {
    if line.trim() == "progress=end" {
        return Some(100);
    }

    let out_time_us = line.strip_prefix("out_time_ms=")?.trim().parse::<i64>().ok()?;
    if duration_ms == 0 {
        return None;
    }

    let percent = (out_time_us.max(0) as u128 * 100) / (duration_ms as u128 * 1000);
    Some(percent.min(100) as u8)
}

#[cfg(test)]
pub mod stub {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a placeholder output file and reports a fixed progress
    /// ramp, counting invocations.
    pub struct TranscoderStub {
        pub calls: AtomicUsize,
    }

    impl TranscoderStub {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transcoder for TranscoderStub {
        async fn check_available(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn transcode(
            &self,
            _input: &Path,
            output: &Path,
            _bitrate_kbps: u32,
            _duration_ms: u64,
            progress: mpsc::Sender<u8>,
        ) -> Result<(), EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for percent in [25, 50, 75, 100] {
                let _ = progress.send(percent).await;
            }
            tokio::fs::write(output, b"encoded audio").await?;
            Ok(())
        }
    }

    /// Leaves a partial output file behind, then fails.
    pub struct FailingTranscoder;

    #[async_trait]
    impl Transcoder for FailingTranscoder {
        async fn check_available(&self) -> Result<(), EngineError> {
            Ok(())
        }

        async fn transcode(
            &self,
            _input: &Path,
            output: &Path,
            _bitrate_kbps: u32,
            _duration_ms: u64,
            _progress: mpsc::Sender<u8>,
        ) -> Result<(), EngineError> {
            tokio::fs::write(output, b"partial").await?;
            Err(EngineError::TranscodeFailed("encoder crashed".to_string()))
        }
    }
}
