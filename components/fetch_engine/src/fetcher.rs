use crate::types::EngineError;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use track_primitives::SourceRef;
use url::Url;

/// Adapter that streams a resolved source into a local file.
#[async_trait]
pub trait MediaFetcher {
    /// Check that the fetcher's external dependencies are present
    async fn check_available(&self) -> Result<(), EngineError>;

    /// Fetch the raw audio for `source` into `dest`
    async fn fetch(&self, source: &SourceRef, dest: &Path) -> Result<(), EngineError>;
}

/// Fetcher backed by yt-dlp's `bestaudio` format selection.
pub struct YtDlpFetcher;

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn check_available(&self) -> Result<(), EngineError> {
        which::which("yt-dlp")
            .map(|_| ())
            .map_err(|_| EngineError::DependencyNotFound("yt-dlp"))
    }

    async fn fetch(&self, source: &SourceRef, dest: &Path) -> Result<(), EngineError> {
        let url = Url::parse(source.as_str())
            .map_err(|e| EngineError::SourceUnavailable(format!("invalid source URL: {e}")))?;

        let dest_str = dest
            .to_str()
            .ok_or_else(|| EngineError::SourceUnavailable("invalid destination path".to_string()))?;

        let output = Command::new("yt-dlp")
            .arg("-f")
            .arg("bestaudio")
            .arg("--no-playlist")
            .arg("-o")
            .arg(dest_str)
            .arg(url.as_str())
            .output()
            .await?;

        if !output.status.success() {
            return Err(EngineError::SourceUnavailable(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        Ok(())
    }
}
