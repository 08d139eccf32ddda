use crate::ResolveError;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

/// One search result, as returned by the external search provider.
///
/// Transient: candidates live only for the duration of a resolve call
/// and are never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchCandidate {
    pub id: String,
    pub title: String,
    /// Duration in seconds; providers occasionally omit it
    #[serde(default)]
    pub duration: f64,
}

/// Adapter over an external text-search service for audio sources.
///
/// Results are ordered but noisy; scoring in [`crate::SourceResolver`]
/// compensates for unreliable ranking.
#[async_trait]
pub trait SearchProvider {
    /// Check that the provider's external dependencies are present
    async fn check_available(&self) -> Result<(), ResolveError>;

    /// Return up to `limit` candidates for a free-text query
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, ResolveError>;
}

/// Search provider backed by yt-dlp's `ytsearchN:` pseudo-URL.
pub struct YtDlpSearch;

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn check_available(&self) -> Result<(), ResolveError> {
        which::which("yt-dlp")
            .map(|_| ())
            .map_err(|_| ResolveError::DependencyNotFound("yt-dlp"))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchCandidate>, ResolveError> {
        let output = Command::new("yt-dlp")
            .arg(format!("ytsearch{limit}:{query}"))
            .arg("--dump-json")
            .arg("--no-download")
            .output()
            .await?;

        if !output.status.success() {
            return Err(ResolveError::Provider(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }

        parse_candidates(&String::from_utf8_lossy(&output.stdout))
    }
}

/// yt-dlp emits one JSON object per line per result.
pub(crate) fn parse_candidates(stdout: &str) -> Result<Vec<SearchCandidate>, ResolveError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| ResolveError::Provider(e.to_string()))
        })
        .collect()
}
