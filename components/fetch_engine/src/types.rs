use thiserror::Error;
use track_tagger::TagError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Required dependency not found: {0}")]
    DependencyNotFound(&'static str),

    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which stage of the engine's work a progress sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    Converting,
    Tagging,
}

/// A progress sample on the job-total 0-100 scale: the download phase
/// occupies 0-50, conversion 50-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineProgress {
    pub phase: Phase,
    pub percent: u8,
}

/// How the engine produced the output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// Freshly downloaded, transcoded and tagged
    Fetched(std::path::PathBuf),
    /// Already present under this cache key; no adapter was invoked
    Cached(std::path::PathBuf),
}

impl EngineOutcome {
    pub fn path(&self) -> &std::path::Path {
        match self {
            EngineOutcome::Fetched(p) | EngineOutcome::Cached(p) => p,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, EngineOutcome::Cached(_))
    }
}
