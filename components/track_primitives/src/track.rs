use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Track title must not be empty")]
    EmptyTitle,

    #[error("Primary artist must not be empty")]
    EmptyArtist,
}

/// Canonical metadata for the track to be obtained.
///
/// Immutable once constructed; the pipeline never mutates it, only
/// derives queries, filenames and tag fields from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    /// External catalog identifier, carried through to progress events
    pub id: String,

    pub title: String,

    /// Primary artist, used for matching and cache-key derivation
    pub primary_artist: String,

    /// Full artist string as it should appear in the tag (may list
    /// several artists)
    pub artist: String,

    pub album: String,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Album art URL, if the catalog provided one
    pub album_art: Option<String>,

    pub track_number: Option<u32>,

    /// ISO date string, e.g. "2019-06-14"
    pub release_date: Option<String>,
}

impl TrackInfo {
    /// Validate the invariants that the rest of the pipeline relies on:
    /// non-empty title and primary artist.
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.title.trim().is_empty() {
            return Err(TrackError::EmptyTitle);
        }
        if self.primary_artist.trim().is_empty() {
            return Err(TrackError::EmptyArtist);
        }
        Ok(())
    }

    /// Duration in whole seconds, for comparison against search results
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    /// Release year derived from the leading characters of the ISO date
    pub fn release_year(&self) -> Option<u32> {
        self.release_date
            .as_deref()
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse().ok())
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.primary_artist, self.title)
    }
}

/// Reference to a resolved external audio source, e.g. a watch URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self(uri.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
