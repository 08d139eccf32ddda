//! Picks the best externally hosted audio source for a track.
//!
//! Search results are noisy: titles come in every imaginable shape and
//! the provider's own ranking is unreliable. Candidates are therefore
//! re-scored locally with penalties for missing title/artist/keyword
//! signals plus a continuous penalty on duration mismatch, and the
//! lowest-scoring candidate wins.

mod provider;

use std::sync::Arc;
use thiserror::Error;
use track_primitives::{SourceRef, TrackInfo};
use tracing::{debug, info};

pub use provider::{SearchCandidate, SearchProvider, YtDlpSearch};

#[cfg(test)]
pub use provider::stub;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No suitable audio source found")]
    NoMatchFound,

    #[error("Search provider unavailable: {0}")]
    Provider(String),

    #[error("Required dependency not found: {0}")]
    DependencyNotFound(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Penalty weights applied while scoring candidates. Lower total wins.
///
/// These are policy, not invariants: ranking quality varies between
/// providers, so deployments may tune them.
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    /// Added when the candidate title lacks the track title
    pub missing_title: f64,
    /// Added when the candidate title lacks the primary artist
    pub missing_artist: f64,
    /// Added when the title has neither an "audio" nor an "official" marker
    pub missing_keyword: f64,
    /// Seconds of duration difference per penalty point
    pub duration_divisor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            missing_title: 10.0,
            missing_artist: 8.0,
            missing_keyword: 5.0,
            duration_divisor: 10.0,
        }
    }
}

impl ScoreWeights {
    /// Score a candidate against the target track. Non-negative,
    /// lower is better.
    pub fn score(&self, track: &TrackInfo, candidate: &SearchCandidate) -> f64 {
        let title_lower = candidate.title.to_lowercase();

        let title_match = title_lower.contains(&track.title.to_lowercase());
        let artist_match = title_lower.contains(&track.primary_artist.to_lowercase());
        let keyword_match = title_lower.contains("audio") || title_lower.contains("official");

        let duration_diff = (candidate.duration - track.duration_secs()).abs();

        (if title_match { 0.0 } else { self.missing_title })
            + (if artist_match { 0.0 } else { self.missing_artist })
            + (if keyword_match { 0.0 } else { self.missing_keyword })
            + duration_diff / self.duration_divisor
    }
}

/// How many candidates to request from the provider per resolve.
const SEARCH_LIMIT: usize = 5;

pub struct SourceResolver {
    provider: Arc<dyn SearchProvider + Send + Sync>,
    weights: ScoreWeights,
}

impl SourceResolver {
    pub fn new(provider: Arc<dyn SearchProvider + Send + Sync>) -> Self {
        Self::with_weights(provider, ScoreWeights::default())
    }

    pub fn with_weights(
        provider: Arc<dyn SearchProvider + Send + Sync>,
        weights: ScoreWeights,
    ) -> Self {
        Self { provider, weights }
    }

    /// Find the best matching source for a track, or fail with
    /// [`ResolveError::NoMatchFound`] when nothing usable comes back.
    pub async fn resolve(&self, track: &TrackInfo) -> Result<SourceRef, ResolveError> {
        let query = format!("{} - {} audio", track.primary_artist, track.title);
        let candidates = self.provider.search(&query, SEARCH_LIMIT).await?;

        let mut best: Option<(&SearchCandidate, f64)> = None;
        for candidate in &candidates {
            if candidate.id.trim().is_empty() {
                continue;
            }

            let score = self.weights.score(track, candidate);
            debug!(
                candidate = %candidate.title,
                score,
                "Scored candidate for {}",
                track.display_name()
            );

            // Strictly-less keeps ties on the first-seen candidate
            match best {
                Some((_, best_score)) if score >= best_score => {}
                _ => best = Some((candidate, score)),
            }
        }

        let (winner, score) = best.ok_or(ResolveError::NoMatchFound)?;
        info!(
            id = %winner.id,
            score,
            "Resolved source for {}",
            track.display_name()
        );

        Ok(SourceRef::new(format!(
            "https://www.youtube.com/watch?v={}",
            winner.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::stub::{FailingProvider, ProviderStub};
    use super::*;
    use assert_matches::assert_matches;

    fn track(title: &str, artist: &str, duration_ms: u64) -> TrackInfo {
        TrackInfo {
            id: "t1".to_string(),
            title: title.to_string(),
            primary_artist: artist.to_string(),
            artist: artist.to_string(),
            album: "Album".to_string(),
            duration_ms,
            album_art: None,
            track_number: None,
            release_date: None,
        }
    }

    fn candidate(id: &str, title: &str, duration: f64) -> SearchCandidate {
        SearchCandidate {
            id: id.to_string(),
            title: title.to_string(),
            duration,
        }
    }

    #[tokio::test]
    async fn picks_the_lowest_scoring_candidate() {
        let provider = Arc::new(ProviderStub::new(vec![
            candidate("a", "Sky - Blue (Official Audio)", 209.0),
            candidate("b", "Sky Blue Remix", 400.0),
        ]));
        let resolver = SourceResolver::new(provider);

        let source = resolver.resolve(&track("Blue", "Sky", 210_000)).await.unwrap();
        assert_eq!(source.as_str(), "https://www.youtube.com/watch?v=a");
    }

    #[tokio::test]
    async fn empty_candidate_set_is_no_match() {
        let resolver = SourceResolver::new(Arc::new(ProviderStub::new(vec![])));
        let err = resolver.resolve(&track("Blue", "Sky", 210_000)).await;
        assert_matches!(err, Err(ResolveError::NoMatchFound));
    }

    #[tokio::test]
    async fn candidates_without_ids_do_not_qualify() {
        let provider = Arc::new(ProviderStub::new(vec![candidate(
            "  ",
            "Sky - Blue (Official Audio)",
            210.0,
        )]));
        let resolver = SourceResolver::new(provider);
        let err = resolver.resolve(&track("Blue", "Sky", 210_000)).await;
        assert_matches!(err, Err(ResolveError::NoMatchFound));
    }

    #[tokio::test]
    async fn small_duration_gap_beats_large_one() {
        // Identical titles, only the duration differs
        let provider = Arc::new(ProviderStub::new(vec![
            candidate("far", "Sky - Blue (Official Audio)", 410.0),
            candidate("near", "Sky - Blue (Official Audio)", 212.0),
        ]));
        let resolver = SourceResolver::new(provider);

        let source = resolver.resolve(&track("Blue", "Sky", 210_000)).await.unwrap();
        assert_eq!(source.as_str(), "https://www.youtube.com/watch?v=near");
    }

    #[tokio::test]
    async fn ties_break_on_first_seen_order() {
        let provider = Arc::new(ProviderStub::new(vec![
            candidate("first", "Sky - Blue (Official Audio)", 210.0),
            candidate("second", "Sky - Blue (Official Audio)", 210.0),
        ]));
        let resolver = SourceResolver::new(provider);

        let source = resolver.resolve(&track("Blue", "Sky", 210_000)).await.unwrap();
        assert_eq!(source.as_str(), "https://www.youtube.com/watch?v=first");
    }

    #[tokio::test]
    async fn weights_are_policy_not_invariants() {
        // With the artist penalty zeroed out, the shorter-duration
        // remix overtakes the off-by-190-seconds official upload.
        let provider = Arc::new(ProviderStub::new(vec![
            candidate("official", "Sky - Blue (Official Audio)", 400.0),
            candidate("remix", "Blue Remix", 210.0),
        ]));
        let weights = ScoreWeights {
            missing_artist: 0.0,
            missing_keyword: 0.0,
            ..ScoreWeights::default()
        };
        let resolver = SourceResolver::with_weights(provider, weights);

        let source = resolver.resolve(&track("Blue", "Sky", 210_000)).await.unwrap();
        assert_eq!(source.as_str(), "https://www.youtube.com/watch?v=remix");
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let resolver = SourceResolver::new(Arc::new(FailingProvider));
        let err = resolver.resolve(&track("Blue", "Sky", 210_000)).await;
        assert_matches!(err, Err(ResolveError::Provider(_)));
    }

    #[test]
    fn scoring_matches_the_documented_penalties() {
        let weights = ScoreWeights::default();
        let t = track("Blue", "Sky", 210_000);

        // Full match, 1 second off: only the duration penalty applies
        let good = candidate("a", "Sky - Blue (Official Audio)", 209.0);
        assert!((weights.score(&t, &good) - 0.1).abs() < 1e-9);

        // Nothing matches, 10 seconds off
        let bad = candidate("b", "Lo-fi beats to relax to", 220.0);
        assert!((weights.score(&t, &bad) - 24.0).abs() < 1e-9);
    }
}
