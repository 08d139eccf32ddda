//! Embeds track metadata and cover art into a finished audio file.
//!
//! Cover art is fetched, staged as a scoped temp file, embedded as the
//! front-cover picture, and the staging file is removed whether or not
//! the embed succeeds. Absent art means text-only tags and no fetch.

mod art;

use async_trait::async_trait;
use lofty::{Accessor, LoftyError, MimeType, Picture, PictureType, Probe, Tag, TagExt,
    TaggedFileExt};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tempfile::Builder;
use track_primitives::TrackInfo;
use tracing::{debug, info};

pub use art::{ArtFetcher, HttpArtFetcher};

#[cfg(test)]
pub use art::stub as art_stub;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Album art fetch failed: {0}")]
    ArtFetch(String),

    #[error("Tag embed failed: {0}")]
    Embed(String),

    #[error("Lofty error: {0}")]
    Lofty(#[from] LoftyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write-side seam for metadata embedding, so the pipeline can be
/// exercised without real audio containers.
#[async_trait]
pub trait Tagger {
    async fn tag(&self, path: &Path, track: &TrackInfo) -> Result<(), TagError>;
}

pub struct TrackTagger {
    temp_dir: PathBuf,
    art: Arc<dyn ArtFetcher + Send + Sync>,
}

impl TrackTagger {
    /// Create a tagger staging cover files under `temp_dir`.
    pub async fn new(
        temp_dir: impl AsRef<Path>,
        art: Arc<dyn ArtFetcher + Send + Sync>,
    ) -> Result<Self, TagError> {
        let temp_dir = temp_dir.as_ref().to_owned();
        tokio::fs::create_dir_all(&temp_dir).await?;
        Ok(Self { temp_dir, art })
    }
}

#[async_trait]
impl Tagger for TrackTagger {
    async fn tag(&self, path: &Path, track: &TrackInfo) -> Result<(), TagError> {
        // The staging file is dropped (and deleted) on every exit
        // path out of this function
        let mut cover_file = None;
        let mut cover_bytes = None;

        if let Some(url) = &track.album_art {
            let bytes = self.art.fetch(url).await?;
            debug!("Fetched {} bytes of cover art for {}", bytes.len(), track.display_name());

            let mut staged = Builder::new()
                .prefix("cover-")
                .suffix(".img")
                .tempfile_in(&self.temp_dir)?;
            staged.write_all(&bytes)?;

            cover_file = Some(staged);
            cover_bytes = Some(bytes);
        }

        let path = path.to_owned();
        let track = track.clone();
        let result = tokio::task::spawn_blocking(move || embed_tags(&path, &track, cover_bytes))
            .await
            .map_err(|e| TagError::Embed(e.to_string()))?;

        drop(cover_file);
        result
    }
}

/// Write the textual tags (plus optional front cover) into the file's
/// primary tag container.
fn embed_tags(path: &Path, track: &TrackInfo, cover: Option<Vec<u8>>) -> Result<(), TagError> {
    let mut tagged_file = Probe::open(path)?.read()?;
    let tag_type = tagged_file.primary_tag_type();

    let tag = if let Some(tag) = tagged_file.tag_mut(tag_type) {
        tag
    } else {
        tagged_file.insert_tag(Tag::new(tag_type));
        tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| TagError::Embed("could not create tag container".to_string()))?
    };

    tag.set_title(track.title.clone());
    tag.set_artist(track.artist.clone());
    tag.set_album(track.album.clone());

    if let Some(number) = track.track_number {
        tag.set_track(number);
    }
    if let Some(year) = track.release_year() {
        tag.set_year(year);
    }

    if let Some(data) = cover {
        let mime = sniff_mime(&data);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime),
            None,
            data,
        ));
    }

    tag.save_to_path(path)?;
    info!("Tagged {}", path.display());
    Ok(())
}

fn sniff_mime(data: &[u8]) -> MimeType {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        MimeType::Png
    } else if data.starts_with(b"GIF8") {
        MimeType::Gif
    } else {
        // JPEG magic, or the least surprising guess for anything else
        MimeType::Jpeg
    }
}
