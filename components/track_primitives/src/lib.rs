mod cache_key;
mod track;

pub use cache_key::{cache_key, normalize, output_filename, temp_filename};
pub use track::{SourceRef, TrackError, TrackInfo};
