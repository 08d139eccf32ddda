use clap::Parser;
use std::path::PathBuf;

/// Resolve, download, transcode and tag a single track
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Track title
    #[arg(long)]
    pub title: String,

    /// Primary artist, used for matching and file naming
    #[arg(long)]
    pub artist: String,

    /// Full artist credit to embed in the tag (defaults to --artist)
    #[arg(long)]
    pub artist_credit: Option<String>,

    /// Album name to embed in the tag
    #[arg(long, default_value = "")]
    pub album: String,

    /// Track duration in milliseconds, used to rank search results
    #[arg(long)]
    pub duration_ms: u64,

    /// Album art URL to embed as the front cover
    #[arg(long)]
    pub album_art: Option<String>,

    /// Track number to embed in the tag
    #[arg(long)]
    pub track_number: Option<u32>,

    /// ISO release date, e.g. 2019-06-14
    #[arg(long)]
    pub release_date: Option<String>,

    /// Directory to store downloaded files
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Encode bitrate in kbps
    #[arg(long, default_value_t = 320)]
    pub bitrate: u32,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}
