use job_pipeline::ProgressEvent;
use std::path::Path;
use track_primitives::TrackInfo;

pub struct OutputHandler {
    verbose: bool,
}

impl OutputHandler {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn print_job_start(&self, track: &TrackInfo) {
        println!("Fetching: {}", track.display_name());
        if self.verbose {
            println!("Album: {}", track.album);
            println!("Duration: {:.1} seconds", track.duration_secs());
            if let Some(art) = &track.album_art {
                println!("Album art: {art}");
            }
        }
    }

    pub fn print_event(&self, event: &ProgressEvent) {
        println!("[{:3}%] {}", event.progress, event.message);
    }

    pub fn print_complete(&self, path: &Path) {
        println!("Saved to {}", path.display());
    }

    pub fn print_error(&self, error: &color_eyre::Report) {
        eprintln!("Error: {}", error);

        if self.verbose {
            eprintln!("\nError details:");
            error.chain().skip(1).for_each(|cause| {
                eprintln!("  caused by: {}", cause);
            });
        }
    }
}
