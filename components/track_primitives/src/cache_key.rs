//! Deterministic, filesystem-safe naming for pipeline artifacts.
//!
//! Two jobs for the same artist+title must land on the same output
//! path so the engine can skip work that is already done. No content
//! hashing is involved; the key is purely name-based.

/// Lowercase a string and replace every non-alphanumeric character
/// with an underscore.
pub fn normalize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Cache key for a track: `<normalized-artist>-<normalized-title>`.
pub fn cache_key(primary_artist: &str, title: &str) -> String {
    format!("{}-{}", normalize(primary_artist), normalize(title))
}

/// Final output filename for a cache key and target extension.
pub fn output_filename(key: &str, ext: &str) -> String {
    format!("{key}.{ext}")
}

/// Intermediate download filename for a cache key.
pub fn temp_filename(key: &str) -> String {
    format!("{key}.webm")
}
