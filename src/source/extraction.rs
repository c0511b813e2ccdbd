//! Reading extraction: source handle → numeric value.
//!
//! Extractors never fail. A handle that yields no number reads as 0.0.

use std::fmt;
use std::fs;
use std::sync::OnceLock;

use regex::Regex;

use super::adapter::SourceHandle;

/// Strategy turning a source handle into a consumption value.
pub trait ReadingExtractor: Send + Sync + fmt::Debug {
    /// Extracts the value behind `handle`; 0.0 for malformed input.
    fn extract(&self, handle: &SourceHandle) -> f64;
}

fn number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("reading pattern is a valid regex"))
}

/// First decimal number in `text`, or 0.0.
fn first_number(text: &str) -> f64 {
    number_pattern()
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Reads the value from the file name stem (`00123.45.png` → 123.45).
///
/// The simulator encodes the dial reading in the name of every snapshot it
/// writes, so this is the default extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct FilenameExtractor;

impl ReadingExtractor for FilenameExtractor {
    fn extract(&self, handle: &SourceHandle) -> f64 {
        handle
            .as_path()
            .file_stem()
            .and_then(|s| s.to_str())
            .map_or(0.0, first_number)
    }
}

/// Reads `.txt` handles by content and everything else by file name.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentExtractor;

impl ReadingExtractor for ContentExtractor {
    fn extract(&self, handle: &SourceHandle) -> f64 {
        let is_text = handle
            .as_path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("txt"));
        if !is_text {
            return FilenameExtractor.extract(handle);
        }
        match fs::read_to_string(handle.as_path()) {
            Ok(content) => first_number(&content),
            Err(_) => FilenameExtractor.extract(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn filename_extractor_reads_stem() {
        let ex = FilenameExtractor;
        assert!((ex.extract(&SourceHandle::new("/m/a/00123.45.png")) - 123.45).abs() < 1e-9);
        assert!((ex.extract(&SourceHandle::new("/m/a/reading_77.jpg")) - 77.0).abs() < 1e-9);
    }

    #[test]
    fn filename_extractor_ignores_directory_digits() {
        let ex = FilenameExtractor;
        assert!(ex.extract(&SourceHandle::new("/Medicoes_2024/meter/latest.png")).abs() < f64::EPSILON);
    }

    #[test]
    fn filename_extractor_malformed_is_zero() {
        let ex = FilenameExtractor;
        assert!(ex.extract(&SourceHandle::new("")).abs() < f64::EPSILON);
        assert!(ex.extract(&SourceHandle::new("/m/snapshot.png")).abs() < f64::EPSILON);
    }

    #[test]
    fn content_extractor_reads_text_body() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("current.txt");
        fs::write(&path, "reading: 0042.75 m3\n").unwrap();
        assert!((ContentExtractor.extract(&SourceHandle::new(&path)) - 42.75).abs() < 1e-9);
    }

    #[test]
    fn content_extractor_falls_back_to_name() {
        assert!((ContentExtractor.extract(&SourceHandle::new("/gone/18.5.txt")) - 18.5).abs() < 1e-9);
        assert!((ContentExtractor.extract(&SourceHandle::new("/m/9.png")) - 9.0).abs() < 1e-9);
    }
}
