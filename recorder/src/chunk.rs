//! Chunk filename grammar: `NNNN.<video_format>`, lexicographically sortable and
//! temporally ordered because the capture engine numbers segments monotonically.

use camino::Utf8Path;

pub fn is_valid_chunk_name(name: &str, format: &str) -> bool {
    match name.strip_suffix(&format!(".{format}")) {
        Some(digits) => digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Lists chunk filenames in `dir` matching `format`, sorted lexicographically (== temporal order).
pub fn list_sorted_chunks(dir: &Utf8Path, format: &str) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if is_valid_chunk_name(name, format) {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// The next segment number the capture engine should start at: one past the highest
/// existing numbered chunk, or the configured `start_chunk` if the directory is
/// empty/absent.
pub fn next_start_index(dir: &Utf8Path, format: &str, start_chunk: u32) -> std::io::Result<u32> {
    let existing = match list_sorted_chunks(dir, format) {
        Ok(v) => v,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(start_chunk),
        Err(err) => return Err(err),
    };
    match existing.last() {
        Some(last) => {
            let digits = last
                .strip_suffix(&format!(".{format}"))
                .expect("validated by list_sorted_chunks");
            let n: u32 = digits.parse().expect("validated as all-ascii-digit");
            Ok(n + 1)
        }
        None => Ok(start_chunk),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0001.mp4", "mp4", true)]
    #[case("1.mp4", "mp4", false)]
    #[case("00001.mp4", "mp4", false)]
    #[case("0001.mkv", "mp4", false)]
    #[case("000a.mp4", "mp4", false)]
    #[case("0001.mkv", "mkv", true)]
    fn validates_exact_grammar(#[case] name: &str, #[case] format: &str, #[case] valid: bool) {
        assert_eq!(is_valid_chunk_name(name, format), valid);
    }

    #[test]
    fn sorts_lexicographically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0003.mp4", "0001.mp4", "not-a-chunk.txt", "0002.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let path = Utf8Path::from_path(dir.path()).unwrap();
        let chunks = list_sorted_chunks(path, "mp4").unwrap();
        assert_eq!(chunks, vec!["0001.mp4", "0002.mp4", "0003.mp4"]);
    }

    #[test]
    fn next_start_index_continues_from_existing_regardless_of_start_chunk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0004.mp4"), b"x").unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        assert_eq!(next_start_index(path, "mp4", 7).unwrap(), 5);
    }

    #[test]
    fn next_start_index_uses_configured_start_chunk_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8Path::from_path(dir.path()).unwrap();
        assert_eq!(next_start_index(path, "mp4", 0).unwrap(), 0);
        assert_eq!(next_start_index(path, "mp4", 7).unwrap(), 7);
    }
}
