//! Reads the last lines of the run log without loading the whole file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: u64 = 8 * 1024;

/// Return up to `lines` trailing non-blank lines of `path`, oldest first.
///
/// Carriage-return progress updates are collapsed to their final state.
pub fn tail_last_lines(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    if lines == 0 {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut buf: Vec<u8> = Vec::new();

    while pos > 0 {
        let step = CHUNK_SIZE.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;

        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;

        // the first segment may be partial, only the complete ones count
        let found = String::from_utf8_lossy(&buf)
            .split('\n')
            .skip(1)
            .filter_map(visible_line)
            .count();
        if found >= lines {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut segments: Vec<&str> = text.split('\n').collect();
    if pos > 0 && !segments.is_empty() {
        // first segment started mid-line
        segments.remove(0);
    }

    let complete: Vec<String> = segments
        .into_iter()
        .filter_map(visible_line)
        .map(str::to_string)
        .collect();

    let skip = complete.len().saturating_sub(lines);
    Ok(complete.into_iter().skip(skip).collect())
}

/// Final carriage-return state of a line, or `None` if nothing visible remains
fn visible_line(line: &str) -> Option<&str> {
    let line = line.trim_end_matches('\r');
    let line = line.rsplit('\r').next().unwrap_or(line);
    (!line.trim().is_empty()).then_some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_tail_short_file() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("run.log");
        fs::write(&path, "one\ntwo\nthree\n")?;

        assert_eq!(tail_last_lines(&path, 2)?, vec!["two", "three"]);
        assert_eq!(tail_last_lines(&path, 10)?, vec!["one", "two", "three"]);
        assert!(tail_last_lines(&path, 0)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_tail_skips_blank_lines_and_carriage_returns() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("run.log");
        fs::write(&path, "start\n\n[0:01] 10%\r[0:02] 20%\r\n\n")?;

        assert_eq!(tail_last_lines(&path, 1)?, vec!["[0:02] 20%"]);
        Ok(())
    }

    #[test]
    fn test_tail_large_file() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("run.log");
        let content: String = (0..5000).map(|i| format!("line {}\n", i)).collect();
        fs::write(&path, content)?;

        assert_eq!(
            tail_last_lines(&path, 3)?,
            vec!["line 4997", "line 4998", "line 4999"]
        );
        Ok(())
    }

    #[test]
    fn test_tail_reads_past_trailing_blank_lines() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("run.log");
        let mut content = String::from("first\nsecond\n");
        content.push_str(&"\n".repeat(20_000));
        content.push_str(&"   \r\n".repeat(100));
        fs::write(&path, content)?;

        assert_eq!(tail_last_lines(&path, 2)?, vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn test_tail_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(tail_last_lines(&dir.path().join("nope.log"), 1).is_err());
    }
}
