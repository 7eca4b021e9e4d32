//! Output capture - tails the file receiving the tracee's stdout.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_CAPTURE: AtomicU32 = AtomicU32::new(0);

/// Private capture file plus the reader state over it
#[derive(Debug)]
pub struct OutputCapture {
    path: PathBuf,
    reader: Option<File>,
    pending: Vec<u8>,
}

impl OutputCapture {
    /// Pick a fresh capture path inside `dir`
    pub fn new(dir: &Path) -> Self {
        let seq = NEXT_CAPTURE.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("trapline-{}-{}.stdout", std::process::id(), seq));
        Self {
            path,
            reader: None,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the file and start reading it from the beginning
    pub fn reset(&mut self) -> io::Result<()> {
        self.pending.clear();
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        self.reader = Some(File::open(&self.path)?);
        Ok(())
    }

    /// Complete lines appended since the last call; a trailing partial
    /// line is held back
    pub fn drain(&mut self) -> io::Result<Vec<String>> {
        self.fill()?;

        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        Ok(lines)
    }

    /// Like [`drain`](Self::drain) but also returns the held partial line
    pub fn flush(&mut self) -> io::Result<Vec<String>> {
        let mut lines = self.drain()?;
        if !self.pending.is_empty() {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }
        Ok(lines)
    }

    fn fill(&mut self) -> io::Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.read_to_end(&mut self.pending)?;
        }
        Ok(())
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        self.reader = None;
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn emits_complete_lines_only() {
        let mut capture = OutputCapture::new(&std::env::temp_dir());
        capture.reset().unwrap();

        append(capture.path(), b"hello\nwor");
        assert_eq!(capture.drain().unwrap(), vec!["hello".to_string()]);

        append(capture.path(), b"ld\n");
        assert_eq!(capture.drain().unwrap(), vec!["world".to_string()]);
        assert!(capture.drain().unwrap().is_empty());
    }

    #[test]
    fn flush_returns_partial_line() {
        let mut capture = OutputCapture::new(&std::env::temp_dir());
        capture.reset().unwrap();

        append(capture.path(), b"a\nno newline");
        assert_eq!(
            capture.flush().unwrap(),
            vec!["a".to_string(), "no newline".to_string()]
        );
    }

    #[test]
    fn reset_discards_previous_run() {
        let mut capture = OutputCapture::new(&std::env::temp_dir());
        capture.reset().unwrap();
        append(capture.path(), b"old run");
        capture.drain().unwrap();

        capture.reset().unwrap();
        append(capture.path(), b"new\n");
        assert_eq!(capture.drain().unwrap(), vec!["new".to_string()]);
    }

    #[test]
    fn unopened_capture_is_empty() {
        let mut capture = OutputCapture::new(&std::env::temp_dir());
        assert!(capture.drain().unwrap().is_empty());
    }

    #[test]
    fn capture_file_removed_on_drop() {
        let mut capture = OutputCapture::new(&std::env::temp_dir());
        capture.reset().unwrap();
        let path = capture.path().to_path_buf();
        assert!(path.exists());
        drop(capture);
        assert!(!path.exists());
    }
}
