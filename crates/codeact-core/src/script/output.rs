//! Per-run capture of the stdout and stderr streams.

use serde::{Deserialize, Serialize};

/// Which captured stream a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// In-memory stdout/stderr buffers owned by exactly one run.
///
/// Nothing outside the run can write here, so there is no global redirection
/// to restore: dropping the capture is the release.
#[derive(Debug, Default)]
pub struct OutputCapture {
    stdout: String,
    stderr: String,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, stream: StreamKind, text: &str) {
        match stream {
            StreamKind::Stdout => self.stdout.push_str(text),
            StreamKind::Stderr => self.stderr.push_str(text),
        }
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Stdout, followed by a newline and stderr when stderr is non-empty.
    pub fn into_combined(self) -> String {
        let Self { mut stdout, stderr } = self;
        if !stderr.is_empty() {
            stdout.push('\n');
            stdout.push_str(&stderr);
        }
        stdout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_appended_after_single_newline() {
        let mut capture = OutputCapture::new();
        capture.write(StreamKind::Stdout, "out");
        capture.write(StreamKind::Stderr, "err");
        assert_eq!(capture.into_combined(), "out\nerr");
    }

    #[test]
    fn test_empty_stderr_adds_nothing() {
        let mut capture = OutputCapture::new();
        capture.write(StreamKind::Stdout, "hello\n");
        assert_eq!(capture.into_combined(), "hello\n");
    }
}
