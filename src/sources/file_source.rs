use crate::error::SourceError;
use crate::sources::LogSource;
use crate::BoxFuture;
use log::debug;
use std::path::{Path, PathBuf};

/// Log source that reads one log line per line of a text file
///
/// Blank lines are skipped. A missing file is an error so that a wrong path
/// is not mistaken for a quiet system.
#[derive(Debug, Clone)]
pub struct FileLogSource {
    path: PathBuf,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split file contents into non-blank, trimmed log lines
    fn parse_lines(contents: &str) -> Vec<String> {
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl LogSource for FileLogSource {
    fn fetch_logs(&self) -> BoxFuture<'_, Result<Vec<String>, SourceError>> {
        Box::pin(async move {
            let contents = tokio::fs::read_to_string(&self.path).await?;
            let lines = Self::parse_lines(&contents);
            debug!("Read {} log lines from {}", lines.len(), self.path.display());
            Ok(lines)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_lines_skips_blanks() {
        let lines = FileLogSource::parse_lines("a | b\n\n   \n  c | d  \r\n");
        assert_eq!(lines, vec!["a | b".to_string(), "c | d".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_logs_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Component: api | Severity: 3").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "Component: db | Severity: 1").unwrap();

        let source = FileLogSource::new(file.path());
        let logs = source.fetch_logs().await.unwrap();

        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0], "Component: api | Severity: 3");
    }

    #[tokio::test]
    async fn test_fetch_logs_missing_file_is_error() {
        let source = FileLogSource::new("/nonexistent/alerts/logs.txt");
        let result = source.fetch_logs().await;
        assert!(matches!(result, Err(SourceError::IoError(_))));
    }
}
