//! Captured failure of a wrapped child command.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Everything the pipeline needs to know about one failed run. Immutable
/// after construction; each field is captured at the moment the child exits.
#[derive(Debug, Clone)]
pub struct CrashReport {
    stderr: String,
    exit_code: i32,
    command: String,
    timestamp: DateTime<Utc>,
    working_directory: PathBuf,
}

impl CrashReport {
    pub fn new(
        stderr: String,
        exit_code: i32,
        command: String,
        working_directory: PathBuf,
    ) -> Self {
        Self {
            stderr,
            exit_code,
            command,
            timestamp: Utc::now(),
            working_directory,
        }
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_holds_capture() {
        let report = CrashReport::new(
            "boom".to_string(),
            1,
            "python app.py".to_string(),
            PathBuf::from("/tmp"),
        );
        assert_eq!(report.stderr(), "boom");
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.command(), "python app.py");
        assert_eq!(report.working_directory(), Path::new("/tmp"));
    }
}
