use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;

/// How a migration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// What a finished migration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub outcome: Outcome,
    /// Records written to the archive.
    pub backed_up: u64,
    /// Records written to the destination device.
    pub restored: u64,
    /// Databases abandoned part-way through the restore.
    pub skipped_databases: Vec<String>,
    /// The archive, if the backup completed.
    pub archive_path: Option<PathBuf>,
}

impl MigrationReport {
    pub(crate) fn new() -> Self {
        Self {
            outcome: Outcome::Cancelled,
            backed_up: 0,
            restored: 0,
            skipped_databases: Vec::new(),
            archive_path: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == Outcome::Completed
    }

    /// One-line, user-facing description of the outcome.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Completed if self.skipped_databases.is_empty() => "completed".to_string(),
            Outcome::Completed => {
                format!("completed with skipped databases: {}", self.skipped_databases.join(", "))
            },
            Outcome::Cancelled => "cancelled by user".to_string(),
            Outcome::Failed(reason) => format!("failed: {reason}"),
        }
    }
}

impl Display for MigrationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Outcome::Completed, vec![], "completed")]
    #[case(Outcome::Completed, vec!["Memos", "Tasks"], "completed with skipped databases: Memos, Tasks")]
    #[case(Outcome::Cancelled, vec!["Memos"], "cancelled by user")]
    #[case(Outcome::Failed("device error: link dropped".into()), vec![], "failed: device error: link dropped")]
    fn test_summary(#[case] outcome: Outcome, #[case] skipped: Vec<&str>, #[case] expected: &str) {
        let report = MigrationReport {
            outcome,
            skipped_databases: skipped.into_iter().map(String::from).collect(),
            ..MigrationReport::new()
        };
        assert_eq!(report.summary(), expected);
        assert_eq!(report.to_string(), expected);
    }
}
