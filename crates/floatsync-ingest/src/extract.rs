//! Binding to the external record extractor.
//!
//! Decoding the scientific file format is not done in-process. The pipeline
//! hands a fully staged local path to a [`RecordExtractor`] and receives a
//! typed [`RecordSet`]. The extractor never performs network I/O.

use crate::records::RecordSet;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// What a staged file contains, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Profile,
    Metadata,
    Technical,
    Trajectory,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Profile => "profile",
            SourceKind::Metadata => "metadata",
            SourceKind::Technical => "technical",
            SourceKind::Trajectory => "trajectory",
        }
    }

    /// `4903220_meta.nc`, `4903220_tech.nc` and `*traj.nc` are sibling
    /// files; everything else is a cycle profile.
    pub fn from_file_name(name: &str) -> Self {
        let stem = name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(name)
            .to_ascii_lowercase();
        if stem.ends_with("_meta") {
            SourceKind::Metadata
        } else if stem.ends_with("_tech") {
            SourceKind::Technical
        } else if stem.ends_with("traj") {
            SourceKind::Trajectory
        } else {
            SourceKind::Profile
        }
    }

    pub fn from_path(path: &Path) -> Self {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(Self::from_file_name)
            .unwrap_or(SourceKind::Profile)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("extractor command failed: {0}")]
    Command(String),

    #[error("extractor output is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("extracted records are invalid: {0}")]
    Invalid(String),

    #[error("expected {expected} records, extractor returned {actual}")]
    UnexpectedKind {
        expected: SourceKind,
        actual: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait RecordExtractor: Send + Sync {
    async fn extract(&self, kind: SourceKind, path: &Path) -> Result<RecordSet, ExtractError>;
}

/// Runs `<program> [args..] <kind> <path>` and reads a JSON `RecordSet`
/// from its stdout.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    /// `command` is split on whitespace; the first word is the program.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace();
        let program = PathBuf::from(words.next()?);
        Some(Self {
            program,
            args: words.map(str::to_string).collect(),
        })
    }
}

#[async_trait]
impl RecordExtractor for CommandExtractor {
    async fn extract(&self, kind: SourceKind, path: &Path) -> Result<RecordSet, ExtractError> {
        debug!(program = %self.program.display(), kind = %kind, path = %path.display(), "Running extractor");

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(kind.as_str())
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Command(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let records: RecordSet = serde_json::from_slice(&output.stdout)?;
        check_kind(kind, &records)?;
        records.validate().map_err(ExtractError::Invalid)?;
        Ok(records)
    }
}

/// Reject a record set whose variant does not match the requested kind.
pub fn check_kind(kind: SourceKind, records: &RecordSet) -> Result<(), ExtractError> {
    let actual = match records {
        RecordSet::Profile(_) => SourceKind::Profile,
        RecordSet::Metadata(_) => SourceKind::Metadata,
        RecordSet::Technical { .. } => SourceKind::Technical,
        RecordSet::Trajectory { .. } => SourceKind::Trajectory,
    };
    if actual != kind {
        return Err(ExtractError::UnexpectedKind {
            expected: kind,
            actual: actual.as_str(),
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_file_name() {
        assert_eq!(SourceKind::from_file_name("4903220_meta.nc"), SourceKind::Metadata);
        assert_eq!(SourceKind::from_file_name("4903220_tech.nc"), SourceKind::Technical);
        assert_eq!(SourceKind::from_file_name("4903220_Dtraj.nc"), SourceKind::Trajectory);
        assert_eq!(SourceKind::from_file_name("4903220_Rtraj.NC"), SourceKind::Trajectory);
        assert_eq!(SourceKind::from_file_name("SD4903220_012.nc"), SourceKind::Profile);
    }

    #[test]
    fn test_from_command_line() {
        let ex = CommandExtractor::from_command_line("python3 -m argo_extract").unwrap();
        assert_eq!(ex.program, PathBuf::from("python3"));
        assert_eq!(ex.args, vec!["-m", "argo_extract"]);
        assert!(CommandExtractor::from_command_line("   ").is_none());
    }

    #[test]
    fn test_check_kind() {
        let set = RecordSet::Technical { records: vec![] };
        assert!(check_kind(SourceKind::Technical, &set).is_ok());
        assert!(check_kind(SourceKind::Profile, &set).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_reads_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("extract.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"kind\":\"trajectory\",\"records\":[{\"cycle\":1,\"latitude\":12.0}]}'\n",
        )
        .unwrap();
        let ex = CommandExtractor {
            program: PathBuf::from("sh"),
            args: vec![script.display().to_string()],
        };

        let set = ex
            .extract(SourceKind::Trajectory, Path::new("/tmp/x_Rtraj.nc"))
            .await
            .unwrap();
        assert_eq!(set.row_count(), 1);

        let err = ex
            .extract(SourceKind::Profile, Path::new("/tmp/R1_001.nc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnexpectedKind { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_non_zero_exit() {
        let ex = CommandExtractor {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), "echo broken >&2; exit 3".into()],
        };
        let err = ex
            .extract(SourceKind::Profile, Path::new("/tmp/R1_001.nc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Command(ref m) if m.contains("broken")));
    }
}
