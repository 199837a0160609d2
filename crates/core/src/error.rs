use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum QcError {
    #[error(
        "malformed manifest {path}{}: {reason}",
        line.map(|l| format!(" (line {l})")).unwrap_or_default(),
        path = path.display()
    )]
    MalformedManifest {
        path: PathBuf,
        line: Option<usize>,
        reason: String,
    },
    #[error("missing FASTQ for sample {sample}: {path}", path = path.display())]
    MissingInputFile { sample: String, path: PathBuf },
    #[error(
        "{stage} failed for sample {sample} ({})",
        exit_description(*exit_code)
    )]
    StageFailure {
        sample: String,
        stage: String,
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("summary generation failed ({})", exit_description(*exit_code))]
    SummaryGeneration {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("tool '{tool}' not found: '{command}' (fix PATH or tools.{tool} in the config)")]
    ToolNotFound { tool: String, command: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read config file {path}: {source}", path = path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config YAML: {0}")]
    ConfigParse(serde_yaml::Error),

    #[error("invalid invocation: {0}")]
    InvalidInvocation(String),
    #[error("failed to spawn {program}: {source}", program = program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize run summary: {0}")]
    ReportSerialization(serde_json::Error),
    #[error("worker task failed: {0}")]
    TaskJoin(String),
}

impl QcError {
    /// Wraps an I/O error together with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        QcError::Io {
            path: path.into(),
            source,
        }
    }

    /// Captured tool output, for the failures that carry one.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            QcError::StageFailure { diagnostic, .. }
            | QcError::SummaryGeneration { diagnostic, .. } => Some(diagnostic),
            _ => None,
        }
    }
}

fn exit_description(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal or not started".to_string(),
    }
}

pub type QcResult<T> = std::result::Result<T, QcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_manifest_message_includes_line() {
        let err = QcError::MalformedManifest {
            path: PathBuf::from("samples.tsv"),
            line: Some(3),
            reason: "expected 3 fields, found 2".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed manifest samples.tsv (line 3): expected 3 fields, found 2"
        );
    }

    #[test]
    fn test_stage_failure_message_and_diagnostic() {
        let err = QcError::StageFailure {
            sample: "S1".into(),
            stage: "trim_fastp".into(),
            exit_code: Some(255),
            diagnostic: "ERROR: sequence and quality have different length".into(),
        };
        assert_eq!(
            err.to_string(),
            "trim_fastp failed for sample S1 (exit code 255)"
        );
        assert_eq!(
            err.diagnostic(),
            Some("ERROR: sequence and quality have different length")
        );
    }

    #[test]
    fn test_summary_failure_without_exit_code() {
        let err = QcError::SummaryGeneration {
            exit_code: None,
            diagnostic: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }
}
