//! Run-level aggregation.
//!
//! The [`Aggregator`] runs once, after every sample has reached a terminal result. It invokes
//! MultiQC over the per-sample output tree and writes the markdown and JSON run reports. A
//! failing summary tool is recorded as a `SummaryGeneration` error in the report; it never
//! changes the per-sample results that were handed in.

use crate::config::{RunConfig, StageToggles};
use crate::constants::{
    MULTIQC_REPORT_FILENAME, REPORT_FILENAME, SUMMARY_DIR_NAME, SUMMARY_JSON_FILENAME,
};
use crate::invocation::{Executor, Invocation};
use crate::markdown::ReportRenderer;
use crate::runner::{file_ok, samples_root, write_stage_log, SampleResult, StageStatus};
use crate::tools::ToolVersions;
use crate::{QcError, QcResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of the run-level summary tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryOutcome {
    #[serde(flatten)]
    pub status: StageStatus,
    pub command: Option<String>,
    pub report: PathBuf,
}

/// Everything known about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub output_root: PathBuf,
    pub dry_run: bool,
    pub stages_enabled: StageToggles,
    pub tool_versions: ToolVersions,
    /// Per-sample results, in manifest order.
    pub samples: Vec<SampleResult>,
    pub summary: SummaryOutcome,
    pub markdown_report: PathBuf,
    pub json_report: PathBuf,
}

impl RunReport {
    pub fn failed_samples(&self) -> impl Iterator<Item = &SampleResult> {
        self.samples.iter().filter(|s| !s.is_success())
    }

    pub fn summary_failed(&self) -> bool {
        matches!(self.summary.status, StageStatus::Failed { .. })
    }

    /// True when any stage of any sample, or the summary tool, failed.
    pub fn has_failures(&self) -> bool {
        self.failed_samples().next().is_some() || self.summary_failed()
    }
}

/// Runs the summary tool and writes the run reports.
#[derive(Clone)]
pub struct Aggregator {
    config: Arc<RunConfig>,
    executor: Arc<dyn Executor>,
}

impl Aggregator {
    pub fn new(config: Arc<RunConfig>, executor: Arc<dyn Executor>) -> Self {
        Self { config, executor }
    }

    pub fn summary_dir(&self) -> PathBuf {
        self.config.output_root().join(SUMMARY_DIR_NAME)
    }

    /// The single MultiQC invocation over every sample directory.
    pub fn summary_invocation(&self) -> Invocation {
        Invocation::new(&self.config.tools().multiqc)
            .arg(samples_root(self.config.output_root()))
            .arg("--outdir")
            .arg(self.summary_dir())
            .arg("--force")
    }

    /// Aggregates terminal sample results into the run report.
    ///
    /// `samples` must hold the terminal result of every sample of the run.
    ///
    /// # Errors
    ///
    /// Returns `QcError::Io` or `QcError::ReportSerialization` if the reports cannot be written.
    /// Summary tool failures are recorded in the returned report instead.
    pub async fn aggregate(
        &self,
        samples: Vec<SampleResult>,
        tool_versions: ToolVersions,
    ) -> QcResult<RunReport> {
        let summary = self.summarise(&samples).await;
        let output_root = self.config.output_root();

        let report = RunReport {
            generated_at: Utc::now(),
            output_root: output_root.to_path_buf(),
            dry_run: self.config.dry_run(),
            stages_enabled: self.config.stages(),
            tool_versions,
            samples,
            summary,
            markdown_report: output_root.join(REPORT_FILENAME),
            json_report: output_root.join(SUMMARY_JSON_FILENAME),
        };

        let markdown = ReportRenderer::new().render(&report);
        fs::write(&report.markdown_report, markdown)
            .map_err(|e| QcError::io(&report.markdown_report, e))?;

        let json = serde_json::to_string_pretty(&report).map_err(QcError::ReportSerialization)?;
        fs::write(&report.json_report, json).map_err(|e| QcError::io(&report.json_report, e))?;

        tracing::info!("report written to {}", report.markdown_report.display());
        Ok(report)
    }

    async fn summarise(&self, samples: &[SampleResult]) -> SummaryOutcome {
        let report = self.summary_dir().join(MULTIQC_REPORT_FILENAME);
        let skipped = |reason: &str| SummaryOutcome {
            status: StageStatus::skipped(reason),
            command: None,
            report: report.clone(),
        };

        if !self.config.stages().multiqc {
            return skipped("disabled");
        }

        let invocation = self.summary_invocation();
        let command = invocation.command_line();
        let outcome = |status: StageStatus| SummaryOutcome {
            status,
            command: Some(command.clone()),
            report: report.clone(),
        };

        let anything_ran = samples.iter().any(|s| {
            s.stages
                .iter()
                .any(|o| o.status == StageStatus::Succeeded)
        });
        if self.config.resume() && !anything_ran && file_ok(&report) {
            tracing::info!("summary report exists and no stage ran, skipping");
            return outcome(StageStatus::skipped("report exists"));
        }

        if let Err(e) = fs::create_dir_all(self.summary_dir()) {
            let error = QcError::io(self.summary_dir(), e);
            tracing::error!("{}", error);
            return outcome(StageStatus::Failed {
                error: error.to_string(),
                exit_code: None,
                diagnostic: String::new(),
            });
        }
        let log = self.summary_dir().join("multiqc_run.log");

        if self.config.dry_run() {
            tracing::info!("summary (dry run): {}", command);
            write_stage_log(&log, &command, None);
            return outcome(StageStatus::skipped("dry run"));
        }

        tracing::info!("summary started over {} samples", samples.len());
        match self.run_summary_tool(&invocation, &log).await {
            Ok(()) => {
                tracing::info!("summary finished: {}", report.display());
                outcome(StageStatus::Succeeded)
            }
            Err(error) => {
                tracing::error!("{}", error);
                let (exit_code, diagnostic) = match &error {
                    QcError::SummaryGeneration {
                        exit_code,
                        diagnostic,
                    } => (*exit_code, diagnostic.clone()),
                    other => (None, other.to_string()),
                };
                outcome(StageStatus::Failed {
                    error: error.to_string(),
                    exit_code,
                    diagnostic,
                })
            }
        }
    }

    /// Runs MultiQC once.
    ///
    /// # Errors
    ///
    /// Returns `QcError::SummaryGeneration` if the tool cannot be started or exits non-zero.
    async fn run_summary_tool(&self, invocation: &Invocation, log: &Path) -> QcResult<()> {
        let command = invocation.command_line();
        let output = self.executor.execute(invocation).await.map_err(|e| {
            QcError::SummaryGeneration {
                exit_code: None,
                diagnostic: e.to_string(),
            }
        })?;
        write_stage_log(log, &command, Some(&output));

        if output.success() {
            Ok(())
        } else {
            Err(QcError::SummaryGeneration {
                exit_code: output.exit_code,
                diagnostic: output.combined(),
            })
        }
    }
}
