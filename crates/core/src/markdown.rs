//! Markdown rendering of the run report.
//!
//! Builds `QC_REPORT.md` from a [`RunReport`]. Free text that ends up in the report (skip
//! reasons, tool versions, captured tool output) is escaped so that it cannot break the table
//! layout or close a code block early. Artifact links are written relative to the output root,
//! where the report itself lives, so the output tree can be moved as a whole.

use crate::aggregator::RunReport;
use crate::constants::{LOGS_DIR_NAME, REPORT_DIAGNOSTIC_TAIL_LINES};
use crate::runner::{SampleResult, Stage, StageStatus};
use std::fmt::Write;
use std::path::Path;

/// Report header used for all runs.
const REPORT_HEADER: &str = "# RNA-seq QC Report";

/// Renders run reports.
#[derive(Debug, Clone)]
pub struct ReportRenderer;

impl ReportRenderer {
    /// Creates a new `ReportRenderer` instance.
    pub fn new() -> Self {
        Self
    }

    /// Renders the complete markdown report.
    ///
    /// Sections, in order: run metadata, tool versions, enabled stages, per-sample status
    /// table, summary tool outcome, totals, and failures with their captured diagnostics.
    pub fn render(&self, report: &RunReport) -> String {
        let mut out = String::new();
        let root = report.output_root.as_path();

        // Writing to a String cannot fail.
        let _ = writeln!(out, "{REPORT_HEADER}\n");
        let _ = writeln!(
            out,
            "- Generated: {}",
            report
                .generated_at
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );
        let _ = writeln!(out, "- Samples: {}", report.samples.len());
        let _ = writeln!(out, "- Output: `{}`", report.output_root.display());
        if report.dry_run {
            let _ = writeln!(out, "- Mode: dry run (no commands executed)");
        }

        if !report.tool_versions.is_empty() {
            let _ = writeln!(out, "\n## Tool Versions\n");
            for v in &report.tool_versions {
                let _ = writeln!(out, "- **{}**: {}", v.tool, self.escape_inline(&v.version));
            }
        }

        let _ = writeln!(out, "\n## Stages Enabled\n");
        let toggles = report.stages_enabled;
        for stage in Stage::ALL {
            let _ = writeln!(out, "- {}: {}", stage, toggles.is_enabled(stage));
        }
        let _ = writeln!(out, "- multiqc: {}", toggles.multiqc);

        let _ = writeln!(out, "\n## Samples\n");
        let _ = writeln!(
            out,
            "| Sample | {} | Artifacts |",
            Stage::ALL.map(Stage::name).join(" | ")
        );
        let _ = writeln!(out, "|---|{}---|", "---|".repeat(Stage::ALL.len()));
        for sample in &report.samples {
            self.sample_row(&mut out, root, sample);
        }

        let _ = writeln!(out, "\n## Summary Report\n");
        let summary_link = self.link(root, &report.summary.report, "multiqc_report.html");
        match &report.summary.status {
            StageStatus::Succeeded => {
                let _ = writeln!(out, "- MultiQC: OK, {summary_link}");
            }
            StageStatus::Skipped { reason } => {
                let _ = writeln!(out, "- MultiQC: skipped ({})", self.escape_inline(reason));
            }
            StageStatus::Failed {
                error, diagnostic, ..
            } => {
                let _ = writeln!(out, "- MultiQC: **FAILED**: {}", self.escape_inline(error));
                if !diagnostic.trim().is_empty() {
                    let _ = writeln!(out, "\n{}", self.code_block(&self.tail(diagnostic)));
                }
            }
        }

        let failed = report.failed_samples().count();
        let skipped_stages = report
            .samples
            .iter()
            .flat_map(|s| &s.stages)
            .filter(|o| matches!(o.status, StageStatus::Skipped { .. }))
            .count();
        let _ = writeln!(out, "\n## Run Summary\n");
        let _ = writeln!(out, "- Samples OK: {}", report.samples.len() - failed);
        let _ = writeln!(out, "- Samples failed: {failed}");
        let _ = writeln!(out, "- Stages skipped: {skipped_stages}");

        if failed > 0 {
            let _ = writeln!(out, "\n## Failures\n");
            for sample in report.failed_samples() {
                for outcome in sample.failed_stages() {
                    let StageStatus::Failed {
                        error, diagnostic, ..
                    } = &outcome.status
                    else {
                        continue;
                    };
                    let _ = writeln!(
                        out,
                        "### {} / {}\n",
                        self.escape_inline(sample.sample.as_str()),
                        outcome.stage
                    );
                    let _ = writeln!(out, "{}\n", self.escape_inline(error));
                    if let Some(log) = &outcome.log {
                        let _ = writeln!(out, "Log: {}\n", self.link(root, log, "log"));
                    }
                    if !diagnostic.trim().is_empty() {
                        let _ = writeln!(out, "{}\n", self.code_block(&self.tail(diagnostic)));
                    }
                }
            }
        }

        let _ = writeln!(out, "\n## Interpretation Notes\n");
        let _ = writeln!(out, "- Open {summary_link} and scan for outliers.");
        let _ = writeln!(
            out,
            "- If trimming removes a large fraction of reads, investigate adapter or quality issues."
        );
        let _ = writeln!(
            out,
            "- If one sample is a severe outlier across metrics, confirm sample identity and check for contamination."
        );

        out.truncate(out.trim_end().len());
        out.push('\n');
        out
    }

    fn sample_row(&self, out: &mut String, root: &Path, sample: &SampleResult) {
        let cells: Vec<String> = Stage::ALL
            .into_iter()
            .map(|stage| match sample.stage(stage).map(|o| &o.status) {
                Some(StageStatus::Succeeded) => "OK".to_string(),
                Some(StageStatus::Skipped { reason }) => {
                    format!("SKIP ({})", self.escape_cell(reason))
                }
                Some(StageStatus::Failed { .. }) => "**FAIL**".to_string(),
                None => "-".to_string(),
            })
            .collect();

        let artifacts = [
            (Stage::FastqcRaw.dir_name(), "raw QC"),
            (Stage::TrimFastp.dir_name(), "trim"),
            (Stage::FastqcTrimmed.dir_name(), "trimmed QC"),
            (LOGS_DIR_NAME, "logs"),
        ]
        .iter()
        .map(|(dir, label)| self.link(root, &sample.sample_dir.join(dir), label))
        .collect::<Vec<_>>()
        .join(" · ");

        let _ = writeln!(
            out,
            "| {} | {} | {} |",
            self.escape_cell(sample.sample.as_str()),
            cells.join(" | "),
            artifacts
        );
    }
}

// Helper methods for escaping and linking
impl ReportRenderer {
    /// Markdown link to `path`, relative to the report directory when possible.
    fn link(&self, root: &Path, path: &Path, label: &str) -> String {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let target = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().replace(' ', "%20"))
            .collect::<Vec<_>>()
            .join("/");
        format!("[{label}]({target})")
    }

    /// Escapes text for use inside a table cell.
    fn escape_cell(&self, text: &str) -> String {
        self.escape_inline(text).replace('|', r"\|")
    }

    /// Collapses text to one line and escapes characters with inline markdown meaning.
    fn escape_inline(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        for ch in text.split_whitespace().collect::<Vec<_>>().join(" ").chars() {
            if matches!(ch, '\\' | '`' | '*' | '_' | '[' | ']' | '<' | '>' | '#') {
                result.push('\\');
            }
            result.push(ch);
        }
        result
    }

    /// Last lines of captured tool output.
    fn tail(&self, text: &str) -> String {
        let lines: Vec<&str> = text.trim_end().lines().collect();
        let start = lines.len().saturating_sub(REPORT_DIAGNOSTIC_TAIL_LINES);
        let mut tail = lines[start..].join("\n");
        if start > 0 {
            tail = format!("[... {start} earlier lines omitted]\n{tail}");
        }
        tail
    }

    /// Fenced code block whose fence is longer than any backtick run in `text`.
    fn code_block(&self, text: &str) -> String {
        let longest_run = text
            .split(|c| c != '`')
            .map(str::len)
            .max()
            .unwrap_or(0);
        let fence = "`".repeat(longest_run.max(2) + 1);
        format!("{fence}text\n{text}\n{fence}")
    }
}

impl Default for ReportRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SummaryOutcome;
    use crate::config::StageToggles;
    use crate::runner::StageOutcome;
    use crate::tools::ToolVersion;
    use chrono::{DateTime, Utc};
    use seqqc_types::SampleId;
    use std::path::PathBuf;

    fn outcome(stage: Stage, status: StageStatus) -> StageOutcome {
        StageOutcome {
            stage,
            status,
            command: None,
            log: Some(PathBuf::from(format!("/out/samples/S2/logs/{stage}.log"))),
            outputs: Vec::new(),
        }
    }

    fn sample(id: &str, statuses: [StageStatus; 3]) -> SampleResult {
        SampleResult {
            sample: SampleId::parse(id).unwrap(),
            sample_dir: PathBuf::from("/out/samples").join(id),
            stages: Stage::ALL
                .into_iter()
                .zip(statuses)
                .map(|(stage, status)| outcome(stage, status))
                .collect(),
        }
    }

    fn report(samples: Vec<SampleResult>, summary: StageStatus) -> RunReport {
        RunReport {
            generated_at: DateTime::parse_from_rfc3339("2026-01-22T10:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            output_root: PathBuf::from("/out"),
            dry_run: false,
            stages_enabled: StageToggles::default(),
            tool_versions: vec![ToolVersion {
                tool: "fastp".into(),
                version: "fastp 0.23.4".into(),
            }],
            samples,
            summary: SummaryOutcome {
                status: summary,
                command: None,
                report: PathBuf::from("/out/multiqc/multiqc_report.html"),
            },
            markdown_report: PathBuf::from("/out/QC_REPORT.md"),
            json_report: PathBuf::from("/out/qc_summary.json"),
        }
    }

    fn ok() -> [StageStatus; 3] {
        [
            StageStatus::Succeeded,
            StageStatus::Succeeded,
            StageStatus::Succeeded,
        ]
    }

    #[test]
    fn test_render_all_ok() {
        let rendered = ReportRenderer::new().render(&report(
            vec![sample("S1", ok())],
            StageStatus::Succeeded,
        ));

        assert!(rendered.starts_with("# RNA-seq QC Report\n\n- Generated: 2026-01-22T10:30:00Z\n"));
        assert!(rendered.contains("- **fastp**: fastp 0.23.4"));
        assert!(rendered.contains("| Sample | fastqc_raw | trim_fastp | fastqc_trimmed | Artifacts |"));
        assert!(rendered.contains("| S1 | OK | OK | OK | [raw QC](samples/S1/01_fastqc_raw)"));
        assert!(rendered.contains("- MultiQC: OK, [multiqc_report.html](multiqc/multiqc_report.html)"));
        assert!(rendered.contains("- Samples failed: 0"));
        assert!(!rendered.contains("## Failures"));
        assert!(rendered.contains(
            "## Interpretation Notes\n\n- Open [multiqc_report.html](multiqc/multiqc_report.html) and scan for outliers."
        ));
        assert!(rendered.trim_end().ends_with("check for contamination."));
        assert!(rendered.ends_with('\n') && !rendered.ends_with("\n\n"));
    }

    #[test]
    fn test_render_failure_section() {
        let failed = StageStatus::Failed {
            error: "trim_fastp failed for sample S2 (exit code 255)".into(),
            exit_code: Some(255),
            diagnostic: "reading input\nERROR: igzip: encountered while decompressing".into(),
        };
        let rendered = ReportRenderer::new().render(&report(
            vec![
                sample("S1", ok()),
                sample(
                    "S2",
                    [
                        StageStatus::Succeeded,
                        failed,
                        StageStatus::skipped("upstream stage failed"),
                    ],
                ),
            ],
            StageStatus::Succeeded,
        ));

        assert!(rendered.contains("| S1 | OK | OK | OK |"));
        assert!(rendered.contains("| S2 | OK | **FAIL** | SKIP (upstream stage failed) |"));
        assert!(rendered.contains("- Samples OK: 1"));
        assert!(rendered.contains("- Samples failed: 1"));
        assert!(rendered.contains("### S2 / trim_fastp"));
        assert!(rendered.contains("trim\\_fastp failed for sample S2 (exit code 255)"));
        assert!(rendered.contains("Log: [log](samples/S2/logs/trim_fastp.log)"));
        assert!(rendered.contains("```text\nreading input\nERROR: igzip"));
    }

    #[test]
    fn test_render_summary_failure() {
        let rendered = ReportRenderer::new().render(&report(
            vec![sample("S1", ok())],
            StageStatus::Failed {
                error: "summary generation failed (exit code 1)".into(),
                exit_code: Some(1),
                diagnostic: "No analysis results found".into(),
            },
        ));
        assert!(rendered.contains("- MultiQC: **FAILED**: summary generation failed (exit code 1)"));
        assert!(rendered.contains("No analysis results found"));
        assert!(rendered.contains("- Samples failed: 0"));
    }

    #[test]
    fn test_render_escapes_sample_ids() {
        let rendered = ReportRenderer::new().render(&report(
            vec![sample("ctrl|1 *a*", ok())],
            StageStatus::Succeeded,
        ));
        assert!(rendered.contains(r"| ctrl\|1 \*a\* | OK | OK | OK |"));
    }

    #[test]
    fn test_escape_cell() {
        let renderer = ReportRenderer::new();
        assert_eq!(renderer.escape_cell("a|b\n*c*"), r"a\|b \*c\*");
    }

    #[test]
    fn test_code_block_fence_outgrows_content() {
        let renderer = ReportRenderer::new();
        let block = renderer.code_block("before ``` after");
        assert!(block.starts_with("````text\n"));
        assert!(block.ends_with("\n````"));
    }

    #[test]
    fn test_tail_truncates_long_output() {
        let renderer = ReportRenderer::new();
        let text = (1..=30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = renderer.tail(&text);
        assert!(tail.starts_with("[... 10 earlier lines omitted]\nline 11\n"));
        assert!(tail.ends_with("line 30"));
    }

    #[test]
    fn test_link_outside_root_kept_as_is() {
        let renderer = ReportRenderer::new();
        assert_eq!(
            renderer.link(Path::new("/out"), Path::new("samples/S1/logs"), "logs"),
            "[logs](samples/S1/logs)"
        );
    }
}
