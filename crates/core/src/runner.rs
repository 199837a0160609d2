//! Per-sample QC and trimming.
//!
//! A [`SampleRunner`] takes one sample through three stages, in order:
//!
//! 1. [`Stage::FastqcRaw`]: FastQC over the raw read pair
//! 2. [`Stage::TrimFastp`]: fastp producing a trimmed pair plus HTML/JSON reports
//! 3. [`Stage::FastqcTrimmed`]: FastQC over the trimmed pair
//!
//! Everything a sample produces lives under `<output_root>/samples/<sample>/`, so concurrent
//! runners never write the same path. A failing stage is recorded in the sample's
//! [`SampleResult`] and the remaining stages of that sample are skipped; the runner itself never
//! returns an error, so one sample cannot abort its siblings.

use crate::config::RunConfig;
use crate::constants::{
    FASTQC_RAW_DIR_NAME, FASTQC_TRIMMED_DIR_NAME, LOGS_DIR_NAME, SAMPLES_DIR_NAME, TRIM_DIR_NAME,
};
use crate::invocation::{Executor, Invocation, InvocationOutput};
use crate::manifest::Sample;
use crate::QcError;
use seqqc_types::SampleId;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One external-tool step applied to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FastqcRaw,
    TrimFastp,
    FastqcTrimmed,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::FastqcRaw, Stage::TrimFastp, Stage::FastqcTrimmed];

    pub fn name(self) -> &'static str {
        match self {
            Stage::FastqcRaw => "fastqc_raw",
            Stage::TrimFastp => "trim_fastp",
            Stage::FastqcTrimmed => "fastqc_trimmed",
        }
    }

    /// Directory, relative to the sample directory, holding this stage's output.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::FastqcRaw => FASTQC_RAW_DIR_NAME,
            Stage::TrimFastp => TRIM_DIR_NAME,
            Stage::FastqcTrimmed => FASTQC_TRIMMED_DIR_NAME,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal status of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Skipped {
        reason: String,
    },
    Failed {
        error: String,
        exit_code: Option<i32>,
        diagnostic: String,
    },
}

impl StageStatus {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageStatus::Skipped {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StageStatus::Succeeded => "OK",
            StageStatus::Skipped { .. } => "SKIP",
            StageStatus::Failed { .. } => "FAIL",
        }
    }
}

/// What happened to one stage of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
    /// Rendered command line, when the stage got as far as building one.
    pub command: Option<String>,
    /// Log file holding the command and its captured output.
    pub log: Option<PathBuf>,
    /// Report and data files the stage produces.
    pub outputs: Vec<PathBuf>,
}

impl StageOutcome {
    fn skipped(stage: Stage, reason: &str) -> Self {
        Self {
            stage,
            status: StageStatus::skipped(reason),
            command: None,
            log: None,
            outputs: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, StageStatus::Failed { .. })
    }
}

/// Terminal result of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleResult {
    pub sample: SampleId,
    pub sample_dir: PathBuf,
    pub stages: Vec<StageOutcome>,
}

impl SampleResult {
    /// True when no stage failed.
    pub fn is_success(&self) -> bool {
        !self.stages.iter().any(StageOutcome::is_failed)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|s| s.is_failed())
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Output paths of one sample.
#[derive(Debug, Clone)]
pub struct SampleLayout {
    id: SampleId,
    root: PathBuf,
}

impl SampleLayout {
    pub fn new(output_root: &Path, id: &SampleId) -> Self {
        Self {
            id: id.clone(),
            root: samples_root(output_root).join(id.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR_NAME)
    }

    pub fn log_path(&self, stage: Stage) -> PathBuf {
        self.logs_dir().join(format!("{}.log", stage.name()))
    }

    pub fn trimmed_reads(&self) -> (PathBuf, PathBuf) {
        let dir = self.stage_dir(Stage::TrimFastp);
        (
            dir.join(format!("{}_R1.trim.fq.gz", self.id)),
            dir.join(format!("{}_R2.trim.fq.gz", self.id)),
        )
    }

    pub fn fastp_json(&self) -> PathBuf {
        self.stage_dir(Stage::TrimFastp)
            .join(format!("{}.fastp.json", self.id))
    }

    pub fn fastp_html(&self) -> PathBuf {
        self.stage_dir(Stage::TrimFastp)
            .join(format!("{}.fastp.html", self.id))
    }

    /// Creates the sample directory tree. Existing directories are left as they are.
    pub fn create(&self) -> std::io::Result<()> {
        for stage in Stage::ALL {
            fs::create_dir_all(self.stage_dir(stage))?;
        }
        fs::create_dir_all(self.logs_dir())
    }
}

/// Directory holding every sample directory.
pub fn samples_root(output_root: &Path) -> PathBuf {
    output_root.join(SAMPLES_DIR_NAME)
}

/// The name FastQC derives from an input file: compression and FASTQ suffixes removed.
pub fn fastqc_stem(reads: &Path) -> String {
    let name = reads
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = [".gz", ".bz2"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(&name);
    [".fastq", ".fq"]
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
        .unwrap_or(name)
        .to_string()
}

/// HTML and zip reports FastQC writes into `outdir` for `reads`.
pub fn fastqc_outputs(reads: &Path, outdir: &Path) -> [PathBuf; 2] {
    let stem = fastqc_stem(reads);
    [
        outdir.join(format!("{stem}_fastqc.html")),
        outdir.join(format!("{stem}_fastqc.zip")),
    ]
}

/// True if `path` is a non-empty regular file.
pub(crate) fn file_ok(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Runs the stages of one sample.
#[derive(Clone)]
pub struct SampleRunner {
    config: Arc<RunConfig>,
    executor: Arc<dyn Executor>,
}

impl SampleRunner {
    pub fn new(config: Arc<RunConfig>, executor: Arc<dyn Executor>) -> Self {
        Self { config, executor }
    }

    /// Builds the invocation and expected outputs of `stage` for `sample`.
    pub fn stage_invocation(
        &self,
        sample: &Sample,
        layout: &SampleLayout,
        stage: Stage,
    ) -> (Invocation, Vec<PathBuf>) {
        let threads = self.config.threads().to_string();
        let tools = self.config.tools();

        match stage {
            Stage::FastqcRaw | Stage::FastqcTrimmed => {
                let (r1, r2) = match stage {
                    Stage::FastqcRaw => (sample.fq1.clone(), sample.fq2.clone()),
                    _ => layout.trimmed_reads(),
                };
                let outdir = layout.stage_dir(stage);
                let mut outputs = fastqc_outputs(&r1, &outdir).to_vec();
                outputs.extend(fastqc_outputs(&r2, &outdir));

                let invocation = Invocation::new(&tools.fastqc)
                    .arg("--threads")
                    .arg(&threads)
                    .arg("--outdir")
                    .arg(&outdir)
                    .arg(&r1)
                    .arg(&r2);
                (invocation, outputs)
            }
            Stage::TrimFastp => {
                let (trim1, trim2) = layout.trimmed_reads();
                let json = layout.fastp_json();
                let html = layout.fastp_html();

                let invocation = Invocation::new(&tools.fastp)
                    .arg("--in1")
                    .arg(&sample.fq1)
                    .arg("--in2")
                    .arg(&sample.fq2)
                    .arg("--out1")
                    .arg(&trim1)
                    .arg("--out2")
                    .arg(&trim2)
                    .arg("--json")
                    .arg(&json)
                    .arg("--html")
                    .arg(&html)
                    .arg("--thread")
                    .arg(&threads)
                    .args(self.config.fastp_extra_args());
                (invocation, vec![trim1, trim2, json, html])
            }
        }
    }

    /// Runs every stage of `sample` and returns its terminal result.
    pub async fn run(&self, sample: &Sample) -> SampleResult {
        let layout = SampleLayout::new(self.config.output_root(), &sample.id);
        let stages_enabled = self.config.stages();
        let mut stages = Vec::with_capacity(Stage::ALL.len());

        if let Err(e) = layout.create() {
            let error = QcError::io(layout.root(), e);
            tracing::warn!("[{}] cannot create output directory: {}", sample.id, error);
            for (i, stage) in Stage::ALL.into_iter().enumerate() {
                stages.push(if i == 0 {
                    StageOutcome {
                        stage,
                        status: StageStatus::Failed {
                            error: error.to_string(),
                            exit_code: None,
                            diagnostic: String::new(),
                        },
                        command: None,
                        log: None,
                        outputs: Vec::new(),
                    }
                } else {
                    StageOutcome::skipped(stage, "upstream stage failed")
                });
            }
            return SampleResult {
                sample: sample.id.clone(),
                sample_dir: layout.root().to_path_buf(),
                stages,
            };
        }

        let mut upstream_failed = false;
        for stage in Stage::ALL {
            let outcome = if upstream_failed {
                StageOutcome::skipped(stage, "upstream stage failed")
            } else if !stages_enabled.is_enabled(stage) {
                StageOutcome::skipped(stage, "disabled")
            } else if stage == Stage::FastqcTrimmed && !stages_enabled.trim_fastp {
                StageOutcome::skipped(stage, "no trimmed reads")
            } else {
                self.run_stage(sample, &layout, stage).await
            };

            upstream_failed |= outcome.is_failed();
            stages.push(outcome);
        }

        SampleResult {
            sample: sample.id.clone(),
            sample_dir: layout.root().to_path_buf(),
            stages,
        }
    }

    async fn run_stage(&self, sample: &Sample, layout: &SampleLayout, stage: Stage) -> StageOutcome {
        let (invocation, outputs) = self.stage_invocation(sample, layout, stage);
        let command = invocation.command_line();
        let log = layout.log_path(stage);

        let outcome = |status: StageStatus| StageOutcome {
            stage,
            status,
            command: Some(command.clone()),
            log: Some(log.clone()),
            outputs: outputs.clone(),
        };

        if self.config.resume() && outputs.iter().all(|p| file_ok(p)) {
            tracing::info!("[{}] {}: outputs exist, skipping", sample.id, stage);
            return outcome(StageStatus::skipped("outputs exist"));
        }

        if self.config.dry_run() {
            tracing::info!("[{}] {} (dry run): {}", sample.id, stage, command);
            write_stage_log(&log, &command, None);
            return outcome(StageStatus::skipped("dry run"));
        }

        tracing::info!("[{}] {} started", sample.id, stage);
        let status = match self.executor.execute(&invocation).await {
            Ok(output) => {
                write_stage_log(&log, &command, Some(&output));
                if output.success() {
                    tracing::info!("[{}] {} finished", sample.id, stage);
                    StageStatus::Succeeded
                } else {
                    let diagnostic = output.combined();
                    let error = QcError::StageFailure {
                        sample: sample.id.to_string(),
                        stage: stage.to_string(),
                        exit_code: output.exit_code,
                        diagnostic: diagnostic.clone(),
                    };
                    tracing::warn!("{}", error);
                    StageStatus::Failed {
                        error: error.to_string(),
                        exit_code: output.exit_code,
                        diagnostic,
                    }
                }
            }
            Err(e) => {
                let diagnostic = e.to_string();
                write_stage_log(
                    &log,
                    &command,
                    Some(&InvocationOutput {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: diagnostic.clone(),
                    }),
                );
                let error = QcError::StageFailure {
                    sample: sample.id.to_string(),
                    stage: stage.to_string(),
                    exit_code: None,
                    diagnostic: diagnostic.clone(),
                };
                tracing::warn!("{}: {}", error, diagnostic);
                StageStatus::Failed {
                    error: error.to_string(),
                    exit_code: None,
                    diagnostic,
                }
            }
        };

        outcome(status)
    }
}

/// Writes the command and its captured output to the stage log.
///
/// Log problems are reported but never turn a stage into a failure.
pub(crate) fn write_stage_log(path: &Path, command: &str, output: Option<&InvocationOutput>) {
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        writeln!(file, "$ {command}")?;
        match output {
            None => writeln!(file, "[dry run] command not executed")?,
            Some(output) => {
                match output.exit_code {
                    Some(code) => writeln!(file, "[exit code {code}]")?,
                    None => writeln!(file, "[no exit code]")?,
                }
                writeln!(file, "--- stdout ---")?;
                file.write_all(output.stdout.as_bytes())?;
                writeln!(file, "\n--- stderr ---")?;
                file.write_all(output.stderr.as_bytes())?;
            }
        }
        Ok(())
    })();

    if let Err(e) = result {
        tracing::warn!("failed to write log {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageToggles, ToolCommands};
    use crate::QcResult;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every invocation and fails fastp for the configured sample.
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<Invocation>>,
        fail_trim_for: Option<String>,
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn execute(&self, invocation: &Invocation) -> QcResult<InvocationOutput> {
            self.calls.lock().unwrap().push(invocation.clone());
            let is_fastp = invocation.program() == Path::new("fastp");
            let line = invocation.command_line();
            let fail = self
                .fail_trim_for
                .as_deref()
                .is_some_and(|s| is_fastp && line.contains(&format!("/{s}/")));
            if fail {
                Ok(InvocationOutput {
                    exit_code: Some(255),
                    stdout: String::new(),
                    stderr: "ERROR: igzip: encountered while decompressing file".into(),
                })
            } else {
                Ok(InvocationOutput {
                    exit_code: Some(0),
                    stdout: "Analysis complete".into(),
                    stderr: String::new(),
                })
            }
        }
    }

    fn config(root: &Path) -> RunConfig {
        RunConfig::new(
            root.to_path_buf(),
            1,
            2,
            ToolCommands::default(),
            StageToggles::default(),
        )
        .unwrap()
    }

    fn sample(temp: &Path, id: &str) -> Sample {
        Sample {
            id: SampleId::parse(id).unwrap(),
            fq1: temp.join(format!("{id}_R1.fastq.gz")),
            fq2: temp.join(format!("{id}_R2.fastq.gz")),
        }
    }

    #[test]
    fn test_fastqc_stem() {
        assert_eq!(fastqc_stem(Path::new("/x/S1_R1.fastq.gz")), "S1_R1");
        assert_eq!(fastqc_stem(Path::new("S1_R1.trim.fq.gz")), "S1_R1.trim");
        assert_eq!(fastqc_stem(Path::new("reads.fq.bz2")), "reads");
        assert_eq!(fastqc_stem(Path::new("reads.fastq")), "reads");
        assert_eq!(fastqc_stem(Path::new("reads.txt")), "reads.txt");
    }

    #[test]
    fn test_layout_paths() {
        let layout = SampleLayout::new(Path::new("out"), &SampleId::parse("S1").unwrap());
        assert_eq!(layout.root(), Path::new("out/samples/S1"));
        assert_eq!(
            layout.trimmed_reads().0,
            PathBuf::from("out/samples/S1/02_trim_fastp/S1_R1.trim.fq.gz")
        );
        assert_eq!(
            layout.log_path(Stage::FastqcTrimmed),
            PathBuf::from("out/samples/S1/logs/fastqc_trimmed.log")
        );
    }

    #[test]
    fn test_stage_invocations() {
        let temp = TempDir::new().unwrap();
        let cfg = config(temp.path()).with_fastp_extra_args(vec!["--cut_front".into()]);
        let runner = SampleRunner::new(Arc::new(cfg), Arc::new(ScriptedExecutor::default()));
        let s = sample(temp.path(), "S1");
        let layout = SampleLayout::new(temp.path(), &s.id);

        let (raw, raw_outputs) = runner.stage_invocation(&s, &layout, Stage::FastqcRaw);
        assert_eq!(raw.program(), Path::new("fastqc"));
        assert_eq!(raw.arguments()[0], "--threads");
        assert_eq!(raw.arguments()[1], "2");
        assert_eq!(raw.arguments()[4].as_os_str(), s.fq1.as_os_str());
        assert_eq!(
            raw_outputs[1],
            layout.stage_dir(Stage::FastqcRaw).join("S1_R1_fastqc.zip")
        );

        let (trim, trim_outputs) = runner.stage_invocation(&s, &layout, Stage::TrimFastp);
        assert_eq!(trim.arguments().last().unwrap(), "--cut_front");
        assert_eq!(trim_outputs.len(), 4);

        let (trimmed, _) = runner.stage_invocation(&s, &layout, Stage::FastqcTrimmed);
        assert_eq!(
            trimmed.arguments()[4].as_os_str(),
            layout.trimmed_reads().0.as_os_str()
        );
    }

    #[tokio::test]
    async fn test_run_all_stages_succeed() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::default());
        let runner = SampleRunner::new(Arc::new(config(temp.path())), executor.clone());
        let s = sample(temp.path(), "S1");

        let result = runner.run(&s).await;
        assert!(result.is_success());
        assert_eq!(result.stages.len(), 3);
        assert!(result
            .stages
            .iter()
            .all(|o| o.status == StageStatus::Succeeded));
        assert_eq!(executor.calls.lock().unwrap().len(), 3);

        let log = fs::read_to_string(result.stages[1].log.as_ref().unwrap()).unwrap();
        assert!(log.starts_with("$ fastp --in1 "));
        assert!(log.contains("[exit code 0]"));
        assert!(log.contains("Analysis complete"));
    }

    #[tokio::test]
    async fn test_run_trim_failure_skips_trimmed_qc() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor {
            fail_trim_for: Some("S1".into()),
            ..ScriptedExecutor::default()
        });
        let runner = SampleRunner::new(Arc::new(config(temp.path())), executor.clone());

        let result = runner.run(&sample(temp.path(), "S1")).await;
        assert!(!result.is_success());
        assert_eq!(result.stages[0].status, StageStatus::Succeeded);
        match &result.stages[1].status {
            StageStatus::Failed {
                exit_code,
                diagnostic,
                error,
            } => {
                assert_eq!(*exit_code, Some(255));
                assert!(diagnostic.contains("igzip"));
                assert!(error.contains("trim_fastp failed for sample S1"));
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(
            result.stages[2].status,
            StageStatus::skipped("upstream stage failed")
        );
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_disabled_trimming() {
        let temp = TempDir::new().unwrap();
        let stages = StageToggles {
            trim_fastp: false,
            ..StageToggles::default()
        };
        let cfg = RunConfig::new(temp.path().to_path_buf(), 1, 1, ToolCommands::default(), stages)
            .unwrap();
        let runner = SampleRunner::new(Arc::new(cfg), Arc::new(ScriptedExecutor::default()));

        let result = runner.run(&sample(temp.path(), "S1")).await;
        assert!(result.is_success());
        assert_eq!(result.stages[1].status, StageStatus::skipped("disabled"));
        assert_eq!(
            result.stages[2].status,
            StageStatus::skipped("no trimmed reads")
        );
    }

    #[tokio::test]
    async fn test_run_dry_run_logs_without_executing() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::default());
        let cfg = config(temp.path()).with_dry_run(true);
        let runner = SampleRunner::new(Arc::new(cfg), executor.clone());

        let result = runner.run(&sample(temp.path(), "S1")).await;
        assert!(result
            .stages
            .iter()
            .all(|o| o.status == StageStatus::skipped("dry run")));
        assert!(executor.calls.lock().unwrap().is_empty());
        let log = fs::read_to_string(temp.path().join("samples/S1/logs/fastqc_raw.log")).unwrap();
        assert!(log.contains("[dry run] command not executed"));
    }

    #[tokio::test]
    async fn test_run_resume_skips_existing_outputs() {
        let temp = TempDir::new().unwrap();
        let executor = Arc::new(ScriptedExecutor::default());
        let runner = SampleRunner::new(Arc::new(config(temp.path())), executor.clone());
        let s = sample(temp.path(), "S1");
        let layout = SampleLayout::new(temp.path(), &s.id);
        layout.create().unwrap();
        let (_, outputs) = runner.stage_invocation(&s, &layout, Stage::FastqcRaw);
        for path in &outputs {
            fs::write(path, "report").unwrap();
        }

        let result = runner.run(&s).await;
        assert_eq!(
            result.stages[0].status,
            StageStatus::skipped("outputs exist")
        );
        assert_eq!(result.stages[1].status, StageStatus::Succeeded);
        assert_eq!(executor.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_run_records_spawn_errors_as_failures() {
        struct Unstartable;

        #[async_trait]
        impl Executor for Unstartable {
            async fn execute(&self, invocation: &Invocation) -> QcResult<InvocationOutput> {
                Err(QcError::Spawn {
                    program: invocation.program().to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                })
            }
        }

        let temp = TempDir::new().unwrap();
        let runner = SampleRunner::new(Arc::new(config(temp.path())), Arc::new(Unstartable));
        let result = runner.run(&sample(temp.path(), "S1")).await;

        assert!(result.stages[0].is_failed());
        assert_eq!(result.failed_stages().count(), 1);
        match &result.stages[0].status {
            StageStatus::Failed { diagnostic, .. } => assert!(diagnostic.contains("denied")),
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
