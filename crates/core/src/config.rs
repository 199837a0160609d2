//! Run configuration.
//!
//! Configuration is read once at startup from a YAML file, adjusted by command line overrides,
//! and frozen into a [`RunConfig`] that is passed explicitly to every component. Nothing in the
//! core reads process-wide state (environment variables, globals) while a run is in progress.

use crate::constants::{DEFAULT_OUTDIR, DEFAULT_SAMPLES_TSV};
use crate::runner::Stage;
use crate::{QcError, QcResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk configuration file. Every key is optional; unknown keys are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default = "default_samples_tsv")]
    pub samples_tsv: PathBuf,
    #[serde(default = "default_outdir")]
    pub outdir: PathBuf,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default)]
    pub tools: ToolCommands,
    #[serde(default)]
    pub steps: StageToggles,
    #[serde(default)]
    pub fastp: FastpSection,
    #[serde(default = "default_true")]
    pub resume: bool,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            samples_tsv: default_samples_tsv(),
            outdir: default_outdir(),
            jobs: default_jobs(),
            threads: default_threads(),
            tools: ToolCommands::default(),
            steps: StageToggles::default(),
            fastp: FastpSection::default(),
            resume: true,
        }
    }
}

fn default_samples_tsv() -> PathBuf {
    PathBuf::from(DEFAULT_SAMPLES_TSV)
}

fn default_outdir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTDIR)
}

fn default_jobs() -> usize {
    2
}

fn default_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Executable name or path for each external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolCommands {
    pub fastqc: PathBuf,
    pub fastp: PathBuf,
    pub multiqc: PathBuf,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            fastqc: PathBuf::from("fastqc"),
            fastp: PathBuf::from("fastp"),
            multiqc: PathBuf::from("multiqc"),
        }
    }
}

impl ToolCommands {
    /// Tool names paired with their configured commands, in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Path)> {
        [
            ("fastqc", self.fastqc.as_path()),
            ("fastp", self.fastp.as_path()),
            ("multiqc", self.multiqc.as_path()),
        ]
        .into_iter()
    }
}

/// Per-stage enable switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StageToggles {
    pub fastqc_raw: bool,
    pub trim_fastp: bool,
    pub fastqc_trimmed: bool,
    pub multiqc: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            fastqc_raw: true,
            trim_fastp: true,
            fastqc_trimmed: true,
            multiqc: true,
        }
    }
}

impl StageToggles {
    pub fn is_enabled(&self, stage: Stage) -> bool {
        match stage {
            Stage::FastqcRaw => self.fastqc_raw,
            Stage::TrimFastp => self.trim_fastp,
            Stage::FastqcTrimmed => self.fastqc_trimmed,
        }
    }
}

/// Extra fastp arguments, either as one whitespace-separated line or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExtraArgs {
    Line(String),
    List(Vec<String>),
}

impl Default for ExtraArgs {
    fn default() -> Self {
        ExtraArgs::List(Vec::new())
    }
}

impl ExtraArgs {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            ExtraArgs::Line(line) => line.split_whitespace().map(str::to_owned).collect(),
            ExtraArgs::List(args) => args.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FastpSection {
    #[serde(default)]
    pub extra_args: ExtraArgs,
}

/// Command line adjustments applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub outdir: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub dry_run: bool,
}

/// Reads and parses a YAML config file.
pub fn load_config_file(path: &Path) -> QcResult<ConfigFile> {
    let text = std::fs::read_to_string(path).map_err(|source| QcError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

/// Parses YAML config text. An empty document yields the defaults.
pub fn parse_config(text: &str) -> QcResult<ConfigFile> {
    if text.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(text).map_err(QcError::ConfigParse)
}

/// Immutable configuration for one run.
#[derive(Clone, Debug)]
pub struct RunConfig {
    output_root: PathBuf,
    jobs: usize,
    threads: usize,
    tools: ToolCommands,
    stages: StageToggles,
    fastp_extra_args: Vec<String>,
    dry_run: bool,
    resume: bool,
}

impl RunConfig {
    /// Create a new `RunConfig` with resume enabled, dry run disabled and no extra fastp arguments.
    pub fn new(
        output_root: PathBuf,
        jobs: usize,
        threads: usize,
        tools: ToolCommands,
        stages: StageToggles,
    ) -> QcResult<Self> {
        if output_root.as_os_str().is_empty() {
            return Err(QcError::InvalidConfig("outdir cannot be empty".into()));
        }
        if jobs == 0 {
            return Err(QcError::InvalidConfig("jobs must be at least 1".into()));
        }
        if threads == 0 {
            return Err(QcError::InvalidConfig("threads must be at least 1".into()));
        }
        for (tool, command) in tools.iter() {
            if command.as_os_str().is_empty() {
                return Err(QcError::InvalidConfig(format!(
                    "tools.{tool} cannot be empty"
                )));
            }
        }

        Ok(Self {
            output_root,
            jobs,
            threads,
            tools,
            stages,
            fastp_extra_args: Vec::new(),
            dry_run: false,
            resume: true,
        })
    }

    /// Builds a `RunConfig` from a parsed config file and command line overrides.
    pub fn from_file(file: &ConfigFile, overrides: &RunOverrides) -> QcResult<Self> {
        let output_root = overrides
            .outdir
            .clone()
            .unwrap_or_else(|| file.outdir.clone());
        let jobs = overrides.jobs.unwrap_or(file.jobs);

        Ok(Self::new(
            output_root,
            jobs,
            file.threads,
            file.tools.clone(),
            file.steps,
        )?
        .with_fastp_extra_args(file.fastp.extra_args.to_args())
        .with_resume(file.resume)
        .with_dry_run(overrides.dry_run))
    }

    pub fn with_fastp_extra_args(mut self, args: Vec<String>) -> Self {
        self.fastp_extra_args = args;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Replaces tool commands, typically with their resolved absolute paths.
    pub fn with_tools(mut self, tools: ToolCommands) -> Self {
        self.tools = tools;
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn tools(&self) -> &ToolCommands {
        &self.tools
    }

    pub fn stages(&self) -> StageToggles {
        self.stages
    }

    pub fn fastp_extra_args(&self) -> &[String] {
        &self.fastp_extra_args
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn resume(&self) -> bool {
        self.resume
    }
}
