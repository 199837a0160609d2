//! # seqqc core
//!
//! Orchestration of paired-end FASTQ quality control:
//! - Loading and validating the sample manifest
//! - Running raw QC, trimming and trimmed QC per sample on a bounded worker pool
//! - Aggregating the results into a MultiQC report, `QC_REPORT.md` and `qc_summary.json`
//!
//! The external tools (FastQC, fastp, MultiQC) are invoked as subprocesses; their analyses are
//! not reimplemented here. Command line handling and logging setup live in the binaries.

pub mod aggregator;
pub mod config;
pub mod constants;
pub mod error;
pub mod invocation;
pub mod manifest;
pub mod markdown;
pub mod pipeline;
pub mod runner;
pub mod tools;

pub use aggregator::{Aggregator, RunReport, SummaryOutcome};
pub use config::{ConfigFile, RunConfig, RunOverrides, StageToggles, ToolCommands};
pub use error::{QcError, QcResult};
pub use invocation::{Executor, Invocation, InvocationOutput, ProcessExecutor};
pub use manifest::{load_manifest, Sample};
pub use pipeline::{Pipeline, RunPlan};
pub use runner::{SampleResult, SampleRunner, Stage, StageOutcome, StageStatus};
pub use seqqc_types::{SampleId, TextError};
pub use tools::{probe_versions, ToolVersion, ToolVersions};
