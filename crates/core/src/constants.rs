//! Constants used throughout the seqqc core crate.
//!
//! This module contains all path and filename constants to ensure
//! consistency across the codebase and make maintenance easier.

/// Required manifest column holding the sample identifier.
pub const MANIFEST_SAMPLE_COLUMN: &str = "sample";

/// Required manifest column holding the forward-read path.
pub const MANIFEST_FQ1_COLUMN: &str = "fq1";

/// Required manifest column holding the reverse-read path.
pub const MANIFEST_FQ2_COLUMN: &str = "fq2";

/// Default config file name when none is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "config.yaml";

/// Default manifest file name.
pub const DEFAULT_SAMPLES_TSV: &str = "samples.tsv";

/// Default output root.
pub const DEFAULT_OUTDIR: &str = "results";

/// Directory under the output root holding one directory per sample.
pub const SAMPLES_DIR_NAME: &str = "samples";

/// Directory under the output root holding the MultiQC output.
pub const SUMMARY_DIR_NAME: &str = "multiqc";

/// Per-sample directory for raw-read FastQC output.
pub const FASTQC_RAW_DIR_NAME: &str = "01_fastqc_raw";

/// Per-sample directory for fastp output.
pub const TRIM_DIR_NAME: &str = "02_trim_fastp";

/// Per-sample directory for trimmed-read FastQC output.
pub const FASTQC_TRIMMED_DIR_NAME: &str = "03_fastqc_trimmed";

/// Per-sample directory for captured tool output.
pub const LOGS_DIR_NAME: &str = "logs";

/// Filename of the MultiQC HTML report.
pub const MULTIQC_REPORT_FILENAME: &str = "multiqc_report.html";

/// Filename of the markdown run report.
pub const REPORT_FILENAME: &str = "QC_REPORT.md";

/// Filename of the JSON run summary.
pub const SUMMARY_JSON_FILENAME: &str = "qc_summary.json";

/// Maximum number of diagnostic lines quoted per failure in the markdown report.
pub const REPORT_DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Maximum length of a probed tool version string.
pub const TOOL_VERSION_MAX_LEN: usize = 200;
