use anyhow::Context;
use clap::{Parser, Subcommand};
use seqqc_core::config::load_config_file;
use seqqc_core::constants::DEFAULT_CONFIG_FILENAME;
use seqqc_core::{
    probe_versions, ConfigFile, Pipeline, ProcessExecutor, RunOverrides, RunPlan, RunReport,
    StageStatus,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code when the run completed but a stage or the summary failed.
const EXIT_STAGE_FAILURES: u8 = 2;

#[derive(Parser)]
#[command(name = "seqqc")]
#[command(about = "Paired-end FASTQ quality control: FastQC, fastp and MultiQC")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run raw QC, trimming and trimmed QC for every sample, then the summary report
    Run {
        /// Path to the YAML config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILENAME)]
        config: PathBuf,
        /// Only process the first N samples of the manifest
        #[arg(long)]
        limit: Option<usize>,
        /// Log the commands without executing them
        #[arg(long)]
        dry_run: bool,
        /// Number of samples processed at once (overrides `jobs`)
        #[arg(long)]
        jobs: Option<usize>,
        /// Output directory (overrides `outdir`)
        #[arg(long)]
        outdir: Option<PathBuf>,
    },
    /// Validate the config, the manifest, the input files and the tools without running anything
    Check {
        /// Path to the YAML config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILENAME)]
        config: PathBuf,
    },
    /// Print the versions of the configured tools
    Versions {
        /// Path to the YAML config file (defaults apply if it does not exist)
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILENAME)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("seqqc=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let search_path = std::env::var_os("PATH");

    match cli.command {
        Commands::Run {
            config,
            limit,
            dry_run,
            jobs,
            outdir,
        } => {
            let overrides = RunOverrides {
                outdir,
                jobs,
                dry_run,
            };
            let mut plan = load_plan(&config, &overrides, limit)?;
            if !plan.config.dry_run() {
                plan = plan.resolve_tools(search_path.as_deref())?;
            }

            let pipeline = Pipeline::new(plan.config, Arc::new(ProcessExecutor::new()));
            let report = pipeline.run(plan.samples).await?;
            print_outcome(&report);

            if report.has_failures() {
                Ok(ExitCode::from(EXIT_STAGE_FAILURES))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Check { config } => {
            let plan = load_plan(&config, &RunOverrides::default(), None)?
                .resolve_tools(search_path.as_deref())?;

            println!(
                "Manifest {}: {} samples, all input files present",
                plan.manifest.display(),
                plan.samples.len()
            );
            for (tool, path) in plan.config.tools().iter() {
                println!("{tool}: {}", path.display());
            }
            println!(
                "Output: {} ({} samples at a time, {} threads per tool)",
                plan.config.output_root().display(),
                plan.config.jobs(),
                plan.config.threads()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Versions { config } => {
            let file = if config.exists() {
                load_config_file(&config)?
            } else {
                ConfigFile::default()
            };
            // Best effort: a tool that cannot be run reports "unknown".
            for version in probe_versions(&ProcessExecutor::new(), &file.tools).await {
                println!("{}: {}", version.tool, version.version);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_plan(config: &Path, overrides: &RunOverrides, limit: Option<usize>) -> anyhow::Result<RunPlan> {
    RunPlan::load(config, overrides, limit)
        .with_context(|| format!("cannot prepare run from {}", config.display()))
}

fn print_outcome(report: &RunReport) {
    let failed: Vec<_> = report.failed_samples().collect();
    println!(
        "{} samples processed, {} failed",
        report.samples.len(),
        failed.len()
    );
    for sample in failed {
        for outcome in sample.failed_stages() {
            println!("  FAIL {} / {}", sample.sample, outcome.stage);
        }
    }
    if let StageStatus::Failed { error, .. } = &report.summary.status {
        println!("  FAIL summary: {error}");
    }
    println!("Report: {}", report.markdown_report.display());
}
