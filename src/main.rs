use anyhow::Context;
use seqqc_core::constants::DEFAULT_CONFIG_FILENAME;
use seqqc_core::{Pipeline, ProcessExecutor, RunOverrides, RunPlan};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Batch entry point for the QC pipeline
///
/// Runs the whole pipeline once, configured from the environment, and exits with
/// 0 when every stage succeeded, 2 when a stage or the summary failed, and 1 on
/// errors that stop the run before any tool is started.
///
/// # Environment Variables
/// - `SEQQC_CONFIG`: YAML config file (default: "config.yaml")
/// - `SEQQC_LIMIT`: only process the first N samples of the manifest
/// - `SEQQC_DRY_RUN`: log the commands without running them ("1", "true" or "yes")
/// - `RUST_LOG`: extra log filter directives
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("seqqc=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: PathBuf = std::env::var("SEQQC_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_FILENAME.into())
        .into();
    let limit = std::env::var("SEQQC_LIMIT")
        .ok()
        .map(|v| v.trim().parse::<usize>())
        .transpose()
        .context("SEQQC_LIMIT must be a whole number")?;
    let dry_run = std::env::var("SEQQC_DRY_RUN")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    tracing::info!("++ Starting seqqc run from {}", config.display());

    let overrides = RunOverrides {
        dry_run,
        ..RunOverrides::default()
    };
    let mut plan = RunPlan::load(&config, &overrides, limit)
        .with_context(|| format!("cannot prepare run from {}", config.display()))?;
    if !dry_run {
        plan = plan.resolve_tools(std::env::var_os("PATH").as_deref())?;
    }

    let pipeline = Pipeline::new(plan.config, Arc::new(ProcessExecutor::new()));
    let report = pipeline.run(plan.samples).await?;

    if report.has_failures() {
        tracing::warn!(
            "run finished with failures, see {}",
            report.markdown_report.display()
        );
        Ok(ExitCode::from(2))
    } else {
        tracing::info!("run finished, see {}", report.markdown_report.display());
        Ok(ExitCode::SUCCESS)
    }
}
