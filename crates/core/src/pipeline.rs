//! Run orchestration.
//!
//! [`RunPlan`] gathers everything that must be valid before the first subprocess is spawned:
//! the config file, the manifest, the input files and the tool executables. [`Pipeline`] then
//! fans the samples out over a bounded pool of tokio tasks, waits for every one of them, and
//! hands the results, in manifest order, to the [`Aggregator`].

use crate::aggregator::{Aggregator, RunReport};
use crate::config::{load_config_file, RunConfig, RunOverrides};
use crate::invocation::Executor;
use crate::manifest::{load_manifest, Sample};
use crate::runner::{samples_root, SampleResult, SampleRunner};
use crate::tools::{probe_versions, resolve_tools};
use crate::{QcError, QcResult};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A validated run: configuration plus the samples to process.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub config: RunConfig,
    pub manifest: PathBuf,
    pub samples: Vec<Sample>,
}

impl RunPlan {
    /// Loads the config file and the manifest it names.
    ///
    /// `limit` keeps only the first N samples of the manifest. Every sample is validated
    /// regardless, so a broken manifest is reported even when it is limited.
    ///
    /// # Errors
    ///
    /// Config, manifest and missing input errors, see [`load_config_file`] and
    /// [`load_manifest`]. `QcError::InvalidConfig` if `limit` is zero.
    pub fn load(
        config_path: &Path,
        overrides: &RunOverrides,
        limit: Option<usize>,
    ) -> QcResult<Self> {
        let file = load_config_file(config_path)?;
        let config = RunConfig::from_file(&file, overrides)?;

        let mut samples = load_manifest(&file.samples_tsv)?;
        match limit {
            Some(0) => {
                return Err(QcError::InvalidConfig("limit must be at least 1".into()));
            }
            Some(n) if n < samples.len() => {
                tracing::info!("limiting run to the first {} of {} samples", n, samples.len());
                samples.truncate(n);
            }
            _ => {}
        }

        Ok(Self {
            config,
            manifest: file.samples_tsv,
            samples,
        })
    }

    /// Replaces every tool command with its resolved executable path.
    ///
    /// # Errors
    ///
    /// Returns `QcError::ToolNotFound` for the first tool that cannot be found.
    pub fn resolve_tools(mut self, search_path: Option<&OsStr>) -> QcResult<Self> {
        let tools = resolve_tools(self.config.tools(), search_path)?;
        self.config = self.config.with_tools(tools);
        Ok(self)
    }
}

/// Runs samples through the per-sample stages and aggregates the results.
#[derive(Clone)]
pub struct Pipeline {
    config: Arc<RunConfig>,
    executor: Arc<dyn Executor>,
}

impl Pipeline {
    /// Creates a new `Pipeline` instance.
    pub fn new(config: RunConfig, executor: Arc<dyn Executor>) -> Self {
        Self {
            config: Arc::new(config),
            executor,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs the whole pipeline over `samples`.
    ///
    /// Stage and summary failures are recorded in the returned report; check
    /// [`RunReport::has_failures`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the output root cannot be created, a worker task panics, or
    /// the reports cannot be written.
    pub async fn run(&self, samples: Vec<Sample>) -> QcResult<RunReport> {
        let output_root = self.config.output_root();
        let samples_dir = samples_root(output_root);
        fs::create_dir_all(&samples_dir).map_err(|e| QcError::io(&samples_dir, e))?;

        tracing::info!(
            "starting run: {} samples, {} at a time, output in {}",
            samples.len(),
            self.config.jobs(),
            output_root.display()
        );

        let tool_versions = probe_versions(self.executor.as_ref(), self.config.tools()).await;
        let results = self.run_samples(samples).await?;

        let failed = results.iter().filter(|r| !r.is_success()).count();
        tracing::info!(
            "all samples finished: {} ok, {} failed",
            results.len() - failed,
            failed
        );

        Aggregator::new(self.config.clone(), self.executor.clone())
            .aggregate(results, tool_versions)
            .await
    }

    /// Runs every sample, at most `jobs` at a time, and returns the results in input order.
    ///
    /// Returns only once every sample has reached a terminal result.
    pub async fn run_samples(&self, samples: Vec<Sample>) -> QcResult<Vec<SampleResult>> {
        let total = samples.len();
        let permits = Arc::new(Semaphore::new(self.config.jobs()));
        let runner = SampleRunner::new(self.config.clone(), self.executor.clone());

        let mut tasks = JoinSet::new();
        for (index, sample) in samples.into_iter().enumerate() {
            let permits = permits.clone();
            let runner = runner.clone();
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| QcError::TaskJoin(e.to_string()))?;
                tracing::info!("[{}] started ({}/{})", sample.id, index + 1, total);
                let result = runner.run(&sample).await;
                if result.is_success() {
                    tracing::info!("[{}] finished", sample.id);
                } else {
                    tracing::warn!("[{}] finished with failures", sample.id);
                }
                Ok::<_, QcError>((index, result))
            });
        }

        // Drain every task first: dropping the set would abort the remaining workers.
        let mut results = Vec::with_capacity(total);
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined
                .map_err(|e| QcError::TaskJoin(e.to_string()))
                .and_then(|r| r)
            {
                Ok(entry) => results.push(entry),
                Err(e) => {
                    tracing::error!("{}", e);
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        results.sort_by_key(|(index, _)| *index);
        Ok(results.into_iter().map(|(_, result)| result).collect())
    }
}
