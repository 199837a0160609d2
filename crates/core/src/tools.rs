//! External tool resolution and version probing.

use crate::config::ToolCommands;
use crate::constants::TOOL_VERSION_MAX_LEN;
use crate::invocation::{Executor, Invocation};
use crate::{QcError, QcResult};
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolves a tool command to an executable path.
///
/// A command containing a path separator must name an existing file. A bare name is looked up
/// in each directory of `search_path` (normally the value of `PATH`).
pub fn resolve_tool(tool: &str, command: &Path, search_path: Option<&OsStr>) -> QcResult<PathBuf> {
    let not_found = || QcError::ToolNotFound {
        tool: tool.to_string(),
        command: command.display().to_string(),
    };

    if command.components().count() > 1 || command.is_absolute() {
        return if is_executable(command) {
            Ok(command.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    let search_path = search_path.ok_or_else(not_found)?;
    std::env::split_paths(search_path)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

/// Resolves every tool in `tools` against `search_path`, failing on the first missing one.
pub fn resolve_tools(tools: &ToolCommands, search_path: Option<&OsStr>) -> QcResult<ToolCommands> {
    Ok(ToolCommands {
        fastqc: resolve_tool("fastqc", &tools.fastqc, search_path)?,
        fastp: resolve_tool("fastp", &tools.fastp, search_path)?,
        multiqc: resolve_tool("multiqc", &tools.multiqc, search_path)?,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Version string of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVersion {
    pub tool: String,
    pub version: String,
}

/// Probed versions of the configured tools, in a fixed order.
pub type ToolVersions = Vec<ToolVersion>;

/// Best-effort version capture.
///
/// Tries `--version`, `-v` and `version` in turn and keeps the first non-empty output line,
/// truncated. Tools that fail every probe report `unknown`.
pub async fn probe_version(executor: &dyn Executor, program: &Path) -> String {
    for flag in ["--version", "-v", "version"] {
        let invocation = Invocation::new(program).arg(flag);
        let Ok(output) = executor.execute(&invocation).await else {
            continue;
        };
        let first_line = output
            .combined()
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_owned);
        if let Some(line) = first_line {
            return line.chars().take(TOOL_VERSION_MAX_LEN).collect();
        }
    }
    "unknown".to_string()
}

/// Probes every configured tool.
pub async fn probe_versions(executor: &dyn Executor, tools: &ToolCommands) -> ToolVersions {
    let mut versions = Vec::new();
    for (tool, program) in tools.iter() {
        let version = probe_version(executor, program).await;
        tracing::debug!("{} version: {}", tool, version);
        versions.push(ToolVersion {
            tool: tool.to_string(),
            version,
        });
    }
    versions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{InvocationOutput, ProcessExecutor};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn write_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_tool_on_search_path() {
        let temp = TempDir::new().unwrap();
        let bin_a = temp.path().join("a");
        let bin_b = temp.path().join("b");
        fs::create_dir_all(&bin_a).unwrap();
        fs::create_dir_all(&bin_b).unwrap();
        write_executable(&bin_b.join("fastp"));

        let search = std::env::join_paths([&bin_a, &bin_b]).unwrap();
        let resolved = resolve_tool("fastp", Path::new("fastp"), Some(&search)).unwrap();
        assert_eq!(resolved, bin_b.join("fastp"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_tool_skips_non_executable() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("fastqc"), "not a program").unwrap();

        let search = temp.path().as_os_str().to_owned();
        let err = resolve_tool("fastqc", Path::new("fastqc"), Some(&search)).unwrap_err();
        assert!(matches!(err, QcError::ToolNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_tool_explicit_path() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("multiqc");
        write_executable(&tool);

        assert_eq!(resolve_tool("multiqc", &tool, None).unwrap(), tool);
        let missing = temp.path().join("missing");
        assert!(resolve_tool("multiqc", &missing, None).is_err());
    }

    #[test]
    fn test_resolve_tool_without_search_path() {
        let err = resolve_tool("fastqc", Path::new("fastqc"), None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "tool 'fastqc' not found: 'fastqc' (fix PATH or tools.fastqc in the config)"
        );
    }

    /// Answers only to `-v`, like some older tool releases.
    struct DashVExecutor;

    #[async_trait]
    impl Executor for DashVExecutor {
        async fn execute(&self, invocation: &Invocation) -> QcResult<InvocationOutput> {
            let flag = invocation.arguments()[0].to_string_lossy().into_owned();
            if flag == "-v" {
                Ok(InvocationOutput {
                    exit_code: Some(0),
                    stdout: String::new(),
                    stderr: "\nfastp 0.23.4\nbuilt with gcc\n".into(),
                })
            } else {
                Ok(InvocationOutput {
                    exit_code: Some(1),
                    ..InvocationOutput::default()
                })
            }
        }
    }

    struct BrokenExecutor;

    #[async_trait]
    impl Executor for BrokenExecutor {
        async fn execute(&self, invocation: &Invocation) -> QcResult<InvocationOutput> {
            Err(QcError::Spawn {
                program: invocation.program().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        }
    }

    #[tokio::test]
    async fn test_probe_versions_missing_commands_are_unknown() {
        let tools = ToolCommands {
            fastqc: "/no/such/dir/fastqc".into(),
            fastp: "seqqc-no-such-fastp".into(),
            multiqc: "/no/such/dir/multiqc".into(),
        };
        let versions = probe_versions(&ProcessExecutor::new(), &tools).await;
        assert_eq!(versions.len(), 3);
        assert!(versions.iter().all(|v| v.version == "unknown"));
    }

    #[tokio::test]
    async fn test_probe_version_falls_back_between_flags() {
        let version = probe_version(&DashVExecutor, Path::new("fastp")).await;
        assert_eq!(version, "fastp 0.23.4");
    }

    #[tokio::test]
    async fn test_probe_versions_unknown_when_unavailable() {
        let versions = probe_versions(&BrokenExecutor, &ToolCommands::default()).await;
        let tools: Vec<_> = versions.iter().map(|v| v.tool.as_str()).collect();
        assert_eq!(tools, vec!["fastqc", "fastp", "multiqc"]);
        assert!(versions.iter().all(|v| v.version == "unknown"));
    }
}
