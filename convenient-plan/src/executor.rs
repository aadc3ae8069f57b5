//! Build executors.
//!
//! The engine never interprets commands itself. A [`BuildExecutor`] gets
//! the target name, its command text and the values of its direct
//! dependencies, and produces the target's value.

use crate::error::{BuildError, BuildResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Everything an executor needs to build one target.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Target name
    pub name: String,
    /// Command text as written in the plan
    pub command: String,
    /// Output path for file targets
    pub output: Option<PathBuf>,
    /// Values of direct dependencies, by name
    pub dependencies: BTreeMap<String, Arc<Value>>,
    /// Time limit for this build
    pub timeout: Option<Duration>,
}

/// Runs target commands.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Build one target and return its value.
    ///
    /// For file targets the returned value is informational; the file on
    /// disk is what gets fingerprinted.
    async fn build(&self, request: BuildRequest) -> BuildResult<Value>;
}

/// Environment variable a dependency value is exposed under.
///
/// `PLAN_DEP_` followed by the upper-cased name, with every character
/// outside `[A-Z0-9_]` replaced by `_`.
#[must_use]
pub fn dependency_env_var(name: &str) -> String {
    let mut var = String::from("PLAN_DEP_");
    var.extend(name.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    var
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Runs commands through a POSIX shell.
///
/// Dependency values are passed as environment variables (see
/// [`dependency_env_var`]); strings are passed raw, everything else as
/// JSON. Standard output, trimmed, becomes the value: parsed as JSON when
/// it is valid JSON, otherwise kept as a string.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    workdir: PathBuf,
}

impl ShellExecutor {
    /// Executor running `sh -c` in `workdir`.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            shell: "sh".to_string(),
            workdir: workdir.into(),
        }
    }

    /// Use a different shell binary (it must accept `-c`).
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

#[async_trait]
impl BuildExecutor for ShellExecutor {
    async fn build(&self, request: BuildRequest) -> BuildResult<Value> {
        let mut cmd = Command::new(&self.shell);
        let _ = cmd
            .arg("-c")
            .arg(&request.command)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in &request.dependencies {
            let _ = cmd.env(dependency_env_var(name), render(value));
        }

        debug!(target = %request.name, shell = %self.shell, "Running command");
        let child = cmd.spawn().map_err(|e| BuildError::Spawn(e.to_string()))?;

        let output = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| BuildError::Timeout(limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| BuildError::Spawn(e.to_string()))?;

        if !output.status.success() {
            return Err(BuildError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(serde_json::from_str(&stdout).unwrap_or(Value::String(stdout)))
    }
}

/// Executor backed by a closure, for embedding and tests.
pub struct FnExecutor<F> {
    build: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&BuildRequest) -> BuildResult<Value> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(build: F) -> Self {
        Self { build }
    }
}

#[async_trait]
impl<F> BuildExecutor for FnExecutor<F>
where
    F: Fn(&BuildRequest) -> BuildResult<Value> + Send + Sync,
{
    async fn build(&self, request: BuildRequest) -> BuildResult<Value> {
        (self.build)(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn request(command: &str) -> BuildRequest {
        BuildRequest {
            name: "t".to_string(),
            command: command.to_string(),
            output: None,
            dependencies: BTreeMap::new(),
            timeout: None,
        }
    }

    #[test]
    fn test_dependency_env_var() {
        assert_eq!(dependency_env_var("raw_data"), "PLAN_DEP_RAW_DATA");
        assert_eq!(dependency_env_var("\"out/a.csv\""), "PLAN_DEP__OUT_A_CSV_");
    }

    #[tokio::test]
    async fn test_shell_json_and_text_output() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellExecutor::new(tmp.path());

        assert_eq!(shell.build(request("echo '[1, 2]'")).await.unwrap(), json!([1, 2]));
        assert_eq!(shell.build(request("echo hello")).await.unwrap(), json!("hello"));
    }

    #[tokio::test]
    async fn test_shell_sees_dependencies() {
        let tmp = TempDir::new().unwrap();
        let shell = ShellExecutor::new(tmp.path());

        let mut req = request("echo $((PLAN_DEP_X * 2))");
        let _ = req.dependencies.insert("x".to_string(), Arc::new(json!(21)));
        assert_eq!(shell.build(req).await.unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_shell_failure() {
        let tmp = TempDir::new().unwrap();
        let err = ShellExecutor::new(tmp.path())
            .build(request("echo broken >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            BuildError::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shell_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut req = request("sleep 5");
        req.timeout = Some(Duration::from_millis(100));
        let err = ShellExecutor::new(tmp.path()).build(req).await.unwrap_err();
        assert_eq!(err, BuildError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let exec = FnExecutor::new(|req: &BuildRequest| Ok(json!(req.command.len())));
        assert_eq!(exec.build(request("abc")).await.unwrap(), json!(3));
    }
}
