//! Subprocess execution inside a conversation workspace.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use atelier_workspace::WorkspaceSnapshot;

use crate::error::{Result, SandboxError};
use crate::{fonts, sanitize};

/// Captured result of a sandboxed subprocess, plus the filesystem diff.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
    /// Files created or modified in the workspace during execution.
    pub generated_files: Vec<String>,
}

/// Runs model-generated Python and shell commands with the workspace as cwd.
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    python_interpreter: String,
}

impl SandboxRunner {
    pub fn new(python_interpreter: Option<String>) -> Self {
        Self {
            python_interpreter: python_interpreter.unwrap_or_else(|| "python3".to_string()),
        }
    }

    /// Execute Python source. The full pipeline: harmonize imports, rewrite
    /// paths, inject the font preamble, stage to a temp file, run with
    /// cwd = workspace under a wall-clock timeout, then diff the workspace.
    pub async fn run_python(
        &self,
        code: &str,
        workspace: &Path,
        timeout_secs: u64,
    ) -> Result<ExecOutcome> {
        if !workspace.is_dir() {
            return Err(SandboxError::NoWorkspace);
        }

        let code = sanitize::harmonize_imports(code);
        let code = sanitize::sanitize_paths(&code);
        let code = fonts::inject_font_support(&code);

        let script = stage_script(&code)?;
        info!(
            chars = code.len(),
            workspace = %workspace.display(),
            timeout_secs,
            "executing python in sandbox"
        );

        let snapshot = WorkspaceSnapshot::capture(workspace);
        let outcome = self
            .spawn(
                Command::new(&self.python_interpreter).arg(script.path()),
                workspace,
                timeout_secs,
            )
            .await?;

        Ok(ExecOutcome {
            generated_files: snapshot.diff(),
            ..outcome
        })
    }

    /// Execute a script file already present in the workspace (file mode).
    pub async fn run_python_file(
        &self,
        script_file: &str,
        workspace: &Path,
        timeout_secs: u64,
    ) -> Result<ExecOutcome> {
        sanitize::validate_filename(script_file).map_err(SandboxError::InvalidFilename)?;
        let path = workspace.join(script_file);
        if !path.is_file() {
            return Err(SandboxError::ScriptNotFound(script_file.to_string()));
        }
        let code = std::fs::read_to_string(&path)?;
        debug!(script = script_file, chars = code.len(), "loaded script from workspace");
        self.run_python(&code, workspace, timeout_secs).await
    }

    /// Execute a shell command under `bash -lc` after the deny-list check.
    pub async fn run_shell(
        &self,
        cmd: &str,
        workspace: &Path,
        timeout_secs: u64,
    ) -> Result<ExecOutcome> {
        if !workspace.is_dir() {
            return Err(SandboxError::NoWorkspace);
        }
        crate::safety::check_command(cmd).map_err(SandboxError::Blocked)?;

        info!(workspace = %workspace.display(), timeout_secs, "executing shell in sandbox");
        let snapshot = WorkspaceSnapshot::capture(workspace);
        let outcome = self
            .spawn(
                Command::new("bash").arg("-lc").arg(cmd),
                workspace,
                timeout_secs,
            )
            .await?;

        Ok(ExecOutcome {
            generated_files: snapshot.diff(),
            ..outcome
        })
    }

    async fn spawn(
        &self,
        cmd: &mut Command,
        workspace: &Path,
        timeout_secs: u64,
    ) -> Result<ExecOutcome> {
        let fut = cmd
            .current_dir(workspace)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), fut).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs, "sandboxed process timed out");
                return Err(SandboxError::Timeout { secs: timeout_secs });
            }
        };

        Ok(ExecOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            returncode: output.status.code().unwrap_or(-1),
            generated_files: Vec::new(),
        })
    }
}

/// Write the final source to a temp file that lives until the run finishes.
fn stage_script(code: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("atelier_exec_")
        .suffix(".py")
        .tempfile()?;
    file.write_all(code.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_denied_command_is_blocked() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(None);
        let err = runner
            .run_shell("rm -rf /", tmp.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Blocked(_)));
    }

    #[tokio::test]
    async fn shell_captures_output_and_diff() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(None);
        let outcome = runner
            .run_shell("echo hi > hello.txt && cat hello.txt", tmp.path(), 10)
            .await
            .unwrap();
        assert_eq!(outcome.returncode, 0);
        assert!(outcome.stdout.contains("hi"));
        assert!(outcome.generated_files.contains(&"hello.txt".to_string()));
    }

    #[tokio::test]
    async fn missing_script_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(None);
        let err = runner
            .run_python_file("missing.py", tmp.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ScriptNotFound(_)));
    }

    #[tokio::test]
    async fn script_file_with_path_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = SandboxRunner::new(None);
        let err = runner
            .run_python_file("../escape.py", tmp.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidFilename(_)));
    }
}
