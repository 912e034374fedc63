// ── Shortcut runner ──
//
// Runs user automations outside the companion. The process runner invokes
// `<program> [args..] run <name> --input-path -` with the parameters as a
// JSON object on stdin: exit 0 is success (stdout is the result), any other
// exit code is a failure, and termination by signal counts as cancellation.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::CoreError;

/// How a shortcut run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortcutOutcome {
    Success(Option<String>),
    Failure { code: i32, message: String },
    Cancelled,
}

#[async_trait]
pub trait ShortcutRunner: Send + Sync {
    /// Run the named shortcut. `Err` means it could not be started at all.
    async fn run(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ShortcutOutcome, CoreError>;
}

/// Runs shortcuts through an external command.
#[derive(Debug, Clone)]
pub struct ProcessShortcutRunner {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl ProcessShortcutRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments placed before `run <name>`.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl ShortcutRunner for ProcessShortcutRunner {
    async fn run(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<ShortcutOutcome, CoreError> {
        let input = serde_json::to_vec(parameters)
            .map_err(|e| CoreError::Internal(format!("encoding shortcut input: {e}")))?;

        debug!(program = %self.program.display(), name, "running shortcut");
        let mut child = Command::new(&self.program)
            .args(&self.leading_args)
            .args(["run", name, "--input-path", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::OperationFailed {
                message: format!("cannot start shortcut '{name}': {e}"),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A shortcut that ignores its input may close stdin early.
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "shortcut did not read its input");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| CoreError::OperationFailed {
                message: format!("waiting for shortcut '{name}': {e}"),
            })?;

        let outcome = match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
                ShortcutOutcome::Success((!stdout.is_empty()).then_some(stdout))
            }
            Some(code) => ShortcutOutcome::Failure {
                code,
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            },
            None => {
                warn!(name, "shortcut terminated by signal");
                ShortcutOutcome::Cancelled
            }
        };
        Ok(outcome)
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn params() -> BTreeMap<String, String> {
        BTreeMap::from([("door".to_owned(), "main".to_owned())])
    }

    #[tokio::test]
    async fn success_returns_stdout() {
        let runner = ProcessShortcutRunner::new("sh").with_args(["-c", "cat"]);
        let outcome = runner.run("Echo", &params()).await.unwrap();
        assert_eq!(
            outcome,
            ShortcutOutcome::Success(Some(r#"{"door":"main"}"#.to_owned()))
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let runner = ProcessShortcutRunner::new("sh").with_args(["-c", "echo boom >&2; exit 3"]);
        let outcome = runner.run("Broken", &params()).await.unwrap();
        assert_eq!(
            outcome,
            ShortcutOutcome::Failure {
                code: 3,
                message: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn signal_is_cancellation() {
        let runner = ProcessShortcutRunner::new("sh").with_args(["-c", "kill -9 $$"]);
        let outcome = runner.run("Killed", &params()).await.unwrap();
        assert_eq!(outcome, ShortcutOutcome::Cancelled);
    }

    #[tokio::test]
    async fn missing_program_cannot_start() {
        let runner = ProcessShortcutRunner::new("/nonexistent/shortcuts");
        let err = runner.run("Any", &params()).await.unwrap_err();
        assert!(matches!(err, CoreError::OperationFailed { .. }));
    }
}
