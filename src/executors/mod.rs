//! Executor abstraction — one trait over the AI coding CLIs.
//!
//! Each executor (kiro-cli, Codex) has a different invocation, model catalog,
//! and usage-report format. The prompt always goes in on stdin; stdout/stderr
//! are captured in full so failures can be quoted back to the issue.

pub mod codex;
pub mod kiro;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Hard ceiling on a single executor run.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(600);

/// Exit code reported when a run is killed at the ceiling, matching the
/// `timeout(1)` convention.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// One entry in an executor's model catalog.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Value accepted by the CLI and by `model:` labels.
    pub value: &'static str,
    /// Human-readable listing line.
    pub name: &'static str,
}

/// Outcome of one executor run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Credits consumed, when the executor reports them.
    pub credits: Option<f64>,
    /// Wall-clock seconds, when the executor reports them.
    pub time_seconds: Option<u64>,
    /// Token count, when the executor reports one.
    pub tokens_used: Option<u64>,
}

/// Per-run knobs resolved from labels and config.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub model: Option<String>,
    /// Echo executor output as it arrives.
    pub verbose: bool,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Executor name as used in config, `executor:` labels, and logs.
    fn name(&self) -> &'static str;

    /// Binary probed by `validate_setup`.
    fn binary(&self) -> &'static str;

    /// Models this executor accepts, for the `executors` listing.
    fn available_models(&self) -> Vec<ModelInfo>;

    /// Environment problems that would make every run pointless. Empty means
    /// good to go.
    fn validate_setup(&self) -> Vec<String>;

    /// Run the executor in `cwd` with the prompt on stdin.
    async fn execute(&self, prompt: &str, cwd: &Path, options: &ExecutorOptions)
        -> ExecutionResult;
}

/// Look up an executor by name. Unknown names fall back to kiro.
pub fn create_executor(name: &str) -> Box<dyn Executor> {
    match name {
        "kiro" => Box::new(kiro::KiroExecutor),
        "codex" => Box::new(codex::CodexExecutor),
        other => {
            tracing::warn!(executor = other, "unknown executor, using kiro");
            Box::new(kiro::KiroExecutor)
        }
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R, echo: bool, to_stderr: bool) -> String {
    let mut all = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if echo {
                    use std::io::Write;
                    if to_stderr {
                        let _ = std::io::stderr().write_all(&buf[..n]);
                    } else {
                        let _ = std::io::stdout().write_all(&buf[..n]);
                    }
                }
                all.extend_from_slice(&buf[..n]);
            }
        }
    }
    String::from_utf8_lossy(&all).into_owned()
}

/// Spawn `binary args...` in `cwd`, write the prompt to stdin, and collect
/// output under the run ceiling. A timed-out child is killed and reported
/// with exit code 124 and a marker appended to stderr. A binary that cannot
/// be started is reported as a failed run, not an error, so the normal
/// failure path (labels, error comment) handles it.
pub(crate) async fn run_with_timeout(
    binary: &str,
    args: &[String],
    prompt: &str,
    cwd: &Path,
    verbose: bool,
) -> ExecutionResult {
    run_with_ceiling(binary, args, prompt, cwd, verbose, EXECUTION_TIMEOUT).await
}

async fn run_with_ceiling(
    binary: &str,
    args: &[String],
    prompt: &str,
    cwd: &Path,
    verbose: bool,
    ceiling: Duration,
) -> ExecutionResult {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult {
                success: false,
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("Failed to start {binary}: {e}"),
                credits: None,
                time_seconds: None,
                tokens_used: None,
            };
        }
    };

    // Both output pipes must be draining before the prompt goes in: the
    // prompt and an early output burst can each exceed the pipe buffer.
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        match stdout_pipe {
            Some(pipe) => drain(pipe, verbose, false).await,
            None => String::new(),
        }
    });
    let stderr_task = tokio::spawn(async move {
        match stderr_pipe {
            Some(pipe) => drain(pipe, verbose, true).await,
            None => String::new(),
        }
    });

    // The stdin write runs under the same ceiling as the wait; a child that
    // never reads its stdin still gets killed at the ceiling.
    let stdin = child.stdin.take();
    let feed = async move {
        if let Some(mut stdin) = stdin {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                tracing::warn!(binary, error = %e, "failed to write prompt to executor stdin");
            }
            // Dropping the handle closes the pipe so the child sees EOF.
        }
    };

    let timed = tokio::time::timeout(ceiling, async { tokio::join!(feed, child.wait()).1 });
    let status = match timed.await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!(binary, error = %e, "failed waiting on executor");
            None
        }
        Err(_) => {
            tracing::warn!(
                binary,
                timeout_secs = ceiling.as_secs(),
                "executor timed out, killing"
            );
            let _ = child.kill().await;
            let _ = child.wait().await;
            None
        }
    };

    // Killing the child closes the pipes, so these finish promptly.
    let stdout = stdout_task.await.unwrap_or_default();
    let mut stderr = stderr_task.await.unwrap_or_default();

    match status {
        Some(status) => ExecutionResult {
            success: status.success(),
            exit_code: status.code().unwrap_or(1),
            stdout,
            stderr,
            credits: None,
            time_seconds: None,
            tokens_used: None,
        },
        None => {
            stderr.push_str(&format!(
                "\n[TIMEOUT: Process killed after {} minutes]",
                ceiling.as_secs() / 60
            ));
            ExecutionResult {
                success: false,
                exit_code: TIMEOUT_EXIT_CODE,
                stdout,
                stderr,
                credits: None,
                time_seconds: None,
                tokens_used: None,
            }
        }
    }
}

/// Shared mock for dispatch tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub fn ok_with_stdout(stdout: &str) -> ExecutionResult {
        ExecutionResult {
            success: true,
            exit_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
            credits: None,
            time_seconds: None,
            tokens_used: None,
        }
    }

    pub fn failed(exit_code: i32, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            success: false,
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
            credits: None,
            time_seconds: None,
            tokens_used: None,
        }
    }

    /// Scripted executor: returns queued results in order and records every
    /// prompt it was given.
    pub struct MockExecutor {
        pub results: Mutex<VecDeque<ExecutionResult>>,
        pub prompts: Mutex<Vec<String>>,
        pub models: Mutex<Vec<Option<String>>>,
    }

    impl MockExecutor {
        pub fn with_results(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                prompts: Mutex::new(Vec::new()),
                models: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded_prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn recorded_models(&self) -> Vec<Option<String>> {
            self.models.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Executor for MockExecutor {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn binary(&self) -> &'static str {
            "mock"
        }

        fn available_models(&self) -> Vec<ModelInfo> {
            vec![]
        }

        fn validate_setup(&self) -> Vec<String> {
            vec![]
        }

        async fn execute(
            &self,
            prompt: &str,
            _cwd: &Path,
            options: &ExecutorOptions,
        ) -> ExecutionResult {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.models.lock().unwrap().push(options.model.clone());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ok_with_stdout(""))
        }
    }
}
