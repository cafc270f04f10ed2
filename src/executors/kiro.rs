//! kiro-cli executor (the default).

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{run_with_timeout, ExecutionResult, Executor, ExecutorOptions, ModelInfo};
use crate::parser::strip_ansi;

const BINARY: &str = "kiro-cli";

const KIRO_MODELS: &[ModelInfo] = &[
    ModelInfo {
        value: "auto",
        name: "Auto | picks the best available model | 1x credit",
    },
    ModelInfo {
        value: "claude-sonnet-4.5",
        name: "Claude Sonnet 4.5 | 1x credit",
    },
    ModelInfo {
        value: "claude-sonnet-4",
        name: "Claude Sonnet 4 | 1x credit",
    },
    ModelInfo {
        value: "claude-haiku-4.5",
        name: "Claude Haiku 4.5 | 0.3x credit",
    },
    ModelInfo {
        value: "claude-opus-4.5",
        name: "Claude Opus 4.5 | 2.2x credit",
    },
];

/// Usage footer printed at the end of a session:
/// `▸ Credits: 2.5 • Time: 3m 42s` (minutes optional).
static USAGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"▸\s*Credits:\s*([\d.]+)\s*•\s*Time:\s*(\d+)m?\s*(\d+)?s")
        .expect("BUG: usage pattern regex is invalid")
});

pub struct KiroExecutor;

impl KiroExecutor {
    fn build_args(model: Option<&str>) -> Vec<String> {
        let mut args = vec![
            "chat".to_string(),
            "--no-interactive".to_string(),
            "--trust-all-tools".to_string(),
        ];
        if let Some(model) = model {
            // "auto" means let kiro-cli pick; passing it through would fail.
            if model != "auto" {
                args.push("--model".to_string());
                args.push(model.to_string());
            }
        }
        args
    }
}

/// Readiness probe: `kiro-cli --version` exiting zero. A missing binary and
/// a broken install both fail it.
fn probe_ok() -> bool {
    std::process::Command::new(BINARY)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Extract `(credits, seconds)` from the usage footer. kiro-cli colors the
/// footer, so ANSI codes are stripped first.
fn parse_usage(output: &str) -> Option<(f64, u64)> {
    let clean = strip_ansi(output);
    let caps = USAGE_PATTERN.captures(&clean)?;
    let credits: f64 = caps[1].parse().ok()?;
    let seconds = match caps.get(3) {
        Some(secs) => {
            let minutes: u64 = caps[2].parse().ok()?;
            minutes * 60 + secs.as_str().parse::<u64>().ok()?
        }
        None => caps[2].parse().ok()?,
    };
    Some((credits, seconds))
}

#[async_trait]
impl Executor for KiroExecutor {
    fn name(&self) -> &'static str {
        "kiro"
    }

    fn binary(&self) -> &'static str {
        BINARY
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        KIRO_MODELS.to_vec()
    }

    fn validate_setup(&self) -> Vec<String> {
        if probe_ok() {
            return vec![];
        }
        vec!["kiro-cli not installed. See: https://kiro.dev/docs/cli/installation".to_string()]
    }

    async fn execute(
        &self,
        prompt: &str,
        cwd: &Path,
        options: &ExecutorOptions,
    ) -> ExecutionResult {
        let args = Self::build_args(options.model.as_deref());
        let mut result = run_with_timeout(BINARY, &args, prompt, cwd, options.verbose).await;
        let combined = format!("{}\n{}", result.stdout, result.stderr);
        if let Some((credits, seconds)) = parse_usage(&combined) {
            result.credits = Some(credits);
            result.time_seconds = Some(seconds);
        }
        result
    }
}
