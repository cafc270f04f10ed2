//! Codex CLI executor.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{run_with_timeout, ExecutionResult, Executor, ExecutorOptions, ModelInfo};
use crate::parser::strip_ansi;

const BINARY: &str = "codex";

const CODEX_MODELS: &[ModelInfo] = &[
    ModelInfo {
        value: "gpt-5.2-codex",
        name: "GPT-5.2 Codex | default coding model",
    },
    ModelInfo {
        value: "gpt-5.2",
        name: "GPT-5.2 | general purpose",
    },
    ModelInfo {
        value: "gpt-5.1-codex-max",
        name: "GPT-5.1 Codex Max | long-running tasks",
    },
    ModelInfo {
        value: "gpt-5.1-codex-mini",
        name: "GPT-5.1 Codex Mini | fast and cheap",
    },
];

/// Token usage line, e.g. `Tokens used: 12,345`. Codex has varied the exact
/// wording across releases, so the match is loose.
static TOKENS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)tokens?\s*(?:used)?:?\s*(\d[\d,]*)")
        .expect("BUG: tokens pattern regex is invalid")
});

pub struct CodexExecutor;

impl CodexExecutor {
    fn build_args(model: Option<&str>) -> Vec<String> {
        let mut args = vec!["--ask-for-approval".to_string(), "never".to_string()];
        if let Some(model) = model {
            if model != "auto" {
                args.push("-m".to_string());
                args.push(model.to_string());
            }
        }
        args.push("exec".to_string());
        args.push("--sandbox".to_string());
        args.push("danger-full-access".to_string());
        args
    }
}

/// Readiness probe: `codex --version` exiting zero.
fn probe_ok() -> bool {
    std::process::Command::new(BINARY)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn parse_tokens(output: &str) -> Option<u64> {
    let clean = strip_ansi(output);
    let caps = TOKENS_PATTERN.captures(&clean)?;
    caps[1].replace(',', "").parse().ok()
}

#[async_trait]
impl Executor for CodexExecutor {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn binary(&self) -> &'static str {
        BINARY
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        CODEX_MODELS.to_vec()
    }

    fn validate_setup(&self) -> Vec<String> {
        if probe_ok() {
            return vec![];
        }
        vec!["Codex CLI not installed. Run: npm install -g @openai/codex".to_string()]
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
        result.tokens_used = parse_tokens(&combined);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_run_headless_exec() {
        assert_eq!(
            CodexExecutor::build_args(None),
            vec![
                "--ask-for-approval",
                "never",
                "exec",
                "--sandbox",
                "danger-full-access"
            ]
        );
    }

    #[test]
    fn args_place_model_before_exec() {
        assert_eq!(
            CodexExecutor::build_args(Some("gpt-5.2-codex")),
            vec![
                "--ask-for-approval",
                "never",
                "-m",
                "gpt-5.2-codex",
                "exec",
                "--sandbox",
                "danger-full-access"
            ]
        );
    }

    #[test]
    fn args_skip_auto_model() {
        assert_eq!(
            CodexExecutor::build_args(Some("auto")),
            vec![
                "--ask-for-approval",
                "never",
                "exec",
                "--sandbox",
                "danger-full-access"
            ]
        );
    }

    #[test]
    fn parse_tokens_strips_commas() {
        assert_eq!(parse_tokens("done\nTokens used: 12,345\n"), Some(12345));
    }

    #[test]
    fn parse_tokens_accepts_short_form() {
        assert_eq!(parse_tokens("tokens: 987"), Some(987));
    }

    #[test]
    fn parse_tokens_absent() {
        assert_eq!(parse_tokens("no usage reported"), None);
    }

    #[test]
    fn model_catalog_matches_override_labels() {
        let models = CodexExecutor.available_models();
        assert_eq!(models.len(), 4);
        assert!(models.iter().any(|m| m.value == "gpt-5.2-codex"));
        assert!(models.iter().any(|m| m.value == "gpt-5.1-codex-mini"));
    }

    #[test]
    fn validate_mentions_install_command_when_missing() {
        let problems = CodexExecutor.validate_setup();
        if probe_ok() {
            assert!(problems.is_empty());
        } else {
            assert_eq!(problems.len(), 1);
            assert!(problems[0].contains("npm install"));
        }
    }
}
