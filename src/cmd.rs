//! Extension traits for `tokio::process::Command` / `std::process::Command`
//! that name the binary in spawn errors. Everything here shells out a lot
//! (`git`, `gh`, `kiro-cli`, `codex`, `kill`), and a bare "No such file or
//! directory" is useless without knowing which one was missing.

/// Async command helpers that attach the program name to failures.
pub trait CommandErrorContext {
    /// Like `.output()` but the error says which program failed to start.
    fn output_with_context(
        &mut self,
    ) -> impl std::future::Future<Output = anyhow::Result<std::process::Output>>;

    /// Like `.spawn()` but the error says which program failed to start.
    fn spawn_with_context(&mut self) -> anyhow::Result<tokio::process::Child>;
}

impl CommandErrorContext for tokio::process::Command {
    async fn output_with_context(&mut self) -> anyhow::Result<std::process::Output> {
        let prog = program_name(self.as_std());
        self.output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute `{prog}`: {e}"))
    }

    fn spawn_with_context(&mut self) -> anyhow::Result<tokio::process::Child> {
        let prog = program_name(self.as_std());
        self.spawn()
            .map_err(|e| anyhow::anyhow!("failed to execute `{prog}`: {e}"))
    }
}

/// Blocking counterpart for the signal checks that run outside the runtime.
pub trait SyncCommandErrorContext {
    fn status_with_context(&mut self) -> anyhow::Result<std::process::ExitStatus>;
}

impl SyncCommandErrorContext for std::process::Command {
    fn status_with_context(&mut self) -> anyhow::Result<std::process::ExitStatus> {
        let prog = program_name(self);
        self.status()
            .map_err(|e| anyhow::anyhow!("failed to execute `{prog}`: {e}"))
    }
}

fn program_name(cmd: &std::process::Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_error_names_the_program() {
        let err = tokio::process::Command::new("definitely-not-a-real-binary-xyz")
            .output_with_context()
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn sync_missing_binary_error_names_the_program() {
        let err = std::process::Command::new("definitely-not-a-real-binary-xyz")
            .status_with_context()
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("definitely-not-a-real-binary-xyz"));
    }
}
