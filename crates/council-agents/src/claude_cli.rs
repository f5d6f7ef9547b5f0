use std::process::Output;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::LlmError;

const CLAUDE_BIN: &str = "claude";

/// Stderr beyond this many characters is cut from error messages.
const STDERR_LIMIT: usize = 512;

/// One non-interactive `claude -p` call.
#[derive(Debug, Clone)]
pub struct ClaudeInvocation<'a> {
    pub system_prompt: &'a str,
    pub prompt: &'a str,
    pub model: &'a str,
    pub timeout: Duration,
}

impl<'a> ClaudeInvocation<'a> {
    /// Command-line arguments, without the binary name.
    pub fn args(&self) -> [&'a str; 8] {
        [
            "-p",
            self.prompt,
            "--system-prompt",
            self.system_prompt,
            "--model",
            self.model,
            "--output-format",
            "text",
        ]
    }

    /// Run the CLI and return its stdout. The child is killed if the call
    /// times out.
    pub async fn run(&self) -> Result<String, LlmError> {
        debug!(model = self.model, timeout_s = self.timeout.as_secs(), "Invoking claude CLI");

        let mut command = Command::new(CLAUDE_BIN);
        command.args(self.args()).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| LlmError::Unavailable(format!("failed to spawn {CLAUDE_BIN}: {e}")))?;

        read_output(output)
    }
}

/// Turn a finished process into reply text or a typed error.
fn read_output(output: Output) -> Result<String, LlmError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr: String = stderr.trim().chars().take(STDERR_LIMIT).collect();
        warn!(status = %output.status, stderr = %stderr, "Claude CLI failed");
        return Err(LlmError::Cli(format!("{CLAUDE_BIN} exited {}: {stderr}", output.status)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(stdout)
}

/// Whether `claude --version` runs successfully.
pub async fn check_cli_available() -> bool {
    Command::new(CLAUDE_BIN)
        .arg("--version")
        .output()
        .await
        .is_ok_and(|output| output.status.success())
}
