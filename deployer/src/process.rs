//! Child process execution with captured output

use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::logs::Scrubber;

/// Exit status and captured streams of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Build an output value directly (used by fakes and tests)
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Run `command` to completion, optionally feeding `input` on stdin.
///
/// Both streams pass through `scrubber` before they leave this function.
/// A child killed by a signal reports exit code -1.
pub async fn capture(
    mut command: Command,
    input: Option<&str>,
    scrubber: &Scrubber,
) -> Result<CommandOutput, std::io::Error> {
    command
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;

    // Feed stdin from a task so a chatty child cannot block on a full pipe
    let stdin_task = match (child.stdin.take(), input) {
        (Some(mut stdin), Some(body)) => {
            let body = body.to_string();
            Some(tokio::spawn(async move {
                let _ = stdin.write_all(body.as_bytes()).await;
            }))
        }
        _ => None,
    };

    let output = child.wait_with_output().await?;
    if let Some(task) = stdin_task {
        let _ = task.await;
    }

    Ok(CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: scrubber.scrub(&String::from_utf8_lossy(&output.stdout)),
        stderr: scrubber.scrub(&String::from_utf8_lossy(&output.stderr)),
    })
}
