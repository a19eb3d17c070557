//! Operator prompts

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

use crate::errors::DeployError;

/// Asks the operator for a single value
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Ask for `label`; returns the raw answer, which may be empty
    async fn ask(&self, label: &str, default: Option<&str>) -> Result<String, DeployError>;
}

/// Prompts on stderr and reads answers from stdin
pub struct StdinPrompter {
    // One reader for the whole run so piped answers are not lost between prompts
    input: Mutex<BufReader<Stdin>>,
}

impl StdinPrompter {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for StdinPrompter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prompter for StdinPrompter {
    async fn ask(&self, label: &str, default: Option<&str>) -> Result<String, DeployError> {
        let question = match default {
            Some(value) => format!("{} [{}]: ", label, value),
            None => format!("{}: ", label),
        };
        let mut stderr = tokio::io::stderr();
        stderr.write_all(question.as_bytes()).await?;
        stderr.flush().await?;

        let mut line = String::new();
        let read = self.input.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Err(DeployError::Precondition(format!(
                "stdin closed while asking for {}",
                label
            )));
        }
        Ok(line.trim().to_string())
    }
}
