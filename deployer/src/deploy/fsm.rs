//! Finite State Machine for a deployment run

use std::fmt;

use serde::{Deserialize, Serialize};

/// Run stage, in execution order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Nothing started yet
    #[default]
    Pending,

    /// Cloning or updating the local checkout
    Staging,

    /// Local preconditions (key file readable)
    Checking,

    /// Connectivity probe
    Connecting,

    Syncing,
    Provisioning,
    Deploying,
    ConfiguringProxy,
    Validating,

    /// Every stage finished
    Completed,

    /// A fatal error stopped the run
    Failed,

    /// A signal stopped the run
    Interrupted,
}

impl RunStage {
    /// The stage that follows a successful `self`
    pub fn next(self) -> Option<RunStage> {
        use RunStage::*;
        match self {
            Pending => Some(Staging),
            Staging => Some(Checking),
            Checking => Some(Connecting),
            Connecting => Some(Syncing),
            Syncing => Some(Provisioning),
            Provisioning => Some(Deploying),
            Deploying => Some(ConfiguringProxy),
            ConfiguringProxy => Some(Validating),
            Validating => Some(Completed),
            Completed | Failed | Interrupted => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStage::Completed | RunStage::Failed | RunStage::Interrupted
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Pending => "pending",
            RunStage::Staging => "staging source",
            RunStage::Checking => "checking local preconditions",
            RunStage::Connecting => "connecting",
            RunStage::Syncing => "syncing files",
            RunStage::Provisioning => "provisioning",
            RunStage::Deploying => "deploying",
            RunStage::ConfiguringProxy => "configuring proxy",
            RunStage::Validating => "validating",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
            RunStage::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The current stage finished successfully
    Advance,

    /// The current stage failed fatally
    Fail,

    /// An interrupt signal arrived
    Interrupt,
}

/// Run FSM
#[derive(Debug, Clone)]
pub struct RunFsm {
    stage: RunStage,
    failed_at: Option<RunStage>,
}

impl RunFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            stage: RunStage::Pending,
            failed_at: None,
        }
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    /// Stage that was running when the run failed or was interrupted
    pub fn failed_at(&self) -> Option<RunStage> {
        self.failed_at
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<RunStage, String> {
        let current = self.stage;
        let new_stage = match (current, event) {
            (stage, event) if stage.is_terminal() => {
                return Err(format!("Invalid transition: {:?} -> {:?}", stage, event));
            }
            (stage, RunEvent::Advance) => stage
                .next()
                .ok_or_else(|| format!("Invalid transition: {:?} -> Advance", stage))?,
            (stage, RunEvent::Fail) => {
                self.failed_at = Some(stage);
                RunStage::Failed
            }
            (stage, RunEvent::Interrupt) => {
                self.failed_at = Some(stage);
                RunStage::Interrupted
            }
        };

        self.stage = new_stage;
        Ok(new_stage)
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}
