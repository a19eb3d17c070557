//! Data-described remote steps
//!
//! A step is a command (or script), an optional guard that reports the step
//! as already satisfied, and a policy saying whether a non-zero exit aborts
//! the run. Connectivity errors always abort, whatever the policy.

use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::process::CommandOutput;
use crate::remote::executor::RemoteExecutor;
use crate::remote::target::RemoteTarget;

/// What a non-zero exit of the step's action means for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    Fatal,
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Command(String),
    Script(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStep {
    pub name: String,
    pub action: StepAction,

    /// Command that exits 0 when the step has nothing to do
    pub guard: Option<String>,

    pub policy: StepPolicy,

    /// Log captured stdout at info level instead of debug
    pub echo_output: bool,
}

impl RemoteStep {
    pub fn command(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::new(name, StepAction::Command(command.into()))
    }

    pub fn script(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name, StepAction::Script(body.into()))
    }

    fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            guard: None,
            policy: StepPolicy::Fatal,
            echo_output: false,
        }
    }

    /// Skip the action when `guard` exits 0
    pub fn unless(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.policy = StepPolicy::BestEffort;
        self
    }

    pub fn echo_output(mut self) -> Self {
        self.echo_output = true;
        self
    }
}

/// How a step ended, when it did not abort the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The guard reported the step as already satisfied
    Skipped,

    Applied(CommandOutput),

    /// A best-effort action failed and the run continues
    Tolerated(CommandOutput),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
}

/// Run one step against `target`
pub async fn run_step(
    executor: &dyn RemoteExecutor,
    target: &RemoteTarget,
    step: &RemoteStep,
) -> Result<StepOutcome, DeployError> {
    if let Some(guard) = &step.guard {
        let check = executor.execute(target, guard).await?;
        if check.success() {
            debug!(step = %step.name, "Already satisfied, skipping");
            return Ok(StepOutcome::Skipped);
        }
    }

    info!(step = %step.name, "Running step");
    let output = match &step.action {
        StepAction::Command(command) => executor.execute(target, command).await?,
        StepAction::Script(body) => executor.execute_script(target, body).await?,
    };
    log_output(step, &output);

    if output.success() {
        return Ok(StepOutcome::Applied(output));
    }

    match step.policy {
        StepPolicy::Fatal => Err(DeployError::command(
            &step.name,
            output.exit_code,
            &output.stderr,
        )),
        StepPolicy::BestEffort => {
            warn!(
                step = %step.name,
                exit_code = output.exit_code,
                "Best-effort step failed, continuing"
            );
            Ok(StepOutcome::Tolerated(output))
        }
    }
}

/// Run `steps` in order, stopping at the first fatal failure
pub async fn run_steps(
    executor: &dyn RemoteExecutor,
    target: &RemoteTarget,
    steps: &[RemoteStep],
) -> Result<Vec<StepReport>, DeployError> {
    let mut reports = Vec::with_capacity(steps.len());
    for step in steps {
        let outcome = run_step(executor, target, step).await?;
        reports.push(StepReport {
            name: step.name.clone(),
            outcome,
        });
    }
    Ok(reports)
}

fn log_output(step: &RemoteStep, output: &CommandOutput) {
    for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
        if step.echo_output {
            info!(step = %step.name, "{}", line);
        } else {
            debug!(step = %step.name, "{}", line);
        }
    }
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        if step.echo_output || !output.success() {
            warn!(step = %step.name, "{}", line);
        } else {
            debug!(step = %step.name, "{}", line);
        }
    }
}
