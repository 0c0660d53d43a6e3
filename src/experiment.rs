// THEORY:
// The `experiment` module is the top-level API of the crate. It ties the sweep
// configuration (`StageGenerator`) to its execution (`Run`) and is what an
// application drives: populate a generator, wrap it into an `Experiment`, look
// at the plan, then execute it.
//
// Key architectural principles:
// 1.  **Plan Before Execution**: `plan()` is a pure projection of the generator.
//     It names every run and assigns its working directory, so a caller can show
//     or validate the whole batch without touching the filesystem.
// 2.  **Sequential Driving**: Runs are executed one after another on the calling
//     thread. Scheduling across threads is the application's business.
// 3.  **Batch Interruption**: All runs of an experiment share one
//     `InterruptHandle`. Interrupting the experiment stops the active run at its
//     next poll, and every run not yet started is skipped.
// 4.  **Outcome Reporting**: Every planned run yields a `RunOutcome`, including
//     the ones that were skipped, so reports always line up with the plan.

use crate::core_modules::operation::Operation;
use crate::core_modules::persist::DuplicatePolicy;
use crate::core_modules::run::{InterruptHandle, OperationExecutor, Run, RunState};
use crate::core_modules::stage_generator::StageGenerator;
use crate::core_modules::stage_key::StageKey;
use crate::error::SweepResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tunable settings of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Parent directory of every run's working directory.
    pub output_dir: PathBuf,
    /// Run names are `{run_name_prefix}{index:03}`.
    pub run_name_prefix: String,
    pub duplicate_policy: DuplicatePolicy,
    /// Skip the remaining runs after the first failed one.
    pub stop_on_failure: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("runs"),
            run_name_prefix: String::from("run"),
            duplicate_policy: DuplicatePolicy::default(),
            stop_on_failure: true,
        }
    }
}

/// One planned run: a name, a directory and the operations to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub index: usize,
    pub name: String,
    pub working_dir: PathBuf,
    pub operations: Vec<Operation>,
}

impl RunPlan {
    pub fn to_run(&self) -> Run {
        Run::new(self.operations.clone())
            .with_name(self.name.clone())
            .with_working_dir(self.working_dir.clone())
    }
}

/// Final record of one planned run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub name: String,
    pub working_dir: PathBuf,
    pub operations: Vec<String>,
    /// `Idle` when the run was skipped.
    pub state: RunState,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperimentReport {
    pub varied: Vec<String>,
    pub outcomes: Vec<RunOutcome>,
}

impl ExperimentReport {
    fn count(&self, state: RunState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn completed(&self) -> usize {
        self.count(RunState::Completed)
    }

    pub fn failed(&self) -> usize {
        self.count(RunState::Failed)
    }

    pub fn interrupted(&self) -> usize {
        self.count(RunState::Interrupted)
    }

    pub fn skipped(&self) -> usize {
        self.count(RunState::Idle)
    }

    /// True when every planned run completed.
    pub fn is_success(&self) -> bool {
        self.completed() == self.outcomes.len()
    }
}

/// A batch of runs spanning every combination of a `StageGenerator`.
pub struct Experiment {
    generator: StageGenerator,
    config: SweepConfig,
    interrupt: InterruptHandle,
}

impl Experiment {
    pub fn new(generator: StageGenerator, config: SweepConfig) -> Self {
        Self {
            generator,
            config,
            interrupt: InterruptHandle::new(),
        }
    }

    pub fn generator(&self) -> &StageGenerator {
        &self.generator
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Handle that interrupts the active run and skips the remaining ones.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn varied_keys(&self) -> Vec<StageKey> {
        self.generator.varied_keys()
    }

    pub fn run_name(&self, index: usize) -> String {
        format!("{}{:03}", self.config.run_name_prefix, index)
    }

    /// One plan per combination, in generation order.
    pub fn plan(&self) -> SweepResult<Vec<RunPlan>> {
        Ok(self
            .generator
            .combinations_operations()?
            .into_iter()
            .enumerate()
            .map(|(index, operations)| {
                let name = self.run_name(index);
                RunPlan {
                    index,
                    working_dir: self.config.output_dir.join(&name),
                    name,
                    operations,
                }
            })
            .collect())
    }

    /// Creates one idle run per planned combination, sharing the batch interrupt flag.
    pub fn build_runs(&self) -> SweepResult<Vec<Run>> {
        Ok(self
            .plan()?
            .iter()
            .map(|plan| plan.to_run().with_interrupt_handle(self.interrupt.clone()))
            .collect())
    }

    /// Executes every planned run in order.
    ///
    /// `make_executor` is called once per run that actually starts. Run failures
    /// are recorded in the report; only a failure to plan is returned as an error.
    pub fn execute<F, E>(&self, mut make_executor: F) -> SweepResult<ExperimentReport>
    where
        F: FnMut(&RunPlan) -> E,
        E: OperationExecutor,
    {
        let plans = self.plan()?;
        let mut report = ExperimentReport {
            varied: self.varied_keys().iter().map(StageKey::to_string).collect(),
            outcomes: Vec::with_capacity(plans.len()),
        };

        if plans.is_empty() {
            tracing::warn!("Experiment has no combinations; nothing to run");
            return Ok(report);
        }

        tracing::info!(
            runs = plans.len(),
            varied = report.varied.len(),
            output_dir = %self.config.output_dir.display(),
            "Starting experiment"
        );

        let mut halted = false;
        for plan in &plans {
            if halted || self.interrupt.is_interrupted() {
                tracing::debug!(run = %plan.name, "Skipping run");
                report.outcomes.push(outcome(plan, RunState::Idle, 0.0, None));
                continue;
            }

            let mut run = plan.to_run().with_interrupt_handle(self.interrupt.clone());
            let mut executor = make_executor(plan);
            let result = run.run(&mut executor);
            let error = result.as_ref().err().map(ToString::to_string);

            if run.state() == RunState::Failed && self.config.stop_on_failure {
                tracing::warn!(run = %plan.name, "Stopping experiment after failed run");
                halted = true;
            }
            report.outcomes.push(outcome(plan, run.state(), run.progress(), error));
        }

        tracing::info!(
            completed = report.completed(),
            failed = report.failed(),
            interrupted = report.interrupted(),
            skipped = report.skipped(),
            "Experiment finished"
        );
        Ok(report)
    }
}

fn outcome(plan: &RunPlan, state: RunState, progress: f64, error: Option<String>) -> RunOutcome {
    RunOutcome {
        name: plan.name.clone(),
        working_dir: plan.working_dir.clone(),
        operations: plan.operations.iter().map(ToString::to_string).collect(),
        state,
        progress,
        error,
    }
}
