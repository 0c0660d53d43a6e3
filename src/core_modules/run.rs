// THEORY:
// A `Run` is one execution of one pipeline configuration: the ordered operation
// sequence produced for a single combination. It does not know how to execute
// an operation; it hands every step to an `OperationExecutor` and owns
// everything around that call.
//
// Key architectural principles:
// 1.  **Explicit Lifecycle**: A run starts `Idle`, becomes `Active` when `run` is
//     called and ends in exactly one terminal state: `Completed`, `Interrupted`
//     or `Failed`. A run is executed at most once.
// 2.  **Cooperative Cancellation**: Interruption is a shared atomic flag. Any
//     thread holding an `InterruptHandle` may set it; the run polls it between
//     steps (and executors may poll it inside long steps). Nothing is ever
//     stopped preemptively. The flag is sticky: once set it stays set.
// 3.  **Observable Progress**: Progress, status and the current step index are
//     mirrored into a `RunMonitor`, which other threads can read while the run
//     is executing.
// 4.  **Working Directory**: Each run owns a directory for its outputs. It is
//     created lazily on the first `run` call; an existing directory is reused,
//     and failing to create it is fatal to the run.

use crate::core_modules::operation::Operation;
use crate::error::{SweepError, SweepResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Name given to runs that were never named.
pub const UNTITLED: &str = "Untitled";

/// Lifecycle state of a `Run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Active,
    Completed,
    Interrupted,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Interrupted | RunState::Failed)
    }
}

/// Cloneable handle used to request the interruption of a run from any thread.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests interruption. Returns immediately; the run stops at its next poll.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of a run, as published to its monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub state: RunState,
    /// Fraction of the operation sequence already executed, in [0.0, 1.0].
    pub progress: f64,
    pub status: String,
    pub current_index: Option<usize>,
}

/// Read-only, thread-safe view of a run's progress.
#[derive(Debug, Clone)]
pub struct RunMonitor {
    snapshot: Arc<Mutex<ProgressSnapshot>>,
}

impl RunMonitor {
    fn new() -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(ProgressSnapshot {
                state: RunState::Idle,
                progress: 0.0,
                status: String::new(),
                current_index: None,
            })),
        }
    }

    fn publish(&self, snapshot: ProgressSnapshot) {
        *self.snapshot.lock() = snapshot;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn state(&self) -> RunState {
        self.snapshot.lock().state
    }

    pub fn progress(&self) -> f64 {
        self.snapshot.lock().progress
    }

    /// Index of the step being executed. Fails outside the `Active` state.
    pub fn current_index(&self) -> SweepResult<usize> {
        let snapshot = self.snapshot.lock();
        current_index_in(snapshot.state, snapshot.current_index)
    }
}

/// What an executor gets to know about the step it is asked to perform.
#[derive(Debug)]
pub struct StepContext<'a> {
    /// Zero-based position of the step in the operation sequence.
    pub index: usize,
    /// Length of the operation sequence.
    pub total: usize,
    pub run_name: &'a str,
    pub working_dir: &'a Path,
    interrupt: &'a InterruptHandle,
}

impl StepContext<'_> {
    /// Lets long-running steps poll for interruption themselves.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }
}

/// Performs the actual work of an operation. Implemented by the application.
pub trait OperationExecutor {
    fn execute(&mut self, step: &StepContext<'_>, operation: &Operation) -> SweepResult<()>;
}

impl<F> OperationExecutor for F
where
    F: FnMut(&StepContext<'_>, &Operation) -> SweepResult<()>,
{
    fn execute(&mut self, step: &StepContext<'_>, operation: &Operation) -> SweepResult<()> {
        self(step, operation)
    }
}

/// A single, interruptible execution of an ordered operation sequence.
#[derive(Debug)]
pub struct Run {
    name: String,
    working_dir: PathBuf,
    operations: Vec<Operation>,
    state: RunState,
    progress: f64,
    status: String,
    current_index: Option<usize>,
    interrupt: InterruptHandle,
    monitor: RunMonitor,
}

impl Run {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            name: UNTITLED.to_string(),
            working_dir: PathBuf::from("."),
            operations,
            state: RunState::Idle,
            progress: 0.0,
            status: String::new(),
            current_index: None,
            interrupt: InterruptHandle::new(),
            monitor: RunMonitor::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Shares an interruption flag with other runs (e.g. a whole experiment).
    pub fn with_interrupt_handle(mut self, handle: InterruptHandle) -> Self {
        self.interrupt = handle;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Current status text, prefixed by the step index while active.
    pub fn status(&self) -> String {
        match (self.state, self.current_index) {
            (RunState::Active, Some(index)) => format!("[{}] {}", index, self.status),
            _ => self.status.clone(),
        }
    }

    /// Index of the step being executed. Fails outside the `Active` state.
    pub fn current_index(&self) -> SweepResult<usize> {
        current_index_in(self.state, self.current_index)
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn monitor(&self) -> RunMonitor {
        self.monitor.clone()
    }

    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Creates the working directory if it does not exist yet.
    pub fn ensure_working_dir(&self) -> SweepResult<&Path> {
        if !self.working_dir.is_dir() {
            std::fs::create_dir_all(&self.working_dir).map_err(|source| SweepError::DirectoryCreation {
                path: self.working_dir.clone(),
                source,
            })?;
            tracing::debug!(run = %self.name, dir = %self.working_dir.display(), "Created working directory");
        }
        Ok(&self.working_dir)
    }

    /// Executes the operation sequence step by step.
    ///
    /// Returns `Completed` or `Interrupted`. A failing step leaves the run
    /// `Failed` and its error is returned.
    pub fn run<E>(&mut self, executor: &mut E) -> SweepResult<RunState>
    where
        E: OperationExecutor + ?Sized,
    {
        if self.state != RunState::Idle {
            return Err(SweepError::InvalidState(format!(
                "run '{}' cannot start from {:?}",
                self.name, self.state
            )));
        }

        let total = self.operations.len();
        self.state = RunState::Active;
        self.current_index = Some(0);
        self.set_status("Starting");
        tracing::info!(run = %self.name, steps = total, dir = %self.working_dir.display(), "Run started");

        if let Err(err) = self.ensure_working_dir() {
            self.fail(&err);
            return Err(err);
        }

        for index in 0..total {
            if self.interrupt.is_interrupted() {
                return Ok(self.finish(RunState::Interrupted, "Interrupted"));
            }

            let operation = &self.operations[index];
            self.current_index = Some(index);
            self.progress = index as f64 / total as f64;
            self.status = format!("Executing {}", operation);
            self.publish();
            tracing::trace!(run = %self.name, index, operation = %operation, "Executing step");

            let step = StepContext {
                index,
                total,
                run_name: &self.name,
                working_dir: &self.working_dir,
                interrupt: &self.interrupt,
            };
            if let Err(err) = executor.execute(&step, operation) {
                let err = match err {
                    err @ SweepError::Execution { .. } => err,
                    other => SweepError::Execution {
                        index,
                        operation: operation.to_string(),
                        message: other.to_string(),
                    },
                };
                self.fail(&err);
                return Err(err);
            }
        }

        Ok(self.finish(RunState::Completed, "Completed"))
    }

    /// Updates the status text; shown with the step index prefix while active.
    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.publish();
    }

    fn finish(&mut self, state: RunState, status: &str) -> RunState {
        if state == RunState::Completed {
            self.progress = 1.0;
        }
        self.state = state;
        self.current_index = None;
        self.status = status.to_string();
        self.publish();

        match state {
            RunState::Interrupted => {
                tracing::warn!(run = %self.name, progress = self.progress, "Run interrupted")
            }
            _ => tracing::info!(run = %self.name, "Run completed"),
        }
        state
    }

    fn fail(&mut self, err: &SweepError) {
        self.state = RunState::Failed;
        self.current_index = None;
        self.status = format!("Failed: {}", err);
        self.publish();
        tracing::error!(run = %self.name, error = %err, "Run failed");
    }

    fn publish(&self) {
        self.monitor.publish(ProgressSnapshot {
            state: self.state,
            progress: self.progress,
            status: self.status(),
            current_index: self.current_index,
        });
    }
}

fn current_index_in(state: RunState, index: Option<usize>) -> SweepResult<usize> {
    match (state, index) {
        (RunState::Active, Some(index)) => Ok(index),
        _ => Err(SweepError::InvalidState(format!(
            "no current index while {:?}",
            state
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn sequence() -> Vec<Operation> {
        vec![
            Operation::Smoothing { kernel_size: 3 },
            Operation::HoughTransform { resolution: 1.0 },
            Operation::Threshold { value: 10 },
        ]
    }

    fn noop(_: &StepContext<'_>, _: &Operation) -> SweepResult<()> {
        Ok(())
    }

    #[test]
    fn defaults() {
        let run = Run::new(Vec::new());
        assert_eq!(run.name(), UNTITLED);
        assert_eq!(run.working_dir(), Path::new("."));
        assert_eq!(run.state(), RunState::Idle);
        assert_eq!(run.progress(), 0.0);
        assert!(!run.is_interrupted());
    }

    #[test]
    fn current_index_is_invalid_before_and_after_run() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());

        assert!(matches!(run.current_index(), Err(SweepError::InvalidState(_))));
        assert!(matches!(run.monitor().current_index(), Err(SweepError::InvalidState(_))));

        run.run(&mut noop).unwrap();
        assert!(matches!(run.current_index(), Err(SweepError::InvalidState(_))));
    }

    #[test]
    fn index_is_observable_while_active() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());
        let monitor = run.monitor();
        let mut seen = Vec::new();

        let mut executor = |step: &StepContext<'_>, _: &Operation| -> SweepResult<()> {
            let snapshot = monitor.snapshot();
            assert_eq!(snapshot.state, RunState::Active);
            assert!(snapshot.status.starts_with(&format!("[{}] Executing", step.index)));
            seen.push(monitor.current_index()?);
            Ok(())
        };
        let state = run.run(&mut executor).unwrap();

        assert_eq!(state, RunState::Completed);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(run.progress(), 1.0);
        assert_eq!(run.status(), "Completed");
    }

    #[test]
    fn steps_are_executed_in_sequence_order() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());
        let mut executed = Vec::new();

        run.run(&mut |step: &StepContext<'_>, op: &Operation| -> SweepResult<()> {
            assert_eq!(step.total, 3);
            executed.push(op.clone());
            Ok(())
        })
        .unwrap();

        assert_eq!(executed, sequence());
    }

    #[test]
    fn working_dir_is_created_lazily() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("nested").join("run_000");
        let mut run = Run::new(sequence()).with_working_dir(&target);

        assert!(!target.exists());
        run.run(&mut noop).unwrap();
        assert!(target.is_dir());

        // Reusing an existing directory is fine.
        let mut again = Run::new(sequence()).with_working_dir(&target);
        assert_eq!(again.run(&mut noop).unwrap(), RunState::Completed);
    }

    #[test]
    fn directory_creation_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"not a directory").unwrap();
        let mut run = Run::new(sequence()).with_working_dir(file.join("run"));

        let err = run.run(&mut noop).unwrap_err();
        assert!(matches!(err, SweepError::DirectoryCreation { .. }));
        assert_eq!(run.state(), RunState::Failed);
        assert!(run.state().is_terminal());
    }

    #[test]
    fn executor_failure_fails_the_run() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());
        let mut calls = 0;

        let err = run
            .run(&mut |step: &StepContext<'_>, _: &Operation| -> SweepResult<()> {
                calls += 1;
                if step.index == 1 {
                    return Err(SweepError::InvalidState("boom".into()));
                }
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, SweepError::Execution { index: 1, .. }));
        assert_eq!(calls, 2);
        assert_eq!(run.state(), RunState::Failed);
        assert!(run.status().starts_with("Failed"));
    }

    #[test]
    fn a_run_executes_only_once() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());
        run.run(&mut noop).unwrap();

        let err = run.run(&mut noop).unwrap_err();
        assert!(matches!(err, SweepError::InvalidState(_)));
    }

    #[test]
    fn interruption_from_another_thread_is_observed_at_next_poll() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());
        let handle = run.interrupt_handle();
        let mut executed = 0;

        let state = run
            .run(&mut |step: &StepContext<'_>, _: &Operation| -> SweepResult<()> {
                executed += 1;
                if step.index == 0 {
                    let handle = handle.clone();
                    thread::spawn(move || handle.interrupt()).join().unwrap();
                    assert!(step.is_interrupted());
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(state, RunState::Interrupted);
        assert_eq!(executed, 1);
        assert!(run.progress() < 1.0);
        assert!(run.is_interrupted());
    }

    #[test]
    fn interruption_requested_before_start_persists() {
        let dir = tempdir().unwrap();
        let mut run = Run::new(sequence()).with_working_dir(dir.path());
        run.interrupt();

        let state = run
            .run(&mut |_: &StepContext<'_>, _: &Operation| -> SweepResult<()> {
                panic!("no step should execute")
            })
            .unwrap();
        assert_eq!(state, RunState::Interrupted);
    }

    #[test]
    fn status_has_no_prefix_when_idle() {
        let mut run = Run::new(sequence()).with_name("run_007");
        run.set_status("Waiting");
        assert_eq!(run.status(), "Waiting");
        assert_eq!(run.monitor().snapshot().status, "Waiting");
        assert_eq!(run.name(), "run_007");
    }
}
