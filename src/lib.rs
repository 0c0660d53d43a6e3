// THEORY:
// This file is the entry point of the `pattern_sweep` library crate. The crate
// models the processing pipeline of a diffraction-pattern indexing tool as an
// ordered sequence of operations, and turns a set of candidate operations per
// stage into every pipeline configuration of a parameter sweep.
//
// The public surface is the `Experiment` API (`experiment`) together with the
// building blocks it is made of (`core_modules`): operations, the stage
// generator, the combination engine, runs and the persisted document. The
// image-processing itself is never done here; applications plug it in through
// `OperationExecutor`.

pub mod core_modules;
pub mod error;
pub mod experiment;

pub use core_modules::multiple_loop::CombinationGenerator;
pub use core_modules::operation::{Operation, OperationKind, StageCategory};
pub use core_modules::persist::{DuplicatePolicy, StageEntry, SweepDocument};
pub use core_modules::run::{
    InterruptHandle, OperationExecutor, ProgressSnapshot, Run, RunMonitor, RunState, StepContext,
};
pub use core_modules::stage_generator::{Combination, Item, StageGenerator};
pub use core_modules::stage_key::StageKey;
pub use error::{SweepError, SweepResult};
pub use experiment::{Experiment, ExperimentReport, RunOutcome, RunPlan, SweepConfig};
