// Command-line driver for `pattern_sweep`.
//
// Loads a sweep document, prints the run plan and, unless `--dry-run` is given,
// executes every run with an executor that records each step into the run's
// working directory. Ctrl-C interrupts the experiment cooperatively.

use anyhow::{Context, Result, bail};
use clap::Parser;
use pattern_sweep::core_modules::registry;
use pattern_sweep::{
    DuplicatePolicy, Experiment, Operation, OperationExecutor, StageCategory, StepContext,
    SweepDocument, SweepResult,
};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pattern_sweep")]
#[command(about = "Enumerate and run every pipeline configuration of a parameter sweep")]
struct Cli {
    /// Sweep document (JSON).
    #[arg(required_unless_present = "list_operations")]
    document: Option<PathBuf>,

    /// Parent directory of the run directories. Overrides the document's setting.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Print the plan without executing any run.
    #[arg(long)]
    dry_run: bool,

    /// Fail when the document repeats a stage key instead of keeping the first entry.
    #[arg(long)]
    reject_duplicates: bool,

    /// Carry on with the remaining runs after a failed one.
    #[arg(long)]
    keep_going: bool,

    /// List the available operations, or describe the one with the given type
    /// name (e.g. `pre_transform.smoothing`), and exit.
    #[arg(long, value_name = "TYPE", num_args = 0..=1)]
    list_operations: Option<Option<String>>,
}

/// Appends one line per executed step to `steps.log` in the run directory.
struct StepRecorder;

impl OperationExecutor for StepRecorder {
    fn execute(&mut self, step: &StepContext<'_>, operation: &Operation) -> SweepResult<()> {
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(step.working_dir.join("steps.log"))?;
        writeln!(log, "{}\t{}\t{}", step.index, operation.kind(), operation)?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if let Some(type_name) = cli.list_operations {
        match type_name {
            Some(type_name) => describe_operation(&type_name)?,
            None => list_operations(),
        }
        return Ok(());
    }

    let Some(path) = cli.document else {
        bail!("no sweep document given");
    };
    let json = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let document = SweepDocument::from_json_str(&json).with_context(|| format!("parsing {}", path.display()))?;

    let mut config = document.config.clone().unwrap_or_default();
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = output_dir;
    }
    if cli.reject_duplicates {
        config.duplicate_policy = DuplicatePolicy::Reject;
    }
    if cli.keep_going {
        config.stop_on_failure = false;
    }

    let generator = document.to_generator(config.duplicate_policy)?;
    let experiment = Experiment::new(generator, config);
    let plan = experiment.plan()?;

    if plan.is_empty() {
        bail!("{} defines no candidate operations", path.display());
    }

    println!("{} run(s), swept stages:", plan.len());
    for key in experiment.varied_keys() {
        println!("  {}", key);
    }
    for run in &plan {
        let steps: Vec<String> = run.operations.iter().map(ToString::to_string).collect();
        println!("{} -> {}", run.name, steps.join(" | "));
    }

    if cli.dry_run {
        return Ok(());
    }

    let interrupt = experiment.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt requested, stopping after the current step");
            interrupt.interrupt();
        }
    });

    let output_dir = experiment.config().output_dir.clone();
    let report = tokio::task::spawn_blocking(move || experiment.execute(|_| StepRecorder)).await??;

    tokio::fs::create_dir_all(&output_dir).await?;
    let report_path = output_dir.join("report.json");
    tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?).await?;

    println!(
        "completed: {}, failed: {}, interrupted: {}, skipped: {} (report: {})",
        report.completed(),
        report.failed(),
        report.interrupted(),
        report.skipped(),
        report_path.display()
    );

    if !report.is_success() {
        bail!("not every run completed");
    }
    Ok(())
}

fn list_operations() {
    for category in StageCategory::ALL {
        println!("{}:", category);
        for descriptor in registry::by_category(category) {
            println!("  {:<42} {} (default: {})", descriptor.type_name(), descriptor.label, (descriptor.create)());
        }
    }
}

fn describe_operation(type_name: &str) -> Result<()> {
    let descriptor = registry::lookup(type_name)?;
    println!("{}", descriptor.type_name());
    println!("  label:    {}", descriptor.label);
    println!("  category: {}", descriptor.category());
    println!("  default:  {}", (descriptor.create)());
    println!("  json:     {}", serde_json::to_string(&(descriptor.create)())?);
    Ok(())
}
