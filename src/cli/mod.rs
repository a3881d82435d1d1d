//! CLI subcommands: init, validate, synth, plan, drift, status, stages.

use crate::core::assembler::{self, StackKind};
use crate::core::synth::{self, SynthConfig};
use crate::core::types::{AssemblyEnv, ExecutionPlan, PlanAction, ProjectConfig, ProvenanceEvent, Stage};
use crate::core::{naming, parser, planner, state};
use crate::tripwire::{drift, eventlog};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG: &str = "stackforge.yaml";

#[derive(Parser, Debug)]
#[command(
    name = "stackforge",
    version,
    about = "Delivery-pipeline stacks as code: shared registries, dev/prod pipelines, deterministic templates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stackforge project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Application name used in the generated project file
        #[arg(long, default_value = "example-app")]
        app: String,
    },

    /// Validate stackforge.yaml without assembling
    Validate {
        /// Path to stackforge.yaml
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        file: PathBuf,
    },

    /// Assemble every stack and write templates plus manifest
    Synth {
        /// Path to stackforge.yaml
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        file: PathBuf,

        /// Output directory for templates and manifest.json
        #[arg(short, long, default_value = "cdk.out")]
        out: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Write a single stack
        #[arg(short, long)]
        stack: Option<String>,

        /// Assemble and hash without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show resource-level changes since the last synth
    Plan {
        /// Path to stackforge.yaml
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target a single stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Detect hand edits to written templates (tripwire)
    Drift {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target a single stack
        #[arg(short, long)]
        stack: Option<String>,

        /// Exit non-zero on any drift (for CI)
        #[arg(long)]
        tripwire: bool,
    },

    /// Show recorded state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target a single stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print stage list, naming prefix and network topology per pipeline
    Stages {
        /// Path to stackforge.yaml
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        file: PathBuf,
    },

    /// Print the JSON Schema of stackforge.yaml
    Schema,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Target environment from the process, read once per command.
fn ambient_env() -> AssemblyEnv {
    AssemblyEnv::from_lookup(|key| std::env::var(key).ok())
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path, app } => cmd_init(&path, &app),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Synth {
            file,
            out,
            state_dir,
            stack,
            dry_run,
        } => cmd_synth(&file, &out, &state_dir, stack.as_deref(), dry_run, &ambient_env()),
        Commands::Plan {
            file,
            state_dir,
            stack,
        } => cmd_plan(&file, &state_dir, stack.as_deref(), &ambient_env()),
        Commands::Drift {
            state_dir,
            stack,
            tripwire,
        } => cmd_drift(&state_dir, stack.as_deref(), tripwire),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Stages { file } => cmd_stages(&file),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stackforge", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn init_template(app: &str) -> String {
    format!(
        r#"version: "1.0"
name: {app}
description: "Managed by stackforge"

params:
  app: {app}

shared:
  id: CommonStack
  repository: "{{{{params.app}}}}"
  dev_registry: {dev}
  prod_registry: {prod}

pipelines:
  PipelineStackDev:
    app_name: "{{{{params.app}}}}"
    cidr: 10.10.0.0/16
    max_azs: 3
    repository: "{{{{params.app}}}}"
    branch: develop
    registry: {dev}

  PipelineStackProd:
    app_name: "{{{{params.app}}}}"
    production: true
    cidr: 10.20.0.0/16
    max_azs: 3
    repository: "{{{{params.app}}}}"
    branch: master
    registry: {prod}
    manual_approval: true
    approval_emails: []
"#,
        app = app,
        dev = naming::registry_name(Stage::Dev, app),
        prod = naming::registry_name(Stage::Prod, app),
    )
}

fn cmd_init(path: &Path, app: &str) -> Result<(), String> {
    let config_path = path.join(DEFAULT_CONFIG);
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;

    std::fs::write(&config_path, init_template(app))
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stackforge project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn print_warnings(config: &ProjectConfig) {
    for w in parser::config_warnings(config) {
        eprintln!("  WARNING: {}", w);
    }
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    print_warnings(&config);
    println!(
        "OK: {} ({} shared, {} pipelines)",
        config.name,
        usize::from(config.shared.is_some()),
        config.pipelines.len()
    );
    Ok(())
}

/// Parse and validate a project file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<ProjectConfig, String> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("validation failed: {} error(s)", errors.len()))
}

fn cmd_synth(
    file: &Path,
    out: &Path,
    state_dir: &Path,
    stack: Option<&str>,
    dry_run: bool,
    env: &AssemblyEnv,
) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    print_warnings(&config);

    let report = synth::synth(&SynthConfig {
        config: &config,
        env,
        out_dir: out,
        state_dir,
        stack_filter: stack,
        dry_run,
    })?;

    for r in &report.results {
        let marker = if r.changed { "changed" } else { "unchanged" };
        println!(
            "{}: {} resources, {} [{}] ({:.3}s)",
            r.stack,
            r.resources,
            r.hash,
            marker,
            r.duration.as_secs_f64()
        );
    }
    println!();
    if dry_run {
        println!("Dry run: nothing written.");
    } else {
        println!("Synth complete: {} → {}", report.assembly_hash, out.display());
    }
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path, stack: Option<&str>, env: &AssemblyEnv) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let assembly = assembler::assemble(&config, env)?;
    if let Some(filter) = stack {
        if !assembly.stacks.contains_key(filter) {
            return Err(format!("unknown stack '{}'", filter));
        }
    }
    let locks = state::load_locks(state_dir, &assembly.order)?;
    let plan = planner::plan(&assembly, &locks)?;
    print_plan(&plan, stack);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &ExecutionPlan, stack_filter: Option<&str>) {
    println!("Planning: {} ({} stacks)", plan.name, plan.stack_order.len());
    println!();

    let mut current_stack = String::new();
    for change in &plan.changes {
        if stack_filter.is_some_and(|f| f != change.stack) {
            continue;
        }
        if change.stack != current_stack {
            current_stack.clone_from(&change.stack);
            println!("{}:", current_stack);
        }
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::Destroy => "-",
            PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

/// Stack directories under the state dir, sorted, optionally filtered.
fn state_stacks(state_dir: &Path, filter: Option<&str>) -> Result<Vec<String>, String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| filter.is_none_or(|f| f == name))
        .collect();
    names.sort();
    Ok(names)
}

fn cmd_drift(state_dir: &Path, stack_filter: Option<&str>, tripwire_mode: bool) -> Result<(), String> {
    let mut total_drift = 0;

    for name in state_stacks(state_dir, stack_filter)? {
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        println!("Checking {} ({} resources)...", name, lock.resources.len());
        let findings = drift::detect_drift(&lock);

        if findings.is_empty() {
            println!("  No drift detected.");
            continue;
        }
        for f in &findings {
            let target = f.logical_id.as_deref().unwrap_or("template");
            println!("  DRIFTED: {} ({})", target, f.detail);
            println!("    Expected: {}", f.expected_hash);
            println!("    Actual:   {}", f.actual_hash);
        }
        if let Some(f) = findings.first() {
            let event = ProvenanceEvent::DriftDetected {
                stack: name.clone(),
                expected_hash: f.expected_hash.clone(),
                actual_hash: f.actual_hash.clone(),
            };
            if let Err(e) = eventlog::append_event(state_dir, &name, event) {
                tracing::warn!(stack = %name, error = %e, "event log append failed");
            }
        }
        total_drift += findings.len();
    }

    if total_drift > 0 {
        println!();
        println!("Drift detected: {} finding(s)", total_drift);
        if tripwire_mode {
            return Err(format!("{} drift finding(s)", total_drift));
        }
    } else {
        println!("No drift detected.");
    }

    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let mut found = false;

    for name in state_stacks(state_dir, stack_filter)? {
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        found = true;
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Template:  {} ({})", lock.template, lock.template_hash);
        println!("  Resources: {}", lock.resources.len());
        for (id, rl) in &lock.resources {
            println!("    {}: {}", id, rl.resource_type);
        }
        if let Some(last) = eventlog::read_events(state_dir, &name)?.last() {
            println!("  Last event: {}", last.ts);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `stackforge synth` first.");
    }

    Ok(())
}

fn cmd_stages(file: &Path) -> Result<(), String> {
    let config = parse_and_validate(file)?;
    let assembly = assembler::assemble(&config, &AssemblyEnv::default())?;

    println!("Deployment order: {}", assembly.order.join(" → "));
    for id in &assembly.order {
        let Some(stack) = assembly.stacks.get(id) else {
            continue;
        };
        let StackKind::Pipeline(summary) = &stack.kind else {
            println!();
            println!("{} (shared, {} resources)", id, stack.template.resources.len());
            continue;
        };
        let ctx = &summary.context;
        println!();
        println!("{} ({})", id, summary.prefix);
        println!("  stages:  {}", summary.stages);
        println!(
            "  network: {} across {} AZ(s), {}",
            summary.topology.address_block,
            summary.topology.max_azs,
            summary.topology.nat.describe()
        );
        println!("  source:  {}@{}", ctx.source_repository, ctx.source_branch);
        println!("  image:   {}", ctx.image_registry);
        println!("  removal: {}", ctx.removal_policy().as_cfn());
    }
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(ProjectConfig);
    let json = serde_json::to_string_pretty(&schema).map_err(|e| format!("schema serialize error: {}", e))?;
    println!("{}", json);
    Ok(())
}
