//! Synth: assemble every stack and hand the templates off.
//!
//! resolve → order → assemble → for each stack: serialize → hash → write
//! template → lock → events. The manifest is written last.

use super::assembler;
use super::state;
use super::types::*;
use crate::tripwire::{eventlog, hasher};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1.0";

/// Configuration for a synth run.
pub struct SynthConfig<'a> {
    pub config: &'a ProjectConfig,
    pub env: &'a AssemblyEnv,
    pub out_dir: &'a Path,
    pub state_dir: &'a Path,
    pub stack_filter: Option<&'a str>,
    pub dry_run: bool,
}

/// Outcome for one stack.
#[derive(Debug, Clone)]
pub struct SynthResult {
    pub stack: String,
    pub template_path: PathBuf,
    pub hash: String,
    pub resources: u32,
    /// Template differs from the last recorded synth
    pub changed: bool,
    pub duration: Duration,
}

/// Outcome of a synth run.
#[derive(Debug, Clone)]
pub struct SynthReport {
    pub results: Vec<SynthResult>,
    pub manifest: AssemblyManifest,
    /// Composite of every template hash, in deployment order
    pub assembly_hash: String,
}

pub fn template_file_name(stack: &str) -> String {
    format!("{}.template.json", stack)
}

/// Assemble and write. Templates, locks and events are skipped in dry-run.
pub fn synth(cfg: &SynthConfig) -> Result<SynthReport, String> {
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let assembly = assembler::assemble(cfg.config, cfg.env)?;

    if let Some(filter) = cfg.stack_filter {
        if !assembly.stacks.contains_key(filter) {
            return Err(format!("unknown stack '{}'", filter));
        }
    }

    if !cfg.dry_run {
        std::fs::create_dir_all(cfg.out_dir)
            .map_err(|e| format!("cannot create {}: {}", cfg.out_dir.display(), e))?;
    }

    let previous = load_manifest(cfg.out_dir).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "previous manifest ignored");
        None
    });
    let mut results = Vec::new();
    let mut artifacts = IndexMap::new();
    for id in &assembly.order {
        let Some(stack) = assembly.stacks.get(id) else {
            continue;
        };
        if cfg.stack_filter.is_some_and(|f| f != id) {
            if let Some(kept) = carried_artifact(cfg.out_dir, previous.as_ref(), id) {
                artifacts.insert(id.clone(), kept);
            } else {
                tracing::debug!(stack = %id, "skipped stack has no current template, left out of manifest");
            }
            continue;
        }

        let json = stack.template.to_json()?;
        let hash = hasher::hash_string(&json);
        let file_name = template_file_name(id);
        artifacts.insert(
            id.clone(),
            StackArtifact {
                template: file_name.clone(),
                environment: stack.env.clone(),
                dependencies: stack.dependencies.clone(),
                hash: hash.clone(),
            },
        );
        results.push(synth_stack(cfg, &run_id, id, &stack.template, &json, hash, &file_name)?);
    }

    let manifest = AssemblyManifest {
        version: MANIFEST_VERSION.to_string(),
        order: assembly
            .order
            .iter()
            .filter(|id| artifacts.contains_key(*id))
            .cloned()
            .collect(),
        stacks: artifacts,
    };
    if !cfg.dry_run {
        if let Some(previous) = &previous {
            for gone in previous.order.iter().filter(|id| !assembly.stacks.contains_key(*id)) {
                tracing::warn!(stack = %gone, "stack no longer declared, its template is stale");
            }
        }
        write_manifest(cfg.out_dir, &manifest)?;
    }

    let hashes: Vec<&str> = manifest.stacks.values().map(|a| a.hash.as_str()).collect();
    let assembly_hash = hasher::composite_hash(&hashes);
    tracing::info!(
        stacks = results.len(),
        hash = %assembly_hash,
        elapsed_ms = start.elapsed().as_millis() as u64,
        dry_run = cfg.dry_run,
        "synth finished"
    );

    Ok(SynthReport {
        results,
        manifest,
        assembly_hash,
    })
}

fn synth_stack(
    cfg: &SynthConfig,
    run_id: &str,
    id: &str,
    template: &Template,
    json: &str,
    hash: String,
    file_name: &str,
) -> Result<SynthResult, String> {
    let start = Instant::now();
    let template_path = cfg.out_dir.join(file_name);
    let previous = state::load_lock(cfg.state_dir, id)?;
    let changed = previous.as_ref().is_none_or(|l| l.template_hash != hash);
    let resources = template.resources.len() as u32;

    if cfg.dry_run {
        tracing::debug!(stack = id, changed, "dry run, nothing written");
        return Ok(SynthResult {
            stack: id.to_string(),
            template_path,
            hash,
            resources,
            changed,
            duration: start.elapsed(),
        });
    }

    record(cfg, id, ProvenanceEvent::SynthStarted {
        stack: id.to_string(),
        run_id: run_id.to_string(),
        stackforge_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    std::fs::write(&template_path, json)
        .map_err(|e| format!("cannot write {}: {}", template_path.display(), e))?;
    let lock = state::new_lock(id, template, &template_path, &hash)?;
    state::save_lock(cfg.state_dir, &lock)?;

    let duration = start.elapsed();
    record(cfg, id, ProvenanceEvent::StackSynthesized {
        stack: id.to_string(),
        run_id: run_id.to_string(),
        resources,
        hash: hash.clone(),
        duration_seconds: duration.as_secs_f64(),
    });
    record(cfg, id, ProvenanceEvent::SynthCompleted {
        stack: id.to_string(),
        run_id: run_id.to_string(),
        changed,
        total_seconds: duration.as_secs_f64(),
    });
    tracing::info!(stack = id, resources, changed, path = %template_path.display(), "template written");

    Ok(SynthResult {
        stack: id.to_string(),
        template_path,
        hash,
        resources,
        changed,
        duration,
    })
}

/// Previous manifest entry for a stack this run skips, kept only while its
/// template file is still on disk with the recorded hash.
fn carried_artifact(
    out_dir: &Path,
    previous: Option<&AssemblyManifest>,
    id: &str,
) -> Option<StackArtifact> {
    let artifact = previous?.stacks.get(id)?;
    let on_disk = hasher::hash_file(&out_dir.join(&artifact.template)).ok()?;
    (on_disk == artifact.hash).then(|| artifact.clone())
}

/// Event-log failures never fail the synth.
fn record(cfg: &SynthConfig, stack: &str, event: ProvenanceEvent) {
    if let Err(e) = eventlog::append_event(cfg.state_dir, stack, event) {
        tracing::warn!(stack, error = %e, "event log append failed");
    }
}

fn write_manifest(out_dir: &Path, manifest: &AssemblyManifest) -> Result<(), String> {
    let path = out_dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| format!("manifest serialize error: {}", e))?;
    std::fs::write(&path, json).map_err(|e| format!("cannot write {}: {}", path.display(), e))
}

/// Read a previously written manifest.
pub fn load_manifest(out_dir: &Path) -> Result<Option<AssemblyManifest>, String> {
    let path = out_dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| format!("invalid manifest {}: {}", path.display(), e))
}
