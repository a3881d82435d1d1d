//! Lock file management: load, save (atomic), path derivation.

use super::types::{ResourceLock, StateLock, Template};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

pub const LOCK_SCHEMA: &str = "1.0";

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load a lock file for a stack. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Load every lock that exists for the given stacks.
pub fn load_locks(state_dir: &Path, stacks: &[String]) -> Result<IndexMap<String, StateLock>, String> {
    let mut locks = IndexMap::new();
    for stack in stacks {
        if let Some(lock) = load_lock(state_dir, stack)? {
            locks.insert(stack.clone(), lock);
        }
    }
    Ok(locks)
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path)
        .map_err(|e| format!("cannot rename {} → {}: {}", tmp_path.display(), path.display(), e))?;

    Ok(())
}

/// Per-resource hashes of a template, in declaration order.
pub fn resource_hashes(template: &Template) -> Result<IndexMap<String, ResourceLock>, String> {
    let mut resources = IndexMap::new();
    for (id, resource) in &template.resources {
        resources.insert(
            id.clone(),
            ResourceLock {
                resource_type: resource.resource_type.clone(),
                hash: hasher::hash_json(resource)?,
            },
        );
    }
    Ok(resources)
}

/// Build the lock recorded after writing `template` to `template_path`.
/// The path is stored absolute so drift checks work from any directory.
pub fn new_lock(
    stack: &str,
    template: &Template,
    template_path: &Path,
    template_hash: &str,
) -> Result<StateLock, String> {
    use crate::tripwire::eventlog::now_iso8601;
    let template_path = std::path::absolute(template_path)
        .map_err(|e| format!("cannot resolve {}: {}", template_path.display(), e))?;
    Ok(StateLock {
        schema: LOCK_SCHEMA.to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("stackforge {}", env!("CARGO_PKG_VERSION")),
        template: template_path.display().to_string(),
        template_hash: template_hash.to_string(),
        resources: resource_hashes(template)?,
    })
}
