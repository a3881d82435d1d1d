//! Plan generation: diff assembled templates against lock state.
//!
//! The lock records one hash per logical resource from the last synth. A
//! resource with no lock entry is created, one whose declaration hash moved
//! is updated, and one present only in the lock is destroyed.

use super::assembler::Assembly;
use super::state;
use super::types::*;
use indexmap::IndexMap;

/// Generate an execution plan by comparing assembled stacks to lock state.
pub fn plan(assembly: &Assembly, locks: &IndexMap<String, StateLock>) -> Result<ExecutionPlan, String> {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for id in &assembly.order {
        let Some(stack) = assembly.stacks.get(id) else {
            continue;
        };
        let desired = state::resource_hashes(&stack.template)?;
        let lock = locks.get(id);

        for (logical_id, resource) in &desired {
            let action = determine_action(logical_id, &resource.hash, lock);
            changes.push(PlannedChange {
                stack: id.clone(),
                logical_id: logical_id.clone(),
                resource_type: resource.resource_type.clone(),
                description: describe_action(logical_id, &resource.resource_type, &action),
                action,
            });
        }

        if let Some(lock) = lock {
            for (logical_id, rl) in &lock.resources {
                if desired.contains_key(logical_id) {
                    continue;
                }
                changes.push(PlannedChange {
                    stack: id.clone(),
                    logical_id: logical_id.clone(),
                    resource_type: rl.resource_type.clone(),
                    description: describe_action(logical_id, &rl.resource_type, &PlanAction::Destroy),
                    action: PlanAction::Destroy,
                });
            }
        }
    }

    for change in &changes {
        match change.action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
    }

    Ok(ExecutionPlan {
        name: assembly.name.clone(),
        changes,
        stack_order: assembly.order.clone(),
        to_create,
        to_update,
        to_destroy,
        unchanged,
    })
}

fn determine_action(logical_id: &str, desired_hash: &str, lock: Option<&StateLock>) -> PlanAction {
    match lock.and_then(|l| l.resources.get(logical_id)) {
        None => PlanAction::Create,
        Some(rl) if rl.hash == desired_hash => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

fn describe_action(logical_id: &str, resource_type: &str, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", logical_id, resource_type),
        PlanAction::Update => format!("{}: update (declaration changed)", logical_id),
        PlanAction::Destroy => format!("{}: destroy {}", logical_id, resource_type),
        PlanAction::NoOp => format!("{}: no changes", logical_id),
    }
}
