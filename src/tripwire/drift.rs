//! Drift detection: compare emitted templates on disk to lock hashes.
//!
//! A template edited after synth no longer matches what the project file
//! declares. The lock carries a hash for the whole file and one per logical
//! resource, so findings can name the resources that were touched.

use crate::core::state;
use crate::core::types::{StateLock, Template};
use crate::tripwire::hasher;
use std::path::Path;

pub const MISSING: &str = "MISSING";

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub stack: String,
    /// Logical resource ID, or None for a whole-template finding
    pub logical_id: Option<String>,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

impl DriftFinding {
    fn template(lock: &StateLock, actual_hash: String, detail: String) -> Self {
        Self {
            stack: lock.stack.clone(),
            logical_id: None,
            expected_hash: lock.template_hash.clone(),
            actual_hash,
            detail,
        }
    }
}

/// Check one template file against its expected hash.
pub fn check_template_drift(lock: &StateLock) -> Option<DriftFinding> {
    let path = Path::new(&lock.template);
    if !path.exists() {
        return Some(DriftFinding::template(
            lock,
            MISSING.to_string(),
            format!("{} does not exist", lock.template),
        ));
    }

    let actual = hasher::hash_file(path).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual != lock.template_hash {
        Some(DriftFinding::template(
            lock,
            actual,
            format!("{} content changed", lock.template),
        ))
    } else {
        None
    }
}

/// Per-resource findings for a template whose file hash no longer matches.
fn resource_drift(lock: &StateLock) -> Vec<DriftFinding> {
    let parsed = std::fs::read_to_string(&lock.template)
        .ok()
        .and_then(|content| serde_json::from_str::<Template>(&content).ok());
    let Some(template) = parsed else {
        return Vec::new();
    };
    let Ok(actual) = state::resource_hashes(&template) else {
        return Vec::new();
    };

    let mut findings = Vec::new();
    for (id, expected) in &lock.resources {
        let (actual_hash, detail) = match actual.get(id) {
            Some(found) if found.hash == expected.hash => continue,
            Some(found) => (found.hash.clone(), format!("{} declaration edited", expected.resource_type)),
            None => (MISSING.to_string(), format!("{} removed from template", expected.resource_type)),
        };
        findings.push(DriftFinding {
            stack: lock.stack.clone(),
            logical_id: Some(id.clone()),
            expected_hash: expected.hash.clone(),
            actual_hash,
            detail,
        });
    }
    for (id, found) in &actual {
        if !lock.resources.contains_key(id) {
            findings.push(DriftFinding {
                stack: lock.stack.clone(),
                logical_id: Some(id.clone()),
                expected_hash: MISSING.to_string(),
                actual_hash: found.hash.clone(),
                detail: format!("{} added to template", found.resource_type),
            });
        }
    }
    findings
}

/// Detect drift for one stack: the template finding first, then any
/// resource-level findings.
pub fn detect_drift(lock: &StateLock) -> Vec<DriftFinding> {
    match check_template_drift(lock) {
        None => Vec::new(),
        Some(finding) => {
            let missing = finding.actual_hash == MISSING;
            let mut findings = vec![finding];
            if !missing {
                findings.extend(resource_drift(lock));
            }
            findings
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CfnResource;
    use serde_json::json;

    fn write_stack(dir: &Path) -> StateLock {
        let mut t = Template::new("drift");
        t.add(
            "Table",
            CfnResource::new("AWS::DynamoDB::Table", json!({"TableName": "dev-app-product"})),
        )
        .unwrap();
        t.add("Cluster", CfnResource::new("AWS::ECS::Cluster", json!({})))
            .unwrap();
        let path = dir.join("PipelineStackDev.template.json");
        std::fs::write(&path, t.to_json().unwrap()).unwrap();
        let hash = hasher::hash_file(&path).unwrap();
        state::new_lock("PipelineStackDev", &t, &path, &hash).unwrap()
    }

    #[test]
    fn test_no_drift() {
        let dir = tempfile::tempdir().unwrap();
        let lock = write_stack(dir.path());
        assert!(detect_drift(&lock).is_empty());
    }

    #[test]
    fn test_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let lock = write_stack(dir.path());
        std::fs::remove_file(&lock.template).unwrap();
        let findings = detect_drift(&lock);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].actual_hash, MISSING);
        assert!(findings[0].logical_id.is_none());
    }

    #[test]
    fn test_edited_resource_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let lock = write_stack(dir.path());
        let edited = std::fs::read_to_string(&lock.template)
            .unwrap()
            .replace("dev-app-product", "hand-edited");
        std::fs::write(&lock.template, edited).unwrap();

        let findings = detect_drift(&lock);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].detail.contains("content changed"));
        assert_eq!(findings[1].logical_id.as_deref(), Some("Table"));
        assert!(findings[1].detail.contains("edited"));
    }

    #[test]
    fn test_added_and_removed_resources() {
        let dir = tempfile::tempdir().unwrap();
        let lock = write_stack(dir.path());
        let mut t: Template =
            serde_json::from_str(&std::fs::read_to_string(&lock.template).unwrap()).unwrap();
        t.resources.shift_remove("Cluster");
        t.add("Extra", CfnResource::new("AWS::SNS::Topic", json!({})))
            .unwrap();
        std::fs::write(&lock.template, t.to_json().unwrap()).unwrap();

        let findings = detect_drift(&lock);
        let details: Vec<_> = findings.iter().map(|f| f.detail.as_str()).collect();
        assert!(details.iter().any(|d| d.contains("AWS::ECS::Cluster removed")));
        assert!(details.iter().any(|d| d.contains("AWS::SNS::Topic added")));
    }

    #[test]
    fn test_unparseable_template_reports_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let lock = write_stack(dir.path());
        std::fs::write(&lock.template, "not json").unwrap();
        let findings = detect_drift(&lock);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].logical_id.is_none());
    }
}
