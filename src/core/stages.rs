//! Pipeline stage assembly: Source → Build → [ManualApproval] → Deploy.
//!
//! Transitions are strictly linear. Retry, timeout and failure notification
//! belong to the pipeline engine; this module only declares which stages
//! exist and in what order.

use super::types::StageContext;
use std::fmt;

/// One pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Build,
    ManualApproval,
    Deploy,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Source => "Source",
            Self::Build => "Build",
            Self::ManualApproval => "ManualApproval",
            Self::Deploy => "Deploy",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered stage list. Only [`build_stage_list`] constructs one, so the order
/// invariant holds for every value of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStageList {
    stages: Vec<StageKind>,
}

impl PipelineStageList {
    pub fn as_slice(&self) -> &[StageKind] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn has_approval(&self) -> bool {
        self.stages.contains(&StageKind::ManualApproval)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.stages.iter().copied()
    }
}

impl fmt::Display for PipelineStageList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join(" → "))
    }
}

/// Whether the pipeline gets a manual approval gate.
pub fn requires_approval(ctx: &StageContext) -> bool {
    ctx.is_production && ctx.manual_approval
}

/// Build the ordered stage list for a stage context.
pub fn build_stage_list(ctx: &StageContext) -> PipelineStageList {
    let mut stages = vec![StageKind::Source, StageKind::Build];
    if requires_approval(ctx) {
        stages.push(StageKind::ManualApproval);
    }
    stages.push(StageKind::Deploy);
    PipelineStageList { stages }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(production: bool, approval: bool, emails: &[&str]) -> StageContext {
        StageContext {
            application_name: "example-app".to_string(),
            is_production: production,
            address_block: "10.10.0.0/16".to_string(),
            max_azs: 3,
            source_repository: "example-app".to_string(),
            source_branch: if production { "master" } else { "develop" }.to_string(),
            image_registry: "example".to_string(),
            manual_approval: approval,
            approval_emails: emails.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn test_dev_stage_order() {
        let list = build_stage_list(&ctx(false, false, &[]));
        assert_eq!(
            list.as_slice(),
            &[StageKind::Source, StageKind::Build, StageKind::Deploy]
        );
        assert!(!list.has_approval());
    }

    #[test]
    fn test_prod_with_approval_stage_order() {
        let list = build_stage_list(&ctx(true, true, &["who@example.com"]));
        assert_eq!(
            list.names(),
            vec!["Source", "Build", "ManualApproval", "Deploy"]
        );
    }

    #[test]
    fn test_dev_ignores_approval_request() {
        let list = build_stage_list(&ctx(false, true, &["who@example.com"]));
        assert_eq!(list.len(), 3);
        assert!(!list.has_approval());
    }

    #[test]
    fn test_prod_without_approval() {
        let list = build_stage_list(&ctx(true, false, &[]));
        assert_eq!(list.names(), vec!["Source", "Build", "Deploy"]);
    }

    #[test]
    fn test_prod_approval_without_recipients_keeps_gate() {
        let list = build_stage_list(&ctx(true, true, &[]));
        assert!(list.has_approval());
    }

    #[test]
    fn test_approval_sits_between_build_and_deploy() {
        let list = build_stage_list(&ctx(true, true, &[]));
        let s = list.as_slice();
        let build = s.iter().position(|k| *k == StageKind::Build).unwrap();
        let gate = s.iter().position(|k| *k == StageKind::ManualApproval).unwrap();
        let deploy = s.iter().position(|k| *k == StageKind::Deploy).unwrap();
        assert!(build < gate && gate < deploy);
        assert_eq!(s.first(), Some(&StageKind::Source));
        assert_eq!(s.last(), Some(&StageKind::Deploy));
    }

    #[test]
    fn test_display() {
        let list = build_stage_list(&ctx(false, false, &[]));
        assert_eq!(list.to_string(), "Source → Build → Deploy");
    }
}
