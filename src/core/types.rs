//! All project-file, template, state and plan types.
//!
//! Defines the YAML schema for `stackforge.yaml`, the CloudFormation template
//! model handed to the provisioning engine, state locks and provenance events.
//! All types derive Serialize/Deserialize for YAML/JSON roundtripping.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Top-level stackforge.yaml
// ============================================================================

/// Root configuration: the desired set of stacks.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable project name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters (templatable via `{{params.key}}`)
    #[serde(default)]
    #[schemars(with = "HashMap<String, serde_json::Value>")]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// Explicit target account/region. Overrides the process environment.
    #[serde(default)]
    pub env: Option<AssemblyEnv>,

    /// Shared-resources stack (source repository and image registries)
    #[serde(default)]
    pub shared: Option<SharedStack>,

    /// One pipeline stack per deployment stage (order-preserving)
    #[serde(default)]
    pub pipelines: IndexMap<String, PipelineStack>,
}

/// Target account and region for every stack in the assembly.
///
/// Either field may be absent; absent fields are omitted from the manifest
/// and the provisioning engine applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AssemblyEnv {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl AssemblyEnv {
    pub const ACCOUNT_VAR: &'static str = "CDK_DEFAULT_ACCOUNT";
    pub const REGION_VAR: &'static str = "CDK_DEFAULT_REGION";

    /// Build from a variable lookup (the CLI passes `std::env::var`).
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            account: get(Self::ACCOUNT_VAR),
            region: get(Self::REGION_VAR),
        }
    }

    /// Field-wise overlay: values set in `self` win over `fallback`.
    pub fn or(&self, fallback: &AssemblyEnv) -> AssemblyEnv {
        AssemblyEnv {
            account: self.account.clone().or_else(|| fallback.account.clone()),
            region: self.region.clone().or_else(|| fallback.region.clone()),
        }
    }
}

// ============================================================================
// Stacks
// ============================================================================

/// Source repository plus one image registry per deployment stage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SharedStack {
    /// Stack identifier
    #[serde(default = "default_shared_id")]
    pub id: String,

    /// CodeCommit repository name
    pub repository: String,

    /// ECR repository name for the dev stage
    pub dev_registry: String,

    /// ECR repository name for the prod stage
    pub prod_registry: String,
}

fn default_shared_id() -> String {
    "CommonStack".to_string()
}

/// A delivery pipeline plus the network, data and compute it deploys into.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineStack {
    /// Logical application name
    pub app_name: String,

    /// Production stage (NAT gateways, retained data, approval gate)
    #[serde(default)]
    pub production: bool,

    /// VPC address block
    pub cidr: String,

    /// Maximum availability zones for the VPC
    #[serde(default = "default_max_azs")]
    pub max_azs: u32,

    /// Source repository name (imported by name from the shared stack)
    pub repository: String,

    /// Branch whose changes trigger the pipeline
    pub branch: String,

    /// Image registry name (imported by name from the shared stack)
    pub registry: String,

    /// Request a manual approval gate (honoured for production only)
    #[serde(default)]
    pub manual_approval: bool,

    /// Approval notification recipients
    #[serde(default)]
    pub approval_emails: Vec<String>,

    /// Stacks that must be deployed first (the shared stack is implicit)
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_max_azs() -> u32 {
    3
}

// ============================================================================
// Stage context
// ============================================================================

/// Deployment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dev,
    Prod,
}

impl Stage {
    pub fn from_production(production: bool) -> Self {
        if production {
            Self::Prod
        } else {
            Self::Dev
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the engine does with stateful resources when the stack goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalPolicy {
    Retain,
    Destroy,
}

impl RemovalPolicy {
    /// CloudFormation `DeletionPolicy` / `UpdateReplacePolicy` value.
    pub fn as_cfn(self) -> &'static str {
        match self {
            Self::Retain => "Retain",
            Self::Destroy => "Delete",
        }
    }
}

/// Resolved per-pipeline inputs. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub application_name: String,
    pub is_production: bool,
    pub address_block: String,
    pub max_azs: u32,
    pub source_repository: String,
    pub source_branch: String,
    pub image_registry: String,
    pub manual_approval: bool,
    pub approval_emails: Vec<String>,
}

impl StageContext {
    pub fn from_stack(stack: &PipelineStack) -> Self {
        Self {
            application_name: stack.app_name.clone(),
            is_production: stack.production,
            address_block: stack.cidr.clone(),
            max_azs: stack.max_azs,
            source_repository: stack.repository.clone(),
            source_branch: stack.branch.clone(),
            image_registry: stack.registry.clone(),
            manual_approval: stack.manual_approval,
            approval_emails: stack.approval_emails.clone(),
        }
    }

    pub fn stage(&self) -> Stage {
        Stage::from_production(self.is_production)
    }

    /// Retain on delete in production, destroy otherwise.
    pub fn removal_policy(&self) -> RemovalPolicy {
        if self.is_production {
            RemovalPolicy::Retain
        } else {
            RemovalPolicy::Destroy
        }
    }
}

// ============================================================================
// CloudFormation template model
// ============================================================================

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// A CloudFormation template: the artifact handed to the provisioning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    pub description: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: IndexMap<String, serde_json::Value>,

    pub resources: IndexMap<String, CfnResource>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, CfnOutput>,
}

impl Template {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: description.into(),
            parameters: IndexMap::new(),
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    /// Add a resource. Logical IDs are unique within a template; a duplicate
    /// is a construction bug, reported as an error.
    pub fn add(&mut self, logical_id: impl Into<String>, resource: CfnResource) -> Result<(), String> {
        let id = logical_id.into();
        if self.resources.contains_key(&id) {
            return Err(format!("duplicate logical id '{}'", id));
        }
        self.resources.insert(id, resource);
        Ok(())
    }

    pub fn output(&mut self, name: impl Into<String>, value: serde_json::Value, description: &str) {
        self.outputs.insert(
            name.into(),
            CfnOutput {
                value,
                description: Some(description.to_string()),
            },
        );
    }

    /// Logical IDs of every resource of the given CloudFormation type.
    pub fn ids_of_type(&self, resource_type: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Deterministic pretty JSON.
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("template serialize error: {}", e))
    }
}

/// One declared cloud resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    pub properties: serde_json::Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<String>,
}

impl CfnResource {
    pub fn new(resource_type: &str, properties: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    pub fn depends_on(mut self, logical_id: &str) -> Self {
        self.depends_on.push(logical_id.to_string());
        self
    }

    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.deletion_policy = Some(policy.as_cfn().to_string());
        self.update_replace_policy = Some(policy.as_cfn().to_string());
        self
    }

    /// Look up a top-level property.
    pub fn prop(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnOutput {
    pub value: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Cloud assembly manifest
// ============================================================================

/// Index of every synthesized stack, written next to the templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub version: String,

    /// Deployment order (dependencies first)
    pub order: Vec<String>,

    pub stacks: IndexMap<String, StackArtifact>,
}

/// Manifest entry for one stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackArtifact {
    pub template: String,

    #[serde(default)]
    pub environment: AssemblyEnv,

    #[serde(default)]
    pub dependencies: Vec<String>,

    /// BLAKE3 hash of the template file contents
    pub hash: String,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock recorded after a successful synth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack identifier
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// Path of the emitted template
    pub template: String,

    /// BLAKE3 hash of the emitted template
    pub template_hash: String,

    /// Per-logical-resource state
    pub resources: IndexMap<String, ResourceLock>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLock {
    /// CloudFormation resource type
    #[serde(rename = "type")]
    pub resource_type: String,

    /// BLAKE3 hash of the resource's JSON declaration
    pub hash: String,
}

// ============================================================================
// Plan
// ============================================================================

/// Action the engine is expected to take on a logical resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Stack identifier
    pub stack: String,

    /// Logical resource ID
    pub logical_id: String,

    /// CloudFormation resource type
    pub resource_type: String,

    /// Action to take
    pub action: PlanAction,

    /// Human-readable description
    pub description: String,
}

/// Full preview across all stacks.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Project name
    pub name: String,

    /// Planned changes grouped by stack
    pub changes: Vec<PlannedChange>,

    /// Stack deployment order
    pub stack_order: Vec<String>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    SynthStarted {
        stack: String,
        run_id: String,
        stackforge_version: String,
    },
    StackSynthesized {
        stack: String,
        run_id: String,
        resources: u32,
        hash: String,
        duration_seconds: f64,
    },
    SynthCompleted {
        stack: String,
        run_id: String,
        changed: bool,
        total_seconds: f64,
    },
    DriftDetected {
        stack: String,
        expected_hash: String,
        actual_hash: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
