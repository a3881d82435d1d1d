//! Stack assembly: turn a resolved project into stack graphs.
//!
//! One pass, no side effects. The shared stack declares the repository and
//! registries; each pipeline stack selects its topology, builds its stage
//! list and declares network, data, service and pipeline resources. Pipelines
//! reference shared resources by name only.

use super::naming;
use super::resolver;
use super::stages::{build_stage_list, PipelineStageList};
use super::topology::{select_topology, TopologyConfig};
use super::types::*;
use crate::resources::{data, network, pipeline, registry, service};
use indexmap::IndexMap;

/// Decisions made while assembling a pipeline stack.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub context: StageContext,
    pub prefix: String,
    pub topology: TopologyConfig,
    pub stages: PipelineStageList,
}

/// What a stack is.
#[derive(Debug, Clone)]
pub enum StackKind {
    Shared,
    Pipeline(Box<PipelineSummary>),
}

/// One assembled stack, ready for hand-off.
#[derive(Debug, Clone)]
pub struct StackGraph {
    pub id: String,
    pub kind: StackKind,
    pub template: Template,
    pub dependencies: Vec<String>,
    pub env: AssemblyEnv,
}

/// Every stack of a project, in deployment order.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub name: String,
    pub order: Vec<String>,
    pub stacks: IndexMap<String, StackGraph>,
}

/// Template for the shared-resources stack.
pub fn assemble_shared(shared: &SharedStack) -> Result<Template, String> {
    let mut t = Template::new(format!(
        "Shared resources: source repository {} and image registries",
        shared.repository
    ));
    registry::add_shared_resources(&mut t, shared)?;
    Ok(t)
}

/// Template for one pipeline stack.
pub fn assemble_pipeline(id: &str, ctx: &StageContext) -> Result<(Template, PipelineSummary), String> {
    let prefix = naming::resource_prefix(&ctx.application_name, ctx.is_production);
    let stack_name = naming::stack_prefix(&ctx.application_name, ctx.is_production);
    let topology = select_topology(ctx);
    let stages = build_stage_list(ctx);
    tracing::debug!(
        stack = id,
        prefix = %prefix,
        nat = %topology.nat.describe(),
        stages = %stages,
        "assembling pipeline stack"
    );

    let mut t = Template::new(format!(
        "Delivery pipeline {} ({}): {}",
        id, stack_name, stages
    ));
    let net = network::add_network(&mut t, &topology, &stack_name)?;
    let app = data::add_app_resources(&mut t, ctx)?;
    let svc = service::add_service(&mut t, ctx, &net, &app.task_role)?;
    pipeline::add_pipeline(
        &mut t,
        ctx,
        &pipeline::PipelineInputs {
            stages: &stages,
            service: &svc,
            task_role: &app.task_role,
        },
    )?;

    Ok((
        t,
        PipelineSummary {
            context: ctx.clone(),
            prefix,
            topology,
            stages,
        },
    ))
}

/// Assemble every stack. `ambient` is the environment read at the entry
/// point; the project's `env` block overrides it field by field.
pub fn assemble(config: &ProjectConfig, ambient: &AssemblyEnv) -> Result<Assembly, String> {
    let resolved = resolver::resolve_config(config)?;
    let order = resolver::build_stack_order(&resolved)?;
    let dependencies = resolver::stack_dependencies(&resolved);
    let env = resolved.env.clone().unwrap_or_default().or(ambient);

    let mut stacks = IndexMap::new();
    for id in &order {
        let deps = dependencies.get(id).cloned().unwrap_or_default();
        let (kind, template) = match resolved.pipelines.get(id) {
            Some(stack) => {
                let ctx = StageContext::from_stack(stack);
                let (template, summary) = assemble_pipeline(id, &ctx)?;
                (StackKind::Pipeline(Box::new(summary)), template)
            }
            None => {
                let shared = resolved
                    .shared
                    .as_ref()
                    .filter(|s| &s.id == id)
                    .ok_or_else(|| format!("stack '{}' is not declared", id))?;
                (StackKind::Shared, assemble_shared(shared)?)
            }
        };
        tracing::info!(stack = %id, resources = template.resources.len(), "stack assembled");
        stacks.insert(
            id.clone(),
            StackGraph {
                id: id.clone(),
                kind,
                template,
                dependencies: deps,
                env: env.clone(),
            },
        );
    }

    Ok(Assembly {
        name: resolved.name,
        order,
        stacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grants::TABLE_ACTIONS;
    use crate::core::parser::parse_config;
    use crate::core::stages::StageKind;
    use crate::core::topology::NatTopology;

    const PROJECT: &str = r#"
version: "1.0"
name: example-app
params:
  app: example-app
shared:
  repository: "{{params.app}}"
  dev_registry: "dev-{{params.app}}"
  prod_registry: "prod-{{params.app}}"
pipelines:
  PipelineStackDev:
    app_name: "{{params.app}}"
    cidr: 10.10.0.0/16
    max_azs: 3
    repository: "{{params.app}}"
    branch: develop
    registry: "dev-{{params.app}}"
  PipelineStackProd:
    app_name: "{{params.app}}"
    production: true
    cidr: 10.20.0.0/16
    max_azs: 3
    repository: "{{params.app}}"
    branch: master
    registry: "prod-{{params.app}}"
    manual_approval: true
    approval_emails: [who@example.com]
"#;

    fn assembly() -> Assembly {
        assemble(&parse_config(PROJECT).unwrap(), &AssemblyEnv::default()).unwrap()
    }

    fn summary<'a>(a: &'a Assembly, id: &str) -> &'a PipelineSummary {
        match &a.stacks[id].kind {
            StackKind::Pipeline(s) => s,
            StackKind::Shared => panic!("{} is not a pipeline", id),
        }
    }

    #[test]
    fn test_order_and_dependencies() {
        let a = assembly();
        assert_eq!(a.order, vec!["CommonStack", "PipelineStackDev", "PipelineStackProd"]);
        assert_eq!(a.stacks["PipelineStackProd"].dependencies, vec!["CommonStack"]);
        assert!(matches!(a.stacks["CommonStack"].kind, StackKind::Shared));
    }

    #[test]
    fn test_dev_scenario() {
        let a = assembly();
        let dev = summary(&a, "PipelineStackDev");
        assert_eq!(
            dev.stages.as_slice(),
            &[StageKind::Source, StageKind::Build, StageKind::Deploy]
        );
        assert_eq!(dev.prefix, "dev-example-app-");
        assert_eq!(dev.context.source_branch, "develop");
        assert!(matches!(dev.topology.nat, NatTopology::Instances { count: 2, .. }));
    }

    #[test]
    fn test_prod_scenario() {
        let a = assembly();
        let prod = summary(&a, "PipelineStackProd");
        assert_eq!(
            prod.stages.names(),
            vec!["Source", "Build", "ManualApproval", "Deploy"]
        );
        assert_eq!(prod.prefix, "prod-example-app-");
        assert_eq!(prod.topology.nat, NatTopology::Gateways { count: 3 });
        let t = &a.stacks["PipelineStackProd"].template;
        assert_eq!(t.ids_of_type("AWS::SNS::Subscription").len(), 1);
    }

    #[test]
    fn test_owned_names_carry_prefix() {
        let a = assembly();
        let t = &a.stacks["PipelineStackDev"].template;
        let names = [
            ("ProductTable", "TableName"),
            ("FargateTaskRole", "RoleName"),
            ("LogGroup", "LogGroupName"),
            ("Pipeline", "Name"),
            ("BuildProject", "Name"),
        ];
        for (id, field) in names {
            let value = t.resources[id].prop(field).and_then(|v| v.as_str()).unwrap();
            assert!(value.starts_with("dev-example-app-"), "{} = {}", id, value);
        }
    }

    #[test]
    fn test_only_task_role_touches_table() {
        let a = assembly();
        let t = &a.stacks["PipelineStackProd"].template;
        let json = serde_json::to_value(t).unwrap();
        let mut table_statements = 0;
        for (id, r) in json["Resources"].as_object().unwrap() {
            if r["Type"] != "AWS::IAM::Role" {
                continue;
            }
            for policy in r["Properties"]["Policies"].as_array().unwrap() {
                for st in policy["PolicyDocument"]["Statement"].as_array().unwrap() {
                    let actions = st["Action"].as_array().unwrap();
                    if actions.iter().any(|a| a.as_str().unwrap().starts_with("dynamodb:")) {
                        assert_eq!(id, "FargateTaskRole");
                        assert_eq!(actions.len(), TABLE_ACTIONS.len());
                        assert_eq!(st["Resource"].as_array().unwrap().len(), 2);
                        table_statements += 1;
                    }
                }
            }
        }
        assert_eq!(table_statements, 1);
    }

    #[test]
    fn test_env_explicit_beats_ambient() {
        let yaml = format!("{}env:\n  region: eu-west-1\n", PROJECT);
        let ambient = AssemblyEnv {
            account: Some("123456789012".to_string()),
            region: Some("us-east-1".to_string()),
        };
        let a = assemble(&parse_config(&yaml).unwrap(), &ambient).unwrap();
        let env = &a.stacks["CommonStack"].env;
        assert_eq!(env.account.as_deref(), Some("123456789012"));
        assert_eq!(env.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_env_unset_is_tolerated() {
        let a = assembly();
        assert_eq!(a.stacks["PipelineStackDev"].env, AssemblyEnv::default());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let a = assembly();
        let b = assembly();
        for id in &a.order {
            assert_eq!(
                a.stacks[id].template.to_json().unwrap(),
                b.stacks[id].template.to_json().unwrap()
            );
        }
    }

    #[test]
    fn test_pipeline_only_project() {
        let yaml = r#"
version: "1.0"
name: solo
pipelines:
  Solo:
    app_name: solo
    cidr: 10.0.0.0/16
    max_azs: 1
    repository: solo
    branch: main
    registry: dev-solo
"#;
        let a = assemble(&parse_config(yaml).unwrap(), &AssemblyEnv::default()).unwrap();
        assert_eq!(a.order, vec!["Solo"]);
        assert!(a.stacks["Solo"].dependencies.is_empty());
    }
}
