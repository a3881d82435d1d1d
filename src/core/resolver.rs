//! Template resolution and stack dependency ordering.
//!
//! Resolves `{{params.key}}` templates in every string field of the project.
//! Builds a DAG from stack dependencies (every pipeline depends on the shared
//! stack, plus explicit `depends_on`) and computes a deployment order using
//! Kahn's algorithm with deterministic (alphabetical) tie-breaking.

use super::types::*;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<String, String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..]
            .find("}}")
            .ok_or_else(|| format!("unclosed template at position {}", open))?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = match key.strip_prefix("params.") {
            Some(param_key) => params
                .get(param_key)
                .map(yaml_value_to_string)
                .ok_or_else(|| format!("unknown param: {}", param_key))?,
            None => return Err(format!("unknown template variable: {}", key)),
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

fn resolve_all(
    values: &[String],
    params: &HashMap<String, serde_yaml_ng::Value>,
) -> Result<Vec<String>, String> {
    values.iter().map(|v| resolve_template(v, params)).collect()
}

/// Resolve templates in every string field of the project.
pub fn resolve_config(config: &ProjectConfig) -> Result<ProjectConfig, String> {
    let params = &config.params;
    let mut resolved = config.clone();

    if let Some(ref mut env) = resolved.env {
        if let Some(ref account) = env.account {
            env.account = Some(resolve_template(account, params)?);
        }
        if let Some(ref region) = env.region {
            env.region = Some(resolve_template(region, params)?);
        }
    }

    if let Some(ref mut shared) = resolved.shared {
        shared.repository = resolve_template(&shared.repository, params)?;
        shared.dev_registry = resolve_template(&shared.dev_registry, params)?;
        shared.prod_registry = resolve_template(&shared.prod_registry, params)?;
    }

    for (id, stack) in resolved.pipelines.iter_mut() {
        let ctx = |e: String| format!("pipeline '{}': {}", id, e);
        stack.app_name = resolve_template(&stack.app_name, params).map_err(ctx)?;
        stack.cidr = resolve_template(&stack.cidr, params).map_err(ctx)?;
        stack.repository = resolve_template(&stack.repository, params).map_err(ctx)?;
        stack.branch = resolve_template(&stack.branch, params).map_err(ctx)?;
        stack.registry = resolve_template(&stack.registry, params).map_err(ctx)?;
        stack.approval_emails = resolve_all(&stack.approval_emails, params).map_err(ctx)?;
    }

    Ok(resolved)
}

/// Dependencies of every stack, keyed by stack ID in declaration order.
pub fn stack_dependencies(config: &ProjectConfig) -> IndexMap<String, Vec<String>> {
    let mut deps = IndexMap::new();
    if let Some(ref shared) = config.shared {
        deps.insert(shared.id.clone(), Vec::new());
    }
    for (id, stack) in &config.pipelines {
        let mut edges = Vec::new();
        if let Some(ref shared) = config.shared {
            edges.push(shared.id.clone());
        }
        for dep in &stack.depends_on {
            if !edges.contains(dep) {
                edges.push(dep.clone());
            }
        }
        deps.insert(id.clone(), edges);
    }
    deps
}

/// Build a deployment order from stack dependencies.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_stack_order(config: &ProjectConfig) -> Result<Vec<String>, String> {
    let deps = stack_dependencies(config);
    let stack_ids: Vec<String> = deps.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &stack_ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for (id, edges) in &deps {
        for dep in edges {
            let dependents = adjacency
                .get_mut(dep)
                .ok_or_else(|| format!("stack '{}' depends on unknown '{}'", id, dep))?;
            dependents.push(id.clone());
            if let Some(degree) = in_degree.get_mut(id) {
                *degree += 1;
            }
        }
    }

    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    let mut queue: VecDeque<String> = zero_degree.into_iter().collect();

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(neighbors) = adjacency.get(&current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor.clone());
                    }
                }
            }
        }
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != stack_ids.len() {
        let remaining: HashSet<_> = stack_ids.iter().collect();
        let ordered: HashSet<_> = order.iter().collect();
        let mut cycle_members: Vec<_> = remaining
            .difference(&ordered)
            .map(|s| s.as_str())
            .collect();
        cycle_members.sort_unstable();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_config;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, serde_yaml_ng::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_yaml_ng::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_resolve_params() {
        let p = params(&[("name", "world")]);
        assert_eq!(resolve_template("hello {{params.name}}", &p).unwrap(), "hello world");
    }

    #[test]
    fn test_resolve_unknown_param() {
        let result = resolve_template("{{params.missing}}", &HashMap::new());
        assert!(result.unwrap_err().contains("unknown param"));
    }

    #[test]
    fn test_resolve_unknown_namespace() {
        let result = resolve_template("{{stack.vpc.id}}", &HashMap::new());
        assert!(result.unwrap_err().contains("unknown template variable"));
    }

    #[test]
    fn test_resolve_unclosed() {
        let result = resolve_template("{{params.a", &params(&[("a", "x")]));
        assert!(result.unwrap_err().contains("unclosed"));
    }

    #[test]
    fn test_resolve_multiple() {
        let p = params(&[("a", "X"), ("b", "Y")]);
        assert_eq!(resolve_template("{{params.a}}-{{ params.b }}", &p).unwrap(), "X-Y");
    }

    #[test]
    fn test_resolve_config_fields() {
        let config = parse_config(
            r#"
version: "1.0"
name: demo
params:
  app: example-app
  region: eu-west-1
env:
  region: "{{params.region}}"
shared:
  repository: "{{params.app}}"
  dev_registry: "dev-{{params.app}}"
  prod_registry: "prod-{{params.app}}"
pipelines:
  Dev:
    app_name: "{{params.app}}"
    cidr: 10.10.0.0/16
    repository: "{{params.app}}"
    branch: develop
    registry: "dev-{{params.app}}"
"#,
        )
        .unwrap();
        let resolved = resolve_config(&config).unwrap();
        let shared = resolved.shared.unwrap();
        assert_eq!(shared.dev_registry, "dev-example-app");
        assert_eq!(resolved.pipelines["Dev"].app_name, "example-app");
        assert_eq!(resolved.env.unwrap().region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_resolve_config_reports_stack() {
        let config = parse_config(
            r#"
version: "1.0"
name: demo
pipelines:
  Dev:
    app_name: "{{params.nope}}"
    cidr: 10.10.0.0/16
    repository: r
    branch: develop
    registry: r
"#,
        )
        .unwrap();
        let err = resolve_config(&config).unwrap_err();
        assert!(err.contains("pipeline 'Dev'"));
    }

    fn two_stage() -> ProjectConfig {
        parse_config(
            r#"
version: "1.0"
name: demo
shared:
  repository: r
  dev_registry: d
  prod_registry: p
pipelines:
  PipelineStackProd:
    app_name: a
    production: true
    cidr: 10.20.0.0/16
    repository: r
    branch: master
    registry: p
  PipelineStackDev:
    app_name: a
    cidr: 10.10.0.0/16
    repository: r
    branch: develop
    registry: d
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_shared_stack_first() {
        let order = build_stack_order(&two_stage()).unwrap();
        assert_eq!(order, vec!["CommonStack", "PipelineStackDev", "PipelineStackProd"]);
    }

    #[test]
    fn test_implicit_shared_dependency() {
        let deps = stack_dependencies(&two_stage());
        assert_eq!(deps["PipelineStackDev"], vec!["CommonStack"]);
        assert!(deps["CommonStack"].is_empty());
    }

    #[test]
    fn test_explicit_dependency_orders_pipelines() {
        let mut config = two_stage();
        config.pipelines["PipelineStackDev"]
            .depends_on
            .push("PipelineStackProd".to_string());
        let order = build_stack_order(&config).unwrap();
        assert_eq!(order, vec!["CommonStack", "PipelineStackProd", "PipelineStackDev"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut config = two_stage();
        config.pipelines["PipelineStackDev"]
            .depends_on
            .push("Ghost".to_string());
        let err = build_stack_order(&config).unwrap_err();
        assert!(err.contains("unknown 'Ghost'"));
    }

    #[test]
    fn test_cycle() {
        let mut config = two_stage();
        config.pipelines["PipelineStackDev"]
            .depends_on
            .push("PipelineStackProd".to_string());
        config.pipelines["PipelineStackProd"]
            .depends_on
            .push("PipelineStackDev".to_string());
        let err = build_stack_order(&config).unwrap_err();
        assert!(err.contains("cycle"));
        assert!(err.contains("PipelineStackDev, PipelineStackProd"));
    }
}
