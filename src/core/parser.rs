//! YAML parsing and validation.
//!
//! Parses stackforge.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Stack IDs must be unique across shared and pipeline stacks
//! - depends_on references must exist
//! - Required fields per stack kind
//!
//! CIDR syntax, name lengths and IAM validity are left to the provisioning
//! engine.

use super::resolver;
use super::types::*;
use crate::resources::network::MAX_AZS;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a stackforge.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<ProjectConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a stackforge.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<ProjectConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

fn require(errors: &mut Vec<ValidationError>, owner: &str, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ValidationError {
            message: format!("{} has empty {}", owner, field),
        });
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &ProjectConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    if config.shared.is_none() && config.pipelines.is_empty() {
        errors.push(ValidationError {
            message: "no stacks declared (need `shared` or `pipelines`)".to_string(),
        });
    }

    if let Some(ref shared) = config.shared {
        let owner = format!("shared stack '{}'", shared.id);
        require(&mut errors, &owner, "id", &shared.id);
        require(&mut errors, &owner, "repository", &shared.repository);
        require(&mut errors, &owner, "dev_registry", &shared.dev_registry);
        require(&mut errors, &owner, "prod_registry", &shared.prod_registry);
        if config.pipelines.contains_key(&shared.id) {
            errors.push(ValidationError {
                message: format!("stack id '{}' is declared twice", shared.id),
            });
        }
    }

    for (id, stack) in &config.pipelines {
        let owner = format!("pipeline '{}'", id);
        require(&mut errors, &owner, "app_name", &stack.app_name);
        require(&mut errors, &owner, "cidr", &stack.cidr);
        require(&mut errors, &owner, "repository", &stack.repository);
        require(&mut errors, &owner, "branch", &stack.branch);
        require(&mut errors, &owner, "registry", &stack.registry);

        if stack.max_azs == 0 || stack.max_azs > MAX_AZS {
            errors.push(ValidationError {
                message: format!(
                    "{} max_azs must be between 1 and {}, got {}",
                    owner, MAX_AZS, stack.max_azs
                ),
            });
        }

        for dep in &stack.depends_on {
            let shared_id = config.shared.as_ref().map(|s| s.id.as_str());
            if !config.pipelines.contains_key(dep) && shared_id != Some(dep.as_str()) {
                errors.push(ValidationError {
                    message: format!("{} depends on unknown stack '{}'", owner, dep),
                });
            }
            if dep == id {
                errors.push(ValidationError {
                    message: format!("{} depends on itself", owner),
                });
            }
        }
    }

    errors
}

/// Non-fatal findings: configurations the engine accepts but that are likely
/// mistakes. Names are compared after `{{params.*}}` resolution; a project
/// whose params do not resolve is compared as written.
pub fn config_warnings(config: &ProjectConfig) -> Vec<String> {
    let resolved = resolver::resolve_config(config);
    let config = resolved.as_ref().unwrap_or(config);
    let mut warnings = Vec::new();

    for (id, stack) in &config.pipelines {
        if stack.manual_approval && !stack.production {
            warnings.push(format!(
                "pipeline '{}': manual_approval is ignored outside production",
                id
            ));
        }
        if stack.production && stack.manual_approval && stack.approval_emails.is_empty() {
            warnings.push(format!(
                "pipeline '{}': approval gate has no notification recipients",
                id
            ));
        }
        if !stack.approval_emails.is_empty() && !(stack.production && stack.manual_approval) {
            warnings.push(format!(
                "pipeline '{}': approval_emails set but no approval gate is declared",
                id
            ));
        }

        if let Some(ref shared) = config.shared {
            if stack.repository != shared.repository {
                warnings.push(format!(
                    "pipeline '{}': repository '{}' is not declared by shared stack '{}'",
                    id, stack.repository, shared.id
                ));
            }
            if stack.registry != shared.dev_registry && stack.registry != shared.prod_registry {
                warnings.push(format!(
                    "pipeline '{}': registry '{}' is not declared by shared stack '{}'",
                    id, stack.registry, shared.id
                ));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
name: example-app
shared:
  repository: example-app
  dev_registry: dev-example-app
  prod_registry: prod-example-app
pipelines:
  PipelineStackDev:
    app_name: example-app
    cidr: 10.10.0.0/16
    repository: example-app
    branch: develop
    registry: dev-example-app
"#;

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_parse_valid() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(config.name, "example-app");
        let errors = validate_config(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
        assert!(config_warnings(&config).is_empty());
    }

    #[test]
    fn test_bad_version() {
        let config = parse_config("version: \"2.0\"\nname: test\npipelines: {}\n").unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("version")));
        assert!(errors.iter().any(|e| e.message.contains("no stacks")));
    }

    #[test]
    fn test_empty_fields() {
        let yaml = VALID.replace("branch: develop", "branch: \"\"");
        let config = parse_config(&yaml).unwrap();
        let errors = validate_config(&config);
        assert_eq!(messages(&errors), vec!["pipeline 'PipelineStackDev' has empty branch"]);
    }

    #[test]
    fn test_zero_azs() {
        let yaml = VALID.replace("cidr: 10.10.0.0/16", "cidr: 10.10.0.0/16\n    max_azs: 0");
        let config = parse_config(&yaml).unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("max_azs")));
    }

    #[test]
    fn test_too_many_azs() {
        let yaml = VALID.replace("cidr: 10.10.0.0/16", "cidr: 10.10.0.0/16\n    max_azs: 3000000000");
        let config = parse_config(&yaml).unwrap();
        assert_eq!(
            messages(&validate_config(&config)),
            vec!["pipeline 'PipelineStackDev' max_azs must be between 1 and 128, got 3000000000"]
        );
    }

    #[test]
    fn test_warnings_compare_resolved_names() {
        let yaml = r#"
version: "1.0"
name: example-app
params:
  app: example-app
shared:
  repository: "{{params.app}}"
  dev_registry: "dev-{{params.app}}"
  prod_registry: "prod-{{params.app}}"
pipelines:
  Dev:
    app_name: example-app
    cidr: 10.10.0.0/16
    repository: example-app
    branch: develop
    registry: dev-example-app
  Prod:
    app_name: "{{params.app}}"
    production: true
    cidr: 10.20.0.0/16
    repository: "{{params.app}}"
    branch: master
    registry: "prod-{{params.app}}"
"#;
        let config = parse_config(yaml).unwrap();
        assert!(config_warnings(&config).is_empty(), "{:?}", config_warnings(&config));

        let stray = yaml.replace("registry: dev-example-app", "registry: \"dev-{{params.app}}-x\"");
        let config = parse_config(&stray).unwrap();
        assert_eq!(
            config_warnings(&config),
            vec!["pipeline 'Dev': registry 'dev-example-app-x' is not declared by shared stack 'CommonStack'"]
        );
    }

    #[test]
    fn test_cidr_not_validated_locally() {
        let yaml = VALID.replace("10.10.0.0/16", "not-a-cidr");
        let config = parse_config(&yaml).unwrap();
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_duplicate_stack_id() {
        let yaml = VALID.replace("PipelineStackDev:", "CommonStack:");
        let config = parse_config(&yaml).unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("declared twice")));
    }

    #[test]
    fn test_unknown_and_self_dependency() {
        let yaml = format!("{}    depends_on: [Ghost, PipelineStackDev]\n", VALID);
        let config = parse_config(&yaml).unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("unknown stack 'Ghost'")));
        assert!(errors.iter().any(|e| e.message.contains("depends on itself")));
    }

    #[test]
    fn test_dependency_on_shared_is_known() {
        let yaml = format!("{}    depends_on: [CommonStack]\n", VALID);
        let config = parse_config(&yaml).unwrap();
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn test_warn_gate_without_recipients() {
        let yaml = VALID.replace(
            "branch: develop",
            "branch: master\n    production: true\n    manual_approval: true",
        );
        let config = parse_config(&yaml).unwrap();
        let warnings = config_warnings(&config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("no notification recipients"));
    }

    #[test]
    fn test_warn_approval_outside_production() {
        let yaml = VALID.replace("branch: develop", "branch: develop\n    manual_approval: true");
        let config = parse_config(&yaml).unwrap();
        let warnings = config_warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("ignored outside production")));
    }

    #[test]
    fn test_warn_unknown_registry() {
        let yaml = VALID.replace("    registry: dev-example-app", "    registry: other");
        let config = parse_config(&yaml).unwrap();
        let warnings = config_warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("registry 'other'")));
    }

    #[test]
    fn test_parse_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stackforge.yaml");
        std::fs::write(&path, VALID).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(config.pipelines.len(), 1);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(parse_config("not: [valid: yaml: {{").is_err());
    }
}
