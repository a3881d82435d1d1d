//! Resource naming: deterministic per-stage namespaces.
//!
//! Resource identity in the provisioning engine is derived from these names,
//! so every function here is pure: identical inputs always give identical
//! strings. Changing a prefix makes the engine replace resources, not rename
//! them.

use super::types::Stage;
use regex::Regex;
use std::sync::OnceLock;

/// Prefix applied to every owned resource name: `<stage>-<app>-`.
pub fn resource_prefix(application_name: &str, is_production: bool) -> String {
    format!("{}-", stack_prefix(application_name, is_production))
}

/// Stage-qualified application name without the trailing separator:
/// `<stage>-<app>`. Used for log stream prefixes.
pub fn stack_prefix(application_name: &str, is_production: bool) -> String {
    format!(
        "{}-{}",
        Stage::from_production(is_production),
        application_name
    )
}

/// Qualify a resource name with the stage prefix.
pub fn prefixed(application_name: &str, is_production: bool, name: &str) -> String {
    format!("{}{}", resource_prefix(application_name, is_production), name)
}

/// Default image registry name for a stage: camelCase boundaries become `_`
/// and the result is lowercased, e.g. `exampleApp` → `dev-example_app`.
pub fn registry_name(stage: Stage, application_name: &str) -> String {
    format!("{}-{}", stage, snake_lower(application_name))
}

fn snake_lower(name: &str) -> String {
    static UPPER: OnceLock<Regex> = OnceLock::new();
    let upper = UPPER.get_or_init(|| Regex::new(r"[A-Z]").expect("static regex"));

    let mut out = String::with_capacity(name.len() + 4);
    let mut last = 0;
    for m in upper.find_iter(name) {
        out.push_str(&name[last..m.start()]);
        if m.start() > 0 {
            out.push('_');
        }
        last = m.start();
    }
    out.push_str(&name[last..]);
    out.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefix_dev() {
        assert_eq!(resource_prefix("example-app", false), "dev-example-app-");
    }

    #[test]
    fn test_prefix_prod() {
        assert_eq!(resource_prefix("example-app", true), "prod-example-app-");
    }

    #[test]
    fn test_stack_prefix() {
        assert_eq!(stack_prefix("example-app", false), "dev-example-app");
        assert_eq!(stack_prefix("example-app", true), "prod-example-app");
    }

    #[test]
    fn test_prefixed_names() {
        assert_eq!(prefixed("example-app", false, "product"), "dev-example-app-product");
        assert_eq!(
            prefixed("example-app", true, "FargateTaskRole"),
            "prod-example-app-FargateTaskRole"
        );
    }

    #[test]
    fn test_dev_and_prod_never_collide() {
        assert_ne!(
            prefixed("example-app", false, "product"),
            prefixed("example-app", true, "product")
        );
    }

    #[test]
    fn test_registry_name_kebab() {
        assert_eq!(registry_name(Stage::Dev, "example-app"), "dev-example-app");
        assert_eq!(registry_name(Stage::Prod, "example-app"), "prod-example-app");
    }

    #[test]
    fn test_registry_name_camel_case() {
        assert_eq!(registry_name(Stage::Dev, "exampleApp"), "dev-example_app");
        assert_eq!(registry_name(Stage::Prod, "MyWebApp"), "prod-my_web_app");
    }

    proptest! {
        #[test]
        fn prop_prefix_is_stable(app in "[a-z][a-z0-9-]{0,20}", prod in any::<bool>()) {
            let first = resource_prefix(&app, prod);
            let second = resource_prefix(&app, prod);
            prop_assert_eq!(&first, &second);
            let expected = if prod { format!("prod-{}-", app) } else { format!("dev-{}-", app) };
            prop_assert_eq!(first, expected);
        }
    }
}
