//! Application resource bundle: product table and the task role.

use super::get_att;
use crate::core::grants::{self, AccessGrant};
use crate::core::naming;
use crate::core::types::{CfnResource, StageContext, Template};
use serde_json::json;

pub const TABLE: &str = "ProductTable";
pub const TASK_ROLE: &str = "FargateTaskRole";
pub const CATEGORY_INDEX: &str = "product-category-index";

/// IDs and the grant issued to the execution role.
#[derive(Debug, Clone, PartialEq)]
pub struct AppResourceRefs {
    pub table: String,
    pub task_role: String,
    pub grant: AccessGrant,
}

/// Declare the table and an execution role that may only touch that table.
pub fn add_app_resources(t: &mut Template, ctx: &StageContext) -> Result<AppResourceRefs, String> {
    let app = &ctx.application_name;
    let prod = ctx.is_production;

    t.add(
        TABLE,
        CfnResource::new(
            "AWS::DynamoDB::Table",
            json!({
                "TableName": naming::prefixed(app, prod, "product"),
                "BillingMode": "PAY_PER_REQUEST",
                "AttributeDefinitions": [
                    { "AttributeName": "pid", "AttributeType": "S" },
                    { "AttributeName": "category", "AttributeType": "S" },
                    { "AttributeName": "name", "AttributeType": "S" },
                ],
                "KeySchema": [{ "AttributeName": "pid", "KeyType": "HASH" }],
                "GlobalSecondaryIndexes": [{
                    "IndexName": CATEGORY_INDEX,
                    "KeySchema": [
                        { "AttributeName": "category", "KeyType": "HASH" },
                        { "AttributeName": "name", "KeyType": "RANGE" },
                    ],
                    "Projection": { "ProjectionType": "ALL" },
                }],
            }),
        )
        .removal_policy(ctx.removal_policy()),
    )?;

    let grant = grants::table_access_grant(TASK_ROLE, get_att(TABLE, "Arn"));
    t.add(
        TASK_ROLE,
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "RoleName": naming::prefixed(app, prod, "FargateTaskRole"),
                "AssumeRolePolicyDocument": grants::assume_role_policy("ecs-tasks.amazonaws.com"),
                "Policies": [grants::inline_policy("ProductTableAccess", std::slice::from_ref(&grant.statement))],
            }),
        ),
    )?;

    Ok(AppResourceRefs {
        table: TABLE.to_string(),
        task_role: TASK_ROLE.to_string(),
        grant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(production: bool) -> StageContext {
        StageContext {
            application_name: "example-app".to_string(),
            is_production: production,
            address_block: "10.10.0.0/16".to_string(),
            max_azs: 3,
            source_repository: "example-app".to_string(),
            source_branch: "develop".to_string(),
            image_registry: "dev-example-app".to_string(),
            manual_approval: false,
            approval_emails: vec![],
        }
    }

    #[test]
    fn test_table_named_and_indexed() {
        let mut t = Template::new("app");
        add_app_resources(&mut t, &ctx(false)).unwrap();
        let table = &t.resources[TABLE];
        assert_eq!(table.prop("TableName"), Some(&json!("dev-example-app-product")));
        assert_eq!(table.prop("BillingMode"), Some(&json!("PAY_PER_REQUEST")));
        assert_eq!(
            table.prop("GlobalSecondaryIndexes").unwrap()[0]["IndexName"],
            CATEGORY_INDEX
        );
        assert_eq!(table.deletion_policy.as_deref(), Some("Delete"));
    }

    #[test]
    fn test_prod_table_retained() {
        let mut t = Template::new("app");
        add_app_resources(&mut t, &ctx(true)).unwrap();
        assert_eq!(t.resources[TABLE].deletion_policy.as_deref(), Some("Retain"));
        assert_eq!(
            t.resources[TASK_ROLE].prop("RoleName"),
            Some(&json!("prod-example-app-FargateTaskRole"))
        );
    }

    #[test]
    fn test_role_has_single_table_statement() {
        let mut t = Template::new("app");
        let refs = add_app_resources(&mut t, &ctx(false)).unwrap();
        let policies = t.resources[TASK_ROLE].prop("Policies").unwrap();
        assert_eq!(policies.as_array().unwrap().len(), 1);
        let statements = policies[0]["PolicyDocument"]["Statement"].as_array().unwrap();
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0]["Resource"][0], get_att(TABLE, "Arn"));
        assert_eq!(refs.grant.principal, TASK_ROLE);
        assert!(!refs.grant.statement.has_wildcard_resource());
    }
}
