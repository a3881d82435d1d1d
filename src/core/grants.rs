//! IAM policy statements and the least-privilege table access grant.
//!
//! Every policy statement in an assembled graph is built here. The execution
//! role's data access goes through [`table_access_grant`] only.

use serde::Serialize;
use serde_json::{json, Value};

/// The six data-plane verbs the execution role may use on its table.
pub const TABLE_ACTIONS: [&str; 6] = [
    "dynamodb:GetItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
    "dynamodb:Query",
    "dynamodb:Scan",
];

/// One `Allow` statement. Resources are template expressions (ARNs may be
/// intrinsic functions resolved by the engine).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: &'static str,
    pub action: Vec<String>,
    pub resource: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow<I, S>(actions: I, resources: Vec<Value>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            effect: "Allow",
            action: actions.into_iter().map(Into::into).collect(),
            resource: resources,
        }
    }

    pub fn has_wildcard_action(&self) -> bool {
        self.action.iter().any(|a| a == "*" || a.ends_with(":*"))
    }

    pub fn has_wildcard_resource(&self) -> bool {
        self.resource.iter().any(|r| r == "*")
    }
}

/// A grant of actions on resources to a principal (a role logical ID).
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    pub principal: String,
    pub statement: PolicyStatement,
}

/// Grant the fixed table verbs on a table and its indexes.
///
/// `table_arn` is the table's ARN expression. The statement always covers
/// exactly `{arn, arn + "/index/*"}`.
pub fn table_access_grant(principal: &str, table_arn: Value) -> AccessGrant {
    let index_arn = json!({ "Fn::Join": ["", [table_arn.clone(), "/index/*"]] });
    AccessGrant {
        principal: principal.to_string(),
        statement: PolicyStatement::allow(TABLE_ACTIONS, vec![table_arn, index_arn]),
    }
}

/// Render a policy document from statements.
pub fn policy_document(statements: &[PolicyStatement]) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": statements,
    })
}

/// Trust policy letting a service principal assume a role.
pub fn assume_role_policy(service: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": service },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// One inline policy entry for an `AWS::IAM::Role`.
pub fn inline_policy(name: &str, statements: &[PolicyStatement]) -> Value {
    json!({
        "PolicyName": name,
        "PolicyDocument": policy_document(statements),
    })
}
