//! Resource builders: declare CloudFormation resources into a template.
//!
//! Each builder adds a group of related resources under fixed logical IDs and
//! returns the IDs other builders need to reference. Nothing here computes a
//! value the engine can compute: ARNs, zones, subnet ranges and AMIs are left
//! as intrinsic functions.

pub mod data;
pub mod network;
pub mod pipeline;
pub mod registry;
pub mod service;

use serde_json::{json, Value};

/// `{"Ref": id}`
pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

/// `{"Fn::Sub": s}`
pub fn sub(s: &str) -> Value {
    json!({ "Fn::Sub": s })
}

/// `{"Fn::Join": ["", parts]}`
pub fn join(parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": ["", parts] })
}

/// The `index`-th availability zone of the stack's region.
pub fn select_az(index: u32) -> Value {
    json!({ "Fn::Select": [index, { "Fn::GetAZs": "" }] })
}

/// `Name` tag list.
pub fn name_tag(name: &str) -> Value {
    json!([{ "Key": "Name", "Value": name }])
}

/// ARN of a CodeCommit repository imported by name.
pub fn codecommit_arn(repository: &str) -> Value {
    sub(&format!(
        "arn:${{AWS::Partition}}:codecommit:${{AWS::Region}}:${{AWS::AccountId}}:{}",
        repository
    ))
}

/// ARN of an ECR repository imported by name.
pub fn ecr_arn(repository: &str) -> Value {
    sub(&format!(
        "arn:${{AWS::Partition}}:ecr:${{AWS::Region}}:${{AWS::AccountId}}:repository/{}",
        repository
    ))
}

/// Registry URI of an ECR repository imported by name.
pub fn ecr_uri(repository: &str) -> Value {
    sub(&ecr_uri_pattern(repository))
}

/// `Fn::Sub` pattern for an ECR repository URI.
pub fn ecr_uri_pattern(repository: &str) -> String {
    format!(
        "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/{}",
        repository
    )
}
