//! Shared resources: source repository and per-stage image registries.

use super::{get_att, sub};
use crate::core::types::{CfnResource, RemovalPolicy, SharedStack, Template};
use serde_json::json;

pub const SOURCE_REPOSITORY: &str = "CodeCommitRepo";
pub const DEV_REGISTRY: &str = "DevEcrRepo";
pub const PROD_REGISTRY: &str = "ProdEcrRepo";

/// Declare the repository, both registries and their outputs.
///
/// Repositories hold history and images, so they are retained on delete
/// regardless of stage.
pub fn add_shared_resources(t: &mut Template, shared: &SharedStack) -> Result<(), String> {
    t.add(
        SOURCE_REPOSITORY,
        CfnResource::new(
            "AWS::CodeCommit::Repository",
            json!({ "RepositoryName": shared.repository }),
        )
        .removal_policy(RemovalPolicy::Retain),
    )?;

    for (id, name) in [
        (DEV_REGISTRY, &shared.dev_registry),
        (PROD_REGISTRY, &shared.prod_registry),
    ] {
        t.add(
            id,
            CfnResource::new("AWS::ECR::Repository", json!({ "RepositoryName": name }))
                .removal_policy(RemovalPolicy::Retain),
        )?;
    }

    t.output(
        "CodeCommitRepoArn",
        get_att(SOURCE_REPOSITORY, "Arn"),
        "Source repository ARN",
    );
    t.output(
        "CodeCommitRepoUrl",
        get_att(SOURCE_REPOSITORY, "CloneUrlSsh"),
        "Source repository SSH clone URL",
    );
    t.output(
        "DevEcrRepoUrl",
        registry_uri(DEV_REGISTRY),
        "Dev image registry URI",
    );
    t.output(
        "ProdEcrRepoUrl",
        registry_uri(PROD_REGISTRY),
        "Prod image registry URI",
    );
    Ok(())
}

fn registry_uri(logical_id: &str) -> serde_json::Value {
    sub(&format!(
        "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/${{{}}}",
        logical_id
    ))
}
