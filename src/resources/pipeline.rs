//! Delivery pipeline: artifact store, build project, approval topic,
//! branch trigger and the pipeline itself.

use super::service::ServiceRefs;
use super::{codecommit_arn, ecr_arn, ecr_uri, get_att, join, reference, sub};
use crate::core::buildspec::{self, BUILD_IMAGE, IMAGE_DEFINITIONS_FILE};
use crate::core::grants::{self, PolicyStatement};
use crate::core::naming;
use crate::core::stages::{PipelineStageList, StageKind};
use crate::core::types::{CfnResource, RemovalPolicy, StageContext, Template};
use serde_json::{json, Value};

pub const ARTIFACTS_BUCKET: &str = "PipelineArtifactsBucket";
pub const BUILD_ROLE: &str = "BuildRole";
pub const BUILD_PROJECT: &str = "BuildProject";
pub const APPROVAL_TOPIC: &str = "ApprovalTopic";
pub const PIPELINE_ROLE: &str = "PipelineRole";
pub const PIPELINE: &str = "Pipeline";
pub const TRIGGER_ROLE: &str = "SourceTriggerRole";
pub const TRIGGER_RULE: &str = "SourceTriggerRule";

const SOURCE_ARTIFACT: &str = "SourceOutput";
const BUILD_ARTIFACT: &str = "fargateBuildOutput";

/// Resources the pipeline must reference.
#[derive(Debug, Clone)]
pub struct PipelineInputs<'a> {
    pub stages: &'a PipelineStageList,
    pub service: &'a ServiceRefs,
    pub task_role: &'a str,
}

fn bucket_objects() -> Value {
    join(vec![get_att(ARTIFACTS_BUCKET, "Arn"), json!("/*")])
}

fn pipeline_arn() -> Value {
    sub(&format!(
        "arn:${{AWS::Partition}}:codepipeline:${{AWS::Region}}:${{AWS::AccountId}}:${{{}}}",
        PIPELINE
    ))
}

/// Declare the pipeline and everything it needs.
pub fn add_pipeline(t: &mut Template, ctx: &StageContext, inputs: &PipelineInputs<'_>) -> Result<(), String> {
    let app = &ctx.application_name;
    let prod = ctx.is_production;
    let project_name = naming::prefixed(app, prod, "Build");

    t.add(
        ARTIFACTS_BUCKET,
        CfnResource::new(
            "AWS::S3::Bucket",
            json!({
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
            }),
        )
        .removal_policy(RemovalPolicy::Retain),
    )?;

    add_build_project(t, ctx, &project_name)?;

    let gate = inputs.stages.has_approval();
    if gate {
        add_approval_topic(t, ctx)?;
    }

    add_pipeline_role(t, ctx, inputs, gate)?;

    let stages: Vec<Value> = inputs
        .stages
        .iter()
        .map(|kind| stage_declaration(kind, ctx, inputs.service))
        .collect();
    t.add(
        PIPELINE,
        CfnResource::new(
            "AWS::CodePipeline::Pipeline",
            json!({
                "Name": naming::prefixed(app, prod, "Pipeline"),
                "RoleArn": get_att(PIPELINE_ROLE, "Arn"),
                "ArtifactStore": { "Type": "S3", "Location": reference(ARTIFACTS_BUCKET) },
                "Stages": stages,
            }),
        )
        .depends_on(PIPELINE_ROLE),
    )?;

    add_source_trigger(t, ctx)?;
    Ok(())
}

fn add_build_project(t: &mut Template, ctx: &StageContext, project_name: &str) -> Result<(), String> {
    let build_logs = sub(&format!(
        "arn:${{AWS::Partition}}:logs:${{AWS::Region}}:${{AWS::AccountId}}:log-group:/aws/codebuild/{}:*",
        project_name
    ));
    let statements = [
        PolicyStatement::allow(
            ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
            vec![build_logs],
        ),
        PolicyStatement::allow(
            ["s3:GetObject", "s3:GetObjectVersion", "s3:PutObject"],
            vec![bucket_objects()],
        ),
        PolicyStatement::allow(
            [
                "ecr:BatchCheckLayerAvailability",
                "ecr:GetDownloadUrlForLayer",
                "ecr:BatchGetImage",
                "ecr:PutImage",
                "ecr:InitiateLayerUpload",
                "ecr:UploadLayerPart",
                "ecr:CompleteLayerUpload",
            ],
            vec![ecr_arn(&ctx.image_registry)],
        ),
        // Registry login tokens are account-scoped; the API has no resource form.
        PolicyStatement::allow(["ecr:GetAuthorizationToken"], vec![json!("*")]),
    ];
    t.add(
        BUILD_ROLE,
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": grants::assume_role_policy("codebuild.amazonaws.com"),
                "Policies": [grants::inline_policy("BuildAccess", &statements)],
            }),
        ),
    )?;

    let spec = buildspec::render_build_spec(&buildspec::docker_build_spec())?;
    t.add(
        BUILD_PROJECT,
        CfnResource::new(
            "AWS::CodeBuild::Project",
            json!({
                "Name": project_name,
                "Description": "Build project for the Fargate pipeline",
                "ServiceRole": get_att(BUILD_ROLE, "Arn"),
                "Source": { "Type": "CODEPIPELINE", "BuildSpec": spec },
                "Artifacts": { "Type": "CODEPIPELINE" },
                "Environment": {
                    "Type": "LINUX_CONTAINER",
                    "ComputeType": "BUILD_GENERAL1_SMALL",
                    "Image": BUILD_IMAGE,
                    "PrivilegedMode": true,
                    "EnvironmentVariables": [
                        { "Name": "REPOSITORY_NAME", "Type": "PLAINTEXT", "Value": ctx.image_registry },
                        { "Name": "REPOSITORY_URI", "Type": "PLAINTEXT", "Value": ecr_uri(&ctx.image_registry) },
                    ],
                },
            }),
        ),
    )?;
    Ok(())
}

/// Topic plus one email subscription per recipient. With no recipients the
/// topic is still declared and the gate has no subscribers.
fn add_approval_topic(t: &mut Template, ctx: &StageContext) -> Result<(), String> {
    if ctx.approval_emails.is_empty() {
        tracing::warn!(
            app = %ctx.application_name,
            "manual approval gate declared with no notification recipients"
        );
    }
    t.add(
        APPROVAL_TOPIC,
        CfnResource::new(
            "AWS::SNS::Topic",
            json!({ "DisplayName": format!("{} deployment manual approval", ctx.application_name) }),
        ),
    )?;
    for (i, email) in ctx.approval_emails.iter().enumerate() {
        t.add(
            format!("{}Subscription{}", APPROVAL_TOPIC, i + 1),
            CfnResource::new(
                "AWS::SNS::Subscription",
                json!({
                    "Protocol": "email",
                    "Endpoint": email,
                    "TopicArn": reference(APPROVAL_TOPIC),
                }),
            ),
        )?;
    }
    Ok(())
}

fn add_pipeline_role(
    t: &mut Template,
    ctx: &StageContext,
    inputs: &PipelineInputs<'_>,
    gate: bool,
) -> Result<(), String> {
    let mut statements = vec![
        PolicyStatement::allow(
            ["s3:GetObject", "s3:GetObjectVersion", "s3:GetBucketVersioning", "s3:PutObject"],
            vec![get_att(ARTIFACTS_BUCKET, "Arn"), bucket_objects()],
        ),
        PolicyStatement::allow(
            [
                "codecommit:GetBranch",
                "codecommit:GetCommit",
                "codecommit:UploadArchive",
                "codecommit:GetUploadArchiveStatus",
                "codecommit:CancelUploadArchive",
            ],
            vec![codecommit_arn(&ctx.source_repository)],
        ),
        PolicyStatement::allow(
            ["codebuild:BatchGetBuilds", "codebuild:StartBuild"],
            vec![get_att(BUILD_PROJECT, "Arn")],
        ),
        // ECS describe and register calls do not support resource-level scoping.
        PolicyStatement::allow(
            [
                "ecs:DescribeServices",
                "ecs:DescribeTaskDefinition",
                "ecs:DescribeTasks",
                "ecs:ListTasks",
                "ecs:RegisterTaskDefinition",
                "ecs:UpdateService",
            ],
            vec![json!("*")],
        ),
        PolicyStatement::allow(
            ["iam:PassRole"],
            vec![
                get_att(inputs.task_role, "Arn"),
                get_att(&inputs.service.execution_role, "Arn"),
            ],
        ),
    ];
    if gate {
        statements.push(PolicyStatement::allow(
            ["sns:Publish"],
            vec![reference(APPROVAL_TOPIC)],
        ));
    }
    t.add(
        PIPELINE_ROLE,
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": grants::assume_role_policy("codepipeline.amazonaws.com"),
                "Policies": [grants::inline_policy("PipelineAccess", &statements)],
            }),
        ),
    )
}

fn action_type(category: &str, provider: &str) -> Value {
    json!({ "Category": category, "Owner": "AWS", "Provider": provider, "Version": "1" })
}

fn stage_declaration(kind: StageKind, ctx: &StageContext, service: &ServiceRefs) -> Value {
    let action = match kind {
        StageKind::Source => json!({
            "Name": "CodeCommit",
            "ActionTypeId": action_type("Source", "CodeCommit"),
            "Configuration": {
                "RepositoryName": ctx.source_repository,
                "BranchName": ctx.source_branch,
                "PollForSourceChanges": false,
            },
            "OutputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
            "RunOrder": 1,
        }),
        StageKind::Build => json!({
            "Name": "DockerBuild",
            "ActionTypeId": action_type("Build", "CodeBuild"),
            "Configuration": { "ProjectName": reference(BUILD_PROJECT) },
            "InputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
            "OutputArtifacts": [{ "Name": BUILD_ARTIFACT }],
            "RunOrder": 1,
        }),
        StageKind::ManualApproval => json!({
            "Name": "Approve",
            "ActionTypeId": action_type("Approval", "Manual"),
            "Configuration": { "NotificationArn": reference(APPROVAL_TOPIC) },
            "RunOrder": 1,
        }),
        StageKind::Deploy => json!({
            "Name": "ECSDeploy",
            "ActionTypeId": action_type("Deploy", "ECS"),
            "Configuration": {
                "ClusterName": reference(&service.cluster),
                "ServiceName": get_att(&service.service, "Name"),
                "FileName": IMAGE_DEFINITIONS_FILE,
            },
            "InputArtifacts": [{ "Name": BUILD_ARTIFACT }],
            "RunOrder": 1,
        }),
    };
    json!({ "Name": kind.name(), "Actions": [action] })
}

/// Start the pipeline when the configured branch changes.
fn add_source_trigger(t: &mut Template, ctx: &StageContext) -> Result<(), String> {
    t.add(
        TRIGGER_ROLE,
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": grants::assume_role_policy("events.amazonaws.com"),
                "Policies": [grants::inline_policy(
                    "StartPipeline",
                    &[PolicyStatement::allow(["codepipeline:StartPipelineExecution"], vec![pipeline_arn()])],
                )],
            }),
        ),
    )?;
    t.add(
        TRIGGER_RULE,
        CfnResource::new(
            "AWS::Events::Rule",
            json!({
                "State": "ENABLED",
                "EventPattern": {
                    "source": ["aws.codecommit"],
                    "resources": [codecommit_arn(&ctx.source_repository)],
                    "detail-type": ["CodeCommit Repository State Change"],
                    "detail": {
                        "event": ["referenceCreated", "referenceUpdated"],
                        "referenceType": ["branch"],
                        "referenceName": [ctx.source_branch],
                    },
                },
                "Targets": [{
                    "Id": PIPELINE,
                    "Arn": pipeline_arn(),
                    "RoleArn": get_att(TRIGGER_ROLE, "Arn"),
                }],
            }),
        ),
    )
}
