//! Compute service: ECS cluster, load-balanced Fargate service, logging.

use super::network::NetworkRefs;
use super::{ecr_arn, ecr_uri_pattern, get_att, join, reference, sub};
use crate::core::buildspec::{CONTAINER_NAME, IMAGE_TAG};
use crate::core::grants::{self, PolicyStatement};
use crate::core::naming;
use crate::core::types::{CfnResource, StageContext, Template};
use serde_json::json;

pub const CLUSTER: &str = "Cluster";
pub const LOG_GROUP: &str = "LogGroup";
pub const EXECUTION_ROLE: &str = "TaskExecutionRole";
pub const TASK_DEFINITION: &str = "TaskDefinition";
pub const LB_SECURITY_GROUP: &str = "LoadBalancerSecurityGroup";
pub const SERVICE_SECURITY_GROUP: &str = "ServiceSecurityGroup";
pub const LOAD_BALANCER: &str = "LoadBalancer";
pub const TARGET_GROUP: &str = "TargetGroup";
pub const LISTENER: &str = "Listener";
pub const SERVICE: &str = "FargateService";

pub const CONTAINER_PORT: u16 = 8080;
pub const LISTENER_PORT: u16 = 80;
pub const CPU_UNITS: &str = "256";
pub const MEMORY_MIB: &str = "512";
pub const DESIRED_COUNT: u32 = 5;
pub const LOG_RETENTION_DAYS: u32 = 7;

/// IDs the deploy stage targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRefs {
    pub cluster: String,
    pub service: String,
    pub execution_role: String,
}

/// Declare the service stack around the container image in `ctx.image_registry`.
pub fn add_service(
    t: &mut Template,
    ctx: &StageContext,
    network: &NetworkRefs,
    task_role: &str,
) -> Result<ServiceRefs, String> {
    let app = &ctx.application_name;
    let prod = ctx.is_production;

    t.add(CLUSTER, CfnResource::new("AWS::ECS::Cluster", json!({})))?;
    t.add(
        LOG_GROUP,
        CfnResource::new(
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": naming::prefixed(app, prod, "Fargate"),
                "RetentionInDays": LOG_RETENTION_DAYS,
            }),
        )
        .removal_policy(ctx.removal_policy()),
    )?;

    let pull = PolicyStatement::allow(
        [
            "ecr:BatchCheckLayerAvailability",
            "ecr:GetDownloadUrlForLayer",
            "ecr:BatchGetImage",
        ],
        vec![ecr_arn(&ctx.image_registry)],
    );
    // Registry login tokens are account-scoped; the API has no resource form.
    let token = PolicyStatement::allow(["ecr:GetAuthorizationToken"], vec![json!("*")]);
    let logs = PolicyStatement::allow(
        ["logs:CreateLogStream", "logs:PutLogEvents"],
        vec![get_att(LOG_GROUP, "Arn")],
    );
    t.add(
        EXECUTION_ROLE,
        CfnResource::new(
            "AWS::IAM::Role",
            json!({
                "AssumeRolePolicyDocument": grants::assume_role_policy("ecs-tasks.amazonaws.com"),
                "Policies": [grants::inline_policy("ImagePullAndLogs", &[pull, token, logs])],
            }),
        ),
    )?;

    t.add(
        TASK_DEFINITION,
        CfnResource::new(
            "AWS::ECS::TaskDefinition",
            json!({
                "Family": naming::prefixed(app, prod, "web"),
                "Cpu": CPU_UNITS,
                "Memory": MEMORY_MIB,
                "NetworkMode": "awsvpc",
                "RequiresCompatibilities": ["FARGATE"],
                "ExecutionRoleArn": get_att(EXECUTION_ROLE, "Arn"),
                "TaskRoleArn": get_att(task_role, "Arn"),
                "ContainerDefinitions": [{
                    "Name": CONTAINER_NAME,
                    "Image": sub(&format!("{}:{}", ecr_uri_pattern(&ctx.image_registry), IMAGE_TAG)),
                    "Essential": true,
                    "PortMappings": [{ "ContainerPort": CONTAINER_PORT, "Protocol": "tcp" }],
                    "Environment": [
                        { "Name": "STAGE", "Value": ctx.stage().as_str() },
                        { "Name": "GIN_MODE", "Value": "release" },
                    ],
                    "LogConfiguration": {
                        "LogDriver": "awslogs",
                        "Options": {
                            "awslogs-group": reference(LOG_GROUP),
                            "awslogs-stream-prefix": naming::stack_prefix(app, prod),
                            "awslogs-region": reference("AWS::Region"),
                        },
                    },
                }],
            }),
        ),
    )?;

    t.add(
        LB_SECURITY_GROUP,
        CfnResource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Public load balancer",
                "VpcId": reference(&network.vpc),
                "SecurityGroupIngress": [{
                    "IpProtocol": "tcp",
                    "FromPort": LISTENER_PORT,
                    "ToPort": LISTENER_PORT,
                    "CidrIp": "0.0.0.0/0",
                }],
            }),
        ),
    )?;
    t.add(
        SERVICE_SECURITY_GROUP,
        CfnResource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": "Fargate service tasks",
                "VpcId": reference(&network.vpc),
                "SecurityGroupIngress": [{
                    "IpProtocol": "tcp",
                    "FromPort": CONTAINER_PORT,
                    "ToPort": CONTAINER_PORT,
                    "SourceSecurityGroupId": get_att(LB_SECURITY_GROUP, "GroupId"),
                }],
            }),
        ),
    )?;

    let mut lb = CfnResource::new(
        "AWS::ElasticLoadBalancingV2::LoadBalancer",
        json!({
            "Type": "application",
            "Scheme": "internet-facing",
            "Subnets": network.public_subnet_refs(),
            "SecurityGroups": [get_att(LB_SECURITY_GROUP, "GroupId")],
        }),
    );
    for route in &network.public_routes {
        lb = lb.depends_on(route);
    }
    t.add(LOAD_BALANCER, lb)?;
    t.add(
        TARGET_GROUP,
        CfnResource::new(
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            json!({
                "Port": LISTENER_PORT,
                "Protocol": "HTTP",
                "TargetType": "ip",
                "VpcId": reference(&network.vpc),
            }),
        ),
    )?;
    t.add(
        LISTENER,
        CfnResource::new(
            "AWS::ElasticLoadBalancingV2::Listener",
            json!({
                "LoadBalancerArn": reference(LOAD_BALANCER),
                "Port": LISTENER_PORT,
                "Protocol": "HTTP",
                "DefaultActions": [{ "Type": "forward", "TargetGroupArn": reference(TARGET_GROUP) }],
            }),
        ),
    )?;

    t.add(
        SERVICE,
        CfnResource::new(
            "AWS::ECS::Service",
            json!({
                "Cluster": reference(CLUSTER),
                "LaunchType": "FARGATE",
                "DesiredCount": DESIRED_COUNT,
                "TaskDefinition": reference(TASK_DEFINITION),
                "HealthCheckGracePeriodSeconds": 60,
                "DeploymentConfiguration": { "MaximumPercent": 200, "MinimumHealthyPercent": 50 },
                "NetworkConfiguration": {
                    "AwsvpcConfiguration": {
                        "AssignPublicIp": "DISABLED",
                        "Subnets": network.private_subnet_refs(),
                        "SecurityGroups": [get_att(SERVICE_SECURITY_GROUP, "GroupId")],
                    },
                },
                "LoadBalancers": [{
                    "ContainerName": CONTAINER_NAME,
                    "ContainerPort": CONTAINER_PORT,
                    "TargetGroupArn": reference(TARGET_GROUP),
                }],
            }),
        )
        .depends_on(LISTENER),
    )?;

    t.output(
        "LoadBalancerDns",
        get_att(LOAD_BALANCER, "DNSName"),
        "Public load balancer DNS name",
    );
    t.output(
        "ServiceUrl",
        join(vec![json!("http://"), get_att(LOAD_BALANCER, "DNSName")]),
        "Service URL",
    );

    Ok(ServiceRefs {
        cluster: CLUSTER.to_string(),
        service: SERVICE.to_string(),
        execution_role: EXECUTION_ROLE.to_string(),
    })
}
