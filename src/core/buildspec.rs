//! Build-stage command contract.
//!
//! The build stage logs in to the registry, builds, tags and pushes the image,
//! then writes `imagedefinitions.json`: a one-line JSON array naming the
//! container and image URI. The deploy stage reads exactly that shape, so
//! [`ImageDefinition`] and the `printf` in [`post_build_commands`] must agree.

use serde::{Deserialize, Serialize};

/// Container name the deploy stage rolls out.
pub const CONTAINER_NAME: &str = "web";

/// Artifact file handed from build to deploy.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// Image tag pushed by every build.
pub const IMAGE_TAG: &str = "latest";

/// CodeBuild managed image.
pub const BUILD_IMAGE: &str = "aws/codebuild/standard:3.0";

/// One entry in `imagedefinitions.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    pub name: String,
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// Render the `imagedefinitions.json` contents for an image.
pub fn image_definitions(repository_uri: &str, tag: &str) -> Result<String, String> {
    let defs = [ImageDefinition {
        name: CONTAINER_NAME.to_string(),
        image_uri: format!("{}:{}", repository_uri, tag),
    }];
    serde_json::to_string(&defs).map_err(|e| format!("image definitions serialize error: {}", e))
}

/// Parse `imagedefinitions.json` as the deploy stage does.
pub fn parse_image_definitions(json: &str) -> Result<Vec<ImageDefinition>, String> {
    serde_json::from_str(json).map_err(|e| format!("invalid {}: {}", IMAGE_DEFINITIONS_FILE, e))
}

/// Buildspec (CodeBuild schema 0.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    pub phases: Phases,
    pub artifacts: Artifacts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phases {
    pub install: InstallPhase,
    pub pre_build: CommandPhase,
    pub build: CommandPhase,
    pub post_build: CommandPhase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallPhase {
    #[serde(rename = "runtime-versions")]
    pub runtime_versions: indexmap::IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPhase {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifacts {
    pub files: Vec<String>,
}

fn commands(lines: &[&str]) -> CommandPhase {
    CommandPhase {
        commands: lines.iter().map(|l| l.to_string()).collect(),
    }
}

/// Commands that push the image and emit the image definitions artifact.
pub fn post_build_commands() -> Vec<String> {
    vec![
        "echo Build completed on `date`".to_string(),
        "echo Pushing the Docker image...".to_string(),
        "docker push $REPOSITORY_URI:$IMAGE_TAG".to_string(),
        format!(
            "printf '[{{\"name\":\"{}\",\"imageUri\":\"%s\"}}]' $REPOSITORY_URI:$IMAGE_TAG > ../{}",
            CONTAINER_NAME, IMAGE_DEFINITIONS_FILE
        ),
    ]
}

/// The fixed buildspec for the Docker build project.
pub fn docker_build_spec() -> BuildSpec {
    let mut runtime_versions = indexmap::IndexMap::new();
    runtime_versions.insert("golang".to_string(), "1.13".to_string());

    BuildSpec {
        version: "0.2".to_string(),
        phases: Phases {
            install: InstallPhase { runtime_versions },
            pre_build: CommandPhase {
                commands: vec![
                    "echo Logging in to Amazon ECR...".to_string(),
                    "$(aws ecr get-login --region $AWS_DEFAULT_REGION --no-include-email)".to_string(),
                    format!("IMAGE_TAG={}", IMAGE_TAG),
                ],
            },
            build: commands(&[
                "echo Build started on `date`",
                "echo Build the Docker image",
                "cd app/src",
                "make",
                "cd ..",
                "docker build -t $REPOSITORY_NAME:$IMAGE_TAG .",
                "docker tag $REPOSITORY_NAME:$IMAGE_TAG $REPOSITORY_URI:$IMAGE_TAG",
            ]),
            post_build: CommandPhase {
                commands: post_build_commands(),
            },
        },
        artifacts: Artifacts {
            files: vec![IMAGE_DEFINITIONS_FILE.to_string()],
        },
    }
}

/// Buildspec as the YAML string embedded in the build project.
pub fn render_build_spec(spec: &BuildSpec) -> Result<String, String> {
    serde_yaml_ng::to_string(spec).map_err(|e| format!("buildspec serialize error: {}", e))
}
