/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/strategy.rs
*
* Chooses how the image of a request is produced and renders that choice as a
* BuildConfig.
*
* Rules, first match wins:
* 1. A Git URI property on the request: Git source build from that URI.
* 2. The artifact embeds source-control metadata and a Dockerfile under the
*    default context directory: Git source build from the embedded remote.
* 3. A Dockerfile property: Dockerfile build from a local file or inline text,
*    with the artifact uploaded next to it.
* 4. Otherwise: binary source-to-image build on the configured base image.
* A container image artifact needs no build at all.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::artifact::{is_local_file, ArtifactResolver};
use crate::config::DeployerConfig;
use crate::controllers::fingerprint::Fingerprint;
use crate::controllers::utils::{object_meta, FINGERPRINT_ENV};
use crate::crds::{
    BinaryBuildSource, BuildConfig, BuildConfigSpec, BuildOutput, BuildSource, BuildStrategy,
    DockerBuildStrategy, GitBuildSource, SourceBuildStrategy, SourceType, StrategyType,
};
use crate::error::{Error, Result};
use crate::request::{keys, AppId, DeploymentRequest};
use k8s_openapi::api::core::v1::{EnvVar, LocalObjectReference, ObjectReference};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildSpec {
    /// The artifact already is an image.
    ImageOnly { image: String },
    GitSource {
        uri: String,
        git_ref: String,
        context_dir: String,
        secret: Option<String>,
    },
    Dockerfile { contents: String },
    /// The artifact is uploaded and assembled onto `base_image`.
    Binary { base_image: String },
}

impl BuildSpec {
    pub fn source_type(&self) -> Option<SourceType> {
        match self {
            BuildSpec::ImageOnly { .. } => None,
            BuildSpec::GitSource { .. } => Some(SourceType::Git),
            BuildSpec::Dockerfile { .. } => Some(SourceType::Dockerfile),
            BuildSpec::Binary { .. } => Some(SourceType::Binary),
        }
    }

    pub fn strategy_type(&self) -> Option<StrategyType> {
        match self {
            BuildSpec::ImageOnly { .. } => None,
            BuildSpec::GitSource { .. } | BuildSpec::Dockerfile { .. } => Some(StrategyType::Docker),
            BuildSpec::Binary { .. } => Some(StrategyType::Source),
        }
    }
}

pub fn image_tag(request: &DeploymentRequest, config: &DeployerConfig) -> String {
    request
        .non_empty_property(keys::IMAGE_TAG)
        .unwrap_or(&config.default_image_tag)
        .to_string()
}

/// `<appId>:<tag>`, the ImageStreamTag every build of the app pushes to.
pub fn output_image_stream_tag(
    app_id: &AppId,
    request: &DeploymentRequest,
    config: &DeployerConfig,
) -> String {
    format!("{}:{}", app_id, image_tag(request, config))
}

pub fn choose_strategy(
    request: &DeploymentRequest,
    artifacts: &dyn ArtifactResolver,
    config: &DeployerConfig,
) -> Result<BuildSpec> {
    let secret = request
        .non_empty_property(keys::GIT_SECRET)
        .map(str::to_string)
        .or_else(|| config.git_source_secret.clone());

    if let crate::artifact::ArtifactRef::Docker(image) = &request.artifact {
        return Ok(BuildSpec::ImageOnly {
            image: image.clone(),
        });
    }

    if let Some(uri) = request.non_empty_property(keys::GIT_URI) {
        info!("Using Git source build from '{}'", uri);
        return Ok(BuildSpec::GitSource {
            uri: uri.to_string(),
            git_ref: request
                .non_empty_property(keys::GIT_REF)
                .unwrap_or(&config.default_git_ref)
                .to_string(),
            context_dir: request
                .non_empty_property(keys::GIT_DOCKERFILE_PATH)
                .unwrap_or(&config.default_context_dir)
                .to_string(),
            secret,
        });
    }

    if let Some(scm) = artifacts.source_control_metadata(&request.artifact)? {
        let dockerfile = format!("{}/Dockerfile", config.default_context_dir.trim_end_matches('/'));
        if artifacts.extract_file(&request.artifact, &dockerfile)?.is_some() {
            let uri = normalize_git_uri(&scm.uri);
            info!("Artifact embeds '{}' and a Dockerfile; using Git source build from '{}'", dockerfile, uri);
            return Ok(BuildSpec::GitSource {
                uri,
                git_ref: scm.tag.unwrap_or_else(|| config.default_git_ref.clone()),
                context_dir: config.default_context_dir.clone(),
                secret,
            });
        }
        debug!("Artifact has source-control metadata but no '{}'", dockerfile);
    }

    if let Some(value) = request.property(keys::DOCKERFILE) {
        let contents = if value.is_empty() {
            config.default_dockerfile.clone()
        } else if is_local_file(value) {
            std::fs::read_to_string(value).map_err(|source| Error::DockerfileIo {
                path: value.to_string(),
                source,
            })?
        } else {
            value.to_string()
        };
        info!("Using Dockerfile build");
        return Ok(BuildSpec::Dockerfile { contents });
    }

    info!("Using binary build on '{}'", config.binary_base_image);
    Ok(BuildSpec::Binary {
        base_image: config.binary_base_image.clone(),
    })
}

/// Rewrites everything up to the last `@` as `ssh://git@`. URIs without a
/// user part are returned unchanged.
pub fn normalize_git_uri(uri: &str) -> String {
    match uri.rfind('@') {
        Some(at) => format!("ssh://git@{}", &uri[at + 1..]),
        None => uri.to_string(),
    }
}

/// The BuildConfig for `spec`. It carries no triggers: builds are started
/// explicitly by the pipeline.
pub fn build_config(
    app_id: &AppId,
    labels: BTreeMap<String, String>,
    spec: &BuildSpec,
    fingerprint: &Fingerprint,
    output_tag: &str,
    request: &DeploymentRequest,
) -> Result<BuildConfig> {
    let marker = vec![EnvVar {
        name: FINGERPRINT_ENV.to_string(),
        value: Some(fingerprint.to_string()),
        ..Default::default()
    }];
    let docker = || BuildStrategy {
        strategy_type: Some(StrategyType::Docker),
        docker_strategy: Some(DockerBuildStrategy {
            env: marker.clone(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let (source, strategy) = match spec {
        BuildSpec::ImageOnly { image } => {
            return Err(Error::Config(format!(
                "Image '{}' does not need a BuildConfig",
                image
            )))
        }
        BuildSpec::GitSource {
            uri,
            git_ref,
            context_dir,
            secret,
        } => (
            BuildSource {
                source_type: Some(SourceType::Git),
                git: Some(GitBuildSource {
                    uri: uri.clone(),
                    git_ref: Some(git_ref.clone()),
                }),
                context_dir: Some(context_dir.clone()),
                source_secret: secret.as_ref().map(|name| LocalObjectReference {
                    name: name.clone(),
                }),
                ..Default::default()
            },
            docker(),
        ),
        BuildSpec::Dockerfile { contents } => (
            BuildSource {
                source_type: Some(SourceType::Dockerfile),
                dockerfile: Some(contents.clone()),
                binary: Some(BinaryBuildSource {
                    as_file: Some(request.artifact.file_name()),
                }),
                ..Default::default()
            },
            docker(),
        ),
        BuildSpec::Binary { base_image } => (
            BuildSource {
                source_type: Some(SourceType::Binary),
                binary: Some(BinaryBuildSource {
                    as_file: Some(request.artifact.file_name()),
                }),
                ..Default::default()
            },
            BuildStrategy {
                strategy_type: Some(StrategyType::Source),
                source_strategy: Some(SourceBuildStrategy {
                    from: ObjectReference {
                        kind: Some("DockerImage".to_string()),
                        name: Some(base_image.clone()),
                        ..Default::default()
                    },
                    env: marker.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ),
    };

    let node_selector = request.node_selector()?;
    let mut bc = BuildConfig::new(
        app_id.as_str(),
        BuildConfigSpec {
            source,
            strategy,
            output: BuildOutput {
                to: Some(ObjectReference {
                    kind: Some("ImageStreamTag".to_string()),
                    name: Some(output_tag.to_string()),
                    ..Default::default()
                }),
            },
            service_account: request
                .non_empty_property(keys::SERVICE_ACCOUNT)
                .map(str::to_string),
            node_selector: (!node_selector.is_empty()).then_some(node_selector),
        },
    );
    bc.metadata = object_meta(app_id.as_str(), labels);
    Ok(bc)
}
