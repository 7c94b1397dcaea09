/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/pipeline.rs
*
* The build half of a deploy or launch: decide whether an image has to be
* built, and if so set up and start the build.
*
* Core Logic:
* - A container image artifact is deployed as is.
* - Otherwise the artifact is fingerprinted and the app's builds are listed.
*   A non-Failed build with the same fingerprint is reused unless a rebuild is
*   forced. A reused build that has not finished yet is followed like a fresh
*   one.
* - Otherwise the build strategy is chosen, the ImageStream and BuildConfig are
*   reconciled and a build is started. Binary and Dockerfile builds get the
*   artifact uploaded; Git builds are instantiated.
*
* What happens once the build is running depends on the caller: the app
* deployer relies on image-change triggers, the task launcher watches the
* build. Nothing here is retried.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::artifact::ArtifactResolver;
use crate::config::DeployerConfig;
use crate::controllers::factories::image_stream;
use crate::controllers::fingerprint::{build_to_reuse, Fingerprint};
use crate::controllers::reconciler::reconcile;
use crate::controllers::strategy::{build_config, choose_strategy, output_image_stream_tag, BuildSpec};
use crate::controllers::utils::{app_selector, BaseLabels};
use crate::crds::Build;
use crate::error::Result;
use crate::kube_client::PlatformClient;
use crate::request::{AppId, DeploymentRequest};
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// How a running build is connected to what follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// The platform deploys on image change.
    Trigger,
    /// The build is watched and the follow-up runs on completion.
    Watch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    NotBuilt,
    Building { build: String, mode: CompletionMode },
    BuildReused { image: String },
    Deployed { image: String },
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::NotBuilt => f.write_str("NotBuilt"),
            PipelineState::Building { build, mode } => write!(f, "Building({}, {:?})", build, mode),
            PipelineState::BuildReused { image } => write!(f, "BuildReused({})", image),
            PipelineState::Deployed { image } => write!(f, "Deployed({})", image),
        }
    }
}

/// Outcome of the build half.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// The artifact is an image; nothing was built.
    NoBuild { image: String },
    Reused { build: String, image: String },
    Submitted {
        build: Build,
        /// `<appId>:<tag>` the build pushes to.
        image_stream_tag: String,
    },
}

impl Prepared {
    /// The state the pipeline is in once the build half is done.
    pub fn state(&self, mode: CompletionMode) -> PipelineState {
        match self {
            Prepared::NoBuild { image } => PipelineState::Deployed {
                image: image.clone(),
            },
            Prepared::Reused { image, .. } => PipelineState::BuildReused {
                image: image.clone(),
            },
            Prepared::Submitted { build, .. } => PipelineState::Building {
                build: build.name_any(),
                mode,
            },
        }
    }
}

pub fn log_transition(app_id: &AppId, from: &PipelineState, to: &PipelineState) {
    info!("App '{}': {} -> {}", app_id, from, to);
}

pub struct BuildPipeline<P> {
    platform: Arc<P>,
    artifacts: Arc<dyn ArtifactResolver>,
    config: Arc<DeployerConfig>,
}

impl<P: PlatformClient> BuildPipeline<P> {
    pub fn new(
        platform: Arc<P>,
        artifacts: Arc<dyn ArtifactResolver>,
        config: Arc<DeployerConfig>,
    ) -> Self {
        Self {
            platform,
            artifacts,
            config,
        }
    }

    pub async fn prepare(
        &self,
        request: &DeploymentRequest,
        app_id: &AppId,
        labels: &BaseLabels,
    ) -> Result<Prepared> {
        if let crate::artifact::ArtifactRef::Docker(image) = &request.artifact {
            info!("Artifact of '{}' is the image '{}'; no build needed", app_id, image);
            return Ok(Prepared::NoBuild {
                image: image.clone(),
            });
        }

        let bytes = self.artifacts.resolve_bytes(&request.artifact)?;
        let fingerprint = Fingerprint::of(&bytes);
        let image_stream_tag = output_image_stream_tag(app_id, request, &self.config);

        let builds: Vec<Build> = self.platform.list_by_label(&app_selector(app_id)).await?;
        if let Some(build) = build_to_reuse(request, &self.config, &builds, &fingerprint)? {
            if !build.phase().is_terminal() {
                info!(
                    "Build '{}' of '{}' for fingerprint {} is still {}; following it",
                    build.name_any(),
                    app_id,
                    fingerprint,
                    build.phase()
                );
                return Ok(Prepared::Submitted {
                    build,
                    image_stream_tag,
                });
            }
            let image = build
                .output_image()
                .map(str::to_string)
                .unwrap_or_else(|| image_stream_tag.clone());
            info!(
                "Reusing build '{}' of '{}' for fingerprint {}",
                build.name_any(),
                app_id,
                fingerprint
            );
            return Ok(Prepared::Reused {
                build: build.name_any(),
                image,
            });
        }

        let spec = choose_strategy(request, self.artifacts.as_ref(), &self.config)?;
        if let BuildSpec::ImageOnly { image } = &spec {
            return Ok(Prepared::NoBuild {
                image: image.clone(),
            });
        }

        let base = labels.to_map();
        reconcile(self.platform.as_ref(), image_stream(app_id, base.clone())).await?;
        let bc = build_config(app_id, base, &spec, &fingerprint, &image_stream_tag, request)?;
        reconcile(self.platform.as_ref(), bc).await?;

        let build = match spec {
            BuildSpec::Binary { .. } | BuildSpec::Dockerfile { .. } => {
                self.platform
                    .submit_binary_build(app_id.as_str(), &request.artifact.file_name(), bytes)
                    .await?
            }
            _ => self.platform.instantiate_build(app_id.as_str()).await?,
        };
        info!("Started build '{}' of '{}'", build.name_any(), app_id);
        Ok(Prepared::Submitted {
            build,
            image_stream_tag,
        })
    }
}
