/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/task_launcher.rs
*
* One-shot tasks. A task runs as a single Pod (restartPolicy Never) named
* after its app id.
*
* Tasks have no equivalent of an image-change trigger, so when a build is
* started, or a matching build is still running, the launcher watches it and
* creates the Pod from the build's output image once it completes. With a
* completed reused build or a container image artifact the Pod is created
* right away.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::artifact::ArtifactResolver;
use crate::config::DeployerConfig;
use crate::controllers::build_watch::{built_image, watch_build, WatchSubscription};
use crate::controllers::factories::{task_pod, ContainerSettings};
use crate::controllers::fingerprint::force_build;
use crate::controllers::pipeline::{log_transition, BuildPipeline, CompletionMode, PipelineState, Prepared};
use crate::controllers::reconciler::reconcile;
use crate::controllers::utils::{app_selector, BaseLabels};
use crate::crds::{sort_builds, Build};
use crate::error::{Error, Result};
use crate::kube_client::PlatformClient;
use crate::request::{AppId, DeploymentRequest};
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Launching,
    Running,
    Complete,
    Failed,
    Unknown,
}

/// A launched task. Holds the build watch while the task waits for its image.
pub struct LaunchHandle {
    pub app_id: AppId,
    pub state: PipelineState,
    subscription: Option<WatchSubscription<Pod>>,
}

impl LaunchHandle {
    pub fn is_waiting_for_build(&self) -> bool {
        self.subscription.is_some()
    }

    /// Waits until the task Pod has been created. Returns immediately when it
    /// already was.
    pub async fn wait(self) -> Result<PipelineState> {
        let Some(subscription) = self.subscription else {
            return Ok(self.state);
        };
        let pod = subscription.completion().await?;
        let image = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone())
            .unwrap_or_default();
        let deployed = PipelineState::Deployed { image };
        log_transition(&self.app_id, &self.state, &deployed);
        Ok(deployed)
    }

    /// Stops waiting for the build; the task is not launched.
    pub fn detach(self) -> PipelineState {
        if let Some(subscription) = self.subscription {
            subscription.close();
        }
        self.state
    }
}

pub struct TaskLauncher<P> {
    platform: Arc<P>,
    config: Arc<DeployerConfig>,
    pipeline: BuildPipeline<P>,
}

impl<P: PlatformClient + 'static> TaskLauncher<P> {
    pub fn new(
        platform: Arc<P>,
        artifacts: Arc<dyn ArtifactResolver>,
        config: Arc<DeployerConfig>,
    ) -> Self {
        Self {
            pipeline: BuildPipeline::new(platform.clone(), artifacts, config.clone()),
            platform,
            config,
        }
    }

    pub async fn launch(&self, request: &DeploymentRequest) -> Result<LaunchHandle> {
        let app_id = AppId::for_request(request);
        let span = info_span!("launch", app_id = %app_id);
        self.launch_inner(request, app_id).instrument(span).await
    }

    async fn launch_inner(&self, request: &DeploymentRequest, app_id: AppId) -> Result<LaunchHandle> {
        let settings = ContainerSettings::from_request(request, &self.config)?;
        let environment = request.environment_variables()?;
        let labels = BaseLabels::for_request(&app_id, request);
        force_build(request, &self.config)?;

        let prepared = self.pipeline.prepare(request, &app_id, &labels).await?;
        let state = prepared.state(CompletionMode::Watch);
        log_transition(&app_id, &PipelineState::NotBuilt, &state);

        let image = match prepared {
            Prepared::Submitted {
                build,
                image_stream_tag,
            } => {
                let platform = self.platform.clone();
                let task_id = app_id.clone();
                let pod_labels = labels.to_map();
                let continuation = move |completed: Build| {
                    async move {
                        let image = built_image(&completed, &image_stream_tag);
                        create_pod(platform.as_ref(), &task_id, pod_labels, &image, &environment, &settings)
                            .await
                    }
                    .boxed()
                };
                let subscription = watch_build(
                    self.platform.as_ref(),
                    &app_selector(&app_id),
                    &kube::ResourceExt::name_any(&build),
                    continuation,
                )
                .await?;
                return Ok(LaunchHandle {
                    app_id,
                    state,
                    subscription: Some(subscription),
                });
            }
            Prepared::Reused { image, .. } | Prepared::NoBuild { image } => image,
        };

        create_pod(self.platform.as_ref(), &app_id, labels.to_map(), &image, &environment, &settings).await?;
        let deployed = PipelineState::Deployed { image };
        if deployed != state {
            log_transition(&app_id, &state, &deployed);
        }
        Ok(LaunchHandle {
            app_id,
            state: deployed,
            subscription: None,
        })
    }

    pub async fn status(&self, task_id: &AppId) -> Result<TaskState> {
        if let Some(pod) = self.platform.get::<Pod>(task_id.as_str()).await? {
            let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
            return Ok(match phase {
                Some("Pending") => TaskState::Launching,
                Some("Running") => TaskState::Running,
                Some("Succeeded") => TaskState::Complete,
                Some("Failed") => TaskState::Failed,
                _ => TaskState::Unknown,
            });
        }
        let mut builds: Vec<Build> = self.platform.list_by_label(&app_selector(task_id)).await?;
        sort_builds(&mut builds);
        Ok(match builds.last().map(Build::phase) {
            Some(phase) if !phase.is_terminal() => TaskState::Launching,
            Some(phase) if phase.is_failure() => TaskState::Failed,
            _ => TaskState::Unknown,
        })
    }

    /// Deletes the task Pod. Cancelling a task that has no Pod is a no-op.
    pub async fn cancel(&self, task_id: &AppId) -> Result<()> {
        match self.platform.delete::<Pod>(task_id.as_str()).await {
            Ok(()) => {
                info!("Cancelled task '{}'", task_id);
                Ok(())
            }
            Err(Error::NotFound { .. }) => {
                warn!("Task '{}' has no pod to cancel", task_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

async fn create_pod<P: PlatformClient>(
    platform: &P,
    task_id: &AppId,
    labels: BTreeMap<String, String>,
    image: &str,
    environment: &BTreeMap<String, String>,
    settings: &ContainerSettings,
) -> Result<Pod> {
    info!("Launching task '{}' from image '{}'", task_id, image);
    reconcile(platform, task_pod(task_id, labels, image, environment, settings)).await
}
