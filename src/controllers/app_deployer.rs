/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/app_deployer.rs
*
* Long-running application deployments.
*
* `deploy` runs the build half of the pipeline and then reconciles one
* DeploymentConfig, Service and (optionally) Route per instance. While a build
* is running the DeploymentConfigs carry an image-change trigger, so the
* platform rolls them out when the build pushes its image; nothing waits here.
* With a reused build or a container image artifact the image is set directly
* and rolled out.
*
* `undeploy` removes the per-instance objects but keeps BuildConfigs,
* ImageStreams and Builds, so a redeploy of the same artifact reuses its build.
* `status` is derived from live DeploymentConfigs and the latest Build.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::artifact::ArtifactResolver;
use crate::config::DeployerConfig;
use crate::controllers::factories::{
    ContainerSettings, DeploymentConfigFactory, Exposure, ImageSource, RouteFactory, ServiceFactory,
};
use crate::controllers::fanout::{FanOut, IndexedFactory};
use crate::controllers::fingerprint::force_build;
use crate::controllers::pipeline::{log_transition, BuildPipeline, CompletionMode, PipelineState, Prepared};
use crate::controllers::utils::{app_selector, BaseLabels};
use crate::crds::{sort_builds, Build, BuildPhase, DeploymentConfig, Route};
use crate::error::{Error, Result};
use crate::kube_client::{kind_of, PlatformClient, PlatformResource};
use crate::request::{AppId, DeploymentRequest};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub app_id: AppId,
    pub state: PipelineState,
    pub instances: Vec<AppId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Undeployed,
    Building,
    Deploying,
    Deployed,
    Failed,
    /// Some instances are available, others are not.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStatus {
    pub name: String,
    pub replicas: i32,
    pub available: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatus {
    pub state: AppState,
    pub instances: Vec<InstanceStatus>,
}

pub struct AppDeployer<P> {
    platform: Arc<P>,
    config: Arc<DeployerConfig>,
    namespace: String,
    pipeline: BuildPipeline<P>,
}

impl<P: PlatformClient> AppDeployer<P> {
    pub fn new(
        platform: Arc<P>,
        artifacts: Arc<dyn ArtifactResolver>,
        config: Arc<DeployerConfig>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: BuildPipeline::new(platform.clone(), artifacts, config.clone()),
            platform,
            config,
            namespace: namespace.into(),
        }
    }

    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeployOutcome> {
        let app_id = AppId::for_request(request);
        let span = info_span!("deploy", app_id = %app_id);
        self.deploy_inner(request, app_id).instrument(span).await
    }

    async fn deploy_inner(&self, request: &DeploymentRequest, app_id: AppId) -> Result<DeployOutcome> {
        // Everything that can be misconfigured is parsed before the first mutation.
        let settings = ContainerSettings::from_request(request, &self.config)?;
        let exposure = Exposure::from_request(request)?;
        let fan_out = FanOut {
            app_id: app_id.clone(),
            labels: BaseLabels::for_request(&app_id, request),
            environment: request.environment_variables()?,
            indexed: request.is_indexed()?,
            count: request.count()?,
        };
        force_build(request, &self.config)?;

        let prepared = self.pipeline.prepare(request, &app_id, &fan_out.labels).await?;
        let mut state = prepared.state(CompletionMode::Trigger);
        log_transition(&app_id, &PipelineState::NotBuilt, &state);

        let image = match &prepared {
            Prepared::Submitted {
                image_stream_tag, ..
            } => ImageSource::Trigger {
                image_stream_tag: image_stream_tag.clone(),
            },
            Prepared::Reused { image, .. } | Prepared::NoBuild { image } => ImageSource::Image(image.clone()),
        };

        let deployments = IndexedFactory::new(DeploymentConfigFactory::new(
            self.platform.clone(),
            settings,
            image.clone(),
        ));
        let services = IndexedFactory::new(ServiceFactory::new(
            self.platform.clone(),
            self.config.service_port,
            exposure,
        ));

        let dcs = deployments.add_objects(&fan_out).await?;
        services.add_objects(&fan_out).await?;
        if self.config.create_route {
            let routes = IndexedFactory::new(RouteFactory::new(
                self.platform.clone(),
                request,
                &self.config,
                &self.namespace,
            ));
            routes.add_objects(&fan_out).await?;
        }
        deployments.apply_objects(&dcs).await?;

        if let ImageSource::Image(image) = image {
            let deployed = PipelineState::Deployed { image };
            if deployed != state {
                log_transition(&app_id, &state, &deployed);
            }
            state = deployed;
        }

        info!("Deployed '{}' as {} instance(s)", app_id, dcs.len());
        Ok(DeployOutcome {
            app_id,
            state,
            instances: dcs.into_iter().map(|(instance, _)| instance.app_id).collect(),
        })
    }

    pub async fn undeploy(&self, app_id: &AppId) -> Result<()> {
        let selector = app_selector(app_id);
        let removed = self.delete_all::<Route>(&selector).await?
            + self.delete_all::<Service>(&selector).await?
            + self.delete_all::<DeploymentConfig>(&selector).await?;
        if removed == 0 {
            warn!("Nothing to undeploy for '{}'", app_id);
        } else {
            info!("Undeployed '{}' ({} object(s) removed)", app_id, removed);
        }
        Ok(())
    }

    async fn delete_all<K: PlatformResource>(&self, selector: &str) -> Result<usize> {
        let objects: Vec<K> = self.platform.list_by_label(selector).await?;
        let mut removed = 0;
        for object in objects {
            match self.platform.delete::<K>(&object.name_any()).await {
                Ok(()) => removed += 1,
                Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if removed > 0 {
            info!("Deleted {} {}(s) matching '{}'", removed, kind_of::<K>(), selector);
        }
        Ok(removed)
    }

    pub async fn status(&self, app_id: &AppId) -> Result<AppStatus> {
        let selector = app_selector(app_id);
        let mut dcs: Vec<DeploymentConfig> = self.platform.list_by_label(&selector).await?;
        dcs.sort_by_key(|dc| dc.name_any());
        let mut builds: Vec<Build> = self.platform.list_by_label(&selector).await?;
        sort_builds(&mut builds);
        let latest_phase = builds.last().map(Build::phase);

        let instances: Vec<InstanceStatus> = dcs
            .iter()
            .map(|dc| InstanceStatus {
                name: dc.name_any(),
                replicas: dc.spec.replicas,
                available: dc.status.as_ref().map(|s| s.available_replicas).unwrap_or(0),
            })
            .collect();

        let state = derive_state(latest_phase, &instances);
        Ok(AppStatus { state, instances })
    }
}

fn derive_state(latest_build: Option<BuildPhase>, instances: &[InstanceStatus]) -> AppState {
    if instances.is_empty() {
        return AppState::Undeployed;
    }
    let ready = instances.iter().filter(|i| i.available >= i.replicas).count();
    if ready == instances.len() {
        return AppState::Deployed;
    }
    match latest_build {
        Some(phase) if !phase.is_terminal() => return AppState::Building,
        Some(phase) if phase.is_failure() => return AppState::Failed,
        _ => {}
    }
    let any_available = instances.iter().any(|i| i.available > 0);
    if ready > 0 || any_available {
        AppState::Partial
    } else {
        AppState::Deploying
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactRef;
    use crate::controllers::utils::INSTANCE_INDEX_ENV;
    use crate::crds::{DeploymentConfigStatus, TriggerType};
    use crate::request::keys;
    use crate::testing::{FakeArtifacts, FakePlatform};

    fn deployer(platform: Arc<FakePlatform>, config: DeployerConfig) -> AppDeployer<FakePlatform> {
        AppDeployer::new(
            platform,
            Arc::new(FakeArtifacts::with_bytes(b"jar-v1")),
            Arc::new(config),
            "apps",
        )
    }

    fn request() -> DeploymentRequest {
        DeploymentRequest::new("ticker", ArtifactRef::File("ticker.jar".into()))
    }

    #[tokio::test]
    async fn test_deploy_with_build_uses_image_trigger() {
        let platform = Arc::new(FakePlatform::new());
        let d = deployer(platform.clone(), DeployerConfig::default());

        let outcome = d.deploy(&request()).await.unwrap();

        assert!(matches!(
            outcome.state,
            PipelineState::Building {
                mode: CompletionMode::Trigger,
                ..
            }
        ));
        let dc = platform.stored::<DeploymentConfig>("ticker").unwrap();
        assert!(dc
            .spec
            .triggers
            .iter()
            .any(|t| t.trigger_type == TriggerType::ImageChange));
        assert!(platform.stored::<Service>("ticker").is_some());
        assert!(platform.stored::<Route>("ticker").is_none());
        assert_eq!(platform.count_ops("rollout"), 0);
        assert_eq!(platform.open_watches(), 0);
    }

    #[tokio::test]
    async fn test_indexed_deploy_creates_one_bundle_per_instance() {
        let platform = Arc::new(FakePlatform::new());
        let config = DeployerConfig {
            create_route: true,
            ..DeployerConfig::default()
        };
        let d = deployer(platform.clone(), config);
        let req = request()
            .with_property(keys::INDEXED, "true")
            .with_property(keys::COUNT, "3");

        let outcome = d.deploy(&req).await.unwrap();

        let names: Vec<&str> = outcome.instances.iter().map(AppId::as_str).collect();
        assert_eq!(names, vec!["ticker-0", "ticker-1", "ticker-2"]);
        assert_eq!(platform.all::<DeploymentConfig>().len(), 3);
        assert_eq!(platform.all::<Service>().len(), 3);
        assert_eq!(platform.all::<Route>().len(), 3);
        for (i, name) in names.iter().enumerate() {
            let dc = platform.stored::<DeploymentConfig>(name).unwrap();
            assert_eq!(dc.spec.replicas, 1);
            let env = dc.spec.template.unwrap().spec.unwrap().containers[0].env.clone().unwrap();
            let index = env.iter().find(|e| e.name == INSTANCE_INDEX_ENV).unwrap();
            assert_eq!(index.value.as_deref(), Some(i.to_string().as_str()));
        }
    }

    #[tokio::test]
    async fn test_redeploy_reuses_completed_build() {
        let platform = Arc::new(FakePlatform::new());
        let d = deployer(platform.clone(), DeployerConfig::default());
        d.deploy(&request()).await.unwrap();
        platform.set_build_phase("ticker-1", BuildPhase::Complete, Some("registry/ticker@sha256:1"));

        let outcome = d.deploy(&request()).await.unwrap();

        assert_eq!(
            outcome.state,
            PipelineState::Deployed {
                image: "registry/ticker@sha256:1".to_string()
            }
        );
        assert_eq!(platform.count_ops("binary"), 1);
        let dc = platform.stored::<DeploymentConfig>("ticker").unwrap();
        assert!(dc.spec.triggers.is_empty());
        assert_eq!(platform.count_ops("rollout DeploymentConfig/ticker"), 1);
    }

    #[tokio::test]
    async fn test_redeploy_during_build_keeps_image_trigger() {
        let platform = Arc::new(FakePlatform::new());
        let d = deployer(platform.clone(), DeployerConfig::default());
        d.deploy(&request()).await.unwrap();

        let outcome = d.deploy(&request()).await.unwrap();

        assert_eq!(
            outcome.state,
            PipelineState::Building {
                build: "ticker-1".to_string(),
                mode: CompletionMode::Trigger,
            }
        );
        assert_eq!(platform.count_ops("binary"), 1);
        let dc = platform.stored::<DeploymentConfig>("ticker").unwrap();
        assert!(dc
            .spec
            .triggers
            .iter()
            .any(|t| t.trigger_type == TriggerType::ImageChange));
        assert_eq!(platform.count_ops("rollout"), 0);
    }

    #[tokio::test]
    async fn test_malformed_property_fails_before_mutation() {
        let platform = Arc::new(FakePlatform::new());
        let d = deployer(platform.clone(), DeployerConfig::default());
        let req = request().with_property(keys::NODE_SELECTOR, "zone");

        assert!(matches!(d.deploy(&req).await, Err(Error::Config(_))));
        assert!(platform.ops().is_empty());
    }

    #[tokio::test]
    async fn test_undeploy_keeps_builds() {
        let platform = Arc::new(FakePlatform::new());
        let d = deployer(platform.clone(), DeployerConfig::default());
        let outcome = d.deploy(&request()).await.unwrap();

        d.undeploy(&outcome.app_id).await.unwrap();

        assert!(platform.all::<DeploymentConfig>().is_empty());
        assert!(platform.all::<Service>().is_empty());
        assert_eq!(platform.all::<Build>().len(), 1);
        assert_eq!(
            d.status(&outcome.app_id).await.unwrap().state,
            AppState::Undeployed
        );
    }

    #[tokio::test]
    async fn test_status_follows_build_and_replicas() {
        let platform = Arc::new(FakePlatform::new());
        let d = deployer(platform.clone(), DeployerConfig::default());
        let outcome = d.deploy(&request()).await.unwrap();

        assert_eq!(d.status(&outcome.app_id).await.unwrap().state, AppState::Building);

        platform.set_build_phase("ticker-1", BuildPhase::Failed, None);
        assert_eq!(d.status(&outcome.app_id).await.unwrap().state, AppState::Failed);

        let mut dc = platform.stored::<DeploymentConfig>("ticker").unwrap();
        dc.status = Some(DeploymentConfigStatus {
            replicas: 1,
            available_replicas: 1,
            latest_version: 1,
        });
        platform.insert(dc);
        let status = d.status(&outcome.app_id).await.unwrap();
        assert_eq!(status.state, AppState::Deployed);
        assert_eq!(status.instances[0].available, 1);
    }

    #[test]
    fn test_partial_and_deploying_states() {
        let instance = |available| InstanceStatus {
            name: "x".to_string(),
            replicas: 1,
            available,
        };
        let complete = Some(BuildPhase::Complete);
        assert_eq!(derive_state(complete, &[instance(1), instance(0)]), AppState::Partial);
        assert_eq!(derive_state(complete, &[instance(0)]), AppState::Deploying);
        assert_eq!(derive_state(None, &[]), AppState::Undeployed);
    }
}
