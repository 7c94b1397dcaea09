/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/factories.rs
*
* Per-instance object factories (DeploymentConfig, Service, Route) plus the
* ImageStream placeholder and the task Pod. Each factory reconciles its object
* through the reconciler; the fan-out decorator decides how many there are.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::DeployerConfig;
use crate::controllers::fanout::{Instance, ObjectFactory};
use crate::controllers::reconciler::reconcile;
use crate::controllers::utils::{instance_selector, object_meta};
use crate::crds::{
    DeploymentConfig, DeploymentConfigSpec, DeploymentTriggerPolicy, ImageLookupPolicy,
    ImageStream, ImageStreamSpec, Route, RoutePort, RouteSpec, RouteTargetReference,
};
use crate::error::{Error, Result};
use crate::kube_client::PlatformClient;
use crate::request::{keys, AppId, DeploymentRequest};
use async_trait::async_trait;
use kube::api::ObjectMeta;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Container settings shared by every bundle of a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSettings {
    pub args: Vec<String>,
    pub service_account: Option<String>,
    pub node_selector: BTreeMap<String, String>,
    pub port: i32,
}

impl ContainerSettings {
    pub fn from_request(request: &DeploymentRequest, config: &DeployerConfig) -> Result<Self> {
        Ok(Self {
            args: request.container_args(),
            service_account: request
                .non_empty_property(keys::SERVICE_ACCOUNT)
                .map(str::to_string),
            node_selector: request.node_selector()?,
            port: config.service_port,
        })
    }

    fn container(&self, name: &str, image: &str, environment: &BTreeMap<String, String>) -> Container {
        Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            args: (!self.args.is_empty()).then(|| self.args.clone()),
            env: Some(
                environment
                    .iter()
                    .map(|(k, v)| EnvVar {
                        name: k.clone(),
                        value: Some(v.clone()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![ContainerPort {
                container_port: self.port,
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    fn pod_spec(&self, container: Container, restart_policy: Option<&str>) -> PodSpec {
        PodSpec {
            containers: vec![container],
            restart_policy: restart_policy.map(str::to_string),
            service_account_name: self.service_account.clone(),
            node_selector: (!self.node_selector.is_empty()).then(|| self.node_selector.clone()),
            ..Default::default()
        }
    }
}

/// Placeholder builds push into. Local lookup lets pods reference
/// `<appId>:<tag>` directly.
pub fn image_stream(app_id: &AppId, labels: BTreeMap<String, String>) -> ImageStream {
    let mut is = ImageStream::new(
        app_id.as_str(),
        ImageStreamSpec {
            lookup_policy: Some(ImageLookupPolicy { local: true }),
        },
    );
    is.metadata = object_meta(app_id.as_str(), labels);
    is
}

/// Where the DeploymentConfig gets its image from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A build is running; the platform deploys once it pushes this
    /// ImageStreamTag.
    Trigger { image_stream_tag: String },
    /// A ready image; rolled out explicitly.
    Image(String),
}

pub struct DeploymentConfigFactory<P> {
    platform: Arc<P>,
    settings: ContainerSettings,
    image: ImageSource,
}

impl<P: PlatformClient> DeploymentConfigFactory<P> {
    pub fn new(platform: Arc<P>, settings: ContainerSettings, image: ImageSource) -> Self {
        Self {
            platform,
            settings,
            image,
        }
    }

    pub fn deployment_config(&self, instance: &Instance) -> DeploymentConfig {
        let name = instance.app_id.as_str();
        let (image, triggers) = match &self.image {
            ImageSource::Trigger { image_stream_tag } => (
                image_stream_tag.as_str(),
                vec![
                    DeploymentTriggerPolicy::config_change(),
                    DeploymentTriggerPolicy::image_change(name, image_stream_tag),
                ],
            ),
            ImageSource::Image(image) => (image.as_str(), Vec::new()),
        };
        let container = self.settings.container(name, image, &instance.environment);
        let mut dc = DeploymentConfig::new(
            name,
            DeploymentConfigSpec {
                replicas: instance.replicas,
                selector: instance_selector(&instance.labels),
                triggers,
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(instance.labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(self.settings.pod_spec(container, None)),
                }),
            },
        );
        dc.metadata = object_meta(name, instance.labels.clone());
        dc
    }
}

#[async_trait]
impl<P: PlatformClient> ObjectFactory for DeploymentConfigFactory<P> {
    type Object = DeploymentConfig;

    async fn add_object(&self, instance: &Instance) -> Result<DeploymentConfig> {
        reconcile(self.platform.as_ref(), self.deployment_config(instance)).await
    }

    async fn apply_object(&self, instance: &Instance, _object: &DeploymentConfig) -> Result<()> {
        match self.image {
            ImageSource::Trigger { .. } => {
                debug!(
                    "DeploymentConfig '{}' is deployed by its image trigger",
                    instance.app_id
                );
                Ok(())
            }
            ImageSource::Image(_) => {
                self.platform.rollout_latest(instance.app_id.as_str()).await?;
                Ok(())
            }
        }
    }
}

/// How a Service is exposed outside the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    ClusterIp,
    NodePort(Option<i32>),
}

impl Exposure {
    pub fn from_request(request: &DeploymentRequest) -> Result<Self> {
        match request.non_empty_property(keys::CREATE_NODE_PORT) {
            None => Ok(Exposure::ClusterIp),
            Some(v) if v.eq_ignore_ascii_case("false") => Ok(Exposure::ClusterIp),
            Some(v) if v.eq_ignore_ascii_case("true") => Ok(Exposure::NodePort(None)),
            Some(v) => v.parse::<i32>().map(|p| Exposure::NodePort(Some(p))).map_err(|_| {
                Error::Config(format!(
                    "'{}' must be true, false or a port number, got '{}'",
                    keys::CREATE_NODE_PORT,
                    v
                ))
            }),
        }
    }
}

pub struct ServiceFactory<P> {
    platform: Arc<P>,
    port: i32,
    exposure: Exposure,
}

impl<P: PlatformClient> ServiceFactory<P> {
    pub fn new(platform: Arc<P>, port: i32, exposure: Exposure) -> Self {
        Self {
            platform,
            port,
            exposure,
        }
    }

    pub fn service(&self, instance: &Instance) -> Service {
        let (type_, node_port) = match self.exposure {
            Exposure::ClusterIp => (None, None),
            Exposure::NodePort(port) => (Some("NodePort".to_string()), port),
        };
        Service {
            metadata: object_meta(instance.app_id.as_str(), instance.labels.clone()),
            spec: Some(ServiceSpec {
                type_,
                selector: Some(instance_selector(&instance.labels)),
                ports: Some(vec![ServicePort {
                    port: self.port,
                    target_port: Some(IntOrString::Int(self.port)),
                    node_port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl<P: PlatformClient> ObjectFactory for ServiceFactory<P> {
    type Object = Service;

    async fn add_object(&self, instance: &Instance) -> Result<Service> {
        reconcile(self.platform.as_ref(), self.service(instance)).await
    }

    async fn apply_object(&self, _instance: &Instance, _object: &Service) -> Result<()> {
        Ok(())
    }
}

pub struct RouteFactory<P> {
    platform: Arc<P>,
    port: i32,
    host_override: Option<String>,
    namespace: String,
    domain: Option<String>,
}

impl<P: PlatformClient> RouteFactory<P> {
    pub fn new(
        platform: Arc<P>,
        request: &DeploymentRequest,
        config: &DeployerConfig,
        namespace: &str,
    ) -> Self {
        Self {
            platform,
            port: config.service_port,
            host_override: request
                .non_empty_property(keys::ROUTE_HOSTNAME)
                .map(str::to_string),
            namespace: namespace.to_string(),
            domain: config.route_domain.clone(),
        }
    }

    /// The override applies to a single bundle only; indexed instances get
    /// computed hosts so they stay distinct. `None` leaves the choice to the
    /// router.
    pub fn host(&self, instance: &Instance) -> Option<String> {
        if instance.index.is_none() {
            if let Some(host) = &self.host_override {
                return Some(host.clone());
            }
        }
        self.domain
            .as_ref()
            .map(|domain| format!("{}-{}.{}", instance.app_id, self.namespace, domain))
    }

    pub fn route(&self, instance: &Instance) -> Route {
        let name = instance.app_id.as_str();
        let mut route = Route::new(
            name,
            RouteSpec {
                host: self.host(instance),
                to: RouteTargetReference {
                    kind: "Service".to_string(),
                    name: name.to_string(),
                },
                port: Some(RoutePort {
                    target_port: IntOrString::Int(self.port),
                }),
            },
        );
        route.metadata = object_meta(name, instance.labels.clone());
        route
    }
}

#[async_trait]
impl<P: PlatformClient> ObjectFactory for RouteFactory<P> {
    type Object = Route;

    async fn add_object(&self, instance: &Instance) -> Result<Route> {
        reconcile(self.platform.as_ref(), self.route(instance)).await
    }

    async fn apply_object(&self, _instance: &Instance, _object: &Route) -> Result<()> {
        Ok(())
    }
}

/// One-shot Pod running a task to completion.
pub fn task_pod(
    task_id: &AppId,
    labels: BTreeMap<String, String>,
    image: &str,
    environment: &BTreeMap<String, String>,
    settings: &ContainerSettings,
) -> Pod {
    let container = settings.container(task_id.as_str(), image, environment);
    Pod {
        metadata: object_meta(task_id.as_str(), labels),
        spec: Some(settings.pod_spec(container, Some("Never"))),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactRef;
    use crate::controllers::fanout::{FanOut, IndexedFactory};
    use crate::controllers::utils::{BaseLabels, DEPLOYMENT_ID_LABEL, INSTANCE_INDEX_ENV};
    use crate::crds::TriggerType;
    use crate::testing::FakePlatform;

    fn request() -> DeploymentRequest {
        DeploymentRequest::new("ticker", ArtifactRef::File("ticker.jar".into()))
            .with_property(keys::NODE_SELECTOR, "zone:east")
            .with_property("server.port", "8080")
    }

    fn fan_out(request: &DeploymentRequest, indexed: bool, count: u32) -> FanOut {
        let app_id = AppId::for_request(request);
        FanOut {
            labels: BaseLabels::for_request(&app_id, request),
            app_id,
            environment: BTreeMap::new(),
            indexed,
            count,
        }
    }

    #[tokio::test]
    async fn test_trigger_mode_deployment_config() {
        let platform = Arc::new(FakePlatform::new());
        let req = request();
        let settings = ContainerSettings::from_request(&req, &DeployerConfig::default()).unwrap();
        let factory = IndexedFactory::new(DeploymentConfigFactory::new(
            platform.clone(),
            settings,
            ImageSource::Trigger {
                image_stream_tag: "ticker:latest".to_string(),
            },
        ));

        let objects = factory.add_objects(&fan_out(&req, true, 2)).await.unwrap();
        factory.apply_objects(&objects).await.unwrap();

        assert_eq!(objects.len(), 2);
        let dc = platform.stored::<DeploymentConfig>("ticker-1").unwrap();
        assert_eq!(dc.spec.replicas, 1);
        assert_eq!(dc.spec.selector[DEPLOYMENT_ID_LABEL], "ticker-1");
        let kinds: Vec<TriggerType> = dc.spec.triggers.iter().map(|t| t.trigger_type).collect();
        assert_eq!(kinds, vec![TriggerType::ConfigChange, TriggerType::ImageChange]);

        let pod = dc.spec.template.unwrap().spec.unwrap();
        let container = &pod.containers[0];
        assert_eq!(container.args.as_deref(), Some(&["--server.port=8080".to_string()][..]));
        let env = container.env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == INSTANCE_INDEX_ENV && e.value.as_deref() == Some("1")));
        assert_eq!(pod.node_selector.unwrap()["zone"], "east");

        assert_eq!(platform.count_ops("rollout"), 0);
    }

    #[tokio::test]
    async fn test_image_mode_rolls_out_explicitly() {
        let platform = Arc::new(FakePlatform::new());
        let req = request();
        let settings = ContainerSettings::from_request(&req, &DeployerConfig::default()).unwrap();
        let factory = IndexedFactory::new(DeploymentConfigFactory::new(
            platform.clone(),
            settings,
            ImageSource::Image("registry/ticker@sha256:1".to_string()),
        ));

        let objects = factory.add_objects(&fan_out(&req, false, 3)).await.unwrap();
        factory.apply_objects(&objects).await.unwrap();

        let dc = platform.stored::<DeploymentConfig>("ticker").unwrap();
        assert_eq!(dc.spec.replicas, 3);
        assert!(dc.spec.triggers.is_empty());
        assert_eq!(platform.count_ops("rollout DeploymentConfig/ticker"), 1);
    }

    #[test]
    fn test_node_port_exposure() {
        let plain = request();
        assert_eq!(Exposure::from_request(&plain).unwrap(), Exposure::ClusterIp);
        let on = request().with_property(keys::CREATE_NODE_PORT, "true");
        assert_eq!(Exposure::from_request(&on).unwrap(), Exposure::NodePort(None));
        let fixed = request().with_property(keys::CREATE_NODE_PORT, "30080");
        assert_eq!(Exposure::from_request(&fixed).unwrap(), Exposure::NodePort(Some(30080)));
        let bad = request().with_property(keys::CREATE_NODE_PORT, "sometimes");
        assert!(Exposure::from_request(&bad).is_err());

        let platform = Arc::new(FakePlatform::new());
        let factory = ServiceFactory::new(platform, 8080, Exposure::NodePort(Some(30080)));
        let instances = fan_out(&plain, false, 1).instances().unwrap();
        let spec = factory.service(&instances[0]).spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(spec.ports.unwrap()[0].node_port, Some(30080));
    }

    #[test]
    fn test_route_hosts() {
        let platform = Arc::new(FakePlatform::new());
        let config = DeployerConfig {
            route_domain: Some("apps.example.com".to_string()),
            ..DeployerConfig::default()
        };
        let req = request().with_property(keys::ROUTE_HOSTNAME, "ticker.acme.io");
        let factory = RouteFactory::new(platform, &req, &config, "prod");

        let single = fan_out(&req, false, 1).instances().unwrap();
        assert_eq!(factory.host(&single[0]).as_deref(), Some("ticker.acme.io"));

        let indexed = fan_out(&req, true, 2).instances().unwrap();
        assert_eq!(
            factory.host(&indexed[1]).as_deref(),
            Some("ticker-1-prod.apps.example.com")
        );
        assert_eq!(factory.route(&indexed[1]).spec.to.name, "ticker-1");
    }

    #[test]
    fn test_task_pod_never_restarts() {
        let req = request();
        let settings = ContainerSettings::from_request(&req, &DeployerConfig::default()).unwrap();
        let pod = task_pod(
            &AppId::from_name("ticker"),
            BTreeMap::new(),
            "registry/ticker:latest",
            &BTreeMap::new(),
            &settings,
        );
        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers[0].image.as_deref(), Some("registry/ticker:latest"));
    }
}
