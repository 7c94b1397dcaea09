/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/lib.rs
*
* Library root of ph-deployer. It deploys long-running applications and
* launches one-shot tasks on OpenShift, building a container image from the
* request's artifact only when no earlier build of the same artifact exists.
*
* Architecture:
* - `crds`: typed OpenShift kinds (BuildConfig, Build, ImageStream,
*   DeploymentConfig, Route).
* - `kube_client`: the `PlatformClient` seam and its `kube`-backed
*   implementation.
* - `artifact`: resolving artifact bytes and reading metadata embedded in them.
* - `controllers`: the reconciler, strategy selection, fan-out and the
*   build-to-deploy pipeline.
*
* SPDX-License-Identifier: Apache-2.0 */

pub mod artifact;
pub mod cli;
pub mod config;
pub mod controllers;
pub mod crds;
pub mod error;
pub mod kube_client;
pub mod request;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DeployerConfig;
pub use controllers::app_deployer::AppDeployer;
pub use controllers::task_launcher::TaskLauncher;
pub use error::{Error, Result};
pub use request::{AppId, DeploymentRequest};
