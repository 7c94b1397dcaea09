/* Copyright (C) 2025 Pedro Henrique / phkaiser13
 * File: src/cli.rs
 * Command-line interface of the `ph-deployer` binary, declared with clap's
 * derive API. Deploy and launch requests are assembled from `--name`,
 * `--artifact`, repeated `--property key=value` and trailing arguments.
 * SPDX-License-Identifier: Apache-2.0 */

use crate::artifact::ArtifactRef;
use crate::error::Result;
use crate::request::{keys, AppId, DeploymentRequest};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Deploys applications and launches tasks on OpenShift.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build if needed and deploy a long-running application.
    Deploy(RequestArgs),

    /// Build if needed and run a one-shot task.
    Launch(LaunchArgs),

    /// Remove an application's deployments, services and routes.
    Undeploy(NameArgs),

    /// Show the state of an application.
    Status(NameArgs),

    /// Show the state of a task.
    TaskStatus(NameArgs),

    /// Delete a task's pod.
    Cancel(NameArgs),
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Logical application name.
    #[arg(long)]
    pub name: String,

    /// Group the application belongs to; prefixes its id.
    #[arg(long)]
    pub group: Option<String>,

    /// `docker:<image>`, `maven://<coordinates>` or a local file path.
    #[arg(long)]
    pub artifact: String,

    /// Deployment or application property, as `key=value`. Repeatable.
    #[arg(long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Arguments passed to the container.
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl RequestArgs {
    pub fn to_request(&self) -> Result<DeploymentRequest> {
        let artifact: ArtifactRef = self.artifact.parse()?;
        let mut request = self
            .properties
            .iter()
            .fold(DeploymentRequest::new(self.name.clone(), artifact), |req, (k, v)| {
                req.with_property(k.clone(), v.clone())
            });
        if let Some(group) = &self.group {
            request = request.with_property(keys::GROUP, group.clone());
        }
        Ok(request.with_args(self.args.clone()))
    }
}

#[derive(Args, Debug)]
pub struct LaunchArgs {
    #[command(flatten)]
    pub request: RequestArgs,

    /// Return once the build is submitted instead of waiting to start the task.
    #[arg(long)]
    pub detach: bool,
}

#[derive(Args, Debug)]
pub struct NameArgs {
    /// Application or task name, as given to deploy or launch.
    #[arg(required = true)]
    pub name: String,

    /// Group given to deploy or launch, if any.
    #[arg(long)]
    pub group: Option<String>,
}

impl NameArgs {
    /// The id deploy or launch derived from the same name and group.
    pub fn app_id(&self) -> AppId {
        AppId::from_parts(&self.name, self.group.as_deref())
    }
}

fn parse_property(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}
