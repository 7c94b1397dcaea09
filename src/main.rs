/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/main.rs
*
* Entry point of the `ph-deployer` binary. Loads the configuration, installs
* telemetry, connects to the cluster and dispatches the parsed command to the
* app deployer or the task launcher.
*
* SPDX-License-Identifier: Apache-2.0 */

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use kube::Client;
use ph_deployer::artifact::{ArtifactResolver, LocalArtifactResolver};
use ph_deployer::cli::{Cli, Commands};
use ph_deployer::kube_client::KubePlatform;
use ph_deployer::telemetry::init_telemetry;
use ph_deployer::{AppDeployer, DeployerConfig, TaskLauncher};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DeployerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _telemetry = init_telemetry(&config.telemetry)
        .map_err(|e| anyhow!(e))
        .context("Failed to initialize telemetry")?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let namespace = config
        .namespace
        .clone()
        .unwrap_or_else(|| client.default_namespace().to_string());
    info!("Using namespace '{}'", namespace);

    let platform = Arc::new(KubePlatform::new(client, namespace.clone()));
    let artifacts: Arc<dyn ArtifactResolver> =
        Arc::new(LocalArtifactResolver::new(config.maven_local_repository.clone()));
    let config = Arc::new(config);

    match cli.command {
        Commands::Deploy(args) => {
            let request = args.to_request()?;
            let deployer = AppDeployer::new(platform, artifacts, config, namespace);
            let outcome = deployer
                .deploy(&request)
                .await
                .with_context(|| format!("Failed to deploy '{}'", request.name))?;
            println!("Deployed '{}': {}", outcome.app_id, outcome.state);
            for instance in &outcome.instances {
                println!("  {}", instance);
            }
        }
        Commands::Launch(args) => {
            let request = args.request.to_request()?;
            let launcher = TaskLauncher::new(platform, artifacts, config);
            let handle = launcher
                .launch(&request)
                .await
                .with_context(|| format!("Failed to launch '{}'", request.name))?;
            let task_id = handle.app_id.clone();
            let state = if args.detach {
                handle.detach()
            } else {
                handle
                    .wait()
                    .await
                    .with_context(|| format!("Task '{}' did not start", task_id))?
            };
            println!("Task '{}': {}", task_id, state);
        }
        Commands::Undeploy(args) => {
            let deployer = AppDeployer::new(platform, artifacts, config, namespace);
            deployer
                .undeploy(&args.app_id())
                .await
                .with_context(|| format!("Failed to undeploy '{}'", args.name))?;
            println!("Undeployed '{}'", args.name);
        }
        Commands::Status(args) => {
            let deployer = AppDeployer::new(platform, artifacts, config, namespace);
            let status = deployer.status(&args.app_id()).await?;
            println!("App '{}': {:?}", args.name, status.state);
            for instance in &status.instances {
                println!(
                    "  {} {}/{} available",
                    instance.name, instance.available, instance.replicas
                );
            }
        }
        Commands::TaskStatus(args) => {
            let launcher = TaskLauncher::new(platform, artifacts, config);
            let state = launcher.status(&args.app_id()).await?;
            println!("Task '{}': {:?}", args.name, state);
        }
        Commands::Cancel(args) => {
            let launcher = TaskLauncher::new(platform, artifacts, config);
            launcher.cancel(&args.app_id()).await?;
            println!("Cancelled '{}'", args.name);
        }
    }
    Ok(())
}
