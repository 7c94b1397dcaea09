/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/error.rs
*
* Error taxonomy for the deployer library. Configuration problems are raised
* before any platform mutation; artifact and Dockerfile I/O failures during
* strategy selection are fatal; platform rejections are surfaced unchanged
* apart from 404/409, which get their own variants so the reconciler can
* react to them.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::crds::BuildPhase;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read artifact '{artifact}': {source}")]
    ArtifactIo {
        artifact: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to inspect artifact archive '{artifact}': {source}")]
    Archive {
        artifact: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Failed to read Dockerfile '{path}': {source}")]
    DockerfileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} '{name}' was not found")]
    NotFound { kind: String, name: String },

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Watch error: {0}")]
    WatchError(#[from] kube::runtime::watcher::Error),

    #[error("Failed waiting on resource: {0}")]
    WaitError(#[from] kube::runtime::wait::Error),

    #[error("Build '{name}' ended in phase {phase}: {message}")]
    BuildFailed {
        name: String,
        phase: BuildPhase,
        message: String,
    },

    #[error("Watch on '{selector}' closed before build '{build}' reached a terminal phase")]
    WatchClosed { selector: String, build: String },

    #[error("Watch on '{selector}' was cancelled")]
    WatchCancelled { selector: String },

    #[error("Failed to (de)serialize resource: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// True when the platform reported a name conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
