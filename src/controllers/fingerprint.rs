/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/fingerprint.rs
*
* Content fingerprints of deployable artifacts and the gate that decides
* whether an existing build can be reused instead of starting a new one.
*
* A fingerprint is the SHA-256 of the artifact bytes, so the same content
* yields the same fingerprint whatever it is called. It is written into the
* BuildConfig strategy environment (`PH_ARTIFACT_FINGERPRINT`), which the
* platform copies onto every Build it starts.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::DeployerConfig;
use crate::controllers::utils::FINGERPRINT_ENV;
use crate::crds::{sort_builds, Build, BuildPhase};
use crate::error::Result;
use crate::request::{keys, DeploymentRequest};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn carries(build: &Build, fingerprint: &Fingerprint) -> bool {
    build.phase() != BuildPhase::Failed
        && build.spec.strategy.env_value(FINGERPRINT_ENV) == Some(fingerprint.as_str())
}

/// True iff a non-Failed build among `builds` carries `fingerprint`.
pub fn is_build_reusable(builds: &[Build], fingerprint: &Fingerprint) -> bool {
    builds.iter().any(|b| carries(b, fingerprint))
}

/// The most recent non-Failed build carrying `fingerprint`.
pub fn reusable_build(builds: &[Build], fingerprint: &Fingerprint) -> Option<Build> {
    let mut matching: Vec<Build> = builds
        .iter()
        .filter(|b| carries(b, fingerprint))
        .cloned()
        .collect();
    sort_builds(&mut matching);
    matching.pop()
}

/// Whether a rebuild is forced. The request's flag wins; without it the
/// deployer-wide setting applies.
pub fn force_build(request: &DeploymentRequest, config: &DeployerConfig) -> Result<bool> {
    Ok(request
        .bool_property(keys::FORCE_BUILD)?
        .unwrap_or(config.force_build))
}

/// The build to reuse for this request, if any.
pub fn build_to_reuse(
    request: &DeploymentRequest,
    config: &DeployerConfig,
    builds: &[Build],
    fingerprint: &Fingerprint,
) -> Result<Option<Build>> {
    if force_build(request, config)? {
        return Ok(None);
    }
    Ok(reusable_build(builds, fingerprint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactRef;
    use crate::crds::{BuildStatus, BuildStrategy, CommonBuildSpec, SourceBuildStrategy, BUILD_NUMBER_ANNOTATION};
    use k8s_openapi::api::core::v1::EnvVar;
    use std::collections::BTreeMap;

    fn build(number: u64, fingerprint: &str, phase: BuildPhase) -> Build {
        let mut build = Build::new(
            &format!("ticker-{}", number),
            CommonBuildSpec {
                strategy: BuildStrategy {
                    source_strategy: Some(SourceBuildStrategy {
                        env: vec![EnvVar {
                            name: FINGERPRINT_ENV.to_string(),
                            value: Some(fingerprint.to_string()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        build.metadata.annotations = Some(BTreeMap::from([(
            BUILD_NUMBER_ANNOTATION.to_string(),
            number.to_string(),
        )]));
        build.status = Some(BuildStatus {
            phase,
            output_docker_image_reference: Some(format!("registry/ticker@{}", number)),
            ..Default::default()
        });
        build
    }

    fn request() -> DeploymentRequest {
        DeploymentRequest::new("ticker", ArtifactRef::File("ticker.jar".into()))
    }

    #[test]
    fn test_identical_content_yields_identical_fingerprint() {
        let a = Fingerprint::of(b"jar-bytes");
        let b = Fingerprint::of(b"jar-bytes");
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::of(b"other-bytes"));
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_empty_build_list_is_never_reusable() {
        assert!(!is_build_reusable(&[], &Fingerprint::of(b"x")));
    }

    #[test]
    fn test_failed_builds_are_not_reused() {
        let fp = Fingerprint::of(b"x");
        let builds = vec![build(1, fp.as_str(), BuildPhase::Failed)];
        assert!(!is_build_reusable(&builds, &fp));

        let builds = vec![
            build(1, fp.as_str(), BuildPhase::Failed),
            build(2, fp.as_str(), BuildPhase::Running),
        ];
        assert!(is_build_reusable(&builds, &fp));
    }

    #[test]
    fn test_mismatched_fingerprint_is_not_reused() {
        let builds = vec![build(1, "other", BuildPhase::Complete)];
        assert!(!is_build_reusable(&builds, &Fingerprint::of(b"x")));
    }

    #[test]
    fn test_most_recent_match_is_reused() {
        let fp = Fingerprint::of(b"x");
        let builds = vec![
            build(3, fp.as_str(), BuildPhase::Complete),
            build(5, fp.as_str(), BuildPhase::Failed),
            build(4, fp.as_str(), BuildPhase::Complete),
            build(6, "other", BuildPhase::Complete),
        ];
        let chosen = reusable_build(&builds, &fp).unwrap();
        assert_eq!(chosen.build_number(), 4);
    }

    #[test]
    fn test_force_flag_overrides_match() {
        let fp = Fingerprint::of(b"x");
        let builds = vec![build(1, fp.as_str(), BuildPhase::Complete)];
        let config = DeployerConfig::default();

        assert!(build_to_reuse(&request(), &config, &builds, &fp).unwrap().is_some());

        let forced = request().with_property(keys::FORCE_BUILD, "true");
        assert!(build_to_reuse(&forced, &config, &builds, &fp).unwrap().is_none());

        let always = DeployerConfig {
            force_build: true,
            ..DeployerConfig::default()
        };
        assert!(build_to_reuse(&request(), &always, &builds, &fp).unwrap().is_none());

        let not_forced = request().with_property(keys::FORCE_BUILD, "false");
        assert!(build_to_reuse(&not_forced, &always, &builds, &fp).unwrap().is_some());
    }
}
