/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/artifact.rs
*
* Artifact references and the collaborator that resolves them. A reference is
* either a container image (nothing to build), a Maven coordinate resolved in
* a local repository, or a plain file. Jar/zip artifacts are introspectable:
* the strategy selector can look inside them for an embedded `git.properties`
* and for a Dockerfile.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/// Places a `git.properties` file is looked up in a packaged artifact.
const GIT_PROPERTIES_PATHS: [&str; 3] = [
    "git.properties",
    "BOOT-INF/classes/git.properties",
    "WEB-INF/classes/git.properties",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactRef {
    /// A pullable container image reference.
    Docker(String),
    Maven(MavenCoordinates),
    File(PathBuf),
}

impl ArtifactRef {
    pub fn is_image(&self) -> bool {
        matches!(self, ArtifactRef::Docker(_))
    }

    /// File name used when the artifact is uploaded to a binary build.
    pub fn file_name(&self) -> String {
        match self {
            ArtifactRef::Docker(image) => image.rsplit('/').next().unwrap_or(image).to_string(),
            ArtifactRef::Maven(coords) => coords.file_name(),
            ArtifactRef::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "artifact".to_string()),
        }
    }
}

impl FromStr for ArtifactRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("Artifact reference must not be empty".to_string()));
        }
        if let Some(image) = s.strip_prefix("docker://").or_else(|| s.strip_prefix("docker:")) {
            return Ok(ArtifactRef::Docker(image.to_string()));
        }
        if let Some(coords) = s.strip_prefix("maven://").or_else(|| s.strip_prefix("maven:")) {
            return Ok(ArtifactRef::Maven(coords.parse()?));
        }
        let path = s.strip_prefix("file://").or_else(|| s.strip_prefix("file:")).unwrap_or(s);
        Ok(ArtifactRef::File(PathBuf::from(path)))
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::Docker(image) => write!(f, "docker:{}", image),
            ArtifactRef::Maven(coords) => write!(f, "maven://{}", coords),
            ArtifactRef::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// `group:artifact[:extension[:classifier]]:version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MavenCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub extension: String,
    pub classifier: Option<String>,
    pub version: String,
}

impl MavenCoordinates {
    pub fn file_name(&self) -> String {
        match &self.classifier {
            Some(c) => format!("{}-{}-{}.{}", self.artifact_id, self.version, c, self.extension),
            None => format!("{}-{}.{}", self.artifact_id, self.version, self.extension),
        }
    }

    /// Location relative to the root of a Maven repository.
    pub fn repository_path(&self) -> PathBuf {
        let mut path: PathBuf = self.group_id.split('.').collect();
        path.push(&self.artifact_id);
        path.push(&self.version);
        path.push(self.file_name());
        path
    }
}

impl FromStr for MavenCoordinates {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::Config(format!("Invalid Maven coordinates '{}'", s)));
        }
        let (extension, classifier) = match parts.len() {
            3 => ("jar", None),
            4 => (parts[2], None),
            5 => (parts[2], Some(parts[3].to_string())),
            _ => {
                return Err(Error::Config(format!(
                    "Invalid Maven coordinates '{}': expected group:artifact[:extension[:classifier]]:version",
                    s
                )))
            }
        };
        Ok(Self {
            group_id: parts[0].to_string(),
            artifact_id: parts[1].to_string(),
            extension: extension.to_string(),
            classifier,
            version: parts[parts.len() - 1].to_string(),
        })
    }
}

impl fmt::Display for MavenCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.extension)?;
        if let Some(c) = &self.classifier {
            write!(f, ":{}", c)?;
        }
        write!(f, ":{}", self.version)
    }
}

/// Source-control metadata embedded in an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceControl {
    pub uri: String,
    pub tag: Option<String>,
}

/// Resolves artifact references to bytes and looks inside packaged artifacts.
pub trait ArtifactResolver: Send + Sync {
    fn resolve_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>>;

    /// `Ok(None)` when the artifact is not introspectable or carries no
    /// metadata; `Err` only when it could not be read.
    fn source_control_metadata(&self, artifact: &ArtifactRef) -> Result<Option<SourceControl>>;

    fn extract_file(&self, artifact: &ArtifactRef, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Resolves artifacts from the local filesystem and an optional local Maven
/// repository.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactResolver {
    maven_repository: Option<PathBuf>,
}

impl LocalArtifactResolver {
    pub fn new(maven_repository: Option<PathBuf>) -> Self {
        Self { maven_repository }
    }

    fn locate(&self, artifact: &ArtifactRef) -> Result<PathBuf> {
        match artifact {
            ArtifactRef::File(path) => Ok(path.clone()),
            ArtifactRef::Maven(coords) => {
                let repo = self.maven_repository.as_ref().ok_or_else(|| {
                    Error::Config(format!(
                        "No Maven repository configured to resolve '{}'",
                        coords
                    ))
                })?;
                Ok(repo.join(coords.repository_path()))
            }
            ArtifactRef::Docker(image) => Err(Error::Config(format!(
                "Container image '{}' has no artifact bytes to resolve",
                image
            ))),
        }
    }

    fn open_archive(&self, artifact: &ArtifactRef) -> Result<Option<ZipArchive<Cursor<Vec<u8>>>>> {
        if artifact.is_image() {
            return Ok(None);
        }
        let bytes = self.resolve_bytes(artifact)?;
        match ZipArchive::new(Cursor::new(bytes)) {
            Ok(archive) => Ok(Some(archive)),
            Err(ZipError::InvalidArchive(_)) | Err(ZipError::UnsupportedArchive(_)) => {
                debug!("Artifact '{}' is not an archive; skipping introspection.", artifact);
                Ok(None)
            }
            Err(source) => Err(Error::Archive {
                artifact: artifact.to_string(),
                source,
            }),
        }
    }
}

impl ArtifactResolver for LocalArtifactResolver {
    fn resolve_bytes(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        let path = self.locate(artifact)?;
        std::fs::read(&path).map_err(|source| Error::ArtifactIo {
            artifact: path.display().to_string(),
            source,
        })
    }

    fn source_control_metadata(&self, artifact: &ArtifactRef) -> Result<Option<SourceControl>> {
        for candidate in GIT_PROPERTIES_PATHS {
            if let Some(bytes) = self.extract_file(artifact, candidate)? {
                let properties = parse_properties(&String::from_utf8_lossy(&bytes));
                return Ok(source_control_from(&properties));
            }
        }
        Ok(None)
    }

    fn extract_file(&self, artifact: &ArtifactRef, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut archive) = self.open_archive(artifact)? else {
            return Ok(None);
        };
        let archive_error = |source| Error::Archive {
            artifact: artifact.to_string(),
            source,
        };
        let mut entry = match archive.by_name(path) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(archive_error(e)),
        };
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| archive_error(ZipError::Io(e)))?;
        Ok(Some(contents))
    }
}

fn source_control_from(properties: &BTreeMap<String, String>) -> Option<SourceControl> {
    let uri = properties
        .get("git.remote.origin.url")
        .filter(|u| !u.is_empty())?
        .clone();
    let tag = properties
        .get("git.tags")
        .and_then(|tags| tags.split(',').map(str::trim).find(|t| !t.is_empty()))
        .or_else(|| properties.get("git.commit.id").map(|c| c.trim()).filter(|c| !c.is_empty()))
        .map(str::to_string);
    Some(SourceControl { uri, tag })
}

/// Minimal `.properties` reader: `key=value` / `key: value` lines, `#` and `!`
/// comments, backslash escapes for the separator characters.
fn parse_properties(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter_map(|line| {
            let split = find_separator(line)?;
            let key = unescape(line[..split].trim());
            let value = unescape(line[split + 1..].trim());
            Some((key, value))
        })
        .collect()
}

fn find_separator(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '=' | ':' if !escaped => return Some(i),
            _ => escaped = false,
        }
    }
    None
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Whether `value` names an existing file on the local filesystem.
pub fn is_local_file(value: &str) -> bool {
    Path::new(value).is_file()
}
