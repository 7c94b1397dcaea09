/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/testing.rs
*
* Test doubles shared by the unit tests: an in-memory `PlatformClient` that
* records every mutating call and lets a test drive open watches, an
* `ArtifactResolver` over in-memory bytes, and a helper to build jar fixtures.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::artifact::{ArtifactRef, ArtifactResolver, SourceControl};
use crate::crds::{Build, BuildPhase, BuildStatus, DeploymentConfig, BUILD_NUMBER_ANNOTATION};
use crate::error::{Error, Result};
use crate::kube_client::{kind_of, PlatformClient, PlatformResource};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{BoxStream, StreamExt};
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Builds an in-memory zip archive holding `entries` (path, contents).
pub fn jar_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (path, contents) in entries {
        writer.start_file(*path, options).unwrap();
        writer.write_all(contents.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

struct WatchEntry {
    kind: String,
    selector: String,
    sender: mpsc::UnboundedSender<Value>,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, String), Value>,
    ops: Vec<String>,
    watches: Vec<WatchEntry>,
    create_conflicts: BTreeSet<(String, String)>,
    terminating: BTreeSet<(String, String)>,
    version: u64,
}

/// In-memory platform. Objects are stored as JSON so any typed kind fits.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<State>,
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

fn labels_of(value: &Value) -> BTreeMap<String, String> {
    serde_json::from_value(value["metadata"]["labels"].clone()).unwrap_or_default()
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutating calls in order, e.g. `create BuildConfig/ticker`.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn count_ops(&self, prefix: &str) -> usize {
        self.ops().iter().filter(|op| op.starts_with(prefix)).count()
    }

    pub fn clear_ops(&self) {
        self.state.lock().unwrap().ops.clear();
    }

    pub fn stored<K: PlatformResource>(&self, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind_of::<K>(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn all<K: PlatformResource>(&self) -> Vec<K> {
        let kind = kind_of::<K>();
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| serde_json::from_value(v.clone()).unwrap())
            .collect()
    }

    /// Stores an object as if it had been created out of band.
    pub fn insert<K: PlatformResource>(&self, object: K) {
        let mut state = self.state.lock().unwrap();
        let value = Self::stamp(&mut state, serde_json::to_value(&object).unwrap());
        let name = object.name_any();
        state.objects.insert((kind_of::<K>(), name), value);
    }

    /// The next create of this object reports a name conflict once.
    pub fn inject_create_conflict<K: PlatformResource>(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .create_conflicts
            .insert((kind_of::<K>(), name.to_string()));
    }

    /// Deleting this object only marks it terminating; it stays visible
    /// until `await_deleted` is called for it.
    pub fn terminate_gracefully<K: PlatformResource>(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .terminating
            .insert((kind_of::<K>(), name.to_string()));
    }

    /// Moves a stored build to `phase` and delivers it to matching watches.
    pub fn set_build_phase(&self, name: &str, phase: BuildPhase, image: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let key = (kind_of::<Build>(), name.to_string());
        let mut build: Build = serde_json::from_value(state.objects[&key].clone()).unwrap();
        build.status = Some(BuildStatus {
            phase,
            message: phase.is_failure().then(|| format!("build {}", phase)),
            output_docker_image_reference: image.map(str::to_string),
        });
        let value = Self::stamp(&mut state, serde_json::to_value(&build).unwrap());
        state.objects.insert(key, value.clone());
        Self::notify(&mut state, &kind_of::<Build>(), &value);
    }

    /// True once every watch opened so far has been dropped by its consumer.
    pub fn watches_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .watches
            .iter()
            .all(|w| w.sender.is_closed())
    }

    pub fn open_watches(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .watches
            .iter()
            .filter(|w| !w.sender.is_closed())
            .count()
    }

    /// Ends every watch stream from the platform side.
    pub fn drop_watches(&self) {
        self.state.lock().unwrap().watches.clear();
    }

    fn stamp(state: &mut State, mut value: Value) -> Value {
        state.version += 1;
        let meta = &mut value["metadata"];
        meta["resourceVersion"] = json!(state.version.to_string());
        if meta["uid"].is_null() {
            meta["uid"] = json!(format!("uid-{}", state.version));
        }
        if meta["creationTimestamp"].is_null() {
            meta["creationTimestamp"] = json!(format!(
                "2025-01-01T00:{:02}:{:02}Z",
                state.version / 60 % 60,
                state.version % 60
            ));
        }
        value
    }

    fn notify(state: &mut State, kind: &str, value: &Value) {
        let labels = labels_of(value);
        for watch in state.watches.iter() {
            if watch.kind == kind && matches_selector(&labels, &watch.selector) {
                let _ = watch.sender.unbounded_send(value.clone());
            }
        }
    }

    fn start_build(&self, build_config: &str, op: &str) -> Result<Build> {
        let mut state = self.state.lock().unwrap();
        let bc_key = ("BuildConfig".to_string(), build_config.to_string());
        let bc = state.objects.get(&bc_key).cloned().ok_or_else(|| Error::NotFound {
            kind: "BuildConfig".to_string(),
            name: build_config.to_string(),
        })?;
        let number = state
            .objects
            .keys()
            .filter(|(k, n)| k == "Build" && n.starts_with(&format!("{}-", build_config)))
            .count()
            + 1;
        let name = format!("{}-{}", build_config, number);
        let mut annotations = serde_json::Map::new();
        annotations.insert(BUILD_NUMBER_ANNOTATION.to_string(), json!(number.to_string()));
        let build = json!({
            "apiVersion": "build.openshift.io/v1",
            "kind": "Build",
            "metadata": {
                "name": name,
                "labels": bc["metadata"]["labels"],
                "annotations": annotations,
            },
            "spec": {
                "source": bc["spec"]["source"],
                "strategy": bc["spec"]["strategy"],
                "output": bc["spec"]["output"],
            },
            "status": { "phase": "New" },
        });
        let value = Self::stamp(&mut state, build);
        state.objects.insert(("Build".to_string(), name.clone()), value.clone());
        state.ops.push(format!("{} BuildConfig/{}", op, build_config));
        Self::notify(&mut state, "Build", &value);
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get<K: PlatformResource>(&self, name: &str) -> Result<Option<K>> {
        Ok(self.stored::<K>(name))
    }

    async fn create<K: PlatformResource>(&self, object: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let name = object.name_any();
        let mut state = self.state.lock().unwrap();
        let key = (kind.clone(), name.clone());
        if state.create_conflicts.remove(&key) || state.objects.contains_key(&key) {
            return Err(Error::AlreadyExists { kind, name });
        }
        let value = Self::stamp(&mut state, serde_json::to_value(object)?);
        state.objects.insert(key, value.clone());
        state.ops.push(format!("create {}/{}", kind, name));
        Self::notify(&mut state, &kind, &value);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: PlatformResource>(&self, name: &str, object: &K) -> Result<K> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        let key = (kind.clone(), name.to_string());
        let Some(existing) = state.objects.get(&key) else {
            return Err(Error::NotFound {
                kind,
                name: name.to_string(),
            });
        };
        if existing["metadata"]["resourceVersion"] != json!(object.meta().resource_version) {
            return Err(Error::AlreadyExists {
                kind,
                name: name.to_string(),
            });
        }
        let mut value = serde_json::to_value(object)?;
        value["metadata"]["creationTimestamp"] = existing["metadata"]["creationTimestamp"].clone();
        value["metadata"]["uid"] = existing["metadata"]["uid"].clone();
        let value = Self::stamp(&mut state, value);
        state.objects.insert(key, value.clone());
        state.ops.push(format!("replace {}/{}", kind, name));
        Self::notify(&mut state, &kind, &value);
        Ok(serde_json::from_value(value)?)
    }

    async fn delete<K: PlatformResource>(&self, name: &str) -> Result<()> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        let key = (kind.clone(), name.to_string());
        if state.terminating.contains(&key) {
            let Some(value) = state.objects.get_mut(&key) else {
                return Err(Error::NotFound { kind, name: name.to_string() });
            };
            value["metadata"]["deletionTimestamp"] = json!("2025-01-01T01:00:00Z");
        } else if state.objects.remove(&key).is_none() {
            return Err(Error::NotFound {
                kind,
                name: name.to_string(),
            });
        }
        state.ops.push(format!("delete {}/{}", kind, name));
        Ok(())
    }

    async fn await_deleted<K: PlatformResource>(&self, name: &str, uid: &str) -> Result<()> {
        let kind = kind_of::<K>();
        let mut state = self.state.lock().unwrap();
        let key = (kind.clone(), name.to_string());
        state.terminating.remove(&key);
        let same_object = state
            .objects
            .get(&key)
            .is_some_and(|value| value["metadata"]["uid"] == json!(uid));
        if same_object {
            state.objects.remove(&key);
            state.ops.push(format!("await-deleted {}/{}", kind, name));
        }
        Ok(())
    }

    async fn list_by_label<K: PlatformResource>(&self, selector: &str) -> Result<Vec<K>> {
        let kind = kind_of::<K>();
        let state = self.state.lock().unwrap();
        state
            .objects
            .iter()
            .filter(|((k, _), v)| *k == kind && matches_selector(&labels_of(v), selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn watch_by_label<K: PlatformResource>(
        &self,
        selector: &str,
    ) -> Result<BoxStream<'static, Result<K>>> {
        let kind = kind_of::<K>();
        let (sender, receiver) = mpsc::unbounded();
        let mut state = self.state.lock().unwrap();
        for ((k, _), value) in state.objects.iter() {
            if *k == kind && matches_selector(&labels_of(value), selector) {
                let _ = sender.unbounded_send(value.clone());
            }
        }
        state.watches.push(WatchEntry {
            kind,
            selector: selector.to_string(),
            sender,
        });
        Ok(receiver
            .map(|value| serde_json::from_value::<K>(value).map_err(Error::from))
            .boxed())
    }

    async fn instantiate_build(&self, build_config: &str) -> Result<Build> {
        self.start_build(build_config, "instantiate")
    }

    async fn submit_binary_build(
        &self,
        build_config: &str,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<Build> {
        self.start_build(build_config, "binary")
    }

    async fn rollout_latest(&self, deployment_config: &str) -> Result<DeploymentConfig> {
        let mut dc = self
            .stored::<DeploymentConfig>(deployment_config)
            .ok_or_else(|| Error::NotFound {
                kind: "DeploymentConfig".to_string(),
                name: deployment_config.to_string(),
            })?;
        let mut status = dc.status.take().unwrap_or_default();
        status.latest_version += 1;
        dc.status = Some(status);
        let mut state = self.state.lock().unwrap();
        let value = Self::stamp(&mut state, serde_json::to_value(&dc)?);
        state
            .objects
            .insert((kind_of::<DeploymentConfig>(), deployment_config.to_string()), value);
        state.ops.push(format!("rollout DeploymentConfig/{}", deployment_config));
        Ok(dc)
    }
}

/// Resolver over in-memory artifacts that counts how often it was inspected.
#[derive(Default)]
pub struct FakeArtifacts {
    pub bytes: Vec<u8>,
    pub metadata: Option<SourceControl>,
    pub files: BTreeMap<String, Vec<u8>>,
    inspections: AtomicUsize,
}

impl FakeArtifacts {
    pub fn with_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, uri: &str, tag: Option<&str>) -> Self {
        self.metadata = Some(SourceControl {
            uri: uri.to_string(),
            tag: tag.map(str::to_string),
        });
        self
    }

    pub fn with_file(mut self, path: &str, contents: &str) -> Self {
        self.files.insert(path.to_string(), contents.as_bytes().to_vec());
        self
    }

    /// Number of introspection calls (metadata or file extraction).
    pub fn inspections(&self) -> usize {
        self.inspections.load(Ordering::SeqCst)
    }
}

impl ArtifactResolver for FakeArtifacts {
    fn resolve_bytes(&self, _artifact: &ArtifactRef) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn source_control_metadata(&self, _artifact: &ArtifactRef) -> Result<Option<SourceControl>> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }

    fn extract_file(&self, _artifact: &ArtifactRef, path: &str) -> Result<Option<Vec<u8>>> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.get(path).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let labels: BTreeMap<String, String> = [("a", "1"), ("b", "2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert!(matches_selector(&labels, "a=1"));
        assert!(matches_selector(&labels, "a=1,b=2"));
        assert!(!matches_selector(&labels, "a=2"));
        assert!(matches_selector(&labels, "b"));
    }
}
