/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/build_watch.rs
*
* Follows one build through its phases and runs a continuation once it
* completes.
*
* A `WatchSubscription` owns a task consuming a label-scoped Build watch. Only
* events for the watched build count; non-terminal phases are skipped. The
* watch stream is dropped as soon as a terminal phase is seen:
* - Complete: the continuation runs once with the build's output image.
* - Failed / Error / Cancelled: resolves with `Error::BuildFailed`; the
*   continuation never runs.
* - End of stream before a terminal phase: resolves with `Error::WatchClosed`.
* There is no timeout and no re-subscription. `close` aborts the task.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::Build;
use crate::error::{Error, Result};
use crate::kube_client::PlatformClient;
use futures::future::BoxFuture;
use futures::StreamExt;
use kube::ResourceExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

pub struct WatchSubscription<T> {
    selector: String,
    build: String,
    handle: JoinHandle<Result<T>>,
}

impl<T> WatchSubscription<T> {
    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn build(&self) -> &str {
        &self.build
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Closes the watch; the continuation will not run if it has not yet.
    pub fn close(self) {
        info!("Closing watch on '{}'", self.selector);
        self.handle.abort();
    }

    /// Waits for the outcome of the watch.
    pub async fn completion(self) -> Result<T> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(Error::WatchCancelled {
                selector: self.selector,
            }),
        }
    }
}

/// The image a completed build produced, or `fallback` when the platform did
/// not report one.
pub fn built_image(build: &Build, fallback: &str) -> String {
    build
        .output_image()
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}

/// Opens a watch on builds matching `selector` and follows `build_name`.
/// `continuation` receives the completed build.
pub async fn watch_build<P, T, F>(
    platform: &P,
    selector: &str,
    build_name: &str,
    continuation: F,
) -> Result<WatchSubscription<T>>
where
    P: PlatformClient,
    T: Send + 'static,
    F: FnOnce(Build) -> BoxFuture<'static, Result<T>> + Send + 'static,
{
    let mut events = platform.watch_by_label::<Build>(selector).await?;
    info!("Watching build '{}' on '{}'", build_name, selector);

    let span = info_span!("build_watch", build = %build_name);
    let selector_owned = selector.to_string();
    let build = build_name.to_string();
    let handle = tokio::spawn(
        async move {
            while let Some(event) = events.next().await {
                let observed = match event {
                    Ok(observed) => observed,
                    Err(e) => {
                        warn!("Watch on '{}' reported an error: {}", selector_owned, e);
                        continue;
                    }
                };
                if observed.name_any() != build {
                    continue;
                }
                let phase = observed.phase();
                if !phase.is_terminal() {
                    debug!("Build '{}' is {}", build, phase);
                    continue;
                }
                drop(events);
                if phase.is_failure() {
                    warn!("Build '{}' ended in phase {}", build, phase);
                    return Err(Error::BuildFailed {
                        name: build,
                        phase,
                        message: observed
                            .status
                            .as_ref()
                            .and_then(|s| s.message.clone())
                            .unwrap_or_default(),
                    });
                }
                info!("Build '{}' completed", build);
                return continuation(observed).await;
            }
            warn!(
                "Watch on '{}' closed before build '{}' finished",
                selector_owned, build
            );
            Err(Error::WatchClosed {
                selector: selector_owned,
                build,
            })
        }
        .instrument(span),
    );

    Ok(WatchSubscription {
        selector: selector.to_string(),
        build: build_name.to_string(),
        handle,
    })
}
