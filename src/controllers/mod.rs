/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/controllers/mod.rs
*
* The deployment pipeline: reconciling platform objects, deciding whether and
* how to build, fanning requests out into instances and driving builds to a
* running deployment or task.
*
* SPDX-License-Identifier: Apache-2.0 */

pub mod app_deployer;
pub mod build_watch;
pub mod factories;
pub mod fanout;
pub mod fingerprint;
pub mod pipeline;
pub mod reconciler;
pub mod strategy;
pub mod task_launcher;
pub mod utils;
