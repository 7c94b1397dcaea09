/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/telemetry.rs
*
* Logging setup for the binary. `RUST_LOG` wins over the configured level.
* Spans can additionally be exported to a Jaeger agent through OpenTelemetry.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::config::TelemetryConfig;
use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Flushes and shuts down the tracer provider when dropped.
pub struct TelemetryGuard {
    jaeger: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.jaeger {
            global::shutdown_tracer_provider();
        }
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the global subscriber. Must be called from within a Tokio runtime
/// when Jaeger export is enabled.
pub fn init_telemetry(
    config: &TelemetryConfig,
) -> Result<TelemetryGuard, Box<dyn std::error::Error + Send + Sync>> {
    let telemetry = if config.jaeger {
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(config.service_name.clone())
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let (json_layer, text_layer) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(telemetry)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;

    Ok(TelemetryGuard {
        jaeger: config.jaeger,
    })
}
