// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Logging setup and provisioner call metrics.
//!
//! [`ProvisionerMetrics`] is an ordinary value owned by whoever builds the
//! registrar. There is no global registry: the server creates one handle,
//! passes it to the registrar, and reads it back for `/metrics`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use utoipa::ToSchema;

use crate::config::{LogFormat, DEFAULT_LOG_FILTER};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`]. Calling this twice is
/// harmless; the second call is ignored.
pub fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Encoder RPC being measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethod {
    CreateStream,
    DeleteStream,
}

impl RpcMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::CreateStream => "CreateStream",
            RpcMethod::DeleteStream => "DeleteStream",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }

    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            CallStatus::Success
        } else {
            CallStatus::Error
        }
    }
}

#[derive(Debug, Default)]
struct Counter {
    calls: AtomicU64,
    micros: AtomicU64,
}

impl Counter {
    fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CallStats {
        CallStats {
            count: self.calls.load(Ordering::Relaxed),
            total_micros: self.micros.load(Ordering::Relaxed),
        }
    }
}

/// Call counts and cumulative latency of encoder RPCs, by method and status.
#[derive(Debug, Default)]
pub struct ProvisionerMetrics {
    create_success: Counter,
    create_error: Counter,
    delete_success: Counter,
    delete_error: Counter,
}

impl ProvisionerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, method: RpcMethod, status: CallStatus, elapsed: Duration) {
        let counter = match (method, status) {
            (RpcMethod::CreateStream, CallStatus::Success) => &self.create_success,
            (RpcMethod::CreateStream, CallStatus::Error) => &self.create_error,
            (RpcMethod::DeleteStream, CallStatus::Success) => &self.delete_success,
            (RpcMethod::DeleteStream, CallStatus::Error) => &self.delete_error,
        };
        counter.record(elapsed);

        tracing::debug!(
            method = method.as_str(),
            status = status.as_str(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "encoder call finished"
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            encoder_calls: vec![
                MethodStats::new(RpcMethod::CreateStream, CallStatus::Success, &self.create_success),
                MethodStats::new(RpcMethod::CreateStream, CallStatus::Error, &self.create_error),
                MethodStats::new(RpcMethod::DeleteStream, CallStatus::Success, &self.delete_success),
                MethodStats::new(RpcMethod::DeleteStream, CallStatus::Error, &self.delete_error),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CallStats {
    pub count: u64,
    pub total_micros: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct MethodStats {
    pub method: String,
    pub status: String,
    #[serde(flatten)]
    pub stats: CallStats,
}

impl MethodStats {
    fn new(method: RpcMethod, status: CallStatus, counter: &Counter) -> Self {
        Self {
            method: method.as_str().to_string(),
            status: status.as_str().to_string(),
            stats: counter.snapshot(),
        }
    }
}

/// Point-in-time copy of [`ProvisionerMetrics`], served on `/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    pub encoder_calls: Vec<MethodStats>,
}

impl MetricsSnapshot {
    /// Number of calls recorded for a method/status pair.
    pub fn count(&self, method: RpcMethod, status: CallStatus) -> u64 {
        self.encoder_calls
            .iter()
            .find(|m| m.method == method.as_str() && m.status == status.as_str())
            .map(|m| m.stats.count)
            .unwrap_or(0)
    }
}
