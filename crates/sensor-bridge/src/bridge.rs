// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-message handling: decode, log, invoke, log the outcome.

use crate::config::FunctionConfig;
use crate::invoke::{FunctionInvoker, InvocationError, InvocationRequest, InvocationResponse};
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The function returned successfully.
    Acknowledged,
    /// The invocation failed. The error has been logged.
    Failed,
    /// The payload was not valid UTF-8; no invocation was made.
    Skipped,
}

/// Forwards broker messages to a function, one invocation per message.
pub struct Bridge<I> {
    invoker: I,
    function_name: String,
    timeout: Option<Duration>,
    stats: Arc<BridgeStats>,
}

impl<I: FunctionInvoker> Bridge<I> {
    /// Bridge invoking `function_name` synchronously, without a timeout.
    pub fn new(function_name: impl Into<String>, invoker: I) -> Self {
        Self {
            invoker,
            function_name: function_name.into(),
            timeout: None,
            stats: Arc::new(BridgeStats::new()),
        }
    }

    /// Bridge configured from the `[function]` section.
    pub fn from_config(config: &FunctionConfig, invoker: I) -> Self {
        Self::new(config.name.clone(), invoker).with_timeout(config.timeout())
    }

    /// Bound every invocation. `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Shared statistics handle.
    pub fn stats(&self) -> Arc<BridgeStats> {
        Arc::clone(&self.stats)
    }

    /// Handle one message. Never fails; errors are logged and counted.
    pub async fn on_message(&self, topic: &str, payload: Bytes) -> Delivery {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let text = match std::str::from_utf8(&payload) {
            Ok(text) => text,
            Err(e) => {
                warn!(topic, len = payload.len(), error = %e, "payload is not valid UTF-8, skipping");
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                return Delivery::Skipped;
            }
        };

        info!(topic, payload = text, "message received");

        let request = InvocationRequest::new(self.function_name.as_str(), payload.clone());

        match self.invoke(request).await {
            Ok(response) => {
                info!(
                    function = %self.function_name,
                    status = response.status_code,
                    "function response acknowledged"
                );
                if let Some(body) = &response.payload {
                    debug!(
                        function = %self.function_name,
                        version = response.executed_version.as_deref().unwrap_or("-"),
                        body = %String::from_utf8_lossy(body),
                        "function response"
                    );
                }
                self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                Delivery::Acknowledged
            }
            Err(e) => {
                error!(function = %self.function_name, topic, error = %e, "function invocation failed");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Delivery::Failed
            }
        }
    }

    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, InvocationError> {
        let Some(limit) = self.timeout else {
            return self.invoker.invoke(request).await;
        };

        match tokio::time::timeout(limit, self.invoker.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(InvocationError::Timeout {
                function_name: self.function_name.clone(),
                timeout: limit,
            }),
        }
    }
}

/// Bridge counters.
#[derive(Debug)]
pub struct BridgeStats {
    /// Messages delivered by the broker.
    pub received: AtomicU64,

    /// Invocations that returned successfully.
    pub acknowledged: AtomicU64,

    /// Invocations that failed.
    pub failed: AtomicU64,

    /// Messages skipped (undecodable payload).
    pub skipped: AtomicU64,

    /// Payload bytes received.
    pub bytes: AtomicU64,

    pub started: Instant,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Snapshot of bridge statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BridgeStatsSnapshot {
    pub received: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes: u64,
    pub uptime_secs: u64,
}

impl BridgeStatsSnapshot {
    /// Messages received per second since start.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.received as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Messages still being processed (at most one).
    pub fn in_flight(&self) -> u64 {
        self.received
            .saturating_sub(self.acknowledged + self.failed + self.skipped)
    }
}
