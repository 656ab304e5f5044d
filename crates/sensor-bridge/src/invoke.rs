// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serverless function invocation.
//!
//! [`FunctionInvoker`] is the seam between the bridge and the function
//! service. [`LambdaInvoker`] talks to the AWS Lambda API (or a local emulator
//! such as LocalStack) with static credentials and a single attempt per call.

use crate::config::FunctionConfig;
use async_trait::async_trait;
use aws_sdk_lambda::config::retry::RetryConfig;
use aws_sdk_lambda::config::timeout::TimeoutConfig;
use aws_sdk_lambda::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_lambda::error::{DisplayErrorContext, SdkError};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Name reported by the static credentials provider.
const CREDENTIALS_PROVIDER: &str = "sensor-bridge-static";

/// How the function is invoked. Only synchronous invocation is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvocationMode {
    /// Wait for the function to finish and return its result.
    #[default]
    RequestResponse,
}

impl From<InvocationMode> for InvocationType {
    fn from(mode: InvocationMode) -> Self {
        match mode {
            InvocationMode::RequestResponse => InvocationType::RequestResponse,
        }
    }
}

impl fmt::Display for InvocationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationMode::RequestResponse => f.write_str("RequestResponse"),
        }
    }
}

/// One invocation of a named function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub function_name: String,
    pub mode: InvocationMode,
    /// Raw message payload, passed through unmodified.
    pub payload: Bytes,
}

impl InvocationRequest {
    /// Synchronous invocation of `function_name` with `payload`.
    pub fn new(function_name: impl Into<String>, payload: Bytes) -> Self {
        Self {
            function_name: function_name.into(),
            mode: InvocationMode::RequestResponse,
            payload,
        }
    }
}

/// Successful invocation result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResponse {
    pub status_code: i32,
    pub executed_version: Option<String>,
    pub payload: Option<Bytes>,
}

/// Invocation errors. None of them is retried.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// Transport, authentication or request rejection.
    #[error("invocation of {function_name} failed: {message}")]
    Service {
        function_name: String,
        message: String,
    },

    /// The function ran and reported an error.
    #[error("function {function_name} reported {kind}")]
    Function { function_name: String, kind: String },

    #[error("invocation of {function_name} timed out after {timeout:?}")]
    Timeout {
        function_name: String,
        timeout: Duration,
    },
}

/// Invokes a serverless function.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, InvocationError>;
}

/// [`FunctionInvoker`] backed by the AWS Lambda API.
#[derive(Debug, Clone)]
pub struct LambdaInvoker {
    client: aws_sdk_lambda::Client,
    timeout: Option<Duration>,
}

impl LambdaInvoker {
    /// Build a client from the `[function]` configuration section.
    ///
    /// No network I/O happens here.
    pub fn new(config: &FunctionConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let mut timeouts = TimeoutConfig::builder();
        if let Some(timeout) = config.timeout() {
            timeouts = timeouts.operation_timeout(timeout);
        }

        let mut builder = aws_sdk_lambda::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts.build());

        if let Some(url) = &config.endpoint_url {
            builder = builder.endpoint_url(url);
        }

        Self {
            client: aws_sdk_lambda::Client::from_conf(builder.build()),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl FunctionInvoker for LambdaInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, InvocationError> {
        let InvocationRequest {
            function_name,
            mode,
            payload,
        } = request;

        let result = self
            .client
            .invoke()
            .function_name(&function_name)
            .invocation_type(mode.into())
            .payload(Blob::new(payload))
            .send()
            .await;

        let out = match result {
            Ok(out) => out,
            Err(SdkError::TimeoutError(_)) => {
                return Err(InvocationError::Timeout {
                    function_name,
                    timeout: self.timeout.unwrap_or_default(),
                });
            }
            Err(err) => {
                return Err(InvocationError::Service {
                    function_name,
                    message: DisplayErrorContext(&err).to_string(),
                });
            }
        };

        if let Some(kind) = out.function_error() {
            return Err(InvocationError::Function {
                function_name,
                kind: kind.to_string(),
            });
        }

        Ok(InvocationResponse {
            status_code: out.status_code(),
            executed_version: out.executed_version().map(str::to_string),
            payload: out.payload().map(|b| Bytes::copy_from_slice(b.as_ref())),
        })
    }
}
