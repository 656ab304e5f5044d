// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Bridge
//!
//! Subscribes to an MQTT topic over mutually authenticated TLS and invokes a
//! serverless function (AWS Lambda API) once per received message.
//!
//! # Features
//!
//! - **Mutual TLS**: broker verified against a private CA, client certificate presented
//! - **Synchronous invocation**: each message is forwarded and awaited before the next
//! - **Reconnect**: exponential backoff after connection loss
//! - **Demo publisher**: periodic sensor payloads for local testing
//!
//! # Quick Start
//!
//! ```bash
//! # Bridge with defaults (localhost:8883, sensor/data -> iot_processor)
//! sensor-bridge
//!
//! # Using config file
//! sensor-bridge --config bridge.toml
//!
//! # Publish test data
//! sensor-bridge --config bridge.toml publish
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [broker]
//! host = "localhost"
//! port = 8883
//! topic = "sensor/data"
//!
//! [tls]
//! ca_cert = "certs/ca.crt"
//! client_cert = "certs/client.crt"
//! client_key = "certs/client.key"
//!
//! [function]
//! name = "iot_processor"
//! endpoint_url = "http://localhost:4566"
//! ```

pub mod bridge;
pub mod config;
pub mod invoke;
pub mod publisher;
pub mod session;
pub mod tls;

pub use bridge::{Bridge, BridgeStats, BridgeStatsSnapshot, Delivery};
pub use config::{BridgeConfig, ConfigError};
pub use invoke::{
    FunctionInvoker, InvocationError, InvocationMode, InvocationRequest, InvocationResponse,
    LambdaInvoker,
};
pub use publisher::{Publisher, PublisherStats};
pub use session::{Backoff, LinkState, Session, SessionError};
pub use tls::{TlsContext, TlsContextBuilder, TlsError, TlsVersion};
