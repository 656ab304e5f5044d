// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for integration tests.

#![allow(dead_code)]

pub mod broker;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
};
use sensor_bridge::{FunctionInvoker, InvocationError, InvocationRequest, InvocationResponse};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

// ---------------------------------------------------------------------------
// Log capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{:?}", value);
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

/// Records every event into a shared buffer.
#[derive(Clone, Default)]
pub struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CaptureLayer {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Messages in emission order.
    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }

    /// Messages at `max` severity or above (e.g. `Level::INFO` drops debug/trace).
    pub fn messages_up_to(&self, max: Level) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level <= max)
            .map(|e| e.message)
            .collect()
    }

    pub fn count_at(&self, level: Level) -> usize {
        self.events().iter().filter(|e| e.level == level).count()
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

/// Install a capturing subscriber for the current thread.
///
/// Works with `#[tokio::test]` (current-thread runtime).
pub fn capture_logs() -> (CaptureLayer, tracing::subscriber::DefaultGuard) {
    let layer = CaptureLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (layer, guard)
}

// ---------------------------------------------------------------------------
// Invokers
// ---------------------------------------------------------------------------

/// Records requests; fails those whose payload is listed.
#[derive(Clone, Default)]
pub struct RecordingInvoker {
    requests: Arc<Mutex<Vec<InvocationRequest>>>,
    failing: Arc<Mutex<HashSet<Vec<u8>>>>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, payload: &[u8]) {
        self.failing.lock().unwrap().insert(payload.to_vec());
    }

    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FunctionInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationResponse, InvocationError> {
        let fail = self.failing.lock().unwrap().contains(&request.payload[..]);
        let function_name = request.function_name.clone();
        self.requests.lock().unwrap().push(request);

        if fail {
            return Err(InvocationError::Service {
                function_name,
                message: "service unreachable".into(),
            });
        }
        Ok(InvocationResponse {
            status_code: 200,
            executed_version: Some("$LATEST".into()),
            payload: Some(bytes::Bytes::from_static(br#"{"status":"processed"}"#)),
        })
    }
}

// ---------------------------------------------------------------------------
// PKI
// ---------------------------------------------------------------------------

/// CA plus CA-signed client and server certificates, written as PEM files.
pub struct TestPki {
    pub dir: TempDir,
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "sensor-bridge test CA");
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let client_key = KeyPair::generate().unwrap();
        let mut client_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        client_params
            .distinguished_name
            .push(DnType::CommonName, "sensor-bridge");
        client_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let client = client_params.signed_by(&client_key, &ca, &ca_key).unwrap();

        // Brokers in tests listen on 127.0.0.1, so the IP needs a SAN too.
        let server_key = KeyPair::generate().unwrap();
        let mut server_params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
                .unwrap();
        server_params
            .distinguished_name
            .push(DnType::CommonName, "test broker");
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server = server_params.signed_by(&server_key, &ca, &ca_key).unwrap();

        let dir = TempDir::new().unwrap();
        let ca_cert = dir.path().join("ca.crt");
        let client_cert = dir.path().join("client.crt");
        let client_key_path = dir.path().join("client.key");
        let server_cert = dir.path().join("server.crt");
        let server_key_path = dir.path().join("server.key");

        std::fs::write(&ca_cert, ca.pem()).unwrap();
        std::fs::write(&client_cert, client.pem()).unwrap();
        std::fs::write(&client_key_path, client_key.serialize_pem()).unwrap();
        std::fs::write(&server_cert, server.pem()).unwrap();
        std::fs::write(&server_key_path, server_key.serialize_pem()).unwrap();

        Self {
            dir,
            ca_cert,
            client_cert,
            client_key: client_key_path,
            server_cert,
            server_key: server_key_path,
        }
    }

    pub fn tls_config(&self) -> sensor_bridge::config::TlsConfig {
        sensor_bridge::config::TlsConfig {
            ca_cert: self.ca_cert.clone(),
            client_cert: self.client_cert.clone(),
            client_key: self.client_key.clone(),
            ..Default::default()
        }
    }
}
