// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS client context for the broker connection.
//!
//! Builds a rustls [`ClientConfig`] for mutually authenticated TLS:
//!
//! - the broker certificate must chain to the configured CA (no system roots,
//!   no "accept anything" verifier)
//! - the bridge presents its own certificate and private key
//! - the negotiated protocol version is pinned to a configurable minimum
//!
//! # Example
//!
//! ```ignore
//! use sensor_bridge::tls::{TlsContext, TlsVersion};
//!
//! let context = TlsContext::builder()
//!     .with_ca_file("certs/ca.crt")
//!     .with_cert_file("certs/client.crt")
//!     .with_key_file("certs/client.key")
//!     .with_min_version(TlsVersion::Tls12)
//!     .build()?;
//! ```

use crate::config::TlsConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// TLS configuration errors.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("No {0} configured")]
    Missing(&'static str),

    #[error("Failed to read {what} from {path}: {source}")]
    Read {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid PEM in {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: rustls::pki_types::pem::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(&'static str),

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsVersion {
    /// TLS 1.2
    #[default]
    Tls12,
    /// TLS 1.3
    Tls13,
}

static TLS12_AND_UP: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13, &rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

impl TlsVersion {
    /// Protocol versions allowed when this is the minimum.
    fn allowed(self) -> &'static [&'static SupportedProtocolVersion] {
        match self {
            TlsVersion::Tls12 => TLS12_AND_UP,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => f.write_str("TLS 1.2"),
            TlsVersion::Tls13 => f.write_str("TLS 1.3"),
        }
    }
}

/// Where a piece of PEM material comes from.
#[derive(Clone)]
enum PemSource {
    File(PathBuf),
    Memory(Vec<u8>),
}

impl PemSource {
    fn load(&self, what: &'static str) -> Result<Vec<u8>, TlsError> {
        match self {
            PemSource::File(path) => std::fs::read(path).map_err(|source| TlsError::Read {
                what,
                path: path.clone(),
                source,
            }),
            PemSource::Memory(data) => Ok(data.clone()),
        }
    }
}

/// Builder for [`TlsContext`].
///
/// All three inputs (CA, certificate, key) are mandatory. Files are only read
/// in [`build`](Self::build).
#[derive(Clone)]
pub struct TlsContextBuilder {
    ca: Option<PemSource>,
    cert_chain: Option<PemSource>,
    private_key: Option<PemSource>,
    min_protocol_version: TlsVersion,
}

impl Default for TlsContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsContextBuilder {
    /// Create an empty builder with a TLS 1.2 minimum.
    pub fn new() -> Self {
        Self {
            ca: None,
            cert_chain: None,
            private_key: None,
            min_protocol_version: TlsVersion::Tls12,
        }
    }

    /// CA certificate(s) used to verify the broker (PEM file).
    pub fn with_ca_file(mut self, path: impl AsRef<Path>) -> Self {
        self.ca = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// CA certificate(s) used to verify the broker (PEM data).
    pub fn with_ca_pem(mut self, pem_data: Vec<u8>) -> Self {
        self.ca = Some(PemSource::Memory(pem_data));
        self
    }

    /// Client certificate chain (PEM file).
    pub fn with_cert_file(mut self, path: impl AsRef<Path>) -> Self {
        self.cert_chain = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Client certificate chain (PEM data).
    pub fn with_cert_pem(mut self, pem_data: Vec<u8>) -> Self {
        self.cert_chain = Some(PemSource::Memory(pem_data));
        self
    }

    /// Client private key (PEM file).
    pub fn with_key_file(mut self, path: impl AsRef<Path>) -> Self {
        self.private_key = Some(PemSource::File(path.as_ref().to_path_buf()));
        self
    }

    /// Client private key (PEM data).
    pub fn with_key_pem(mut self, pem_data: Vec<u8>) -> Self {
        self.private_key = Some(PemSource::Memory(pem_data));
        self
    }

    /// Set minimum TLS version.
    pub fn with_min_version(mut self, version: TlsVersion) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Build the TLS context.
    pub fn build(self) -> Result<TlsContext, TlsError> {
        let ca_pem = self
            .ca
            .as_ref()
            .ok_or(TlsError::Missing("CA certificate"))?
            .load("CA certificate")?;
        let cert_pem = self
            .cert_chain
            .as_ref()
            .ok_or(TlsError::Missing("client certificate"))?
            .load("client certificate")?;
        let key_pem = self
            .private_key
            .as_ref()
            .ok_or(TlsError::Missing("private key"))?
            .load("private key")?;

        let mut root_store = RootCertStore::empty();
        for cert in parse_certs(&ca_pem, "CA certificate")? {
            root_store.add(cert)?;
        }

        let certs = parse_certs(&cert_pem, "client certificate")?;
        let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|source| TlsError::Pem {
            what: "private key",
            source,
        })?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(self.min_protocol_version.allowed())?
            .with_root_certificates(root_store)
            .with_client_auth_cert(certs, key)?;

        Ok(TlsContext {
            client_config: Arc::new(config),
            min_protocol_version: self.min_protocol_version,
        })
    }
}

fn parse_certs(pem: &[u8], what: &'static str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Pem { what, source })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(what));
    }
    Ok(certs)
}

/// A ready-to-use TLS client context. Immutable and cheap to clone.
#[derive(Clone)]
pub struct TlsContext {
    client_config: Arc<ClientConfig>,
    min_protocol_version: TlsVersion,
}

impl TlsContext {
    /// Create a builder.
    pub fn builder() -> TlsContextBuilder {
        TlsContextBuilder::new()
    }

    /// Build a context from the `[tls]` configuration section.
    pub fn from_config(config: &TlsConfig) -> Result<Self, TlsError> {
        Self::builder()
            .with_ca_file(&config.ca_cert)
            .with_cert_file(&config.client_cert)
            .with_key_file(&config.client_key)
            .with_min_version(config.min_version)
            .build()
    }

    /// The rustls configuration handed to the MQTT transport.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// Whether the broker certificate is verified against the CA.
    ///
    /// The builder only ever installs the webpki verifier, so this is always true.
    pub fn verifies_peer(&self) -> bool {
        true
    }

    /// Whether a client certificate is presented during the handshake.
    pub fn presents_client_cert(&self) -> bool {
        self.client_config.client_auth_cert_resolver.has_certs()
    }

    /// Minimum negotiated protocol version.
    pub fn min_version(&self) -> TlsVersion {
        self.min_protocol_version
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("min_protocol_version", &self.min_protocol_version)
            .field("presents_client_cert", &self.presents_client_cert())
            .finish()
    }
}
