// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scripted MQTT 3.1.1 broker over mutual TLS.
//!
//! Serves one connection per [`Visit`], in order, on a blocking thread. The
//! listener is closed once the last visit is accepted, so later reconnects
//! are refused.

use super::TestPki;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, ServerConnection, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

const SUBACK_FAILURE: u8 = 0x80;

/// When the broker hangs up on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Close {
    /// On the first packet the client sends after CONNACK.
    AfterConnAck,
    AfterPublish,
    #[default]
    Never,
}

/// Script for one accepted connection.
#[derive(Debug, Clone, Default)]
pub struct Visit {
    /// Sent as QoS 0 PUBLISH right after a granted SUBACK.
    pub publish: Vec<Vec<u8>>,
    pub reject_subscribe: bool,
    pub close: Close,
}

impl Visit {
    pub fn hold_open() -> Self {
        Self::default()
    }

    pub fn close_after_connack() -> Self {
        Self {
            close: Close::AfterConnAck,
            ..Self::default()
        }
    }

    pub fn publish(payloads: &[&[u8]]) -> Self {
        Self {
            publish: payloads.iter().map(|p| p.to_vec()).collect(),
            ..Self::default()
        }
    }

    pub fn then_close(mut self) -> Self {
        self.close = Close::AfterPublish;
        self
    }

    pub fn reject_subscribe() -> Self {
        Self {
            reject_subscribe: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicUsize,
    subscribes: AtomicUsize,
    publishes: AtomicUsize,
    disconnects: AtomicUsize,
    closed: AtomicUsize,
}

pub struct FakeBroker {
    port: u16,
    counters: Arc<Counters>,
}

impl FakeBroker {
    pub fn start(pki: &TestPki, visits: Vec<Visit>) -> Self {
        let config = server_config(pki);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let counters = Arc::new(Counters::default());

        let shared = Arc::clone(&counters);
        thread::spawn(move || {
            let mut listener = Some(listener);
            let last = visits.len().saturating_sub(1);
            for (index, visit) in visits.into_iter().enumerate() {
                let Some(accepting) = listener.as_ref() else {
                    return;
                };
                let Ok((tcp, _)) = accepting.accept() else {
                    return;
                };
                if index == last {
                    listener = None;
                }
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let _ = serve(tcp, &config, &visit, &shared);
                shared.closed.fetch_add(1, Ordering::SeqCst);
            }
        });

        Self { port, counters }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// SUBSCRIBE packets received across all connections.
    pub fn subscribes(&self) -> usize {
        self.counters.subscribes.load(Ordering::SeqCst)
    }

    /// PUBLISH packets received from clients.
    pub fn publishes(&self) -> usize {
        self.counters.publishes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.counters.disconnects.load(Ordering::SeqCst)
    }

    /// Connections the broker has finished with.
    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }
}

fn server_config(pki: &TestPki) -> Arc<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_file_iter(&pki.ca_cert).unwrap() {
        roots.add(cert.unwrap()).unwrap();
    }
    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .unwrap();

    let certs = CertificateDer::pem_file_iter(&pki.server_cert)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = PrivateKeyDer::from_pem_file(&pki.server_key).unwrap();

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .unwrap();
    Arc::new(config)
}

fn serve(
    tcp: TcpStream,
    config: &Arc<ServerConfig>,
    visit: &Visit,
    counters: &Counters,
) -> io::Result<()> {
    tcp.set_read_timeout(Some(Duration::from_secs(10)))?;
    let conn = ServerConnection::new(Arc::clone(config)).map_err(io::Error::other)?;
    let mut tls = StreamOwned::new(conn, tcp);

    let mut acked = false;
    while let Ok((header, body)) = read_packet(&mut tls) {
        if acked && visit.close == Close::AfterConnAck {
            break;
        }
        match header >> 4 {
            CONNECT => {
                send(&mut tls, &[0x20, 0x02, 0x00, 0x00])?;
                acked = true;
            }
            SUBSCRIBE => {
                counters.subscribes.fetch_add(1, Ordering::SeqCst);
                let code = if visit.reject_subscribe { SUBACK_FAILURE } else { 0x00 };
                send(&mut tls, &[0x90, 0x03, body[0], body[1], code])?;
                if visit.reject_subscribe {
                    continue;
                }

                let filter_len = u16::from_be_bytes([body[2], body[3]]) as usize;
                let topic = &body[4..4 + filter_len];
                for payload in &visit.publish {
                    send(&mut tls, &publish_packet(topic, payload))?;
                }
                if visit.close == Close::AfterPublish {
                    break;
                }
            }
            PUBLISH => {
                counters.publishes.fetch_add(1, Ordering::SeqCst);
                let qos = (header >> 1) & 0x03;
                if qos > 0 {
                    let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                    let pid = &body[2 + topic_len..4 + topic_len];
                    send(&mut tls, &[0x40, 0x02, pid[0], pid[1]])?;
                }
            }
            PINGREQ => send(&mut tls, &[0xD0, 0x00])?,
            DISCONNECT => {
                counters.disconnects.fetch_add(1, Ordering::SeqCst);
                break;
            }
            _ => {}
        }
    }

    tls.conn.send_close_notify();
    tls.flush()
}

fn send(tls: &mut StreamOwned<ServerConnection, TcpStream>, packet: &[u8]) -> io::Result<()> {
    tls.write_all(packet)?;
    tls.flush()
}

fn read_packet(stream: &mut impl Read) -> io::Result<(u8, Vec<u8>)> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte)?;
    let header = byte[0];

    let mut len = 0usize;
    let mut shift = 0;
    loop {
        stream.read_exact(&mut byte)?;
        len |= ((byte[0] & 0x7F) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    Ok((header, body))
}

fn publish_packet(topic: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic);
    body.extend_from_slice(payload);

    let mut packet = vec![0x30];
    let mut len = body.len();
    loop {
        let mut byte = (len & 0x7F) as u8;
        len >>= 7;
        if len > 0 {
            byte |= 0x80;
        }
        packet.push(byte);
        if len == 0 {
            break;
        }
    }
    packet.extend_from_slice(&body);
    packet
}
