// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broker connection lifecycle.
//!
//! A [`Session`] owns the MQTT event loop. It connects over mutual TLS,
//! subscribes on every CONNACK, hands each PUBLISH to the [`Bridge`] and waits
//! for the invocation to finish before polling again. Connection loss after
//! the first CONNACK is retried with exponential backoff; failure to connect
//! at startup is fatal.

use crate::bridge::Bridge;
use crate::config::{BridgeConfig, ConfigError, ReconnectConfig};
use crate::invoke::FunctionInvoker;
use crate::tls::TlsContext;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long to keep polling after DISCONNECT has been queued.
pub(crate) const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to connect to {broker}: {source}")]
    Connect {
        broker: String,
        #[source]
        source: ConnectionError,
    },

    #[error("Gave up reconnecting to {broker} after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        broker: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Broker rejected subscription to {topic}")]
    SubscribeRejected { topic: String },

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Subscribing,
    Receiving,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Subscribing => "subscribing",
            LinkState::Receiving => "receiving",
        };
        f.write_str(name)
    }
}

/// MQTT options for a clean-session client over mutual TLS.
pub fn mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    keep_alive: Duration,
    tls: &TlsContext,
) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(keep_alive);
    options.set_clean_session(true);
    options.set_transport(Transport::Tls(TlsConfiguration::Rustls(tls.client_config())));
    options
}

/// Poll until a queued DISCONNECT has been written, at most [`DISCONNECT_GRACE`].
pub(crate) async fn flush_disconnect(eventloop: &mut EventLoop) {
    let flush = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
        warn!(grace_ms = DISCONNECT_GRACE.as_millis() as u64, "disconnect not flushed in time");
    }
}

/// Exponential reconnect delay with an attempt budget.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempts: u32,
    next: Duration,
}

impl Backoff {
    /// `max_attempts == 0` never gives up.
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempts: 0,
            next: initial,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Delay before the next attempt, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        Some(delay)
    }

    /// Attempts consumed since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next = self.initial;
    }
}

/// Subscriber session feeding a [`Bridge`].
pub struct Session<I> {
    client: AsyncClient,
    eventloop: EventLoop,
    bridge: Bridge<I>,
    broker: String,
    topic: String,
    qos: QoS,
    backoff: Backoff,
    state: LinkState,
}

impl<I: FunctionInvoker> Session<I> {
    /// Prepare a session. Nothing is sent until [`run`](Self::run).
    pub fn new(
        config: &BridgeConfig,
        tls: &TlsContext,
        bridge: Bridge<I>,
    ) -> Result<Self, SessionError> {
        let broker = &config.broker;
        let options = mqtt_options(
            &broker.client_id,
            &broker.host,
            broker.port,
            broker.keep_alive(),
            tls,
        );
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            eventloop,
            bridge,
            broker: format!("{}:{}", broker.host, broker.port),
            topic: broker.topic.clone(),
            qos: broker.qos()?,
            backoff: Backoff::from_config(&config.reconnect),
            state: LinkState::Disconnected,
        })
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn bridge(&self) -> &Bridge<I> {
        &self.bridge
    }

    /// Run until `shutdown` resolves or the connection cannot be recovered.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut connected_once = false;

        info!(broker = %self.broker, topic = %self.topic, "connecting");
        self.set_state(LinkState::Connecting);

        loop {
            let event = tokio::select! {
                biased;
                () = &mut shutdown => return self.disconnect().await,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(broker = %self.broker, session_present = ack.session_present, "connected");
                    connected_once = true;
                    self.backoff.reset();
                    self.set_state(LinkState::Subscribing);
                    self.client.subscribe(self.topic.as_str(), self.qos).await?;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    if ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(SessionError::SubscribeRejected {
                            topic: self.topic.clone(),
                        });
                    }
                    self.set_state(LinkState::Receiving);
                    info!(topic = %self.topic, "listening");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.bridge.on_message(&publish.topic, publish.payload).await;
                }
                Ok(Event::Incoming(packet)) => {
                    debug!(?packet, "incoming");
                }
                Ok(Event::Outgoing(outgoing)) => {
                    debug!(?outgoing, "outgoing");
                }
                Err(e) => {
                    self.set_state(LinkState::Disconnected);
                    if !connected_once {
                        return Err(SessionError::Connect {
                            broker: self.broker.clone(),
                            source: e,
                        });
                    }

                    let Some(delay) = self.backoff.next_delay() else {
                        error!(broker = %self.broker, error = %e, "reconnect attempts exhausted");
                        return Err(SessionError::ReconnectExhausted {
                            broker: self.broker.clone(),
                            attempts: self.backoff.attempts(),
                            last_error: e.to_string(),
                        });
                    };

                    warn!(
                        broker = %self.broker,
                        error = %e,
                        attempt = self.backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "connection lost, reconnecting"
                    );

                    tokio::select! {
                        biased;
                        () = &mut shutdown => {
                            info!("shutdown requested while disconnected");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.set_state(LinkState::Connecting);
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        info!(broker = %self.broker, "disconnecting");

        if self.state != LinkState::Disconnected {
            self.client.disconnect().await?;
            flush_disconnect(&mut self.eventloop).await;
        }

        self.set_state(LinkState::Disconnected);
        Ok(())
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "link state");
            self.state = state;
        }
    }
}
