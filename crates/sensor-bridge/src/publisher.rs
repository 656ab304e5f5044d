// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic sensor-data publisher.
//!
//! Companion to the bridge for local testing: publishes a fixed JSON payload
//! to the bridge topic at a fixed interval over the same mutual-TLS setup.

use crate::config::{is_valid_topic_name, BridgeConfig, ConfigError};
use crate::session::{flush_disconnect, mqtt_options, Backoff, SessionError};
use crate::tls::TlsContext;
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Publisher counters.
#[derive(Debug, Default)]
pub struct PublisherStats {
    /// PUBLISH packets handed to the client.
    pub published: AtomicU64,
    /// PUBACK/PUBCOMP received.
    pub acknowledged: AtomicU64,
    /// Ticks skipped while disconnected or with a full request queue.
    pub skipped: AtomicU64,
}

impl PublisherStats {
    pub fn snapshot(&self) -> PublisherStatsSnapshot {
        PublisherStatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStatsSnapshot {
    pub published: u64,
    pub acknowledged: u64,
    pub skipped: u64,
}

/// Publishes the configured payload every `interval`.
pub struct Publisher {
    client: AsyncClient,
    eventloop: EventLoop,
    broker: String,
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    interval: Duration,
    backoff: Backoff,
    stats: Arc<PublisherStats>,
}

impl Publisher {
    pub fn new(config: &BridgeConfig, tls: &TlsContext) -> Result<Self, SessionError> {
        let broker = &config.broker;
        let publisher = &config.publisher;

        if !is_valid_topic_name(&broker.topic) {
            return Err(ConfigError::Invalid(format!(
                "Cannot publish to topic filter {:?}",
                broker.topic
            ))
            .into());
        }
        if publisher.interval_secs == 0 {
            return Err(ConfigError::Invalid("publisher.interval_secs must be non-zero".into()).into());
        }

        let options = mqtt_options(
            &publisher.client_id,
            &broker.host,
            broker.port,
            Duration::from_secs(publisher.keep_alive_secs),
            tls,
        );
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            eventloop,
            broker: format!("{}:{}", broker.host, broker.port),
            topic: broker.topic.clone(),
            payload: publisher.payload.clone().into_bytes(),
            qos: publisher.qos()?,
            interval: Duration::from_secs(publisher.interval_secs),
            backoff: Backoff::from_config(&config.reconnect),
            stats: Arc::new(PublisherStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<PublisherStats> {
        Arc::clone(&self.stats)
    }

    /// Publish until `shutdown` resolves.
    ///
    /// The first message goes out on CONNACK; later ones follow every
    /// `interval` from there.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), SessionError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connected = false;
        let mut connected_once = false;

        info!(
            broker = %self.broker,
            topic = %self.topic,
            interval_secs = self.interval.as_secs(),
            "publisher starting"
        );

        loop {
            let event = tokio::select! {
                biased;
                () = &mut shutdown => break,
                _ = ticker.tick() => {
                    if connected {
                        self.publish_once();
                    } else {
                        debug!("not connected, skipping publish");
                        self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    continue;
                }
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(broker = %self.broker, "publisher connected");
                    connected = true;
                    connected_once = true;
                    self.backoff.reset();
                    self.publish_once();
                    ticker.reset();
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                    info!(pkid = ack.pkid, "publish acknowledged");
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                    info!(pkid = comp.pkid, "publish completed");
                }
                Ok(_) => {}
                Err(e) => {
                    connected = false;
                    if !connected_once {
                        return Err(SessionError::Connect {
                            broker: self.broker.clone(),
                            source: e,
                        });
                    }
                    let Some(delay) = self.backoff.next_delay() else {
                        return Err(SessionError::ReconnectExhausted {
                            broker: self.broker.clone(),
                            attempts: self.backoff.attempts(),
                            last_error: e.to_string(),
                        });
                    };
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "publisher disconnected, reconnecting");

                    tokio::select! {
                        biased;
                        () = &mut shutdown => {
                            info!("shutdown requested while disconnected");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("publisher stopping");
        if connected {
            self.client.disconnect().await?;
            flush_disconnect(&mut self.eventloop).await;
        }
        Ok(())
    }

    fn publish_once(&self) {
        match self
            .client
            .try_publish(self.topic.as_str(), self.qos, false, self.payload.clone())
        {
            Ok(()) => {
                let count = self.stats.published.fetch_add(1, Ordering::Relaxed) + 1;
                info!(topic = %self.topic, count, "published");
            }
            Err(e) => {
                warn!(error = %e, "publish request dropped");
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
