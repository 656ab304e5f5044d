// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor Bridge CLI
//!
//! Forwards MQTT sensor messages to a serverless function.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: localhost:8883, sensor/data -> iot_processor on LocalStack
//! sensor-bridge
//!
//! # Using configuration file
//! sensor-bridge --config bridge.toml
//!
//! # Override broker and function
//! sensor-bridge --broker-host mqtt.local --function my_processor
//!
//! # Run the demo publisher against the same broker
//! sensor-bridge --config bridge.toml publish
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_bridge::{
    Bridge, BridgeConfig, BridgeStats, LambdaInvoker, Publisher, Session, TlsContext,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sensor Bridge
#[derive(Parser, Debug)]
#[command(name = "sensor-bridge")]
#[command(author = "naskel.com")]
#[command(about = "Sensor Bridge - forwards MQTT messages to a serverless function over mutual TLS")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker host
    #[arg(long)]
    broker_host: Option<String>,

    /// Broker port
    #[arg(long)]
    broker_port: Option<u16>,

    /// Topic to subscribe (or publish to)
    #[arg(short, long)]
    topic: Option<String>,

    /// Function to invoke
    #[arg(short, long)]
    function: Option<String>,

    /// Function service endpoint URL
    #[arg(long)]
    endpoint_url: Option<String>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "bridge.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Publish sensor data periodically (demo publisher)
    Publish,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Commands::GenConfig { ref output }) => return cmd_gen_config(output),
        Some(Commands::Validate { ref config }) => return cmd_validate(config),
        _ => {}
    }

    let config = build_config(&args)?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let tls = TlsContext::from_config(&config.tls).context("Failed to build TLS context")?;

    if matches!(args.command, Some(Commands::Publish)) {
        return run_publisher(&config, &tls).await;
    }

    println!("Sensor Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!(
        "Broker:   {}:{} ({})",
        config.broker.host,
        config.broker.port,
        tls.min_version()
    );
    println!("Topic:    {}", config.broker.topic);
    println!(
        "Function: {} @ {}",
        config.function.name,
        config.function.endpoint_url.as_deref().unwrap_or("regional endpoint")
    );
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let invoker = LambdaInvoker::new(&config.function);
    let bridge = Bridge::from_config(&config.function, invoker);
    let stats = bridge.stats();

    let mut session =
        Session::new(&config, &tls, bridge).context("Failed to create MQTT session")?;

    if config.stats_interval_secs > 0 {
        let stats = Arc::clone(&stats);
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                print_stats(&stats);
            }
        });
    }

    let result = session.run(shutdown_signal()).await;

    println!("\nFinal Statistics:");
    print_stats(&stats);

    result.context("Bridge stopped")?;
    info!("bridge stopped");
    Ok(())
}

async fn run_publisher(config: &BridgeConfig, tls: &TlsContext) -> Result<()> {
    let mut publisher = Publisher::new(config, tls).context("Failed to create publisher")?;
    let stats = publisher.stats();

    println!(
        "Publishing to {} on {}:{} every {}s (Ctrl+C to stop)",
        config.broker.topic, config.broker.host, config.broker.port, config.publisher.interval_secs
    );

    let result = publisher.run(shutdown_signal()).await;

    let snapshot = stats.snapshot();
    println!(
        "\nPublished {} messages, {} acknowledged, {} skipped",
        snapshot.published, snapshot.acknowledged, snapshot.skipped
    );
    result.context("Publisher stopped")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}

fn build_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => BridgeConfig::default(),
    };

    if let Some(ref host) = args.broker_host {
        config.broker.host = host.clone();
    }
    if let Some(port) = args.broker_port {
        config.broker.port = port;
    }
    if let Some(ref topic) = args.topic {
        config.broker.topic = topic.clone();
    }
    if let Some(ref function) = args.function {
        config.function.name = function.clone();
    }
    if let Some(ref url) = args.endpoint_url {
        config.function.endpoint_url = (!url.trim().is_empty()).then(|| url.clone());
    }
    if let Some(interval) = args.stats_interval {
        config.stats_interval_secs = interval;
    }
    if let Some(ref level) = args.log_level {
        config.log_level = level.clone();
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let config = BridgeConfig {
        stats_interval_secs: 10,
        ..BridgeConfig::default()
    };

    let toml_str = config.to_toml()?;

    let content = format!(
        r#"# Sensor Bridge Configuration
# Generated by sensor-bridge gen-config
#
# Relative TLS paths are resolved against this file's directory.
# function.timeout_secs = 0 waits indefinitely; reconnect.max_attempts = 0 retries forever.
# function.endpoint_url = "" uses the regional endpoint instead of LocalStack.

{}
"#,
        toml_str
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    match BridgeConfig::from_file(config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Broker:   {}:{} (client id {}, keepalive {}s)",
                config.broker.host,
                config.broker.port,
                config.broker.client_id,
                config.broker.keep_alive_secs
            );
            println!("Topic:    {} (QoS {})", config.broker.topic, config.broker.qos);
            println!(
                "Function: {} @ {}",
                config.function.name,
                config.function.endpoint_url.as_deref().unwrap_or("regional endpoint")
            );
            println!(
                "TLS:      ca={} cert={} key={} min={}",
                config.tls.ca_cert.display(),
                config.tls.client_cert.display(),
                config.tls.client_key.display(),
                config.tls.min_version
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &BridgeStats) {
    let stat = stats.snapshot();
    println!("--- Bridge Statistics ---");
    println!(
        "  {} received ({:.1} msg/s), {} acknowledged, {} failed, {} skipped, {}",
        stat.received,
        stat.messages_per_second(),
        stat.acknowledged,
        stat.failed,
        stat.skipped,
        format_bytes(stat.bytes)
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
