//! # SIP Validator
//!
//! Entry point for the validation relay.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging
//! 2. Load and validate configuration (from env)
//! 3. Build the in-memory bus and the validator
//! 4. Probe the runtime the validator depends on (fatal if missing)
//! 5. Run the listener until Ctrl+C

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use shared_bus::{shutdown_channel, DeadLetterPolicy, InMemoryBus};
use validator_runtime::{
    init_logging, CommandProbe, CommandValidator, EventListener, RuntimeConfig, TelemetryConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&TelemetryConfig::from_env()).context("Failed to initialize logging")?;

    let config = RuntimeConfig::from_env();
    config.validate().context("Invalid configuration")?;

    info!("===========================================");
    info!("  SIP Validator v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(
        consumer_topic = %config.bus.consumer_topic,
        producer_topic = %config.bus.producer_topic,
        redelivery_delay_ms = config.bus.redelivery_delay_ms,
        max_redeliveries = config.bus.max_redeliveries,
        "Using in-memory bus (broker settings unused)"
    );

    let bus = Arc::new(
        InMemoryBus::new(config.bus.consumer_topic.clone())
            .with_redelivery_delay(config.bus.redelivery_delay())
            .with_dead_letter(DeadLetterPolicy {
                max_redeliveries: config.bus.max_redeliveries,
            }),
    );
    let validator = CommandValidator::new(&config.validator.command)
        .context("Invalid validator command")?;
    let probe = CommandProbe::new(config.probe.command.clone());

    let mut listener = EventListener::new(&config, bus, validator);
    listener
        .start(&probe)
        .await
        .context("Startup precondition failed")?;

    let (trigger, signal) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        trigger.trigger();
    });

    info!("Listening. Press Ctrl+C to stop.");
    let stats = listener.run(signal).await;
    info!(
        received = stats.received,
        published = stats.published,
        "Shutdown complete"
    );

    Ok(())
}
