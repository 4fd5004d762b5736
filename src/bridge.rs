//! # Bridge
//!
//! Wires the pieces together and runs the foreground half:
//!
//! ```text
//! serial reader (blocking thread) ──lines──► Foreground ──► registry.resolve ──► upload_telemetry
//!                                               │
//!                                               └─ poll sentinel ──► PollTrigger ──► Poller (task)
//! ```
//!
//! Startup order: data-dir lock, registry, cloud login, serial link, poller.
//! Any failure there aborts the process; once running, failures are logged and
//! the bridge keeps going.

use crate::cloud::thingsboard::ThingsBoardClient;
use crate::cloud::CloudApi;
use crate::config::Config;
use crate::link::protocol::{parse_inbound, InboundLine, Measurement, PendingMeasurement};
use crate::link::LineSink;
use crate::logutil::escape_log;
use crate::metrics;
use crate::poller::{PollTrigger, Poller};
use crate::registry::{DeviceRegistry, SharedRegistry};
use crate::storage::DataDirLock;
use anyhow::Result;
use log::{debug, info, trace, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// What the foreground did with one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Poll sentinel seen, poller signalled.
    Triggered,
    /// Field stored, triplet not complete yet.
    Accumulating,
    /// Complete triplet uploaded for this MAC.
    Uploaded(String),
    /// Line or triplet dropped (unrecognized, unparseable, provisioning or upload failure).
    Dropped,
}

/// Foreground line handler.
pub struct Foreground {
    sentinel: String,
    pending: PendingMeasurement,
    registry: SharedRegistry,
    cloud: Arc<dyn CloudApi>,
    trigger: Arc<PollTrigger>,
}

impl Foreground {
    pub fn new(
        sentinel: impl Into<String>,
        registry: SharedRegistry,
        cloud: Arc<dyn CloudApi>,
        trigger: Arc<PollTrigger>,
    ) -> Self {
        Self {
            sentinel: sentinel.into(),
            pending: PendingMeasurement::new(),
            registry,
            cloud,
            trigger,
        }
    }

    pub async fn handle_line(&mut self, line: &str) -> LineOutcome {
        let parsed = parse_inbound(line, &self.sentinel);
        match parsed {
            InboundLine::PollTrigger => {
                metrics::inc_triggers_received();
                debug!("Poll requested by gateway");
                self.trigger.fire();
                LineOutcome::Triggered
            }
            InboundLine::Unrecognized => {
                trace!("Discarding line: {}", escape_log(line));
                LineOutcome::Dropped
            }
            field => match self.pending.apply(&field) {
                Some(measurement) => self.upload(measurement).await,
                None => LineOutcome::Accumulating,
            },
        }
    }

    async fn upload(&self, measurement: Measurement) -> LineOutcome {
        let Some((data, battery)) = measurement.telemetry_values() else {
            warn!(
                "Dropping measurement from {}: non-numeric ID '{}' or battery '{}'",
                measurement.mac,
                escape_log(&measurement.raw_id),
                escape_log(&measurement.battery_percent)
            );
            return LineOutcome::Dropped;
        };

        let identity = {
            let mut registry = self.registry.lock().await;
            match registry.resolve(&measurement.mac, self.cloud.as_ref()).await {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Dropping measurement from {}: {}", measurement.mac, e);
                    return LineOutcome::Dropped;
                }
            }
        };

        match self
            .cloud
            .upload_telemetry(&identity.access_token, data, battery)
            .await
        {
            Ok(()) => {
                metrics::inc_measurements_uploaded();
                info!(
                    "Uploaded {} data={} battery={}%",
                    identity.display_name, data, battery
                );
                LineOutcome::Uploaded(identity.mac_address)
            }
            Err(e) => {
                metrics::inc_upload_failures();
                warn!("Telemetry upload for {} failed: {}", measurement.mac, e);
                LineOutcome::Dropped
            }
        }
    }
}

/// A fully assembled bridge minus its line source.
pub struct Bridge {
    config: Config,
    registry: SharedRegistry,
    cloud: Arc<dyn CloudApi>,
    sink: Arc<dyn LineSink>,
    trigger: Arc<PollTrigger>,
}

impl Bridge {
    pub fn new(
        config: Config,
        registry: SharedRegistry,
        cloud: Arc<dyn CloudApi>,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        Self {
            config,
            registry,
            cloud,
            sink,
            trigger: Arc::new(PollTrigger::new()),
        }
    }

    pub fn trigger(&self) -> Arc<PollTrigger> {
        Arc::clone(&self.trigger)
    }

    /// Run the poller in the background and handle `lines` in the foreground
    /// until the source closes or the process is interrupted.
    pub async fn serve(self, mut lines: mpsc::UnboundedReceiver<String>) -> Result<()> {
        let poller = Poller::new(
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.cloud),
            Arc::clone(&self.sink),
        );
        let poll_task = tokio::spawn(poller.run(Arc::clone(&self.trigger)));

        let mut foreground = Foreground::new(
            self.config.serial.poll_sentinel.clone(),
            self.registry,
            self.cloud,
            self.trigger,
        );

        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        foreground.handle_line(&line).await;
                    }
                    None => {
                        warn!("Gateway line source closed");
                        break;
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        poll_task.abort();
        Ok(())
    }
}

/// Start the bridge from configuration and run until shutdown.
pub async fn run(config: Config) -> Result<()> {
    let _lock = DataDirLock::acquire(Path::new(&config.storage.data_dir))?;

    let registry = DeviceRegistry::load(
        config.storage.device_map_path(),
        config.storage.counter_path(),
        &config.schedule.display_prefix,
    )?;
    let registry: SharedRegistry = Arc::new(Mutex::new(registry));

    let mut client = ThingsBoardClient::new(&config.cloud)?;
    client.login().await?;
    let cloud: Arc<dyn CloudApi> = Arc::new(client);

    serve_serial(config, registry, cloud).await
}

#[cfg(feature = "serial")]
async fn serve_serial(config: Config, registry: SharedRegistry, cloud: Arc<dyn CloudApi>) -> Result<()> {
    let serial = &config.serial;
    let (reader, writer) = crate::link::open(
        &serial.port,
        serial.baud_rate,
        serial.read_timeout_ms,
        serial.max_line_len,
    )?;
    let sink: Arc<dyn LineSink> = Arc::new(writer);

    let (tx, rx) = mpsc::unbounded_channel();
    let reader_task = tokio::task::spawn_blocking(move || reader.run(tx));

    info!("Bridge running on {}", serial.port);
    Bridge::new(config, registry, cloud, sink).serve(rx).await?;

    // The reader notices the closed channel on its next read timeout.
    match reader_task.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) => Err(anyhow::anyhow!("serial reader task failed: {}", e)),
    }
}

#[cfg(not(feature = "serial"))]
async fn serve_serial(_config: Config, _registry: SharedRegistry, _cloud: Arc<dyn CloudApi>) -> Result<()> {
    Err(crate::error::LinkError::Unsupported.into())
}
