//! Bridge lifecycle: startup, external writes and shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use warp_bridge_common::PropertyValue;

use crate::bus::{PropertyBus, WriteRequest, publish_all};
use crate::client::{DeviceApi, DeviceIdentity};
use crate::config::WarpConfig;
use crate::error::{BridgeError, Result};
use crate::model::{PublishedModel, PublishedProperty, TextFormat, paths};
use crate::poller::{PollScheduler, SchedulerHandle};

/// Product id published on `/ProductId`.
pub const PRODUCT_ID: i64 = 0xFFFF;

/// A configured bridge that has not started yet.
pub struct BridgeService<D, B> {
    config: WarpConfig,
    device: Arc<D>,
    bus: Arc<B>,
    model: PublishedModel,
}

impl<D: DeviceApi, B: PropertyBus> BridgeService<D, B> {
    /// Create a service with a model that accepts every write.
    pub fn new(config: WarpConfig, device: Arc<D>, bus: Arc<B>) -> Self {
        Self::with_model(config, device, bus, PublishedModel::new())
    }

    /// Create a service around a prepared model, e.g. one with a custom
    /// write policy.
    pub fn with_model(
        config: WarpConfig,
        device: Arc<D>,
        bus: Arc<B>,
        model: PublishedModel,
    ) -> Self {
        Self {
            config,
            device,
            bus,
            model,
        }
    }

    /// Start the bridge.
    ///
    /// Validates the configuration, fetches the device identity,
    /// registers on the bus, declares and publishes every property and
    /// starts the timers. Any failure here is fatal.
    pub async fn start(self) -> Result<RunningBridge<B>> {
        let Self {
            config,
            device,
            bus,
            mut model,
        } = self;

        config.validate()?;
        let settings = config.poll_settings()?;
        let service_name = config.device_service_name();

        let identity = device.fetch_identity().await?;
        info!(
            name = %identity.name,
            firmware = identity.firmware_version,
            hardware = identity.hardware_config_code,
            "Device identified"
        );

        let metadata = serde_json::json!({
            "host": config.host,
            "device_name": identity.name,
            "firmware_version": identity.firmware_version,
            "poll_interval_ms": config.poll_interval_ms,
        });
        bus.register(&service_name, metadata).await?;

        if let Err(e) = declare_properties(&mut model, &config, &identity) {
            if let Err(unregister) = bus.unregister().await {
                warn!(error = %unregister, "Failed to unregister after startup error");
            }
            return Err(e);
        }

        let stats = publish_all(bus.as_ref(), &model.snapshot()).await;
        info!(
            service = %service_name,
            properties = model.len(),
            published = stats.success,
            failed = stats.failed,
            "Properties declared"
        );

        let model = Arc::new(RwLock::new(model));
        let timers = PollScheduler::new(device, bus.clone(), model.clone(), settings).spawn();

        Ok(RunningBridge {
            service_name,
            identity,
            bus,
            model,
            timers,
        })
    }
}

/// Declare every property the bridge publishes, in publishing order.
pub fn declare_properties(
    model: &mut PublishedModel,
    config: &WarpConfig,
    identity: &DeviceIdentity,
) -> Result<()> {
    let custom_name = if config.custom_name.is_empty() {
        &config.product_name
    } else {
        &config.custom_name
    };

    let read_only: [(&str, PropertyValue); 12] = [
        (paths::PROCESS_NAME, env!("CARGO_PKG_NAME").into()),
        (paths::PROCESS_VERSION, env!("CARGO_PKG_VERSION").into()),
        (paths::CONNECTION, config.connection.as_str().into()),
        (paths::DEVICE_INSTANCE, config.device_instance.into()),
        (paths::PRODUCT_ID, PRODUCT_ID.into()),
        (paths::PRODUCT_NAME, config.product_name.as_str().into()),
        (paths::CUSTOM_NAME, custom_name.as_str().into()),
        (paths::SERIAL, identity.name.as_str().into()),
        (paths::FIRMWARE_VERSION, identity.firmware_version.into()),
        (paths::HARDWARE_VERSION, identity.hardware_config_code.into()),
        (paths::CONNECTED, 1i64.into()),
        (paths::UPDATE_INDEX, 0i64.into()),
    ];
    for (path, initial) in read_only {
        model.declare(path, initial, false, TextFormat::Plain)?;
    }

    model.declare(paths::STATUS, PropertyValue::Null, false, TextFormat::Plain)?;
    model.declare(paths::MODE, PropertyValue::Null, false, TextFormat::Plain)?;
    if config.publish_position {
        let position = config.position()?;
        model.declare(paths::POSITION, position.code(), false, TextFormat::Plain)?;
    }

    let telemetry = [
        (paths::AC_POWER, false, TextFormat::Watts),
        (paths::AC_L1_POWER, false, TextFormat::Watts),
        (paths::AC_L2_POWER, false, TextFormat::Watts),
        (paths::AC_L3_POWER, false, TextFormat::Watts),
        (paths::AC_ENERGY_FORWARD, false, TextFormat::KiloWattHours),
        (paths::CHARGING_TIME, false, TextFormat::Seconds),
        (paths::AC_VOLTAGE, false, TextFormat::Volts),
        (paths::CURRENT, false, TextFormat::Amps),
        (paths::SET_CURRENT, true, TextFormat::Amps),
        (paths::MAX_CURRENT, false, TextFormat::Amps),
        (paths::MCU_TEMPERATURE, false, TextFormat::Celsius),
        (paths::START_STOP, true, TextFormat::Plain),
    ];
    for (path, writable, format) in telemetry {
        model.declare(path, 0i64, writable, format)?;
    }

    Ok(())
}

/// A started bridge.
pub struct RunningBridge<B> {
    service_name: String,
    identity: DeviceIdentity,
    bus: Arc<B>,
    model: Arc<RwLock<PublishedModel>>,
    timers: SchedulerHandle,
}

impl<B: PropertyBus> RunningBridge<B> {
    /// Service name the bridge registered under.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Identity fetched at startup.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The published model.
    pub fn model(&self) -> &Arc<RwLock<PublishedModel>> {
        &self.model
    }

    /// Apply a write from an external bus actor.
    ///
    /// Returns whether the write was accepted. Accepted values are
    /// published back on the bus.
    pub async fn handle_write(&self, request: WriteRequest) -> bool {
        let update = {
            let mut model = self.model.write().await;
            match model.on_external_write(&request.path, request.value.clone()) {
                Ok(true) => model.property(&request.path).map(PublishedProperty::to_update),
                Ok(false) => {
                    warn!(path = %request.path, value = ?request.value, "Write rejected");
                    return false;
                }
                Err(e) => {
                    warn!(path = %request.path, error = %e, "Write rejected");
                    return false;
                }
            }
        };

        if let Some(update) = update {
            info!(path = %update.path, value = %update.text, "Write accepted");
            if let Err(e) = self.bus.publish(&update).await {
                warn!(path = %update.path, error = %e, "Failed to publish written value");
            }
        }

        true
    }

    /// Serve write requests until `shutdown` resolves, then shut down.
    ///
    /// When the write channel closes the bridge keeps polling until
    /// `shutdown` resolves.
    pub async fn run(
        self,
        mut writes: mpsc::Receiver<WriteRequest>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);
        let mut writes_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                request = writes.recv(), if writes_open => match request {
                    Some(request) => {
                        self.handle_write(request).await;
                    }
                    None => writes_open = false,
                },
            }
        }

        self.shutdown().await
    }

    /// Stop the timers, then release the bus registration.
    pub async fn shutdown(self) -> Result<()> {
        info!(service = %self.service_name, "Shutting down");

        self.timers.stop().await;

        self.bus
            .unregister()
            .await
            .map_err(|e| BridgeError::bus(format!("Failed to unregister: {}", e)))
    }
}
