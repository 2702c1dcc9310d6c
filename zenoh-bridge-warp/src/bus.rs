//! The publish/subscribe bus the bridge exposes its properties on.
//!
//! [`PropertyBus`] is the seam between the bridge and the transport.
//! [`ZenohBus`] publishes over a Zenoh session; [`MemoryBus`] keeps
//! everything in process and is what the tests drive.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::liveliness::LivelinessToken;

use warp_bridge_common::{Format, KeyExprBuilder, PropertyUpdate, PropertyValue, decode, encode};

use crate::error::{BridgeError, Result};
use crate::status::BridgeStatus;

/// A bus collaborator the bridge registers on and publishes to.
pub trait PropertyBus: Send + Sync + 'static {
    /// Register the bridge under a service name.
    fn register(
        &self,
        service_name: &str,
        metadata: serde_json::Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Publish a property value.
    fn publish(&self, update: &PropertyUpdate) -> impl Future<Output = Result<()>> + Send;

    /// Release the registration. A no-op when not registered.
    fn unregister(&self) -> impl Future<Output = Result<()>> + Send;
}

/// A value an external actor wants to write to a property.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Property path.
    pub path: String,
    /// Requested value.
    pub value: PropertyValue,
}

impl WriteRequest {
    /// Create a write request.
    pub fn new(path: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Statistics from a batch publish operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of successfully published updates.
    pub success: usize,
    /// Number of failed publishes.
    pub failed: usize,
}

impl PublishStats {
    /// Total number of attempted publishes.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

/// Publish a batch of updates, logging failures instead of stopping.
pub async fn publish_all<B: PropertyBus>(bus: &B, updates: &[PropertyUpdate]) -> PublishStats {
    let mut stats = PublishStats::default();

    for update in updates {
        match bus.publish(update).await {
            Ok(()) => stats.success += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(path = %update.path, error = %e, "Failed to publish property");
            }
        }
    }

    stats
}

struct Registration {
    service: String,
    /// Dropping the token undeclares it.
    _token: LivelinessToken,
}

/// Bus backed by a Zenoh session.
///
/// Properties are published on `<prefix>/<path>`, the bridge status on
/// `<prefix>/@/status` and presence as a liveliness token on
/// `<prefix>/@/alive`.
pub struct ZenohBus {
    session: Arc<Session>,
    keys: KeyExprBuilder,
    format: Format,
    registration: tokio::sync::Mutex<Option<Registration>>,
}

impl std::fmt::Debug for ZenohBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZenohBus")
            .field("prefix", &self.keys.prefix())
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl ZenohBus {
    /// Create a bus publishing under `key_prefix`.
    pub fn new(session: Arc<Session>, key_prefix: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::new(key_prefix),
            format,
            registration: tokio::sync::Mutex::new(None),
        }
    }

    /// Key expression builder for this bridge.
    pub fn keys(&self) -> &KeyExprBuilder {
        &self.keys
    }

    /// Subscribe to write requests and forward them to `tx`.
    ///
    /// Writers put a JSON scalar on `<prefix>/@/write/<path>`. Payloads
    /// that do not decode are logged and dropped. The task ends when the
    /// receiving side of `tx` is closed.
    pub async fn listen_for_writes(
        &self,
        tx: mpsc::Sender<WriteRequest>,
    ) -> Result<JoinHandle<()>> {
        let key_expr = self.keys.write_wildcard();
        let subscriber = self
            .session
            .declare_subscriber(&key_expr)
            .await
            .map_err(|e| BridgeError::bus(format!("Failed to subscribe to {}: {}", key_expr, e)))?;

        info!(key = %key_expr, "Listening for property writes");

        let keys = self.keys.clone();
        Ok(tokio::spawn(async move {
            while let Ok(sample) = subscriber.recv_async().await {
                let key = sample.key_expr().as_str().to_string();
                let Some(path) = keys.parse_write_key(&key) else {
                    continue;
                };

                let payload = sample.payload().to_bytes();
                let value: PropertyValue = match decode(&payload, Format::Json) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Ignoring undecodable write");
                        continue;
                    }
                };

                debug!(path = %path, value = ?value, "Write request received");

                if tx.send(WriteRequest { path, value }).await.is_err() {
                    break;
                }
            }
        }))
    }

    async fn put_status(&self, status: &BridgeStatus) -> Result<()> {
        let key = self.keys.status_key();
        let payload = serde_json::to_vec(status).map_err(BridgeError::bus)?;
        self.session
            .put(&key, payload)
            .await
            .map_err(|e| BridgeError::bus(format!("Failed to publish to {}: {}", key, e)))
    }
}

impl PropertyBus for ZenohBus {
    async fn register(&self, service_name: &str, metadata: serde_json::Value) -> Result<()> {
        let mut registration = self.registration.lock().await;
        if let Some(existing) = registration.as_ref() {
            return Err(BridgeError::bus(format!(
                "already registered as {}",
                existing.service
            )));
        }

        let alive_key = self.keys.alive_key();
        let token = self
            .session
            .liveliness()
            .declare_token(&alive_key)
            .await
            .map_err(|e| BridgeError::bus(format!("Failed to declare liveliness token: {}", e)))?;

        self.put_status(&BridgeStatus::running(service_name).with_metadata(metadata))
            .await?;

        info!(service = %service_name, key = %alive_key, "Registered on the bus");

        *registration = Some(Registration {
            service: service_name.to_string(),
            _token: token,
        });

        Ok(())
    }

    async fn publish(&self, update: &PropertyUpdate) -> Result<()> {
        let key = self.keys.property_key(&update.path)?;
        let payload = encode(update, self.format)?;

        self.session
            .put(&key, payload)
            .await
            .map_err(|e| BridgeError::bus(format!("Failed to publish to {}: {}", key, e)))?;

        debug!(key = %key, value = ?update.value, "Published");
        Ok(())
    }

    async fn unregister(&self) -> Result<()> {
        let Some(registration) = self.registration.lock().await.take() else {
            return Ok(());
        };

        let result = self
            .put_status(&BridgeStatus::offline(&registration.service))
            .await;

        info!(service = %registration.service, "Unregistered from the bus");
        drop(registration);

        result
    }
}

/// Something that happened on a [`MemoryBus`].
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// The bridge registered under a service name.
    Registered(String),
    /// A property update was published.
    Published(PropertyUpdate),
    /// The registration was released.
    Unregistered,
}

#[derive(Debug, Default)]
struct MemoryBusState {
    registered: Option<String>,
    events: Vec<BusEvent>,
    fail_publish: bool,
}

/// In-process bus that records every event.
#[derive(Debug, Default)]
pub struct MemoryBus {
    state: Mutex<MemoryBusState>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryBusState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Make subsequent publishes fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.with_state(|state| state.fail_publish = fail);
    }

    /// Service name currently registered.
    pub fn registered(&self) -> Option<String> {
        self.with_state(|state| state.registered.clone())
    }

    /// Every event in order.
    pub fn events(&self) -> Vec<BusEvent> {
        self.with_state(|state| state.events.clone())
    }

    /// Every published update in order.
    pub fn updates(&self) -> Vec<PropertyUpdate> {
        self.with_state(|state| {
            state
                .events
                .iter()
                .filter_map(|event| match event {
                    BusEvent::Published(update) => Some(update.clone()),
                    _ => None,
                })
                .collect()
        })
    }

    /// Updates published for one path, in order.
    pub fn updates_for(&self, path: &str) -> Vec<PropertyUpdate> {
        self.updates()
            .into_iter()
            .filter(|update| update.path == path)
            .collect()
    }

    /// Most recent value published for a path.
    pub fn last_value(&self, path: &str) -> Option<PropertyValue> {
        self.updates_for(path).pop().map(|update| update.value)
    }

    /// Forget recorded events, keeping the registration.
    pub fn clear_events(&self) {
        self.with_state(|state| state.events.clear());
    }
}

impl PropertyBus for MemoryBus {
    async fn register(&self, service_name: &str, _metadata: serde_json::Value) -> Result<()> {
        self.with_state(|state| {
            if let Some(existing) = &state.registered {
                return Err(BridgeError::bus(format!("already registered as {}", existing)));
            }
            state.registered = Some(service_name.to_string());
            state
                .events
                .push(BusEvent::Registered(service_name.to_string()));
            Ok(())
        })
    }

    async fn publish(&self, update: &PropertyUpdate) -> Result<()> {
        self.with_state(|state| {
            if state.fail_publish {
                return Err(BridgeError::bus(format!("publish of {} refused", update.path)));
            }
            state.events.push(BusEvent::Published(update.clone()));
            Ok(())
        })
    }

    async fn unregister(&self) -> Result<()> {
        self.with_state(|state| {
            if state.registered.take().is_some() {
                state.events.push(BusEvent::Unregistered);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bus_records_in_order() {
        let bus = MemoryBus::new();
        bus.register("svc", serde_json::Value::Null).await.unwrap();
        bus.publish(&PropertyUpdate::new("/Status", PropertyValue::Int(0), "0"))
            .await
            .unwrap();
        bus.unregister().await.unwrap();

        let events = bus.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], BusEvent::Registered("svc".to_string()));
        assert!(matches!(&events[1], BusEvent::Published(u) if u.path == "/Status"));
        assert_eq!(events[2], BusEvent::Unregistered);
        assert_eq!(bus.registered(), None);
    }

    #[tokio::test]
    async fn test_memory_bus_double_register_fails() {
        let bus = MemoryBus::new();
        bus.register("svc", serde_json::Value::Null).await.unwrap();
        assert!(bus.register("svc", serde_json::Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_publish_all_counts_failures() {
        let bus = MemoryBus::new();
        let updates = vec![
            PropertyUpdate::new("/Status", PropertyValue::Int(4), "4"),
            PropertyUpdate::new("/MaxCurrent", PropertyValue::Int(16), "16A"),
        ];

        let stats = publish_all(&bus, &updates).await;
        assert_eq!(stats, PublishStats { success: 2, failed: 0 });

        bus.set_fail_publish(true);
        let stats = publish_all(&bus, &updates).await;
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.total(), 2);
        assert_eq!(bus.updates().len(), 2);
    }

    #[tokio::test]
    async fn test_last_value() {
        let bus = MemoryBus::new();
        for amps in [6i64, 10, 13] {
            bus.publish(&PropertyUpdate::new("/MaxCurrent", amps.into(), ""))
                .await
                .unwrap();
        }

        assert_eq!(bus.last_value("/MaxCurrent"), Some(PropertyValue::Int(13)));
        assert_eq!(bus.updates_for("/MaxCurrent").len(), 3);
        assert_eq!(bus.last_value("/Status"), None);
    }
}
