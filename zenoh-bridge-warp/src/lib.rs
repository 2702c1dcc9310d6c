//! Zenoh bridge for WARP wallboxes.
//!
//! This bridge polls a WARP charger's HTTP status API, maps the raw
//! fields into a fixed set of properties and publishes them to Zenoh.
//! A few properties accept writes from other bus participants.
//!
//! # Key Expressions
//!
//! ```text
//! <prefix>/<path>            property updates, e.g. warp/evcharger/http_40/Ac/Power
//! <prefix>/@/status          bridge status
//! <prefix>/@/alive           liveliness token
//! <prefix>/@/write/<path>    write requests (JSON scalar payload)
//! ```

pub mod args;
pub mod bus;
pub mod client;
pub mod config;
pub mod error;
pub mod mapper;
pub mod model;
pub mod poller;
pub mod service;
pub mod status;

#[cfg(test)]
mod testing;

pub use args::BridgeArgs;
pub use bus::{MemoryBus, PropertyBus, WriteRequest, ZenohBus};
pub use client::{DeviceApi, DeviceClient, DeviceIdentity};
pub use config::{WarpBridgeConfig, WarpConfig};
pub use error::{BridgeError, Result};
pub use model::{PublishedModel, TextFormat, WritePolicy};
pub use poller::{PollScheduler, PollSettings, RuntimeState};
pub use service::{BridgeService, RunningBridge};
