//! HTTP client for the WARP status API.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{BridgeError, Result};
use crate::mapper::parse_firmware_version;

/// Charger state endpoint.
pub const STATE_ENDPOINT: &str = "/evse/state";
/// Hardware configuration endpoint.
pub const HARDWARE_ENDPOINT: &str = "/evse/hardware_configuration";
/// Firmware version endpoint.
pub const VERSION_ENDPOINT: &str = "/info/version";
/// Device name endpoint.
pub const NAME_ENDPOINT: &str = "/info/name";

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Charger state as reported by `/evse/state`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawDeviceState {
    /// IEC 61851 derived charger state (0-4).
    pub charger_state: i64,
    /// Error state, if the firmware reports it.
    #[serde(default)]
    pub error_state: Option<i64>,
    /// Currently allowed charging current in milliamps.
    #[serde(default)]
    pub allowed_charging_current: Option<i64>,
}

/// Hardware configuration as reported by `/evse/hardware_configuration`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawHardwareConfig {
    /// Jumper setting that limits the maximum current.
    pub jumper_configuration: i64,
}

/// Identity of the charger, fetched once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device name (e.g., "warp2-AbCd").
    pub name: String,
    /// Firmware version as an integer (`2.4.1` → `241`).
    pub firmware_version: i64,
    /// EVSE hardware revision code.
    pub hardware_config_code: i64,
}

#[derive(Debug, Deserialize)]
struct NameInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    firmware: String,
}

#[derive(Debug, Deserialize)]
struct HardwareRevision {
    evse_version: i64,
}

/// Read access to a charger.
///
/// Implemented by [`DeviceClient`] for real devices; the poll scheduler
/// only depends on this trait.
pub trait DeviceApi: Send + Sync + 'static {
    /// Fetch the current charger state.
    fn fetch_state(&self) -> impl Future<Output = Result<RawDeviceState>> + Send;

    /// Fetch the hardware configuration.
    fn fetch_hardware_config(&self) -> impl Future<Output = Result<RawHardwareConfig>> + Send;

    /// Fetch name, firmware and hardware revision.
    fn fetch_identity(&self) -> impl Future<Output = Result<DeviceIdentity>> + Send;
}

/// HTTP client for one charger.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    client: Client,
    base_url: Url,
}

impl DeviceClient {
    /// Create a client for a host (`"192.168.1.50"`, `"warp2.local:8080"`
    /// or a full `http://` URL).
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url(host)?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BridgeError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET an endpoint and decode its JSON body.
    #[instrument(skip(self), level = "debug")]
    async fn get_json<T: DeserializeOwned>(&self, endpoint: &'static str) -> Result<T> {
        let url = self
            .base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| BridgeError::transport(endpoint, e))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BridgeError::transport(endpoint, describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::transport(endpoint, format!("HTTP {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BridgeError::transport(endpoint, describe(&e)))?;

        debug!(endpoint, bytes = body.len(), "Response received");

        decode_body(endpoint, &body)
    }
}

impl DeviceApi for DeviceClient {
    async fn fetch_state(&self) -> Result<RawDeviceState> {
        self.get_json(STATE_ENDPOINT).await
    }

    async fn fetch_hardware_config(&self) -> Result<RawHardwareConfig> {
        self.get_json(HARDWARE_ENDPOINT).await
    }

    async fn fetch_identity(&self) -> Result<DeviceIdentity> {
        let (name, version, hardware) = tokio::try_join!(
            self.get_json::<NameInfo>(NAME_ENDPOINT),
            self.get_json::<VersionInfo>(VERSION_ENDPOINT),
            self.get_json::<HardwareRevision>(HARDWARE_ENDPOINT),
        )?;

        let firmware_version = parse_firmware_version(&version.firmware).ok_or_else(|| {
            BridgeError::decode(
                VERSION_ENDPOINT,
                format!("unparseable firmware version '{}'", version.firmware),
            )
        })?;

        Ok(DeviceIdentity {
            name: name.name,
            firmware_version,
            hardware_config_code: hardware.evse_version,
        })
    }
}

/// Decode a response body, treating empty and `null` bodies as failures.
pub fn decode_body<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(BridgeError::decode(endpoint, "empty body"));
    }

    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| BridgeError::decode(endpoint, e))?;

    if value.is_null() {
        return Err(BridgeError::decode(endpoint, "null body"));
    }

    serde_json::from_value(value).map_err(|e| BridgeError::decode(endpoint, e))
}

fn base_url(host: &str) -> Result<Url> {
    let host = host.trim();
    if host.is_empty() {
        return Err(BridgeError::config("device host is empty"));
    }

    let mut raw = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    if !raw.ends_with('/') {
        raw.push('/');
    }

    Url::parse(&raw).map_err(|e| BridgeError::config(format!("Invalid host '{}': {}", host, e)))
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}
