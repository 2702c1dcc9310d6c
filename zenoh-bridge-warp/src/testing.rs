//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use warp_bridge_common::PropertyValue;

use crate::client::{
    DeviceApi, DeviceIdentity, HARDWARE_ENDPOINT, NAME_ENDPOINT, RawDeviceState,
    RawHardwareConfig, STATE_ENDPOINT,
};
use crate::error::{BridgeError, Result};
use crate::model::{PublishedModel, TextFormat, paths};

/// A charger whose answers the test controls.
#[derive(Debug)]
pub struct FakeDevice {
    pub charger_state: AtomicI64,
    pub jumper_configuration: AtomicI64,
    pub fail_state: AtomicBool,
    pub fail_hardware: AtomicBool,
    pub fail_identity: AtomicBool,
    pub state_calls: AtomicUsize,
}

impl FakeDevice {
    pub fn new(charger_state: i64, jumper_configuration: i64) -> Self {
        Self {
            charger_state: AtomicI64::new(charger_state),
            jumper_configuration: AtomicI64::new(jumper_configuration),
            fail_state: AtomicBool::new(false),
            fail_hardware: AtomicBool::new(false),
            fail_identity: AtomicBool::new(false),
            state_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_charger_state(&self, state: i64) {
        self.charger_state.store(state, Ordering::SeqCst);
    }

    pub fn set_fail_state(&self, fail: bool) {
        self.fail_state.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_hardware(&self, fail: bool) {
        self.fail_hardware.store(fail, Ordering::SeqCst);
    }

    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }
}

impl DeviceApi for FakeDevice {
    async fn fetch_state(&self) -> Result<RawDeviceState> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_state.load(Ordering::SeqCst) {
            return Err(BridgeError::transport(STATE_ENDPOINT, "connection refused"));
        }
        Ok(RawDeviceState {
            charger_state: self.charger_state.load(Ordering::SeqCst),
            error_state: Some(0),
            allowed_charging_current: Some(16000),
        })
    }

    async fn fetch_hardware_config(&self) -> Result<RawHardwareConfig> {
        if self.fail_hardware.load(Ordering::SeqCst) {
            return Err(BridgeError::transport(HARDWARE_ENDPOINT, "HTTP 500"));
        }
        Ok(RawHardwareConfig {
            jumper_configuration: self.jumper_configuration.load(Ordering::SeqCst),
        })
    }

    async fn fetch_identity(&self) -> Result<DeviceIdentity> {
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(BridgeError::decode(NAME_ENDPOINT, "empty body"));
        }
        Ok(DeviceIdentity {
            name: "warp2-AbCd".to_string(),
            firmware_version: 241,
            hardware_config_code: 3,
        })
    }
}

/// The properties one poll cycle writes, declared the way the service does.
pub fn poll_model() -> PublishedModel {
    let mut model = PublishedModel::new();
    let declarations: [(&str, PropertyValue, TextFormat); 7] = [
        (paths::CONNECTED, PropertyValue::Int(1), TextFormat::Plain),
        (paths::UPDATE_INDEX, PropertyValue::Int(0), TextFormat::Plain),
        (paths::STATUS, PropertyValue::Null, TextFormat::Plain),
        (paths::MODE, PropertyValue::Null, TextFormat::Plain),
        (paths::POSITION, PropertyValue::Int(0), TextFormat::Plain),
        (paths::AC_VOLTAGE, PropertyValue::Int(0), TextFormat::Volts),
        (paths::MAX_CURRENT, PropertyValue::Int(0), TextFormat::Amps),
    ];
    for (path, initial, format) in declarations {
        model
            .declare(path, initial, false, format)
            .expect("fresh model");
    }
    model
}
