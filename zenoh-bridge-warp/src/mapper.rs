//! Translation of raw WARP codes into published values.
//!
//! Every enum-to-value table the bridge knows lives here. The functions
//! are pure; the poll cycle only calls them.

use crate::error::{BridgeError, Result};

/// Published charging status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    /// Ready, no vehicle connected.
    ReadyNoVehicle = 0,
    /// Waiting for the vehicle.
    WaitingForVehicle = 2,
    /// Charging.
    Charging = 4,
    /// Charge finished, vehicle still connected.
    ChargeFinished = 6,
    /// Charger reports an error.
    Error = 7,
}

impl StatusCode {
    /// Numeric code published on `/Status`.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            StatusCode::ReadyNoVehicle => "ready/no vehicle",
            StatusCode::WaitingForVehicle => "waiting for vehicle",
            StatusCode::Charging => "charging",
            StatusCode::ChargeFinished => "charge finished, connected",
            StatusCode::Error => "error",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// Mounting position of the charger relative to the inverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Position {
    /// Connected to the AC output.
    AcOutput = 0,
    /// Connected to the AC input.
    AcInput = 1,
}

impl Position {
    /// Numeric code published on `/Position`.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// `charger_state` → `/Status`.
const STATUS_TABLE: [(i64, StatusCode); 5] = [
    (0, StatusCode::ReadyNoVehicle),
    (1, StatusCode::Charging),
    (2, StatusCode::ChargeFinished),
    (3, StatusCode::WaitingForVehicle),
    (4, StatusCode::Error),
];

/// `jumper_configuration` → maximum current in amps.
const MAX_CURRENT_TABLE: [(i64, u32); 7] = [
    (0, 6),
    (1, 10),
    (2, 13),
    (3, 16),
    (4, 20),
    (5, 25),
    (6, 32),
];

/// Returned by [`map_max_current_amps`] for jumper settings it does not know.
pub const UNKNOWN_MAX_CURRENT: u32 = 0;

/// Map the device's `charger_state` to the published status code.
///
/// The table is closed: any other state is an error rather than a guess.
pub fn map_status(charger_state: i64) -> Result<StatusCode> {
    STATUS_TABLE
        .iter()
        .find(|(raw, _)| *raw == charger_state)
        .map(|(_, status)| *status)
        .ok_or(BridgeError::UnmappedValue {
            field: "charger_state",
            value: charger_state,
        })
}

/// Map the hardware jumper configuration to the maximum current in amps.
///
/// Unknown configurations map to [`UNKNOWN_MAX_CURRENT`].
pub fn map_max_current_amps(jumper_configuration: i64) -> u32 {
    MAX_CURRENT_TABLE
        .iter()
        .find(|(raw, _)| *raw == jumper_configuration)
        .map(|(_, amps)| *amps)
        .unwrap_or(UNKNOWN_MAX_CURRENT)
}

/// Validate the configured position.
pub fn map_position(position: i64) -> Result<Position> {
    match position {
        0 => Ok(Position::AcOutput),
        1 => Ok(Position::AcInput),
        other => Err(BridgeError::config(format!(
            "position must be 0 (AC output) or 1 (AC input), got {}",
            other
        ))),
    }
}

/// Parse a firmware version string into the integer published on
/// `/FirmwareVersion`.
///
/// Build metadata after `-` or `+` is dropped and the dots removed, so
/// `"2.4.1-6655a1b3"` becomes `241`.
pub fn parse_firmware_version(raw: &str) -> Option<i64> {
    let release = raw
        .trim()
        .split(['-', '+'])
        .next()
        .unwrap_or_default()
        .trim_start_matches(['v', 'V']);

    let digits: String = release.chars().filter(|c| *c != '.').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}
