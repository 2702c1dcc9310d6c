//! The set of properties the bridge exposes on the bus.

use std::collections::HashMap;

use warp_bridge_common::{PropertyUpdate, PropertyValue, path_suffix};

use crate::error::{BridgeError, Result};

/// Property paths published by the bridge.
pub mod paths {
    pub const PROCESS_NAME: &str = "/Mgmt/ProcessName";
    pub const PROCESS_VERSION: &str = "/Mgmt/ProcessVersion";
    pub const CONNECTION: &str = "/Mgmt/Connection";

    pub const DEVICE_INSTANCE: &str = "/DeviceInstance";
    pub const PRODUCT_ID: &str = "/ProductId";
    pub const PRODUCT_NAME: &str = "/ProductName";
    pub const CUSTOM_NAME: &str = "/CustomName";
    pub const SERIAL: &str = "/Serial";
    pub const FIRMWARE_VERSION: &str = "/FirmwareVersion";
    pub const HARDWARE_VERSION: &str = "/HardwareVersion";
    pub const CONNECTED: &str = "/Connected";
    pub const UPDATE_INDEX: &str = "/UpdateIndex";

    pub const STATUS: &str = "/Status";
    pub const MODE: &str = "/Mode";
    pub const POSITION: &str = "/Position";
    pub const AC_POWER: &str = "/Ac/Power";
    pub const AC_L1_POWER: &str = "/Ac/L1/Power";
    pub const AC_L2_POWER: &str = "/Ac/L2/Power";
    pub const AC_L3_POWER: &str = "/Ac/L3/Power";
    pub const AC_ENERGY_FORWARD: &str = "/Ac/Energy/Forward";
    pub const CHARGING_TIME: &str = "/ChargingTime";
    pub const AC_VOLTAGE: &str = "/Ac/Voltage";
    pub const CURRENT: &str = "/Current";
    pub const SET_CURRENT: &str = "/SetCurrent";
    pub const MAX_CURRENT: &str = "/MaxCurrent";
    pub const MCU_TEMPERATURE: &str = "/MCU/Temperature";
    pub const START_STOP: &str = "/StartStop";
}

/// Display formatter attached to a property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextFormat {
    /// Value as is.
    #[default]
    Plain,
    /// Watts, one decimal.
    Watts,
    /// Kilowatt hours, two decimals.
    KiloWattHours,
    /// Amps, one decimal.
    Amps,
    /// Volts, one decimal.
    Volts,
    /// Degrees Celsius.
    Celsius,
    /// Seconds.
    Seconds,
}

impl TextFormat {
    /// Render a value for display.
    ///
    /// Null renders as an empty string. Text values ignore the unit.
    pub fn format(self, value: &PropertyValue) -> String {
        let (decimals, unit) = match self {
            TextFormat::Plain => return value.to_string(),
            TextFormat::Watts => (Some(1), "W"),
            TextFormat::KiloWattHours => (Some(2), "kWh"),
            TextFormat::Amps => (Some(1), "A"),
            TextFormat::Volts => (Some(1), "V"),
            TextFormat::Celsius => (None, "°C"),
            TextFormat::Seconds => (None, "s"),
        };

        match (value, decimals) {
            (PropertyValue::Null, _) => String::new(),
            (PropertyValue::Float(v), Some(decimals)) => {
                format!("{}{}", display_float(round_to(*v, decimals)), unit)
            }
            (PropertyValue::Int(_) | PropertyValue::Float(_), _) => format!("{}{}", value, unit),
            (PropertyValue::Text(text), _) => text.clone(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Shortest form of a float, keeping a `.0` on whole numbers.
fn display_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// Value kind a property accepts, fixed by its initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Declared with null; accepts anything.
    Any,
    /// Integers and floats.
    Numeric,
    /// Text.
    Text,
}

impl ValueKind {
    fn of(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::Null => ValueKind::Any,
            PropertyValue::Int(_) | PropertyValue::Float(_) => ValueKind::Numeric,
            PropertyValue::Text(_) => ValueKind::Text,
        }
    }

    fn accepts(self, value: &PropertyValue) -> bool {
        match self {
            ValueKind::Any => true,
            ValueKind::Numeric => value.is_null() || value.is_numeric(),
            ValueKind::Text => matches!(value, PropertyValue::Null | PropertyValue::Text(_)),
        }
    }
}

/// A named value exposed on the bus.
#[derive(Debug, Clone)]
pub struct PublishedProperty {
    path: String,
    value: PropertyValue,
    writable: bool,
    format: TextFormat,
    kind: ValueKind,
}

impl PublishedProperty {
    /// Property path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current value.
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Whether external bus actors may write this property.
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Display formatter.
    pub fn format(&self) -> TextFormat {
        self.format
    }

    /// Current value rendered by the formatter.
    pub fn text(&self) -> String {
        self.format.format(&self.value)
    }

    /// The bus update describing the current value.
    pub fn to_update(&self) -> PropertyUpdate {
        PropertyUpdate::new(&self.path, self.value.clone(), self.text())
    }
}

/// Decides whether an external write to a writable property is applied.
pub trait WritePolicy: Send + Sync {
    /// Return `true` to accept the write.
    fn accept(&self, path: &str, value: &PropertyValue) -> bool;
}

/// Accepts every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl WritePolicy for AcceptAll {
    fn accept(&self, _path: &str, _value: &PropertyValue) -> bool {
        true
    }
}

impl<F> WritePolicy for F
where
    F: Fn(&str, &PropertyValue) -> bool + Send + Sync,
{
    fn accept(&self, path: &str, value: &PropertyValue) -> bool {
        self(path, value)
    }
}

/// Registry of published properties, in declaration order.
pub struct PublishedModel {
    properties: Vec<PublishedProperty>,
    index: HashMap<String, usize>,
    policy: Box<dyn WritePolicy>,
}

impl std::fmt::Debug for PublishedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedModel")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl Default for PublishedModel {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishedModel {
    /// Create an empty model that accepts every external write.
    pub fn new() -> Self {
        Self::with_policy(AcceptAll)
    }

    /// Create an empty model with a custom write policy.
    pub fn with_policy(policy: impl WritePolicy + 'static) -> Self {
        Self {
            properties: Vec::new(),
            index: HashMap::new(),
            policy: Box::new(policy),
        }
    }

    /// Declare a property.
    ///
    /// Fails if the path is malformed or already declared.
    pub fn declare(
        &mut self,
        path: &str,
        initial: impl Into<PropertyValue>,
        writable: bool,
        format: TextFormat,
    ) -> Result<()> {
        path_suffix(path).map_err(|e| BridgeError::config(e.to_string()))?;

        if self.index.contains_key(path) {
            return Err(BridgeError::DuplicateProperty(path.to_string()));
        }

        let value = initial.into();
        self.index.insert(path.to_string(), self.properties.len());
        self.properties.push(PublishedProperty {
            path: path.to_string(),
            kind: ValueKind::of(&value),
            value,
            writable,
            format,
        });

        Ok(())
    }

    /// Set a property from the poll cycle and return the bus update.
    pub fn set_value(
        &mut self,
        path: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<PropertyUpdate> {
        let value = value.into();
        let property = self.property_mut(path)?;

        if !property.kind.accepts(&value) {
            return Err(BridgeError::TypeMismatch {
                path: path.to_string(),
                value: format!("{:?}", value),
            });
        }

        property.value = value;
        Ok(property.to_update())
    }

    /// Set several properties at once.
    ///
    /// Every path and value is checked before anything changes, so a
    /// failing batch leaves the model untouched.
    pub fn set_values<I, V>(&mut self, values: I) -> Result<Vec<PropertyUpdate>>
    where
        I: IntoIterator<Item = (&'static str, V)>,
        V: Into<PropertyValue>,
    {
        let values: Vec<(&str, PropertyValue)> = values
            .into_iter()
            .map(|(path, value)| (path, value.into()))
            .collect();

        for (path, value) in &values {
            let property = self
                .property(path)
                .ok_or_else(|| BridgeError::UnknownProperty(path.to_string()))?;
            if !property.kind.accepts(value) {
                return Err(BridgeError::TypeMismatch {
                    path: path.to_string(),
                    value: format!("{:?}", value),
                });
            }
        }

        values
            .into_iter()
            .map(|(path, value)| self.set_value(path, value))
            .collect()
    }

    /// Handle a write from an external bus actor.
    ///
    /// Returns `Ok(true)` when the write was applied. Read-only
    /// properties, incompatible values and writes the policy refuses
    /// return `Ok(false)` and leave the value untouched. Null is only
    /// accepted by properties declared with null.
    pub fn on_external_write(&mut self, path: &str, value: PropertyValue) -> Result<bool> {
        let index = *self
            .index
            .get(path)
            .ok_or_else(|| BridgeError::UnknownProperty(path.to_string()))?;

        let property = &self.properties[index];
        let null_into_typed = value.is_null() && property.kind != ValueKind::Any;
        if !property.writable || null_into_typed || !property.kind.accepts(&value) {
            return Ok(false);
        }

        if !self.policy.accept(path, &value) {
            return Ok(false);
        }

        self.properties[index].value = value;
        Ok(true)
    }

    /// Look up a property.
    pub fn property(&self, path: &str) -> Option<&PublishedProperty> {
        self.index.get(path).map(|i| &self.properties[*i])
    }

    /// Current value of a property.
    pub fn get(&self, path: &str) -> Option<&PropertyValue> {
        self.property(path).map(PublishedProperty::value)
    }

    /// Formatted display text of a property.
    pub fn text(&self, path: &str) -> Option<String> {
        self.property(path).map(PublishedProperty::text)
    }

    /// Whether a path has been declared.
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Number of declared properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether nothing has been declared yet.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Bus updates for every property's current value.
    pub fn snapshot(&self) -> Vec<PropertyUpdate> {
        self.properties.iter().map(PublishedProperty::to_update).collect()
    }

    fn property_mut(&mut self, path: &str) -> Result<&mut PublishedProperty> {
        let index = *self
            .index
            .get(path)
            .ok_or_else(|| BridgeError::UnknownProperty(path.to_string()))?;
        Ok(&mut self.properties[index])
    }
}
