//! Device description documents.
//!
//! A device description is an opaque JSON object. The repository only
//! interprets a handful of fields: `identifiers.mac_address` as the natural
//! key of the described device, and the fields targeted by requirement
//! parsers (`name`, `description`, `location.*`). Key order is preserved
//! because `serde_json` is built with `preserve_order`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Dotted path of the MAC address inside a device description.
pub const MAC_ADDRESS_PATH: &str = "identifiers.mac_address";

/// A single device description document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceDescription(Map<String, Value>);

impl DeviceDescription {
    /// Wraps an existing JSON object.
    #[must_use]
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Converts an arbitrary JSON value, rejecting anything but objects.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(ValidationError::MalformedPayload {
                reason: format!("device description must be a JSON object, got {other}"),
            }),
        }
    }

    /// Resolves a dotted field path such as `location.description`.
    #[must_use]
    pub fn field(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// The MAC address identifying the described device, if present and non-empty.
    #[must_use]
    pub fn mac_address(&self) -> Option<&str> {
        self.field(MAC_ADDRESS_PATH)
            .and_then(Value::as_str)
            .filter(|mac| !mac.is_empty())
    }

    /// The human readable device name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Returns true if both documents describe the same physical device.
    ///
    /// Documents without a MAC address never describe the same device.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        match (self.mac_address(), other.mac_address()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<DeviceDescription> for Value {
    fn from(doc: DeviceDescription) -> Self {
        doc.into_value()
    }
}

impl TryFrom<Value> for DeviceDescription {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}
