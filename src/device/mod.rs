//! Remote device access.
//!
//! The panel never talks to hardware directly. Every jaw motor, slit
//! pseudo-motor and interlock signal lives behind the facility's
//! device-control middleware and is reached through two small seams:
//!
//! - [`DeviceFactory`] resolves a [`DeviceName`] into a live [`DeviceHandle`].
//! - [`DeviceProxy`] is that handle: attribute reads and writes plus `abort`.
//!
//! Both traits are async (`#[async_trait]`), thread-safe (`Send + Sync`) and
//! report call failures as `anyhow::Error`; the controller turns those into
//! typed [`PanelError`](crate::error::PanelError) values.
//!
//! Two implementations ship with the crate: [`simulated`] stands in for the
//! middleware when running the binaries, and [`mock`] records every call for
//! tests.

pub mod mock;
pub mod simulated;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, PanelError};

/// Attribute holding a motor's user position.
pub const POSITION_ATTR: &str = "Position";

/// Name of a remote device.
///
/// Either a hierarchical `domain/family/member` name
/// (`motor/lt_ipapscrapers_ctrl/1`) or a single-token alias (`gcdmot1`).
/// Comparison is case-insensitive, as in the middleware's name database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName(String);

impl DeviceName {
    /// Parse and validate a device name.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(PanelError::InvalidDeviceName("empty device name".into()));
        }

        let segments: Vec<&str> = name.split('/').collect();
        if segments.len() != 1 && segments.len() != 3 {
            return Err(PanelError::InvalidDeviceName(format!(
                "'{name}' must be an alias or domain/family/member"
            )));
        }
        for segment in &segments {
            if segment.is_empty() || !segment.chars().all(is_name_char) {
                return Err(PanelError::InvalidDeviceName(format!(
                    "'{name}' has an empty or malformed segment"
                )));
            }
        }

        Ok(Self(name.to_string()))
    }

    /// The name as configured.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for single-token aliases.
    pub fn is_alias(&self) -> bool {
        !self.0.contains('/')
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

impl PartialEq for DeviceName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for DeviceName {}

impl Hash for DeviceName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceName {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeviceName {
    type Error = PanelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceName> for String {
    fn from(name: DeviceName) -> Self {
        name.0
    }
}

/// A single attribute of a device, written `device/attribute`.
///
/// `BUILDING/EPS/PLC-02/di_scrco_s16_01_tin` names attribute
/// `di_scrco_s16_01_tin` of device `BUILDING/EPS/PLC-02`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttributeRef {
    device: DeviceName,
    attribute: String,
}

impl AttributeRef {
    /// Parse `device/attribute`.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        let (device, attribute) = raw.rsplit_once('/').ok_or_else(|| {
            PanelError::InvalidDeviceName(format!("'{raw}' is not a device/attribute reference"))
        })?;
        if attribute.is_empty() || !attribute.chars().all(is_name_char) {
            return Err(PanelError::InvalidDeviceName(format!(
                "'{raw}' has an empty or malformed attribute"
            )));
        }
        Ok(Self {
            device: DeviceName::parse(device)?,
            attribute: attribute.to_string(),
        })
    }

    /// Device owning the attribute.
    pub fn device(&self) -> &DeviceName {
        &self.device
    }

    /// Attribute name.
    pub fn attribute(&self) -> &str {
        &self.attribute
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.attribute)
    }
}

impl TryFrom<String> for AttributeRef {
    type Error = PanelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AttributeRef> for String {
    fn from(reference: AttributeRef) -> Self {
        reference.to_string()
    }
}

/// Live handle to one remote device.
///
/// Writes are commands to the device's own motion control: a `Position`
/// write returns once the command is accepted, not when the motion ends.
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Name the handle was resolved from.
    fn name(&self) -> &DeviceName;

    /// Read a scalar attribute.
    async fn read_attribute(&self, attribute: &str) -> Result<f64>;

    /// Write a scalar attribute.
    async fn write_attribute(&self, attribute: &str, value: f64) -> Result<()>;

    /// Stop any motion in progress.
    async fn abort(&self) -> Result<()>;
}

/// Shared, resolved device handle.
pub type DeviceHandle = Arc<dyn DeviceProxy>;

/// Resolves device names into live handles.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Resolve `name`, failing with [`PanelError::UnknownDevice`] when the
    /// middleware does not know it.
    async fn resolve(&self, name: &DeviceName) -> AppResult<DeviceHandle>;
}
