//! Loading of the stack configuration from TOML
//!
//! ```toml
//! interface = "can0"
//! register = "scan"
//!
//! [names]
//! 0x11 = "left piezo"
//!
//! [error_codes]
//! 0x0101 = "motor stalled"
//!
//! [device_types.valve.ports."valve open"]
//! id = 1
//! len = 1
//! limits = { min = 0, max = 1 }
//!
//! [[devices]]
//! address = 0x11
//! type = "valve"
//!
//! [[axes]]
//! axis_id = 1
//! name = "x"
//! ```
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::ResultExt;

use crate::catalogue::{
    parse_number, CatalogueError, DeviceProfile, ErrorCodes, IoSnafu, ParseSnafu,
};
use crate::names::default_device_name;

/// Name under which the built-in Technosoft drive profile is available
pub const TECHNOSOFT_DRIVE: &str = "technosoft drive";

/// How the registry populates its device table when it is opened
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterMode {
    /// Query every address and register those that answer
    Scan,
    /// Register a placeholder device at every address
    All,
    /// Scan if no device is registered yet, else keep the registered ones
    #[default]
    Auto,
    /// Leave the table as it is
    Ignore,
}

/// Binding of a module address to a device type of the catalogue
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceBinding {
    /// Module address
    pub address: u8,
    /// Device type name
    #[serde(rename = "type")]
    pub device_type: String,
    /// Display name, overriding the built-in one
    #[serde(default)]
    pub name: Option<String>,
}

fn default_ratio() -> f64 {
    1.0
}

fn default_sampling_period() -> f64 {
    0.001
}

fn default_encoder_lines() -> f64 {
    0.25
}

fn default_max_current() -> f64 {
    32760.0
}

/// Mechanical and electrical properties of a Technosoft axis
///
/// The defaults scale 1:1 to the drive's internal units for position and current.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisProperties {
    /// Axis id on the TML network
    pub axis_id: u8,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Name of the user unit, e.g. "mm"
    #[serde(default)]
    pub unit: String,
    /// Motor revolutions per user unit
    #[serde(default = "default_ratio")]
    pub transmission_ratio: f64,
    /// Slow loop sampling period in seconds
    #[serde(default = "default_sampling_period")]
    pub sampling_period: f64,
    /// Encoder lines per motor revolution
    #[serde(default = "default_encoder_lines")]
    pub encoder_lines: f64,
    /// Maximum measurable current of the drive in the user's current unit, e.g. 3200 for mA
    #[serde(default = "default_max_current")]
    pub max_current: f64,
}

impl AxisProperties {
    /// Properties with defaults for everything but the id
    pub fn new(axis_id: u8) -> Self {
        Self {
            axis_id,
            name: String::new(),
            unit: String::new(),
            transmission_ratio: default_ratio(),
            sampling_period: default_sampling_period(),
            encoder_lines: default_encoder_lines(),
            max_current: default_max_current(),
        }
    }
}

fn default_interface() -> String {
    "can0".to_string()
}

/// Configuration of an MCS stack
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McsConfig {
    /// CAN interface name
    #[serde(default = "default_interface")]
    pub interface: String,
    /// Registration mode used on open
    #[serde(default)]
    pub register: RegisterMode,
    /// Optional traffic capture file
    #[serde(default)]
    pub traffic_log: Option<PathBuf>,
    /// Display names by address
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    /// Error and warning code texts
    #[serde(default)]
    pub error_codes: BTreeMap<String, String>,
    /// Device type catalogue
    #[serde(default)]
    pub device_types: BTreeMap<String, DeviceProfile>,
    /// Address to device type bindings
    #[serde(default)]
    pub devices: Vec<DeviceBinding>,
    /// TML axes
    #[serde(default)]
    pub axes: Vec<AxisProperties>,
}

impl Default for McsConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            register: RegisterMode::default(),
            traffic_log: None,
            names: BTreeMap::new(),
            error_codes: BTreeMap::new(),
            device_types: BTreeMap::new(),
            devices: Vec::new(),
            axes: Vec::new(),
        }
    }
}

impl McsConfig {
    /// Read a config from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogueError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::load_from_str(&text)
    }

    /// Parse a config from TOML text
    ///
    /// Address and code keys are validated here, so the accessors below only fail on lookups.
    pub fn load_from_str(text: &str) -> Result<Self, CatalogueError> {
        let config: Self = toml::from_str(text).context(ParseSnafu)?;
        config.address_names()?;
        config.error_table()?;
        for binding in &config.devices {
            config.device_type(&binding.device_type)?;
        }
        Ok(config)
    }

    /// Display names from the `[names]` table, keyed by address
    pub fn address_names(&self) -> Result<BTreeMap<u8, String>, CatalogueError> {
        self.names
            .iter()
            .map(|(key, name)| {
                parse_number(key)
                    .and_then(|a| u8::try_from(a).ok())
                    .map(|a| (a, name.clone()))
                    .ok_or_else(|| CatalogueError::InvalidCode { code: key.clone() })
            })
            .collect()
    }

    /// The built-in error table extended with `[error_codes]`
    pub fn error_table(&self) -> Result<ErrorCodes, CatalogueError> {
        ErrorCodes::with_entries(&self.error_codes)
    }

    /// Display name of the module at `address`
    ///
    /// Device bindings win over `[names]`, which wins over the built-in table.
    pub fn device_name(&self, address: u8) -> Option<String> {
        if let Some(name) = self
            .devices
            .iter()
            .find(|d| d.address == address)
            .and_then(|d| d.name.clone())
        {
            return Some(name);
        }
        if let Some(name) = self
            .address_names()
            .ok()
            .and_then(|names| names.get(&address).cloned())
        {
            return Some(name);
        }
        default_device_name(address).map(str::to_string)
    }

    /// Look up a device type, falling back to the built-in profiles
    pub fn device_type(&self, name: &str) -> Result<DeviceProfile, CatalogueError> {
        if let Some(profile) = self.device_types.get(name) {
            return Ok(profile.clone());
        }
        if name == TECHNOSOFT_DRIVE {
            return Ok(DeviceProfile::technosoft_drive());
        }
        Err(CatalogueError::UnknownDevice {
            name: name.to_string(),
        })
    }
}
