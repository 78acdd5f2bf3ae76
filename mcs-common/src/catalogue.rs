//! Descriptors for module ports and parameters
//!
//! A module's firmware documentation lists its data ports and parameters with their byte length,
//! signedness, access rights, limits and a conversion factor to user units. The catalogue holds
//! those descriptors per device type; it holds no values.

use std::collections::{BTreeMap, HashMap};

use serde::{de::Unexpected, Deserialize, Deserializer};
use snafu::Snafu;

/// Errors raised while resolving catalogue entries or loading a catalogue
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CatalogueError {
    /// The device type has no port matching the reference
    #[snafu(display("Unknown port {port}"))]
    UnknownPort {
        /// The reference that failed to resolve
        port: PortRef,
    },
    /// The device type has no parameter matching the reference
    #[snafu(display("Unknown parameter {parameter}"))]
    UnknownParameter {
        /// The reference that failed to resolve
        parameter: PortRef,
    },
    /// The device type is not defined
    #[snafu(display("Unknown device type '{name}'"))]
    UnknownDevice {
        /// Requested device type
        name: String,
    },
    /// An error code key could not be parsed as a number
    #[snafu(display("Invalid error code '{code}'"))]
    InvalidCode {
        /// The offending key
        code: String,
    },
    /// The config text is not valid
    #[snafu(display("Error parsing config: {source}"))]
    Parse {
        /// The underlying parser error
        source: toml::de::Error,
    },
    /// The config file could not be read
    #[snafu(display("Error reading {path}: {source}"))]
    Io {
        /// Path of the file
        path: String,
        /// The underlying IO error
        source: std::io::Error,
    },
}

/// Access rights of a data port
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum Access {
    /// Neither readable nor writable
    #[serde(rename = "")]
    None,
    /// Read only
    #[serde(rename = "r")]
    Read,
    /// Write only
    #[serde(rename = "w")]
    Write,
    /// Read and write
    #[default]
    #[serde(rename = "rw")]
    ReadWrite,
}

impl Access {
    /// True if the value may be read
    pub fn readable(&self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    /// True if the value may be written
    pub fn writable(&self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Inclusive raw-value limits for writing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    /// Lower limit, if any
    pub min: Option<i64>,
    /// Upper limit, if any
    pub max: Option<i64>,
}

impl Limits {
    /// True if `raw` lies inside the limits
    pub fn contains(&self, raw: i64) -> bool {
        self.min.map_or(true, |min| raw >= min) && self.max.map_or(true, |max| raw <= max)
    }
}

fn default_len() -> u8 {
    4
}

fn deserialize_len<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let len = u8::deserialize(deserializer)?;
    match len {
        1 | 2 | 4 => Ok(len),
        _ => Err(serde::de::Error::invalid_value(
            Unexpected::Unsigned(len as u64),
            &"a length of 1, 2 or 4 bytes",
        )),
    }
}

fn default_factor() -> f64 {
    1.0
}

/// Description of one data port or parameter
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataPort {
    /// Port or parameter id on the wire
    pub id: u8,
    /// Value length in bytes: 1, 2 or 4
    #[serde(default = "default_len", deserialize_with = "deserialize_len")]
    pub len: u8,
    /// Whether the raw value is signed
    #[serde(default)]
    pub signed: bool,
    /// Access rights
    #[serde(default)]
    pub access: Access,
    /// Raw limits applied on write
    #[serde(default)]
    pub limits: Limits,
    /// Multiplier converting raw values to user units
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Default raw value used when configuring a module
    #[serde(default)]
    pub default: Option<i64>,
}

impl DataPort {
    /// A read/write port of `len` bytes with no limits and unit factor
    pub fn new(id: u8, len: u8) -> Self {
        Self {
            id,
            len,
            signed: false,
            access: Access::ReadWrite,
            limits: Limits::default(),
            factor: 1.0,
            default: None,
        }
    }

    /// A parameter: always four bytes, read/write
    pub fn parameter(id: u8, signed: bool) -> Self {
        Self {
            signed,
            ..Self::new(id, 4)
        }
    }

    /// Builder: set the access rights
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Builder: set the raw limits
    pub fn with_limits(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.limits = Limits { min, max };
        self
    }

    /// Builder: set the raw to user factor
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Convert a raw value to user units
    pub fn raw_to_user(&self, raw: i64) -> f64 {
        raw as f64 * self.factor
    }

    /// Convert a user value to the nearest raw value
    pub fn user_to_raw(&self, value: f64) -> i64 {
        (value / self.factor).round() as i64
    }
}

/// A reference to a port or parameter, either by wire id or by catalogue name
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortRef {
    /// Wire id
    ById(u8),
    /// Name in the catalogue
    ByName(String),
}

impl core::fmt::Display for PortRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PortRef::ById(id) => write!(f, "#{id}"),
            PortRef::ByName(name) => write!(f, "'{name}'"),
        }
    }
}

impl From<u8> for PortRef {
    fn from(value: u8) -> Self {
        PortRef::ById(value)
    }
}

impl From<&str> for PortRef {
    fn from(value: &str) -> Self {
        PortRef::ByName(value.to_string())
    }
}

impl From<String> for PortRef {
    fn from(value: String) -> Self {
        PortRef::ByName(value)
    }
}

/// The ports and parameters of one device type
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceProfile {
    /// Data ports by name
    #[serde(default)]
    pub ports: BTreeMap<String, DataPort>,
    /// Parameters by name
    #[serde(default)]
    pub parameters: BTreeMap<String, DataPort>,
}

fn resolve<'a>(
    map: &'a BTreeMap<String, DataPort>,
    reference: &PortRef,
) -> Option<(&'a str, &'a DataPort)> {
    match reference {
        PortRef::ById(id) => map
            .iter()
            .find(|(_, port)| port.id == *id)
            .map(|(name, port)| (name.as_str(), port)),
        PortRef::ByName(name) => map.get_key_value(name).map(|(k, v)| (k.as_str(), v)),
    }
}

impl DeviceProfile {
    /// Find a port by id or name
    pub fn port(&self, port: &PortRef) -> Result<(&str, &DataPort), CatalogueError> {
        resolve(&self.ports, port).ok_or_else(|| CatalogueError::UnknownPort { port: port.clone() })
    }

    /// Find a parameter by id or name
    pub fn parameter(&self, parameter: &PortRef) -> Result<(&str, &DataPort), CatalogueError> {
        resolve(&self.parameters, parameter).ok_or_else(|| CatalogueError::UnknownParameter {
            parameter: parameter.clone(),
        })
    }

    /// The profile of a Technosoft drive bridged by an MCS module
    pub fn technosoft_drive() -> Self {
        let ro = |id, len| DataPort::new(id, len).with_access(Access::Read);
        let ports = [
            (
                "axis on off",
                DataPort::new(0, 1).with_limits(Some(0), Some(1)),
            ),
            ("motor status", ro(1, 4)),
            ("motor error", ro(2, 2)),
            ("motor current", ro(3, 2)),
            ("motor position error", ro(4, 2)),
            ("input status", ro(5, 2)),
        ];
        let positive = |id| DataPort::parameter(id, false).with_limits(Some(0), None);
        let parameters = [
            ("configuration", DataPort::parameter(0, false)),
            ("motor acceleration", positive(128)),
            ("motor deceleration", positive(129)),
            ("motor speed", positive(130)),
            ("motor jerk", positive(131)),
            ("motor homing speed", positive(132)),
            ("motor home position", positive(133)),
            ("motor homing command", positive(134)),
            ("motor commanded position", positive(135)),
            ("tunnel buffer size", positive(136)),
        ];
        Self {
            ports: ports
                .into_iter()
                .map(|(name, port)| (name.to_string(), port))
                .collect(),
            parameters: parameters
                .into_iter()
                .map(|(name, port)| (name.to_string(), port))
                .collect(),
        }
    }
}

/// Text for error and warning codes reported by modules
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCodes {
    codes: HashMap<u16, String>,
}

impl Default for ErrorCodes {
    fn default() -> Self {
        let mut codes = HashMap::new();
        codes.insert(0, "no error".to_string());
        Self { codes }
    }
}

/// Parse a decimal or `0x` prefixed hex number
pub fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl ErrorCodes {
    /// Built-in table extended with `entries`, keyed by decimal or hex code strings
    pub fn with_entries(entries: &BTreeMap<String, String>) -> Result<Self, CatalogueError> {
        let mut table = Self::default();
        for (code, text) in entries {
            let value = parse_number(code)
                .and_then(|c| u16::try_from(c).ok())
                .ok_or_else(|| CatalogueError::InvalidCode { code: code.clone() })?;
            table.codes.insert(value, text.clone());
        }
        Ok(table)
    }

    /// Add or replace one entry
    pub fn insert(&mut self, code: u16, text: impl Into<String>) {
        self.codes.insert(code, text.into());
    }

    /// Text for an error code
    pub fn error_text(&self, code: u16) -> &str {
        self.codes
            .get(&code)
            .map(String::as_str)
            .unwrap_or("<unknown error>")
    }

    /// Text for a warning code
    pub fn warning_text(&self, code: u16) -> &str {
        self.codes
            .get(&code)
            .map(String::as_str)
            .unwrap_or("<unknown warning>")
    }
}
