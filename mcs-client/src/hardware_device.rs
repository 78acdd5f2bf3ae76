//! Catalogue-aware access to a module
use std::sync::Arc;

use snafu::{ensure, ResultExt as _};

use mcs_common::{
    commands::FirmwareVersion,
    constants::{reset_mask, DEFAULT_WAIT_TIMEOUT},
    DataPort, DeviceProfile, PortRef,
};

use crate::{
    device::Device,
    error::{AccessDeniedSnafu, CatalogueSnafu, OutOfRangeSnafu, Result},
    wait::Wait,
};

/// A module whose ports and parameters are known by name
///
/// Values are exchanged in user units; the descriptor's factor converts them to and from the
/// raw values on the wire. The protocol level handle stays available through
/// [`HardwareDevice::device`].
#[derive(Debug, Clone)]
pub struct HardwareDevice {
    device: Arc<Device>,
    profile: DeviceProfile,
    device_type: String,
}

fn check_limits(port: &PortRef, descriptor: &DataPort, raw: i64) -> Result<()> {
    ensure!(
        descriptor.limits.contains(raw),
        OutOfRangeSnafu {
            port: port.clone(),
            raw,
            min: descriptor.limits.min,
            max: descriptor.limits.max,
        }
    );
    Ok(())
}

impl HardwareDevice {
    /// Bind `device` to the catalogue entry `profile`
    pub fn new(device: Arc<Device>, device_type: impl Into<String>, profile: DeviceProfile) -> Self {
        Self {
            device,
            profile,
            device_type: device_type.into(),
        }
    }

    /// The protocol level handle
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Name of the device type
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    /// The catalogue entry
    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    /// Read a port in user units
    pub fn read_port(&self, port: impl Into<PortRef>) -> Result<f64> {
        let port = port.into();
        let (name, descriptor) = self.profile.port(&port).context(CatalogueSnafu)?;
        ensure!(
            descriptor.access.readable(),
            AccessDeniedSnafu {
                what: "port",
                port: port.clone(),
                access: "reading",
            }
        );
        let raw = self.device.get_port(descriptor.id, descriptor.signed)?;
        let value = descriptor.raw_to_user(raw);
        log::trace!("{}: port '{name}' = {value} ({raw})", self.device);
        Ok(value)
    }

    /// Write a port in user units
    ///
    /// A non-zero `pulse_time` makes the module restore the previous value after that time.
    pub fn write_port(&self, port: impl Into<PortRef>, value: f64, pulse_time: u8) -> Result<()> {
        let port = port.into();
        let (name, descriptor) = self.profile.port(&port).context(CatalogueSnafu)?;
        ensure!(
            descriptor.access.writable(),
            AccessDeniedSnafu {
                what: "port",
                port: port.clone(),
                access: "writing",
            }
        );
        let raw = descriptor.user_to_raw(value);
        check_limits(&port, descriptor, raw)?;
        log::trace!("{}: port '{name}' := {value} ({raw})", self.device);
        self.device
            .set_port(descriptor.id, raw, descriptor.len, pulse_time, Wait::NoWait)
    }

    /// Read a parameter in user units
    pub fn read_parameter(&self, parameter: impl Into<PortRef>) -> Result<f64> {
        let parameter = parameter.into();
        let (name, descriptor) = self.profile.parameter(&parameter).context(CatalogueSnafu)?;
        ensure!(
            descriptor.access.readable(),
            AccessDeniedSnafu {
                what: "parameter",
                port: parameter.clone(),
                access: "reading",
            }
        );
        let raw = self.device.get_parameter(descriptor.id, descriptor.signed)?;
        let value = descriptor.raw_to_user(raw);
        log::trace!("{}: parameter '{name}' = {value} ({raw})", self.device);
        Ok(value)
    }

    /// Write a parameter in user units
    pub fn write_parameter(&self, parameter: impl Into<PortRef>, value: f64) -> Result<()> {
        let parameter = parameter.into();
        let (name, descriptor) = self.profile.parameter(&parameter).context(CatalogueSnafu)?;
        ensure!(
            descriptor.access.writable(),
            AccessDeniedSnafu {
                what: "parameter",
                port: parameter.clone(),
                access: "writing",
            }
        );
        let raw = descriptor.user_to_raw(value);
        check_limits(&parameter, descriptor, raw)?;
        log::trace!("{}: parameter '{name}' := {value} ({raw})", self.device);
        self.device.set_parameter(descriptor.id, raw, descriptor.len)
    }

    /// Write every writable parameter that has a default value
    pub fn write_parameter_defaults(&self) -> Result<()> {
        for (name, descriptor) in &self.profile.parameters {
            if let (Some(raw), true) = (descriptor.default, descriptor.access.writable()) {
                log::debug!("{}: parameter '{name}' := default {raw}", self.device);
                self.device.set_parameter(descriptor.id, raw, descriptor.len)?;
            }
        }
        Ok(())
    }

    /// Reset everything, then initialize
    pub fn startup(&self) -> Result<()> {
        let wait = Wait::Timeout(DEFAULT_WAIT_TIMEOUT);
        self.device.reset(reset_mask::ALL, wait)?;
        self.device.init(0, wait)
    }

    /// Reset everything
    pub fn shutdown(&self) -> Result<()> {
        self.device
            .reset(reset_mask::ALL, Wait::Timeout(DEFAULT_WAIT_TIMEOUT))
    }

    /// Firmware version of the module
    pub fn firmware_version(&self) -> Result<FirmwareVersion> {
        self.device.info_firmware_version()
    }
}
