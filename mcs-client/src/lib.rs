//! A library for controlling MCS modules and Technosoft TML axes on a CAN bus
//!
//! [`Mcs`] owns the bus and a background reader thread. It hands out [`Device`] handles, one per
//! module address, whose methods send a telegram and block until the module answers. Extended
//! frames go to the [`TmlHandler`](tml::TmlHandler), which serves the [`TmlAxis`](tml::TmlAxis)
//! handles.
//!
//! ```no_run
//! use mcs_client::{Mcs, RegisterMode, Wait};
//!
//! let mcs = Mcs::socketcan("can0");
//! mcs.open(RegisterMode::Scan).unwrap();
//! let device = mcs.get_device(0x411).unwrap();
//! device.reset(0xff, Wait::secs(5.0)).unwrap();
//! device.init(0, Wait::secs(30.0)).unwrap();
//! device.set_port(7, 200, 2, 0, Wait::NoWait).unwrap();
//! mcs.close().unwrap();
//! ```
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod bus;
mod device;
mod error;
mod hardware_device;
mod registry;
pub mod tml;
mod wait;

pub use bus::{default_traffic_log_path, Bus};
pub use device::Device;
pub use error::{McsError, Result};
pub use hardware_device::HardwareDevice;
pub use registry::Mcs;
pub use wait::Wait;

pub use mcs_common;
pub use mcs_common::{
    Address, AxisProperties, CanId, CanMessage, CanTransport, DataPort, DeviceProfile, McsConfig,
    PortRef, RegisterMode, Status, TransportError,
};
