//! Common functionality shared among the MCS crates.
//!
//! This crate holds the wire level pieces: CAN frames, module addresses and status bytes, the MCS
//! opcode set, the TML extended-frame codec, the port/parameter catalogue and configuration
//! loading, plus the [`CanTransport`](traits::CanTransport) trait adapters implement. Nothing in
//! here spawns threads or blocks, except the socketcan transport's short read timeout.
//!
//! Most users will reach these types through `mcs-client`, which re-exports them.
#![warn(missing_docs, missing_copy_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod address;
pub mod catalogue;
pub mod commands;
pub mod config;
pub mod constants;
pub mod messages;
pub mod names;
pub mod status;
pub mod tml;
pub mod traits;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan;

#[cfg(all(feature = "socketcan", target_os = "linux"))]
#[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
pub use socketcan::SocketCanTransport;

pub use address::Address;
pub use catalogue::{Access, CatalogueError, DataPort, DeviceProfile, ErrorCodes, PortRef};
pub use config::{AxisProperties, McsConfig, RegisterMode};
pub use messages::{CanId, CanMessage, FrameKind};
pub use status::Status;
pub use traits::{CanTransport, TransportError};
