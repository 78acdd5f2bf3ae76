use mcs_common::{Address, CatalogueError, PortRef, TransportError};
use snafu::Snafu;

/// Error returned by [`Bus`](crate::Bus), [`Device`](crate::Device), [`Mcs`](crate::Mcs) and the
/// TML axis methods
///
/// Variants raised in a command path carry the device's recent traffic, rendered one frame per
/// line, so that a failure report shows what led up to it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum McsError {
    /// The transport rejected a frame
    #[snafu(display("Failed to send CAN message: {source}"))]
    Transport {
        /// Error reported by the transport
        source: TransportError,
    },
    /// The transport could not be opened
    #[snafu(display("Failed to open bus: {source}"))]
    BusOpen {
        /// Error reported by the transport
        source: TransportError,
    },
    /// The traffic capture file could not be opened
    #[snafu(display("Cannot open traffic log {}: {source}", path.display()))]
    TrafficLog {
        /// Path of the capture file
        path: std::path::PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// No matching answer arrived in time
    #[snafu(display("{address}: no response\n{history}"))]
    Timeout {
        /// Address of the device
        address: Address,
        /// Recent traffic of the device
        history: String,
    },
    /// An answer arrived but did not match the expected pattern
    #[snafu(display("Protocol violation: {reason}\n{history}"))]
    ProtocolViolation {
        /// What did not match
        reason: String,
        /// Recent traffic of the device
        history: String,
    },
    /// The module rejected the command
    #[snafu(display(
        "{address}: command rejected, error 0x{error_code:x} '{error_text}', warning 0x{warning_code:x} '{warning_text}'\n{history}"
    ))]
    Nacked {
        /// Address of the device
        address: Address,
        /// Error code reported on the follow-up info request
        error_code: u16,
        /// Warning code reported on the follow-up info request
        warning_code: u16,
        /// Text for the error code
        error_text: String,
        /// Text for the warning code
        warning_text: String,
        /// Recent traffic of the device
        history: String,
    },
    /// The module flags an error or warning in its status
    #[snafu(display(
        "{address}: error 0x{error_code:x} '{error_text}', warning 0x{warning_code:x} '{warning_text}'\n{history}"
    ))]
    HardwareFault {
        /// Address of the device
        address: Address,
        /// Error code reported by the module
        error_code: u16,
        /// Warning code reported by the module
        warning_code: u16,
        /// Text for the error code
        error_text: String,
        /// Text for the warning code
        warning_text: String,
        /// Recent traffic of the device
        history: String,
    },
    /// No device is registered at the address
    #[snafu(display("No device registered at {address}"))]
    NotRegistered {
        /// The requested address
        address: Address,
    },
    /// The device's command lock could not be taken in time
    #[snafu(display("{address}: command lock not acquired\n{history}"))]
    LockTimeout {
        /// Address of the device
        address: Address,
        /// Recent traffic of the device
        history: String,
    },
    /// The reader thread did not stop when asked
    #[snafu(display("Reader thread did not stop"))]
    ReaderStuck,
    /// The registry was created without a TML handler
    #[snafu(display("TML is not enabled on this bus"))]
    TmlDisabled,
    /// A catalogue entry could not be resolved
    #[snafu(display("{source}"))]
    Catalogue {
        /// The catalogue error
        source: CatalogueError,
    },
    /// The port or parameter does not allow the access
    #[snafu(display("{what} {port} does not allow {access}"))]
    AccessDenied {
        /// "port" or "parameter"
        what: &'static str,
        /// The reference used
        port: PortRef,
        /// "reading" or "writing"
        access: &'static str,
    },
    /// The raw value lies outside the catalogue limits
    #[snafu(display("Value {raw} out of range for {port} ({min:?}..={max:?})"))]
    OutOfRange {
        /// The reference used
        port: PortRef,
        /// The raw value
        raw: i64,
        /// Lower limit
        min: Option<i64>,
        /// Upper limit
        max: Option<i64>,
    },
    /// An axis did not answer a read request
    #[snafu(display("Axis {axis}: no answer"))]
    NoAnswer {
        /// Axis id
        axis: u8,
    },
    /// An axis reports a fault
    #[snafu(display("Axis {axis} fault: {description}"))]
    AxisFault {
        /// Axis id
        axis: u8,
        /// The motion error register bits
        description: String,
    },
    /// An axis switched off while moving
    #[snafu(display("Axis {axis} is off"))]
    AxisOff {
        /// Axis id
        axis: u8,
    },
    /// An axis did not finish its motion in time
    #[snafu(display("Axis {axis}: motion not complete in time"))]
    AxisTimeout {
        /// Axis id
        axis: u8,
    },
    /// The address is not in a writable RAM page
    #[snafu(display("Address 0x{address:04x} is not writable"))]
    InvalidMemoryAddress {
        /// The memory address
        address: u16,
    },
    /// A module memory access reaches past the 24-bit address space
    #[snafu(display("Memory range 0x{address:x} + {length} exceeds 0xffffff"))]
    MemoryRange {
        /// Start address
        address: u32,
        /// Length of the access in bytes
        length: usize,
    },
    /// The combination of move arguments is not supported
    #[snafu(display("Unsupported move: {reason}"))]
    UnsupportedMove {
        /// Explanation
        reason: &'static str,
    },
}

/// Result alias used throughout this crate
pub type Result<T> = std::result::Result<T, McsError>;
