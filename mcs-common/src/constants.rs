//! Opcodes, info ids and timing constants of the MCS telegram protocol
//!
//!

use core::time::Duration;

/// First byte of every MCS telegram
pub mod opcodes {
    /// Info-0 status telegram (module to master)
    pub const INFO_STATUS: u8 = 0x00;
    /// Info-1 error/warning code telegram (module to master)
    pub const INFO_ERROR: u8 = 0x01;
    /// Info-3 firmware version telegram (module to master)
    pub const INFO_FIRMWARE: u8 = 0x03;
    /// Info-5 hardware configuration telegram (module to master)
    pub const INFO_HARDWARE: u8 = 0x05;
    /// Info-6 communication error telegram (module to master)
    pub const INFO_COM_ERROR: u8 = 0x06;
    /// Info request
    pub const INFO: u8 = 0x1b;
    /// Reset
    pub const RESET: u8 = 0x1c;
    /// Init boot loader
    pub const INIT_BOOT: u8 = 0x1d;
    /// Init
    pub const INIT: u8 = 0x22;
    /// Move
    pub const MOVE: u8 = 0x23;
    /// Move to a discrete position
    pub const MOVE_DISCRETE: u8 = 0x24;
    /// Rotate
    pub const ROTATE: u8 = 0x25;
    /// Request position and speed
    pub const GET_MOVE: u8 = 0x26;
    /// Position and speed answer
    pub const MOVE_DATA: u8 = 0x27;
    /// Set acceleration and deceleration
    pub const SET_RAMPING: u8 = 0x28;
    /// Request acceleration and deceleration
    pub const GET_RAMPING: u8 = 0x29;
    /// Ramping answer
    pub const RAMPING_DATA: u8 = 0x2a;
    /// Store a discrete position
    pub const SET_DISCRETE_POSITION: u8 = 0x2b;
    /// Request a discrete position
    pub const GET_DISCRETE_POSITION: u8 = 0x2c;
    /// Discrete position answer
    pub const DISCRETE_POSITION_DATA: u8 = 0x2d;
    /// Stop
    pub const STOP: u8 = 0x2f;
    /// Set port value
    pub const SET_PORT: u8 = 0x40;
    /// Request port value
    pub const GET_PORT: u8 = 0x41;
    /// Port value answer
    pub const PORT_DATA: u8 = 0x42;
    /// Set port mode
    pub const SET_PORT_MODE: u8 = 0x43;
    /// Request port mode
    pub const GET_PORT_MODE: u8 = 0x44;
    /// Port mode answer
    pub const PORT_MODE_DATA: u8 = 0x45;
    /// Set port parameter
    pub const SET_PORT_PARAMETER: u8 = 0x49;
    /// Request port parameter
    pub const GET_PORT_PARAMETER: u8 = 0x4a;
    /// Port parameter answer
    pub const PORT_PARAMETER_DATA: u8 = 0x4b;
    /// Zero a port
    pub const SET_PORT_ZERO: u8 = 0x4c;
    /// Request auxiliary data
    pub const GET_AUX_DATA: u8 = 0x53;
    /// Auxiliary data answer
    pub const AUX_DATA: u8 = 0x54;
    /// Set auxiliary data
    pub const SET_AUX_DATA: u8 = 0x55;
    /// Request parameter value
    pub const GET_PARAMETER: u8 = 0xdb;
    /// Parameter value answer
    pub const PARAMETER_DATA: u8 = 0xdc;
    /// Set parameter value
    pub const SET_PARAMETER: u8 = 0xde;
    /// Set target value
    pub const SET_TARGET_VALUE: u8 = 0xe2;
    /// Set target value, legacy form
    pub const SET_TARGET_VALUE_LEGACY: u8 = 0xe5;
    /// Operate
    pub const OPERATE: u8 = 0xef;
    /// Switch to boot loader
    pub const GO_BOOT: u8 = 0xf8;
    /// Switch to main program
    pub const GO_MAIN: u8 = 0xf9;
    /// Set boot mode
    pub const SET_BOOT_MODE: u8 = 0xfa;
    /// Request memory content
    pub const GET_MEM: u8 = 0xfb;
    /// Memory content answer
    pub const MEM_DATA: u8 = 0xfc;
    /// Erase memory
    pub const ERASE_MEM: u8 = 0xfd;
    /// Write memory
    pub const SET_MEM: u8 = 0xfe;
}

/// Values of the third byte of an info-0 telegram
pub mod ack {
    /// A pure state change notification, not an answer to any command
    pub const STATE_CHANGE: u8 = 0x00;
    /// The module rejected the last command
    pub const NACK: u8 = 0xff;
}

/// Reset mask bits
pub mod reset_mask {
    /// Clear warning bit and warning code
    pub const WARNING: u8 = 0x01;
    /// Clear error bit, error code and communication error code
    pub const ERROR: u8 = 0x02;
    /// Stop all activities
    pub const STOP: u8 = 0x04;
    /// Put the module into NOT-INIT state
    pub const NOT_INIT: u8 = 0x08;
    /// Reset counters and other local data
    pub const COUNTERS: u8 = 0x20;
    /// Reset all port modes to normal
    pub const PORTS: u8 = 0x40;
    /// Equivalent to a power cycle
    pub const ALL: u8 = 0xff;
}

/// Capacity of each device's inbound buffer
pub const DEVICE_BUFFER_SIZE: usize = 5;
/// Capacity of the TML receive queue
pub const TML_QUEUE_SIZE: usize = 32;
/// Capacity of each device's diagnostic history
pub const DEVICE_HISTORY_SIZE: usize = 16;
/// Capacity of the bus-wide diagnostic history
pub const BUS_HISTORY_SIZE: usize = 512;
/// Number of frames logged by default when dumping recent traffic
pub const DEFAULT_LOG_LENGTH: usize = 20;

/// Time a module has to answer a command
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(300);
/// Poll interval while waiting for an answer
pub const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(2);
/// Time allowed to acquire a device's command lock
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(1);
/// Poll interval while waiting for the busy flag to clear
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Default budget when waiting for the busy flag to clear
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Settle time after all discovery requests are out
pub const SCAN_SETTLE_TIME: Duration = Duration::from_millis(300);
/// Gap between consecutive discovery requests
pub const SCAN_REQUEST_GAP: Duration = Duration::from_millis(1);
/// Bound on joining the reader thread
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause before a TML answer is taken from the receive queue
pub const TML_SETTLE_TIME: Duration = Duration::from_millis(100);
/// Poll interval while waiting for a TML answer
pub const TML_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Time a TML answer may take after the settle time
pub const TML_RECEIVE_WINDOW: Duration = Duration::from_millis(50);
/// Poll interval of an axis waiting for motion complete
pub const TML_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
