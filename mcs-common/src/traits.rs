//! Common traits

use snafu::Snafu;

use crate::messages::CanMessage;

/// Errors reported by a [`CanTransport`]
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum TransportError {
    /// The adapter could not be opened
    #[snafu(display("Failed to open CAN adapter: {message}"))]
    Open {
        /// Report from the adapter
        message: String,
    },
    /// A frame could not be sent
    #[snafu(display("Failed to send frame: {message}"))]
    Send {
        /// Report from the adapter
        message: String,
    },
    /// The adapter is not open
    #[snafu(display("CAN adapter is not open"))]
    NotOpen,
}

/// A CAN adapter shared by a reader thread and any number of command threads
///
/// All methods take `&self`; implementations do their own synchronization.
pub trait CanTransport: Send + Sync {
    /// Open the adapter. Opening an open adapter is not an error.
    fn open(&self) -> Result<(), TransportError>;

    /// Close the adapter
    fn close(&self);

    /// Send one frame
    fn send(&self, msg: &CanMessage) -> Result<(), TransportError>;

    /// Read one frame if one arrives within a short, implementation defined time
    ///
    /// Received frames should carry a timestamp.
    fn read(&self) -> Option<CanMessage>;
}
