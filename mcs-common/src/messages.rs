//! CAN frame representation shared by transports, the bus and the protocol layers

use core::time::Duration;

/// Maximum payload of a classic CAN frame
pub const MAX_DATA_LENGTH: usize = 8;

/// A CAN arbitration id
///
/// MCS telegrams use the standard 11-bit space, TML telegrams the extended 29-bit space. The two
/// spaces never overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CanId {
    /// An 11-bit standard id
    Std(u16),
    /// A 29-bit extended id
    Extended(u32),
}

impl CanId {
    /// Create a standard id, masking to 11 bits
    pub const fn std(id: u16) -> Self {
        Self::Std(id & 0x7FF)
    }

    /// Create an extended id, masking to 29 bits
    pub const fn extended(id: u32) -> Self {
        Self::Extended(id & 0x1FFF_FFFF)
    }

    /// Get the raw id value
    pub const fn raw(&self) -> u32 {
        match self {
            CanId::Std(id) => *id as u32,
            CanId::Extended(id) => *id,
        }
    }

    /// Returns true if this is a 29-bit extended id
    pub const fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

impl core::fmt::Display for CanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CanId::Std(id) => write!(f, "{id:04x} S"),
            CanId::Extended(id) => write!(f, "{id:08x} X"),
        }
    }
}

/// The shape of a frame as reported by the transport
///
/// Only [`FrameKind::Data`] frames carry MCS or TML telegrams. Everything else is reported so the
/// dispatcher can log it and drop it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FrameKind {
    /// An ordinary classic data frame
    #[default]
    Data,
    /// A remote transmission request
    Remote,
    /// An error frame; the payload holds the adapter's error bytes
    Error,
    /// A CAN-FD frame (including bit-rate-switch / error-state-indicator variants)
    Fd,
}

/// A single CAN frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CanMessage {
    id: CanId,
    dlc: u8,
    data: [u8; MAX_DATA_LENGTH],
    kind: FrameKind,
    timestamp: Option<Duration>,
}

impl CanMessage {
    /// Create a data frame
    ///
    /// Payload bytes past the eighth are ignored.
    pub fn new(id: CanId, data: &[u8]) -> Self {
        let dlc = data.len().min(MAX_DATA_LENGTH);
        let mut buf = [0u8; MAX_DATA_LENGTH];
        buf[..dlc].copy_from_slice(&data[..dlc]);
        Self {
            id,
            dlc: dlc as u8,
            data: buf,
            kind: FrameKind::Data,
            timestamp: None,
        }
    }

    /// Create a remote transmission request frame
    pub fn new_rtr(id: CanId) -> Self {
        Self {
            kind: FrameKind::Remote,
            ..Self::new(id, &[])
        }
    }

    /// Create an error frame carrying the adapter's error bytes
    pub fn new_error(id: CanId, data: &[u8]) -> Self {
        Self {
            kind: FrameKind::Error,
            ..Self::new(id, data)
        }
    }

    /// Return a copy of the frame with a different kind
    pub fn with_kind(self, kind: FrameKind) -> Self {
        Self { kind, ..self }
    }

    /// Return a copy of the frame with a timestamp attached
    pub fn with_timestamp(self, timestamp: Duration) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self
        }
    }

    /// The arbitration id
    pub fn id(&self) -> CanId {
        self.id
    }

    /// The payload
    pub fn data(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }

    /// Number of payload bytes
    pub fn dlc(&self) -> usize {
        self.dlc as usize
    }

    /// The frame kind
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Returns true for remote transmission requests
    pub fn is_rtr(&self) -> bool {
        self.kind == FrameKind::Remote
    }

    /// Returns true for error frames
    pub fn is_error(&self) -> bool {
        self.kind == FrameKind::Error
    }

    /// Time stamp in the adapter's time base, if known
    pub fn timestamp(&self) -> Option<Duration> {
        self.timestamp
    }
}

impl core::fmt::Display for CanMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let ts = self.timestamp.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        write!(f, "Timestamp: {ts:>17.6} ID: {:>10} ", self.id)?;
        match self.kind {
            FrameKind::Data => {}
            FrameKind::Remote => write!(f, "R ")?,
            FrameKind::Error => write!(f, "E ")?,
            FrameKind::Fd => write!(f, "F ")?,
        }
        write!(f, "DLC: {} ", self.dlc)?;
        for b in self.data() {
            write!(f, " {b:02x}")?;
        }
        Ok(())
    }
}
