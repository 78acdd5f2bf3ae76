//! The MCS module status byte

/// Status byte reported by a module in every info-0 telegram
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status(u8);

impl Status {
    /// Module needs an init command before it can operate
    pub const NOT_INITIALIZED: u8 = 0x01;
    /// Module is prepared for operation
    pub const PREPARED: u8 = 0x02;
    /// Module is busy executing a command
    pub const BUSY: u8 = 0x04;
    /// Module reports an error; the code is available via an info-1 request
    pub const ERROR: u8 = 0x08;
    /// Module reports a warning; the code is available via an info-1 request
    pub const WARNING: u8 = 0x10;
    /// A port in stop mode detected its condition
    pub const DETECTED: u8 = 0x40;
    /// A port in auto mode has data ready
    pub const DATA_READY: u8 = 0x80;

    const NAMES: [(u8, &'static str); 7] = [
        (Self::NOT_INITIALIZED, "not-init"),
        (Self::PREPARED, "prepared"),
        (Self::BUSY, "busy"),
        (Self::ERROR, "error"),
        (Self::WARNING, "warning"),
        (Self::DETECTED, "detected"),
        (Self::DATA_READY, "data"),
    ];

    /// Create from the raw byte
    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    /// Get the raw status byte
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Check whether every bit in `mask` is set
    pub const fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// The NOT-INIT flag
    pub const fn not_initialized(&self) -> bool {
        self.contains(Self::NOT_INITIALIZED)
    }

    /// The PREPARED flag
    pub const fn prepared(&self) -> bool {
        self.contains(Self::PREPARED)
    }

    /// The BUSY (active) flag
    pub const fn busy(&self) -> bool {
        self.contains(Self::BUSY)
    }

    /// The ERROR flag
    pub const fn error(&self) -> bool {
        self.contains(Self::ERROR)
    }

    /// The WARNING flag
    pub const fn warning(&self) -> bool {
        self.contains(Self::WARNING)
    }

    /// The DETECTED flag
    pub const fn detected(&self) -> bool {
        self.contains(Self::DETECTED)
    }

    /// The DATA flag
    pub const fn data_ready(&self) -> bool {
        self.contains(Self::DATA_READY)
    }
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#010b} {:#04x}", self.0, self.0)?;
        for (bit, name) in Self::NAMES {
            if self.contains(bit) {
                write!(f, " {name}")?;
            }
        }
        Ok(())
    }
}
