//! Typed arguments and decoded answers of MCS commands

use int_enum::IntEnum;

/// Info telegram ids understood by the info request
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum InfoId {
    /// Status byte
    Status = 0,
    /// Error and warning codes
    Error = 1,
    /// Firmware version
    FirmwareVersion = 3,
    /// Hardware configuration
    HardwareConfiguration = 5,
    /// Communication error code of the last NACK
    ComError = 6,
}

/// Operating mode of a port
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum PortMode {
    /// Plain input or output
    Normal = 0x00,
    /// Stops the module when the port condition becomes true
    Stop = 0x02,
    /// Sets the DATA status bit when the port condition becomes true
    Auto = 0x20,
}

/// Conversion and limit parameters attached to a port
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum PortParameter {
    /// Offset, in user units
    Offset = 0,
    /// Divisor
    Divisor = 1,
    /// Multiplier
    Multiplier = 2,
    /// Delta
    Delta = 3,
    /// Lower limit
    LowerLimit = 4,
    /// Upper limit
    UpperLimit = 5,
    /// Target value
    Target = 6,
}

/// Direction of a move to a discrete position
///
/// The value is OR-ed into the position id.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntEnum)]
pub enum Direction {
    /// Counter clockwise
    #[default]
    Ccw = 0x00,
    /// Clockwise
    Cw = 0x80,
    /// Whichever way is shorter
    Shortest = 0x40,
}

/// Direction of a rotation
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum Rotation {
    /// Clockwise
    Cw = 0,
    /// Counter clockwise
    Ccw = 1,
}

/// Firmware version as reported by an info-3 telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// The raw info-3 payload
    pub raw: [u8; 8],
}

impl FirmwareVersion {
    /// Decode from an info-3 payload
    ///
    /// Returns None if the payload is shorter than eight bytes.
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        Some(Self {
            raw: data.get(..8)?.try_into().ok()?,
        })
    }

    /// Version of research firmware as `(major, minor, patch, suffix)`
    pub fn as_tuple(&self) -> (u8, u8, u8, char) {
        (self.raw[4], self.raw[5], self.raw[6], self.raw[7] as char)
    }

    /// Version string of research firmware, e.g. `2.1.1.r`
    pub fn research_string(&self) -> String {
        let (major, minor, patch, suffix) = self.as_tuple();
        format!("{major}.{minor}.{patch}.{suffix}")
    }

    /// Version string of medical firmware, e.g. `I_123456_7`
    ///
    /// Bytes 4..8 hold a little endian build number. Numbers above 9999999 are external builds and
    /// are prefixed with `E`.
    pub fn medical_string(&self) -> String {
        let number = u32::from_le_bytes([self.raw[4], self.raw[5], self.raw[6], self.raw[7]]);
        let (prefix, number) = if number > 9_999_999 {
            ('E', number % 10_000_000)
        } else {
            ('I', number)
        };
        format!("{prefix}_{:06}_{}", number / 10, number % 10)
    }
}

/// Hardware related data reported by an info-5 telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareConfiguration {
    /// 0: main program running, 1: boot loader running
    pub controller_mode: u8,
    /// Id used by the boot loader; may differ from the main id
    pub boot_id: u8,
    /// Hardware revision
    pub hardware_version: u8,
    /// Boot block used when flashing
    pub boot_block: u16,
    /// Main block used when flashing
    pub main_block: u16,
}

impl HardwareConfiguration {
    /// Decode from an info-5 payload
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        Some(Self {
            controller_mode: data[1],
            boot_id: data[2],
            hardware_version: data[3],
            boot_block: u16::from_le_bytes([data[4], data[5]]),
            main_block: u16::from_le_bytes([data[6], data[7]]),
        })
    }
}

/// Interpret the low `len` bytes of `value` as a two's complement number
pub fn sign_extend(value: u32, len: usize) -> i64 {
    match len {
        0 => 0,
        1..=3 => {
            let bits = len * 8;
            let value = value as i64 & ((1 << bits) - 1);
            if value & (1 << (bits - 1)) != 0 {
                value - (1 << bits)
            } else {
                value
            }
        }
        _ => value as i32 as i64,
    }
}

/// Decode an unsigned little endian number of up to four bytes
pub fn decode_le(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .enumerate()
        .fold(0, |acc, (i, b)| acc | (*b as u32) << (8 * i))
}

/// Decode a little endian number, optionally signed
pub fn decode_value(bytes: &[u8], signed: bool) -> i64 {
    let raw = decode_le(bytes);
    if signed {
        sign_extend(raw, bytes.len())
    } else {
        raw as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend() {
        assert_eq!(-1, sign_extend(0xFFFF, 2));
        assert_eq!(0x7FFF, sign_extend(0x7FFF, 2));
        assert_eq!(-128, sign_extend(0x80, 1));
        assert_eq!(-1, sign_extend(0xFFFF_FFFF, 4));
        assert_eq!(i32::MIN as i64, sign_extend(0x8000_0000, 4));
        assert_eq!(0, sign_extend(0x1234, 0));
    }

    #[test]
    fn test_decode_value() {
        assert_eq!(200, decode_value(&[200, 0], false));
        assert_eq!(-1, decode_value(&[0xFF, 0xFF], true));
        assert_eq!(0xFFFF, decode_value(&[0xFF, 0xFF], false));
        assert_eq!(0x0403_0201, decode_value(&[1, 2, 3, 4], false));
    }

    #[test]
    fn test_firmware_version_strings() {
        let research = FirmwareVersion::from_payload(&[3, 0, 0, 0, 2, 1, 1, b'r']).unwrap();
        assert_eq!("2.1.1.r", research.research_string());
        assert_eq!((2, 1, 1, 'r'), research.as_tuple());

        let n: u32 = 1_234_567;
        let b = n.to_le_bytes();
        let medical = FirmwareVersion::from_payload(&[3, 0, 0, 0, b[0], b[1], b[2], b[3]]).unwrap();
        assert_eq!("I_123456_7", medical.medical_string());

        let n: u32 = 11_234_567;
        let b = n.to_le_bytes();
        let external = FirmwareVersion::from_payload(&[3, 0, 0, 0, b[0], b[1], b[2], b[3]]).unwrap();
        assert_eq!("E_123456_7", external.medical_string());

        assert!(FirmwareVersion::from_payload(&[3, 0, 0]).is_none());
    }

    #[test]
    fn test_hardware_configuration() {
        let hw = HardwareConfiguration::from_payload(&[5, 1, 0x28, 3, 0x34, 0x12, 0x78, 0x56]).unwrap();
        assert_eq!(1, hw.controller_mode);
        assert_eq!(0x28, hw.boot_id);
        assert_eq!(3, hw.hardware_version);
        assert_eq!(0x1234, hw.boot_block);
        assert_eq!(0x5678, hw.main_block);
    }

    #[test]
    fn test_enum_conversion() {
        assert_eq!(0x80u8, Direction::Cw.into());
        assert_eq!(Ok(PortMode::Auto), PortMode::try_from(0x20));
        assert!(InfoId::try_from(2).is_err());
    }
}
