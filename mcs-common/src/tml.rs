//! Codec for TML telegrams carried in extended CAN frames
//!
//! A master-to-axis id packs an operation category, the addressed axis and an operand id:
//!
//! ```text
//! bits  28..22    21..18    17..13  12..9     8..0
//!       category  aux high  axis    aux low   operand
//! ```
//!
//! The 16-bit opcode used for dispatch is `(category << 9) | operand`. Payload bytes form little
//! endian 16-bit words.

use crate::messages::{CanId, CanMessage};

/// Maximum number of data words in one TML telegram
pub const MAX_WORDS: usize = 4;
/// Default id of the host on the TML network
pub const DEFAULT_MASTER_ID: u8 = 255;
/// Number of axis ids that fit in the id field
pub const AXIS_COUNT: usize = 32;

const OPERAND_MASK: u32 = 0x1FF;
const NIBBLE_MASK: u32 = 0xF;
const AXIS_MASK: u32 = 0x1F;
const CATEGORY_MASK: u32 = 0x7F;
const AUX_LOW_SHIFT: u32 = 9;
const AXIS_SHIFT: u32 = 13;
const AUX_HIGH_SHIFT: u32 = 18;
const CATEGORY_SHIFT: u32 = 22;

/// The decoded fields of a 29-bit TML arbitration id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TmlId {
    /// Operation category, 7 bits
    pub category: u8,
    /// Addressed axis, 5 bits
    pub axis: u8,
    /// Operand id, 9 bits
    pub operand: u16,
    /// Auxiliary nibble at bits 9..12
    pub aux_low: u8,
    /// Auxiliary nibble at bits 18..21
    pub aux_high: u8,
}

impl TmlId {
    /// Id addressing `axis` with `opcode`
    pub const fn for_command(opcode: u16, axis: u8) -> Self {
        Self {
            category: (opcode >> 9) as u8,
            axis: axis & AXIS_MASK as u8,
            operand: opcode & OPERAND_MASK as u16,
            aux_low: 0,
            aux_high: 0,
        }
    }

    /// Split a raw 29-bit id into its fields
    pub const fn decode(raw: u32) -> Self {
        Self {
            category: ((raw >> CATEGORY_SHIFT) & CATEGORY_MASK) as u8,
            axis: ((raw >> AXIS_SHIFT) & AXIS_MASK) as u8,
            operand: (raw & OPERAND_MASK) as u16,
            aux_low: ((raw >> AUX_LOW_SHIFT) & NIBBLE_MASK) as u8,
            aux_high: ((raw >> AUX_HIGH_SHIFT) & NIBBLE_MASK) as u8,
        }
    }

    /// Pack the fields into a raw 29-bit id
    pub const fn encode(&self) -> u32 {
        ((self.category as u32 & CATEGORY_MASK) << CATEGORY_SHIFT)
            | ((self.aux_high as u32 & NIBBLE_MASK) << AUX_HIGH_SHIFT)
            | ((self.axis as u32 & AXIS_MASK) << AXIS_SHIFT)
            | ((self.aux_low as u32 & NIBBLE_MASK) << AUX_LOW_SHIFT)
            | (self.operand as u32 & OPERAND_MASK)
    }

    /// The 16-bit opcode
    pub const fn opcode(&self) -> u16 {
        ((self.category as u16) << 9) | self.operand
    }
}

/// A TML instruction: an opcode followed by up to four data words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmlInstruction {
    /// The 16-bit opcode
    pub opcode: u16,
    /// Data words
    pub words: heapless::Vec<u16, MAX_WORDS>,
}

impl TmlInstruction {
    /// Create an instruction
    ///
    /// Words past [`MAX_WORDS`] are dropped.
    pub fn new(opcode: u16, words: &[u16]) -> Self {
        let words = words.iter().take(MAX_WORDS).copied().collect();
        Self { opcode, words }
    }

    /// Parse an extended frame
    ///
    /// Returns None for standard frames.
    pub fn from_message(msg: &CanMessage) -> Option<Self> {
        let CanId::Extended(raw) = msg.id() else {
            return None;
        };
        let opcode = TmlId::decode(raw).opcode();
        let words = msg
            .data()
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(Self { opcode, words })
    }

    /// Build the frame sending this instruction to `axis`
    pub fn to_message(&self, axis: u8) -> CanMessage {
        let id = TmlId::for_command(self.opcode, axis).encode();
        let mut data = [0u8; 8];
        for (i, w) in self.words.iter().enumerate() {
            data[2 * i..2 * i + 2].copy_from_slice(&w.to_le_bytes());
        }
        CanMessage::new(CanId::extended(id), &data[..2 * self.words.len()])
    }

    /// Data word `n`, if present
    pub fn word(&self, n: usize) -> Option<u16> {
        self.words.get(n).copied()
    }

    /// If this is a 32-bit TakeData2 telegram carrying SR32, return `(axis, sr32)`
    pub fn sr32_push(&self) -> Option<(u8, u32)> {
        if self.opcode & 0xFF00 != opcodes::TAKE_DATA_32 || self.word(0)? != registers::SR32 {
            return None;
        }
        let sr32 = self.word(1)? as u32 | (self.word(2)? as u32) << 16;
        Some(((self.opcode & 0xFF) as u8, sr32))
    }

    /// True if this is the TakeData2 answer of `axis` to a `width` read of `address`
    pub fn answers_read(&self, axis: u8, address: u16, width: Width) -> bool {
        let take_data = match width {
            Width::Bits16 => opcodes::TAKE_DATA_16,
            Width::Bits32 => opcodes::TAKE_DATA_32,
        };
        self.opcode == take_data | axis as u16 && self.word(0) == Some(address)
    }
}

/// TML opcodes used by the host
pub mod opcodes {
    /// Axis off
    pub const AXIS_OFF: u16 = 0x0002;
    /// Axis on
    pub const AXIS_ON: u16 = 0x0102;
    /// Stop with voltage set to 0
    pub const STOP_VOLTAGE: u16 = 0x0104;
    /// Stop with current set to 0
    pub const STOP_CURRENT: u16 = 0x0144;
    /// Stop with speed set to 0
    pub const STOP_SPEED: u16 = 0x0184;
    /// Ramp down with the programmed deceleration
    pub const STOP_RAMP: u16 = 0x01C4;
    /// Update: start the programmed motion
    pub const UPDATE: u16 = 0x0108;
    /// Reset the drive, including its communication
    pub const RESET: u16 = 0x0402;
    /// Disable the negative limit switch input
    pub const DISABLE_LSN: u16 = 0x0681;
    /// Abort the running function
    pub const ABORT: u16 = 0x1C02;
    /// Write a 16-bit value to RAM page 0x200
    pub const WRITE_16_PAGE_200: u16 = 0x2000;
    /// Write a 16-bit value to RAM page 0x800
    pub const WRITE_16_PAGE_800: u16 = 0x2200;
    /// Write a 32-bit value to RAM page 0x200
    pub const WRITE_32_PAGE_200: u16 = 0x2400;
    /// Write a 32-bit value to RAM page 0x800
    pub const WRITE_32_PAGE_800: u16 = 0x2600;
    /// Clear the homing current threshold
    pub const HOME_CURRENT_ZERO: u16 = 0x22AC;
    /// Clear the homing time threshold
    pub const HOME_TIME_ZERO: u16 = 0x22AD;
    /// Copy the actual position into the target position
    pub const SET_TARGET_TO_ACTUAL: u16 = 0x2CB2;
    /// Set/clear bits of a control register
    pub const SET_BITS: u16 = 0x5909;
    /// Read request (GiveMeData2)
    pub const GIVE_ME_DATA: u16 = 0xB200;
    /// 16-bit read answer (TakeData2)
    pub const TAKE_DATA_16: u16 = 0xD400;
    /// 32-bit read answer (TakeData2)
    pub const TAKE_DATA_32: u16 = 0xD500;
    /// Call homing procedure `n`
    pub const HOMING: u16 = 0xEA00;
}

/// Drive registers and user variables
pub mod registers {
    /// Actual position
    pub const APOS: u16 = 0x0228;
    /// Position error
    pub const POS_ERR: u16 = 0x022A;
    /// Motor current
    pub const IQ: u16 = 0x0230;
    /// Current limit
    pub const SATS: u16 = 0x026B;
    /// Commanded position
    pub const CPOS: u16 = 0x029E;
    /// Commanded speed
    pub const CSPD: u16 = 0x02A0;
    /// Commanded acceleration
    pub const CACC: u16 = 0x02A2;
    /// Target position
    pub const TPOS: u16 = 0x02B2;
    /// Maximum control error
    pub const ERRMAX: u16 = 0x02C5;
    /// Maximum time the control error may exceed ERRMAX
    pub const TERRMAX: u16 = 0x02C6;
    /// Quick stop deceleration
    pub const CDEC: u16 = 0x0858;
    /// Motion error register
    pub const MER: u16 = 0x08FC;
    /// 32-bit status register
    pub const SR32: u16 = 0x090E;
    /// Position set at the end of homing
    pub const HOME_POS: u16 = 0x0992;
    /// Homing speed
    pub const HOME_SPD: u16 = 0x0994;
    /// User variable: axis has been homed
    pub const HOME_FLAG: u16 = 0x03B0;
    /// User variable: default current limit
    pub const SATS_DEFAULT: u16 = 0x03B1;
    /// User variable: default maximum control error
    pub const ERRMAX_DEFAULT: u16 = 0x03B2;
    /// User variable: default TERRMAX in ms
    pub const TERRMAX_DEFAULT: u16 = 0x03B3;
}

/// Width of a memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// One word
    Bits16,
    /// Two words
    Bits32,
}

/// Drive memory areas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    /// RAM 0x200..=0x3FF
    RamPage200,
    /// RAM 0x800..=0x9FF
    RamPage800,
    /// EEPROM 0x4000..=0x7FFF
    Eeprom,
    /// Anything else
    Other,
}

impl MemoryRegion {
    /// Classify an address
    pub const fn of(address: u16) -> Self {
        match address {
            0x200..=0x3FF => Self::RamPage200,
            0x800..=0x9FF => Self::RamPage800,
            0x4000..=0x7FFF => Self::Eeprom,
            _ => Self::Other,
        }
    }
}

/// Build a GiveMeData2 request for `address`
///
/// The answer is sent to `master_id`.
pub fn read_request(address: u16, width: Width, master_id: u8) -> TmlInstruction {
    let memory_type = match MemoryRegion::of(address) {
        MemoryRegion::Eeprom => 2,
        _ => 1,
    };
    let value_type = match width {
        Width::Bits16 => 0,
        Width::Bits32 => 1,
    };
    TmlInstruction::new(
        opcodes::GIVE_ME_DATA | (memory_type << 2) | value_type,
        &[(master_id as u16) << 4, address],
    )
}

/// Build a RAM write of `value` to `address`
///
/// Returns None if `address` is not in one of the writable RAM pages.
pub fn write_request(address: u16, value: u32, width: Width) -> Option<TmlInstruction> {
    let base = match (MemoryRegion::of(address), width) {
        (MemoryRegion::RamPage200, Width::Bits16) => opcodes::WRITE_16_PAGE_200,
        (MemoryRegion::RamPage800, Width::Bits16) => opcodes::WRITE_16_PAGE_800,
        (MemoryRegion::RamPage200, Width::Bits32) => opcodes::WRITE_32_PAGE_200,
        (MemoryRegion::RamPage800, Width::Bits32) => opcodes::WRITE_32_PAGE_800,
        _ => return None,
    };
    let opcode = base | (address & 0x1FF);
    let instr = match width {
        Width::Bits16 => TmlInstruction::new(opcode, &[value as u16]),
        Width::Bits32 => TmlInstruction::new(opcode, &[value as u16, (value >> 16) as u16]),
    };
    Some(instr)
}

/// SR32 status register bits
pub mod sr32 {
    /// Drive fault
    pub const FAULT: u32 = 1 << 31;
    /// Target reached
    pub const TARGET_REACHED: u32 = 1 << 25;
    /// Axis is on
    pub const AXIS_ON: u32 = 1 << 15;
    /// Motion is complete
    pub const MOTION_COMPLETE: u32 = 1 << 10;
}

const SR32_BITS: [(u32, &str); 16] = [
    (31, "Fault"),
    (30, "In Cam"),
    (29, "In freeze control"),
    (28, "In gear"),
    (27, "I2t warn Drive"),
    (26, "I2t warn Motor"),
    (25, "Target reached"),
    (24, "Capture event/interrupt"),
    (23, "LSN event"),
    (22, "LSP event"),
    (16, "ENDINIT executed"),
    (15, "Axis is on"),
    (14, "Event set has occurred"),
    (10, "Motion is completed"),
    (8, "Homing/CALLS active"),
    (7, "Homing/CALLS warning"),
];

const MER_BITS: [(u32, &str); 16] = [
    (15, "Enable Input is inactive"),
    (14, "Command Error"),
    (13, "Under Voltage"),
    (12, "Over Voltage"),
    (11, "Over temp. Drive"),
    (10, "Over temp. Motor"),
    (9, "I2t"),
    (8, "Over current"),
    (7, "LSN (limit) active"),
    (6, "LSP (limit) active"),
    (5, "Position wraparound"),
    (4, "Serial comm. error"),
    (3, "Control error"),
    (2, "Invalid setup data"),
    (1, "Short circuit"),
    (0, "CANbus error"),
];

fn describe_bits(value: u32, table: &[(u32, &str)]) -> String {
    let s: String = table
        .iter()
        .filter(|(bit, _)| (value >> bit) & 1 == 1)
        .map(|(_, name)| format!("|{name}"))
        .collect();
    if s.is_empty() {
        "-".to_string()
    } else {
        s
    }
}

/// Render the set SR32 bits, e.g. `|Axis is on|Motion is completed`
pub fn sr32_description(value: u32) -> String {
    describe_bits(value, &SR32_BITS)
}

/// Render the set bits of the motion error register
pub fn mer_description(value: u16) -> String {
    describe_bits(value as u32, &MER_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trip_full_space() {
        for category in 0..128u8 {
            for axis in 0..32u8 {
                for operand in 0..512u16 {
                    let id = TmlId {
                        category,
                        axis,
                        operand,
                        aux_low: (operand & 0xF) as u8,
                        aux_high: (category & 0xF) as u8,
                    };
                    let raw = id.encode();
                    assert!(raw < 1 << 29);
                    assert_eq!(id, TmlId::decode(raw));
                }
            }
        }
    }

    #[test]
    fn test_raw_round_trip_all_aux_nibbles() {
        for aux_low in 0..16u8 {
            for aux_high in 0..16u8 {
                let raw = (0x59 << 22) | ((aux_high as u32) << 18) | (7 << 13) | ((aux_low as u32) << 9) | 0x004;
                let id = TmlId::decode(raw);
                assert_eq!(aux_low, id.aux_low);
                assert_eq!(aux_high, id.aux_high);
                assert_eq!(raw, id.encode());
            }
        }
    }

    #[test]
    fn test_command_id_matches_wire_layout() {
        // Read request to axis 7, as captured on a real bus
        let id = TmlId::for_command(0xB204, 7);
        assert_eq!(0x1640E004, id.encode());
        assert_eq!(0xB204, TmlId::decode(0x1640E004).opcode());
        assert_eq!(7, TmlId::decode(0x1640E004).axis);

        let opcode = 0x0002;
        let axis = 7u32;
        let expected = ((opcode & 0xFE00) << 13) | (axis << 13) | (opcode & 0x01FF);
        assert_eq!(expected, TmlId::for_command(opcode as u16, axis as u8).encode());
    }

    #[test]
    fn test_instruction_from_message() {
        let msg = CanMessage::new(CanId::extended(0x1A9FE007), &[0xb1, 0x03, 0x05, 0x20]);
        let instr = TmlInstruction::from_message(&msg).unwrap();
        assert_eq!(0xD407, instr.opcode);
        assert_eq!(&[0x03b1, 0x2005], instr.words.as_slice());

        let std = CanMessage::new(CanId::std(0x11), &[0, 0, 0]);
        assert!(TmlInstruction::from_message(&std).is_none());
    }

    #[test]
    fn test_instruction_to_message() {
        let instr = TmlInstruction::new(opcodes::SET_BITS, &[0xDFFF, 0x0000]);
        let msg = instr.to_message(1);
        assert!(msg.id().is_extended());
        assert_eq!(&[0xFF, 0xDF, 0x00, 0x00], msg.data());
        assert_eq!(instr, TmlInstruction::from_message(&msg).unwrap());
    }

    #[test]
    fn test_sr32_push_detection() {
        let push = TmlInstruction::new(0xD503, &[registers::SR32, 0x0400, 0x8000]);
        assert_eq!(Some((3, 0x8000_0400)), push.sr32_push());

        let other_register = TmlInstruction::new(0xD503, &[registers::APOS, 0x0400, 0x8000]);
        assert_eq!(None, other_register.sr32_push());

        let short = TmlInstruction::new(0xD503, &[registers::SR32]);
        assert_eq!(None, short.sr32_push());

        let take16 = TmlInstruction::new(0xD403, &[registers::SR32, 0x0400]);
        assert_eq!(None, take16.sr32_push());
    }

    #[test]
    fn test_read_answer_matching() {
        let answer = TmlInstruction::new(0xD402, &[registers::APOS, 0x1111]);
        assert!(answer.answers_read(2, registers::APOS, Width::Bits16));
        assert!(!answer.answers_read(3, registers::APOS, Width::Bits16));
        assert!(!answer.answers_read(2, registers::TPOS, Width::Bits16));
        assert!(!answer.answers_read(2, registers::APOS, Width::Bits32));

        let sr32 = TmlInstruction::new(0xD501, &[registers::SR32, 0x0400, 0x8000]);
        assert!(sr32.answers_read(1, registers::SR32, Width::Bits32));
    }

    #[test]
    fn test_memory_requests() {
        let read = read_request(registers::SR32, Width::Bits32, DEFAULT_MASTER_ID);
        assert_eq!(0xB205, read.opcode);
        assert_eq!(&[0x0FF0, 0x090E], read.words.as_slice());

        let eeprom = read_request(0x4100, Width::Bits16, DEFAULT_MASTER_ID);
        assert_eq!(0xB208, eeprom.opcode);

        let write = write_request(registers::CPOS, 0x1234_5678, Width::Bits32).unwrap();
        assert_eq!(0x2400 | 0x09E, write.opcode);
        assert_eq!(&[0x5678, 0x1234], write.words.as_slice());

        let write = write_request(registers::TERRMAX_DEFAULT, 7, Width::Bits16).unwrap();
        assert_eq!(0x2000 | 0x1B3, write.opcode);

        let write = write_request(registers::HOME_SPD, 1, Width::Bits32).unwrap();
        assert_eq!(0x2600 | 0x194, write.opcode);

        assert!(write_request(0x4100, 1, Width::Bits16).is_none());
    }

    #[test]
    fn test_bit_descriptions() {
        assert_eq!("-", sr32_description(0));
        assert_eq!(
            "|Fault|Axis is on|Motion is completed",
            sr32_description(sr32::FAULT | sr32::AXIS_ON | sr32::MOTION_COMPLETE)
        );
        assert_eq!("|Over current|CANbus error", mer_description(0x0101));
    }
}
