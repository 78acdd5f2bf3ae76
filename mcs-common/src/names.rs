//! Human readable names for telegrams, used in logs and diagnostics

use crate::messages::{CanId, CanMessage, FrameKind};
use crate::tml::TmlId;

/// Name of an MCS telegram given its first byte
pub fn command_name(opcode: u8) -> &'static str {
    match opcode {
        0x00 => "status info",
        0x01 => "error info",
        0x03 => "firmware info",
        0x05 => "hardware info",
        0x06 => "com error info",
        0x1b => "info request",
        0x1c => "reset",
        0x1d => "init boot",
        0x22 => "init",
        0x23 => "move",
        0x24 => "move discrete",
        0x25 => "rotate",
        0x26 => "get move",
        0x27 => "move data",
        0x28 => "set ramping",
        0x29 => "get ramping",
        0x2a => "ramping data",
        0x2b => "set discrete position",
        0x2c => "get discrete position",
        0x2d => "discrete position data",
        0x2f => "stop",
        0x40 => "set port",
        0x41 => "get port",
        0x42 => "port data",
        0x43 => "set port mode",
        0x44 => "get port mode",
        0x45 => "port mode data",
        0x49 => "set port parameter",
        0x4a => "get port parameter",
        0x4b => "port parameter data",
        0x4c => "set port zero",
        0x53 => "get aux data",
        0x54 => "aux data",
        0x55 => "set aux data",
        0xdb => "get parameter",
        0xdc => "parameter data",
        0xde => "set parameter",
        0xe2 => "set target value",
        0xe5 => "set target value (legacy)",
        0xef => "operate",
        0xf8 => "go boot",
        0xf9 => "go main",
        0xfa => "set boot mode",
        0xfb => "get mem",
        0xfc => "mem data",
        0xfd => "erase mem",
        0xfe => "set mem",
        _ => "?",
    }
}

/// Name of a TML opcode sent by the host
pub fn tml_opcode_name(opcode: u16) -> Option<&'static str> {
    let name = match opcode {
        0x0002 => "AXISOFF",
        0x0102 => "AXISON",
        0x0104 => "STOP0",
        0x0144 => "STOP1",
        0x0184 => "STOP2",
        0x01C4 => "STOP3",
        0x0108 => "UPD",
        0x0402 => "RESET",
        0x0681 => "DISLSN",
        0x1C02 => "ABORT",
        0x22AC => "HOMECRT0",
        0x22AD => "HOMETIME0",
        0x2CB2 => "STA",
        0x5909 => "SET BITS",
        0xB204 | 0xB208 => "read 16-bit",
        0xB205 | 0xB209 => "read 32-bit",
        _ => match opcode & 0xFE00 {
            0x2000 | 0x2200 => "write 16-bit",
            0x2400 | 0x2600 => "write 32-bit",
            0xEA00 => "CALL homing",
            _ => return None,
        },
    };
    Some(name)
}

/// Name of a TML operation category
pub fn tml_category_name(category: u8) -> Option<&'static str> {
    let name = match category {
        0x00 => "motion control",
        0x02 => "reset",
        0x03 => "limit switch",
        0x0e => "abort",
        0x10 => "write 16-bit RAM 0x200",
        0x11 => "write 16-bit RAM 0x800",
        0x12 => "write 32-bit RAM 0x200",
        0x13 => "write 32-bit RAM 0x800",
        0x16 => "copy 32-bit",
        0x2c => "set/reset bits",
        0x59 => "GiveMeData2",
        0x6a => "TakeData2",
        0x75 => "homing call",
        _ => return None,
    };
    Some(name)
}

/// Category of answers sent by an axis
const TML_SLAVE_CATEGORY: u8 = 0x6a;

/// Render a frame for the traffic log
///
/// Standard frames get the command name appended; extended frames get the decoded TML id fields,
/// the opcode and its name.
pub fn describe(msg: &CanMessage) -> String {
    let mut txt = msg.to_string();
    if msg.kind() != FrameKind::Data {
        return txt;
    }
    match msg.id() {
        CanId::Std(_) => {
            if let Some(first) = msg.data().first() {
                txt = format!("{txt:<70} {}", command_name(*first));
            }
        }
        CanId::Extended(raw) => {
            let id = TmlId::decode(raw);
            let opcode_name = if id.category == TML_SLAVE_CATEGORY {
                "-slave-"
            } else {
                tml_opcode_name(id.opcode()).unwrap_or("-")
            };
            txt = format!(
                "{txt:<70} | {:02x} {:x} {:x} {:x} {:3x} | {:04x} {opcode_name} ({})",
                id.category,
                id.aux_low,
                id.axis,
                id.aux_high,
                id.operand,
                id.opcode(),
                tml_category_name(id.category).unwrap_or("-"),
            );
        }
    }
    txt
}

/// Built-in names of known modules, keyed by module address
pub fn default_device_name(address: u8) -> Option<&'static str> {
    DEVICE_NAMES
        .iter()
        .find(|(a, _)| *a == address)
        .map(|(_, name)| *name)
}

/// Look up a module address by its built-in name, ignoring case
pub fn address_by_name(name: &str) -> Option<u8> {
    DEVICE_NAMES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|(a, _)| *a)
}

const DEVICE_NAMES: &[(u8, &str)] = &[
    (0x01, "stepper valve 0"),
    (0x02, "stepper valve 1"),
    (0x03, "stepper valve 2"),
    (0x04, "stepper valve 3"),
    (0x05, "stepper valve 4"),
    (0x06, "fld stepper pump"),
    (0x07, "stepper pump"),
    (0x08, "magnet 0"),
    (0x09, "magnet 1"),
    (0x0a, "xyz code reader"),
    (0x0b, "solenoid strobe"),
    (0x0d, "xyz camera"),
    (0x0e, "xyz lock 0"),
    (0x0f, "xyz lock 1"),
    (0x11, "xyz piezo drive"),
    (0x12, "needle arm y"),
    (0x13, "needle arm z"),
    (0x14, "servo pump 0"),
    (0x15, "servo pump 1"),
    (0x17, "needle-mixer"),
    (0x18, "waste pump. dual servo 0"),
    (0x19, "waste pump. dual servo 1"),
    (0x1a, "waste-dc-pump"),
    (0x1b, "rack detection"),
    (0x20, "laser boot"),
    (0x21, "laser 0"),
    (0x22, "laser 1"),
    (0x23, "laser 2"),
    (0x24, "fld fan"),
    (0x25, "laser base board"),
    (0x27, "fld liquid detection"),
    (0x31, "syringe pump 0"),
    (0x32, "syringe pump 1"),
    (0x33, "pressure sensor"),
    (0x36, "fld-dc-pump"),
    (0x37, "fld-pinch-valves"),
    (0x38, "led door"),
    (0x39, "led bottles"),
    (0x3a, "bottle detect"),
    (0x3b, "fld pressure-sensor"),
    (0x3c, "power led"),
    (0x41, "bss"),
    (0x42, "standby control"),
    (0x43, "buffer supply lhs boot"),
    (0x44, "buffer supply lhs 0"),
    (0x45, "buffer supply lhs 1"),
    (0x48, "led door temperature"),
    (0x49, "led bottles temperature"),
    (0x51, "remote port. valve"),
    (0x52, "remote port pump"),
    (0x53, "hts stepper pump"),
    (0x54, "ves"),
    (0x55, "stepper boot"),
    (0x56, "stepper magnet 0"),
    (0x57, "stepper magnet 1"),
    (0x58, "stepper pump"),
    (0x60, "pnm boot"),
    (0x61, "pnm 0"),
    (0x62, "pnm 1"),
    (0x63, "pnm 2"),
    (0x64, "pnm 3"),
    (0x65, "pnm 4"),
    (0x66, "pnm 5"),
    (0x67, "pnm 6"),
    (0x68, "pnm 7"),
    (0x70, "cpc sample drive"),
    (0x71, "cpc vacuum"),
    (0x72, "cpc compressor"),
    (0x73, "cpc waste line"),
    (0x74, "fan-cio fan 0"),
    (0x75, "fan-cio fan 1"),
    (0x76, "fan-cio fan 2"),
    (0x77, "fan-cio fan 3"),
    (0x78, "fan-cio power monitor"),
    (0x81, "pressure generation unit"),
    (0x82, "pressure control unit 0"),
    (0x83, "pressure control unit 1"),
    (0x84, "pressure control unit 2"),
    (0x85, "pressure control unit 3"),
    (0x86, "pressure control unit 4"),
    (0x87, "pressure control unit 5"),
    (0x88, "pressure control unit 6"),
    (0x91, "mini sampler"),
    (0x92, "bio shake"),
    (0x94, "dual servo 625 0"),
    (0x95, "dual servo 625 1"),
    (0x96, "dual servo 625 2"),
    (0x97, "dual servo 625 3"),
    (0x98, "dual servo 625 4"),
    (0x99, "dual servo 625 5"),
    (0x9f, "sampler carriage"),
    (0xa1, "sampler carriage shaker axis"),
    (0xa2, "sampler carriage shaker"),
    (0xa3, "sampler carriage shaker sledge"),
    (0xb1, "tec"),
    (0xb2, "gas mix"),
    (0xb3, "icp peristaltic pump"),
    (0xb4, "icp solenoid valves"),
    (0xb5, "icp servo"),
    (0xb6, "icp slider"),
    (0xb7, "icp magnet"),
    (0xb8, "icp cover lock"),
    (0xb9, "icp backplane connector"),
    (0xba, "icp camera"),
    (0xbb, "icp devices"),
    (0xbc, "flash light boot"),
    (0xbd, "flash light module"),
    (0xbe, "flash light heater"),
    (0xbf, "interlayer camera"),
    (0xc0, "microscope camera"),
    (0xc1, "electroporator"),
    (0xc2, "electroporator magnetic valve"),
    (0xcf, "external temperature sensor board"),
    (0xf1, "foot switch"),
];
