//! A simulated CAN bus with MCS modules and TML axes attached
//!
//! Frames sent by the host are answered synchronously by the addressed simulated module or axis;
//! the answers become readable after the module's response delay. Everything the host sends and
//! every answer the host reads is kept in a trace for assertions.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mcs_client::mcs_common::{
    constants::{ack, opcodes, reset_mask},
    tml::{opcodes as tml_opcodes, registers, sr32, TmlId, TmlInstruction},
    Address, CanId, CanMessage, CanTransport, Status, TransportError,
};

/// A simulated MCS module
#[derive(Debug, Clone)]
pub struct SimModule {
    pub status: u8,
    pub error_code: u16,
    pub warning_code: u16,
    pub com_error: u16,
    /// major, minor, patch, suffix
    pub firmware: [u8; 4],
    /// controller mode, boot id, hardware version, boot block, main block
    pub hardware: (u8, u8, u8, u16, u16),
    pub ports: HashMap<u8, Vec<u8>>,
    pub port_modes: HashMap<u8, u8>,
    pub port_parameters: HashMap<(u8, u8), Vec<u8>>,
    pub parameters: HashMap<u8, Vec<u8>>,
    /// Opcodes answered with a NACK
    pub nack: HashSet<u8>,
    /// Time the module reports busy after a motion or state command
    pub busy_time: Duration,
    /// Never clear the busy flag again
    pub stay_busy: bool,
    /// Delay before an answer can be read
    pub response_delay: Duration,
    pub position: i32,
    pub speed: i16,
    pub ramping: (u16, u16),
    pub discrete_positions: HashMap<u8, i32>,
    pub memory: HashMap<u32, u8>,
    pub aux: Vec<u8>,
}

impl Default for SimModule {
    fn default() -> Self {
        Self {
            status: Status::NOT_INITIALIZED,
            error_code: 0,
            warning_code: 0,
            com_error: 0,
            firmware: [2, 1, 1, b'r'],
            hardware: (0, 0x11, 3, 0x0010, 0x0020),
            ports: HashMap::new(),
            port_modes: HashMap::new(),
            port_parameters: HashMap::new(),
            parameters: HashMap::new(),
            nack: HashSet::new(),
            busy_time: Duration::ZERO,
            stay_busy: false,
            response_delay: Duration::from_millis(1),
            position: 0,
            speed: 0,
            ramping: (0, 0),
            discrete_positions: HashMap::new(),
            memory: HashMap::new(),
            aux: Vec::new(),
        }
    }
}

fn le_i32(bytes: &[u8]) -> i32 {
    let mut b = [0u8; 4];
    for (dst, src) in b.iter_mut().zip(bytes) {
        *dst = *src;
    }
    i32::from_le_bytes(b)
}

fn mem_address(d: &[u8]) -> u32 {
    u32::from_le_bytes([d[1], d[2], d[3], 0])
}

impl SimModule {
    fn state(&self, busy: bool) -> u8 {
        if busy {
            self.status | Status::BUSY
        } else {
            self.status & !Status::BUSY
        }
    }

    /// Answers to `d` as (delay, payload) pairs
    fn handle(&mut self, d: &[u8]) -> Vec<(Duration, Vec<u8>)> {
        let Some(&opcode) = d.first() else {
            return Vec::new();
        };
        let delay = self.response_delay;
        if self.nack.contains(&opcode) {
            self.com_error = 0x0001;
            return vec![(delay, vec![opcodes::INFO_STATUS, self.status, ack::NACK])];
        }
        let answer = |data: Vec<u8>| vec![(delay, data)];
        let mut busy = false;
        match opcode {
            opcodes::INFO => {
                let data = match d.get(1).copied().unwrap_or(0) {
                    opcodes::INFO_STATUS => vec![opcodes::INFO_STATUS, self.status],
                    opcodes::INFO_ERROR => {
                        let [e0, e1] = self.error_code.to_le_bytes();
                        let [w0, w1] = self.warning_code.to_le_bytes();
                        vec![opcodes::INFO_ERROR, 0, e0, e1, w0, w1, 0, 0]
                    }
                    opcodes::INFO_FIRMWARE => {
                        let [major, minor, patch, suffix] = self.firmware;
                        vec![opcodes::INFO_FIRMWARE, 0, 0, 0, major, minor, patch, suffix]
                    }
                    opcodes::INFO_HARDWARE => {
                        let (mode, boot_id, version, boot, main) = self.hardware;
                        let [b0, b1] = boot.to_le_bytes();
                        let [m0, m1] = main.to_le_bytes();
                        vec![opcodes::INFO_HARDWARE, mode, boot_id, version, b0, b1, m0, m1]
                    }
                    opcodes::INFO_COM_ERROR => {
                        let [c0, c1] = self.com_error.to_le_bytes();
                        vec![opcodes::INFO_COM_ERROR, c0, c1]
                    }
                    _ => vec![opcodes::INFO_STATUS, self.status, ack::NACK],
                };
                return answer(data);
            }
            opcodes::GET_PORT => {
                let port = d[1];
                let mut data = vec![opcodes::PORT_DATA, 0, port, 0];
                data.extend(self.ports.get(&port).cloned().unwrap_or_else(|| vec![0]));
                return answer(data);
            }
            opcodes::GET_PARAMETER => {
                let parameter = d[1];
                let mut data = vec![opcodes::PARAMETER_DATA, parameter];
                data.extend(
                    self.parameters
                        .get(&parameter)
                        .cloned()
                        .unwrap_or_else(|| vec![0; 4]),
                );
                return answer(data);
            }
            opcodes::GET_PORT_MODE => {
                let mode = self.port_modes.get(&d[1]).copied().unwrap_or(0);
                return answer(vec![opcodes::PORT_MODE_DATA, d[1], mode]);
            }
            opcodes::GET_PORT_PARAMETER => {
                let mut data = vec![opcodes::PORT_PARAMETER_DATA, 0, d[2], d[3]];
                data.extend(
                    self.port_parameters
                        .get(&(d[2], d[3]))
                        .cloned()
                        .unwrap_or_else(|| vec![0; 4]),
                );
                return answer(data);
            }
            opcodes::GET_MOVE => {
                let mut data = vec![opcodes::MOVE_DATA, 0];
                data.extend(self.position.to_le_bytes());
                data.extend(self.speed.to_le_bytes());
                return answer(data);
            }
            opcodes::GET_RAMPING => {
                let mut data = vec![opcodes::RAMPING_DATA];
                data.extend(self.ramping.0.to_le_bytes());
                data.extend(self.ramping.1.to_le_bytes());
                return answer(data);
            }
            opcodes::GET_DISCRETE_POSITION => {
                let position = self.discrete_positions.get(&d[1]).copied().unwrap_or(0);
                let mut data = vec![opcodes::DISCRETE_POSITION_DATA, d[1]];
                data.extend(position.to_le_bytes());
                return answer(data);
            }
            opcodes::GET_MEM => {
                let address = mem_address(d);
                let mut data = vec![opcodes::MEM_DATA];
                for i in 0..d[4] as u32 {
                    data.push(self.memory.get(&(address + i)).copied().unwrap_or(0xff));
                }
                return answer(data);
            }
            opcodes::GET_AUX_DATA => {
                let mut data = vec![opcodes::AUX_DATA];
                data.extend(&self.aux);
                return answer(data);
            }
            opcodes::RESET => {
                let mask = d[1];
                if mask & reset_mask::ERROR != 0 {
                    self.status &= !Status::ERROR;
                    self.error_code = 0;
                }
                if mask & reset_mask::WARNING != 0 {
                    self.status &= !Status::WARNING;
                    self.warning_code = 0;
                }
                if mask & reset_mask::NOT_INIT != 0 {
                    self.status |= Status::NOT_INITIALIZED;
                    self.status &= !Status::PREPARED;
                }
                busy = true;
            }
            opcodes::INIT => {
                self.status &= !Status::NOT_INITIALIZED;
                self.status |= Status::PREPARED;
                busy = true;
            }
            opcodes::OPERATE | opcodes::STOP | opcodes::SET_PORT_ZERO | opcodes::INIT_BOOT => {
                busy = true;
            }
            opcodes::SET_BOOT_MODE | opcodes::ERASE_MEM => {
                if opcode == opcodes::ERASE_MEM {
                    self.memory.clear();
                }
                busy = true;
            }
            opcodes::MOVE => {
                let target = le_i32(&d[2..6]);
                self.position = if d[1] == 1 {
                    self.position + target
                } else {
                    target
                };
                self.speed = i16::from_le_bytes([d[6], d[7]]);
                busy = true;
            }
            opcodes::ROTATE => {
                self.speed = i16::from_le_bytes([d[3], d[4]]);
                busy = true;
            }
            opcodes::MOVE_DISCRETE => {
                let id = d[2] & 0x3f;
                self.position = self.discrete_positions.get(&id).copied().unwrap_or(0);
                busy = true;
            }
            opcodes::SET_PORT => {
                self.ports.insert(d[2], d[4..].to_vec());
            }
            opcodes::SET_PARAMETER => {
                self.parameters.insert(d[1], d[2..].to_vec());
            }
            opcodes::SET_PORT_MODE => {
                self.port_modes.insert(d[1], d[2]);
            }
            opcodes::SET_PORT_PARAMETER => {
                self.port_parameters.insert((d[2], d[3]), d[4..].to_vec());
            }
            opcodes::SET_RAMPING => {
                self.ramping = (
                    u16::from_le_bytes([d[1], d[2]]),
                    u16::from_le_bytes([d[3], d[4]]),
                );
            }
            opcodes::SET_DISCRETE_POSITION => {
                let position = i16::from_le_bytes([d[2], d[3]]);
                self.discrete_positions.insert(d[1], position as i32);
            }
            opcodes::SET_MEM => {
                let address = mem_address(d);
                for (i, byte) in d[4..].iter().enumerate() {
                    self.memory.insert(address + i as u32, *byte);
                }
            }
            opcodes::SET_AUX_DATA => self.aux = d[1..].to_vec(),
            opcodes::SET_TARGET_VALUE
            | opcodes::SET_TARGET_VALUE_LEGACY
            | opcodes::GO_MAIN
            | opcodes::GO_BOOT => (),
            _ => {
                self.com_error = 0x0002;
                return answer(vec![opcodes::INFO_STATUS, self.status, ack::NACK]);
            }
        }

        let busy = busy && (self.stay_busy || !self.busy_time.is_zero());
        let mut answers = vec![(delay, vec![opcodes::INFO_STATUS, self.state(busy), opcode])];
        if busy && !self.stay_busy {
            answers.push((
                delay + self.busy_time,
                vec![opcodes::INFO_STATUS, self.state(false), ack::STATE_CHANGE],
            ));
        }
        answers
    }
}

/// A simulated Technosoft axis
#[derive(Debug, Clone)]
pub struct SimAxis {
    pub sr32: u32,
    /// 16-bit words by address; 32-bit values use two consecutive addresses, low word first
    pub memory: HashMap<u16, u16>,
    /// The axis is blocked: moves never reach their target
    pub blocked: bool,
    /// CPR is in effect: the next UPD moves relative to the target
    pub relative: bool,
}

impl Default for SimAxis {
    fn default() -> Self {
        let mut memory = HashMap::new();
        memory.insert(registers::ERRMAX_DEFAULT, 100);
        memory.insert(registers::TERRMAX_DEFAULT, 200);
        memory.insert(registers::SATS_DEFAULT, 32767 - 1000);
        Self {
            sr32: sr32::AXIS_ON | sr32::MOTION_COMPLETE,
            memory,
            blocked: false,
            relative: false,
        }
    }
}

impl SimAxis {
    pub fn read16(&self, address: u16) -> u16 {
        self.memory.get(&address).copied().unwrap_or(0)
    }

    pub fn read32(&self, address: u16) -> u32 {
        self.read16(address) as u32 | (self.read16(address + 1) as u32) << 16
    }

    pub fn write32(&mut self, address: u16, value: u32) {
        self.memory.insert(address, value as u16);
        self.memory.insert(address + 1, (value >> 16) as u16);
    }

    fn sr32_telegram(&self, axis: u8) -> TmlInstruction {
        TmlInstruction::new(
            tml_opcodes::TAKE_DATA_32 | axis as u16,
            &[registers::SR32, self.sr32 as u16, (self.sr32 >> 16) as u16],
        )
    }

    /// Answers to `instr` sent to `axis`
    fn handle(&mut self, axis: u8, instr: &TmlInstruction) -> Vec<TmlInstruction> {
        let opcode = instr.opcode;
        match opcode & 0xFE00 {
            0x2000 | 0x2200 | 0x2400 | 0x2600 => {
                let page = if opcode & 0x0200 == 0 { 0x200 } else { 0x800 };
                let address = page + (opcode & 0x1FF);
                let low = instr.word(0).unwrap_or(0);
                self.memory.insert(address, low);
                if opcode & 0x0400 != 0 {
                    self.memory.insert(address + 1, instr.word(1).unwrap_or(0));
                }
                return Vec::new();
            }
            _ => (),
        }
        if opcode & 0xFF00 == tml_opcodes::GIVE_ME_DATA {
            let address = instr.word(1).unwrap_or(0);
            if address == registers::SR32 {
                return vec![self.sr32_telegram(axis)];
            }
            let answer = if opcode & 1 == 1 {
                let value = self.read32(address);
                TmlInstruction::new(
                    tml_opcodes::TAKE_DATA_32 | axis as u16,
                    &[address, value as u16, (value >> 16) as u16],
                )
            } else {
                TmlInstruction::new(
                    tml_opcodes::TAKE_DATA_16 | axis as u16,
                    &[address, self.read16(address)],
                )
            };
            return vec![answer];
        }
        match opcode {
            tml_opcodes::SET_TARGET_TO_ACTUAL => {
                let apos = self.read32(registers::APOS);
                self.write32(registers::TPOS, apos);
            }
            tml_opcodes::SET_BITS => match (instr.word(0), instr.word(1)) {
                (Some(0xDFFF), Some(0x0000)) => self.relative = true,
                (Some(0xFFFF), Some(0x2000)) => self.relative = false,
                _ => (),
            },
            tml_opcodes::AXIS_ON => {
                self.sr32 |= sr32::AXIS_ON;
                return vec![self.sr32_telegram(axis)];
            }
            tml_opcodes::AXIS_OFF => {
                self.sr32 &= !sr32::AXIS_ON;
                return vec![self.sr32_telegram(axis)];
            }
            tml_opcodes::UPDATE => {
                let cpos = self.read32(registers::CPOS) as i32;
                let target = if self.relative {
                    self.read32(registers::TPOS) as i32 + cpos
                } else {
                    cpos
                };
                self.write32(registers::TPOS, target as u32);
                if self.blocked {
                    self.sr32 &= !(sr32::MOTION_COMPLETE | sr32::TARGET_REACHED);
                    self.memory.insert(registers::POS_ERR, 1000);
                } else {
                    self.write32(registers::APOS, target as u32);
                    self.memory.insert(registers::POS_ERR, 0);
                    self.sr32 |= sr32::MOTION_COMPLETE | sr32::TARGET_REACHED;
                }
                return vec![self.sr32_telegram(axis)];
            }
            _ => (),
        }
        Vec::new()
    }
}

#[derive(Default)]
struct SimState {
    modules: HashMap<u8, SimModule>,
    axes: HashMap<u8, SimAxis>,
    pending: VecDeque<(Instant, CanMessage)>,
    trace: Vec<CanMessage>,
}

/// A CAN bus with simulated modules and axes, usable as the transport of an `Mcs`
#[derive(Default)]
pub struct SimBus {
    state: Mutex<SimState>,
    open: AtomicBool,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a module answering on `address`
    pub fn add_module(&self, address: u8, module: SimModule) {
        self.state.lock().unwrap().modules.insert(address, module);
    }

    /// Attach an axis
    pub fn add_axis(&self, axis: u8, sim: SimAxis) {
        self.state.lock().unwrap().axes.insert(axis, sim);
    }

    /// Inspect or change a module
    pub fn with_module<T>(&self, address: u8, f: impl FnOnce(&mut SimModule) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(state.modules.get_mut(&address).expect("No such module"))
    }

    /// Inspect or change an axis
    pub fn with_axis<T>(&self, axis: u8, f: impl FnOnce(&mut SimAxis) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(state.axes.get_mut(&axis).expect("No such axis"))
    }

    /// Make a module send a frame on its own, e.g. a status change
    pub fn emit(&self, address: u8, data: &[u8]) {
        self.inject(CanMessage::new(Address::new(address).slave_id(), data));
    }

    /// Make an axis push its SR32
    pub fn emit_sr32(&self, axis: u8) {
        let instr = self.with_axis(axis, |a| a.sr32_telegram(axis));
        self.inject(instr.to_message(0));
    }

    /// Put an arbitrary frame on the bus
    pub fn inject(&self, msg: CanMessage) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back((Instant::now(), msg));
    }

    /// All frames sent by the host and read by the host, in order
    pub fn trace(&self) -> Vec<CanMessage> {
        self.state.lock().unwrap().trace.clone()
    }

    /// Payloads of the frames the host sent to `address`
    pub fn sent_to(&self, address: u8) -> Vec<Vec<u8>> {
        let id = Address::new(address).master_id();
        self.trace()
            .iter()
            .filter(|m| m.id() == id)
            .map(|m| m.data().to_vec())
            .collect()
    }

    /// TML instructions the host sent to `axis`
    pub fn sent_to_axis(&self, axis: u8) -> Vec<TmlInstruction> {
        self.trace()
            .iter()
            .filter(|m| matches!(m.id(), CanId::Extended(raw) if TmlId::decode(raw).axis == axis))
            .filter_map(TmlInstruction::from_message)
            .filter(|i| i.opcode & 0xFF00 != tml_opcodes::TAKE_DATA_16)
            .filter(|i| i.opcode & 0xFF00 != tml_opcodes::TAKE_DATA_32)
            .collect()
    }

    /// Forget the trace
    pub fn clear_trace(&self) {
        self.state.lock().unwrap().trace.clear();
    }
}

impl CanTransport for SimBus {
    fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn send(&self, msg: &CanMessage) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let mut state = self.state.lock().unwrap();
        state.trace.push(*msg);
        let now = Instant::now();
        match msg.id() {
            CanId::Std(id) if id >= 0x400 => {
                let address = (id & 0xff) as u8;
                let Some(module) = state.modules.get_mut(&address) else {
                    log::trace!("No simulated module at 0x{address:02x}");
                    return Ok(());
                };
                let answers = module.handle(msg.data());
                let slave_id = Address::new(address).slave_id();
                for (delay, data) in answers {
                    state
                        .pending
                        .push_back((now + delay, CanMessage::new(slave_id, &data)));
                }
            }
            CanId::Std(_) => (),
            CanId::Extended(raw) => {
                let axis = TmlId::decode(raw).axis;
                let Some(instr) = TmlInstruction::from_message(msg) else {
                    return Ok(());
                };
                let Some(sim) = state.axes.get_mut(&axis) else {
                    log::trace!("No simulated axis {axis}");
                    return Ok(());
                };
                let answers = sim.handle(axis, &instr);
                for answer in answers {
                    state.pending.push_back((now, answer.to_message(0)));
                }
            }
        }
        Ok(())
    }

    fn read(&self) -> Option<CanMessage> {
        if !self.open.load(Ordering::Acquire) {
            return None;
        }
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let index = state.pending.iter().position(|(due, _)| *due <= now)?;
        let (_, msg) = state.pending.remove(index)?;
        state.trace.push(msg);
        Some(msg)
    }
}
