//! A handle to one MCS module
//!
//! The reader thread feeds received frames into [`Device::put_msg`]; command methods called from
//! application threads send a telegram, then take the answer from the device's inbound buffer.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use parking_lot::{Mutex, MutexGuard};
use paste::paste;

use mcs_common::{
    commands::{
        decode_value, Direction, FirmwareVersion, HardwareConfiguration, InfoId, PortMode,
        PortParameter, Rotation,
    },
    constants::{
        ack, opcodes, DEVICE_BUFFER_SIZE, DEVICE_HISTORY_SIZE, LOCK_TIMEOUT,
        RESPONSE_POLL_INTERVAL, RESPONSE_TIMEOUT, STATUS_POLL_INTERVAL,
    },
    names::describe,
    Address, CanMessage, ErrorCodes, Status,
};

use crate::{
    bus::Bus,
    error::{McsError, MemoryRangeSnafu, Result},
    wait::Wait,
};

/// Pause after switching between boot loader and main program
///
/// The module may answer on a different id afterwards.
const BOOT_SWITCH_SETTLE: Duration = Duration::from_secs(2);

/// Largest memory chunk written by one telegram
const SET_MEM_CHUNK: usize = 4;
/// Largest memory chunk read by one telegram
const GET_MEM_CHUNK: usize = 7;

/// Expected answer for commands that are acknowledged with a 3-byte info-0 telegram
macro_rules! ack_of {
    ($opcode: expr) => {
        &[Some(opcodes::INFO_STATUS), None, Some($opcode)]
    };
}

/// Encode the low `len` bytes of `value` little endian
fn encode_le(value: i64, len: u8) -> impl Iterator<Item = u8> {
    let bytes = (value as u32).to_le_bytes();
    bytes.into_iter().take(len.clamp(1, 4) as usize)
}

/// Size of a module's memory address space
const MEM_SPACE: u64 = 1 << 24;

fn check_mem_range(address: u32, length: usize) -> Result<()> {
    snafu::ensure!(
        address as u64 + length as u64 <= MEM_SPACE,
        MemoryRangeSnafu { address, length }
    );
    Ok(())
}

/// Three byte little endian memory address
fn address_bytes(address: u32) -> [u8; 3] {
    let b = address.to_le_bytes();
    [b[0], b[1], b[2]]
}

macro_rules! access_methods {
    ($type: ty, $signed: literal) => {
        paste! {
            #[doc = concat!("Read a port as ", stringify!($type))]
            pub fn [<get_port_ $type>](&self, port: u8) -> Result<$type> {
                Ok(self.get_port(port, $signed)? as $type)
            }

            #[doc = concat!("Write a ", stringify!($type), " port without waiting")]
            pub fn [<set_port_ $type>](&self, port: u8, value: $type) -> Result<()> {
                self.set_port(port, value as i64, size_of::<$type>() as u8, 0, Wait::NoWait)
            }

            #[doc = concat!("Read a parameter as ", stringify!($type))]
            pub fn [<get_parameter_ $type>](&self, parameter: u8) -> Result<$type> {
                Ok(self.get_parameter(parameter, $signed)? as $type)
            }

            #[doc = concat!("Write a ", stringify!($type), " parameter")]
            pub fn [<set_parameter_ $type>](&self, parameter: u8, value: $type) -> Result<()> {
                self.set_parameter(parameter, value as i64, size_of::<$type>() as u8)
            }
        }
    };
}

/// One MCS module on the bus
///
/// Shared as `Arc<Device>` between the registry, its reader thread and application code. Commands
/// to the same device are serialized by an internal lock, so at most one command waits for an
/// answer at any time and the next buffered frame is always the answer to it.
pub struct Device {
    address: Address,
    name: String,
    bus: Arc<Bus>,
    errors: Arc<ErrorCodes>,
    status: AtomicU8,
    error: AtomicU16,
    warning: AtomicU16,
    com_error: AtomicU16,
    buffer: ArrayQueue<CanMessage>,
    history: Mutex<VecDeque<CanMessage>>,
    lock: Mutex<()>,
    timeout: Mutex<Duration>,
}

impl core::fmt::Display for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.name, self.address)
    }
}

impl core::fmt::Debug for Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Create a device handle for `address`
    pub fn new(
        address: Address,
        name: impl Into<String>,
        bus: Arc<Bus>,
        errors: Arc<ErrorCodes>,
    ) -> Self {
        Self {
            address,
            name: name.into(),
            bus,
            errors,
            status: AtomicU8::new(0),
            error: AtomicU16::new(0),
            warning: AtomicU16::new(0),
            com_error: AtomicU16::new(0),
            buffer: ArrayQueue::new(DEVICE_BUFFER_SIZE),
            history: Mutex::new(VecDeque::with_capacity(DEVICE_HISTORY_SIZE)),
            lock: Mutex::new(()),
            timeout: Mutex::new(RESPONSE_TIMEOUT),
        }
    }

    /// The module address
    pub fn address(&self) -> Address {
        self.address
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time a command waits for its answer
    pub fn timeout(&self) -> Duration {
        *self.timeout.lock()
    }

    /// Change the time a command waits for its answer
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    /// Last status byte received
    pub fn status(&self) -> Status {
        Status::new(self.status.load(Ordering::Acquire))
    }

    /// Error code from the last info-1 answer; cleared when the error bit clears
    pub fn error_code(&self) -> u16 {
        self.error.load(Ordering::Acquire)
    }

    /// Warning code from the last info-1 answer; cleared when the warning bit clears
    pub fn warning_code(&self) -> u16 {
        self.warning.load(Ordering::Acquire)
    }

    /// Communication error code from the last info-6 answer
    pub fn com_error_code(&self) -> u16 {
        self.com_error.load(Ordering::Acquire)
    }

    /// Module is executing a command
    pub fn is_busy(&self) -> bool {
        self.status().busy()
    }

    /// Module reports an error
    pub fn has_error(&self) -> bool {
        self.status().error()
    }

    /// Module reports a warning
    pub fn has_warning(&self) -> bool {
        self.status().warning()
    }

    /// Module is prepared for operation
    pub fn is_prepared(&self) -> bool {
        self.status().prepared()
    }

    /// Module needs an init
    pub fn is_not_initialized(&self) -> bool {
        self.status().not_initialized()
    }

    /// A stop mode port fired
    pub fn has_detected(&self) -> bool {
        self.status().detected()
    }

    /// An auto mode port has data
    pub fn has_data(&self) -> bool {
        self.status().data_ready()
    }

    /// Number of frames waiting in the inbound buffer
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop all buffered frames
    pub fn clear_buffer(&self) {
        while self.buffer.pop().is_some() {}
    }

    /// Recent frames sent to or received from this device, oldest first
    pub fn history(&self) -> Vec<CanMessage> {
        self.history.lock().iter().copied().collect()
    }

    /// The recent frames rendered one per line
    pub fn history_text(&self) -> String {
        let mut text = format!("{self}: Call history:\n");
        for msg in self.history.lock().iter() {
            text.push_str(&describe(msg));
            text.push('\n');
        }
        text
    }

    fn push_history(&self, msg: CanMessage) {
        let mut history = self.history.lock();
        if history.len() == DEVICE_HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(msg);
    }

    /// Accept a frame received from the module
    ///
    /// Called by the reader thread only. Never blocks on the command lock. Pure state change
    /// notifications update the status and are not buffered. When the buffer is full the oldest
    /// frame is dropped.
    pub fn put_msg(&self, msg: CanMessage) {
        self.push_history(msg);
        let data = msg.data();
        let Some(&first) = data.first() else {
            log::error!("{self}: Empty frame received: {msg}");
            return;
        };
        match first {
            opcodes::INFO_STATUS => {
                let Some(&raw) = data.get(1) else {
                    log::error!("{self}: Malformed status frame: {msg}");
                    return;
                };
                self.status.store(raw, Ordering::Release);
                let status = Status::new(raw);
                if status.error() {
                    log::error!("{self}: Status: {status}");
                } else {
                    self.error.store(0, Ordering::Release);
                }
                if status.warning() {
                    log::warn!("{self}: Status: {status}");
                } else {
                    self.warning.store(0, Ordering::Release);
                }
                match data.get(2) {
                    Some(&ack::STATE_CHANGE) => return,
                    Some(&ack::NACK) => log::error!("{self}: Received NACK: {msg}"),
                    _ => {}
                }
            }
            opcodes::INFO_COM_ERROR if data.len() >= 3 => {
                self.com_error
                    .store(u16::from_le_bytes([data[1], data[2]]), Ordering::Release);
            }
            _ => {}
        }
        if let Some(dropped) = self.buffer.force_push(msg) {
            log::warn!("{self}: Buffer overflow: Discarding oldest message: {dropped}");
        }
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        match self.lock.try_lock_for(LOCK_TIMEOUT) {
            Some(guard) => Ok(guard),
            None => {
                self.bus.log_recent_commands(None);
                let history = self.history_text();
                log::error!("{self}: Cannot acquire lock for sending\n{history}");
                Err(McsError::LockTimeout {
                    address: self.address,
                    history,
                })
            }
        }
    }

    fn send_frame(&self, data: &[u8]) -> Result<()> {
        let sent = self.bus.send(self.address.master_id(), data)?;
        self.push_history(sent);
        Ok(())
    }

    /// Send a telegram without waiting for an answer
    ///
    /// With `block` the command lock is held while sending, so the frame does not interleave with
    /// a running command. Without it the lock is bypassed; only use that for diagnostics.
    pub fn send(&self, data: &[u8], block: bool) -> Result<()> {
        let _guard = if block { Some(self.acquire()?) } else { None };
        self.send_frame(data)
    }

    /// Take the next buffered frame, polling until `timeout`
    fn rcv(&self, timeout: Duration) -> Result<CanMessage> {
        let start = Instant::now();
        loop {
            if let Some(msg) = self.buffer.pop() {
                return Ok(msg);
            }
            if start.elapsed() >= timeout {
                let history = self.history_text();
                log::error!("{self}: Time out: no response\n{history}");
                return Err(McsError::Timeout {
                    address: self.address,
                    history,
                });
            }
            std::thread::sleep(RESPONSE_POLL_INTERVAL);
        }
    }

    fn violation(&self, reason: String) -> McsError {
        let history = self.history_text();
        log::error!("{reason}\n{history}");
        McsError::ProtocolViolation { reason, history }
    }

    /// Send a command and return its validated answer
    ///
    /// `expect` lists the expected leading bytes; `None` entries match anything. With `check_dlc`
    /// the answer must have exactly `expect.len()` bytes.
    fn transact(
        &self,
        data: &[u8],
        expect: &[Option<u8>],
        check_dlc: bool,
    ) -> Result<CanMessage> {
        let rsp = {
            let _guard = self.acquire()?;
            self.send_frame(data)?;
            self.rcv(self.timeout())?
        };
        log::trace!("{self}: received {rsp}");
        let is_error_request = data == [opcodes::INFO, u8::from(InfoId::Error)];
        let payload = rsp.data();

        if payload.first() == Some(&opcodes::INFO_STATUS) && payload.get(2) == Some(&ack::NACK) {
            if is_error_request {
                return Err(self.violation(format!("{self}: Error info request rejected")));
            }
            return Err(self.nack_error());
        }
        if (self.has_error() || self.has_warning()) && !is_error_request {
            log::debug!("{self}: Requesting error info");
            return Err(self.fault_error());
        }
        if rsp.id() != self.address.slave_id() {
            return Err(self.violation(format!(
                "{self}: Wrong CAN ID: received {}, expected {}",
                rsp.id(),
                self.address.slave_id()
            )));
        }
        if check_dlc && rsp.dlc() != expect.len() {
            return Err(self.violation(format!(
                "{self}: Wrong DLC: received {}, expected {}",
                rsp.dlc(),
                expect.len()
            )));
        }
        if payload.len() < expect.len() {
            return Err(self.violation(format!(
                "{self}: Short answer: received {} bytes, expected {}, message: {rsp}",
                payload.len(),
                expect.len()
            )));
        }
        for (i, (expected, received)) in expect.iter().zip(payload).enumerate() {
            if let Some(expected) = expected {
                if received != expected {
                    return Err(self.violation(format!(
                        "{self}: Wrong data {i}: received {received:02x}, expected {expected:02x}, message: {rsp}"
                    )));
                }
            }
        }
        Ok(rsp)
    }

    /// Query error and warning codes, falling back to the stored ones if the query fails
    fn query_codes(&self) -> (u16, u16) {
        self.info_error().unwrap_or_else(|e| {
            log::error!("{self}: Error info request failed: {e}");
            (self.error_code(), self.warning_code())
        })
    }

    fn nack_error(&self) -> McsError {
        let (error_code, warning_code) = self.query_codes();
        let history = self.history_text();
        log::error!("{self}: NACK received\n{history}");
        McsError::Nacked {
            address: self.address,
            error_code,
            warning_code,
            error_text: self.errors.error_text(error_code).to_string(),
            warning_text: self.errors.warning_text(warning_code).to_string(),
            history,
        }
    }

    fn fault_error(&self) -> McsError {
        let (error_code, warning_code) = self.query_codes();
        let history = self.history_text();
        log::error!(
            "{self}: Error 0x{error_code:x} '{}' and warning 0x{warning_code:x} '{}'\n{history}",
            self.errors.error_text(error_code),
            self.errors.warning_text(warning_code),
        );
        McsError::HardwareFault {
            address: self.address,
            error_code,
            warning_code,
            error_text: self.errors.error_text(error_code).to_string(),
            warning_text: self.errors.warning_text(warning_code).to_string(),
            history,
        }
    }

    /// Wait for the busy flag to clear, then fail if the module flags an error or warning
    ///
    /// [`Wait::NoWait`] skips the busy check and only checks the flags.
    pub fn wait(&self, wait: Wait) -> Result<()> {
        let start = Instant::now();
        if wait.waits() {
            while self.is_busy() {
                if wait.expired(start) {
                    let history = self.history_text();
                    log::error!(
                        "{self}: Time-out waiting for busy module: Status: {}\n{history}",
                        self.status()
                    );
                    return Err(McsError::Timeout {
                        address: self.address,
                        history,
                    });
                }
                std::thread::sleep(STATUS_POLL_INTERVAL);
            }
        }
        if self.has_error() || self.has_warning() {
            log::debug!("{self}: Has error or warning");
            return Err(self.fault_error());
        }
        Ok(())
    }

    fn wait_if(&self, wait: Wait) -> Result<()> {
        if wait.waits() {
            self.wait(wait)
        } else {
            Ok(())
        }
    }

    /// Send an info request and return the answer, which echoes `id` in its first byte
    pub fn info(&self, id: u8) -> Result<CanMessage> {
        self.transact(&[opcodes::INFO, id], &[Some(id)], false)
    }

    /// Query the error and warning codes
    ///
    /// The returned codes are also stored on the device.
    pub fn info_error(&self) -> Result<(u16, u16)> {
        let rsp = self.transact(
            &[opcodes::INFO, u8::from(InfoId::Error)],
            &[Some(opcodes::INFO_ERROR), None, None, None, None, None, None, None],
            true,
        )?;
        let d = rsp.data();
        let error_code = u16::from_le_bytes([d[2], d[3]]);
        let warning_code = u16::from_le_bytes([d[4], d[5]]);
        self.error.store(error_code, Ordering::Release);
        self.warning.store(warning_code, Ordering::Release);
        Ok((error_code, warning_code))
    }

    /// Query the firmware version
    pub fn info_firmware_version(&self) -> Result<FirmwareVersion> {
        let rsp = self.transact(
            &[opcodes::INFO, u8::from(InfoId::FirmwareVersion)],
            &[Some(opcodes::INFO_FIRMWARE), None, None, None, None, None, None, None],
            true,
        )?;
        FirmwareVersion::from_payload(rsp.data())
            .ok_or_else(|| self.violation(format!("{self}: Short firmware info {rsp}")))
    }

    /// Query the hardware configuration
    pub fn info_hardware_configuration(&self) -> Result<HardwareConfiguration> {
        let rsp = self.transact(
            &[opcodes::INFO, u8::from(InfoId::HardwareConfiguration)],
            &[Some(opcodes::INFO_HARDWARE), None, None, None, None, None, None, None],
            true,
        )?;
        HardwareConfiguration::from_payload(rsp.data())
            .ok_or_else(|| self.violation(format!("{self}: Short hardware info {rsp}")))
    }

    /// Query the communication error code explaining the last NACK
    pub fn info_com_error(&self) -> Result<u16> {
        let rsp = self.transact(
            &[opcodes::INFO, u8::from(InfoId::ComError)],
            &[Some(opcodes::INFO_COM_ERROR), None, None],
            true,
        )?;
        let d = rsp.data();
        Ok(u16::from_le_bytes([d[1], d[2]]))
    }

    /// Reset the module; see [`reset_mask`](mcs_common::constants::reset_mask) for the bits
    pub fn reset(&self, mask: u8, wait: Wait) -> Result<()> {
        self.transact(&[opcodes::RESET, mask], ack_of!(opcodes::RESET), true)?;
        self.wait_if(wait)
    }

    /// Initialize the module
    pub fn init(&self, mode: u8, wait: Wait) -> Result<()> {
        self.transact(&[opcodes::INIT, mode], ack_of!(opcodes::INIT), true)?;
        self.wait_if(wait)
    }

    /// Start the module's operation
    pub fn operate(&self, mode: u8, wait: Wait) -> Result<()> {
        self.transact(&[opcodes::OPERATE, mode], ack_of!(opcodes::OPERATE), true)?;
        self.wait_if(wait)
    }

    /// Stop the module's operation
    pub fn stop(&self, mode: u8, wait: Wait) -> Result<()> {
        self.transact(&[opcodes::STOP, mode], ack_of!(opcodes::STOP), true)?;
        self.wait_if(wait)
    }

    /// Set the target value of a closed loop
    pub fn set_target_value(&self, value: i16) -> Result<()> {
        let [lo, hi] = value.to_le_bytes();
        self.transact(
            &[opcodes::SET_TARGET_VALUE, lo, hi],
            ack_of!(opcodes::SET_TARGET_VALUE),
            true,
        )?;
        Ok(())
    }

    /// Set the target value with the legacy telegram used by old TEC boards
    pub fn set_target_value_legacy(&self, value: i16) -> Result<()> {
        log::warn!("{self}: Legacy set target value telegram, use set_target_value");
        let [lo, hi] = value.to_le_bytes();
        self.transact(
            &[opcodes::SET_TARGET_VALUE_LEGACY, lo, hi],
            ack_of!(opcodes::SET_TARGET_VALUE_LEGACY),
            true,
        )?;
        Ok(())
    }

    /// Write `length` bytes (1, 2 or 4) of `value` to a port
    pub fn set_port(
        &self,
        port: u8,
        value: i64,
        length: u8,
        pulse_time: u8,
        wait: Wait,
    ) -> Result<()> {
        let mut data = vec![opcodes::SET_PORT, 0, port, pulse_time];
        data.extend(encode_le(value, length));
        self.transact(&data, ack_of!(opcodes::SET_PORT), true)?;
        self.wait_if(wait)
    }

    /// Read a port
    ///
    /// The value width follows the answer's length.
    pub fn get_port(&self, port: u8, signed: bool) -> Result<i64> {
        let rsp = self.transact(
            &[opcodes::GET_PORT, port],
            &[Some(opcodes::PORT_DATA), None, Some(port)],
            false,
        )?;
        Ok(decode_value(rsp.data().get(4..).unwrap_or_default(), signed))
    }

    /// Set the mode of a port
    pub fn set_port_mode(
        &self,
        port: u8,
        mode: PortMode,
        data_valid_time: u16,
        port_idle_time: u16,
    ) -> Result<()> {
        let [v0, v1] = data_valid_time.to_le_bytes();
        let [i0, i1] = port_idle_time.to_le_bytes();
        self.transact(
            &[opcodes::SET_PORT_MODE, port, u8::from(mode), v0, v1, i0, i1],
            ack_of!(opcodes::SET_PORT_MODE),
            true,
        )?;
        Ok(())
    }

    /// Read the mode of a port
    pub fn get_port_mode(&self, port: u8) -> Result<PortMode> {
        let rsp = self.transact(
            &[opcodes::GET_PORT_MODE, port],
            &[Some(opcodes::PORT_MODE_DATA), Some(port), None],
            false,
        )?;
        let raw = rsp.data()[2];
        PortMode::try_from(raw)
            .map_err(|_| self.violation(format!("{self}: Unknown port mode 0x{raw:02x}")))
    }

    /// Write a conversion or limit parameter of a port
    pub fn set_port_parameter(
        &self,
        port: u8,
        parameter: PortParameter,
        value: i64,
        length: u8,
    ) -> Result<()> {
        let mut data = vec![opcodes::SET_PORT_PARAMETER, 0, port, u8::from(parameter)];
        data.extend(encode_le(value, length));
        self.transact(&data, ack_of!(opcodes::SET_PORT_PARAMETER), true)?;
        Ok(())
    }

    /// Read a conversion or limit parameter of a port
    pub fn get_port_parameter(
        &self,
        port: u8,
        parameter: PortParameter,
        signed: bool,
    ) -> Result<i64> {
        let parameter = u8::from(parameter);
        let rsp = self.transact(
            &[opcodes::GET_PORT_PARAMETER, 0, port, parameter],
            &[
                Some(opcodes::PORT_PARAMETER_DATA),
                None,
                Some(port),
                Some(parameter),
            ],
            false,
        )?;
        Ok(decode_value(rsp.data().get(4..).unwrap_or_default(), signed))
    }

    /// Zero a port to remove an offset
    pub fn set_port_zero(&self, port: u8, wait: Wait) -> Result<()> {
        self.transact(
            &[opcodes::SET_PORT_ZERO, 0, port],
            ack_of!(opcodes::SET_PORT_ZERO),
            true,
        )?;
        self.wait_if(wait)
    }

    /// Write `length` bytes of `value` to a parameter; current firmware uses 4 bytes throughout
    pub fn set_parameter(&self, parameter: u8, value: i64, length: u8) -> Result<()> {
        let mut data = vec![opcodes::SET_PARAMETER, parameter];
        data.extend(encode_le(value, length));
        self.transact(&data, ack_of!(opcodes::SET_PARAMETER), true)?;
        Ok(())
    }

    /// Read a parameter
    ///
    /// The value width follows the answer's length.
    pub fn get_parameter(&self, parameter: u8, signed: bool) -> Result<i64> {
        let rsp = self.transact(
            &[opcodes::GET_PARAMETER, parameter],
            &[Some(opcodes::PARAMETER_DATA), Some(parameter)],
            false,
        )?;
        Ok(decode_value(rsp.data().get(2..).unwrap_or_default(), signed))
    }

    access_methods!(u8, false);
    access_methods!(i8, true);
    access_methods!(u16, false);
    access_methods!(i16, true);
    access_methods!(u32, false);
    access_methods!(i32, true);

    /// Rotate until stopped
    pub fn rotate(&self, mode: u8, direction: Rotation, speed: u16, wait: Wait) -> Result<()> {
        let [s0, s1] = speed.to_le_bytes();
        self.transact(
            &[opcodes::ROTATE, mode, u8::from(direction), s0, s1],
            ack_of!(opcodes::ROTATE),
            true,
        )?;
        self.wait_if(wait)
    }

    /// Move to or by `position`; `mode` is usually 0 for absolute and 1 for relative moves
    pub fn move_to(&self, position: i32, speed: i16, mode: u8, wait: Wait) -> Result<()> {
        let mut data = vec![opcodes::MOVE, mode];
        data.extend(position.to_le_bytes());
        data.extend(speed.to_le_bytes());
        self.transact(&data, ack_of!(opcodes::MOVE), true)?;
        self.wait_if(wait)
    }

    /// Absolute move
    pub fn move_abs(&self, position: i32, speed: i16, wait: Wait) -> Result<()> {
        self.move_to(position, speed, 0, wait)
    }

    /// Relative move
    pub fn move_rel(&self, position: i32, speed: i16, wait: Wait) -> Result<()> {
        self.move_to(position, speed, 1, wait)
    }

    /// Move to a stored discrete position
    pub fn move_discrete(
        &self,
        mode: u8,
        position_id: u8,
        direction: Direction,
        wait: Wait,
    ) -> Result<()> {
        self.transact(
            &[
                opcodes::MOVE_DISCRETE,
                mode,
                position_id | u8::from(direction),
            ],
            ack_of!(opcodes::MOVE_DISCRETE),
            true,
        )?;
        self.wait_if(wait)
    }

    /// Current position and speed
    pub fn get_move(&self) -> Result<(i32, i16)> {
        let rsp = self.transact(
            &[opcodes::GET_MOVE, 0],
            &[Some(opcodes::MOVE_DATA), None, None, None, None, None, None, None],
            true,
        )?;
        let d = rsp.data();
        Ok((
            i32::from_le_bytes([d[2], d[3], d[4], d[5]]),
            i16::from_le_bytes([d[6], d[7]]),
        ))
    }

    /// Set acceleration and deceleration
    pub fn set_ramping(&self, acceleration: u16, deceleration: u16) -> Result<()> {
        let [a0, a1] = acceleration.to_le_bytes();
        let [d0, d1] = deceleration.to_le_bytes();
        self.transact(
            &[opcodes::SET_RAMPING, a0, a1, d0, d1],
            ack_of!(opcodes::SET_RAMPING),
            true,
        )?;
        Ok(())
    }

    /// Read acceleration and deceleration
    pub fn get_ramping(&self) -> Result<(u16, u16)> {
        let rsp = self.transact(
            &[opcodes::GET_RAMPING],
            &[Some(opcodes::RAMPING_DATA), None, None, None, None],
            false,
        )?;
        let d = rsp.data();
        Ok((
            u16::from_le_bytes([d[1], d[2]]),
            u16::from_le_bytes([d[3], d[4]]),
        ))
    }

    /// Store a discrete position
    pub fn set_discrete_position(&self, position_id: u8, position: i16) -> Result<()> {
        let [p0, p1] = position.to_le_bytes();
        self.transact(
            &[opcodes::SET_DISCRETE_POSITION, position_id, p0, p1],
            ack_of!(opcodes::SET_DISCRETE_POSITION),
            true,
        )?;
        Ok(())
    }

    /// Read a stored discrete position
    pub fn get_discrete_position(&self, position_id: u8) -> Result<i32> {
        let rsp = self.transact(
            &[opcodes::GET_DISCRETE_POSITION, position_id],
            &[
                Some(opcodes::DISCRETE_POSITION_DATA),
                Some(position_id),
                None,
                None,
                None,
                None,
            ],
            false,
        )?;
        let d = rsp.data();
        Ok(i32::from_le_bytes([d[2], d[3], d[4], d[5]]))
    }

    /// Erase the memory block containing `address`
    pub fn erase_mem(&self, address: u32, wait: Wait) -> Result<()> {
        check_mem_range(address, 1)?;
        let [a0, a1, a2] = address_bytes(address);
        self.transact(
            &[opcodes::ERASE_MEM, a0, a1, a2],
            ack_of!(opcodes::ERASE_MEM),
            true,
        )?;
        self.wait_if(wait)
    }

    /// Write `data` to memory starting at `address`, four bytes per telegram
    pub fn set_mem(&self, address: u32, data: &[u8]) -> Result<()> {
        check_mem_range(address, data.len())?;
        for (n, chunk) in data.chunks(SET_MEM_CHUNK).enumerate() {
            let mut frame = vec![opcodes::SET_MEM];
            frame.extend(address_bytes(address + (n * SET_MEM_CHUNK) as u32));
            frame.extend_from_slice(chunk);
            self.transact(&frame, ack_of!(opcodes::SET_MEM), true)?;
        }
        Ok(())
    }

    /// Read `length` bytes of memory starting at `address`, seven bytes per telegram
    pub fn get_mem(&self, address: u32, length: usize) -> Result<Vec<u8>> {
        check_mem_range(address, length)?;
        let mut result = Vec::with_capacity(length);
        while result.len() < length {
            let n = (length - result.len()).min(GET_MEM_CHUNK);
            let mut frame = vec![opcodes::GET_MEM];
            frame.extend(address_bytes(address + result.len() as u32));
            frame.push(n as u8);
            let rsp = self.transact(&frame, &[Some(opcodes::MEM_DATA)], false)?;
            let bytes = rsp.data().get(1..1 + n).ok_or_else(|| {
                self.violation(format!("{self}: Expected {n} memory bytes, got {rsp}"))
            })?;
            result.extend_from_slice(bytes);
        }
        Ok(result)
    }

    /// Write up to seven bytes of auxiliary data
    pub fn set_aux_data(&self, data: &[u8]) -> Result<()> {
        let mut frame = vec![opcodes::SET_AUX_DATA];
        frame.extend(data.iter().take(7));
        self.transact(&frame, ack_of!(opcodes::SET_AUX_DATA), true)?;
        Ok(())
    }

    /// Read auxiliary data
    pub fn get_aux_data(&self) -> Result<Vec<u8>> {
        let rsp = self.transact(&[opcodes::GET_AUX_DATA], &[Some(opcodes::AUX_DATA)], false)?;
        Ok(rsp.data()[1..].to_vec())
    }

    /// Set the boot loader mode
    pub fn set_boot_mode(&self, mode: u8, crc: u16, wait: Wait) -> Result<()> {
        let [c0, c1] = crc.to_le_bytes();
        self.transact(
            &[opcodes::SET_BOOT_MODE, mode, c0, c1],
            ack_of!(opcodes::SET_BOOT_MODE),
            true,
        )?;
        self.wait_if(wait)
    }

    /// Leave the boot loader and start the main program
    pub fn go_main(&self) -> Result<()> {
        self.transact(&[opcodes::GO_MAIN], ack_of!(opcodes::GO_MAIN), true)?;
        std::thread::sleep(BOOT_SWITCH_SETTLE);
        Ok(())
    }

    /// Leave the main program and start the boot loader
    pub fn go_boot(&self) -> Result<()> {
        self.transact(&[opcodes::GO_BOOT], ack_of!(opcodes::GO_BOOT), true)?;
        std::thread::sleep(BOOT_SWITCH_SETTLE);
        Ok(())
    }

    /// Initialize the boot loader
    pub fn init_boot(&self, mode: u8, wait: Wait) -> Result<()> {
        self.transact(&[opcodes::INIT_BOOT, mode], ack_of!(opcodes::INIT_BOOT), true)?;
        self.wait_if(wait)
    }
}
