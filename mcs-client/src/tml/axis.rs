use std::sync::Arc;
use std::time::Instant;

use snafu::OptionExt as _;

use mcs_common::{
    constants::TML_WAIT_POLL_INTERVAL,
    tml::{
        mer_description, opcodes, read_request, registers, sr32, write_request, TmlInstruction,
        Width, DEFAULT_MASTER_ID,
    },
    AxisProperties,
};

use crate::{
    error::{
        AxisFaultSnafu, AxisOffSnafu, AxisTimeoutSnafu, InvalidMemoryAddressSnafu, NoAnswerSnafu,
        ProtocolViolationSnafu, Result, UnsupportedMoveSnafu,
    },
    wait::Wait,
};

use super::TmlHandler;

/// Factors converting user units into drive internal units
///
/// `internal = user * factor`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScaling {
    /// Position factor
    pub position: f64,
    /// Speed factor
    pub speed: f64,
    /// Acceleration factor
    pub acceleration: f64,
    /// Jerk factor
    pub jerk: f64,
    /// Current factor
    pub current: f64,
}

impl AxisScaling {
    /// Derive the factors from the axis' mechanical and electrical properties
    pub fn new(properties: &AxisProperties) -> Self {
        let position = 4.0 * properties.encoder_lines * properties.transmission_ratio;
        let t = properties.sampling_period;
        Self {
            position,
            speed: position * t * 65536.0,
            acceleration: position * t * t * 65536.0,
            jerk: 1.0,
            current: 65520.0 / 2.0 / properties.max_current,
        }
    }
}

/// How a move treats a blocked axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    /// Position control; a persisting control error faults the drive
    #[default]
    Position,
    /// Control error is ignored; if the target is not reached the axis keeps pushing at the
    /// current limit
    HoldCurrent,
    /// Like [`DriveMode::HoldCurrent`], but the motor current is switched off when the axis is
    /// blocked
    StopOnBlock,
}

/// Result of [`TmlAxis::wait_ready`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Motion is complete
    MotionComplete,
    /// The position error persisted; only returned for torque-aware drive modes
    TargetNotReached,
}

/// Result of [`TmlAxis::move_to`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move was started and not waited for
    Started,
    /// Motion is complete at the target
    PositionReached,
    /// Target not reached; the axis holds at its current limit
    HoldingCurrentLimit,
    /// Target not reached; the motor current was switched off
    StoppedAtCurrentLimit,
}

/// How [`TmlAxis::stop`] brings the axis to rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// Output voltage set to zero
    Voltage,
    /// Motor current set to zero
    Current,
    /// Speed reference set to zero
    Speed,
    /// Ramp down with the programmed deceleration
    #[default]
    Ramp,
}

/// Arguments of [`TmlAxis::move_to`]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveCommand {
    /// Target position in user units
    pub position: f64,
    /// Speed in user units, keeps the programmed speed if None
    pub speed: Option<f64>,
    /// Acceleration in user units, keeps the programmed value if None
    pub acceleration: Option<f64>,
    /// Position is relative to the current target
    pub relative: bool,
    /// Current limit, restores the default if None
    pub current_limit: Option<f64>,
    /// Drive mode
    pub mode: DriveMode,
}

impl MoveCommand {
    /// Move to an absolute position
    pub fn absolute(position: f64) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Move by a distance
    pub fn relative(distance: f64) -> Self {
        Self {
            position: distance,
            relative: true,
            ..Default::default()
        }
    }

    /// Set the speed
    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    /// Set the acceleration
    pub fn acceleration(mut self, acceleration: f64) -> Self {
        self.acceleration = Some(acceleration);
        self
    }

    /// Set the current limit
    pub fn current_limit(mut self, current_limit: f64) -> Self {
        self.current_limit = Some(current_limit);
        self
    }

    /// Set the drive mode
    pub fn mode(mut self, mode: DriveMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A Technosoft axis driven through TML
///
/// The default control error, control error timeout and current limit are stored in user
/// variables on the drive and read once when the handle is created.
#[derive(Debug)]
pub struct TmlAxis {
    tml: Arc<TmlHandler>,
    properties: AxisProperties,
    scaling: AxisScaling,
    master_id: u8,
    err_max_default: f64,
    t_err_max_default: u16,
    sats_default: f64,
}

impl TmlAxis {
    /// Create a handle for the axis described by `properties`
    ///
    /// Reads the axis defaults, so the drive must be reachable.
    pub fn new(tml: Arc<TmlHandler>, properties: AxisProperties) -> Result<Self> {
        Self::with_master_id(tml, properties, DEFAULT_MASTER_ID)
    }

    /// Like [`TmlAxis::new`], with the answers addressed to `master_id`
    pub fn with_master_id(
        tml: Arc<TmlHandler>,
        properties: AxisProperties,
        master_id: u8,
    ) -> Result<Self> {
        let scaling = AxisScaling::new(&properties);
        let mut axis = Self {
            tml,
            properties,
            scaling,
            master_id,
            err_max_default: 0.0,
            t_err_max_default: 0,
            sats_default: 0.0,
        };
        axis.err_max_default = axis.read_err_max_default()?;
        axis.t_err_max_default = axis.read_t_err_max_default()?;
        axis.sats_default = axis.read_sats_default()?;
        log::debug!(
            "Axis {} ({}): ERRMAX default {}, TERRMAX default {} ms, SATS default {}",
            axis.id(),
            axis.properties.name,
            axis.err_max_default,
            axis.t_err_max_default,
            axis.sats_default
        );
        Ok(axis)
    }

    /// Axis id
    pub fn id(&self) -> u8 {
        self.properties.axis_id
    }

    /// Properties the handle was created with
    pub fn properties(&self) -> &AxisProperties {
        &self.properties
    }

    /// Unit scaling
    pub fn scaling(&self) -> AxisScaling {
        self.scaling
    }

    /// Default maximum control error, read at creation
    pub fn err_max_default(&self) -> f64 {
        self.err_max_default
    }

    /// Default control error timeout in ms, read at creation
    pub fn t_err_max_default(&self) -> u16 {
        self.t_err_max_default
    }

    /// Default current limit, read at creation
    pub fn sats_default(&self) -> f64 {
        self.sats_default
    }

    fn send(&self, opcode: u16, words: &[u16]) -> Result<()> {
        self.tml
            .send(&TmlInstruction::new(opcode, words), self.id())
            .map(|_| ())
    }

    fn read(&self, address: u16, width: Width) -> Result<u32> {
        let axis = self.id();
        let answer = self
            .tml
            .query(
                &read_request(address, width, self.master_id),
                axis,
                address == registers::SR32,
                |answer| answer.answers_read(axis, address, width),
            )?
            .context(NoAnswerSnafu { axis })?;
        let words = match width {
            Width::Bits16 => answer.word(1).map(|low| low as u32),
            Width::Bits32 => answer
                .word(1)
                .zip(answer.word(2))
                .map(|(low, high)| low as u32 | (high as u32) << 16),
        };
        words.with_context(|| ProtocolViolationSnafu {
            reason: format!("Axis {axis}: read of 0x{address:04x} answered with {answer:x?}"),
            history: String::new(),
        })
    }

    fn write(&self, address: u16, value: u32, width: Width) -> Result<()> {
        let instr = write_request(address, value, width)
            .context(InvalidMemoryAddressSnafu { address })?;
        self.tml.send(&instr, self.id()).map(|_| ())
    }

    /// Read a 16-bit value from RAM or EEPROM
    pub fn read_u16(&self, address: u16) -> Result<u16> {
        Ok(self.read(address, Width::Bits16)? as u16)
    }

    /// Read a signed 16-bit value
    pub fn read_i16(&self, address: u16) -> Result<i16> {
        Ok(self.read_u16(address)? as i16)
    }

    /// Read a 32-bit value from RAM or EEPROM
    pub fn read_u32(&self, address: u16) -> Result<u32> {
        self.read(address, Width::Bits32)
    }

    /// Read a signed 32-bit value
    pub fn read_i32(&self, address: u16) -> Result<i32> {
        Ok(self.read_u32(address)? as i32)
    }

    /// Write a 16-bit value to one of the RAM pages
    pub fn write_u16(&self, address: u16, value: u16) -> Result<()> {
        self.write(address, value as u32, Width::Bits16)
    }

    /// Write a 32-bit value to one of the RAM pages
    pub fn write_u32(&self, address: u16, value: u32) -> Result<()> {
        self.write(address, value, Width::Bits32)
    }

    /// Query SR32; the answer also refreshes the status mirror
    pub fn read_sr32(&self) -> Result<u32> {
        self.read_u32(registers::SR32)
    }

    /// Actual position (APOS)
    pub fn read_actual_position(&self) -> Result<f64> {
        Ok(self.read_i32(registers::APOS)? as f64 / self.scaling.position)
    }

    /// Target position (TPOS)
    pub fn read_target_position(&self) -> Result<f64> {
        Ok(self.read_i32(registers::TPOS)? as f64 / self.scaling.position)
    }

    /// Position error
    pub fn read_position_error(&self) -> Result<f64> {
        Ok(self.read_i16(registers::POS_ERR)? as f64 / self.scaling.position)
    }

    /// Maximum control error (ERRMAX)
    pub fn read_err_max(&self) -> Result<f64> {
        Ok(self.read_i16(registers::ERRMAX)? as f64 / self.scaling.position)
    }

    /// Motion error register
    pub fn read_mer(&self) -> Result<u16> {
        self.read_u16(registers::MER)
    }

    /// Current limit (SATS)
    pub fn read_current_limit(&self) -> Result<f64> {
        Ok((32767.0 - self.read_u16(registers::SATS)? as f64) / self.scaling.current)
    }

    /// Control error timeout (TERRMAX)
    pub fn read_t_err_max(&self) -> Result<u16> {
        self.read_u16(registers::TERRMAX)
    }

    /// Motor current (IQ)
    pub fn read_current(&self) -> Result<f64> {
        Ok(self.read_i16(registers::IQ)? as f64 / self.scaling.current)
    }

    /// Homing flag user variable
    pub fn read_home_flag(&self) -> Result<u16> {
        self.read_u16(registers::HOME_FLAG)
    }

    /// Default current limit user variable
    pub fn read_sats_default(&self) -> Result<f64> {
        Ok((32767.0 - self.read_u16(registers::SATS_DEFAULT)? as f64) / self.scaling.current)
    }

    /// Default maximum control error user variable
    pub fn read_err_max_default(&self) -> Result<f64> {
        Ok(self.read_u16(registers::ERRMAX_DEFAULT)? as f64 / self.scaling.position)
    }

    /// Default control error timeout user variable, in ms
    pub fn read_t_err_max_default(&self) -> Result<u16> {
        self.read_u16(registers::TERRMAX_DEFAULT)
    }

    fn write_scaled(&self, address: u16, value: f64, factor: f64) -> Result<()> {
        self.write_u32(address, (value * factor) as i32 as u32)
    }

    /// Commanded acceleration (CACC)
    pub fn write_acceleration(&self, value: f64) -> Result<()> {
        self.write_scaled(registers::CACC, value, self.scaling.acceleration)
    }

    /// Quick stop deceleration (CDEC)
    pub fn write_deceleration(&self, value: f64) -> Result<()> {
        self.write_scaled(registers::CDEC, value, self.scaling.acceleration)
    }

    /// Commanded speed (CSPD)
    pub fn write_speed(&self, value: f64) -> Result<()> {
        self.write_scaled(registers::CSPD, value, self.scaling.speed)
    }

    /// Commanded position (CPOS)
    pub fn write_position(&self, value: f64) -> Result<()> {
        self.write_scaled(registers::CPOS, value, self.scaling.position)
    }

    /// Homing speed
    pub fn write_home_speed(&self, value: f64) -> Result<()> {
        self.write_scaled(registers::HOME_SPD, value, self.scaling.speed)
    }

    /// Position assigned at the end of homing
    pub fn write_home_position(&self, value: f64) -> Result<()> {
        self.write_scaled(registers::HOME_POS, value, self.scaling.position)
    }

    /// Current limit (SATS)
    pub fn write_current_limit(&self, value: f64) -> Result<()> {
        let raw = 32767 - (value * self.scaling.current) as i32;
        self.write_u16(registers::SATS, raw as u16)
    }

    /// Control error timeout (TERRMAX) in ms; 0xFFFF disables it
    pub fn write_t_err_max(&self, value: u16) -> Result<()> {
        self.write_u16(registers::TERRMAX, value)
    }

    /// Mark the axis as homed
    pub fn set_home_flag(&self) -> Result<()> {
        self.write_u16(registers::HOME_FLAG, 1)
    }

    /// Restore the current limit from its user variable
    pub fn set_sats_to_default(&self) -> Result<()> {
        let raw = self.read_u16(registers::SATS_DEFAULT)?;
        self.write_u16(registers::SATS, raw)
    }

    /// Restore the control error timeout from its user variable
    pub fn set_t_err_max_to_default(&self) -> Result<()> {
        let raw = self.read_u16(registers::TERRMAX_DEFAULT)?;
        self.write_u16(registers::TERRMAX, raw)
    }

    /// AXISON
    pub fn axis_on(&self) -> Result<()> {
        self.send(opcodes::AXIS_ON, &[])
    }

    /// AXISOFF
    pub fn axis_off(&self) -> Result<()> {
        self.send(opcodes::AXIS_OFF, &[])
    }

    /// Stop with output voltage 0
    pub fn stop0(&self) -> Result<()> {
        self.send(opcodes::STOP_VOLTAGE, &[])
    }

    /// Stop with motor current 0
    pub fn stop1(&self) -> Result<()> {
        self.send(opcodes::STOP_CURRENT, &[])
    }

    /// Stop with speed 0
    pub fn stop2(&self) -> Result<()> {
        self.send(opcodes::STOP_SPEED, &[])
    }

    /// Ramp down with the programmed deceleration
    pub fn stop3(&self) -> Result<()> {
        self.send(opcodes::STOP_RAMP, &[])
    }

    /// UPD: start the programmed motion
    pub fn update(&self) -> Result<()> {
        self.send(opcodes::UPDATE, &[])
    }

    /// CPR: commanded position is relative
    pub fn command_relative(&self) -> Result<()> {
        self.send(opcodes::SET_BITS, &[0xDFFF, 0x0000])
    }

    /// CPA: commanded position is absolute
    pub fn command_absolute(&self) -> Result<()> {
        self.send(opcodes::SET_BITS, &[0xFFFF, 0x2000])
    }

    /// Trapezoidal position profile mode
    pub fn mode_pp(&self) -> Result<()> {
        self.send(opcodes::SET_BITS, &[0xBFC1, 0x8701])
    }

    /// TUM0: start the trajectory from the actual position
    pub fn tum0(&self) -> Result<()> {
        self.send(opcodes::SET_BITS, &[0xBFFF, 0x0000])
    }

    /// TUM1: start the trajectory from the current reference
    pub fn tum1(&self) -> Result<()> {
        self.send(opcodes::SET_BITS, &[0xFFFF, 0x4000])
    }

    /// Reset the drive
    ///
    /// This also resets the drive's communication.
    pub fn reset(&self) -> Result<()> {
        self.send(opcodes::RESET, &[])
    }

    /// Abort the running function
    pub fn abort(&self) -> Result<()> {
        self.send(opcodes::ABORT, &[])
    }

    /// Call homing procedure `homing_no`
    pub fn homing(&self, homing_no: u8) -> Result<()> {
        self.send(opcodes::HOMING | homing_no as u16, &[])
    }

    /// Clear the homing current threshold
    pub fn home_current_zero(&self) -> Result<()> {
        self.send(opcodes::HOME_CURRENT_ZERO, &[0x0000])
    }

    /// Clear the homing time threshold
    pub fn home_time_zero(&self) -> Result<()> {
        self.send(opcodes::HOME_TIME_ZERO, &[0x0000])
    }

    /// Disable the negative limit switch
    pub fn disable_lsn(&self) -> Result<()> {
        self.send(opcodes::DISABLE_LSN, &[])
    }

    /// STA: copy the actual position into the target position
    pub fn set_target_to_actual(&self) -> Result<()> {
        self.send(opcodes::SET_TARGET_TO_ACTUAL, &[registers::APOS])
    }

    /// Motion complete, from the SR32 mirror
    pub fn is_ready(&self) -> bool {
        self.tml.sr32(self.id()) & sr32::MOTION_COMPLETE != 0
    }

    /// Drive fault, from the SR32 mirror
    pub fn has_fault(&self) -> bool {
        self.tml.sr32(self.id()) & sr32::FAULT != 0
    }

    /// Target reached, from the SR32 mirror
    pub fn is_target_reached(&self) -> bool {
        self.tml.sr32(self.id()) & sr32::TARGET_REACHED != 0
    }

    /// Axis on, from the SR32 mirror
    pub fn is_on(&self) -> bool {
        self.tml.sr32(self.id()) & sr32::AXIS_ON != 0
    }

    /// Axis off, from the SR32 mirror
    pub fn is_off(&self) -> bool {
        !self.is_on()
    }

    /// Wait until the motion is complete
    ///
    /// Fails at once if the drive reports a fault or switches off. In the torque-aware drive
    /// modes it also returns [`WaitOutcome::TargetNotReached`] when the target is reached but the
    /// motion does not complete, or the position error stays above the default ERRMAX for longer
    /// than the default TERRMAX.
    pub fn wait_ready(&self, wait: Wait, mode: DriveMode) -> Result<WaitOutcome> {
        self.read_sr32()?;
        let poll_secs = TML_WAIT_POLL_INTERVAL.as_secs_f64();
        let terr_cnt_max = (self.t_err_max_default as f64 / 1000.0 / poll_secs) as u32 + 1;
        let mut terr_cnt = 0;
        let start = Instant::now();
        loop {
            if self.has_fault() {
                let description = mer_description(self.read_mer()?);
                log::error!("Axis {} ({}) fault: {description}", self.id(), self.properties.name);
                return AxisFaultSnafu {
                    axis: self.id(),
                    description,
                }
                .fail();
            }
            if self.is_off() {
                return AxisOffSnafu { axis: self.id() }.fail();
            }
            if self.is_ready() {
                return Ok(WaitOutcome::MotionComplete);
            }
            if mode != DriveMode::Position {
                if self.is_target_reached() {
                    std::thread::sleep(TML_WAIT_POLL_INTERVAL);
                    return Ok(if self.is_ready() {
                        WaitOutcome::MotionComplete
                    } else {
                        WaitOutcome::TargetNotReached
                    });
                }
                if self.read_position_error()?.abs() >= self.err_max_default {
                    if terr_cnt >= terr_cnt_max {
                        return Ok(WaitOutcome::TargetNotReached);
                    }
                    terr_cnt += 1;
                } else {
                    terr_cnt = 0;
                }
            }
            if wait.expired(start) {
                return AxisTimeoutSnafu { axis: self.id() }.fail();
            }
            std::thread::sleep(TML_WAIT_POLL_INTERVAL);
        }
    }

    /// Program and start a positioning move
    ///
    /// The target is resynchronized to the actual position first. If the position error is within
    /// the default ERRMAX the new trajectory blends from the current reference, otherwise it
    /// restarts from the actual position.
    pub fn move_to(&self, cmd: &MoveCommand, wait: Wait) -> Result<MoveOutcome> {
        if cmd.mode == DriveMode::StopOnBlock && !wait.waits() {
            return UnsupportedMoveSnafu {
                reason: "stop on block needs a wait",
            }
            .fail();
        }
        self.set_target_to_actual()?;
        if let Some(acceleration) = cmd.acceleration {
            self.write_acceleration(acceleration)?;
        }
        if let Some(speed) = cmd.speed {
            self.write_speed(speed)?;
        }
        self.write_position(cmd.position)?;
        if cmd.relative {
            self.command_relative()?;
        } else {
            self.command_absolute()?;
        }
        self.mode_pp()?;

        if self.read_position_error()?.abs() <= self.err_max_default {
            self.tum1()?;
        } else {
            self.tum0()?;
        }

        match cmd.current_limit {
            Some(limit) => self.write_current_limit(limit)?,
            None => self.set_sats_to_default()?,
        }

        if cmd.mode == DriveMode::Position {
            self.set_t_err_max_to_default()?;
            self.update()?;
            if !wait.waits() {
                return Ok(MoveOutcome::Started);
            }
            self.wait_ready(wait, cmd.mode)?;
            return Ok(MoveOutcome::PositionReached);
        }

        self.write_t_err_max(0xFFFF)?;
        self.update()?;
        if !wait.waits() {
            return Ok(MoveOutcome::Started);
        }
        match (self.wait_ready(wait, cmd.mode)?, cmd.mode) {
            (WaitOutcome::MotionComplete, _) => Ok(MoveOutcome::PositionReached),
            (WaitOutcome::TargetNotReached, DriveMode::StopOnBlock) => {
                log::info!("Axis {} blocked, switching current off", self.id());
                self.stop1()?;
                Ok(MoveOutcome::StoppedAtCurrentLimit)
            }
            (WaitOutcome::TargetNotReached, _) => Ok(MoveOutcome::HoldingCurrentLimit),
        }
    }

    /// Stop the axis, then resynchronize the target position
    pub fn stop(&self, mode: StopMode) -> Result<()> {
        match mode {
            StopMode::Voltage => self.stop0()?,
            StopMode::Current => self.stop1()?,
            StopMode::Speed => self.stop2()?,
            StopMode::Ramp => self.stop3()?,
        }
        self.set_target_to_actual()
    }

    /// Run homing procedure `homing_no`
    pub fn home(&self, homing_no: u8, speed: f64, position: f64, wait: Wait) -> Result<()> {
        self.write_home_speed(speed)?;
        self.write_home_position(position)?;
        self.homing(homing_no)?;
        if wait.waits() {
            self.wait_ready(wait, DriveMode::Position)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scaling_is_internal_units() {
        let scaling = AxisScaling::new(&AxisProperties::new(1));
        assert_eq!(1.0, scaling.position);
        assert_eq!(1.0, scaling.current);
        assert_eq!(1.0, scaling.jerk);
        assert!((scaling.speed - 65.536).abs() < 1e-9);
        assert!((scaling.acceleration - 0.065536).abs() < 1e-12);
    }

    #[test]
    fn test_scaling_from_mechanics() {
        let mut properties = AxisProperties::new(2);
        properties.encoder_lines = 500.0;
        properties.transmission_ratio = 0.5;
        properties.max_current = 3200.0;
        let scaling = AxisScaling::new(&properties);
        assert_eq!(1000.0, scaling.position);
        assert_eq!(65520.0 / 6400.0, scaling.current);
    }

    #[test]
    fn test_move_command_builder() {
        let cmd = MoveCommand::relative(-2.5)
            .speed(10.0)
            .current_limit(500.0)
            .mode(DriveMode::HoldCurrent);
        assert!(cmd.relative);
        assert_eq!(-2.5, cmd.position);
        assert_eq!(Some(10.0), cmd.speed);
        assert_eq!(None, cmd.acceleration);
        assert_eq!(Some(500.0), cmd.current_limit);
        assert_eq!(DriveMode::HoldCurrent, cmd.mode);
        assert_eq!(DriveMode::Position, MoveCommand::absolute(1.0).mode);
    }
}
