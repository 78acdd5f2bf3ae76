use std::sync::Arc;
use std::time::Duration;

use assertables::assert_contains;
use integration_tests::prelude::*;
use mcs_client::{
    mcs_common::tml::{opcodes as tml, registers, sr32, TmlInstruction},
    tml::TmlAxis,
};

const AXIS: u8 = 1;

const CONFIG: &str = r#"
    [[axes]]
    axis_id = 1
    name = "x"
    unit = "mm"
"#;

fn setup(sim_axis: SimAxis) -> (Arc<SimBus>, Mcs, TmlAxis) {
    let sim = Arc::new(SimBus::new());
    sim.add_axis(AXIS, sim_axis);
    let config = McsConfig::load_from_str(CONFIG).unwrap();
    let mcs = open_mcs(&sim, &config, RegisterMode::Ignore);
    let axis = mcs.axis(AXIS).unwrap();
    sim.clear_trace();
    (sim, mcs, axis)
}

fn opcodes_sent(sim: &SimBus) -> Vec<u16> {
    sim.sent_to_axis(AXIS)
        .iter()
        .map(|i| i.opcode)
        .filter(|op| op & 0xFF00 != tml::GIVE_ME_DATA)
        .collect()
}

#[test]
#[serial_test::serial]
fn test_axis_defaults_are_read_on_creation() {
    let (_sim, mcs, axis) = setup(SimAxis::default());
    assert_eq!(100.0, axis.err_max_default());
    assert_eq!(200, axis.t_err_max_default());
    assert_eq!(1000.0, axis.sats_default());
    assert_eq!("x", axis.properties().name);
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_unsolicited_sr32_only_updates_mirror() {
    let (sim, mcs, axis) = setup(SimAxis::default());
    let handler = mcs.tml().unwrap().clone();
    let status = sr32::AXIS_ON | sr32::MOTION_COMPLETE | sr32::TARGET_REACHED;

    sim.with_axis(AXIS, |a| a.sr32 = status);
    sim.emit_sr32(AXIS);
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(status, handler.sr32(AXIS));
    assert_eq!(0, handler.pending());
    assert!(axis.is_ready());
    assert!(axis.is_on());
    assert!(axis.is_target_reached());
    assert!(!axis.has_fault());

    sim.with_axis(AXIS, |a| a.sr32 = sr32::AXIS_ON);
    assert_eq!(sr32::AXIS_ON, axis.read_sr32().unwrap());
    assert_eq!(0, handler.pending());
    assert!(!axis.is_ready());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_register_access() {
    let (sim, mcs, axis) = setup(SimAxis::default());

    axis.write_u32(registers::CPOS, 0x0001_8000).unwrap();
    assert_eq!(0x0001_8000, sim.with_axis(AXIS, |a| a.read32(registers::CPOS)));
    assert_eq!(0x0001_8000, axis.read_u32(registers::CPOS).unwrap());

    axis.write_u16(registers::HOME_FLAG, 0).unwrap();
    axis.set_home_flag().unwrap();
    assert_eq!(1, axis.read_home_flag().unwrap());

    sim.with_axis(AXIS, |a| a.write32(registers::APOS, -250i32 as u32));
    assert_eq!(-250.0, axis.read_actual_position().unwrap());

    assert!(matches!(
        axis.write_u16(0x4000, 1),
        Err(McsError::InvalidMemoryAddress { address: 0x4000 })
    ));
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_absolute_move() {
    let (sim, mcs, axis) = setup(SimAxis::default());
    let _logger = TraceLogger::new(&sim);

    let cmd = MoveCommand::absolute(500.0).speed(10.0);
    assert_eq!(
        MoveOutcome::PositionReached,
        axis.move_to(&cmd, Wait::secs(5.0)).unwrap()
    );
    assert_eq!(500, sim.with_axis(AXIS, |a| a.read32(registers::APOS)));
    assert_eq!(655, sim.with_axis(AXIS, |a| a.read32(registers::CSPD)));
    assert_eq!(1000.0, axis.read_current_limit().unwrap());
    assert_eq!(200, axis.read_t_err_max().unwrap());

    let sent = opcodes_sent(&sim);
    assert_eq!(tml::SET_TARGET_TO_ACTUAL, sent[0]);
    assert_eq!(Some(&tml::UPDATE), sent.last());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_relative_move_starts_from_actual_position() {
    let mut sim_axis = SimAxis::default();
    sim_axis.write32(registers::APOS, 100);
    let (sim, mcs, axis) = setup(sim_axis);

    let cmd = MoveCommand::relative(50.0).current_limit(500.0);
    assert_eq!(
        MoveOutcome::PositionReached,
        axis.move_to(&cmd, Wait::secs(5.0)).unwrap()
    );
    assert_eq!(150, sim.with_axis(AXIS, |a| a.read32(registers::APOS)));
    assert_eq!(500.0, axis.read_current_limit().unwrap());
    assert_eq!(150.0, axis.read_target_position().unwrap());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_trajectory_start_depends_on_position_error() {
    let mut sim_axis = SimAxis::default();
    sim_axis.memory.insert(registers::POS_ERR, 500);
    let (sim, mcs, axis) = setup(sim_axis);
    let set_bits = |sim: &SimBus| -> Vec<Vec<u16>> {
        sim.sent_to_axis(AXIS)
            .iter()
            .filter(|i| i.opcode == tml::SET_BITS)
            .map(|i| i.words.to_vec())
            .collect()
    };

    axis.move_to(&MoveCommand::absolute(20.0), Wait::NoWait).unwrap();
    // TUM0: restart from the actual position
    assert!(set_bits(&sim).contains(&vec![0xBFFF, 0x0000]));

    sim.clear_trace();
    axis.move_to(&MoveCommand::absolute(30.0), Wait::NoWait).unwrap();
    // TUM1: blend from the current reference
    assert!(set_bits(&sim).contains(&vec![0xFFFF, 0x4000]));
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_late_answer_is_not_taken_by_next_read() {
    let (sim, mcs, axis) = setup(SimAxis::default());
    sim.with_axis(AXIS, |a| a.write32(registers::APOS, 7));

    // answer to an earlier read that already gave up
    let late = TmlInstruction::new(tml::TAKE_DATA_16 | AXIS as u16, &[registers::POS_ERR, 0x1111]);
    sim.inject(late.to_message(0));
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(7.0, axis.read_actual_position().unwrap());
    assert_eq!(0.0, axis.read_position_error().unwrap());
    assert_eq!(0, mcs.tml().unwrap().pending());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_move_without_wait() {
    let (sim, mcs, axis) = setup(SimAxis::default());

    let cmd = MoveCommand::absolute(20.0);
    assert_eq!(
        MoveOutcome::Started,
        axis.move_to(&cmd, Wait::NoWait).unwrap()
    );
    let last = sim.sent_to_axis(AXIS).last().map(|i| i.opcode);
    assert_eq!(Some(tml::UPDATE), last);

    let cmd = cmd.mode(DriveMode::StopOnBlock);
    sim.clear_trace();
    assert!(matches!(
        axis.move_to(&cmd, Wait::NoWait),
        Err(McsError::UnsupportedMove { .. })
    ));
    assert!(sim.sent_to_axis(AXIS).is_empty());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_blocked_axis_holds_current() {
    let (sim, mcs, axis) = setup(SimAxis {
        blocked: true,
        ..Default::default()
    });

    let cmd = MoveCommand::absolute(300.0).mode(DriveMode::HoldCurrent);
    assert_eq!(
        MoveOutcome::HoldingCurrentLimit,
        axis.move_to(&cmd, Wait::secs(10.0)).unwrap()
    );
    assert_eq!(0xFFFF, sim.with_axis(AXIS, |a| a.read16(registers::TERRMAX)));
    assert!(!opcodes_sent(&sim).contains(&tml::STOP_CURRENT));
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_blocked_axis_stops_on_block() {
    let (sim, mcs, axis) = setup(SimAxis {
        blocked: true,
        ..Default::default()
    });

    let cmd = MoveCommand::absolute(300.0).mode(DriveMode::StopOnBlock);
    assert_eq!(
        MoveOutcome::StoppedAtCurrentLimit,
        axis.move_to(&cmd, Wait::secs(10.0)).unwrap()
    );
    assert_eq!(Some(&tml::STOP_CURRENT), opcodes_sent(&sim).last());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_blocked_axis_times_out_in_position_mode() {
    let (_sim, mcs, axis) = setup(SimAxis {
        blocked: true,
        ..Default::default()
    });

    let cmd = MoveCommand::absolute(300.0);
    assert!(matches!(
        axis.move_to(&cmd, Wait::Timeout(Duration::from_millis(300))),
        Err(McsError::AxisTimeout { axis: AXIS })
    ));
    assert!(!axis.is_ready());
    assert!(!axis.is_target_reached());

    assert_eq!(
        WaitOutcome::TargetNotReached,
        axis.wait_ready(Wait::secs(10.0), DriveMode::HoldCurrent).unwrap()
    );
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_fault_is_reported_with_motion_errors() {
    let mut sim_axis = SimAxis::default();
    sim_axis.sr32 |= sr32::FAULT;
    sim_axis.memory.insert(registers::MER, 0x0008);
    let (_sim, mcs, axis) = setup(sim_axis);

    match axis.move_to(&MoveCommand::absolute(10.0), Wait::secs(5.0)) {
        Err(McsError::AxisFault { axis, description }) => {
            assert_eq!(AXIS, axis);
            assert_contains!(description, "Control error");
        }
        other => panic!("Expected fault, got {other:?}"),
    }
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_axis_off_is_reported() {
    let (sim, mcs, axis) = setup(SimAxis::default());

    axis.axis_off().unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert!(axis.is_off());
    assert!(matches!(
        axis.wait_ready(Wait::secs(1.0), DriveMode::Position),
        Err(McsError::AxisOff { axis: AXIS })
    ));

    axis.axis_on().unwrap();
    assert_eq!(
        WaitOutcome::MotionComplete,
        axis.wait_ready(Wait::secs(1.0), DriveMode::Position).unwrap()
    );
    assert_eq!(vec![tml::AXIS_OFF, tml::AXIS_ON], opcodes_sent(&sim));
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_stop_and_home() {
    let (sim, mcs, axis) = setup(SimAxis::default());

    axis.stop(StopMode::Ramp).unwrap();
    axis.stop(StopMode::Current).unwrap();
    axis.home(3, 5.0, 0.0, Wait::NoWait).unwrap();

    let sent = opcodes_sent(&sim);
    assert_eq!(tml::STOP_RAMP, sent[0]);
    assert_eq!(tml::SET_TARGET_TO_ACTUAL, sent[1]);
    assert_eq!(tml::STOP_CURRENT, sent[2]);
    assert_eq!(tml::SET_TARGET_TO_ACTUAL, sent[3]);
    assert_eq!(Some(&(tml::HOMING | 3)), sent.last());
    assert_eq!(327, sim.with_axis(AXIS, |a| a.read32(registers::HOME_SPD)));
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_missing_axis_does_not_answer() {
    let (_sim, mcs, _axis) = setup(SimAxis::default());
    assert!(matches!(mcs.axis(2), Err(McsError::NoAnswer { axis: 2 })));
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_axis_needs_tml() {
    let sim = Arc::new(SimBus::new());
    sim.add_axis(AXIS, SimAxis::default());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::Ignore);
    assert!(mcs.tml().is_none());
    assert!(matches!(mcs.axis(AXIS), Err(McsError::TmlDisabled)));
    mcs.close().unwrap();
}
