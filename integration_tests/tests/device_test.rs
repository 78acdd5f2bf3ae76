use std::sync::Arc;
use std::time::{Duration, Instant};

use assertables::{assert_contains, assert_ge, assert_lt};
use integration_tests::prelude::*;
use mcs_client::mcs_common::{
    commands::{PortMode, PortParameter},
    Address, CanId,
};

const ADDR: u8 = 0x11;

fn setup(module: SimModule) -> (Arc<SimBus>, Mcs) {
    let sim = Arc::new(SimBus::new());
    sim.add_module(ADDR, module);
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::All);
    (sim, mcs)
}

#[test]
#[serial_test::serial]
fn test_reset_and_init() {
    let (sim, mcs) = setup(SimModule {
        busy_time: Duration::from_millis(50),
        ..Default::default()
    });
    let _logger = TraceLogger::new(&sim);
    let device = mcs.get_device(0x400 | ADDR as u16).unwrap();

    device.reset(reset_mask::ALL, Wait::secs(5.0)).unwrap();
    assert!(device.is_not_initialized());

    device.init(0, Wait::secs(5.0)).unwrap();
    assert!(!device.is_busy());
    assert!(!device.is_not_initialized());
    assert!(device.is_prepared());
    assert!(!device.has_error());

    assert_eq!(
        vec![vec![opcodes::RESET, reset_mask::ALL], vec![opcodes::INIT, 0]],
        sim.sent_to(ADDR)
    );
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_set_and_get_port() {
    let (sim, mcs) = setup(SimModule::default());
    let device = mcs.get_device(ADDR as u16).unwrap();

    device.set_port(7, 200, 2, 0, Wait::NoWait).unwrap();
    assert_eq!(200, device.get_port(7, false).unwrap());

    device.set_port(3, -1, 2, 0, Wait::NoWait).unwrap();
    assert_eq!(-1, device.get_port(3, true).unwrap());
    assert_eq!(0xffff, device.get_port(3, false).unwrap());

    device.set_port_u8(4, 0x81).unwrap();
    assert_eq!(0x81, device.get_port_u8(4).unwrap());
    assert_eq!(-127, device.get_port_i8(4).unwrap());

    let sent = sim.sent_to(ADDR);
    assert_eq!(vec![opcodes::SET_PORT, 0, 7, 0, 200, 0], sent[0]);
    assert_eq!(vec![opcodes::GET_PORT, 7], sent[1]);
    assert_eq!(vec![opcodes::SET_PORT, 0, 3, 0, 0xff, 0xff], sent[2]);
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_parameters() {
    let (_sim, mcs) = setup(SimModule::default());
    let device = mcs.get_device(ADDR as u16).unwrap();

    device.set_parameter(0x80, -20, 4).unwrap();
    assert_eq!(-20, device.get_parameter(0x80, true).unwrap());
    device.set_parameter_u32(0x81, 0x1234_5678).unwrap();
    assert_eq!(0x1234_5678, device.get_parameter_u32(0x81).unwrap());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_no_responder_times_out() {
    let sim = Arc::new(SimBus::new());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::All);
    let device = mcs.get_device(0x422).unwrap();

    let start = Instant::now();
    let result = device.get_port(1, false);
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(McsError::Timeout { address, .. }) if address == Address::new(0x22)));
    assert_ge!(elapsed, Duration::from_millis(300));
    assert_lt!(elapsed, Duration::from_millis(1000));
    // the history shows the unanswered request
    assert_eq!(1, device.history().len());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_nack_reports_error_codes() {
    let mut module = SimModule {
        error_code: 0x0101,
        warning_code: 0x0007,
        ..Default::default()
    };
    module.nack.insert(opcodes::MOVE);
    let (sim, mcs) = setup(module);
    let _logger = TraceLogger::new(&sim);
    let device = mcs.get_device(ADDR as u16).unwrap();

    match device.move_abs(1000, 100, Wait::NoWait) {
        Err(McsError::Nacked {
            error_code,
            warning_code,
            history,
            ..
        }) => {
            assert_eq!(0x0101, error_code);
            assert_eq!(0x0007, warning_code);
            assert!(!history.is_empty());
        }
        other => panic!("Expected NACK, got {other:?}"),
    }

    let sent = sim.sent_to(ADDR);
    assert_eq!(opcodes::MOVE, sent[0][0]);
    assert_eq!(vec![opcodes::INFO, opcodes::INFO_ERROR], sent[1]);
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_error_flag_raises_hardware_fault() {
    let (sim, mcs) = setup(SimModule::default());
    let device = mcs.get_device(ADDR as u16).unwrap();
    device.init(0, Wait::secs(1.0)).unwrap();

    let status = sim.with_module(ADDR, |m| {
        m.status |= Status::ERROR;
        m.error_code = 0x42;
        m.status
    });
    sim.emit(ADDR, &[opcodes::INFO_STATUS, status, 0x00]);
    std::thread::sleep(Duration::from_millis(50));
    assert!(device.has_error());
    // state changes are not buffered
    assert_eq!(0, device.pending());

    assert!(matches!(
        device.wait(Wait::NoWait),
        Err(McsError::HardwareFault { error_code: 0x42, .. })
    ));
    assert!(matches!(
        device.get_port(1, false),
        Err(McsError::HardwareFault { error_code: 0x42, .. })
    ));

    device.reset(reset_mask::ERROR, Wait::secs(1.0)).unwrap();
    assert!(!device.has_error());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_wait_for_busy_module_times_out() {
    let (_sim, mcs) = setup(SimModule {
        stay_busy: true,
        ..Default::default()
    });
    let device = mcs.get_device(ADDR as u16).unwrap();

    let start = Instant::now();
    let result = device.init(0, Wait::Timeout(Duration::from_millis(100)));
    assert!(matches!(result, Err(McsError::Timeout { .. })));
    assert_ge!(start.elapsed(), Duration::from_millis(100));
    assert!(device.is_busy());

    // without waiting the busy flag is not checked
    device.operate(0, Wait::NoWait).unwrap();
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_commands_on_one_device_do_not_interleave() {
    let (sim, mcs) = setup(SimModule {
        response_delay: Duration::from_millis(20),
        ..Default::default()
    });
    let device = mcs.get_device(ADDR as u16).unwrap();
    device.set_port(1, 5, 1, 0, Wait::NoWait).unwrap();
    sim.clear_trace();

    std::thread::scope(|s| {
        for _ in 0..2 {
            let device = device.clone();
            s.spawn(move || {
                for _ in 0..5 {
                    assert_eq!(5, device.get_port(1, false).unwrap());
                }
            });
        }
    });

    let ids: Vec<CanId> = sim.trace().iter().map(|m| m.id()).collect();
    assert_eq!(20, ids.len());
    for pair in ids.chunks(2) {
        assert_eq!(vec![CanId::Std(0x411), CanId::Std(0x011)], pair.to_vec());
    }
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_memory_is_split_into_telegrams() {
    let (sim, mcs) = setup(SimModule::default());
    let device = mcs.get_device(ADDR as u16).unwrap();
    let data: Vec<u8> = (1..=10).collect();

    device.set_mem(0x1000, &data).unwrap();
    assert_eq!(data, device.get_mem(0x1000, 10).unwrap());

    let sent = sim.sent_to(ADDR);
    let set_mem: Vec<_> = sent.iter().filter(|d| d[0] == opcodes::SET_MEM).collect();
    let get_mem: Vec<_> = sent.iter().filter(|d| d[0] == opcodes::GET_MEM).collect();
    assert_eq!(3, set_mem.len());
    assert_eq!(&vec![opcodes::SET_MEM, 0x08, 0x10, 0x00, 9, 10], set_mem[2]);
    assert_eq!(2, get_mem.len());
    assert_eq!(&vec![opcodes::GET_MEM, 0x07, 0x10, 0x00, 3], get_mem[1]);

    device.erase_mem(0x1000, Wait::secs(1.0)).unwrap();
    assert_eq!(vec![0xff; 3], device.get_mem(0x1000, 3).unwrap());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_motion_commands() {
    let (_sim, mcs) = setup(SimModule {
        busy_time: Duration::from_millis(20),
        ..Default::default()
    });
    let device = mcs.get_device(ADDR as u16).unwrap();

    device.move_abs(1234, 50, Wait::secs(1.0)).unwrap();
    assert_eq!((1234, 50), device.get_move().unwrap());
    device.move_rel(-34, 60, Wait::secs(1.0)).unwrap();
    assert_eq!((1200, 60), device.get_move().unwrap());

    device.set_ramping(100, 200).unwrap();
    assert_eq!((100, 200), device.get_ramping().unwrap());

    device.set_discrete_position(3, -500).unwrap();
    assert_eq!(-500, device.get_discrete_position(3).unwrap());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_port_configuration() {
    let (_sim, mcs) = setup(SimModule::default());
    let device = mcs.get_device(ADDR as u16).unwrap();

    device.set_port_mode(2, PortMode::Auto, 10, 20).unwrap();
    assert_eq!(PortMode::Auto, device.get_port_mode(2).unwrap());
    assert_eq!(PortMode::Normal, device.get_port_mode(5).unwrap());

    device
        .set_port_parameter(2, PortParameter::UpperLimit, -300, 4)
        .unwrap();
    assert_eq!(
        -300,
        device
            .get_port_parameter(2, PortParameter::UpperLimit, true)
            .unwrap()
    );
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_info_requests() {
    let (sim, mcs) = setup(SimModule {
        aux: vec![1, 2, 3],
        ..Default::default()
    });
    let device = mcs.get_device(ADDR as u16).unwrap();

    let version = device.info_firmware_version().unwrap();
    assert_eq!((2, 1, 1, 'r'), version.as_tuple());
    assert_eq!("2.1.1.r", version.research_string());

    let hw = device.info_hardware_configuration().unwrap();
    assert_eq!(3, hw.hardware_version);
    assert_eq!(0x11, hw.boot_id);
    assert_eq!(0x0010, hw.boot_block);
    assert_eq!(0x0020, hw.main_block);

    let status = device.info(opcodes::INFO_STATUS).unwrap();
    assert_eq!(Status::NOT_INITIALIZED, status.data()[1]);

    assert_eq!(vec![1, 2, 3], device.get_aux_data().unwrap());
    device.set_aux_data(&[9, 8]).unwrap();
    assert_eq!(vec![9, 8], device.get_aux_data().unwrap());

    sim.with_module(ADDR, |m| m.com_error = 0x0203);
    assert_eq!(0x0203, device.info_com_error().unwrap());
    assert_eq!(0x0203, device.com_error_code());

    let history = device.history_text();
    assert_contains!(history, "0411 S");
    mcs.close().unwrap();
}
