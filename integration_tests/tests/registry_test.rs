use std::sync::Arc;
use std::time::Duration;

use assertables::{assert_contains, assert_starts_with};
use integration_tests::prelude::*;
use mcs_client::mcs_common::{commands::InfoId, CanId, CanMessage, PortRef};

const CONFIG: &str = r#"
    [names]
    0x11 = "left piezo"

    [error_codes]
    0x0101 = "valve stuck"

    [device_types.valve.ports."valve open"]
    id = 1
    len = 1
    limits = { min = 0, max = 1 }

    [device_types.valve.ports."flow"]
    id = 2
    len = 2
    signed = true
    access = "r"
    factor = 0.5

    [device_types.valve.parameters."open delay"]
    id = 128
    default = 20

    [[devices]]
    address = 0x3a
    type = "valve"
    name = "bottle valve"
"#;

fn config() -> McsConfig {
    McsConfig::load_from_str(CONFIG).unwrap()
}

#[test]
#[serial_test::serial]
fn test_master_and_slave_ids_give_the_same_device() {
    let sim = Arc::new(SimBus::new());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::All);

    assert_eq!(256, mcs.registered_devices().len());
    for address in 0..=0xffu16 {
        let slave = mcs.get_device(address).unwrap();
        let master = mcs.get_device(0x400 | address).unwrap();
        assert!(Arc::ptr_eq(&slave, &master));
        assert_eq!(address as u8, slave.address().raw());
        assert_eq!(CanId::Std(address), slave.address().slave_id());
        assert_eq!(CanId::Std(0x400 + address), slave.address().master_id());
    }
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_scan_registers_responders_only() {
    let sim = Arc::new(SimBus::new());
    sim.add_module(0x11, SimModule::default());
    sim.add_module(0x29, SimModule::default());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::Scan);

    let found: Vec<u8> = mcs
        .registered_devices()
        .iter()
        .map(|d| d.address().raw())
        .collect();
    assert_eq!(vec![0x11, 0x29], found);
    assert!(matches!(
        mcs.get_device(0x12),
        Err(McsError::NotRegistered { .. })
    ));

    let requests = sim
        .trace()
        .iter()
        .filter(|m| m.data() == [opcodes::INFO, u8::from(InfoId::FirmwareVersion)])
        .count();
    assert_eq!(256, requests);

    // the scan consumed the firmware version answers
    let device = mcs.get_device(0x11).unwrap();
    assert_eq!(0, device.pending());
    device.set_port(1, 1, 1, 0, Wait::NoWait).unwrap();
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_auto_keeps_configured_devices() {
    let sim = Arc::new(SimBus::new());
    sim.add_module(0x3a, SimModule::default());
    sim.add_module(0x11, SimModule::default());
    let mcs = open_mcs(&sim, &config(), RegisterMode::Auto);

    // the configured device exists, so no scan ran
    assert!(mcs.is_registered(0x3a));
    assert!(!mcs.is_registered(0x11));
    assert!(sim.sent_to(0x11).is_empty());

    let registered = mcs.create_device(0x11);
    assert_eq!("left piezo 0x11", registered.to_string());
    assert_eq!("bottle valve", mcs.get_device(0x3a).unwrap().name());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_reader_drops_frames_it_cannot_route() {
    let sim = Arc::new(SimBus::new());
    sim.add_module(0x11, SimModule::default());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::Scan);
    let device = mcs.get_device(0x11).unwrap();
    let history = device.history().len();

    sim.inject(CanMessage::new_error(CanId::Std(0x011), &[0, 1]));
    sim.inject(CanMessage::new_rtr(CanId::Std(0x011)));
    sim.inject(CanMessage::new(CanId::Std(0x033), &[0, 2]));
    sim.inject(CanMessage::new(CanId::Std(0x433), &[0x41, 1]));
    sim.inject(CanMessage::new(CanId::Extended(0x1234), &[1, 2]));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(0, device.pending());
    assert_eq!(history, device.history().len());
    assert!(!mcs.is_registered(0x33));

    device.set_port(5, 9, 1, 0, Wait::NoWait).unwrap();
    assert_eq!(9, device.get_port(5, false).unwrap());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_close_and_reopen() {
    let sim = Arc::new(SimBus::new());
    sim.add_module(0x11, SimModule::default());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::All);
    let device = mcs.get_device(0x11).unwrap();
    device.init(0, Wait::secs(1.0)).unwrap();
    assert!(mcs.is_reading());

    mcs.close().unwrap();
    assert!(!mcs.is_reading());
    // devices keep their last known status
    assert!(device.is_prepared());
    assert!(matches!(
        device.get_port(1, false),
        Err(McsError::Transport { .. })
    ));

    mcs.open(RegisterMode::Ignore).unwrap();
    assert!(mcs.is_reading());
    assert!(Arc::ptr_eq(&device, &mcs.get_device(0x11).unwrap()));
    device.get_port(1, false).unwrap();
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_recent_commands() {
    let sim = Arc::new(SimBus::new());
    sim.add_module(0x11, SimModule::default());
    let mcs = open_mcs(&sim, &McsConfig::default(), RegisterMode::All);
    let device = mcs.get_device(0x11).unwrap();
    device.get_port(3, false).unwrap();

    let recent = mcs.recent_commands(Some(2));
    assert_eq!(2, recent.len());
    assert_eq!(CanId::Std(0x411), recent[0].id());
    assert_eq!([opcodes::GET_PORT, 3], recent[0].data());
    assert_eq!(CanId::Std(0x011), recent[1].id());
    assert_eq!(opcodes::PORT_DATA, recent[1].data()[0]);
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_traffic_capture() {
    let path = std::env::temp_dir().join("mcs_traffic_capture_test.log");
    std::fs::remove_file(&path).ok();
    let mut config = McsConfig::default();
    config.traffic_log = Some(path.clone());

    let sim = Arc::new(SimBus::new());
    sim.add_module(0x11, SimModule::default());
    let mcs = open_mcs(&sim, &config, RegisterMode::All);
    mcs.get_device(0x11).unwrap().get_port(3, false).unwrap();
    mcs.close().unwrap();
    mcs.bus().stop_log_to_file();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(2, lines.len());
    assert_contains!(lines[0], "0411 S");
    assert_contains!(lines[1], "0011 S");
    std::fs::remove_file(&path).ok();
}

#[test]
#[serial_test::serial]
fn test_hardware_device() {
    let sim = Arc::new(SimBus::new());
    sim.add_module(0x3a, SimModule::default());
    let mcs = open_mcs(&sim, &config(), RegisterMode::Ignore);
    let _logger = TraceLogger::new(&sim);

    let devices = mcs.configured_devices().unwrap();
    assert_eq!(1, devices.len());
    let valve = &devices[0];
    assert_eq!("valve", valve.device_type());
    assert_eq!(0x3a, valve.device().address().raw());

    valve.startup().unwrap();
    assert!(valve.device().is_prepared());

    valve.write_port("valve open", 1.0, 0).unwrap();
    assert_eq!(1.0, valve.read_port("valve open").unwrap());
    assert_eq!(1.0, valve.read_port(1u8).unwrap());
    assert_eq!(Some(vec![1]), sim.with_module(0x3a, |m| m.ports.get(&1).cloned()));

    assert!(matches!(
        valve.write_port("valve open", 2.0, 0),
        Err(McsError::OutOfRange { raw: 2, .. })
    ));
    assert!(matches!(
        valve.write_port("flow", 1.0, 0),
        Err(McsError::AccessDenied { .. })
    ));
    assert!(matches!(
        valve.read_port("pressure"),
        Err(McsError::Catalogue { .. })
    ));

    sim.with_module(0x3a, |m| {
        m.ports.insert(2, (-15i16).to_le_bytes().to_vec());
    });
    assert_eq!(-7.5, valve.read_port(PortRef::ById(2)).unwrap());

    valve.write_parameter_defaults().unwrap();
    let raw = sim.with_module(0x3a, |m| m.parameters.get(&128).cloned());
    assert_eq!(Some(20), raw.map(|bytes| bytes[0]));
    assert_eq!(20.0, valve.read_parameter("open delay").unwrap());

    let version = valve.firmware_version().unwrap();
    assert_starts_with!(version.research_string(), "2.1.1");

    valve.shutdown().unwrap();
    assert!(valve.device().is_not_initialized());
    mcs.close().unwrap();
}

#[test]
#[serial_test::serial]
fn test_nack_uses_configured_error_text() {
    let sim = Arc::new(SimBus::new());
    let mut module = SimModule {
        error_code: 0x0101,
        ..Default::default()
    };
    module.nack.insert(opcodes::SET_PORT);
    sim.add_module(0x3a, module);
    let mcs = open_mcs(&sim, &config(), RegisterMode::Ignore);

    let valve = mcs.hardware_device(0x3a, "valve").unwrap();
    match valve.write_port("valve open", 1.0, 0) {
        Err(McsError::Nacked { error_text, .. }) => assert_eq!("valve stuck", error_text),
        other => panic!("Expected NACK, got {other:?}"),
    }
    assert!(matches!(
        mcs.hardware_device(0x3a, "pump"),
        Err(McsError::Catalogue { .. })
    ));
    mcs.close().unwrap();
}
