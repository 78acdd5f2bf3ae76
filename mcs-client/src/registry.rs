//! The device registry and the bus reader thread
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::{Mutex, RwLock};
use snafu::{OptionExt as _, ResultExt as _};

use mcs_common::{
    commands::InfoId,
    config::DeviceBinding,
    constants::{opcodes, READER_JOIN_TIMEOUT, SCAN_REQUEST_GAP, SCAN_SETTLE_TIME},
    Address, AxisProperties, CanId, CanMessage, CanTransport, ErrorCodes, FrameKind, McsConfig,
    RegisterMode,
};

use crate::{
    bus::Bus,
    device::Device,
    error::{CatalogueSnafu, NotRegisteredSnafu, ReaderStuckSnafu, Result, TmlDisabledSnafu},
    hardware_device::HardwareDevice,
    tml::{TmlAxis, TmlHandler},
};

/// Number of device slots, one per 8-bit address
const SLOTS: usize = 256;
/// Pause of the reader when the transport has nothing to deliver
const READER_IDLE: Duration = Duration::from_millis(1);

type DeviceTable = RwLock<Vec<Option<Arc<Device>>>>;

struct Reader {
    stop: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Registry of the MCS modules on one bus
///
/// Owns the [`Bus`], the device table and the single reader thread that distributes received
/// frames to the devices and the TML handler. Registration is meant to happen while setting up;
/// it is safe to do while the reader runs, but frames for a device that is being replaced may be
/// lost.
pub struct Mcs {
    bus: Arc<Bus>,
    devices: Arc<DeviceTable>,
    tml: Option<Arc<TmlHandler>>,
    errors: Arc<ErrorCodes>,
    config: McsConfig,
    reader: Mutex<Option<Reader>>,
}

impl core::fmt::Debug for Mcs {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mcs")
            .field("bus", &self.bus)
            .field("registered", &self.registered_devices().len())
            .field("tml", &self.tml.is_some())
            .finish_non_exhaustive()
    }
}

fn dispatch(msg: CanMessage, devices: &DeviceTable, tml: Option<&TmlHandler>) {
    match msg.kind() {
        FrameKind::Data => (),
        FrameKind::Error => {
            log::error!("Error frame on bus detected: {msg}");
            return;
        }
        FrameKind::Remote | FrameKind::Fd => {
            log::error!("Non-MCS conform CAN frame read: {msg}");
            return;
        }
    }
    match msg.id() {
        CanId::Extended(_) => match tml {
            Some(tml) => tml.put_msg(&msg),
            None => log::debug!("No TML handler for extended frame: {msg}"),
        },
        CanId::Std(id) if id >= SLOTS as u16 => {
            log::debug!("Ignoring frame sent to a module: {msg}");
        }
        CanId::Std(id) => {
            let device = devices.read()[id as usize].clone();
            match device {
                Some(device) => device.put_msg(msg),
                None => log::debug!("Received message from unregistered module: {msg}"),
            }
        }
    }
}

fn read_loop(
    bus: Arc<Bus>,
    devices: Arc<DeviceTable>,
    tml: Option<Arc<TmlHandler>>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        match bus.read() {
            Some(msg) => dispatch(msg, &devices, tml.as_deref()),
            None => std::thread::sleep(READER_IDLE),
        }
    }
}

impl Mcs {
    /// Create a registry on `transport` with built-in names and error texts and no TML handler
    pub fn new(transport: Arc<dyn CanTransport>) -> Self {
        Self {
            bus: Arc::new(Bus::new(transport)),
            devices: Arc::new(RwLock::new(vec![None; SLOTS])),
            tml: None,
            errors: Arc::new(ErrorCodes::default()),
            config: McsConfig::default(),
            reader: Mutex::new(None),
        }
    }

    /// Create a registry on the socketcan interface `interface`
    #[cfg(all(feature = "socketcan", target_os = "linux"))]
    #[cfg_attr(docsrs, doc(cfg(feature = "socketcan")))]
    pub fn socketcan(interface: &str) -> Self {
        Self::new(Arc::new(mcs_common::SocketCanTransport::new(interface)))
    }

    /// Create a registry described by `config`
    ///
    /// Devices bound in the config are registered right away and carry their configured names.
    /// A TML handler is attached if the config lists axes. Failing to start the traffic capture
    /// is logged, not fatal.
    pub fn from_config(config: &McsConfig, transport: Arc<dyn CanTransport>) -> Result<Self> {
        let errors = config.error_table().context(CatalogueSnafu)?;
        let mut mcs = Self::new(transport);
        mcs.errors = Arc::new(errors);
        mcs.config = config.clone();
        if !config.axes.is_empty() {
            mcs = mcs.with_tml();
        }
        if let Some(path) = &config.traffic_log {
            if let Err(e) = mcs.bus.log_to_file(Some(path)) {
                log::warn!("{e}");
            }
        }
        for binding in &config.devices {
            mcs.create_device(binding.address);
        }
        Ok(mcs)
    }

    /// Attach a TML handler, so extended frames are processed
    pub fn with_tml(mut self) -> Self {
        self.tml = Some(Arc::new(TmlHandler::new(self.bus.clone())));
        self
    }

    /// The bus
    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// The TML handler, if attached
    pub fn tml(&self) -> Option<&Arc<TmlHandler>> {
        self.tml.as_ref()
    }

    /// The configuration the registry was built from
    pub fn config(&self) -> &McsConfig {
        &self.config
    }

    /// Open the bus, start the reader and populate the device table according to `mode`
    pub fn open(&self, mode: RegisterMode) -> Result<()> {
        self.bus.open()?;
        self.start_reading();
        match mode {
            RegisterMode::All => {
                self.register_missing_devices(0..=u8::MAX);
            }
            RegisterMode::Scan => {
                self.scan_for_devices(0..=u8::MAX, SCAN_SETTLE_TIME)?;
            }
            RegisterMode::Auto if self.registered_devices().is_empty() => {
                self.scan_for_devices(0..=u8::MAX, SCAN_SETTLE_TIME)?;
            }
            RegisterMode::Auto | RegisterMode::Ignore => {
                log::debug!("Unregistered devices will be ignored");
            }
        }
        Ok(())
    }

    /// Stop the reader and close the bus
    ///
    /// Devices keep their last known status.
    pub fn close(&self) -> Result<()> {
        let stopped = self.stop_reading();
        self.bus.close();
        stopped
    }

    fn start_reading(&self) {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            log::warn!("Reader thread already running");
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = bounded(1);
        let bus = self.bus.clone();
        let devices = self.devices.clone();
        let tml = self.tml.clone();
        let thread_stop = stop.clone();
        let handle = std::thread::Builder::new()
            .name("mcs-reader".into())
            .spawn(move || {
                read_loop(bus, devices, tml, thread_stop);
                done_tx.send(()).ok();
            });
        match handle {
            Ok(handle) => {
                log::debug!("Reader thread started");
                *reader = Some(Reader { stop, done, handle });
            }
            Err(e) => log::error!("Cannot start reader thread: {e}"),
        }
    }

    fn stop_reading(&self) -> Result<()> {
        let Some(reader) = self.reader.lock().take() else {
            return Ok(());
        };
        reader.stop.store(true, Ordering::Relaxed);
        match reader.done.recv_timeout(READER_JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if reader.handle.join().is_err() {
                    log::error!("Reader thread panicked");
                }
                log::debug!("Reader thread stopped");
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                log::error!("Reader thread did not terminate in time");
                ReaderStuckSnafu.fail()
            }
        }
    }

    /// True while the reader thread runs
    pub fn is_reading(&self) -> bool {
        self.reader.lock().is_some()
    }

    fn device_name(&self, address: u8) -> String {
        self.config
            .device_name(address)
            .unwrap_or_else(|| format!("Module 0x{address:02x}"))
    }

    /// True if a device is registered for the address of `id`
    pub fn is_registered(&self, id: u16) -> bool {
        self.devices.read()[(id & 0xff) as usize].is_some()
    }

    /// The device registered for `id`
    ///
    /// Only the low 8 bits are used, so the master and slave ids of a module give the same device.
    pub fn get_device(&self, id: u16) -> Result<Arc<Device>> {
        let address = Address::from_can_id(id);
        self.devices.read()[address.raw() as usize]
            .clone()
            .context(NotRegisteredSnafu { address })
    }

    /// All registered devices, by ascending address
    pub fn registered_devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().iter().flatten().cloned().collect()
    }

    /// Register `device`, replacing any device at its address
    pub fn register(&self, device: Arc<Device>) {
        let slot = device.address().raw() as usize;
        if let Some(old) = self.devices.write()[slot].replace(device) {
            log::debug!("Replaced registered device {old}");
        }
    }

    /// Remove the device registered for `id`
    pub fn unregister(&self, id: u16) -> Option<Arc<Device>> {
        self.devices.write()[(id & 0xff) as usize].take()
    }

    /// Create and register a device for `address`
    pub fn create_device(&self, address: u8) -> Arc<Device> {
        let device = Arc::new(Device::new(
            Address::new(address),
            self.device_name(address),
            self.bus.clone(),
            self.errors.clone(),
        ));
        self.register(device.clone());
        device
    }

    /// Register a plain device at each address in `ids` that has none
    ///
    /// Answers from an address without a device are dropped by the reader.
    pub fn register_missing_devices(&self, ids: impl IntoIterator<Item = u8>) {
        for address in ids {
            if !self.is_registered(address as u16) {
                self.create_device(address);
            }
        }
    }

    /// Query each address in `ids` and return the devices that answer
    ///
    /// Sends a firmware version request to every address without waiting, then gives the modules
    /// `settle` to answer. Responders stay registered, all others are unregistered.
    pub fn scan_for_devices(
        &self,
        ids: impl IntoIterator<Item = u8>,
        settle: Duration,
    ) -> Result<Vec<Arc<Device>>> {
        let ids: Vec<u8> = ids.into_iter().collect();
        self.register_missing_devices(ids.iter().copied());
        for &address in &ids {
            let device = self.get_device(address as u16)?;
            device.clear_buffer();
            device.send(&[opcodes::INFO, u8::from(InfoId::FirmwareVersion)], false)?;
            std::thread::sleep(SCAN_REQUEST_GAP);
        }
        std::thread::sleep(settle);
        let mut found = Vec::new();
        for &address in &ids {
            let device = self.get_device(address as u16)?;
            if device.pending() > 0 {
                device.clear_buffer();
                found.push(device);
            } else {
                self.unregister(address as u16);
            }
        }
        log::info!(
            "Found {} devices: {}",
            found.len(),
            found
                .iter()
                .map(|d| d.address().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(found)
    }

    /// The last `n` frames on the bus, all of them for `None`
    pub fn recent_commands(&self, n: Option<usize>) -> Vec<CanMessage> {
        self.bus.recent_commands(n)
    }

    /// Log the last `n` frames on the bus
    pub fn log_recent_commands(&self, n: Option<usize>) {
        self.bus.log_recent_commands(n);
    }

    /// The device at `address` with the catalogue entry `device_type`
    pub fn hardware_device(&self, address: u8, device_type: &str) -> Result<HardwareDevice> {
        let device = self.get_device(address as u16)?;
        let profile = self.config.device_type(device_type).context(CatalogueSnafu)?;
        Ok(HardwareDevice::new(device, device_type, profile))
    }

    /// A [`HardwareDevice`] for every device bound in the config
    pub fn configured_devices(&self) -> Result<Vec<HardwareDevice>> {
        self.config
            .devices
            .iter()
            .map(|DeviceBinding { address, device_type, .. }| {
                self.hardware_device(*address, device_type)
            })
            .collect()
    }

    /// A handle for TML axis `axis_id`
    ///
    /// Uses the configured properties of the axis if there are any. Reads the axis defaults, so
    /// the bus must be open.
    pub fn axis(&self, axis_id: u8) -> Result<TmlAxis> {
        let tml = self.tml.clone().context(TmlDisabledSnafu)?;
        let properties = self
            .config
            .axes
            .iter()
            .find(|a| a.axis_id == axis_id)
            .cloned()
            .unwrap_or_else(|| AxisProperties::new(axis_id));
        TmlAxis::new(tml, properties)
    }
}

impl Drop for Mcs {
    fn drop(&mut self) {
        if self.is_reading() {
            if let Err(e) = self.close() {
                log::error!("Closing MCS on drop failed: {e}");
            }
        }
    }
}
