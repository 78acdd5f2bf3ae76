//! The bus: a transport plus time stamping, traffic history and traffic capture
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mcs_common::{
    constants::{BUS_HISTORY_SIZE, DEFAULT_LOG_LENGTH},
    names::describe,
    CanId, CanMessage, CanTransport,
};
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use parking_lot::Mutex;
use snafu::ResultExt as _;

use crate::error::{BusOpenSnafu, Result, TrafficLogSnafu, TransportSnafu};

/// Size at which the traffic capture file is rotated
const TRAFFIC_LOG_MAX_BYTES: usize = 16 * 1024 * 1024;
/// Number of rotated capture files kept
const TRAFFIC_LOG_BACKUPS: usize = 10;

fn host_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// A size-rotated text file receiving one line per frame
///
/// `<path>.1` is the newest backup, `<path>.10` the oldest.
struct TrafficLog {
    file: FileRotate<AppendCount>,
}

impl TrafficLog {
    fn open(path: &Path, max_bytes: usize) -> Result<Self> {
        // FileRotate only reports an unusable path on the first write
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .context(TrafficLogSnafu { path })?;
        let file = FileRotate::new(
            path,
            AppendCount::new(TRAFFIC_LOG_BACKUPS),
            ContentLimit::Bytes(max_bytes),
            Compression::None,
            #[cfg(unix)]
            None,
        );
        Ok(Self { file })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        writeln!(self.file, "{line}")
    }
}

/// Default capture file name, e.g. `mcs_2021-01-26-16_50_03.log`
pub fn default_traffic_log_path() -> PathBuf {
    PathBuf::from(
        chrono::Local::now()
            .format("mcs_%Y-%m-%d-%H_%M_%S.log")
            .to_string(),
    )
}

/// Wraps a [`CanTransport`] with time stamping, a bounded history and optional traffic capture
///
/// `send` and `read` take `&self` and may be called from any thread; the bus does not serialize
/// sends. Command serialization is per device.
pub struct Bus {
    transport: Arc<dyn CanTransport>,
    /// Adapter clock minus host clock, in seconds, learned from the first received frame
    time_shift: OnceLock<f64>,
    history: Mutex<VecDeque<CanMessage>>,
    traffic_log: Mutex<Option<TrafficLog>>,
}

impl core::fmt::Debug for Bus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bus")
            .field("time_shift", &self.time_shift.get())
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Create a bus on top of `transport`. The transport is not opened.
    pub fn new(transport: Arc<dyn CanTransport>) -> Self {
        Self {
            transport,
            time_shift: OnceLock::new(),
            history: Mutex::new(VecDeque::with_capacity(BUS_HISTORY_SIZE)),
            traffic_log: Mutex::new(None),
        }
    }

    /// Open the transport
    pub fn open(&self) -> Result<()> {
        self.transport
            .open()
            .inspect_err(|e| log::error!("Cannot open CAN connection: {e}"))
            .context(BusOpenSnafu)
    }

    /// Close the transport
    pub fn close(&self) {
        self.transport.close();
    }

    /// Adapter clock offset, once known
    pub fn time_shift(&self) -> Option<f64> {
        self.time_shift.get().copied()
    }

    fn record(&self, msg: &CanMessage) {
        let txt = describe(msg);
        log::debug!("{txt}");
        {
            let mut traffic_log = self.traffic_log.lock();
            if let Some(file) = traffic_log.as_mut() {
                if let Err(e) = file.write_line(&txt) {
                    log::error!("Traffic log write failed, stopping capture: {e}");
                    *traffic_log = None;
                }
            }
        }
        let mut history = self.history.lock();
        if history.len() == BUS_HISTORY_SIZE {
            history.pop_front();
        }
        history.push_back(*msg);
    }

    /// Send a data frame and record it
    ///
    /// Once the adapter clock offset is known the returned frame carries a time stamp on the
    /// adapter clock.
    pub fn send(&self, id: CanId, data: &[u8]) -> Result<CanMessage> {
        let mut msg = CanMessage::new(id, data);
        if let Some(shift) = self.time_shift.get() {
            let stamp = (shift + host_time()).max(0.0);
            msg = msg.with_timestamp(Duration::from_secs_f64(stamp));
        }
        self.record(&msg);
        self.transport.send(&msg).context(TransportSnafu)?;
        Ok(msg)
    }

    /// Read the next frame from the transport, if any
    ///
    /// Returns within the transport's read timeout. Called by the reader thread only.
    pub fn read(&self) -> Option<CanMessage> {
        let msg = self.transport.read()?;
        if self.time_shift.get().is_none() {
            if let Some(stamp) = msg.timestamp() {
                let now = host_time();
                let shift = stamp.as_secs_f64() - now;
                if self.time_shift.set(shift).is_ok() {
                    log::debug!("Time shift set to {shift} ({} - {now})", stamp.as_secs_f64());
                }
            }
        }
        self.record(&msg);
        Some(msg)
    }

    /// The last `n` frames sent or received, oldest first; all of them for `None`
    pub fn recent_commands(&self, n: Option<usize>) -> Vec<CanMessage> {
        let history = self.history.lock();
        let skip = n.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).copied().collect()
    }

    /// Log the last `n` frames (default 20) at debug level
    pub fn log_recent_commands(&self, n: Option<usize>) {
        let commands = self.recent_commands(Some(n.unwrap_or(DEFAULT_LOG_LENGTH)));
        let mut text = format!("Last {} commands for all devices:\n", commands.len());
        for msg in &commands {
            text.push_str(&describe(msg));
            text.push('\n');
        }
        log::debug!("{text}");
    }

    /// Mirror all traffic to a rotating file
    ///
    /// Without a path, `mcs_<date>-<time>.log` in the working directory is used. Replaces any
    /// capture already running.
    pub fn log_to_file(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.map_or_else(default_traffic_log_path, Path::to_path_buf);
        let file = TrafficLog::open(&path, TRAFFIC_LOG_MAX_BYTES)?;
        log::info!("Logging CAN traffic to {}", path.display());
        *self.traffic_log.lock() = Some(file);
        Ok(path)
    }

    /// Stop mirroring traffic to a file
    pub fn stop_log_to_file(&self) {
        if self.traffic_log.lock().take().is_some() {
            log::info!("Stopped CAN traffic logging");
        }
    }
}
