use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, ShouldRetry, Socket};

use crate::{
    messages::{CanId, CanMessage, FrameKind},
    traits::{CanTransport, TransportError},
};

/// Time a read waits for a frame before giving up
const READ_TIMEOUT: Duration = Duration::from_millis(10);

fn socketcan_id_to_mcs_id(id: socketcan::CanId) -> CanId {
    match id {
        socketcan::CanId::Standard(id) => CanId::std(id.as_raw()),
        socketcan::CanId::Extended(id) => CanId::extended(id.as_raw()),
    }
}

fn mcs_id_to_socketcan_id(id: CanId) -> Option<socketcan::CanId> {
    match id {
        CanId::Extended(id) => socketcan::ExtendedId::new(id).map(Into::into),
        CanId::Std(id) => socketcan::StandardId::new(id).map(Into::into),
    }
}

fn socketcan_frame_to_mcs_message(frame: CanFrame) -> CanMessage {
    let id = socketcan_id_to_mcs_id(frame.can_id());
    match frame {
        CanFrame::Data(frame) => CanMessage::new(id, frame.data()),
        CanFrame::Remote(_) => CanMessage::new_rtr(id),
        CanFrame::Error(frame) => CanMessage::new_error(id, frame.data()),
    }
}

fn mcs_message_to_socket_frame(msg: &CanMessage) -> Option<CanFrame> {
    let id = mcs_id_to_socketcan_id(msg.id())?;
    match msg.kind() {
        FrameKind::Remote => CanFrame::new_remote(id, msg.dlc()),
        FrameKind::Data => CanFrame::new(id, msg.data()),
        FrameKind::Error | FrameKind::Fd => None,
    }
}

fn host_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// A [`CanTransport`] on a Linux socketcan interface
///
/// A socket opened by this transport does not receive the frames it sends.
#[derive(Debug)]
pub struct SocketCanTransport {
    interface: String,
    socket: RwLock<Option<Arc<CanSocket>>>,
}

impl SocketCanTransport {
    /// Create a transport for `interface`, e.g. "can0" or "vcan0". Nothing is opened yet.
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            socket: RwLock::new(None),
        }
    }

    /// The interface name
    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn socket(&self) -> Option<Arc<CanSocket>> {
        self.socket.read().ok().and_then(|s| s.clone())
    }
}

impl CanTransport for SocketCanTransport {
    fn open(&self) -> Result<(), TransportError> {
        let mut guard = self.socket.write().map_err(|_| TransportError::Open {
            message: "socket lock poisoned".into(),
        })?;
        if guard.is_some() {
            return Ok(());
        }
        let socket = CanSocket::open(&self.interface).map_err(|e| TransportError::Open {
            message: format!("{}: {e}", self.interface),
        })?;
        socket
            .set_read_timeout(READ_TIMEOUT)
            .map_err(|e| TransportError::Open {
                message: e.to_string(),
            })?;
        *guard = Some(Arc::new(socket));
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.socket.write() {
            guard.take();
        }
    }

    fn send(&self, msg: &CanMessage) -> Result<(), TransportError> {
        let socket = self.socket().ok_or(TransportError::NotOpen)?;
        let frame = mcs_message_to_socket_frame(msg).ok_or_else(|| TransportError::Send {
            message: format!("cannot build a frame from {msg}"),
        })?;
        socket.write_frame(&frame).map_err(|e| TransportError::Send {
            message: e.to_string(),
        })
    }

    fn read(&self) -> Option<CanMessage> {
        let socket = self.socket()?;
        match socket.read_frame() {
            Ok(frame) => Some(socketcan_frame_to_mcs_message(frame).with_timestamp(host_time())),
            Err(e) => {
                if !e.should_retry() {
                    log::error!("Error reading from {}: {e}", self.interface);
                    // Keeps a dead socket from spinning the reader
                    std::thread::sleep(READ_TIMEOUT);
                }
                None
            }
        }
    }
}
