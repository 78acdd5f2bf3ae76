//! Technosoft Motion Language (TML) over extended CAN frames
//!
//! A single [`TmlHandler`] serves all axes on the bus. The reader thread hands it every extended
//! frame; [`TmlAxis`] handles send instructions through it and take their answers from its
//! receive queue.
//!
//! Drives push their SR32 status register unsolicited whenever it changes. Those pushes only
//! update the handler's per-axis mirror. A caller expecting SR32 as the answer to an explicit read
//! arms the handler first with [`TmlHandler::wait_for_sr32`], so the next push is also queued.
//!
//! Reads go through [`TmlHandler::query`], which holds the handler's request lock from the send
//! until the answer is taken. Answers that do not match the pending read are discarded.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use mcs_common::{
    constants::{TML_POLL_INTERVAL, TML_QUEUE_SIZE, TML_RECEIVE_WINDOW, TML_SETTLE_TIME},
    tml::{TmlInstruction, AXIS_COUNT},
    CanMessage,
};

use crate::{bus::Bus, error::Result};

mod axis;

pub use axis::{
    AxisScaling, DriveMode, MoveCommand, MoveOutcome, StopMode, TmlAxis, WaitOutcome,
};

/// Receives and sends TML instructions for all axes
pub struct TmlHandler {
    bus: Arc<Bus>,
    queue: ArrayQueue<TmlInstruction>,
    /// Serializes request/answer pairs
    request: Mutex<()>,
    awaiting_sr32: [AtomicBool; AXIS_COUNT],
    sr32: [AtomicU32; AXIS_COUNT],
}

impl core::fmt::Debug for TmlHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TmlHandler")
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl TmlHandler {
    /// Create a handler sending on `bus`
    pub fn new(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            queue: ArrayQueue::new(TML_QUEUE_SIZE),
            request: Mutex::new(()),
            awaiting_sr32: core::array::from_fn(|_| AtomicBool::new(false)),
            sr32: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Handle an extended frame received from the bus
    ///
    /// Called by the reader thread.
    pub fn put_msg(&self, msg: &CanMessage) {
        let Some(instr) = TmlInstruction::from_message(msg) else {
            log::error!("Not a TML frame: {msg}");
            return;
        };
        match instr.sr32_push() {
            Some((axis, sr32)) if (axis as usize) < AXIS_COUNT => {
                let old = self.sr32[axis as usize].swap(sr32, Ordering::Relaxed);
                if old != sr32 {
                    log::trace!("Axis {axis}: SR32 0x{old:08x} -> 0x{sr32:08x}");
                }
                if self.awaiting_sr32[axis as usize].swap(false, Ordering::AcqRel) {
                    self.enqueue(instr);
                }
            }
            _ => self.enqueue(instr),
        }
    }

    fn enqueue(&self, instr: TmlInstruction) {
        if let Some(dropped) = self.queue.force_push(instr) {
            log::warn!("TML queue overflow: Discarding oldest instruction: {dropped:x?}");
        }
    }

    /// Queue the next SR32 telegram of `axis` as an answer instead of only mirroring it
    pub fn wait_for_sr32(&self, axis: u8) {
        if let Some(flag) = self.awaiting_sr32.get(axis as usize) {
            flag.store(true, Ordering::Release);
        }
    }

    /// Last SR32 value seen for `axis`
    pub fn sr32(&self, axis: u8) -> u32 {
        self.sr32
            .get(axis as usize)
            .map_or(0, |v| v.load(Ordering::Relaxed))
    }

    /// Number of instructions waiting in the receive queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Discard all queued instructions
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    /// Take the next queued instruction
    ///
    /// Waits a short settle time first, then polls for a bounded window. `None` means no answer
    /// arrived, which is left to the caller to judge.
    pub fn rcv(&self) -> Option<TmlInstruction> {
        self.rcv_matching(|_| true)
    }

    /// Like [`TmlHandler::rcv`], but discards instructions for which `expected` is false
    pub fn rcv_matching(
        &self,
        expected: impl Fn(&TmlInstruction) -> bool,
    ) -> Option<TmlInstruction> {
        std::thread::sleep(TML_SETTLE_TIME);
        let start = Instant::now();
        loop {
            while let Some(instr) = self.queue.pop() {
                if expected(&instr) {
                    return Some(instr);
                }
                log::debug!("Discarding unexpected TML answer {instr:x?}");
            }
            if start.elapsed() >= TML_RECEIVE_WINDOW {
                return None;
            }
            std::thread::sleep(TML_POLL_INTERVAL);
        }
    }

    fn transmit(&self, instr: &TmlInstruction, axis: u8) -> Result<CanMessage> {
        let msg = instr.to_message(axis);
        self.bus.send(msg.id(), msg.data())
    }

    /// Send `instr` to `axis`
    ///
    /// Waits for a running [`TmlHandler::query`] to take its answer first.
    pub fn send(&self, instr: &TmlInstruction, axis: u8) -> Result<CanMessage> {
        let _guard = self.request.lock();
        self.transmit(instr, axis)
    }

    /// Send `request` to `axis` and take the first answer for which `expected` is true
    ///
    /// Leftovers of earlier requests are discarded before sending. With `sr32` set the next SR32
    /// push of `axis` is queued as well. Only one query runs at a time.
    pub fn query(
        &self,
        request: &TmlInstruction,
        axis: u8,
        sr32: bool,
        expected: impl Fn(&TmlInstruction) -> bool,
    ) -> Result<Option<TmlInstruction>> {
        let _guard = self.request.lock();
        self.clear();
        if sr32 {
            self.wait_for_sr32(axis);
        }
        self.transmit(request, axis)?;
        let answer = self.rcv_matching(expected);
        if let Some(flag) = self.awaiting_sr32.get(axis as usize) {
            flag.store(false, Ordering::Release);
        }
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcs_common::{
        tml::{read_request, registers, Width, DEFAULT_MASTER_ID},
        CanTransport, TransportError,
    };

    struct NullTransport;

    impl CanTransport for NullTransport {
        fn open(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn close(&self) {}
        fn send(&self, _msg: &CanMessage) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        fn read(&self) -> Option<CanMessage> {
            None
        }
    }

    fn handler() -> TmlHandler {
        TmlHandler::new(Arc::new(Bus::new(Arc::new(NullTransport))))
    }

    fn sr32_frame(axis: u8, sr32: u32) -> CanMessage {
        TmlInstruction::new(
            0xD500 | axis as u16,
            &[registers::SR32, sr32 as u16, (sr32 >> 16) as u16],
        )
        .to_message(0)
    }

    #[test]
    fn test_unsolicited_sr32_only_updates_mirror() {
        let tml = handler();
        tml.put_msg(&sr32_frame(3, 0x0000_8400));
        assert_eq!(0x8400, tml.sr32(3));
        assert_eq!(0, tml.pending());
    }

    #[test]
    fn test_armed_sr32_is_queued_once() {
        let tml = handler();
        tml.wait_for_sr32(3);
        tml.put_msg(&sr32_frame(3, 0x0000_8400));
        tml.put_msg(&sr32_frame(3, 0x0000_8000));
        assert_eq!(1, tml.pending());
        assert_eq!(0x8000, tml.sr32(3));
        let answer = tml.rcv().unwrap();
        assert_eq!(Some((3, 0x8400)), answer.sr32_push());
        assert!(tml.rcv().is_none());
    }

    #[test]
    fn test_other_instructions_are_queued() {
        let tml = handler();
        let answer = TmlInstruction::new(0xD402, &[registers::MER, 0x0008]);
        tml.put_msg(&answer.to_message(0));
        assert_eq!(1, tml.pending());
        assert_eq!(Some(answer), tml.rcv());
        assert_eq!(0, tml.sr32(2));
    }

    fn take_data(axis: u8, address: u16, value: u16) -> CanMessage {
        TmlInstruction::new(0xD400 | axis as u16, &[address, value]).to_message(0)
    }

    fn query_apos(tml: &TmlHandler, axis: u8) -> Option<TmlInstruction> {
        tml.query(
            &read_request(registers::APOS, Width::Bits16, DEFAULT_MASTER_ID),
            axis,
            false,
            |answer| answer.answers_read(axis, registers::APOS, Width::Bits16),
        )
        .unwrap()
    }

    #[test]
    fn test_query_skips_stale_and_foreign_answers() {
        let tml = Arc::new(handler());
        // late answer to an earlier read that timed out
        tml.put_msg(&take_data(2, registers::APOS, 0x1111));

        let feeder = {
            let tml = tml.clone();
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                tml.put_msg(&take_data(3, registers::APOS, 0x2222));
                tml.put_msg(&take_data(2, registers::TPOS, 0x3333));
                tml.put_msg(&take_data(2, registers::APOS, 0x4444));
            })
        };
        let answer = query_apos(&tml, 2).unwrap();
        feeder.join().unwrap();

        assert_eq!(Some(0x4444), answer.word(1));
        assert_eq!(0, tml.pending());
    }

    #[test]
    fn test_unanswered_query_leaves_queue_empty() {
        let tml = handler();
        tml.put_msg(&take_data(2, registers::APOS, 0x1111));
        assert!(query_apos(&tml, 2).is_none());
        assert_eq!(0, tml.pending());
    }

    #[test]
    fn test_queue_drops_oldest_on_overflow() {
        let tml = handler();
        for value in 0..(TML_QUEUE_SIZE + 5) as u16 {
            tml.put_msg(&take_data(2, registers::MER, value));
        }
        assert_eq!(TML_QUEUE_SIZE, tml.pending());
        assert_eq!(Some(5), tml.rcv().and_then(|answer| answer.word(1)));
    }
}
