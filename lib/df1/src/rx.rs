//! Receiver half of the DF1 link: assembles destuffed application
//! payloads, validates the checksum trailer, suppresses retransmitted
//! duplicates and answers ENQ solicitations with the last response.
//!
//! The machine never touches the line itself; every transition returns
//! an [`RxStep`] and the owning connection performs the wire writes.

use crate::checksum::{Accumulator, Mode};
use crate::logging::{self, Logger};

/// Payload staging capacity. DF1 messages are small; anything beyond
/// this is rejected with a NAK once the frame terminates.
pub const MAX_PAYLOAD: usize = 300;

/// Shortest valid application payload: the PCCC header.
const MIN_PAYLOAD: usize = 6;

/// Frame completion budget in 10 ms ticks (~500 ms from the first
/// payload byte to the checksum).
const FRAME_BUDGET_TICKS: u32 = 50;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RxState {
    Idle,
    /// Receiving payload bytes after DLE STX.
    App,
    /// Awaiting the first checksum byte.
    Cs1,
    /// Awaiting the high CRC byte.
    Cs2,
    /// Delivered to a client, awaiting its ACK/NAK.
    Pend,
}

/// Wire action the connection must carry out after an event.
#[derive(Debug, Eq, PartialEq)]
pub enum RxStep {
    None,
    /// Write `DLE ACK` (true) or `DLE NAK` (false) on the line.
    Respond(bool),
    /// An accepted message is staged in the payload buffer; route it and
    /// respond once the owning client answers.
    Deliver,
}

#[derive(Debug, Default)]
pub struct RxCounters {
    pub msg_rx: u64,
    pub runts: u64,
    pub bad_cs: u64,
    pub dups: u64,
    pub overflows: u64,
    pub rx_timeouts: u64,
}

pub struct Receiver {
    state: RxState,
    mode: Mode,
    buf: Vec<u8>,
    acc: Accumulator,
    cs_low: u8,
    overflow: bool,
    last_was_ack: bool,
    dup_detect: bool,
    dup_window: Option<[u8; 4]>,
    elapsed: u32,
    pub counters: RxCounters,
    log: Logger,
}

impl Receiver {
    pub fn new(mode: Mode, dup_detect: bool, log: &Logger) -> Receiver {
        Receiver {
            state: RxState::Idle,
            mode,
            buf: Vec::with_capacity(MAX_PAYLOAD),
            acc: Accumulator::new(mode),
            cs_low: 0,
            overflow: false,
            last_was_ack: false,
            dup_detect,
            dup_window: None,
            elapsed: 0,
            counters: RxCounters::default(),
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn state(&self) -> RxState {
        self.state
    }

    /// True while a frame is streaming in (payload or checksum bytes).
    #[inline]
    pub fn receiving(&self) -> bool {
        match self.state {
            RxState::App | RxState::Cs1 | RxState::Cs2 => true,
            _ => false,
        }
    }

    /// True when the next line bytes are the raw checksum trailer and
    /// must bypass DLE interpretation.
    #[inline]
    pub fn expecting_checksum(&self) -> bool {
        self.state == RxState::Cs1 || self.state == RxState::Cs2
    }

    #[inline]
    pub fn pending(&self) -> bool {
        self.state == RxState::Pend
    }

    /// The accepted payload, valid while in `Pend`.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.buf
    }

    /// DLE STX seen: open a fresh frame. A frame already in progress is
    /// abandoned; a pending delivery stays pending on the connection side.
    pub fn start_frame(&mut self) {
        if self.receiving() {
            logging::debug!(self.log, "frame restarted mid-assembly"; "state" => ?self.state);
        }

        self.state = RxState::App;
        self.buf.clear();
        self.acc = Accumulator::new(self.mode);
        self.overflow = false;
        self.elapsed = 0;
    }

    /// One destuffed application byte.
    pub fn data_byte(&mut self, byte: u8) {
        if self.state != RxState::App {
            return;
        }

        self.acc.push(byte);

        // Keep consuming on overflow so the frame can be NAK'd cleanly
        // at the end instead of desynchronising the symbol stream.
        if self.buf.len() < MAX_PAYLOAD {
            self.buf.push(byte);
        } else {
            self.overflow = true;
        }
    }

    /// DLE ETX seen: the payload is complete, the trailer follows.
    pub fn end_payload(&mut self) {
        if self.state != RxState::App {
            return;
        }

        self.acc.terminate();
        self.state = RxState::Cs1;
    }

    /// One raw checksum byte.
    pub fn checksum_byte(&mut self, byte: u8) -> RxStep {
        match (self.state, self.mode) {
            (RxState::Cs1, Mode::Bcc) => self.complete(u16::from(byte)),
            (RxState::Cs1, Mode::Crc) => {
                self.cs_low = byte;
                self.state = RxState::Cs2;
                RxStep::None
            }
            (RxState::Cs2, _) => {
                let received = u16::from(self.cs_low) | (u16::from(byte) << 8);
                self.complete(received)
            }
            _ => RxStep::None,
        }
    }

    /// The client owning the pending message accepted it.
    pub fn client_ack(&mut self) -> RxStep {
        if self.state != RxState::Pend {
            return RxStep::None;
        }

        self.respond(true)
    }

    /// The client owning the pending message rejected it.
    pub fn client_nak(&mut self) -> RxStep {
        if self.state != RxState::Pend {
            return RxStep::None;
        }

        self.respond(false)
    }

    /// ENQ from the remote: it never saw our response.
    pub fn enq(&mut self) -> RxStep {
        match self.state {
            RxState::Pend => {
                // Already delivered; acknowledge again without waiting for
                // the client and keep the pending delivery alive.
                logging::debug!(self.log, "enq while delivery pending");
                self.counters.rx_timeouts += 1;
                RxStep::Respond(true)
            }
            RxState::Idle => RxStep::Respond(self.last_was_ack),
            _ => {
                // Mid-frame solicitation: the partial frame is unrecoverable.
                logging::debug!(self.log, "enq aborted partial frame"; "state" => ?self.state);
                self.state = RxState::Idle;
                RxStep::Respond(self.last_was_ack)
            }
        }
    }

    /// 10 ms tick. A frame that does not complete within the budget is
    /// rejected and the receiver resynchronises.
    pub fn tick(&mut self) -> RxStep {
        if !self.receiving() {
            return RxStep::None;
        }

        self.elapsed += 1;

        if self.elapsed <= FRAME_BUDGET_TICKS {
            return RxStep::None;
        }

        logging::debug!(self.log, "frame reception timed out"; "received" => self.buf.len());
        self.counters.rx_timeouts += 1;
        self.respond(false)
    }

    fn complete(&mut self, received: u16) -> RxStep {
        if self.overflow {
            self.counters.overflows += 1;
            return self.respond(false);
        }

        if self.buf.len() < MIN_PAYLOAD {
            self.counters.runts += 1;
            return self.respond(false);
        }

        if self.acc.value() != received {
            logging::debug!(self.log, "checksum mismatch";
                            "expected" => self.acc.value(),
                            "received" => received);
            self.counters.bad_cs += 1;
            return self.respond(false);
        }

        let window = [self.buf[1], self.buf[2], self.buf[4], self.buf[5]];

        if self.dup_detect && self.dup_window == Some(window) {
            // Retransmission of the previous message: acknowledge it
            // again but do not deliver.
            self.counters.dups += 1;
            return self.respond(true);
        }

        if self.dup_detect {
            self.dup_window = Some(window);
        }

        self.counters.msg_rx += 1;
        self.state = RxState::Pend;
        RxStep::Deliver
    }

    fn respond(&mut self, ack: bool) -> RxStep {
        self.last_was_ack = ack;
        self.state = RxState::Idle;
        RxStep::Respond(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::frame;
    use crate::logging;

    fn receiver(mode: Mode, dup_detect: bool) -> Receiver {
        Receiver::new(mode, dup_detect, &logging::discard())
    }

    /// Feed a complete well-formed frame, returning the final step.
    fn feed(rx: &mut Receiver, payload: &[u8], mode: Mode) -> RxStep {
        rx.start_frame();
        for &byte in payload {
            rx.data_byte(byte);
        }
        rx.end_payload();

        let wire = frame::encode(payload, mode);
        let trailer = &wire[wire.len() - mode.trailer_len()..];

        let mut step = RxStep::None;
        for &byte in trailer {
            step = rx.checksum_byte(byte);
        }
        step
    }

    const PAYLOAD: [u8; 8] = [0x01, 0x02, 0x46, 0x00, 0x34, 0x12, 0xAA, 0x55];

    #[test]
    fn test_accept_bcc() {
        let mut rx = receiver(Mode::Bcc, false);

        let step = feed(&mut rx, &PAYLOAD, Mode::Bcc);

        assert_eq!(step, RxStep::Deliver);
        assert_eq!(rx.state(), RxState::Pend);
        assert_eq!(rx.payload(), &PAYLOAD[..]);
        assert_eq!(rx.counters.msg_rx, 1);
    }

    #[test]
    fn test_accept_crc_then_client_ack() {
        let mut rx = receiver(Mode::Crc, false);

        assert_eq!(feed(&mut rx, &PAYLOAD, Mode::Crc), RxStep::Deliver);
        assert_eq!(rx.client_ack(), RxStep::Respond(true));
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn test_client_nak_rejects() {
        let mut rx = receiver(Mode::Bcc, false);

        feed(&mut rx, &PAYLOAD, Mode::Bcc);
        assert_eq!(rx.client_nak(), RxStep::Respond(false));

        // The echo-reply protocol must now replay the NAK.
        assert_eq!(rx.enq(), RxStep::Respond(false));
    }

    #[test]
    fn test_runt_rejected() {
        let mut rx = receiver(Mode::Bcc, false);

        let step = feed(&mut rx, &[0x01, 0x02, 0x06], Mode::Bcc);

        assert_eq!(step, RxStep::Respond(false));
        assert_eq!(rx.counters.runts, 1);
        assert_eq!(rx.state(), RxState::Idle);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut rx = receiver(Mode::Crc, false);

        rx.start_frame();
        for &byte in &PAYLOAD {
            rx.data_byte(byte);
        }
        rx.end_payload();

        assert_eq!(rx.checksum_byte(0xDE), RxStep::None);
        assert_eq!(rx.checksum_byte(0xAD), RxStep::Respond(false));
        assert_eq!(rx.counters.bad_cs, 1);
    }

    #[test]
    fn test_duplicate_suppressed() {
        let mut rx = receiver(Mode::Bcc, true);

        assert_eq!(feed(&mut rx, &PAYLOAD, Mode::Bcc), RxStep::Deliver);
        rx.client_ack();

        // Identical bytes at positions 1,2,4,5: acknowledged, not delivered.
        assert_eq!(feed(&mut rx, &PAYLOAD, Mode::Bcc), RxStep::Respond(true));
        assert_eq!(rx.counters.dups, 1);
        assert_eq!(rx.counters.msg_rx, 1);

        // A different transaction number passes through.
        let mut next = PAYLOAD;
        next[4] = 0x35;
        assert_eq!(feed(&mut rx, &next, Mode::Bcc), RxStep::Deliver);
        assert_eq!(rx.counters.msg_rx, 2);
    }

    #[test]
    fn test_duplicate_window_not_updated_by_duplicates() {
        let mut rx = receiver(Mode::Bcc, true);

        feed(&mut rx, &PAYLOAD, Mode::Bcc);
        rx.client_ack();

        // A run of identical messages collapses to the first.
        for _ in 0..3 {
            assert_eq!(feed(&mut rx, &PAYLOAD, Mode::Bcc), RxStep::Respond(true));
        }
        assert_eq!(rx.counters.dups, 3);
    }

    #[test]
    fn test_enq_while_pending_acks_again() {
        let mut rx = receiver(Mode::Bcc, false);

        feed(&mut rx, &PAYLOAD, Mode::Bcc);

        assert_eq!(rx.enq(), RxStep::Respond(true));
        assert_eq!(rx.state(), RxState::Pend);
        assert_eq!(rx.counters.rx_timeouts, 1);

        // The client response still closes the exchange.
        assert_eq!(rx.client_ack(), RxStep::Respond(true));
    }

    #[test]
    fn test_enq_replays_last_response() {
        let mut rx = receiver(Mode::Bcc, false);

        feed(&mut rx, &PAYLOAD, Mode::Bcc);
        rx.client_ack();

        assert_eq!(rx.enq(), RxStep::Respond(true));

        feed(&mut rx, &[0x01, 0x02, 0x06], Mode::Bcc);
        assert_eq!(rx.enq(), RxStep::Respond(false));
    }

    #[test]
    fn test_frame_budget_timeout() {
        let mut rx = receiver(Mode::Bcc, false);

        rx.start_frame();
        rx.data_byte(0x01);

        for _ in 0..FRAME_BUDGET_TICKS {
            assert_eq!(rx.tick(), RxStep::None);
        }

        assert_eq!(rx.tick(), RxStep::Respond(false));
        assert_eq!(rx.state(), RxState::Idle);
        assert_eq!(rx.counters.rx_timeouts, 1);
    }

    #[test]
    fn test_overflow_naks_at_frame_end() {
        let mut rx = receiver(Mode::Bcc, false);

        rx.start_frame();
        for i in 0..(MAX_PAYLOAD + 10) {
            rx.data_byte(i as u8);
        }
        rx.end_payload();

        let step = rx.checksum_byte(checksum::bcc(&[]));
        assert_eq!(step, RxStep::Respond(false));
        assert_eq!(rx.counters.overflows, 1);
    }

    #[test]
    fn test_tick_idle_is_silent() {
        let mut rx = receiver(Mode::Bcc, false);

        for _ in 0..200 {
            assert_eq!(rx.tick(), RxStep::None);
        }
    }
}
