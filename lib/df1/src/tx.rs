//! Transmitter half of the DF1 link. Exactly one frame is on the wire at
//! any instant: the machine stages a frame, waits for it to drain, then
//! waits for the remote's ACK/NAK, retrying on NAK and soliciting the
//! lost response with ENQ on timeout.

use crate::checksum::Mode;
use crate::client::ClientId;
use crate::frame;
use crate::logging::{self, Logger};

/// Tick period of the link timers.
pub const TICK_MS: u32 = 10;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TxState {
    Idle,
    /// Frame staged in the line output buffer, not yet fully written.
    PendWrite,
    /// Frame on the wire, awaiting ACK/NAK.
    PendResp,
}

/// Wire action the connection must carry out after an event.
#[derive(Debug, Eq, PartialEq)]
pub enum TxStep {
    None,
    /// Stage these bytes on the line (retransmission or ENQ).
    Stage(Vec<u8>),
    /// The remote accepted the frame; notify the owning client.
    Done,
    /// Delivery failed; notify the owning client.
    Failed(&'static str),
}

#[derive(Debug, Default)]
pub struct TxCounters {
    pub tx_ok: u64,
    pub tx_fail: u64,
    pub naks_rx: u64,
    pub enqs_tx: u64,
}

pub struct Transmitter {
    state: TxState,
    frame: Vec<u8>,
    owner: Option<ClientId>,
    nak_count: u8,
    enq_count: u8,
    max_nak: u8,
    max_enq: u8,
    elapsed: u32,
    deadline: u32,
    ack_timeout_ms: u32,
    byte_usecs: u32,
    pub counters: TxCounters,
    log: Logger,
}

impl Transmitter {
    pub fn new(max_nak: u8, max_enq: u8, ack_timeout_ms: u32, byte_usecs: u32, log: &Logger) -> Transmitter {
        Transmitter {
            state: TxState::Idle,
            frame: Vec::new(),
            owner: None,
            nak_count: 0,
            enq_count: 0,
            max_nak,
            max_enq,
            elapsed: 0,
            deadline: 0,
            ack_timeout_ms,
            byte_usecs,
            counters: TxCounters::default(),
            log: log.new(logging::o!()),
        }
    }

    #[inline]
    pub fn state(&self) -> TxState {
        self.state
    }

    #[inline]
    pub fn idle(&self) -> bool {
        self.state == TxState::Idle
    }

    #[inline]
    pub fn owner(&self) -> Option<ClientId> {
        self.owner
    }

    /// Forget the owning client. The transmission itself runs to
    /// completion; nobody is notified of the outcome.
    #[inline]
    pub fn clear_owner(&mut self) {
        self.owner = None;
    }

    #[inline]
    pub fn take_owner(&mut self) -> Option<ClientId> {
        self.owner.take()
    }

    /// Encode and adopt a new message. The returned bytes must be staged
    /// on the line by the caller.
    pub fn load(&mut self, payload: &[u8], mode: Mode, owner: Option<ClientId>) -> &[u8] {
        debug_assert!(self.idle());

        self.frame = frame::encode(payload, mode);
        self.owner = owner;
        self.nak_count = 0;
        self.enq_count = 0;
        self.elapsed = 0;

        // Budget the response deadline for the serialisation time of the
        // frame itself on top of the configured ACK timeout.
        let tx_time_ms = (self.frame.len() as u32 * self.byte_usecs) / 1000;
        self.deadline = (self.ack_timeout_ms + tx_time_ms + TICK_MS - 1) / TICK_MS;

        self.state = TxState::PendWrite;

        logging::trace!(self.log, "frame staged";
                        "bytes" => self.frame.len(),
                        "deadline_ticks" => self.deadline);

        &self.frame
    }

    /// The line output buffer drained: the frame is on the wire.
    pub fn written(&mut self) {
        if self.state == TxState::PendWrite {
            self.state = TxState::PendResp;
            self.elapsed = 0;
        }
    }

    /// ACK from the remote.
    pub fn on_ack(&mut self) -> TxStep {
        if self.idle() {
            return TxStep::None;
        }

        self.counters.tx_ok += 1;
        self.state = TxState::Idle;
        TxStep::Done
    }

    /// NAK from the remote: retransmit until the retry budget runs out.
    pub fn on_nak(&mut self) -> TxStep {
        if self.idle() {
            return TxStep::None;
        }

        self.counters.naks_rx += 1;

        if self.nak_count >= self.max_nak {
            return self.fail("too many NAKs");
        }

        self.nak_count += 1;
        self.elapsed = 0;
        self.state = TxState::PendWrite;

        logging::debug!(self.log, "retransmitting after nak"; "attempt" => self.nak_count);
        TxStep::Stage(self.frame.clone())
    }

    /// 10 ms tick. `paused` holds the response timer while the remote is
    /// interleaving its response inside its own outgoing frame.
    pub fn tick(&mut self, paused: bool) -> TxStep {
        if self.state != TxState::PendResp || paused {
            return TxStep::None;
        }

        self.elapsed += 1;

        if self.elapsed < self.deadline {
            return TxStep::None;
        }

        self.enq_count += 1;

        if self.enq_count > self.max_enq {
            return self.fail("no response");
        }

        // Ask the remote to re-emit its last ACK/NAK rather than pushing
        // the whole frame again.
        self.counters.enqs_tx += 1;
        self.elapsed = 0;
        self.state = TxState::PendWrite;

        logging::debug!(self.log, "soliciting lost response"; "enq" => self.enq_count);
        TxStep::Stage(frame::ENQ_FRAME.to_vec())
    }

    fn fail(&mut self, reason: &'static str) -> TxStep {
        logging::warn!(self.log, "transmission failed"; "reason" => reason);
        self.counters.tx_fail += 1;
        self.state = TxState::Idle;
        TxStep::Failed(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    const PAYLOAD: [u8; 6] = [0x01, 0x02, 0x06, 0x00, 0x34, 0x12];

    fn transmitter() -> Transmitter {
        // 100 ms ACK timeout, instantaneous line.
        Transmitter::new(3, 3, 100, 0, &logging::discard())
    }

    fn load(tx: &mut Transmitter) -> Vec<u8> {
        let staged = tx.load(&PAYLOAD, Mode::Bcc, Some(0)).to_vec();
        tx.written();
        staged
    }

    #[test]
    fn test_ack_completes() {
        let mut tx = transmitter();

        let staged = load(&mut tx);
        assert_eq!(staged, frame::encode(&PAYLOAD, Mode::Bcc));
        assert_eq!(tx.state(), TxState::PendResp);

        assert_eq!(tx.on_ack(), TxStep::Done);
        assert!(tx.idle());
        assert_eq!(tx.take_owner(), Some(0));
        assert_eq!(tx.counters.tx_ok, 1);
    }

    #[test]
    fn test_nak_retransmits_identical_frame() {
        let mut tx = transmitter();

        let staged = load(&mut tx);

        match tx.on_nak() {
            TxStep::Stage(bytes) => assert_eq!(bytes, staged),
            step => panic!("Unexpected step {:?}", step),
        }
        assert_eq!(tx.state(), TxState::PendWrite);

        tx.written();
        assert_eq!(tx.on_ack(), TxStep::Done);
        assert_eq!(tx.counters.naks_rx, 1);
    }

    #[test]
    fn test_nak_budget_exhausted() {
        let mut tx = transmitter();

        load(&mut tx);

        for _ in 0..3 {
            match tx.on_nak() {
                TxStep::Stage(_) => tx.written(),
                step => panic!("Unexpected step {:?}", step),
            }
        }

        assert_eq!(tx.on_nak(), TxStep::Failed("too many NAKs"));
        assert!(tx.idle());
        assert_eq!(tx.counters.tx_fail, 1);
    }

    #[test]
    fn test_timeout_sends_enq() {
        let mut tx = transmitter();

        load(&mut tx);

        // 100 ms / 10 ms = 10 ticks to the deadline.
        for _ in 0..9 {
            assert_eq!(tx.tick(false), TxStep::None);
        }

        assert_eq!(tx.tick(false), TxStep::Stage(frame::ENQ_FRAME.to_vec()));
        assert_eq!(tx.counters.enqs_tx, 1);

        // The re-emitted ACK completes the exchange without another data frame.
        tx.written();
        assert_eq!(tx.on_ack(), TxStep::Done);
    }

    #[test]
    fn test_enq_budget_exhausted() {
        let mut tx = transmitter();

        load(&mut tx);

        for _ in 0..3 {
            for _ in 0..9 {
                assert_eq!(tx.tick(false), TxStep::None);
            }
            match tx.tick(false) {
                TxStep::Stage(bytes) => {
                    assert_eq!(bytes, frame::ENQ_FRAME.to_vec());
                    tx.written();
                }
                step => panic!("Unexpected step {:?}", step),
            }
        }

        for _ in 0..9 {
            assert_eq!(tx.tick(false), TxStep::None);
        }
        assert_eq!(tx.tick(false), TxStep::Failed("no response"));
        assert!(tx.idle());
    }

    #[test]
    fn test_pause_holds_the_timer() {
        let mut tx = transmitter();

        load(&mut tx);

        for _ in 0..100 {
            assert_eq!(tx.tick(true), TxStep::None);
        }
        assert_eq!(tx.state(), TxState::PendResp);

        for _ in 0..9 {
            assert_eq!(tx.tick(false), TxStep::None);
        }
        assert_ne!(tx.tick(false), TxStep::None);
    }

    #[test]
    fn test_byte_cost_extends_deadline() {
        // 1000 us per byte: a 14-byte frame adds 14 ms to the deadline.
        let mut tx = Transmitter::new(3, 3, 100, 1000, &logging::discard());

        let staged = tx.load(&PAYLOAD, Mode::Bcc, None).to_vec();
        tx.written();

        let expected = (100 + staged.len() as u32 + TICK_MS - 1) / TICK_MS;
        for _ in 0..expected - 1 {
            assert_eq!(tx.tick(false), TxStep::None);
        }
        assert_ne!(tx.tick(false), TxStep::None);
    }

    #[test]
    fn test_cleared_owner_stays_cleared() {
        let mut tx = transmitter();

        load(&mut tx);
        tx.clear_owner();

        assert_eq!(tx.on_ack(), TxStep::Done);
        assert_eq!(tx.take_owner(), None);
    }
}
