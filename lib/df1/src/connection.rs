//! One DF1 link instance: a serial line, its TCP listener, the receiver
//! and transmitter state machines, and the registered clients sharing
//! the line. The connection parses the raw line stream into link
//! symbols, routes accepted messages by destination node and fans
//! queued client messages into the transmitter round-robin.

use crate::buffer::Buffer;
use crate::checksum::Mode;
use crate::client::{Client, ClientEvent, ClientId, ClientState};
use crate::frame;
use crate::logging::{self, Logger};
use crate::rx::{Receiver, RxState, RxStep};
use crate::shared::{ErrorType, ErrorUtils, LinkError, LinkResult};
use crate::tx::{Transmitter, TxStep};
use indexmap::IndexSet;
use mio;
use mio::net::TcpListener;
use std::io;

/// Token space reserved per connection on the master poll.
pub const TOKENS_PER_CONNECTION: usize = 1024;

const LINE_OFFSET: usize = 0;
const LISTENER_OFFSET: usize = 1;
const CLIENT_OFFSET: usize = 2;
const MAX_CLIENTS: usize = TOKENS_PER_CONNECTION - CLIENT_OFFSET;

const LINE_IN_SIZE: usize = 1024;
const LINE_OUT_SIZE: usize = 2048;

/// Bits on the wire per byte with an 8N1 line discipline.
const BITS_PER_BYTE: u32 = 10;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Duplex {
    Full,
    HalfMaster,
    HalfSlave,
}

/// Link configuration, one set per serial line.
pub struct LineSettings {
    pub name: String,
    pub mode: Mode,
    pub duplex: Duplex,
    pub baud: u32,
    pub duplicate_detect: bool,
    pub max_nak: u8,
    pub max_enq: u8,
    pub ack_timeout_ms: u32,
}

#[derive(Debug, Default)]
pub struct ConnCounters {
    pub unknown_dst: u64,
    pub sink_full: u64,
    pub noise: u64,
}

pub struct Connection<L> {
    line: L,
    listener: TcpListener,
    mode: Mode,
    line_in: Buffer,
    line_out: Buffer,
    rx: Receiver,
    tx: Transmitter,
    prev_dle: bool,
    embed_rsp: bool,
    rx_owner: Option<ClientId>,
    clients: Vec<Client>,
    free: Vec<ClientId>,
    live: IndexSet<ClientId>,
    last_served: usize,
    base: usize,
    pub counters: ConnCounters,
    log: Logger,
}

impl<L: io::Read + io::Write + mio::Evented> Connection<L> {
    pub fn new(line: L, listener: TcpListener, settings: &LineSettings, base: usize, log: &Logger) -> Connection<L> {
        let log = log.new(logging::o!("connection" => settings.name.clone()));

        // Serialisation cost of one byte, used to widen the transmitter
        // deadline for long frames on slow lines.
        let byte_usecs = BITS_PER_BYTE * 1_000_000 / settings.baud;

        if settings.duplex != Duplex::Full {
            logging::warn!(log, "half-duplex polling is not arbitrated, running full-duplex framing";
                           "duplex" => ?settings.duplex);
        }

        Connection {
            line,
            listener,
            mode: settings.mode,
            line_in: Buffer::new(LINE_IN_SIZE),
            line_out: Buffer::new(LINE_OUT_SIZE),
            rx: Receiver::new(settings.mode, settings.duplicate_detect, &log),
            tx: Transmitter::new(
                settings.max_nak,
                settings.max_enq,
                settings.ack_timeout_ms,
                byte_usecs,
                &log,
            ),
            prev_dle: false,
            embed_rsp: false,
            rx_owner: None,
            clients: Vec::new(),
            free: Vec::new(),
            live: IndexSet::new(),
            last_served: 0,
            base,
            counters: ConnCounters::default(),
            log,
        }
    }

    /// First token of this connection's token range.
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub fn owns_token(&self, token: usize) -> bool {
        token >= self.base && token < self.base + TOKENS_PER_CONNECTION
    }

    /// Registers the line and the listener on the supplied poll. Client
    /// streams are registered as they are accepted.
    pub fn register(&self, poll: &mio::Poll) -> LinkResult<()> {
        poll.register(
            &self.line,
            mio::Token(self.base + LINE_OFFSET),
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )?;

        poll.register(
            &self.listener,
            mio::Token(self.base + LISTENER_OFFSET),
            mio::Ready::readable(),
            mio::PollOpt::edge(),
        )?;

        Ok(())
    }

    /// Dispatch one readiness event. A fatal error means the line is
    /// dead and the connection must be torn down by the caller.
    pub fn handle_event(&mut self, poll: &mio::Poll, token: usize, ready: mio::Ready) -> LinkResult<()> {
        match token - self.base {
            LINE_OFFSET => {
                if ready.is_readable() {
                    self.service_line()?;
                }
                if ready.is_writable() {
                    self.flush_line()?;
                }
                Ok(())
            }
            LISTENER_OFFSET => {
                self.accept_clients(poll);
                Ok(())
            }
            offset => {
                self.service_client(poll, offset - CLIENT_OFFSET, ready);
                Ok(())
            }
        }
    }

    /// 10 ms tick: advance the receive budget and the response deadline,
    /// then hand the transmitter its next message if it went idle.
    pub fn tick(&mut self) {
        let step = self.rx.tick();
        self.rx_step(step);

        let paused = self.embed_rsp && self.rx.receiving();
        let step = self.tx.tick(paused);
        self.tx_step(step);

        self.dispatch_tx();
    }

    /// Push buffered egress to the line and all client sockets.
    pub fn flush(&mut self, poll: &mio::Poll) -> LinkResult<()> {
        self.flush_line()?;

        let ids: Vec<ClientId> = self.live.iter().cloned().collect();
        for id in ids {
            if self.clients[id].has_egress() && self.clients[id].send().has_failed() {
                self.disconnect_client(poll, id, "socket error");
            }
        }

        Ok(())
    }

    /// Tear the connection down, closing every client.
    pub fn close(&mut self, poll: &mio::Poll) {
        let ids: Vec<ClientId> = self.live.iter().cloned().collect();
        for id in ids {
            self.disconnect_client(poll, id, "connection closing");
        }

        let rx = &self.rx.counters;
        let tx = &self.tx.counters;
        logging::info!(self.log, "connection closed";
                       "msg_rx" => rx.msg_rx,
                       "runts" => rx.runts,
                       "bad_cs" => rx.bad_cs,
                       "dups" => rx.dups,
                       "rx_timeouts" => rx.rx_timeouts,
                       "tx_ok" => tx.tx_ok,
                       "tx_fail" => tx.tx_fail,
                       "naks_rx" => tx.naks_rx,
                       "enqs_tx" => tx.enqs_tx,
                       "unknown_dst" => self.counters.unknown_dst,
                       "sink_full" => self.counters.sink_full);
    }

    fn service_line(&mut self) -> LinkResult<()> {
        loop {
            match self.line_in.ingress(&mut self.line) {
                Ok(0) => return Err(LinkError::Fatal(ErrorType::Closed)),
                Ok(_) => self.parse_line_input(),
                Err(err) => {
                    return match err.kind() {
                        io::ErrorKind::WouldBlock => Ok(()),
                        _ => Err(err.into()),
                    };
                }
            }
        }
    }

    fn parse_line_input(&mut self) {
        while let Some(&byte) = self.line_in.read_slice().first() {
            self.line_in.move_head(1);
            self.line_byte(byte);
        }
    }

    /// Split the raw stream into link symbols and application bytes.
    fn line_byte(&mut self, byte: u8) {
        // The checksum trailer is raw: no DLE interpretation.
        if self.rx.expecting_checksum() {
            let step = self.rx.checksum_byte(byte);
            self.rx_step(step);
            return;
        }

        if self.prev_dle {
            self.prev_dle = false;

            match byte {
                frame::STX => self.rx.start_frame(),
                frame::ETX => self.rx.end_payload(),
                frame::DLE => self.rx.data_byte(frame::DLE),
                frame::ACK => {
                    self.latch_embedded();
                    let step = self.tx.on_ack();
                    self.tx_step(step);
                }
                frame::NAK => {
                    self.latch_embedded();
                    let step = self.tx.on_nak();
                    self.tx_step(step);
                }
                frame::ENQ => {
                    let step = self.rx.enq();
                    self.rx_step(step);
                }
                _ => self.counters.noise += 1,
            }
        } else if byte == frame::DLE {
            self.prev_dle = true;
        } else if self.rx.state() == RxState::App {
            self.rx.data_byte(byte);
        } else {
            self.counters.noise += 1;
        }
    }

    /// An ACK/NAK inside a frame means the remote interleaves responses
    /// in its own transmissions; the transmitter must stop timing out
    /// while the receiver is mid-frame.
    fn latch_embedded(&mut self) {
        if self.rx.receiving() && !self.embed_rsp {
            self.embed_rsp = true;
            logging::info!(self.log, "embedded responses detected");
        }
    }

    fn rx_step(&mut self, step: RxStep) {
        match step {
            RxStep::None => (),
            RxStep::Respond(ack) => self.stage_line(&frame::response(ack)),
            RxStep::Deliver => self.route_inbound(),
        }
    }

    fn tx_step(&mut self, step: TxStep) {
        match step {
            TxStep::None => (),
            TxStep::Stage(bytes) => self.stage_line(&bytes),
            TxStep::Done => self.finish_tx(true),
            TxStep::Failed(_) => self.finish_tx(false),
        }
    }

    /// The first payload byte is the destination node; hand the message
    /// to the matching client or answer on its behalf.
    fn route_inbound(&mut self) {
        let dst = self.rx.payload()[0];

        let id = self
            .live
            .iter()
            .cloned()
            .find(|&id| self.clients[id].registered() && self.clients[id].node() == dst);

        let id = match id {
            Some(id) => id,
            None => {
                logging::debug!(self.log, "no client for destination"; "node" => dst);
                self.counters.unknown_dst += 1;
                let step = self.rx.client_ack();
                return self.rx_step(step);
            }
        };

        if self.rx.payload().len() > frame::MAX_PAYLOAD || !self.clients[id].deliver(self.rx.payload()) {
            self.counters.sink_full += 1;
            let step = self.rx.client_nak();
            return self.rx_step(step);
        }

        self.rx_owner = Some(id);
    }

    fn finish_tx(&mut self, ok: bool) {
        if let Some(id) = self.tx.take_owner() {
            if self.clients[id].is_open() {
                self.clients[id].notify(ok);
            }
        }

        self.dispatch_tx();
    }

    /// Round-robin scan for the next client with a staged message. The
    /// scan starts one past the previously-served client and wraps a
    /// full circle so the previous holder is re-examined last.
    fn dispatch_tx(&mut self) {
        if !self.tx.idle() || self.clients.is_empty() {
            return;
        }

        if self.line_out.free_capacity() < frame::MAX_PAYLOAD * 2 + 6 {
            return;
        }

        let count = self.clients.len();
        let start = self.last_served + 1;

        for step in 0..count {
            let id = (start + step) % count;

            if self.clients[id].state() == ClientState::MsgReady {
                self.last_served = id;

                let payload = self.clients[id].take_message();
                let staged = self.tx.load(&payload, self.mode, Some(id)).to_vec();
                self.stage_line(&staged);

                logging::trace!(self.log, "message dispatched";
                                "client_id" => id,
                                "bytes" => payload.len());
                return;
            }
        }
    }

    fn stage_line(&mut self, bytes: &[u8]) {
        if !self.line_out.push(bytes) {
            // The line is hopelessly backlogged; the transmitter recovers
            // through its own timeout path.
            logging::error!(self.log, "line output buffer full"; "dropped" => bytes.len());
        }
    }

    fn flush_line(&mut self) -> LinkResult<()> {
        if !self.line_out.is_empty() {
            match self.line_out.egress(&mut self.line) {
                Ok(_) => (),
                Err(err) => match err.kind() {
                    io::ErrorKind::WouldBlock => (),
                    _ => return Err(err.into()),
                },
            }
        }

        if self.line_out.is_empty() {
            self.tx.written();
        }

        Ok(())
    }

    fn accept_clients(&mut self, poll: &mio::Poll) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = match self.free.pop() {
                        Some(id) => id,
                        None => {
                            let id = self.clients.len();
                            if id >= MAX_CLIENTS {
                                logging::warn!(self.log, "client limit reached"; "peer" => %addr);
                                continue;
                            }
                            self.clients.push(Client::new(&self.log));
                            id
                        }
                    };

                    self.clients[id].open(stream);

                    let token = mio::Token(self.base + CLIENT_OFFSET + id);
                    if self.clients[id].register(poll, token).has_failed() {
                        logging::error!(self.log, "client registration on poll failed"; "client_id" => id);
                        self.clients[id].close();
                        self.free.push(id);
                        continue;
                    }

                    self.live.insert(id);
                    logging::debug!(self.log, "client accepted"; "peer" => %addr, "client_id" => id);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    logging::error!(self.log, "accept failed"; "error" => %err);
                    return;
                }
            }
        }
    }

    fn service_client(&mut self, poll: &mio::Poll, id: ClientId, ready: mio::Ready) {
        if id >= self.clients.len() || !self.clients[id].is_open() {
            return;
        }

        if ready.is_readable() {
            loop {
                match self.clients[id].receive() {
                    Ok(_) => {
                        if !self.drain_client_events(poll, id) {
                            return;
                        }
                    }
                    Err(LinkError::Wait) => break,
                    Err(_) => {
                        self.disconnect_client(poll, id, "socket closed");
                        return;
                    }
                }
            }

            if !self.drain_client_events(poll, id) {
                return;
            }
        }

        if ready.is_writable() && self.clients[id].send().has_failed() {
            self.disconnect_client(poll, id, "socket error");
        }
    }

    /// Process parsed protocol events for a client. Returns false if the
    /// client was disconnected along the way.
    fn drain_client_events(&mut self, poll: &mio::Poll, id: ClientId) -> bool {
        loop {
            match self.clients[id].parse() {
                ClientEvent::None => return true,
                ClientEvent::Register { node } => {
                    let duplicate = self.live.iter().any(|&other| {
                        other != id && self.clients[other].registered() && self.clients[other].node() == node
                    });

                    if duplicate {
                        logging::warn!(self.log, "node address already registered"; "node" => node);
                        self.disconnect_client(poll, id, "duplicate node address");
                        return false;
                    }

                    logging::info!(self.log, "client registered";
                                   "client_id" => id,
                                   "node" => node,
                                   "name" => self.clients[id].name());
                }
                ClientEvent::MessageReady => self.dispatch_tx(),
                ClientEvent::Ack => {
                    if self.rx_owner == Some(id) {
                        self.rx_owner = None;
                        let step = self.rx.client_ack();
                        self.rx_step(step);
                    }
                }
                ClientEvent::Nak => {
                    if self.rx_owner == Some(id) {
                        self.rx_owner = None;
                        let step = self.rx.client_nak();
                        self.rx_step(step);
                    }
                }
                ClientEvent::Violation(reason) => {
                    self.disconnect_client(poll, id, reason);
                    return false;
                }
            }
        }
    }

    fn disconnect_client(&mut self, poll: &mio::Poll, id: ClientId, reason: &str) {
        logging::info!(self.log, "disconnecting client"; "client_id" => id, "reason" => reason);

        let _ = self.clients[id].deregister(poll);
        self.clients[id].close();
        self.live.remove(&id);
        self.free.push(id);

        // A transmission in flight for this client completes unobserved.
        if self.tx.owner() == Some(id) {
            self.tx.clear_owner();
        }

        // An undelivered inbound message is acknowledged on the client's
        // behalf so the remote does not retry into a dead socket.
        if self.rx_owner == Some(id) {
            self.rx_owner = None;
            let step = self.rx.client_ack();
            self.rx_step(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct MockLine {
        rx: Rc<RefCell<VecDeque<u8>>>,
        tx: Rc<RefCell<Vec<u8>>>,
        registration: mio::Registration,
    }

    impl MockLine {
        fn new() -> (MockLine, Rc<RefCell<VecDeque<u8>>>, Rc<RefCell<Vec<u8>>>) {
            let rx = Rc::new(RefCell::new(VecDeque::new()));
            let tx = Rc::new(RefCell::new(Vec::new()));
            let (registration, _readiness) = mio::Registration::new2();

            let line = MockLine {
                rx: rx.clone(),
                tx: tx.clone(),
                registration,
            };

            (line, rx, tx)
        }
    }

    impl io::Read for MockLine {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut rx = self.rx.borrow_mut();

            if rx.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let mut count = 0;
            while count < buf.len() {
                match rx.pop_front() {
                    Some(byte) => {
                        buf[count] = byte;
                        count += 1;
                    }
                    None => break,
                }
            }

            Ok(count)
        }
    }

    impl io::Write for MockLine {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.tx.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl mio::Evented for MockLine {
        fn register(
            &self,
            poll: &mio::Poll,
            token: mio::Token,
            interest: mio::Ready,
            opts: mio::PollOpt,
        ) -> io::Result<()> {
            self.registration.register(poll, token, interest, opts)
        }

        fn reregister(
            &self,
            poll: &mio::Poll,
            token: mio::Token,
            interest: mio::Ready,
            opts: mio::PollOpt,
        ) -> io::Result<()> {
            self.registration.reregister(poll, token, interest, opts)
        }

        fn deregister(&self, poll: &mio::Poll) -> io::Result<()> {
            mio::Evented::deregister(&self.registration, poll)
        }
    }

    struct Fixture {
        conn: Connection<MockLine>,
        poll: mio::Poll,
        line_rx: Rc<RefCell<VecDeque<u8>>>,
        line_tx: Rc<RefCell<Vec<u8>>>,
    }

    fn settings(mode: Mode, duplicate_detect: bool) -> LineSettings {
        LineSettings {
            name: "test".to_string(),
            mode,
            duplex: Duplex::Full,
            baud: 19200,
            duplicate_detect,
            max_nak: 3,
            max_enq: 3,
            ack_timeout_ms: 100,
        }
    }

    fn fixture(mode: Mode, duplicate_detect: bool) -> Fixture {
        let (line, line_rx, line_tx) = MockLine::new();
        let listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
        let conn = Connection::new(
            line,
            listener,
            &settings(mode, duplicate_detect),
            0,
            &logging::discard(),
        );

        Fixture {
            conn,
            poll: mio::Poll::new().unwrap(),
            line_rx,
            line_tx,
        }
    }

    impl Fixture {
        /// Install a detached, registered client and return its id.
        fn add_client(&mut self, node: u8) -> ClientId {
            let id = self.conn.clients.len();
            self.conn.clients.push(Client::new(&logging::discard()));
            self.conn.clients[id].open_detached();
            self.conn.live.insert(id);

            self.conn.clients[id].feed(&[node, 1, b'c']);
            assert!(self.conn.drain_client_events(&self.poll, id));
            assert!(self.conn.clients[id].registered());
            id
        }

        fn inject_line(&mut self, bytes: &[u8]) {
            self.line_rx.borrow_mut().extend(bytes.iter().cloned());
            self.conn.service_line().unwrap();
        }

        fn wire(&mut self) -> Vec<u8> {
            self.conn.flush_line().unwrap();
            let bytes = self.line_tx.borrow().clone();
            self.line_tx.borrow_mut().clear();
            bytes
        }

        fn submit(&mut self, id: ClientId, payload: &[u8]) {
            let mut bytes = vec![frame::MSG_SOH, payload.len() as u8];
            bytes.extend_from_slice(payload);
            self.conn.clients[id].feed(&bytes);
            assert!(self.conn.drain_client_events(&self.poll, id));
        }
    }

    const PAYLOAD: [u8; 8] = [0x05, 0x02, 0x46, 0x00, 0x34, 0x12, 0xAA, 0x55];

    #[test]
    fn test_inbound_routed_to_client() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        let wire = frame::encode(&PAYLOAD, Mode::Bcc);
        fx.inject_line(&wire);

        let mut expected = vec![frame::MSG_SOH, PAYLOAD.len() as u8];
        expected.extend_from_slice(&PAYLOAD);
        assert_eq!(fx.conn.clients[id].drain_egress(), expected);
        assert_eq!(fx.conn.rx_owner, Some(id));

        // The client accepts; the link response goes out.
        fx.conn.clients[id].feed(&[frame::MSG_ACK]);
        assert!(fx.conn.drain_client_events(&fx.poll, id));
        assert_eq!(fx.wire(), frame::response(true).to_vec());
        assert_eq!(fx.conn.rx_owner, None);
    }

    #[test]
    fn test_unknown_destination_acked() {
        let mut fx = fixture(Mode::Bcc, false);
        fx.add_client(0x09);

        let wire = frame::encode(&PAYLOAD, Mode::Bcc);
        fx.inject_line(&wire);

        assert_eq!(fx.conn.counters.unknown_dst, 1);
        assert_eq!(fx.wire(), frame::response(true).to_vec());
    }

    #[test]
    fn test_duplicate_suppressed_on_wire() {
        let mut fx = fixture(Mode::Bcc, true);
        let id = fx.add_client(0x05);

        let wire = frame::encode(&PAYLOAD, Mode::Bcc);
        fx.inject_line(&wire);
        fx.conn.clients[id].feed(&[frame::MSG_ACK]);
        assert!(fx.conn.drain_client_events(&fx.poll, id));
        fx.wire();
        fx.conn.clients[id].drain_egress();

        // Same bytes at positions 1,2,4,5: acknowledged, never delivered.
        fx.inject_line(&frame::encode(&PAYLOAD, Mode::Bcc));

        assert_eq!(fx.conn.rx.counters.dups, 1);
        assert!(fx.conn.clients[id].drain_egress().is_empty());
        assert_eq!(fx.wire(), frame::response(true).to_vec());
    }

    #[test]
    fn test_outbound_ack_notifies_client() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        fx.submit(id, &PAYLOAD);

        let expected = frame::encode(&PAYLOAD, Mode::Bcc);
        assert_eq!(fx.wire(), expected);

        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert_eq!(fx.conn.clients[id].drain_egress(), vec![frame::MSG_ACK]);
    }

    #[test]
    fn test_nak_retry_then_success() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        fx.submit(id, &PAYLOAD);
        let expected = frame::encode(&PAYLOAD, Mode::Bcc);
        assert_eq!(fx.wire(), expected);

        // First attempt rejected: one identical retransmission.
        fx.inject_line(&[frame::DLE, frame::NAK]);
        assert_eq!(fx.wire(), expected);

        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert_eq!(fx.conn.clients[id].drain_egress(), vec![frame::MSG_ACK]);
        assert_eq!(fx.conn.tx.counters.naks_rx, 1);
        assert_eq!(fx.conn.tx.counters.tx_ok, 1);
    }

    #[test]
    fn test_enq_timeout_recovery() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        fx.submit(id, &PAYLOAD);
        fx.wire();

        // Silence until the deadline: a lone DLE ENQ goes out.
        loop {
            fx.conn.tick();
            let wire = fx.wire();
            if !wire.is_empty() {
                assert_eq!(wire, frame::ENQ_FRAME.to_vec());
                break;
            }
        }

        // The remote re-emits its ACK; no data retransmission.
        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert_eq!(fx.conn.clients[id].drain_egress(), vec![frame::MSG_ACK]);
        assert!(fx.wire().is_empty());
    }

    #[test]
    fn test_round_robin_fairness() {
        let mut fx = fixture(Mode::Bcc, false);
        let a = fx.add_client(0x05);
        let b = fx.add_client(0x06);

        let msg_a = [0x01, 0x02, 0x06, 0x00, 0x01, 0x00];
        let msg_b = [0x01, 0x02, 0x06, 0x00, 0x02, 0x00];
        let msg_a2 = [0x01, 0x02, 0x06, 0x00, 0x03, 0x00];

        // First submission goes straight to the idle transmitter.
        fx.submit(a, &msg_a);
        assert_eq!(fx.wire(), frame::encode(&msg_a, Mode::Bcc));

        // Both clients queue up while the line is busy; b is served
        // before a's second message even though a queued first.
        fx.submit(b, &msg_b);
        fx.submit(a, &msg_a2);

        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert_eq!(fx.wire(), frame::encode(&msg_b, Mode::Bcc));

        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert_eq!(fx.wire(), frame::encode(&msg_a2, Mode::Bcc));

        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert_eq!(
            fx.conn.clients[a].drain_egress(),
            vec![frame::MSG_ACK, frame::MSG_ACK]
        );
        assert_eq!(fx.conn.clients[b].drain_egress(), vec![frame::MSG_ACK]);
    }

    #[test]
    fn test_cursor_holder_served_again() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        let msg = [0x01, 0x02, 0x06, 0x00, 0x01, 0x00];
        fx.submit(id, &msg);
        assert_eq!(fx.wire(), frame::encode(&msg, Mode::Bcc));

        // The same client stages another message while it holds the
        // round-robin cursor; it must still be served when TX idles.
        fx.submit(id, &msg);
        fx.inject_line(&[frame::DLE, frame::ACK]);

        assert_eq!(fx.wire(), frame::encode(&msg, Mode::Bcc));
    }

    #[test]
    fn test_embedded_response_completes_tx() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        fx.submit(id, &PAYLOAD);
        fx.wire();

        // The remote opens a frame and interleaves its ACK inside it.
        fx.inject_line(&[frame::DLE, frame::STX, 0x05, 0x02]);
        fx.inject_line(&[frame::DLE, frame::ACK]);

        assert!(fx.conn.embed_rsp);
        assert_eq!(fx.conn.clients[id].drain_egress(), vec![frame::MSG_ACK]);
    }

    #[test]
    fn test_embedded_response_pauses_tx_timer() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        // An ACK inside a frame latches embedded-response mode; the
        // transmitter was idle so the ACK itself is ignored.
        fx.inject_line(&[frame::DLE, frame::STX, 0x06, 0x02]);
        fx.inject_line(&[frame::DLE, frame::ACK]);
        assert!(fx.conn.embed_rsp);

        fx.submit(id, &PAYLOAD);
        fx.wire();

        // Well past the ACK deadline, but the receiver is mid-frame:
        // the response timer is held and nothing is solicited.
        for _ in 0..40 {
            fx.conn.tick();
        }
        assert!(fx.wire().is_empty());

        // Once the receiver abandons the stalled frame the timer runs
        // again and the ENQ solicitation follows.
        let mut seen = Vec::new();
        for _ in 0..60 {
            fx.conn.tick();
            seen.extend(fx.wire());
        }
        assert!(seen.windows(2).any(|pair| pair == frame::response(false)));
        assert!(seen.windows(2).any(|pair| pair == frame::ENQ_FRAME));
    }

    #[test]
    fn test_stuffed_payload_destuffed_once() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        let payload = [0x05, 0x02, 0x46, 0x00, 0x10, 0x20];
        let wire = frame::encode(&payload, Mode::Bcc);

        // The wire carries the doubled DLE.
        assert_eq!(&wire[2..9], &[0x05, 0x02, 0x46, 0x00, 0x10, 0x10, 0x20]);

        fx.inject_line(&wire);

        let mut expected = vec![frame::MSG_SOH, payload.len() as u8];
        expected.extend_from_slice(&payload);
        assert_eq!(fx.conn.clients[id].drain_egress(), expected);
    }

    #[test]
    fn test_duplicate_node_address_rejected() {
        let mut fx = fixture(Mode::Bcc, false);
        let a = fx.add_client(0x05);

        let id = fx.conn.clients.len();
        fx.conn.clients.push(Client::new(&logging::discard()));
        fx.conn.clients[id].open_detached();
        fx.conn.live.insert(id);
        fx.conn.clients[id].feed(&[0x05, 1, b'x']);

        // Same node address as an existing registration: rejected.
        assert!(!fx.conn.drain_client_events(&fx.poll, id));
        assert!(!fx.conn.clients[id].is_open());
        assert!(fx.conn.clients[a].is_open());
        assert!(fx.conn.free.contains(&id));
    }

    #[test]
    fn test_departed_owner_acked_on_behalf() {
        let mut fx = fixture(Mode::Bcc, false);
        let id = fx.add_client(0x05);

        fx.inject_line(&frame::encode(&PAYLOAD, Mode::Bcc));
        assert_eq!(fx.conn.rx_owner, Some(id));
        fx.wire();

        fx.conn.disconnect_client(&fx.poll, id, "test");

        assert_eq!(fx.conn.rx_owner, None);
        assert_eq!(fx.wire(), frame::response(true).to_vec());
    }
}
