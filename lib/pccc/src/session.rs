//! A client session against a running DF1 service instance. Commands
//! are correlated to replies by transaction number and run in one of
//! two modes: non-blocking with a completion callback, where the
//! application owns the event loop and calls `read`/`write`/`tick`, or
//! one-at-a-time blocking, where `transact` drives a bounded readiness
//! wait itself.

use crate::command::Command;
use crate::pool::{self, Notify, Pool};
use crate::reply::{self, Reply};
use crate::shared::{CmdResult, Error};
use df1::buffer::Buffer;
use df1::frame::{MAX_PAYLOAD, MSG_ACK, MSG_NAK, MSG_SOH};
use df1::logging::{self, Logger};
use mio;
use mio::net::TcpStream;
use rand::Rng;
use std::io;
use std::net::{SocketAddr, TcpStream as StdTcpStream};
use std::time::{Duration, Instant};

const SOCK_BUF_SIZE: usize = 4096;
const STREAM_TOKEN: mio::Token = mio::Token(0);

/// Grace added to the reply deadline once the link acknowledged the
/// command.
const ACK_GRACE: Duration = Duration::from_secs(1);

/// Service frame assembly state.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum AsmState {
    Idle,
    MsgLen,
    Msg,
}

pub struct Session {
    stream: TcpStream,
    poll: mio::Poll,
    events: mio::Events,
    src_node: u8,
    timeout: Duration,
    tns: u16,
    sock_in: Buffer,
    sock_out: Buffer,
    asm_state: AsmState,
    asm_len: usize,
    asm_buf: Vec<u8>,
    pool: Pool,
    tx_slot: Option<usize>,
    connected: bool,
    sync_result: Option<CmdResult<Reply>>,
    error_text: String,
    log: Logger,
}

impl Session {
    /// Connect and register with a DF1 service. `slots` bounds the
    /// number of outstanding commands; `timeout_secs` bounds every
    /// command's reply wait.
    pub fn connect(
        addr: &str,
        src_node: u8,
        name: &str,
        slots: usize,
        timeout_secs: u64,
        log: &Logger,
    ) -> CmdResult<Session> {
        if slots == 0 {
            return Err(Error::InvalidParameter("slot count must be at least 1"));
        }

        if name.is_empty() || name.len() > 16 {
            return Err(Error::InvalidParameter("name must be 1..=16 bytes"));
        }

        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| Error::InvalidParameter("bad service address"))?;

        let std_stream = StdTcpStream::connect(&addr)?;
        std_stream.set_nonblocking(true)?;
        let stream = TcpStream::from_stream(std_stream)?;

        let poll = mio::Poll::new()?;
        poll.register(
            &stream,
            STREAM_TOKEN,
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )?;

        let mut session = Session {
            stream,
            poll,
            events: mio::Events::with_capacity(64),
            src_node,
            timeout: Duration::from_secs(timeout_secs),
            tns: rand::thread_rng().gen_range(1..=u16::max_value()),
            sock_in: Buffer::new(SOCK_BUF_SIZE),
            sock_out: Buffer::new(SOCK_BUF_SIZE),
            asm_state: AsmState::Idle,
            asm_len: 0,
            asm_buf: Vec::new(),
            pool: Pool::new(slots),
            tx_slot: None,
            connected: true,
            sync_result: None,
            error_text: String::new(),
            log: log.new(logging::o!("session" => name.to_string())),
        };

        // Registration: node address, name length, name.
        session.sock_out.push(&[src_node, name.len() as u8]);
        session.sock_out.push(name.as_bytes());
        session.flush()?;

        logging::debug!(session.log, "session connected"; "node" => src_node);
        Ok(session)
    }

    #[inline]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Canonical phrase for the code plus the session's last descriptive
    /// text.
    pub fn errstr(&self, err: &Error) -> String {
        match self.error_text.is_empty() {
            true => err.to_string(),
            false => format!("{}: {}", err, self.error_text),
        }
    }

    /// Queue a command for non-blocking execution. The callback fires
    /// exactly once with the outcome; the caller drives the session with
    /// `read`, `write` and `tick`.
    pub fn submit(&mut self, cmd: Command, notify: Notify) -> CmdResult<()> {
        if !self.connected {
            return Err(Error::NoConnection);
        }

        let idx = self.pool.acquire()?;
        self.init_slot(idx, &cmd, Some(notify))?;
        self.pump_tx();
        self.flush()
    }

    /// Issue one command and block until its reply, a link rejection or
    /// the session timeout. The only place library code blocks.
    pub fn transact(&mut self, cmd: Command) -> CmdResult<Reply> {
        if !self.connected {
            return Err(Error::NoConnection);
        }

        let idx = self.pool.acquire()?;
        self.init_slot(idx, &cmd, None)?;
        self.sync_result = None;
        self.pump_tx();

        let deadline = Instant::now() + self.timeout;

        loop {
            self.flush()?;

            if let Some(result) = self.sync_result.take() {
                return result;
            }

            let now = Instant::now();
            if now >= deadline {
                self.pool.release(idx);
                if self.tx_slot == Some(idx) {
                    self.tx_slot = None;
                }
                self.error_text = "no reply within the session timeout".to_string();
                return Err(Error::Timeout);
            }

            self.poll
                .poll(&mut self.events, Some(deadline - now))
                .map_err(|_| Error::Fatal("readiness wait failed"))?;

            let mut readable = false;
            let mut writable = false;
            for event in &self.events {
                readable |= event.readiness().is_readable();
                writable |= event.readiness().is_writable();
            }

            if readable {
                if let Err(err) = self.read() {
                    // The failure aborted every outstanding slot,
                    // including ours; surface its recorded outcome.
                    return match self.sync_result.take() {
                        Some(result) => result,
                        None => Err(err),
                    };
                }
            }

            if writable {
                self.flush()?;
            }
        }
    }

    /// Drain the service socket and process every complete frame.
    pub fn read(&mut self) -> CmdResult<()> {
        if !self.connected {
            return Err(Error::NoConnection);
        }

        loop {
            match self.sock_in.ingress(&mut self.stream) {
                Ok(0) => return self.fail_link(io::ErrorKind::UnexpectedEof),
                Ok(_) => self.process_input(),
                Err(err) => {
                    return match err.kind() {
                        io::ErrorKind::WouldBlock => {
                            self.process_input();
                            Ok(())
                        }
                        kind => self.fail_link(kind),
                    };
                }
            }
        }
    }

    /// True when buffered egress is waiting for the socket.
    #[inline]
    pub fn write_ready(&self) -> bool {
        !self.sock_out.is_empty()
    }

    /// Flush buffered egress and stage the next pending command.
    pub fn write(&mut self) -> CmdResult<()> {
        if !self.connected {
            return Err(Error::NoConnection);
        }

        self.flush()?;
        self.pump_tx();
        self.flush()
    }

    /// Expire overdue slots. Call periodically in non-blocking mode.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();

        for idx in self.pool.outstanding() {
            if let Some(expires) = self.pool.slot(idx).expires {
                if now >= expires {
                    expired.push(idx);
                }
            }
        }

        for idx in expired {
            logging::debug!(self.log, "command expired"; "slot" => idx);
            self.error_text = "no reply within the session timeout".to_string();
            self.finish(idx, Err(Error::Timeout));
        }

        self.pump_tx();
    }

    /// Abort every outstanding command with the supplied error.
    pub fn abort_all(&mut self, err: Error) {
        self.tx_slot = None;

        for idx in self.pool.outstanding() {
            self.finish(idx, Err(err.clone()));
        }
    }

    fn init_slot(&mut self, idx: usize, cmd: &Command, notify: Option<Notify>) -> CmdResult<()> {
        let tns = self.next_tns();

        let mut wire = Vec::with_capacity(pool::SLOT_BUF_SIZE);
        cmd.encode(self.src_node, tns, &mut wire);

        if wire.len() > pool::SLOT_BUF_SIZE || wire.len() > MAX_PAYLOAD {
            self.pool.release(idx);
            return Err(Error::BufferOverflow);
        }

        let slot = self.pool.slot(idx);
        slot.is_cmd = true;
        slot.tns = tns;
        slot.wire = wire;
        slot.decoder = cmd.decoder.clone();
        slot.notify = notify;
        slot.expires = None;

        Ok(())
    }

    /// Monotonic per-session transaction numbers, zero skipped.
    fn next_tns(&mut self) -> u16 {
        let tns = self.tns;

        self.tns = self.tns.wrapping_add(1);
        if self.tns == 0 {
            self.tns = 1;
        }

        tns
    }

    /// Stage the next pending slot when the single transmit cursor is
    /// free and the socket buffer has room.
    fn pump_tx(&mut self) {
        if self.tx_slot.is_some() {
            return;
        }

        let idx = match self.pool.next_pending() {
            Some(idx) => idx,
            None => return,
        };

        let len = self.pool.wire(idx).len();

        if self.sock_out.free_capacity() < len + 2 {
            return;
        }

        self.sock_out.push(&[MSG_SOH, len as u8]);
        self.sock_out.push(self.pool.wire(idx));

        self.pool.slot(idx).state |= pool::TX;
        self.tx_slot = Some(idx);
    }

    fn process_input(&mut self) {
        while let Some(&byte) = self.sock_in.read_slice().first() {
            self.sock_in.move_head(1);

            match self.asm_state {
                AsmState::Idle => match byte {
                    MSG_SOH => self.asm_state = AsmState::MsgLen,
                    MSG_ACK => self.service_response(true),
                    MSG_NAK => self.service_response(false),
                    _ => logging::debug!(self.log, "protocol noise from service"; "byte" => byte),
                },
                AsmState::MsgLen => match byte {
                    0 => self.asm_state = AsmState::Idle,
                    len => {
                        self.asm_len = usize::from(len);
                        self.asm_buf.clear();
                        self.asm_state = AsmState::Msg;
                    }
                },
                AsmState::Msg => {
                    self.asm_buf.push(byte);

                    if self.asm_buf.len() == self.asm_len {
                        self.asm_state = AsmState::Idle;
                        self.inbound_frame();
                    }
                }
            }
        }
    }

    /// The service reported the outcome of our staged command.
    fn service_response(&mut self, delivered: bool) {
        let idx = match self.tx_slot.take() {
            Some(idx) => idx,
            None => {
                logging::debug!(self.log, "stray service response");
                return;
            }
        };

        if !delivered {
            self.finish(idx, Err(Error::NoDeliver));
            self.pump_tx();
            return;
        }

        let expires = Instant::now() + self.timeout + ACK_GRACE;
        let slot = self.pool.slot(idx);
        slot.state |= pool::ACK_RCVD;
        slot.expires = Some(expires);
        let done = slot.state & pool::REPLY_RCVD != 0;

        if done {
            self.complete(idx);
        }

        self.pump_tx();
    }

    /// A complete application frame arrived from the service.
    fn inbound_frame(&mut self) {
        let frame = std::mem::replace(&mut self.asm_buf, Vec::new());

        // Accept the delivery at the link level regardless of content.
        self.sock_out.push_byte(MSG_ACK);

        if !reply::is_reply(&frame) {
            logging::debug!(self.log, "dropping non-reply frame"; "bytes" => frame.len());
            return;
        }

        let tns = reply::tns(&frame);
        let idx = match self.pool.by_tns(tns) {
            Some(idx) => idx,
            None => {
                logging::debug!(self.log, "dropping unmatched reply"; "tns" => tns);
                return;
            }
        };

        let slot = self.pool.slot(idx);
        slot.reply = frame;
        slot.state |= pool::REPLY_RCVD;

        // A blocking caller is woken by the reply alone; callback slots
        // wait for the link acknowledgement as well.
        let done = slot.state & pool::ACK_RCVD != 0 || slot.notify.is_none();

        if done {
            self.complete(idx);
        }
    }

    fn complete(&mut self, idx: usize) {
        let result = {
            let slot = self.pool.slot(idx);
            reply::decode(&slot.decoder, &slot.reply)
        };

        self.finish(idx, result);
    }

    /// Recycle a slot and deliver its outcome exactly once: through the
    /// callback if one was supplied, otherwise to the blocking caller.
    fn finish(&mut self, idx: usize, result: CmdResult<Reply>) {
        if let Err(err) = &result {
            self.error_text = err.to_string();
        }

        let notify = self.pool.slot(idx).notify.take();
        self.pool.release(idx);

        if self.tx_slot == Some(idx) {
            self.tx_slot = None;
        }

        match notify {
            Some(mut notify) => notify(result),
            None => self.sync_result = Some(result),
        }
    }

    fn flush(&mut self) -> CmdResult<()> {
        if self.sock_out.is_empty() {
            return Ok(());
        }

        match self.sock_out.egress(&mut self.stream) {
            Ok(_) => Ok(()),
            Err(err) => match err.kind() {
                io::ErrorKind::WouldBlock => Ok(()),
                kind => self.fail_link(kind),
            },
        }
    }

    /// The socket died: flip to disconnected and abort every slot.
    fn fail_link(&mut self, kind: io::ErrorKind) -> CmdResult<()> {
        logging::warn!(self.log, "service connection lost"; "error" => ?kind);

        self.connected = false;
        self.error_text = format!("socket failure: {:?}", kind);
        self.abort_all(Error::Link(kind));

        Err(Error::Link(kind))
    }
}
