//! One registered peer on the service's TCP side. Tracks the
//! registration and message-submission protocol byte by byte and buffers
//! traffic in both directions.

use crate::buffer::Buffer;
use crate::frame;
use crate::logging::{self, Logger};
use crate::shared::{ErrorType, LinkError, LinkResult};
use mio;
use mio::net::TcpStream;
use std::net::Shutdown;

pub type ClientId = usize;

pub const NAME_MAX: usize = 16;

const SOCK_IN_SIZE: usize = 512;
const SOCK_OUT_SIZE: usize = 4096;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClientState {
    Disconnected,
    /// Accepted; awaiting the requested node address byte.
    Connected,
    /// Awaiting the name length byte.
    RegLen,
    /// Consuming the name bytes.
    RegName,
    /// Registered and quiescent.
    Idle,
    /// MSG_SOH seen; awaiting the length byte.
    MsgLen,
    /// Consuming payload bytes.
    Msg,
    /// A complete message is staged for the line.
    MsgReady,
}

/// Protocol event surfaced to the registry while parsing client bytes.
#[derive(Debug, Eq, PartialEq)]
pub enum ClientEvent {
    None,
    /// Registration completed with the requested node address.
    Register { node: u8 },
    /// A full outbound message is staged.
    MessageReady,
    /// Response to the last delivered inbound message.
    Ack,
    Nak,
    Violation(&'static str),
}

#[derive(Debug, Default)]
pub struct ClientCounters {
    /// Messages submitted by the client for the line.
    pub msgs_in: u64,
    /// Messages delivered to the client from the line.
    pub msgs_out: u64,
}

pub struct Client {
    stream: Option<TcpStream>,
    state: ClientState,
    node: u8,
    name: String,
    sock_in: Buffer,
    sock_out: Buffer,
    staging: Vec<u8>,
    want: usize,
    pub counters: ClientCounters,
    log: Logger,
}

impl Client {
    pub fn new(log: &Logger) -> Client {
        Client {
            stream: None,
            state: ClientState::Disconnected,
            node: 0,
            name: String::new(),
            sock_in: Buffer::new(SOCK_IN_SIZE),
            sock_out: Buffer::new(SOCK_OUT_SIZE),
            staging: Vec::with_capacity(frame::MAX_PAYLOAD),
            want: 0,
            counters: ClientCounters::default(),
            log: log.new(logging::o!()),
        }
    }

    /// Adopt a freshly accepted stream. The slot must be closed.
    pub fn open(&mut self, stream: TcpStream) {
        debug_assert_eq!(self.state, ClientState::Disconnected);

        self.stream = Some(stream);
        self.state = ClientState::Connected;
        self.node = 0;
        self.name.clear();
        self.sock_in.clear();
        self.sock_out.clear();
        self.staging.clear();
        self.counters = ClientCounters::default();
    }

    /// Shut the stream down and return the slot to the free pool.
    pub fn close(&mut self) {
        logging::debug!(self.log, "closing client";
                        "node" => self.node,
                        "name" => &self.name,
                        "msgs_in" => self.counters.msgs_in,
                        "msgs_out" => self.counters.msgs_out);

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.state = ClientState::Disconnected;
    }

    #[inline]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state != ClientState::Disconnected
    }

    /// True once registration completed.
    #[inline]
    pub fn registered(&self) -> bool {
        match self.state {
            ClientState::Idle | ClientState::MsgLen | ClientState::Msg | ClientState::MsgReady => true,
            _ => false,
        }
    }

    #[inline]
    pub fn node(&self) -> u8 {
        self.node
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn has_egress(&self) -> bool {
        !self.sock_out.is_empty()
    }

    /// Registers the client stream on the supplied poll.
    pub fn register(&self, poll: &mio::Poll, token: mio::Token) -> LinkResult<()> {
        let stream = self.stream.as_ref().expect("Can't register disconnected client");

        poll.register(
            stream,
            token,
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )
        .map_err(Into::into)
    }

    pub fn deregister(&self, poll: &mio::Poll) -> LinkResult<()> {
        match self.stream.as_ref() {
            Some(stream) => poll.deregister(stream).map_err(Into::into),
            None => Ok(()),
        }
    }

    /// Read all available data off the socket. `Fatal(Closed)` when the
    /// peer shut its end down.
    pub fn receive(&mut self) -> LinkResult<usize> {
        let stream = self.stream.as_mut().expect("Client must have valid stream");
        let count = self.sock_in.ingress(stream)?;

        if count == 0 {
            return Err(LinkError::Fatal(ErrorType::Closed));
        }

        Ok(count)
    }

    /// Flush buffered outbound data to the socket.
    pub fn send(&mut self) -> LinkResult<usize> {
        if self.sock_out.is_empty() {
            return Ok(0);
        }

        let stream = self.stream.as_mut().expect("Client must have valid stream");
        self.sock_out.egress(stream).map_err(Into::into)
    }

    /// Queue an inbound application message for the client, framed as
    /// `MSG_SOH, length, payload`. False if the socket buffer is full.
    pub fn deliver(&mut self, payload: &[u8]) -> bool {
        debug_assert!(payload.len() <= frame::MAX_PAYLOAD);

        if self.sock_out.free_capacity() < payload.len() + 2 {
            return false;
        }

        self.sock_out.push(&[frame::MSG_SOH, payload.len() as u8]);
        self.sock_out.push(payload);
        self.counters.msgs_out += 1;
        true
    }

    /// Queue the single-byte outcome of the client's own transmission.
    pub fn notify(&mut self, ok: bool) -> bool {
        self.sock_out.push_byte(match ok {
            true => frame::MSG_ACK,
            false => frame::MSG_NAK,
        })
    }

    /// Take the staged outbound message for the transmitter.
    pub fn take_message(&mut self) -> Vec<u8> {
        debug_assert_eq!(self.state, ClientState::MsgReady);

        self.state = ClientState::Idle;
        self.counters.msgs_in += 1;
        std::mem::replace(&mut self.staging, Vec::with_capacity(frame::MAX_PAYLOAD))
    }

    /// Advance the parse machine by at most one protocol event. Call
    /// until `None` is returned.
    pub fn parse(&mut self) -> ClientEvent {
        while let Some(byte) = self.next_byte() {
            match self.state {
                ClientState::Connected => {
                    self.node = byte;
                    self.state = ClientState::RegLen;
                }
                ClientState::RegLen => {
                    if byte == 0 || byte as usize > NAME_MAX {
                        return ClientEvent::Violation("bad name length");
                    }
                    self.want = byte as usize;
                    self.name.clear();
                    self.state = ClientState::RegName;
                }
                ClientState::RegName => {
                    self.name.push(byte as char);
                    self.want -= 1;

                    if self.want == 0 {
                        self.state = ClientState::Idle;
                        return ClientEvent::Register { node: self.node };
                    }
                }
                ClientState::Idle => match byte {
                    frame::MSG_SOH => self.state = ClientState::MsgLen,
                    frame::MSG_ACK => return ClientEvent::Ack,
                    frame::MSG_NAK => return ClientEvent::Nak,
                    _ => return ClientEvent::Violation("unexpected byte"),
                },
                ClientState::MsgLen => {
                    if byte == 0 {
                        return ClientEvent::Violation("empty message");
                    }
                    self.want = byte as usize;
                    self.staging.clear();
                    self.state = ClientState::Msg;
                }
                ClientState::Msg => {
                    self.staging.push(byte);
                    self.want -= 1;

                    if self.want == 0 {
                        self.state = ClientState::MsgReady;
                        return ClientEvent::MessageReady;
                    }
                }
                ClientState::MsgReady => match byte {
                    frame::MSG_ACK => return ClientEvent::Ack,
                    frame::MSG_NAK => return ClientEvent::Nak,
                    frame::MSG_SOH => return ClientEvent::Violation("message already staged"),
                    _ => return ClientEvent::Violation("unexpected byte"),
                },
                ClientState::Disconnected => return ClientEvent::None,
            }
        }

        ClientEvent::None
    }

    #[inline]
    fn next_byte(&mut self) -> Option<u8> {
        let byte = self.sock_in.read_slice().first().copied()?;
        self.sock_in.move_head(1);
        Some(byte)
    }

    #[cfg(test)]
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        assert!(self.sock_in.push(bytes));
    }

    #[cfg(test)]
    pub(crate) fn drain_egress(&mut self) -> Vec<u8> {
        let bytes = self.sock_out.read_slice().to_vec();
        self.sock_out.clear();
        bytes
    }

    #[cfg(test)]
    pub(crate) fn open_detached(&mut self) {
        self.state = ClientState::Connected;
    }
}
