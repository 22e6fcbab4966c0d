use std::fmt;
use std::io;

pub type CmdResult<T> = Result<T, Error>;

/// Outcome taxonomy surfaced by the client API. Every command either
/// returns one of these synchronously or delivers it through its notify
/// callback, never both.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// The operation would block; retry on the next readiness event.
    Wait,
    /// The session is not connected to a DF1 service.
    NoConnection,
    /// Socket-level failure; the session is down until reconnected.
    Link(io::ErrorKind),
    /// An argument failed validation before any slot was allocated.
    InvalidParameter(&'static str),
    /// Unrecoverable process-level failure.
    Fatal(&'static str),
    /// Internal frame assembly exceeded the slot buffer.
    BufferOverflow,
    /// The slot pool is exhausted.
    NoBuffer,
    /// The link layer NAK'd the command.
    NoDeliver,
    /// No reply arrived within the session timeout.
    Timeout,
    /// The reply carried a non-zero STS or failed to decode.
    Reply(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Wait => write!(f, "operation would block"),
            Error::NoConnection => write!(f, "not connected to a DF1 service"),
            Error::Link(kind) => write!(f, "link error: {:?}", kind),
            Error::InvalidParameter(what) => write!(f, "invalid parameter: {}", what),
            Error::Fatal(what) => write!(f, "fatal error: {}", what),
            Error::BufferOverflow => write!(f, "internal buffer overflow"),
            Error::NoBuffer => write!(f, "no free message slot"),
            Error::NoDeliver => write!(f, "link layer could not deliver the command"),
            Error::Timeout => write!(f, "timed out waiting for a reply"),
            Error::Reply(what) => write!(f, "reply error: {}", what),
        }
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => Error::Wait,
            kind => Error::Link(kind),
        }
    }
}
