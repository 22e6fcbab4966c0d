use std::io;
use std::net;

pub type LinkResult<T> = Result<T, LinkError>;

/// Two-level error scheme for the link layer. `Wait` means the operation
/// would block and should be retried on the next readiness event; `Fatal`
/// takes the connection (or client) down.
#[derive(Debug, Eq, PartialEq)]
pub enum LinkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorType {
    /// The peer closed its end of the stream.
    Closed,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for LinkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => LinkError::Wait,
            kind => LinkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for LinkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        LinkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for LinkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(LinkError::Wait) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_folds_to_wait() {
        let err: LinkError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(err, LinkError::Wait);

        let err: LinkError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        assert_eq!(err, LinkError::Fatal(ErrorType::Io(io::ErrorKind::BrokenPipe)));
    }

    #[test]
    fn test_has_failed() {
        assert!(!LinkResult::Ok(()).has_failed());
        assert!(!LinkResult::<()>::Err(LinkError::Wait).has_failed());
        assert!(LinkResult::<()>::Err(LinkError::Fatal(ErrorType::Closed)).has_failed());
    }
}
