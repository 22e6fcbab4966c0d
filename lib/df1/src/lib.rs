//! DF1 link layer and line multiplexer.
//!
//! A `Connection` owns one half/full-duplex serial line and shares it
//! between any number of TCP clients registered by logical node
//! address: inbound application messages are routed by their
//! destination-node byte, outbound messages are framed, checksummed and
//! retried per the DF1 request/response rules.

pub mod buffer;
pub mod checksum;
pub mod client;
pub mod connection;
pub mod frame;
pub mod logging;
pub mod rx;
pub mod shared;
pub mod tx;
