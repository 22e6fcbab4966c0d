//! PCCC application-layer client library.
//!
//! Rides over a `df1d` service instance to issue commands to PLC
//! processors: command composition and validation, transaction-number
//! correlation of replies, data-table and address codecs, and STS
//! diagnosis. Commands run either non-blocking with a completion
//! callback or blocking one-at-a-time.

pub mod address;
pub mod command;
pub mod data;
pub mod pool;
pub mod reply;
pub mod session;
pub mod shared;
pub mod status;

pub use crate::address::PlcAddress;
pub use crate::command::{Command, CpuMode};
pub use crate::data::{ControlValue, CounterValue, FileData, FileType, PlcString, TimerValue};
pub use crate::pool::Notify;
pub use crate::reply::{Reply, SlcFileInfo};
pub use crate::session::Session;
pub use crate::shared::{CmdResult, Error};
