//! Fixed-count pool of outstanding command/reply slots, keyed by
//! transaction number. Slot state is a bit-or lifecycle: a command is
//! pending, then staged, then accumulates the link acknowledgement and
//! the reply in whichever order they arrive.

use crate::command::Decoder;
use crate::reply::Reply;
use crate::shared::{CmdResult, Error};
use std::time::Instant;

/// Capacity of one slot's message buffer.
pub const SLOT_BUF_SIZE: usize = 300;

pub const UNUSED: u8 = 0x00;
/// Waiting for the transmit cursor.
pub const PEND: u8 = 0x01;
/// Staged into the service socket.
pub const TX: u8 = 0x02;
/// The link layer delivered the command.
pub const ACK_RCVD: u8 = 0x04;
/// The matching reply arrived.
pub const REPLY_RCVD: u8 = 0x08;

/// Completion callback for non-blocking commands.
pub type Notify = Box<dyn FnMut(CmdResult<Reply>)>;

pub struct Slot {
    pub(crate) state: u8,
    pub(crate) is_cmd: bool,
    pub(crate) tns: u16,
    pub(crate) wire: Vec<u8>,
    pub(crate) reply: Vec<u8>,
    pub(crate) decoder: Decoder,
    pub(crate) notify: Option<Notify>,
    pub(crate) expires: Option<Instant>,
}

impl Slot {
    fn new() -> Slot {
        Slot {
            state: UNUSED,
            is_cmd: false,
            tns: 0,
            wire: Vec::with_capacity(SLOT_BUF_SIZE),
            reply: Vec::new(),
            decoder: Decoder::None,
            notify: None,
            expires: None,
        }
    }

    #[inline]
    pub fn in_use(&self) -> bool {
        self.state != UNUSED
    }
}

pub struct Pool {
    slots: Vec<Slot>,
}

impl Pool {
    pub fn new(count: usize) -> Pool {
        debug_assert!(count >= 1);

        Pool {
            slots: (0..count).map(|_| Slot::new()).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn slot(&mut self, idx: usize) -> &mut Slot {
        &mut self.slots[idx]
    }

    /// Claim the first unused slot.
    pub fn acquire(&mut self) -> CmdResult<usize> {
        let idx = self
            .slots
            .iter()
            .position(|slot| !slot.in_use())
            .ok_or(Error::NoBuffer)?;

        self.slots[idx].state = PEND;
        Ok(idx)
    }

    /// Return a slot to the pool, clearing everything it held.
    pub fn release(&mut self, idx: usize) {
        let slot = &mut self.slots[idx];

        slot.state = UNUSED;
        slot.is_cmd = false;
        slot.tns = 0;
        slot.wire.clear();
        slot.reply.clear();
        slot.decoder = Decoder::None;
        slot.notify = None;
        slot.expires = None;
    }

    /// The staged message bytes of a slot.
    #[inline]
    pub fn wire(&self, idx: usize) -> &[u8] {
        &self.slots[idx].wire
    }

    /// Find the outstanding command slot with the supplied transaction
    /// number.
    pub fn by_tns(&self, tns: u16) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.in_use() && slot.is_cmd && slot.tns == tns)
    }

    /// First slot still waiting for the transmit cursor.
    pub fn next_pending(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.state == PEND)
    }

    /// Indices of every in-use command slot.
    pub fn outstanding(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&idx| self.slots[idx].in_use() && self.slots[idx].is_cmd)
            .collect()
    }
}
