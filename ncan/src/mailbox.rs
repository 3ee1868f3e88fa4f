//! Management of the fixed bank of hardware mailboxes
//!
//! Every flag shared across mailboxes (enable, direction, interrupt enable,
//! transmission request, overwrite protection) is mutated exclusively through
//! its SET/CLR register pair: writing a 1 to the SET register asserts the bit
//! for that mailbox without disturbing the others, writing to CLR deasserts
//! it. A read-modify-write on those registers would lose updates racing in
//! from another context, so none is ever performed.

use crate::message::Frame;
use crate::reg;
use core::convert::Infallible;
use embedded_can::Id;
use ncan_core::RegisterWindow;

/// Upper bound on the mailbox bank imposed by the 32-bit flag registers
pub const MAX_MAILBOXES: usize = 32;

/// Direction of a mailbox
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Mailbox transmits frames loaded into it
    Tx,
    /// Mailbox receives frames matching its acceptance filter
    Rx,
}

/// Mailbox index is outside the bank
#[derive(Debug)]
pub struct OutOfBounds;

/// A set of mailboxes
#[derive(Copy, Clone, Default)]
pub struct MailboxSet(pub u32);

impl FromIterator<usize> for MailboxSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        let mut set = 0_u32;
        for i in iter.into_iter() {
            if i < MAX_MAILBOXES {
                set |= 1u32 << i;
            }
        }
        MailboxSet(set)
    }
}

impl MailboxSet {
    /// Returns the set of the first `count` mailboxes
    pub fn first(count: usize) -> Self {
        match count {
            0 => Self(0),
            1..=31 => Self((1 << count) - 1),
            _ => Self(u32::MAX),
        }
    }

    /// Returns `true` if `index` is a member
    ///
    /// Indexes beyond the flag register width are never members.
    pub fn contains(&self, index: usize) -> bool {
        index < MAX_MAILBOXES && self.0 & (1 << index) != 0
    }

    /// Returns `true` if the set has no members
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Lowest-numbered member, if any
    pub fn lowest(&self) -> Option<usize> {
        match self.0.trailing_zeros() {
            32 => None,
            i => Some(i as usize),
        }
    }

    /// An iterator visiting all members in ascending index order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

/// An iterator over the indexes of the mailboxes in a [`MailboxSet`].
///
/// This `struct` is created by [`MailboxSet::iter`].
pub struct Iter {
    flags: MailboxSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.index;
        self.index = self.index.saturating_add(1);
        if i > 31 {
            None
        } else if self.flags.0 & (1 << i) != 0 {
            Some(i as usize)
        } else {
            self.next()
        }
    }
}

/// Acceptance filter for one receive mailbox
#[derive(Copy, Clone)]
pub struct RxFilter {
    /// Identifier to accept
    pub id: Id,
    /// Identifier bits to ignore during comparison (1 = don't care)
    pub mask: u32,
    /// Mailbox timeout in TIMER ticks, 0 disables the timeout
    pub timeout: u32,
}

impl RxFilter {
    /// Accept only frames with exactly `id`
    pub fn exact(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            mask: 0,
            timeout: 0,
        }
    }

    /// Accept every frame
    pub fn accept_all() -> Self {
        Self {
            // The id is irrelevant when every bit is masked out
            id: Id::Extended(embedded_can::ExtendedId::ZERO),
            mask: u32::MAX,
            timeout: 0,
        }
    }
}

/// The fixed bank of hardware mailboxes of one controller
///
/// Owns the software-side bookkeeping: which mailboxes are configured for
/// transmission and which of those have a request in flight. The hardware
/// flags themselves live in the shared registers and are only ever touched
/// through their SET/CLR pairs.
pub struct Mailboxes {
    count: u8,
    tx: MailboxSet,
    busy: MailboxSet,
}

impl Mailboxes {
    /// Bookkeeping for a bank of `count` mailboxes
    pub fn new(count: u8) -> Self {
        Self {
            count: count.min(MAX_MAILBOXES as u8),
            tx: MailboxSet::default(),
            busy: MailboxSet::default(),
        }
    }

    /// Number of mailboxes the register window covers
    ///
    /// One block per `0x20` byte stride from `0x400`, capped by the width of
    /// the shared flag registers.
    pub fn count_for_window(size: usize) -> u8 {
        (size.saturating_sub(reg::mbx::BASE as usize) / reg::mbx::STRIDE as usize)
            .min(MAX_MAILBOXES) as u8
    }

    /// Number of mailboxes in the bank
    pub fn count(&self) -> usize {
        self.count.into()
    }

    /// Mailboxes with a transmission in flight
    pub fn busy(&self) -> MailboxSet {
        self.busy
    }

    fn check(&self, index: usize) -> Result<u32, OutOfBounds> {
        if index < self.count() {
            Ok(1 << index)
        } else {
            Err(OutOfBounds)
        }
    }

    /// Enable mailbox `index` without disturbing any other mailbox
    pub fn enable<W: RegisterWindow>(&self, w: &W, index: usize) -> Result<(), OutOfBounds> {
        let bit = self.check(index)?;
        w.write(reg::MBX_EN_SET, bit);
        Ok(())
    }

    /// Disable mailbox `index` without disturbing any other mailbox
    pub fn disable<W: RegisterWindow>(&self, w: &W, index: usize) -> Result<(), OutOfBounds> {
        let bit = self.check(index)?;
        w.write(reg::MBX_EN_CLR, bit);
        Ok(())
    }

    /// Set the direction of mailbox `index`
    pub fn set_direction<W: RegisterWindow>(
        &mut self,
        w: &W,
        index: usize,
        direction: Direction,
    ) -> Result<(), OutOfBounds> {
        let bit = self.check(index)?;
        match direction {
            Direction::Rx => {
                w.write(reg::MBX_DIR_SET, bit);
                self.tx.0 &= !bit;
            }
            Direction::Tx => {
                w.write(reg::MBX_DIR_CLR, bit);
                self.tx.0 |= bit;
            }
        }
        Ok(())
    }

    /// Configure and enable mailbox `index` for reception
    ///
    /// The mailbox is disabled while its filter registers are written so the
    /// hardware never matches against a half-programmed filter.
    pub fn configure_rx<W: RegisterWindow>(
        &mut self,
        w: &W,
        index: usize,
        filter: &RxFilter,
        overwrite_protection: bool,
    ) -> Result<(), OutOfBounds> {
        let bit = self.check(index)?;
        w.write(reg::MBX_EN_CLR, bit);
        self.set_direction(w, index, Direction::Rx)?;
        w.write(reg::mbx::id(index), Frame::encode_id(filter.id));
        w.write(reg::mbx::accept_mask(index), filter.mask);
        w.write(reg::mbx::timeout(index), filter.timeout);
        if overwrite_protection {
            w.write(reg::OWRITE_DIS_SET, bit);
        } else {
            w.write(reg::OWRITE_DIS_CLR, bit);
        }
        w.write(reg::MBX_INT_EN_SET, bit);
        w.write(reg::MBX_EN_SET, bit);
        Ok(())
    }

    /// Configure mailbox `index` for transmission
    ///
    /// The mailbox stays disabled until a frame is loaded into it.
    pub fn configure_tx<W: RegisterWindow>(
        &mut self,
        w: &W,
        index: usize,
    ) -> Result<(), OutOfBounds> {
        let bit = self.check(index)?;
        w.write(reg::MBX_EN_CLR, bit);
        self.set_direction(w, index, Direction::Tx)?;
        w.write(reg::MBX_INT_EN_SET, bit);
        Ok(())
    }

    /// Load `frame` into a free transmit mailbox and request transmission
    ///
    /// Fails with [`nb::Error::WouldBlock`] when every transmit mailbox is
    /// occupied; the caller must suspend offering frames until a
    /// transmission acknowledge frees one.
    pub fn load<W: RegisterWindow>(
        &mut self,
        w: &W,
        frame: &Frame,
    ) -> nb::Result<usize, Infallible> {
        let free = MailboxSet(self.tx.0 & !self.busy.0);
        let index = free.lowest().ok_or(nb::Error::WouldBlock)?;
        let bit = 1 << index;
        w.write(reg::mbx::id(index), frame.id_word());
        w.write(reg::mbx::cntrl(index), frame.cntrl_word());
        w.write(reg::mbx::data_h(index), frame.data_h());
        w.write(reg::mbx::data_l(index), frame.data_l());
        w.write(reg::MBX_EN_SET, bit);
        w.write(reg::TX_REQ_SET, bit);
        self.busy.0 |= bit;
        Ok(index)
    }

    /// Request abort of the transmission in flight in mailbox `index`
    ///
    /// The mailbox stays occupied until the hardware answers with a
    /// TX_ABORT_ACK event; only that acknowledge frees it for reuse.
    pub fn abort<W: RegisterWindow>(&self, w: &W, index: usize) -> Result<(), OutOfBounds> {
        let bit = self.check(index)?;
        if self.busy.contains(index) {
            w.write(reg::TX_REQ_CLR, bit);
        }
        Ok(())
    }

    /// Drain the frame held by pending receive mailbox `index`
    ///
    /// Reading the mailbox does not clear hardware pending state; the
    /// explicit acknowledge write here does.
    pub(crate) fn drain<W: RegisterWindow>(&self, w: &W, index: usize) -> Frame {
        let bit = 1 << index;
        let mut frame = Frame::from_raw(
            w.read(reg::mbx::id(index)),
            w.read(reg::mbx::cntrl(index)),
            w.read(reg::mbx::data_h(index)),
            w.read(reg::mbx::data_l(index)),
        );
        if w.read(reg::RX_REMOTE) & bit != 0 {
            frame.mark_remote();
            w.write(reg::RX_REMOTE, bit);
        }
        w.write(reg::RX_MSG_PEND, bit);
        frame
    }

    /// Acknowledge a completed or aborted transmission and free the mailbox
    pub(crate) fn reclaim_tx<W: RegisterWindow>(&mut self, w: &W, index: usize, aborted: bool) {
        let bit = 1 << index;
        let ack = if aborted {
            reg::TX_ABORT_ACK
        } else {
            reg::TX_ACK
        };
        w.write(ack, bit);
        w.write(reg::MBX_EN_CLR, bit);
        self.busy.0 &= !bit;
    }

    /// Acknowledge an overwritten receive mailbox
    pub(crate) fn reclaim_lost<W: RegisterWindow>(&self, w: &W, index: usize) {
        w.write(reg::RX_MSG_LOST, 1 << index);
    }

    /// Disable the whole bank and its per-mailbox interrupts
    pub(crate) fn disable_all<W: RegisterWindow>(&self, w: &W) {
        let all = MailboxSet::first(self.count()).0;
        w.write(reg::MBX_INT_EN_CLR, all);
        w.write(reg::MBX_EN_CLR, all);
    }

    /// Forget all software bookkeeping, after a controller reset
    pub(crate) fn clear_tracking(&mut self) {
        self.tx = MailboxSet::default();
        self.busy = MailboxSet::default();
    }
}
