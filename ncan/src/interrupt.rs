//! Interrupt dispatch vocabulary
//!
//! The controller signals through one global interrupt word (INT, with the
//! matching enable mask in INT_EN). The handler runs in two phases: a
//! non-blocking triage in interrupt context that only latches and masks, and
//! a bounded reclamation pass that drains the mailbox events afterwards.

use bitfield::bitfield;
use core::fmt;

bitfield! {
    /// The global interrupt word, shared by the INT and INT_EN registers.
    #[derive(Copy, Clone)]
    pub struct InterruptSet(u32);

    /// At least one mailbox has a pending, interrupt-enabled event
    pub mbx, set_mbx: 0;
    /// Error-warning level reached
    pub warning, set_warning: 1;
    /// Error-passive level reached
    pub passive, set_passive: 2;
    /// Controller entered bus-off
    pub bus_off, set_bus_off: 3;
}

impl InterruptSet {
    /// Wrap a raw INT / INT_EN register value
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw register value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` if no interrupt is flagged
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        if self.mbx() {
            write!(f, "MBX ")?;
        }
        if self.warning() {
            write!(f, "WARN ")?;
        }
        if self.passive() {
            write!(f, "PASSIVE ")?;
        }
        if self.bus_off() {
            write!(f, "BUSOFF ")?;
        }
        write!(f, "}}")
    }
}

/// Outcome of the interrupt-context triage
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Triage {
    /// The controller has nothing flagged; on a shared line, not ours
    None,
    /// Events latched and masked; the caller must schedule a
    /// [`poll`](crate::bus::Can::poll) pass
    Scheduled,
}

/// Outcome of one bounded reclamation pass
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll {
    /// The quota ran out with events still pending; the caller must
    /// reschedule the pass instead of looping
    Pending,
    /// Every pending event was drained and interrupts are unmasked again
    Complete,
}
