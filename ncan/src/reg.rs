//! NCAN register map and raw register access
//!
//! Byte offsets from the mapped base, fixed and bit-exact. Offsets outside
//! this map are a programming error of the driver, not a runtime condition;
//! nothing here returns `Result`.

use ncan_core::RegisterWindow;

/// Hardware identity register
pub const CAN_ID: u32 = 0x000;
/// Control and status register
pub const CNTRL: u32 = 0x004;
/// Bit-timing configuration register
pub const TIME_CFG: u32 = 0x008;
/// Error state register
pub const ERR_STATE: u32 = 0x00C;
/// Transmit error counter
pub const TX_ERR_CNT: u32 = 0x010;
/// Receive error counter
pub const RX_ERR_CNT: u32 = 0x014;
/// Global interrupt status register
pub const INT: u32 = 0x018;
/// Global interrupt enable register
pub const INT_EN: u32 = 0x01C;
/// Free-running timer divider
pub const TIME_DIV: u32 = 0x020;
/// Free-running timer
pub const TIMER: u32 = 0x024;
/// Mailbox enable, set half of the pair
pub const MBX_EN_SET: u32 = 0x040;
/// Mailbox enable, clear half of the pair
pub const MBX_EN_CLR: u32 = 0x044;
/// Mailbox direction (1 = receive), set half of the pair
pub const MBX_DIR_SET: u32 = 0x048;
/// Mailbox direction, clear half of the pair
pub const MBX_DIR_CLR: u32 = 0x04C;
/// Per-mailbox interrupt enable, set half of the pair
pub const MBX_INT_EN_SET: u32 = 0x050;
/// Per-mailbox interrupt enable, clear half of the pair
pub const MBX_INT_EN_CLR: u32 = 0x054;
/// Transmission request, set half of the pair
pub const TX_REQ_SET: u32 = 0x058;
/// Transmission request, clear half (doubles as abort request)
pub const TX_REQ_CLR: u32 = 0x05C;
/// Transmission acknowledge flags, write 1 to acknowledge
pub const TX_ACK: u32 = 0x060;
/// Transmission abort acknowledge flags, write 1 to acknowledge
pub const TX_ABORT_ACK: u32 = 0x064;
/// Receive message pending flags, write 1 to acknowledge
pub const RX_MSG_PEND: u32 = 0x068;
/// Receive message lost flags, write 1 to acknowledge
pub const RX_MSG_LOST: u32 = 0x06C;
/// Remote request received flags
pub const RX_REMOTE: u32 = 0x070;
/// Receive overwrite disable, set half of the pair
pub const OWRITE_DIS_SET: u32 = 0x074;
/// Receive overwrite disable, clear half of the pair
pub const OWRITE_DIS_CLR: u32 = 0x078;
/// Summary of mailboxes with a pending, interrupt-enabled event
pub const MBX_INT_STATUS: u32 = 0x07C;

/// CNTRL register bits
pub mod cntrl {
    /// Listen-only mode
    pub const LISTEN_ONLY: u32 = 1 << 5;
    /// Self-test mode
    pub const SELF_TEST: u32 = 1 << 6;
    /// Software reset
    pub const SW_RESET: u32 = 1 << 7;
    /// CAN core enable
    pub const CAN_EN: u32 = 1 << 9;
    /// Transceiver enable
    pub const XCVR_EN: u32 = 1 << 10;
}

/// TIME_CFG register field layout
pub mod time_cfg {
    /// `phase_seg_2 - 1`, bits [2:0]
    pub const TSEG2_SHIFT: u32 = 0;
    /// `phase_seg_1 - 1`, bits [6:3]
    pub const TSEG1_SHIFT: u32 = 3;
    /// Triple sampling flag
    pub const SAM: u32 = 1 << 7;
    /// `sjw - 1`, bits [11:8]
    pub const SJW_SHIFT: u32 = 8;
    /// `prescaler - 1`, bits [23:16]
    pub const BRP_SHIFT: u32 = 16;
}

/// INT / INT_EN register bits
pub mod int {
    /// At least one mailbox has a pending, interrupt-enabled event
    pub const MBX: u32 = 1 << 0;
    /// Error-warning level reached
    pub const WARNING: u32 = 1 << 1;
    /// Error-passive level reached
    pub const PASSIVE: u32 = 1 << 2;
    /// Controller entered bus-off
    pub const BUS_OFF: u32 = 1 << 3;
}

/// ERR_STATE register bits
pub mod err_state {
    /// Error-warning level reached
    pub const WARNING: u32 = 1 << 0;
    /// Error-passive level reached
    pub const PASSIVE: u32 = 1 << 1;
    /// Controller is bus-off
    pub const BUS_OFF: u32 = 1 << 2;
}

/// Per-mailbox register block, stride 0x20 starting at 0x400
pub mod mbx {
    /// Offset of the first mailbox block
    pub const BASE: u32 = 0x400;
    /// Byte stride between consecutive mailbox blocks
    pub const STRIDE: u32 = 0x20;

    /// Identifier register of mailbox `index`
    pub fn id(index: usize) -> u32 {
        BASE + STRIDE * index as u32
    }
    /// Control register (data length code) of mailbox `index`
    pub fn cntrl(index: usize) -> u32 {
        id(index) + 0x04
    }
    /// Payload bytes 0..4 of mailbox `index`
    pub fn data_h(index: usize) -> u32 {
        id(index) + 0x08
    }
    /// Payload bytes 4..8 of mailbox `index`
    pub fn data_l(index: usize) -> u32 {
        id(index) + 0x0C
    }
    /// Acceptance mask register of mailbox `index` (1 = bit ignored)
    pub fn accept_mask(index: usize) -> u32 {
        id(index) + 0x10
    }
    /// Timeout register of mailbox `index`, in TIMER ticks
    pub fn timeout(index: usize) -> u32 {
        id(index) + 0x14
    }
}

/// Derived single-word operations over a [`RegisterWindow`]
///
/// `set_bits`/`clear_bits` are read-modify-write and therefore only valid on
/// registers with a single writing context (CNTRL, INT_EN, TIME_DIV). Flags
/// shared across mailboxes must go through their SET/CLR register pairs
/// instead; modifying those through this trait is a driver bug.
pub trait Access: RegisterWindow {
    /// Assert `mask` in the register at `offset`
    fn set_bits(&self, offset: u32, mask: u32) {
        self.write(offset, self.read(offset) | mask);
    }

    /// Deassert `mask` in the register at `offset`
    fn clear_bits(&self, offset: u32, mask: u32) {
        self.write(offset, self.read(offset) & !mask);
    }

    /// Check whether any bit of `mask` is asserted at `offset`
    fn test_bit(&self, offset: u32, mask: u32) -> bool {
        self.read(offset) & mask != 0
    }

    /// Write and flush the posted write with a read-back of the same register
    fn write_flush(&self, offset: u32, value: u32) {
        self.write(offset, value);
        let _ = self.read(offset);
    }
}

impl<W: RegisterWindow> Access for W {}

/// A mapped register window accessed through raw volatile MMIO
///
/// This is the production [`RegisterWindow`]; platform `map` implementations
/// typically wrap the virtual address of the mapped region in it.
pub struct Mmio {
    base: *mut u32,
}

impl Mmio {
    /// Wrap a mapped register file starting at `base`
    ///
    /// # Safety
    /// `base` must be the word-aligned start of a live NCAN register mapping
    /// that stays valid for the lifetime of the returned value and is not
    /// accessed from anywhere else.
    pub unsafe fn new(base: *mut u32) -> Self {
        Self { base }
    }
}

// Safety: the window maps one controller exclusively per the constructor
// contract; each access is a single volatile MMIO operation.
unsafe impl RegisterWindow for Mmio {
    fn read(&self, offset: u32) -> u32 {
        // Safety: offset stays within the mapping per the constructor contract.
        unsafe { ((self.base as *mut u8).add(offset as usize) as *const u32).read_volatile() }
    }

    fn write(&self, offset: u32, value: u32) {
        // Safety: offset stays within the mapping per the constructor contract.
        unsafe { ((self.base as *mut u8).add(offset as usize) as *mut u32).write_volatile(value) }
    }
}

// Safety: Mmio is an exclusive handle to the mapping, not a shared alias.
unsafe impl Send for Mmio {}
