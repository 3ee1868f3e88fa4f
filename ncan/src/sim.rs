//! Register-accurate simulation of the controller, platform and upper layer
//!
//! The simulated register file reproduces the semantics the driver relies
//! on: SET/CLR register pairing for the shared mailbox flags,
//! write-1-to-acknowledge event registers, the software reset bit and the
//! MBX_INT_STATUS summary. Tests inject hardware activity (a completed
//! transmission, an incoming frame, error counters) through the helpers.

use crate::bus::{BusState, UpperLayer};
use crate::message::{Frame, RTR};
use crate::reg;
use core::cell::RefCell;
use ncan_core::{Clock, Platform, RegisterWindow, ResourceUnavailable};
use std::rc::Rc;
use std::vec::Vec;

#[derive(Default)]
struct SimRegs {
    cntrl: u32,
    time_cfg: u32,
    err_state: u32,
    tx_err: u32,
    rx_err: u32,
    int: u32,
    int_en: u32,
    time_div: u32,
    timer: u32,
    mbx_en: u32,
    dir: u32,
    mbx_int_en: u32,
    tx_req: u32,
    tx_ack: u32,
    tx_abort_ack: u32,
    rx_pend: u32,
    rx_lost: u32,
    rx_remote: u32,
    owrite_dis: u32,
    time_cfg_writes: u32,
    mbx: [[u32; 8]; 32],
}

impl SimRegs {
    fn summary(&self) -> u32 {
        (self.tx_ack | self.tx_abort_ack | self.rx_pend | self.rx_lost) & self.mbx_int_en
    }

    fn raise_mbx(&mut self) {
        if self.summary() != 0 {
            self.int |= reg::int::MBX;
        }
    }
}

/// The simulated register file of one controller
#[derive(Default)]
pub(crate) struct SimBus {
    regs: RefCell<SimRegs>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn mailbox_reg(offset: u32) -> (usize, usize) {
        assert!(
            offset >= reg::mbx::BASE,
            "access to unmapped register {offset:#05X}"
        );
        let rel = offset - reg::mbx::BASE;
        (
            (rel / reg::mbx::STRIDE) as usize,
            ((rel % reg::mbx::STRIDE) / 4) as usize,
        )
    }

    /// Raw peek, same view as a driver read
    pub fn reg(&self, offset: u32) -> u32 {
        RegisterWindow::read(self, offset)
    }

    pub fn enabled(&self) -> u32 {
        self.regs.borrow().mbx_en
    }

    pub fn direction(&self) -> u32 {
        self.regs.borrow().dir
    }

    pub fn int_enabled(&self) -> u32 {
        self.regs.borrow().int_en
    }

    pub fn tx_requests(&self) -> u32 {
        self.regs.borrow().tx_req
    }

    pub fn overwrite_disabled(&self) -> u32 {
        self.regs.borrow().owrite_dis
    }

    pub fn time_cfg_writes(&self) -> u32 {
        self.regs.borrow().time_cfg_writes
    }

    /// The transmission requested in mailbox `index` goes out on the wire
    pub fn complete_tx(&self, index: usize) {
        let mut r = self.regs.borrow_mut();
        let bit = 1 << index;
        assert_ne!(
            r.tx_req & bit,
            0,
            "no transmission requested in mailbox {index}"
        );
        r.tx_req &= !bit;
        r.tx_ack |= bit;
        r.raise_mbx();
    }

    /// A frame arrives from the bus; returns `false` if no enabled receive
    /// mailbox accepts it
    ///
    /// The frame lands in the lowest matching mailbox without unread data.
    /// When every matching mailbox is pending the lowest one takes the hit:
    /// protected mailboxes drop the newcomer, unprotected ones are
    /// overwritten - the message-lost flag rises either way.
    pub fn receive(&self, frame: &Frame) -> bool {
        let mut r = self.regs.borrow_mut();
        let mut fallback = None;
        for index in 0..32 {
            let bit = 1u32 << index;
            if r.mbx_en & bit == 0 || r.dir & bit == 0 {
                continue;
            }
            let accept = r.mbx[index][4];
            if (r.mbx[index][0] ^ frame.id_word()) & !accept & !RTR != 0 {
                continue;
            }
            if r.rx_pend & bit == 0 {
                r.mbx[index][0] = frame.id_word();
                r.mbx[index][1] = frame.cntrl_word();
                r.mbx[index][2] = frame.data_h();
                r.mbx[index][3] = frame.data_l();
                r.rx_pend |= bit;
                if frame.id_word() & RTR != 0 {
                    r.rx_remote |= bit;
                }
                r.raise_mbx();
                return true;
            }
            fallback.get_or_insert(index);
        }
        let Some(index) = fallback else {
            return false;
        };
        let bit = 1u32 << index;
        r.rx_lost |= bit;
        if r.owrite_dis & bit == 0 {
            r.mbx[index][0] = frame.id_word();
            r.mbx[index][1] = frame.cntrl_word();
            r.mbx[index][2] = frame.data_h();
            r.mbx[index][3] = frame.data_l();
        }
        r.raise_mbx();
        true
    }

    /// Load the error counters and derive ERR_STATE and the error interrupts
    pub fn set_error_counters(&self, tx: u32, rx: u32, bus_off: bool) {
        let mut r = self.regs.borrow_mut();
        r.tx_err = tx;
        r.rx_err = rx;
        r.err_state = 0;
        let worst = tx.max(rx);
        if worst >= 96 {
            r.err_state |= reg::err_state::WARNING;
            r.int |= reg::int::WARNING;
        }
        if worst >= 128 {
            r.err_state |= reg::err_state::PASSIVE;
            r.int |= reg::int::PASSIVE;
        }
        if bus_off {
            r.err_state |= reg::err_state::BUS_OFF;
            r.int |= reg::int::BUS_OFF;
        }
    }
}

// Safety: test double; the RefCell makes each access a single, complete
// register operation like the hardware's.
unsafe impl RegisterWindow for SimBus {
    fn read(&self, offset: u32) -> u32 {
        let r = self.regs.borrow();
        match offset {
            reg::CAN_ID => 0x4E43_414E,
            reg::CNTRL => r.cntrl,
            reg::TIME_CFG => r.time_cfg,
            reg::ERR_STATE => r.err_state,
            reg::TX_ERR_CNT => r.tx_err,
            reg::RX_ERR_CNT => r.rx_err,
            reg::INT => r.int,
            reg::INT_EN => r.int_en,
            reg::TIME_DIV => r.time_div,
            reg::TIMER => r.timer,
            reg::MBX_EN_SET | reg::MBX_EN_CLR => r.mbx_en,
            reg::MBX_DIR_SET | reg::MBX_DIR_CLR => r.dir,
            reg::MBX_INT_EN_SET | reg::MBX_INT_EN_CLR => r.mbx_int_en,
            reg::TX_REQ_SET | reg::TX_REQ_CLR => r.tx_req,
            reg::TX_ACK => r.tx_ack,
            reg::TX_ABORT_ACK => r.tx_abort_ack,
            reg::RX_MSG_PEND => r.rx_pend,
            reg::RX_MSG_LOST => r.rx_lost,
            reg::RX_REMOTE => r.rx_remote,
            reg::OWRITE_DIS_SET | reg::OWRITE_DIS_CLR => r.owrite_dis,
            reg::MBX_INT_STATUS => r.summary(),
            _ => {
                let (index, word) = Self::mailbox_reg(offset);
                r.mbx[index][word]
            }
        }
    }

    fn write(&self, offset: u32, value: u32) {
        let mut r = self.regs.borrow_mut();
        match offset {
            reg::CNTRL => {
                if value & reg::cntrl::SW_RESET != 0 {
                    *r = SimRegs {
                        time_cfg_writes: r.time_cfg_writes,
                        ..SimRegs::default()
                    };
                } else {
                    r.cntrl = value;
                }
            }
            reg::TIME_CFG => {
                r.time_cfg = value;
                r.time_cfg_writes += 1;
            }
            reg::INT => r.int &= !value,
            reg::INT_EN => r.int_en = value,
            reg::TIME_DIV => r.time_div = value,
            reg::MBX_EN_SET => r.mbx_en |= value,
            reg::MBX_EN_CLR => r.mbx_en &= !value,
            reg::MBX_DIR_SET => r.dir |= value,
            reg::MBX_DIR_CLR => r.dir &= !value,
            reg::MBX_INT_EN_SET => r.mbx_int_en |= value,
            reg::MBX_INT_EN_CLR => r.mbx_int_en &= !value,
            reg::TX_REQ_SET => r.tx_req |= value,
            reg::TX_REQ_CLR => {
                // abort request; the simulated hardware acknowledges at once
                let aborted = r.tx_req & value;
                r.tx_req &= !value;
                r.tx_abort_ack |= aborted;
                r.raise_mbx();
            }
            reg::TX_ACK => r.tx_ack &= !value,
            reg::TX_ABORT_ACK => r.tx_abort_ack &= !value,
            reg::RX_MSG_PEND => r.rx_pend &= !value,
            reg::RX_MSG_LOST => r.rx_lost &= !value,
            reg::RX_REMOTE => r.rx_remote &= !value,
            reg::OWRITE_DIS_SET => r.owrite_dis |= value,
            reg::OWRITE_DIS_CLR => r.owrite_dis &= !value,
            _ => {
                let (index, word) = Self::mailbox_reg(offset);
                r.mbx[index][word] = value;
            }
        }
    }
}

/// Window handed out by [`SimPlatform::map`]; shares the register file with
/// the test so events can be injected while the driver owns the window
pub(crate) struct SharedBus(pub Rc<SimBus>);

// Safety: delegates to the simulated register file.
unsafe impl RegisterWindow for SharedBus {
    fn read(&self, offset: u32) -> u32 {
        self.0.read(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        self.0.write(offset, value)
    }
}

pub(crate) struct SimClock;

impl Clock for SimClock {
    fn frequency(&self) -> fugit::HertzU32 {
        use fugit::RateExtU32 as _;
        8.MHz()
    }
}

/// Platform double counting every acquisition and release
#[derive(Default)]
pub(crate) struct SimPlatform {
    pub bus: Rc<SimBus>,
    pub regions_held: i32,
    pub maps_held: i32,
    pub clocks_held: i32,
    pub irqs_held: i32,
    pub regions_acquired: u32,
    pub clocks_acquired: u32,
    pub fail_map: bool,
    pub fail_clock: bool,
    pub fail_irq: bool,
}

// Safety: test double; the shared window satisfies the access contract.
unsafe impl Platform for SimPlatform {
    type Region = (usize, usize);
    type Window = SharedBus;
    type Clock = SimClock;

    fn request_region(
        &mut self,
        base_address: usize,
        size: usize,
    ) -> Result<Self::Region, ResourceUnavailable> {
        self.regions_held += 1;
        self.regions_acquired += 1;
        Ok((base_address, size))
    }

    fn release_region(&mut self, _region: Self::Region) {
        self.regions_held -= 1;
    }

    fn map(&mut self, _region: &Self::Region) -> Result<Self::Window, ResourceUnavailable> {
        if self.fail_map {
            return Err(ResourceUnavailable);
        }
        self.maps_held += 1;
        Ok(SharedBus(self.bus.clone()))
    }

    fn unmap(&mut self, _window: Self::Window) {
        self.maps_held -= 1;
    }

    fn clock(&mut self) -> Result<Self::Clock, ResourceUnavailable> {
        if self.fail_clock {
            return Err(ResourceUnavailable);
        }
        self.clocks_held += 1;
        self.clocks_acquired += 1;
        Ok(SimClock)
    }

    fn clock_put(&mut self, _clock: Self::Clock) {
        self.clocks_held -= 1;
    }

    fn request_irq(&mut self, _line: u32) -> Result<(), ResourceUnavailable> {
        if self.fail_irq {
            return Err(ResourceUnavailable);
        }
        self.irqs_held += 1;
        Ok(())
    }

    fn free_irq(&mut self, _line: u32) {
        self.irqs_held -= 1;
    }
}

impl SimPlatform {
    /// `true` when every acquired resource has been released exactly once
    pub fn balanced(&self) -> bool {
        self.regions_held == 0 && self.maps_held == 0 && self.clocks_held == 0 && self.irqs_held == 0
    }
}

/// Recording upper layer
#[derive(Default)]
pub(crate) struct SimUpper {
    pub registered: bool,
    pub fail_register: bool,
    pub delivered: Vec<Frame>,
    pub wakes: usize,
    pub states: Vec<BusState>,
}

impl UpperLayer for SimUpper {
    fn register(&mut self) -> Result<(), ResourceUnavailable> {
        if self.fail_register {
            return Err(ResourceUnavailable);
        }
        self.registered = true;
        Ok(())
    }

    fn unregister(&mut self) {
        self.registered = false;
    }

    fn deliver(&mut self, frame: Frame) {
        self.delivered.push(frame);
    }

    fn wake_senders(&mut self) {
        self.wakes += 1;
    }

    fn state_change(&mut self, state: BusState) {
        self.states.push(state);
    }
}
