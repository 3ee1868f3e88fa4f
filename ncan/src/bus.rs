//! Controller lifecycle, frame transfer and the two-phase interrupt handler

use crate::config::{BitTimingError, CanConfig};
use crate::interrupt::{InterruptSet, Poll, Triage};
use crate::mailbox::{MailboxSet, Mailboxes, OutOfBounds, RxFilter};
use crate::message::Frame;
use crate::reg::{self, Access};
use fugit::HertzU32;
use ncan_core::{Clock, Descriptor, Platform, RegisterWindow, ResourceUnavailable};

/// Error state of the CAN node, derived from the hardware error counters
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusState {
    /// Both error counters below the warning level
    Active,
    /// An error counter reached 96
    Warning,
    /// An error counter reached 128; the node no longer signals errors
    /// actively
    Passive,
    /// The node dropped off the bus; only [`Can::reset`] followed by a fresh
    /// [`Can::open`] recovers from this
    BusOff,
}

/// Lifecycle state of the controller
///
/// `probe` constructs the driver in `Reset`. `open` walks
/// `Reset → Configuring → Enabled → Running` or takes the `Stopped → Running`
/// shortcut, `close` drops back to `Stopped`. There is no variant for the
/// removed state; `remove` consumes the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Held in software reset, nothing configured
    Reset,
    /// Bit timing being programmed
    Configuring,
    /// CAN core and transceiver enabled, mailboxes being set up
    Enabled,
    /// On the bus, transferring frames
    Running,
    /// Off the bus with interrupts masked; configuration is retained
    Stopped,
}

/// Frame and loss counters, maintained by [`Can::poll`]
#[derive(Debug, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanStats {
    /// Frames transmitted and acknowledged
    pub tx_frames: u32,
    /// Frames received and delivered upward
    pub rx_frames: u32,
    /// Frames lost to mailbox overwrite before they could be drained
    pub rx_lost: u32,
}

/// Snapshot of the hardware error counters
#[derive(Debug, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// Transmit error counter
    pub tx: u8,
    /// Receive error counter
    pub rx: u8,
}

/// Errors that may occur while opening the device
#[derive(Debug)]
pub enum ConfigurationError {
    /// The bit timing does not fit the TIME_CFG register
    BitTiming(BitTimingError),
    /// A mailbox index fell outside the bank
    Mailbox(OutOfBounds),
    /// The operation is not valid in the current lifecycle state
    WrongState,
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

impl From<OutOfBounds> for ConfigurationError {
    fn from(value: OutOfBounds) -> Self {
        Self::Mailbox(value)
    }
}

/// Frame transfer attempted while the device is not running
#[derive(Debug)]
pub struct NotRunning;

/// The layer above the driver: a network stack, an application queue
///
/// `register` is called at the end of a successful probe, `unregister` during
/// remove. The remaining callbacks run from [`Can::poll`], never from
/// interrupt context.
pub trait UpperLayer {
    /// Announce the device; from here on calls into the driver may arrive
    fn register(&mut self) -> Result<(), ResourceUnavailable>;
    /// Withdraw the device; no calls into the driver arrive afterwards
    fn unregister(&mut self);
    /// Hand a received frame upward
    fn deliver(&mut self, frame: Frame);
    /// A transmit mailbox was freed; senders blocked on
    /// [`WouldBlock`](nb::Error::WouldBlock) may retry
    fn wake_senders(&mut self);
    /// The bus error state changed
    fn state_change(&mut self, state: BusState);
}

/// A mailbox event found during a reclamation pass, one budget unit each
#[derive(Copy, Clone)]
enum Event {
    TxDone(usize),
    TxAborted(usize),
    RxLost(usize),
    RxPending(usize),
}

const ENABLED_INTERRUPTS: u32 =
    reg::int::MBX | reg::int::WARNING | reg::int::PASSIVE | reg::int::BUS_OFF;

/// One NCAN controller instance
///
/// Owns the platform resources acquired during [`probe`](Can::probe) and
/// releases all of them, exactly once each, in [`remove`](Can::remove) or
/// when the probe fails partway.
pub struct Can<P: Platform> {
    window: P::Window,
    clock: P::Clock,
    region: P::Region,
    irq_line: u32,
    config: CanConfig,
    state: State,
    bus_state: BusState,
    stats: CanStats,
    mailboxes: Mailboxes,
}

impl<P: Platform> Can<P> {
    /// Bind the driver to the controller described by `descriptor`
    ///
    /// Acquires the memory region, the register mapping, the clock and the
    /// interrupt line in that order, resets the controller and registers it
    /// with the upper layer. Any failure releases whatever was already
    /// acquired, in reverse order, and leaves the platform as it was.
    pub fn probe(
        platform: &mut P,
        upper: &mut impl UpperLayer,
        descriptor: &Descriptor,
        config: CanConfig,
    ) -> Result<Self, ResourceUnavailable> {
        let region = platform.request_region(descriptor.base_address, descriptor.size)?;
        let window = match platform.map(&region) {
            Ok(window) => window,
            Err(e) => {
                platform.release_region(region);
                return Err(e);
            }
        };
        let clock = match platform.clock() {
            Ok(clock) => clock,
            Err(e) => {
                platform.unmap(window);
                platform.release_region(region);
                return Err(e);
            }
        };
        if let Err(e) = platform.request_irq(descriptor.irq_line) {
            platform.clock_put(clock);
            platform.unmap(window);
            platform.release_region(region);
            return Err(e);
        }
        let mut can = Self {
            window,
            clock,
            region,
            irq_line: descriptor.irq_line,
            config,
            state: State::Reset,
            bus_state: BusState::Active,
            stats: CanStats::default(),
            mailboxes: Mailboxes::new(Mailboxes::count_for_window(descriptor.size)),
        };
        can.software_reset();
        if let Err(e) = upper.register() {
            let Self {
                window,
                clock,
                region,
                ..
            } = can;
            platform.free_irq(descriptor.irq_line);
            platform.clock_put(clock);
            platform.unmap(window);
            platform.release_region(region);
            return Err(e);
        }
        Ok(can)
    }

    /// Unbind the driver and release every resource acquired during probe
    ///
    /// A running device is stopped first, then unregistered so that no new
    /// transfer attempts arrive while the resources go away underneath.
    pub fn remove(mut self, platform: &mut P, upper: &mut impl UpperLayer) {
        if self.state == State::Running {
            self.stop();
        }
        upper.unregister();
        let Self {
            window,
            clock,
            region,
            irq_line,
            ..
        } = self;
        platform.free_irq(irq_line);
        platform.clock_put(clock);
        platform.unmap(window);
        platform.release_region(region);
    }

    /// Bring the device onto the bus
    ///
    /// From `Reset` this programs the bit timing, enables the CAN core and
    /// the transceiver, configures the mailbox bank and unmasks interrupts.
    /// From `Stopped` the retained configuration is reused and only the
    /// mailboxes and interrupts come back.
    pub fn open(&mut self) -> Result<(), ConfigurationError> {
        match self.state {
            State::Reset => {
                // Composed before leaving Reset; a rejected timing leaves
                // the device where it was, ready for a corrected retry.
                let timing = self.config.timing.compose()?;
                self.state = State::Configuring;
                // Single write; the hardware must never sample a
                // half-updated timing.
                self.window.write_flush(reg::TIME_CFG, timing);
                self.window.write(reg::TIME_DIV, self.config.timer_divider);
                self.enable_controller();
                self.state = State::Enabled;
                self.configure_mailboxes()?;
                self.start();
                Ok(())
            }
            State::Stopped => {
                self.start();
                Ok(())
            }
            _ => Err(ConfigurationError::WrongState),
        }
    }

    /// Take the device off the bus, keeping its configuration
    pub fn close(&mut self) -> Result<(), ConfigurationError> {
        if self.state != State::Running {
            return Err(ConfigurationError::WrongState);
        }
        self.stop();
        Ok(())
    }

    /// Put the controller back into software reset
    ///
    /// All configuration and mailbox state is discarded; a subsequent
    /// [`open`](Can::open) performs the full configuration pass again. This
    /// is the only way back onto the bus after [`BusState::BusOff`].
    pub fn reset(&mut self) {
        self.software_reset();
    }

    /// Load `frame` into a free transmit mailbox and request transmission
    ///
    /// Returns the mailbox index the frame was loaded into. Fails with
    /// [`WouldBlock`](nb::Error::WouldBlock) when all transmit mailboxes are
    /// occupied; [`UpperLayer::wake_senders`] signals when to retry.
    pub fn transmit(&mut self, frame: &Frame) -> nb::Result<usize, NotRunning> {
        if self.state != State::Running {
            return Err(nb::Error::Other(NotRunning));
        }
        match self.mailboxes.load(&self.window, frame) {
            Ok(index) => Ok(index),
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(infallible)) => match infallible {},
        }
    }

    /// Request abort of the transmission in flight in mailbox `index`
    ///
    /// The mailbox is reclaimed once the hardware acknowledges the abort,
    /// during a later [`poll`](Can::poll) pass.
    pub fn abort(&mut self, index: usize) -> Result<(), OutOfBounds> {
        self.mailboxes.abort(&self.window, index)
    }

    /// Replace the acceptance filter of receive mailbox `index`
    pub fn set_rx_filter(&mut self, index: usize, filter: &RxFilter) -> Result<(), OutOfBounds> {
        self.mailboxes
            .configure_rx(&self.window, index, filter, self.config.overwrite_protection)
    }

    /// Interrupt-context triage, phase one of the handler
    ///
    /// Reads and acknowledges the global interrupt word and masks the
    /// controller's interrupt sources. No mailbox is touched here; on
    /// [`Triage::Scheduled`] the caller must arrange for
    /// [`poll`](Can::poll) to run outside interrupt context.
    pub fn interrupt(&mut self) -> Triage {
        let flagged = InterruptSet::from_bits(self.window.read(reg::INT));
        if flagged.is_empty() {
            return Triage::None;
        }
        self.window.write(reg::INT, flagged.bits());
        self.window.write_flush(reg::INT_EN, 0);
        Triage::Scheduled
    }

    /// Bounded reclamation pass, phase two of the handler
    ///
    /// Drains up to `quota` mailbox events in priority order: transmission
    /// acknowledges, abort acknowledges, lost messages, then pending receive
    /// mailboxes. Refreshes the bus error state afterwards. Returns
    /// [`Poll::Pending`] with interrupts still masked when the quota ran out
    /// before the events did; the caller reschedules the pass instead of
    /// looping here.
    pub fn poll(&mut self, upper: &mut impl UpperLayer, quota: usize) -> Poll {
        let mut budget = quota;
        while budget > 0 {
            let Some(event) = self.next_event() else {
                break;
            };
            self.handle(event, upper);
            budget -= 1;
        }
        self.refresh_bus_state(upper);
        if self.next_event().is_some() {
            Poll::Pending
        } else {
            if self.state == State::Running {
                self.window.write_flush(reg::INT_EN, ENABLED_INTERRUPTS);
            }
            Poll::Complete
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.state
    }

    /// Bus error state as of the last [`poll`](Can::poll) pass
    pub fn bus_state(&self) -> BusState {
        self.bus_state
    }

    /// Frame and loss counters
    pub fn stats(&self) -> CanStats {
        self.stats
    }

    /// Hardware error counters, read directly from the controller
    pub fn error_counters(&self) -> ErrorCounters {
        ErrorCounters {
            tx: self.window.read(reg::TX_ERR_CNT) as u8,
            rx: self.window.read(reg::RX_ERR_CNT) as u8,
        }
    }

    /// Number of mailboxes covered by the mapped register window
    pub fn mailbox_count(&self) -> usize {
        self.mailboxes.count()
    }

    /// Value of the hardware identity register
    pub fn hardware_id(&self) -> u32 {
        self.window.read(reg::CAN_ID)
    }

    /// Current value of the free-running timer
    pub fn timestamp(&self) -> u32 {
        self.window.read(reg::TIMER)
    }

    /// Frequency the controller core is clocked at
    ///
    /// Feed this into [`BitTiming::from_bitrate`](crate::config::BitTiming)
    /// to derive a timing before opening the device.
    pub fn can_clock(&self) -> HertzU32 {
        self.clock.frequency()
    }

    /// Mutable access to the configuration
    ///
    /// Changes take effect on the next pass through configuration, so only a
    /// device in `Reset` picks them up.
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.config
    }

    fn software_reset(&mut self) {
        self.window.write_flush(reg::INT_EN, 0);
        self.window.write_flush(reg::CNTRL, reg::cntrl::SW_RESET);
        self.mailboxes.clear_tracking();
        self.bus_state = BusState::Active;
        self.state = State::Reset;
    }

    fn enable_controller(&mut self) {
        // CAN core and transceiver enable must assert in the same write
        let mut word = reg::cntrl::CAN_EN | reg::cntrl::XCVR_EN;
        if self.config.listen_only {
            word |= reg::cntrl::LISTEN_ONLY;
        }
        if self.config.self_test {
            word |= reg::cntrl::SELF_TEST;
        }
        self.window.write_flush(reg::CNTRL, word);
    }

    fn configure_mailboxes(&mut self) -> Result<(), OutOfBounds> {
        let count = self.mailboxes.count();
        let rx = usize::from(self.config.rx_mailboxes).min(count);
        for index in 0..rx {
            self.mailboxes.configure_rx(
                &self.window,
                index,
                &RxFilter::accept_all(),
                self.config.overwrite_protection,
            )?;
        }
        for index in rx..count {
            self.mailboxes.configure_tx(&self.window, index)?;
        }
        Ok(())
    }

    fn start(&mut self) {
        let count = self.mailboxes.count();
        let rx = usize::from(self.config.rx_mailboxes).min(count);
        self.window
            .write(reg::MBX_INT_EN_SET, MailboxSet::first(count).0);
        self.window.write(reg::MBX_EN_SET, MailboxSet::first(rx).0);
        self.window.write_flush(reg::INT_EN, ENABLED_INTERRUPTS);
        self.state = State::Running;
    }

    fn stop(&mut self) {
        // Masked first so no event races the teardown
        self.window.write_flush(reg::INT_EN, 0);
        // Abort whatever is still in flight; the abort acknowledges stay
        // latched and are reclaimed by the first pass after reopening.
        let busy = self.mailboxes.busy();
        if !busy.is_empty() {
            self.window.write(reg::TX_REQ_CLR, busy.0);
        }
        self.mailboxes.disable_all(&self.window);
        self.state = State::Stopped;
    }

    fn next_event(&self) -> Option<Event> {
        if let Some(index) = MailboxSet(self.window.read(reg::TX_ACK)).lowest() {
            return Some(Event::TxDone(index));
        }
        if let Some(index) = MailboxSet(self.window.read(reg::TX_ABORT_ACK)).lowest() {
            return Some(Event::TxAborted(index));
        }
        if let Some(index) = MailboxSet(self.window.read(reg::RX_MSG_LOST)).lowest() {
            return Some(Event::RxLost(index));
        }
        if let Some(index) = MailboxSet(self.window.read(reg::RX_MSG_PEND)).lowest() {
            return Some(Event::RxPending(index));
        }
        None
    }

    fn handle(&mut self, event: Event, upper: &mut impl UpperLayer) {
        match event {
            Event::TxDone(index) => {
                self.mailboxes.reclaim_tx(&self.window, index, false);
                self.stats.tx_frames += 1;
                upper.wake_senders();
            }
            Event::TxAborted(index) => {
                self.mailboxes.reclaim_tx(&self.window, index, true);
                upper.wake_senders();
            }
            Event::RxLost(index) => {
                self.mailboxes.reclaim_lost(&self.window, index);
                self.stats.rx_lost += 1;
            }
            Event::RxPending(index) => {
                let frame = self.mailboxes.drain(&self.window, index);
                self.stats.rx_frames += 1;
                upper.deliver(frame);
            }
        }
    }

    fn refresh_bus_state(&mut self, upper: &mut impl UpperLayer) {
        let current = if self.window.test_bit(reg::ERR_STATE, reg::err_state::BUS_OFF) {
            BusState::BusOff
        } else {
            let counters = self.error_counters();
            match counters.tx.max(counters.rx) {
                128.. => BusState::Passive,
                96.. => BusState::Warning,
                _ => BusState::Active,
            }
        };
        if current != self.bus_state {
            self.bus_state = current;
            upper.state_change(current);
        }
    }
}
