#![no_std]
#![warn(missing_docs)]

//! `ncan-core` provides a set of essential abstractions that serve as a thin
//! integration layer between the platform independent [`ncan`] crate and
//! platform specific support code (in documentation also referred to as
//! _target platforms_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by the platform
//! layer that knows how the controller's register window is mapped, how its
//! clock is routed and which interrupt line it is wired to.
//!
//! Integrators of this crate into any given target platform are responsible
//! for soundness of trait implementations and conforming to their respective
//! safety prerequisites.
//!
//! [`ncan`]: <https://docs.rs/crate/ncan/>

pub use fugit;

/// Platform resource descriptor for one controller instance
///
/// Produced by the platform layer (device tree, board file, bus enumeration);
/// consumed by `ncan` during probe. The driver derives the number of usable
/// mailboxes from `size`.
#[derive(Debug, Copy, Clone)]
pub struct Descriptor {
    /// Physical base address of the controller's register file
    pub base_address: usize,
    /// Size of the register file in bytes
    pub size: usize,
    /// Interrupt line the controller is wired to
    pub irq_line: u32,
}

/// A platform resource needed by the driver could not be acquired
///
/// Fatal to the probe attempt that encountered it, and to nothing else; the
/// driver unwinds every resource it already holds before returning this.
#[derive(Debug)]
pub struct ResourceUnavailable;

/// Trait representing a mapped register window of one NCAN controller
///
/// Each call performs exactly one memory-mapped I/O access. Implementations
/// must not cache: every `read` reflects current hardware state and every
/// `write` reaches the hardware before the next access to the same window.
/// Offsets are byte offsets from the mapped base.
///
/// # Safety
/// The implementor guarantees that, for the lifetime of the value, `read` and
/// `write` access the register file of exactly one NCAN controller, that the
/// mapping covers the offsets the driver uses (the fixed map plus the mailbox
/// blocks reported through [`Descriptor::size`]) and that no other code
/// accesses those registers concurrently.
pub unsafe trait RegisterWindow {
    /// Read the 32-bit register at `offset`
    fn read(&self, offset: u32) -> u32;
    /// Write the 32-bit register at `offset`
    fn write(&self, offset: u32, value: u32);
}

/// Trait representing the controller's configured clock source
///
/// The controller divides this clock down to the time quantum; the driver
/// uses the frequency to derive bit-timing prescalers from requested
/// bitrates. The clock must not be reconfigured while the driver holds it.
pub trait Clock {
    /// Frequency the controller core is clocked at
    fn frequency(&self) -> fugit::HertzU32;
}

/// Trait representing platform services used by probe and remove
///
/// The driver acquires the memory region, the mapping, the clock and the
/// interrupt line in that order during probe, and releases them in reverse
/// order during remove or on any partially failed probe. Implementations must
/// tolerate the releases arriving in exactly that reverse order.
///
/// # Safety
/// - `map` must return a window that satisfies the [`RegisterWindow`] safety
///   contract for the claimed region
/// - a region, mapping, clock or interrupt line handed out must remain valid
///   until released through the corresponding release method
/// - `request_region` must fail rather than hand out a region that overlaps
///   one already claimed
pub unsafe trait Platform {
    /// Token for an exclusively claimed memory region
    type Region;
    /// Mapped register window for a claimed region
    type Window: RegisterWindow;
    /// Acquired clock source
    type Clock: Clock;

    /// Claim the controller's register file for exclusive use
    fn request_region(
        &mut self,
        base_address: usize,
        size: usize,
    ) -> Result<Self::Region, ResourceUnavailable>;
    /// Return a claimed region
    fn release_region(&mut self, region: Self::Region);

    /// Map a claimed region into the driver's address space
    fn map(&mut self, region: &Self::Region) -> Result<Self::Window, ResourceUnavailable>;
    /// Unmap a window obtained from [`Platform::map`]
    fn unmap(&mut self, window: Self::Window);

    /// Acquire the controller's clock source
    fn clock(&mut self) -> Result<Self::Clock, ResourceUnavailable>;
    /// Return an acquired clock source
    fn clock_put(&mut self, clock: Self::Clock);

    /// Acquire the given interrupt line for the controller
    fn request_irq(&mut self, line: u32) -> Result<(), ResourceUnavailable>;
    /// Release an interrupt line acquired with [`Platform::request_irq`]
    fn free_irq(&mut self, line: u32);
}
