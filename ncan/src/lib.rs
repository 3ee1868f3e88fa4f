#![no_std]
#![warn(missing_docs)]
//! # NCAN
//!
//! ## Overview
//! This crate provides a platform-agnostic driver for the NCAN mailbox CAN
//! controller found on several SoC families.
//!
//! It provides the following features:
//!
//! - classical CAN frame transmission and reception through the fixed bank
//!   of up to 32 hardware mailboxes
//! - per-mailbox acceptance filters with bit masks and receive timeouts
//! - transmission abort with reliable reclamation through the hardware
//!   acknowledge
//! - lock-free mutation of the shared mailbox flags via the controller's
//!   SET/CLR register pairs
//! - a two-phase interrupt handler: non-blocking triage in interrupt context
//!   and a quota-bounded reclamation pass outside of it
//! - bus error state tracking (warning, passive, bus-off) with change
//!   notifications
//! - full probe/remove lifecycle with exactly-once resource management
//!
//! The controller is embedded in an SoC and reached through a memory-mapped
//! register window, a clock line and an interrupt line. How those are
//! acquired differs per platform, so the driver leaves it to the
//! [`ncan_core`] traits which platform support code is expected to implement;
//! their safety requirements guarantee a sound register window for the
//! driver to work through.
//!
//! In order to use the driver, one has to [`probe`] a [`Can`] with the
//! platform's [`Descriptor`] for the controller instance and an
//! [`UpperLayer`] to deliver into, then [`open`] it. The interrupt service
//! routine calls [`interrupt`]; whenever that returns
//! [`Scheduled`](crate::interrupt::Triage::Scheduled), the platform must
//! arrange for [`poll`] to run outside interrupt context until it returns
//! [`Complete`](crate::interrupt::Poll::Complete).
//!
//! ## Usage example
//!
//! ```no_run
//! # struct Window;
//! # unsafe impl ncan::core::RegisterWindow for Window {
//! #     fn read(&self, _: u32) -> u32 { 0 }
//! #     fn write(&self, _: u32, _: u32) {}
//! # }
//! # use fugit::RateExtU32 as _;
//! # struct Clock;
//! # impl ncan::core::Clock for Clock {
//! #     fn frequency(&self) -> ncan::core::fugit::HertzU32 {
//! #         8.MHz()
//! #     }
//! # }
//! # struct Board;
//! # unsafe impl ncan::core::Platform for Board {
//! #     type Region = ();
//! #     type Window = Window;
//! #     type Clock = Clock;
//! #     fn request_region(
//! #         &mut self,
//! #         _: usize,
//! #         _: usize,
//! #     ) -> Result<(), ncan::core::ResourceUnavailable> {
//! #         Ok(())
//! #     }
//! #     fn release_region(&mut self, _: ()) {}
//! #     fn map(&mut self, _: &()) -> Result<Window, ncan::core::ResourceUnavailable> {
//! #         Ok(Window)
//! #     }
//! #     fn unmap(&mut self, _: Window) {}
//! #     fn clock(&mut self) -> Result<Clock, ncan::core::ResourceUnavailable> {
//! #         Ok(Clock)
//! #     }
//! #     fn clock_put(&mut self, _: Clock) {}
//! #     fn request_irq(&mut self, _: u32) -> Result<(), ncan::core::ResourceUnavailable> {
//! #         Ok(())
//! #     }
//! #     fn free_irq(&mut self, _: u32) {}
//! # }
//! # struct Stack;
//! # impl ncan::bus::UpperLayer for Stack {
//! #     fn register(&mut self) -> Result<(), ncan::core::ResourceUnavailable> {
//! #         Ok(())
//! #     }
//! #     fn unregister(&mut self) {}
//! #     fn deliver(&mut self, _: ncan::message::Frame) {}
//! #     fn wake_senders(&mut self) {}
//! #     fn state_change(&mut self, _: ncan::bus::BusState) {}
//! # }
//! # let mut platform = Board;
//! # let mut stack = Stack;
//! use ncan::bus::Can;
//! use ncan::config::{BitTiming, CanConfig};
//! use ncan::core::Descriptor;
//! use ncan::interrupt::{Poll, Triage};
//! use ncan::message::Frame;
//! use ncan::prelude::*;
//! use ncan::embedded_can::StandardId;
//!
//! let descriptor = Descriptor {
//!     base_address: 0x4001_0000,
//!     size: 0x5F4,
//!     irq_line: 19,
//! };
//! let mut config = CanConfig::new(BitTiming::default());
//! config.rx_mailboxes = 8;
//!
//! let mut can = Can::probe(&mut platform, &mut stack, &descriptor, config).unwrap();
//! can.open().unwrap();
//!
//! let frame = Frame::new(StandardId::new(0x123).unwrap(), &[1, 2, 3, 4]).unwrap();
//! // `WouldBlock` here means all transmit mailboxes are in flight; retry
//! // after the upper layer's `wake_senders` fires.
//! can.transmit(&frame).unwrap();
//!
//! // In the interrupt service routine:
//! if can.interrupt() == Triage::Scheduled {
//!     // schedule the reclamation pass
//! }
//!
//! // In the scheduled context, outside the ISR:
//! while can.poll(&mut stack, 16) == Poll::Pending {
//!     // yield to other work between passes
//! }
//!
//! // On driver teardown:
//! can.remove(&mut platform, &mut stack);
//! ```
//!
//! [`probe`]: crate::bus::Can::probe
//! [`open`]: crate::bus::Can::open
//! [`interrupt`]: crate::bus::Can::interrupt
//! [`poll`]: crate::bus::Can::poll
//! [`Can`]: crate::bus::Can
//! [`UpperLayer`]: crate::bus::UpperLayer
//! [`Descriptor`]: ncan_core::Descriptor

#[cfg(test)]
extern crate std;

pub mod bus;
pub mod config;
pub mod interrupt;
pub mod mailbox;
pub mod message;
pub mod prelude;
pub mod reg;

#[cfg(test)]
pub(crate) mod sim;

pub use embedded_can;
pub use nb;
pub use ncan_core as core;
