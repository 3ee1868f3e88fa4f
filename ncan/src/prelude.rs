//! Anonymous re-exports of the traits needed to operate the driver

pub use crate::core::Clock as _;
pub use crate::reg::Access as _;
pub use embedded_can::Frame as _;
