//! Acquisition back-ends and the native pin seam
//!
//! Everything in here is independent of a specific MCU. The firmware provides the
//! [dma_sampler::FrameCapture] peripheral driver, the `embedded_hal` pins for the
//! [shift_in::PollingSampler] and the [NativeInputs] implementation.
use bitbybit::bitfield;

use crate::{bus::EdgeHandler, Error};

pub mod dma_sampler;
pub mod shift_in;

pub use dma_sampler::{FrameCapture, HardwareSampler};
pub use shift_in::PollingSampler;

/// Requested pin configuration.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Attr {
    #[bit(0, rw)]
    pub input: bool,
    #[bit(1, rw)]
    pub output: bool,
    #[bit(2, rw)]
    pub pull_up: bool,
    #[bit(3, rw)]
    pub pull_down: bool,
    #[bit(4, rw)]
    pub isr: bool,
}

/// What a native pin can do.
#[bitfield(u8, default = 0)]
#[derive(Debug, PartialEq)]
pub struct Capabilities {
    #[bit(0, rw)]
    pub input: bool,
    #[bit(1, rw)]
    pub output: bool,
    #[bit(2, rw)]
    pub pull_up: bool,
    #[bit(3, rw)]
    pub pull_down: bool,
    #[bit(4, rw)]
    pub isr: bool,
}

impl Capabilities {
    /// Whether every attribute in `attr` is supported.
    pub fn supports(&self, attr: Attr) -> bool {
        attr.raw_value() & !self.raw_value() == 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::IntoStaticStr)]
pub enum Trigger {
    Rising,
    Falling,
    Change,
}

/// Interrupt-capable MCU pins.
///
/// The implementation reads the pin level in its interrupt handler and passes it to the
/// registered [EdgeHandler].
pub trait NativeInputs<'a> {
    fn capabilities(&self, pin: u8) -> Capabilities;

    fn set_attr(&mut self, pin: u8, attr: Attr) -> Result<(), Error>;

    fn attach_interrupt(
        &mut self,
        pin: u8,
        trigger: Trigger,
        handler: &'a dyn EdgeHandler,
    ) -> Result<(), Error>;

    fn detach_interrupt(&mut self, pin: u8);

    /// The current input level of a configured pin.
    fn level(&mut self, pin: u8) -> Result<bool, Error>;
}

/// Which acquisition back-end drives a bus.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, strum::IntoStaticStr,
)]
pub enum SamplerKind {
    /// Continuous capture by the serial peripheral with DMA.
    Hardware,
    /// Bit-banged shift-in from a periodic task.
    Polling,
}

impl SamplerKind {
    pub fn from_shift_in(use_shift_in: bool) -> Self {
        if use_shift_in {
            Self::Polling
        } else {
            Self::Hardware
        }
    }
}

/// Common lifecycle of both acquisition back-ends.
pub trait Acquisition {
    fn start(&mut self) -> Result<(), Error>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_check() {
        let caps = Capabilities::default()
            .with_input(true)
            .with_isr(true)
            .with_pull_up(true);
        let attr = Attr::default().with_input(true).with_isr(true);
        assert!(caps.supports(attr));
        assert!(caps.supports(attr.with_pull_up(true)));
        assert!(!caps.supports(attr.with_pull_down(true)));
    }

    #[test]
    fn kind_selection() {
        assert_eq!(SamplerKind::from_shift_in(true), SamplerKind::Polling);
        assert_eq!(SamplerKind::from_shift_in(false), SamplerKind::Hardware);
        let name: &'static str = SamplerKind::Hardware.into();
        assert_eq!(name, "Hardware");
    }
}
