//! Continuous hardware acquisition
//!
//! The serial peripheral clocks the shift-register chain on its own and a DMA stream stores one
//! 32-bit word per frame. The [HardwareSampler] is the part of the frame-complete interrupt that
//! does not depend on the MCU: it aligns the word and feeds the bus.
use crate::{bus::InputBus, telemetry::SamplerStats, Error};

use super::Acquisition;

/// A peripheral capturing one 32-bit frame per sample period.
pub trait FrameCapture {
    /// Begin continuous capture.
    fn start(&mut self);

    /// Halt capture. No further frames complete afterwards.
    fn stop(&mut self);

    /// Take the word of the frame that completed since the last call, if any.
    ///
    /// # Note
    /// This is called from the transfer-complete interrupt and also acknowledges it.
    fn completed_frame(&mut self) -> Option<u32>;
}

pub struct HardwareSampler<'a, C> {
    capture: C,
    bus: &'a InputBus<'a>,
    stats: &'a SamplerStats,
    last: u32,
    running: bool,
}

impl<'a, C: FrameCapture> HardwareSampler<'a, C> {
    pub fn new(
        capture: C,
        bus: &'a InputBus<'a>,
        stats: &'a SamplerStats,
    ) -> Self {
        Self {
            capture,
            bus,
            stats,
            last: bus.current_value(),
            running: false,
        }
    }

    /// Frame-complete interrupt handler.
    ///
    /// Never blocks. Only the most recent frame is considered.
    pub fn on_interrupt(&mut self) {
        self.stats.interrupt();
        let Some(raw) = self.capture.completed_frame() else {
            return;
        };
        self.stats.sample();

        // The chain is shifted in MSB first, unused chips leave padding at the bottom.
        let value = raw >> self.bus.chips().padding();
        if value != self.last {
            self.last = value;
            self.stats.change();
            self.bus.reconcile(value);
        }
    }

    pub fn capture(&mut self) -> &mut C {
        &mut self.capture
    }

    pub fn bus(&self) -> &'a InputBus<'a> {
        self.bus
    }
}

impl<C: FrameCapture> Acquisition for HardwareSampler<'_, C> {
    fn start(&mut self) -> Result<(), Error> {
        self.capture.start();
        self.running = true;
        log::info!(
            "SerIn hardware sampler started with {} chip(s)",
            self.bus.chips().count()
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.capture.stop();
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
