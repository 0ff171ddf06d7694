//! Bit-banged shift-in
//!
//! The [PollingSampler] drives the clock and latch lines of the chain directly and reads the data
//! line, one full word per [PollingSampler::poll]. It is meant to be called from a periodic task.
use embedded_hal::digital::{InputPin, OutputPin};

use crate::{bus::InputBus, telemetry::SamplerStats, Error};

use super::Acquisition;

pub struct PollingSampler<'a, CLK, LATCH, DATA> {
    clk: CLK,
    latch: LATCH,
    data: DATA,
    bus: &'a InputBus<'a>,
    stats: &'a SamplerStats,
    last: u32,
    running: bool,
}

impl<'a, CLK, LATCH, DATA> PollingSampler<'a, CLK, LATCH, DATA>
where
    CLK: OutputPin,
    LATCH: OutputPin,
    DATA: InputPin,
{
    pub fn new(
        clk: CLK,
        latch: LATCH,
        data: DATA,
        bus: &'a InputBus<'a>,
        stats: &'a SamplerStats,
    ) -> Self {
        Self {
            clk,
            latch,
            data,
            bus,
            stats,
            last: bus.current_value(),
            running: false,
        }
    }

    /// Shift in one word, MSB first.
    ///
    /// The latch is released (high) to freeze the parallel inputs and to enable shifting, and
    /// pulled low again afterwards to resume loading.
    pub fn shift_in(&mut self) -> Result<u32, Error> {
        self.latch.set_high()?;
        let mut value = 0;
        for _ in 0..self.bus.chips().bits() {
            value = (value << 1) | self.data.is_high()? as u32;
            self.clk.set_high()?;
            self.clk.set_low()?;
        }
        self.latch.set_low()?;
        Ok(value)
    }

    /// Sample the chain once and feed the bus if the word changed.
    ///
    /// # Returns
    /// The new word if it differed from the previous one.
    pub fn poll(&mut self) -> Result<Option<u32>, Error> {
        if !self.running {
            return Ok(None);
        }
        self.stats.interrupt();
        let value = self.shift_in()?;
        self.stats.sample();
        if value == self.last {
            return Ok(None);
        }
        self.last = value;
        self.stats.change();
        self.bus.reconcile(value);
        Ok(Some(value))
    }

    pub fn bus(&self) -> &'a InputBus<'a> {
        self.bus
    }
}

impl<CLK, LATCH, DATA> Acquisition for PollingSampler<'_, CLK, LATCH, DATA>
where
    CLK: OutputPin,
    LATCH: OutputPin,
    DATA: InputPin,
{
    fn start(&mut self) -> Result<(), Error> {
        self.clk.set_low()?;
        self.latch.set_low()?;
        self.running = true;
        log::info!(
            "SerIn shift-in sampler started with {} chip(s)",
            self.bus.chips().count()
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
