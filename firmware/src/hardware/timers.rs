//! The sampling timer paces the serial peripheral frames.
use super::hal;

use hal::stm32::TIM2;

/// TIM2 running at [super::design_parameters::TIMER_FREQUENCY].
pub struct SamplingTimer {
    timer: hal::timer::Timer<TIM2>,
    channels: Option<Channels>,
}

impl SamplingTimer {
    pub fn new(mut timer: hal::timer::Timer<TIM2>) -> Self {
        timer.pause();

        Self {
            timer,
            // Note(unsafe): There is only one TIM2 and this takes ownership of it. The channels
            // are handed out once.
            channels: unsafe { Some(Channels::new()) },
        }
    }

    /// Get the compare channels.
    pub fn channels(&mut self) -> Option<Channels> {
        self.channels.take()
    }

    /// Manually set the period of the timer.
    pub fn set_period_ticks(&mut self, period: u32) {
        let regs = unsafe { &*TIM2::ptr() };
        regs.arr.write(|w| w.arr().bits(period));

        // Force the new period to take effect immediately.
        self.timer.apply_freq();
    }

    pub fn start(&mut self) {
        self.timer.apply_freq();
        self.timer.reset_counter();
        self.timer.resume();
    }

    pub fn pause(&mut self) {
        self.timer.pause();
    }
}

pub struct Channels {
    pub ch1: Channel1,
    pub ch2: Channel2,
}

impl Channels {
    /// # Safety
    /// This is only safe to call once.
    unsafe fn new() -> Self {
        Self {
            ch1: Channel1 {},
            ch2: Channel2 {},
        }
    }
}

macro_rules! compare_channel {
    ($name:ident, $index:literal) => {
        paste::paste! {
            /// A compare channel of TIM2.
            pub struct $name {}

            impl $name {
                /// Generate a DMA request on every compare match.
                pub fn listen_dma(&self) {
                    let regs = unsafe { &*TIM2::ptr() };
                    regs.dier.modify(|_, w| w.[< cc $index de >]().set_bit());
                }

                /// Operate the channel as an output-compare.
                ///
                /// # Args
                /// * `value` - The counter value to match.
                pub fn to_output_compare(&self, value: u32) {
                    let regs = unsafe { &*TIM2::ptr() };
                    let arr = regs.arr.read().bits();
                    assert!(value <= arr);
                    regs.ccr[$index - 1].write(|w| w.ccr().bits(value));
                    regs.ccmr1_output()
                        .modify(|_, w| unsafe { w.[< cc $index s >]().bits(0) });
                }
            }
        }
    };
}

compare_channel!(Channel1, 1);
compare_channel!(Channel2, 2);
