//! Virtual interrupt dispatcher
//!
//! The [InputBus] holds the most recently delivered word of a shift-register chain and turns
//! level changes of individual bits into edge events for the subscribed [EdgeHandler]s.
//!
//! # Lifecycle
//! The callback table is populated during configuration through [InputBus::attach], which takes
//! `&mut self`. Once the bus is shared with the samplers (interrupt or task context), every
//! remaining operation goes through `&self` and touches only atomics.
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use arbitrary_int::u5;

use crate::design_parameters::{BITS_PER_CHIP, MAX_CHIPS, MAX_PINS};
use crate::Error;

/// Receiver of edge events for one pin.
///
/// # Note
/// `on_edge` may be called from interrupt context. It must not block or allocate.
pub trait EdgeHandler: Sync {
    /// A level change was detected.
    ///
    /// # Args
    /// * `level` - The new raw level of the pin.
    fn on_edge(&self, level: bool);
}

/// The number of chained 8-bit shift registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct Chips(u8);

impl Chips {
    pub const ONE: Self = Self(1);
    pub const MAX: Self = Self(MAX_CHIPS);

    pub fn new(count: u8) -> Result<Self, Error> {
        if (1..=MAX_CHIPS).contains(&count) {
            Ok(Self(count))
        } else {
            Err(Error::ChipCount(count))
        }
    }

    pub fn count(&self) -> u8 {
        self.0
    }

    /// The number of meaningful bits in a sample word.
    pub fn bits(&self) -> u8 {
        self.0 * BITS_PER_CHIP
    }

    /// Mask of the meaningful bits in a sample word.
    pub fn mask(&self) -> u32 {
        width_mask(self.bits())
    }

    /// The number of unused high-order bits of a 32-bit frame.
    pub fn padding(&self) -> u32 {
        (MAX_CHIPS - self.0) as u32 * BITS_PER_CHIP as u32
    }

    /// Whether the logical pin is covered by this chain.
    pub fn covers(&self, pin: u5) -> bool {
        pin.value() < self.bits()
    }
}

impl TryFrom<u8> for Chips {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        Self::new(value)
    }
}

fn width_mask(bits: u8) -> u32 {
    if bits as usize >= MAX_PINS {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

pub struct InputBus<'a> {
    chips: Chips,
    value: AtomicU32,
    interest: AtomicU32,
    highest: AtomicU8,
    used: AtomicU32,
    handlers: [Option<&'a dyn EdgeHandler>; MAX_PINS],
}

impl<'a> InputBus<'a> {
    pub const fn new(chips: Chips) -> Self {
        Self {
            chips,
            value: AtomicU32::new(0),
            interest: AtomicU32::new(0),
            highest: AtomicU8::new(0),
            used: AtomicU32::new(0),
            handlers: [None; MAX_PINS],
        }
    }

    pub fn chips(&self) -> Chips {
        self.chips
    }

    /// Subscribe a handler to edges of a logical pin.
    ///
    /// # Note
    /// Re-attaching a pin replaces the previous handler.
    pub fn attach(&mut self, pin: u5, handler: &'a dyn EdgeHandler) {
        let index = pin.value();
        self.handlers[index as usize] = Some(handler);
        self.highest.fetch_max(index + 1, Ordering::AcqRel);
        self.interest.fetch_or(1 << index, Ordering::AcqRel);
    }

    /// Stop dispatching edges of a logical pin.
    ///
    /// The table entry is kept. It is gated by the interest mask.
    pub fn detach(&self, pin: u5) {
        self.interest.fetch_and(!(1 << pin.value()), Ordering::AcqRel);
    }

    pub fn interest(&self) -> u32 {
        self.interest.load(Ordering::Acquire)
    }

    /// One past the highest logical pin that was ever attached.
    pub fn highest(&self) -> u8 {
        self.highest.load(Ordering::Acquire)
    }

    /// Mark a logical pin as wired.
    pub fn set_pin_used(&self, pin: u5) {
        self.used.fetch_or(1 << pin.value(), Ordering::AcqRel);
    }

    pub fn pins_used(&self) -> u32 {
        self.used.load(Ordering::Acquire)
    }

    /// The last delivered sample word.
    pub fn current_value(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_high(&self, pin: u5) -> bool {
        self.current_value() & (1 << pin.value()) != 0
    }

    fn scan_mask(&self) -> u32 {
        let bound = self.highest().min(self.chips.bits());
        self.interest() & width_mask(bound)
    }

    fn dispatch(&self, mut pending: u32, value: u32) {
        while pending != 0 {
            let index = pending.trailing_zeros();
            pending &= pending - 1;
            if let Some(handler) = self.handlers[index as usize] {
                handler.on_edge(value & (1 << index) != 0);
            }
        }
    }

    /// Deliver a new sample word.
    ///
    /// Every subscribed pin below the scan bound whose level differs from the previous word gets
    /// one edge event, in ascending pin order. The word is stored afterwards.
    pub fn reconcile(&self, value: u32) {
        let previous = self.value.load(Ordering::Acquire);
        self.dispatch((previous ^ value) & self.scan_mask(), value);
        self.value.store(value, Ordering::Release);
    }

    /// Dispatch the current level of every subscribed pin once.
    ///
    /// Used after the first sample so that inputs which are already asserted are seen by their
    /// handlers.
    pub fn resync(&self) {
        self.dispatch(self.scan_mask(), self.current_value());
    }
}
