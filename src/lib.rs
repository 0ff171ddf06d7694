//! Shift-register input bus with virtual interrupts
//!
//! # Design
//! A chain of up to four 74HC165-style parallel-in/serial-out shift registers is clocked by
//! three lines (clock, latch, data) and yields one 32-bit word per sample. Each bit of that word
//! is a logical input pin. The [bus::InputBus] reconciles successive words, detects level changes
//! on the pins that have a subscriber and dispatches one edge event per changed pin, so that a
//! subscriber behaves exactly as if it were wired to a native interrupt-capable pin.
//!
//! Two acquisition strategies feed the bus through the same entry point:
//! * [hardware::HardwareSampler] runs in interrupt context on every completed DMA frame of a
//!   continuously clocked serial peripheral (~2 kHz).
//! * [hardware::PollingSampler] bit-bangs the same three lines from a cooperative task (~100 Hz).
//!
//! The safety-critical subscriber is the [limits::LimitEndpoint]. It folds edge events into the
//! process-wide limit masks and, when hard limits are armed, latches the alarm and stops motion.
#![no_std]

pub mod alarm;
pub mod bus;
pub mod design_parameters;
pub mod hardware;
pub mod limits;
pub mod settings;
pub mod telemetry;

pub use arbitrary_int::{u1, u4, u5};
pub use bus::{Chips, EdgeHandler, InputBus};
pub use limits::{Direction, LimitEndpoint, LimitSource, LimitState};

use embedded_hal::digital;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("SerIn {0} pin must be configured")]
    MissingPin(&'static str),
    #[error("num_chips {0} out of range 1..=4")]
    ChipCount(u8),
    #[error("invalid limit direction {0}")]
    Direction(i8),
    #[error("axis {0} out of range")]
    Axis(u8),
    #[error("motor {0} out of range")]
    Motor(u8),
    #[error("logical pin {pin} not covered by {chips} chip(s)")]
    PinBeyondChips { pin: u8, chips: u8 },
    #[error("logical pin {0} needs a configured SerIn bus")]
    NoBus(u8),
    #[error("native pin {0} unavailable")]
    NativePin(u8),
    #[error("pin I/O: {0}")]
    Io(digital::ErrorKind),
}

impl<E: digital::Error> From<E> for Error {
    fn from(value: E) -> Self {
        Self::Io(value.kind())
    }
}
