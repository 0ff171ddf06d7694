//! Native limit switch inputs on PD10..PD13 (EXTI15_10)
use serin::{
    hardware::{Attr, Capabilities, NativeInputs, Trigger},
    EdgeHandler, Error,
};

use super::hal;
use hal::gpio::{gpiod, Edge, ExtiPin, Input, Pull};

/// Logical identifier of PD10.
const FIRST_PIN: u8 = 3 * 16 + 10;

pub struct LimitInputs {
    exti: hal::stm32::EXTI,
    syscfg: hal::stm32::SYSCFG,
    pins: (
        gpiod::PD10<Input>,
        gpiod::PD11<Input>,
        gpiod::PD12<Input>,
        gpiod::PD13<Input>,
    ),
    handlers: [Option<&'static dyn EdgeHandler>; 4],
}

// Run `$body` with `$pin` bound to the pin at `$index`.
macro_rules! with_pin {
    ($self:ident, $index:expr, $pin:ident => $body:expr) => {
        match $index {
            0 => {
                let $pin = &mut $self.pins.0;
                $body
            }
            1 => {
                let $pin = &mut $self.pins.1;
                $body
            }
            2 => {
                let $pin = &mut $self.pins.2;
                $body
            }
            _ => {
                let $pin = &mut $self.pins.3;
                $body
            }
        }
    };
}

impl LimitInputs {
    pub fn new(
        exti: hal::stm32::EXTI,
        syscfg: hal::stm32::SYSCFG,
        pins: (
            gpiod::PD10<Input>,
            gpiod::PD11<Input>,
            gpiod::PD12<Input>,
            gpiod::PD13<Input>,
        ),
    ) -> Self {
        Self {
            exti,
            syscfg,
            pins,
            handlers: [None; 4],
        }
    }

    fn index(pin: u8) -> Result<usize, Error> {
        match pin.checked_sub(FIRST_PIN) {
            Some(index @ 0..=3) => Ok(index as usize),
            _ => Err(Error::NativePin(pin)),
        }
    }

    /// EXTI15_10 handler.
    ///
    /// Every pending pin is acknowledged and its handler gets the current level.
    pub fn on_interrupt(&mut self) {
        for index in 0..self.handlers.len() {
            let handler = self.handlers[index];
            with_pin!(self, index, pin => {
                if pin.check_interrupt() {
                    pin.clear_interrupt_pending_bit();
                    if let Some(handler) = handler {
                        handler.on_edge(pin.is_high());
                    }
                }
            });
        }
    }
}

impl NativeInputs<'static> for LimitInputs {
    fn capabilities(&self, pin: u8) -> Capabilities {
        match Self::index(pin) {
            Ok(_) => Capabilities::default()
                .with_input(true)
                .with_isr(true)
                .with_pull_up(true)
                .with_pull_down(true),
            Err(_) => Capabilities::default(),
        }
    }

    fn set_attr(&mut self, pin: u8, attr: Attr) -> Result<(), Error> {
        let index = Self::index(pin)?;
        if attr.output() || !self.capabilities(pin).supports(attr) {
            return Err(Error::NativePin(pin));
        }
        let pull = if attr.pull_up() {
            Pull::Up
        } else if attr.pull_down() {
            Pull::Down
        } else {
            Pull::None
        };
        with_pin!(self, index, p => p.set_internal_resistor(pull));
        Ok(())
    }

    fn attach_interrupt(
        &mut self,
        pin: u8,
        trigger: Trigger,
        handler: &'static dyn EdgeHandler,
    ) -> Result<(), Error> {
        let index = Self::index(pin)?;
        let edge = match trigger {
            Trigger::Rising => Edge::Rising,
            Trigger::Falling => Edge::Falling,
            Trigger::Change => Edge::RisingFalling,
        };
        self.handlers[index] = Some(handler);
        let (exti, syscfg) = (&mut self.exti, &mut self.syscfg);
        let pins = &mut self.pins;
        macro_rules! attach {
            ($p:expr) => {{
                $p.make_interrupt_source(syscfg);
                $p.trigger_on_edge(exti, edge);
                $p.enable_interrupt(exti);
            }};
        }
        match index {
            0 => attach!(pins.0),
            1 => attach!(pins.1),
            2 => attach!(pins.2),
            _ => attach!(pins.3),
        }
        Ok(())
    }

    fn detach_interrupt(&mut self, pin: u8) {
        let Ok(index) = Self::index(pin) else {
            return;
        };
        self.handlers[index] = None;
        let exti = &mut self.exti;
        let pins = &mut self.pins;
        match index {
            0 => pins.0.disable_interrupt(exti),
            1 => pins.1.disable_interrupt(exti),
            2 => pins.2.disable_interrupt(exti),
            _ => pins.3.disable_interrupt(exti),
        }
    }

    fn level(&mut self, pin: u8) -> Result<bool, Error> {
        let index = Self::index(pin)?;
        Ok(with_pin!(self, index, p => p.is_high()))
    }
}
