//! Limit switch endpoints and the aggregate limit masks
//!
//! Every mask bit encodes one (axis, motor) pair at position `axis + 16 * motor`, so that the
//! lower half-word holds motor 0 and the upper half-word motor 1 of each axis.
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use arbitrary_int::{u1, u4, u5};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::{AlarmFlag, EmergencyStop, ExecAlarm, SystemState},
    bus::{EdgeHandler, InputBus},
    design_parameters::MOTOR_STRIDE,
    hardware::{Attr, NativeInputs, Trigger},
    settings::LimitSwitch,
    Error,
};

/// Axis names in index order.
const AXES: &[u8] = b"XYZABCUVW";

/// Which masks a switch reports into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[num_enum(error_type(name = Error, constructor = Error::Direction))]
#[repr(i8)]
pub enum Direction {
    Negative = -1,
    Both = 0,
    Positive = 1,
}

impl Direction {
    fn positive(&self) -> bool {
        matches!(self, Self::Positive | Self::Both)
    }

    fn negative(&self) -> bool {
        matches!(self, Self::Negative | Self::Both)
    }

    pub fn legend(&self) -> &'static str {
        match self {
            Self::Positive => "Pos Limit",
            Self::Negative => "Neg Limit",
            Self::Both => "All Limit",
        }
    }
}

/// Where a limit switch is wired.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitSource {
    /// An interrupt-capable MCU pin.
    Native(u8),
    /// A logical pin of the shift-register bus.
    Bus(u5),
}

/// Aggregate limit masks.
#[derive(Debug, Default)]
pub struct LimitMasks {
    pos: AtomicU32,
    neg: AtomicU32,
    configured: AtomicU32,
}

impl LimitMasks {
    pub const fn new() -> Self {
        Self {
            pos: AtomicU32::new(0),
            neg: AtomicU32::new(0),
            configured: AtomicU32::new(0),
        }
    }

    /// Pairs with an active switch in positive direction.
    pub fn pos(&self) -> u32 {
        self.pos.load(Ordering::Acquire)
    }

    /// Pairs with an active switch in negative direction.
    pub fn neg(&self) -> u32 {
        self.neg.load(Ordering::Acquire)
    }

    /// Pairs with a configured switch.
    pub fn configured(&self) -> u32 {
        self.configured.load(Ordering::Acquire)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LimitSnapshot {
    pub pos: u32,
    pub neg: u32,
    pub configured: u32,
}

/// State shared between the limit endpoints and motion safety.
#[derive(Debug, Default)]
pub struct LimitState {
    pub masks: LimitMasks,
    pub alarm: AlarmFlag,
    pub state: SystemState,
    hard_limits: AtomicBool,
}

impl LimitState {
    pub const fn new() -> Self {
        Self {
            masks: LimitMasks::new(),
            alarm: AlarmFlag::new(),
            state: SystemState::new(),
            hard_limits: AtomicBool::new(false),
        }
    }

    /// Arm or disarm hard-limit protection.
    pub fn set_hard_limits(&self, enable: bool) {
        self.hard_limits.store(enable, Ordering::Release);
    }

    pub fn hard_limits(&self) -> bool {
        self.hard_limits.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> LimitSnapshot {
        LimitSnapshot {
            pos: self.masks.pos(),
            neg: self.masks.neg(),
            configured: self.masks.configured(),
        }
    }
}

/// One physical limit switch.
pub struct LimitEndpoint<'a> {
    axis: u4,
    motor: u1,
    raw_direction: i8,
    direction: Option<Direction>,
    bitmask: u32,
    source: LimitSource,
    active_low: bool,
    active: AtomicBool,
    state: &'a LimitState,
    estop: &'a dyn EmergencyStop,
}

impl<'a> LimitEndpoint<'a> {
    /// Create an endpoint.
    ///
    /// # Args
    /// * `direction` - 1: positive, -1: negative, 0: both. Any other value leaves the endpoint
    ///   inert: it touches no mask and never escalates.
    pub fn new(
        axis: u4,
        motor: u1,
        direction: i8,
        source: LimitSource,
        active_low: bool,
        state: &'a LimitState,
        estop: &'a dyn EmergencyStop,
    ) -> Self {
        let parsed = Direction::try_from(direction).ok();
        if parsed.is_none() {
            log::error!("Axis {} motor {}: invalid limit direction {}", axis, motor, direction);
        }
        Self {
            axis,
            motor,
            raw_direction: direction,
            direction: parsed,
            bitmask: 1 << (axis.value() as u32 + MOTOR_STRIDE * motor.value() as u32),
            source,
            active_low,
            active: AtomicBool::new(false),
            state,
            estop,
        }
    }

    pub fn from_settings(
        switch: &LimitSwitch,
        state: &'a LimitState,
        estop: &'a dyn EmergencyStop,
    ) -> Result<Self, Error> {
        switch.validate()?;
        let mut endpoint = Self::new(
            u4::new(switch.axis),
            u1::new(switch.motor),
            switch.direction,
            switch.source,
            switch.active_low,
            state,
            estop,
        );
        if switch.shared {
            endpoint.make_dual_axis_mask();
        }
        Ok(endpoint)
    }

    pub fn bitmask(&self) -> u32 {
        self.bitmask
    }

    pub fn source(&self) -> LimitSource {
        self.source
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// The last interpreted level.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Report this switch for both motors of its axis.
    pub fn make_dual_axis_mask(&mut self) {
        let both = (self.bitmask >> MOTOR_STRIDE) | (self.bitmask & 0xffff);
        self.bitmask = (both << MOTOR_STRIDE) | both;
    }

    fn name(&self) -> char {
        AXES.get(self.axis.value() as usize)
            .map(|&c| c as char)
            .unwrap_or('?')
    }

    /// Subscribe to the switch source and mark the pair as configured.
    ///
    /// A native pin is configured as interrupt input, with pull-up where available, and its
    /// current level is handled once. A bus pin is registered as used and attached to the bus.
    pub fn initialize<N: NativeInputs<'a>>(
        &'a self,
        native: &mut N,
        bus: Option<&mut InputBus<'a>>,
    ) -> Result<(), Error> {
        let direction = self
            .direction
            .ok_or(Error::Direction(self.raw_direction))?;

        let initial = match self.source {
            LimitSource::Native(pin) => {
                let mut attr = Attr::default().with_input(true).with_isr(true);
                if native.capabilities(pin).pull_up() {
                    attr = attr.with_pull_up(true);
                }
                native.set_attr(pin, attr)?;
                native.attach_interrupt(pin, Trigger::Change, self)?;
                Some(native.level(pin)?)
            }
            LimitSource::Bus(pin) => {
                let bus = bus.ok_or(Error::NoBus(pin.value()))?;
                if !bus.chips().covers(pin) {
                    return Err(Error::PinBeyondChips {
                        pin: pin.value(),
                        chips: bus.chips().count(),
                    });
                }
                bus.set_pin_used(pin);
                bus.attach(pin, self);
                // The bus reports initial levels on its resync.
                None
            }
        };

        self.state
            .masks
            .configured
            .fetch_or(self.bitmask, Ordering::AcqRel);

        log::info!(
            "{}{} {} on {:?}",
            self.name(),
            self.motor,
            direction.legend(),
            self.source
        );

        // A native pin only interrupts on change. An already engaged switch is handled now.
        if let Some(level) = initial {
            self.on_edge(level);
        }
        Ok(())
    }

    /// Unsubscribe from the switch source.
    pub fn teardown<N: NativeInputs<'a>>(
        &self,
        native: &mut N,
        bus: Option<&InputBus<'a>>,
    ) {
        match self.source {
            LimitSource::Native(pin) => native.detach_interrupt(pin),
            LimitSource::Bus(pin) => {
                if let Some(bus) = bus {
                    bus.detach(pin);
                }
            }
        }
    }
}

impl EdgeHandler for LimitEndpoint<'_> {
    fn on_edge(&self, level: bool) {
        let active = level ^ self.active_low;
        self.active.store(active, Ordering::Release);

        let Some(direction) = self.direction else {
            return;
        };

        let masks = &self.state.masks;
        for (mask, applies) in [
            (&masks.pos, direction.positive()),
            (&masks.neg, direction.negative()),
        ] {
            if !applies {
                continue;
            }
            if active {
                mask.fetch_or(self.bitmask, Ordering::AcqRel);
            } else {
                mask.fetch_and(!self.bitmask, Ordering::AcqRel);
            }
        }

        // Releasing a switch never escalates.
        if active
            && !self.state.state.get().suppresses_hard_limit()
            && self.state.hard_limits()
            && self.state.alarm.latch(ExecAlarm::HardLimit)
        {
            self.estop.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alarm::State, bus::Chips, hardware::Capabilities};
    use core::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Estop(AtomicUsize);

    impl EmergencyStop for Estop {
        fn stop(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    impl Estop {
        fn count(&self) -> usize {
            self.0.load(Ordering::Relaxed)
        }
    }

    /// Four native pins. Only pins 0 and 1 have pull-ups, pin 3 does not exist.
    #[derive(Default)]
    struct Pins<'a> {
        attrs: [Option<Attr>; 4],
        handlers: [Option<&'a dyn EdgeHandler>; 4],
        levels: [bool; 4],
    }

    impl<'a> Pins<'a> {
        fn fire(&self, pin: u8, level: bool) {
            if let Some(h) = self.handlers[pin as usize] {
                h.on_edge(level);
            }
        }
    }

    impl<'a> NativeInputs<'a> for Pins<'a> {
        fn capabilities(&self, pin: u8) -> Capabilities {
            Capabilities::default()
                .with_input(true)
                .with_isr(true)
                .with_pull_up(pin < 2)
        }

        fn set_attr(&mut self, pin: u8, attr: Attr) -> Result<(), Error> {
            if pin >= 3 {
                return Err(Error::NativePin(pin));
            }
            self.attrs[pin as usize] = Some(attr);
            Ok(())
        }

        fn attach_interrupt(
            &mut self,
            pin: u8,
            trigger: Trigger,
            handler: &'a dyn EdgeHandler,
        ) -> Result<(), Error> {
            assert_eq!(trigger, Trigger::Change);
            self.handlers[pin as usize] = Some(handler);
            Ok(())
        }

        fn detach_interrupt(&mut self, pin: u8) {
            self.handlers[pin as usize] = None;
        }

        fn level(&mut self, pin: u8) -> Result<bool, Error> {
            Ok(self.levels[pin as usize])
        }
    }

    fn bus_endpoint<'a>(
        axis: u8,
        motor: u8,
        direction: i8,
        pin: u8,
        state: &'a LimitState,
        estop: &'a Estop,
    ) -> LimitEndpoint<'a> {
        LimitEndpoint::new(
            u4::new(axis),
            u1::new(motor),
            direction,
            LimitSource::Bus(u5::new(pin)),
            false,
            state,
            estop,
        )
    }

    #[test]
    fn bitmask_layout() {
        let state = LimitState::new();
        let estop = Estop::default();
        for (axis, motor, mask) in [(0, 0, 0x1), (2, 0, 0x4), (0, 1, 0x1_0000), (5, 1, 0x20_0000)] {
            assert_eq!(bus_endpoint(axis, motor, 1, 0, &state, &estop).bitmask(), mask);
        }
    }

    #[test]
    fn dual_axis_folding() {
        let state = LimitState::new();
        let estop = Estop::default();
        for motor in [0, 1] {
            let mut ep = bus_endpoint(2, motor, 1, 0, &state, &estop);
            ep.make_dual_axis_mask();
            assert_eq!(ep.bitmask(), 0x4_0004);
        }

        let mut ep = bus_endpoint(2, 0, 0, 0, &state, &estop);
        ep.make_dual_axis_mask();
        ep.on_edge(true);
        assert_eq!(state.masks.pos(), 0x4_0004);
        assert_eq!(state.masks.neg(), 0x4_0004);
        ep.on_edge(false);
        assert_eq!(state.masks.pos(), 0);
        assert_eq!(state.masks.neg(), 0);
    }

    #[test]
    fn mask_symmetry() {
        let state = LimitState::new();
        let estop = Estop::default();
        for (direction, pos, neg) in [(1, 0x2, 0), (-1, 0, 0x2), (0, 0x2, 0x2)] {
            let ep = bus_endpoint(1, 0, direction, 0, &state, &estop);
            ep.on_edge(true);
            assert!(ep.is_active());
            assert_eq!((state.masks.pos(), state.masks.neg()), (pos, neg));
            ep.on_edge(false);
            assert!(!ep.is_active());
            assert_eq!((state.masks.pos(), state.masks.neg()), (0, 0));
        }
    }

    #[test]
    fn positive_only_leaves_neg() {
        let state = LimitState::new();
        let estop = Estop::default();
        state.masks.neg.store(0x8, Ordering::Relaxed);
        let ep = bus_endpoint(3, 0, 1, 0, &state, &estop);
        ep.on_edge(true);
        ep.on_edge(false);
        assert_eq!(state.masks.neg(), 0x8);
    }

    #[test]
    fn invalid_direction_is_inert() {
        let state = LimitState::new();
        state.set_hard_limits(true);
        let estop = Estop::default();
        let ep = bus_endpoint(0, 0, 2, 0, &state, &estop);
        assert_eq!(ep.direction(), None);
        ep.on_edge(true);
        assert_eq!(state.snapshot(), LimitSnapshot::default());
        assert_eq!(estop.count(), 0);
        assert!(!state.alarm.is_set());

        let mut pins = Pins::default();
        let mut bus = InputBus::new(Chips::ONE);
        assert_eq!(
            ep.initialize(&mut pins, Some(&mut bus)),
            Err(Error::Direction(2))
        );
        assert_eq!(bus.interest(), 0);
    }

    #[test]
    fn alarm_on_activation_only() {
        let state = LimitState::new();
        state.set_hard_limits(true);
        let estop = Estop::default();
        let ep = bus_endpoint(0, 0, 1, 0, &state, &estop);

        ep.on_edge(false);
        assert_eq!(estop.count(), 0);
        ep.on_edge(true);
        assert_eq!(estop.count(), 1);
        assert_eq!(state.alarm.get(), ExecAlarm::HardLimit);

        // Bouncing while latched
        for level in [false, true, false, true, false] {
            ep.on_edge(level);
        }
        assert_eq!(estop.count(), 1);

        state.alarm.clear();
        ep.on_edge(false);
        assert_eq!(estop.count(), 1);
        assert!(!state.alarm.is_set());
    }

    #[test]
    fn alarm_suppression() {
        for (hard_limits, system, latched, stops) in [
            (false, State::Idle, ExecAlarm::None, 0),
            (true, State::Idle, ExecAlarm::None, 1),
            (true, State::Cycle, ExecAlarm::None, 1),
            (true, State::Alarm, ExecAlarm::None, 0),
            (true, State::ConfigAlarm, ExecAlarm::None, 0),
            (true, State::Homing, ExecAlarm::None, 0),
            (true, State::Idle, ExecAlarm::SoftLimit, 0),
        ] {
            let state = LimitState::new();
            state.set_hard_limits(hard_limits);
            state.state.set(system);
            if latched != ExecAlarm::None {
                state.alarm.latch(latched);
            }
            let estop = Estop::default();
            let ep = bus_endpoint(0, 0, 0, 0, &state, &estop);
            ep.on_edge(true);
            ep.on_edge(true);
            assert_eq!(estop.count(), stops, "{system:?} {latched:?}");
            let expected = if stops > 0 {
                ExecAlarm::HardLimit
            } else {
                latched
            };
            assert_eq!(state.alarm.get(), expected);
            // Masks track the switch regardless.
            assert_eq!(state.masks.pos(), 1);
        }
    }

    #[test]
    fn active_low() {
        let state = LimitState::new();
        let estop = Estop::default();
        let ep = LimitEndpoint::new(
            u4::new(1),
            u1::new(0),
            -1,
            LimitSource::Bus(u5::new(0)),
            true,
            &state,
            &estop,
        );
        ep.on_edge(false);
        assert!(ep.is_active());
        assert_eq!(state.masks.neg(), 0x2);
        ep.on_edge(true);
        assert_eq!(state.masks.neg(), 0);
    }

    #[test]
    fn bus_scenario() {
        let state = LimitState::new();
        state.set_hard_limits(true);
        let estop = Estop::default();
        let mut pins = Pins::default();
        let ep = bus_endpoint(2, 0, 1, 3, &state, &estop);

        let mut bus = InputBus::new(Chips::ONE);
        ep.initialize(&mut pins, Some(&mut bus)).unwrap();
        let bus = bus;
        assert_eq!(bus.pins_used(), 0x08);
        assert_eq!(bus.interest(), 0x08);
        assert_eq!(state.masks.configured(), 0x4);

        bus.reconcile(0x00);
        assert_eq!(state.masks.pos(), 0);
        assert_eq!(estop.count(), 0);

        bus.reconcile(0x08);
        assert_eq!(state.masks.pos(), 0x4);
        assert_eq!(state.masks.neg(), 0);
        assert_eq!(estop.count(), 1);
        assert_eq!(state.alarm.get(), ExecAlarm::HardLimit);

        bus.reconcile(0x00);
        assert_eq!(state.masks.pos(), 0);
        assert_eq!(estop.count(), 1);
        assert!(!ep.is_active());

        ep.teardown(&mut pins, Some(&bus));
        assert_eq!(bus.interest(), 0);
        assert_eq!(state.masks.configured(), 0x4);
    }

    #[test]
    fn resync_raises_alarm() {
        let state = LimitState::new();
        let estop = Estop::default();
        let mut pins = Pins::default();
        let ep = bus_endpoint(0, 1, 0, 5, &state, &estop);
        let mut bus = InputBus::new(Chips::ONE);
        ep.initialize(&mut pins, Some(&mut bus)).unwrap();
        let bus = bus;

        // Asserted while still disarmed
        bus.reconcile(0x20);
        assert_eq!(state.masks.pos(), 0x1_0000);
        assert_eq!(estop.count(), 0);

        state.set_hard_limits(true);
        bus.reconcile(0x20);
        assert_eq!(estop.count(), 0);
        bus.resync();
        assert_eq!(estop.count(), 1);
        assert_eq!(state.alarm.get(), ExecAlarm::HardLimit);
    }

    #[test]
    fn native_binding() {
        let state = LimitState::new();
        state.set_hard_limits(true);
        let estop = Estop::default();
        let mut pins = Pins::default();

        let with_pull_up = LimitEndpoint::new(
            u4::new(0),
            u1::new(0),
            1,
            LimitSource::Native(1),
            false,
            &state,
            &estop,
        );
        let without = LimitEndpoint::new(
            u4::new(1),
            u1::new(0),
            -1,
            LimitSource::Native(2),
            false,
            &state,
            &estop,
        );
        let missing = LimitEndpoint::new(
            u4::new(2),
            u1::new(0),
            -1,
            LimitSource::Native(3),
            false,
            &state,
            &estop,
        );
        with_pull_up.initialize(&mut pins, None).unwrap();
        without.initialize(&mut pins, None).unwrap();
        assert_eq!(
            missing.initialize(&mut pins, None),
            Err(Error::NativePin(3))
        );

        let input = Attr::default().with_input(true).with_isr(true);
        assert_eq!(pins.attrs[1], Some(input.with_pull_up(true)));
        assert_eq!(pins.attrs[2], Some(input));
        assert_eq!(state.masks.configured(), 0x3);

        pins.fire(2, true);
        assert_eq!(state.masks.neg(), 0x2);
        assert_eq!(estop.count(), 1);

        without.teardown(&mut pins, None);
        pins.fire(2, false);
        assert_eq!(state.masks.neg(), 0x2);
    }

    #[test]
    fn bus_binding_errors() {
        let state = LimitState::new();
        let estop = Estop::default();
        let mut pins = Pins::default();
        let ep = bus_endpoint(0, 0, 1, 9, &state, &estop);
        assert_eq!(ep.initialize(&mut pins, None), Err(Error::NoBus(9)));
        let mut bus = InputBus::new(Chips::ONE);
        assert_eq!(
            ep.initialize(&mut pins, Some(&mut bus)),
            Err(Error::PinBeyondChips { pin: 9, chips: 1 })
        );
        assert_eq!(state.masks.configured(), 0);
    }

    #[test]
    fn native_engaged_at_startup() {
        let state = LimitState::new();
        state.set_hard_limits(true);
        let estop = Estop::default();
        let mut pins = Pins::default();
        pins.levels = [true, false, true, false];

        let engaged = LimitEndpoint::new(
            u4::new(0),
            u1::new(0),
            1,
            LimitSource::Native(0),
            false,
            &state,
            &estop,
        );
        // Active low and released: reads high.
        let released = LimitEndpoint::new(
            u4::new(1),
            u1::new(0),
            -1,
            LimitSource::Native(2),
            true,
            &state,
            &estop,
        );
        released.initialize(&mut pins, None).unwrap();
        assert!(!released.is_active());
        assert_eq!(estop.count(), 0);

        engaged.initialize(&mut pins, None).unwrap();
        assert!(engaged.is_active());
        assert_eq!(state.masks.pos(), 0x1);
        assert_eq!(state.masks.neg(), 0);
        assert_eq!(state.alarm.get(), ExecAlarm::HardLimit);
        assert_eq!(estop.count(), 1);
    }
}
