//! Run-time configuration of the input bus and the limit switches
//!
//! # Design
//! The settings are a `miniconf` tree, so that they can be loaded and reported with any `miniconf`
//! format by the application. Validation converts them into the checked types used during the
//! configuration phase ([BusConfig], [crate::limits::LimitEndpoint]). A validation error is fatal:
//! the bus and its samplers are not started.
use miniconf::{Leaf, Tree};
use serde::{Deserialize, Serialize};

use crate::{
    bus::Chips,
    design_parameters::MAX_LIMIT_SWITCHES,
    hardware::SamplerKind,
    limits::{Direction, LimitSource},
    Error,
};

/// The highest axis index.
pub const MAX_AXIS: u8 = 15;

#[derive(Clone, Debug, Tree)]
pub struct SerIn {
    /// Clock output driving the shift-register chain.
    pub clk_pin: Leaf<Option<u8>>,

    /// Latch output. Low loads the parallel inputs, high enables shifting.
    pub latch_pin: Leaf<Option<u8>>,

    /// Serial data input from the last register in the chain.
    pub data_pin: Leaf<Option<u8>>,

    /// Bit-bang the chain from a periodic task instead of using the serial peripheral.
    pub use_shift_in: Leaf<bool>,

    /// Number of chained 8-bit registers (1-4).
    pub num_chips: Leaf<u8>,
}

impl Default for SerIn {
    fn default() -> Self {
        Self {
            clk_pin: None.into(),
            latch_pin: None.into(),
            data_pin: None.into(),
            use_shift_in: false.into(),
            num_chips: 1.into(),
        }
    }
}

/// A validated bus configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    pub clk: u8,
    pub latch: u8,
    pub data: u8,
    pub chips: Chips,
    pub kind: SamplerKind,
}

impl SerIn {
    /// Check the bus settings.
    ///
    /// # Returns
    /// `None` if no bus pin is configured, the validated configuration otherwise.
    pub fn validate(&self) -> Result<Option<BusConfig>, Error> {
        let pins = [
            ("clk", *self.clk_pin),
            ("latch", *self.latch_pin),
            ("data", *self.data_pin),
        ];
        if pins.iter().all(|(_, pin)| pin.is_none()) {
            return Ok(None);
        }
        let mut lines = [0; 3];
        for (line, (name, pin)) in lines.iter_mut().zip(pins) {
            *line = pin.ok_or(Error::MissingPin(name))?;
        }
        let [clk, latch, data] = lines;

        Ok(Some(BusConfig {
            clk,
            latch,
            data,
            chips: Chips::new(*self.num_chips)?,
            kind: SamplerKind::from_shift_in(*self.use_shift_in),
        }))
    }
}

impl BusConfig {
    /// The number of registers needed to cover all used logical pins.
    pub fn chips_needed(used: u32) -> u8 {
        let bits = u32::BITS - used.leading_zeros();
        bits.div_ceil(8) as u8
    }

    /// Verify that every used logical pin is covered by the configured chain.
    pub fn check_pins_used(&self, used: u32) -> Result<(), Error> {
        let beyond = used & !self.chips.mask();
        if beyond != 0 {
            let pin = (u32::BITS - 1 - beyond.leading_zeros()) as u8;
            log::error!(
                "SerIn pin {} needs {} chip(s), {} configured",
                pin,
                Self::chips_needed(used),
                self.chips.count()
            );
            return Err(Error::PinBeyondChips {
                pin,
                chips: self.chips.count(),
            });
        }
        Ok(())
    }
}

/// One limit switch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSwitch {
    pub axis: u8,
    pub motor: u8,
    /// 1: positive, -1: negative, 0: both directions
    pub direction: i8,
    pub source: LimitSource,
    /// The switch reads low when engaged.
    pub active_low: bool,
    /// One switch serves both motors of the axis.
    pub shared: bool,
}

impl LimitSwitch {
    pub fn validate(&self) -> Result<(), Error> {
        if self.axis > MAX_AXIS {
            return Err(Error::Axis(self.axis));
        }
        if self.motor > 1 {
            return Err(Error::Motor(self.motor));
        }
        Direction::try_from(self.direction)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Tree)]
pub struct Limits {
    /// Stop motion and raise an alarm when a limit switch engages.
    pub hard_limits: Leaf<bool>,

    /// Limit switch slots.
    pub switches: [Leaf<Option<LimitSwitch>>; MAX_LIMIT_SWITCHES],
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            hard_limits: true.into(),
            switches: [Leaf(None); MAX_LIMIT_SWITCHES],
        }
    }
}

impl Limits {
    /// The configured switches.
    pub fn switches(&self) -> impl Iterator<Item = &LimitSwitch> {
        self.switches.iter().filter_map(|s| s.0.as_ref())
    }

    /// Bitmask of the logical bus pins the switches use.
    pub fn bus_pins(&self) -> u32 {
        self.switches()
            .filter_map(|s| match s.source {
                LimitSource::Bus(pin) => Some(1 << pin.value()),
                LimitSource::Native(_) => None,
            })
            .fold(0, |acc, bit| acc | bit)
    }
}

#[derive(Clone, Debug, Default, Tree)]
pub struct Settings {
    /// Shift-register input bus.
    pub serin: SerIn,

    /// Limit switches.
    pub limits: Limits,
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitrary_int::u5;

    fn serin(clk: Option<u8>, latch: Option<u8>, data: Option<u8>) -> SerIn {
        SerIn {
            clk_pin: clk.into(),
            latch_pin: latch.into(),
            data_pin: data.into(),
            ..Default::default()
        }
    }

    #[test]
    fn pin_triplet() {
        assert_eq!(SerIn::default().validate(), Ok(None));
        for (pins, missing) in [
            ((None, Some(1), Some(2)), "clk"),
            ((Some(0), None, Some(2)), "latch"),
            ((Some(0), Some(1), None), "data"),
            ((Some(0), None, None), "latch"),
        ] {
            let (c, l, d) = pins;
            assert_eq!(serin(c, l, d).validate(), Err(Error::MissingPin(missing)));
        }
        let config = serin(Some(26), Some(25), Some(27)).validate().unwrap().unwrap();
        assert_eq!((config.clk, config.latch, config.data), (26, 25, 27));
        assert_eq!(config.chips, Chips::ONE);
        assert_eq!(config.kind, SamplerKind::Hardware);
    }

    #[test]
    fn chip_range() {
        for (num_chips, ok) in [(0, false), (1, true), (4, true), (5, false)] {
            let mut s = serin(Some(0), Some(1), Some(2));
            *s.num_chips = num_chips;
            *s.use_shift_in = true;
            let result = s.validate();
            if ok {
                let config = result.unwrap().unwrap();
                assert_eq!(config.chips.count(), num_chips);
                assert_eq!(config.kind, SamplerKind::Polling);
            } else {
                assert_eq!(result, Err(Error::ChipCount(num_chips)));
            }
        }
    }

    #[test]
    fn pins_used() {
        for (used, needed) in [(0, 0), (0x1, 1), (0x80, 1), (0x100, 2), (0x80_0000, 3), (1 << 31, 4)] {
            assert_eq!(BusConfig::chips_needed(used), needed);
        }
        let config = BusConfig {
            clk: 0,
            latch: 1,
            data: 2,
            chips: Chips::new(2).unwrap(),
            kind: SamplerKind::Hardware,
        };
        assert_eq!(config.check_pins_used(0x8001), Ok(()));
        assert_eq!(
            config.check_pins_used(0x2_8001),
            Err(Error::PinBeyondChips { pin: 17, chips: 2 })
        );
    }

    #[test]
    fn limit_switch() {
        let ok = LimitSwitch {
            axis: 2,
            motor: 1,
            direction: -1,
            source: LimitSource::Bus(u5::new(3)),
            active_low: false,
            shared: false,
        };
        assert_eq!(ok.validate(), Ok(()));
        for (switch, err) in [
            (LimitSwitch { axis: 16, ..ok }, Error::Axis(16)),
            (LimitSwitch { motor: 2, ..ok }, Error::Motor(2)),
            (LimitSwitch { direction: 3, ..ok }, Error::Direction(3)),
        ] {
            assert_eq!(switch.validate(), Err(err));
        }
    }

    #[test]
    fn bus_pin_collection() {
        let mut limits = Limits::default();
        let switch = LimitSwitch {
            axis: 0,
            motor: 0,
            direction: 1,
            source: LimitSource::Bus(u5::new(9)),
            active_low: false,
            shared: false,
        };
        *limits.switches[0] = Some(switch);
        *limits.switches[3] = Some(LimitSwitch {
            source: LimitSource::Native(4),
            ..switch
        });
        *limits.switches[7] = Some(LimitSwitch {
            source: LimitSource::Bus(u5::new(1)),
            ..switch
        });
        assert_eq!(limits.switches().count(), 3);
        assert_eq!(limits.bus_pins(), 0x202);
    }

    #[test]
    fn json_paths() {
        let mut settings = Settings::default();
        for (path, value) in [
            ("/serin/clk_pin", &b"26"[..]),
            ("/serin/latch_pin", b"25"),
            ("/serin/use_shift_in", b"true"),
            ("/serin/num_chips", b"2"),
        ] {
            miniconf::json::set(&mut settings, path, value).unwrap();
        }
        // The data line is still missing.
        assert_eq!(
            settings.serin.validate(),
            Err(Error::MissingPin("data"))
        );

        miniconf::json::set(&mut settings, "/serin/data_pin", b"30").unwrap();
        let config = settings.serin.validate().unwrap().unwrap();
        assert_eq!((config.clk, config.latch, config.data), (26, 25, 30));
        assert_eq!(config.chips.count(), 2);
        assert_eq!(config.kind, SamplerKind::Polling);

        miniconf::json::set(
            &mut settings,
            "/limits/switches/3",
            br#"{"axis":1,"motor":0,"direction":-1,"source":{"Bus":12},"active_low":true,"shared":false}"#,
        )
        .unwrap();
        miniconf::json::set(&mut settings, "/limits/hard_limits", b"false")
            .unwrap();
        assert!(!*settings.limits.hard_limits);
        let switch = settings.limits.switches().next().unwrap();
        assert_eq!(switch.source, LimitSource::Bus(u5::new(12)));
        assert_eq!(switch.direction, -1);
        assert!(switch.active_low);
        assert_eq!(switch.validate(), Ok(()));
        assert_eq!(config.check_pins_used(settings.limits.bus_pins()), Ok(()));
    }
}
