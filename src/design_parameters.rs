use fugit::{HertzU32, MillisDurationU32};

/// The number of logical pins addressable on the bus. The word is stored in a `u32`, so at most
/// four 8-bit shift registers can be chained.
pub const MAX_PINS: usize = 32;

/// The maximum number of chained shift registers.
pub const MAX_CHIPS: u8 = 4;

/// The number of inputs of a single shift register.
pub const BITS_PER_CHIP: u8 = 8;

/// Bit offset of motor 1 within the aggregate limit masks. Motor 0 occupies the low half-word.
pub const MOTOR_STRIDE: u32 = 16;

/// The rate at which the serial peripheral captures frames when sampling in hardware.
pub const HARDWARE_SAMPLE_RATE: HertzU32 = HertzU32::from_raw(2_000);

/// The period of the shift-in polling task.
pub const POLL_PERIOD: MillisDurationU32 = MillisDurationU32::from_ticks(10);

/// The period of the diagnostic monitor task.
pub const MONITOR_PERIOD: MillisDurationU32 = MillisDurationU32::from_ticks(1_000);

/// The number of limit switch slots in the settings tree: two directions for each motor of each
/// axis.
pub const MAX_LIMIT_SWITCHES: usize = 24;
