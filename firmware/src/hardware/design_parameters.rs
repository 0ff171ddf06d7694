use stm32h7xx_hal::time::MegaHertz;

/// The core clock.
pub const SYSCLK: MegaHertz = MegaHertz::MHz(400);

/// The counting frequency of the sampling timer.
pub const TIMER_FREQUENCY: MegaHertz = MegaHertz::MHz(100);

/// Serial clock of the shift-register chain. The 74HC165 is good for ~25 MHz at 3.3 V.
pub const SERIN_SCK: MegaHertz = MegaHertz::MHz(1);

/// Setup time between the latch going high and the first clock edge.
pub const SERIN_LATCH_SETUP: f32 = 100e-9;

/// Logical pin identifiers (`port * 16 + index`) of the serial peripheral lines.
pub const SERIN_CLK_PIN: u8 = 16 + 10; // PB10, SPI2_SCK
pub const SERIN_LATCH_PIN: u8 = 16 + 9; // PB9, SPI2_NSS
pub const SERIN_DATA_PIN: u8 = 16 + 14; // PB14, SPI2_MISO
