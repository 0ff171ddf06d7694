//! Board support for the SerIn limit switch controller
pub use stm32h7xx_hal as hal;

pub mod design_parameters;
pub mod exti;
pub mod serin_dma;
pub mod setup;
pub mod timers;

use embedded_hal_compat::{
    markers::{ForwardInputPin, ForwardOutputPin},
    Forward,
};
use serin::alarm::EmergencyStop;

rtic_monotonics::systick_monotonic!(Systick, 1_000);

/// Bit-banged chain clock (PB10).
pub type ShiftClk = Forward<
    hal::gpio::gpiob::PB10<hal::gpio::Output<hal::gpio::PushPull>>,
    ForwardOutputPin,
>;

/// Bit-banged chain latch (PB9).
pub type ShiftLatch = Forward<
    hal::gpio::gpiob::PB9<hal::gpio::Output<hal::gpio::PushPull>>,
    ForwardOutputPin,
>;

/// Bit-banged chain data (PB14).
pub type ShiftData =
    Forward<hal::gpio::gpiob::PB14<hal::gpio::Input>, ForwardInputPin>;

/// The stepper driver enable line (PE0, active high).
pub struct DriverEnable;

impl EmergencyStop for DriverEnable {
    fn stop(&self) {
        // Note(unsafe): BSRR writes are atomic. Only this line is touched.
        let gpioe = unsafe { &*hal::stm32::GPIOE::ptr() };
        gpioe.bsrr.write(|w| w.br0().set_bit());
    }
}

#[inline(never)]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use core::{
        fmt::Write,
        sync::atomic::{AtomicBool, Ordering},
    };
    use cortex_m::asm;
    use rtt_target::{ChannelMode, UpChannel};

    cortex_m::interrupt::disable();

    // Recursion protection
    static PANICKED: AtomicBool = AtomicBool::new(false);
    while PANICKED.load(Ordering::Relaxed) {
        asm::bkpt();
    }
    PANICKED.store(true, Ordering::Relaxed);

    // Nothing may move after a panic.
    DriverEnable.stop();

    if let Some(mut channel) = unsafe { UpChannel::conjure(0) } {
        channel.set_mode(ChannelMode::BlockIfFull);
        writeln!(channel, "{}", info).ok();
    }

    asm::udf();
}

#[cortex_m_rt::exception]
unsafe fn HardFault(ef: &cortex_m_rt::ExceptionFrame) -> ! {
    panic!("HardFault at {:#?}", ef);
}

#[cortex_m_rt::exception]
unsafe fn DefaultHandler(irqn: i16) {
    panic!("Unhandled exception (IRQn = {})", irqn);
}
