//! Board configuration
//!
//! Brings up clocks, logging and the pins of the SerIn chain. The serial peripheral and its DMA
//! streams are only configured when the hardware sampler is selected, the polling sampler gets
//! the same three lines as plain GPIO.
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal_compat::ForwardCompat;
use serin::settings::BusConfig;
use stm32h7xx_hal::{self as hal, gpio::Speed, prelude::*};

use super::{
    design_parameters, exti::LimitInputs, serin_dma::SerInCapture, timers,
    ShiftClk, ShiftData, ShiftLatch, Systick,
};

/// The hardware acquiring the chain.
pub enum SerInDevices {
    Hardware(SerInCapture),
    Polling {
        clk: ShiftClk,
        latch: ShiftLatch,
        data: ShiftData,
    },
}

pub struct BoardDevices {
    pub serin: Option<SerInDevices>,
    pub limit_inputs: LimitInputs,
}

/// Configure the board.
///
/// # Args
/// * `core` - The cortex-m peripherals.
/// * `device` - The microcontroller peripherals.
/// * `serin` - The validated chain configuration, if any.
///
/// # Returns
/// All devices in a stopped state. The motor drivers are enabled.
pub fn setup(
    core: stm32h7xx_hal::stm32::CorePeripherals,
    device: stm32h7xx_hal::stm32::Peripherals,
    serin: Option<&BusConfig>,
) -> BoardDevices {
    // Set up RTT logging
    {
        // Enable debug during WFE/WFI-induced sleep
        device.DBGMCU.cr.modify(|_, w| w.dbgsleep_d1().set_bit());

        // Best-effort RTT channel without a critical section so that the frame interrupt is
        // never delayed by a low priority log call. Colliding messages are dropped.
        let channels = rtt_target::rtt_init_default!();
        // Note(unsafe): The closure we pass does not establish a critical section
        // as demanded but it does ensure synchronization and implements a lock.
        unsafe {
            rtt_target::set_print_channel_cs(
                channels.up.0,
                &((|arg, f| {
                    static LOCKED: AtomicBool = AtomicBool::new(false);
                    if LOCKED.compare_exchange_weak(
                        false,
                        true,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) == Ok(false)
                    {
                        f(arg);
                        LOCKED.store(false, Ordering::Release);
                    }
                }) as rtt_target::CriticalSectionFunc),
            );
        }

        static LOGGER: rtt_logger::RTTLogger =
            rtt_logger::RTTLogger::new(log::LevelFilter::Info);
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(log::LevelFilter::Trace))
            .unwrap();
        log::info!("Starting");
    }

    let pwr = device.PWR.constrain();
    let vos = pwr.freeze();

    // Clear reset flags.
    device.RCC.rsr.write(|w| w.rmvf().set_bit());

    // Select the PLLs for SPI.
    device.RCC.d2ccip1r.modify(|_, w| w.spi123sel().pll2_p());

    let rcc = device.RCC.constrain();
    let ccdr = rcc
        .use_hse(8.MHz())
        .sysclk(design_parameters::SYSCLK.convert())
        .hclk(200.MHz())
        .pll2_p_ck(100.MHz())
        .freeze(vos, &device.SYSCFG);

    Systick::start(core.SYST, ccdr.clocks.sysclk().to_Hz());

    let gpiob = device.GPIOB.split(ccdr.peripheral.GPIOB);
    let gpiod = device.GPIOD.split(ccdr.peripheral.GPIOD);
    let gpioe = device.GPIOE.split(ccdr.peripheral.GPIOE);

    // The drivers are enabled until an emergency stop pulls the line low.
    gpioe.pe0.into_push_pull_output().set_high();

    let limit_inputs = LimitInputs::new(
        device.EXTI,
        device.SYSCFG,
        (
            gpiod.pd10.into_input(),
            gpiod.pd11.into_input(),
            gpiod.pd12.into_input(),
            gpiod.pd13.into_input(),
        ),
    );

    let serin = serin.map(|config| {
        // The chain is wired to the SPI2 pins. Any other assignment is a board mismatch.
        for (pin, expected) in [
            (config.clk, design_parameters::SERIN_CLK_PIN),
            (config.latch, design_parameters::SERIN_LATCH_PIN),
            (config.data, design_parameters::SERIN_DATA_PIN),
        ] {
            if pin != expected {
                panic!("SerIn pin {} is not routed on this board", pin);
            }
        }

        match config.kind {
            serin::hardware::SamplerKind::Hardware => {
                let sck = gpiob.pb10.into_alternate().speed(Speed::VeryHigh);
                let nss = gpiob.pb9.into_alternate().speed(Speed::VeryHigh);
                let miso = gpiob.pb14.into_alternate().speed(Speed::VeryHigh);

                // The latch is the hardware chip select: idle low loads the parallel inputs,
                // asserted high shifts.
                let spi_config = hal::spi::Config::new(hal::spi::Mode {
                    polarity: hal::spi::Polarity::IdleLow,
                    phase: hal::spi::Phase::CaptureOnFirstTransition,
                })
                .hardware_cs(hal::spi::HardwareCS {
                    mode: hal::spi::HardwareCSMode::WordTransaction,
                    assertion_delay: design_parameters::SERIN_LATCH_SETUP,
                    polarity: hal::spi::Polarity::IdleLow,
                })
                .communication_mode(hal::spi::CommunicationMode::Receiver);

                let spi: hal::spi::Spi<_, _, u32> = device.SPI2.spi(
                    (sck, miso, hal::spi::NoMosi, nss),
                    spi_config,
                    design_parameters::SERIN_SCK.convert(),
                    ccdr.peripheral.SPI2,
                    &ccdr.clocks,
                );

                // Configure timer 2 to trigger the frames
                let sampling_timer = {
                    // The timer frequency is manually adjusted below, so the 1KHz setting here
                    // is a dont-care.
                    let mut timer2 = device.TIM2.timer(
                        1.kHz(),
                        ccdr.peripheral.TIM2,
                        &ccdr.clocks,
                    );

                    timer2.pause();
                    timer2.set_tick_freq(
                        design_parameters::TIMER_FREQUENCY.convert(),
                    );

                    let mut sampling_timer =
                        timers::SamplingTimer::new(timer2);
                    let ticks = design_parameters::TIMER_FREQUENCY.to_Hz()
                        / serin::design_parameters::HARDWARE_SAMPLE_RATE
                            .to_Hz();
                    sampling_timer.set_period_ticks(ticks - 1);
                    sampling_timer
                };

                let dma_streams = hal::dma::dma::StreamsTuple::new(
                    device.DMA1,
                    ccdr.peripheral.DMA1,
                );

                let capture = SerInCapture::new(
                    spi,
                    dma_streams.0,
                    dma_streams.1,
                    dma_streams.2,
                    sampling_timer,
                )
                .unwrap();
                SerInDevices::Hardware(capture)
            }
            serin::hardware::SamplerKind::Polling => SerInDevices::Polling {
                clk: gpiob
                    .pb10
                    .into_push_pull_output()
                    .speed(Speed::Medium)
                    .forward(),
                latch: gpiob
                    .pb9
                    .into_push_pull_output()
                    .speed(Speed::Medium)
                    .forward(),
                data: gpiob.pb14.into_input().forward(),
            },
        }
    });

    log::info!("setup() complete");

    BoardDevices {
        serin,
        limit_inputs,
    }
}
