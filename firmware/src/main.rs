//! # SerIn limit switches
//!
//! Samples up to 32 limit switches through a chain of 74HC165 shift registers and handles up to
//! four more on native interrupt pins.
//!
//! ## Features
//! * Continuous capture of the chain by SPI2 and DMA at 2 kHz, or bit-banged polling at 100 Hz
//! * Per-pin edge dispatch with the same semantics as a native pin interrupt
//! * Hard limits: the first engaged switch latches an alarm and disables the motor drivers
//!
//! ## Telemetry
//! Refer to [serin::telemetry::Telemetry]. A report is logged once per second.
#![no_std]
#![no_main]

use serin::{
    alarm::{ExecAlarm, State},
    limits::LimitSource,
    settings::{LimitSwitch, Settings},
    telemetry::SamplerStats,
    u5, LimitState,
};

mod hardware;

use hardware::{design_parameters, DriverEnable};

static LIMITS: LimitState = LimitState::new();
static ESTOP: DriverEnable = DriverEnable;
static STATS: SamplerStats = SamplerStats::new();

/// The wiring of this machine.
fn board_settings() -> Settings {
    let mut settings = Settings::default();
    *settings.serin.clk_pin = Some(design_parameters::SERIN_CLK_PIN);
    *settings.serin.latch_pin = Some(design_parameters::SERIN_LATCH_PIN);
    *settings.serin.data_pin = Some(design_parameters::SERIN_DATA_PIN);
    *settings.serin.num_chips = 1;

    let switch = |axis, direction, source| LimitSwitch {
        axis,
        motor: 0,
        direction,
        source,
        active_low: false,
        shared: false,
    };
    let switches = [
        switch(0, 1, LimitSource::Bus(u5::new(0))),
        switch(0, -1, LimitSource::Bus(u5::new(1))),
        switch(1, 0, LimitSource::Bus(u5::new(2))),
        LimitSwitch {
            active_low: true,
            shared: true,
            ..switch(2, 0, LimitSource::Native(3 * 16 + 10))
        },
    ];
    for (slot, switch) in settings.limits.switches.iter_mut().zip(switches) {
        **slot = Some(switch);
    }
    settings
}

/// Downgrade a singleton to a shared reference.
fn freeze<T>(r: &'static mut T) -> &'static T {
    r
}

#[rtic::app(device = stm32h7xx_hal::stm32, peripherals = true, dispatchers=[DCMI, JPEG, LTDC])]
mod app {
    use super::*;

    use rtic_monotonics::Monotonic;
    use serin::{
        design_parameters::{MAX_LIMIT_SWITCHES, MONITOR_PERIOD, POLL_PERIOD},
        hardware::{
            Acquisition, HardwareSampler, PollingSampler, SamplerKind,
        },
        telemetry::Monitor,
        InputBus, LimitEndpoint,
    };

    use crate::hardware::{
        self, exti::LimitInputs, serin_dma::SerInCapture,
        setup::SerInDevices, ShiftClk, ShiftData, ShiftLatch, Systick,
    };

    type Poller =
        PollingSampler<'static, ShiftClk, ShiftLatch, ShiftData>;

    #[shared]
    struct Shared {
        hardware: Option<HardwareSampler<'static, SerInCapture>>,
        poller: Option<Poller>,
    }

    #[local]
    struct Local {
        bus: Option<&'static InputBus<'static>>,
        kind: SamplerKind,
        limit_inputs: LimitInputs,
        reporter: Monitor,
    }

    #[init]
    fn init(c: init::Context) -> (Shared, Local) {
        let settings = board_settings();

        let config = match settings.serin.validate() {
            Ok(config) => config,
            Err(e) => panic!("SerIn configuration: {}", e),
        };

        let mut board =
            hardware::setup::setup(c.core, c.device, config.as_ref());

        LIMITS.set_hard_limits(*settings.limits.hard_limits);

        let mut bus = config.as_ref().map(|config| {
            if let Err(e) = config.check_pins_used(settings.limits.bus_pins())
            {
                panic!("SerIn configuration: {}", e);
            }
            cortex_m::singleton!(: InputBus<'static> = InputBus::new(config.chips))
                .unwrap()
        });

        let endpoints = cortex_m::singleton!(
            : heapless::Vec<LimitEndpoint<'static>, MAX_LIMIT_SWITCHES> = heapless::Vec::new()
        )
        .unwrap();
        for switch in settings.limits.switches() {
            match LimitEndpoint::from_settings(switch, &LIMITS, &ESTOP) {
                Ok(endpoint) => {
                    endpoints.push(endpoint).ok();
                }
                Err(e) => panic!("Limit switch {:?}: {}", switch, e),
            }
        }

        for endpoint in freeze(endpoints).iter() {
            if let Err(e) = endpoint
                .initialize(&mut board.limit_inputs, bus.as_deref_mut())
            {
                panic!("Limit switch on {:?}: {}", endpoint.source(), e);
            }
        }

        let bus = bus.map(freeze);
        let kind = config.map_or(SamplerKind::Hardware, |config| config.kind);

        let (mut hardware, mut poller) = match (board.serin, bus) {
            (Some(SerInDevices::Hardware(capture)), Some(bus)) => {
                (Some(HardwareSampler::new(capture, bus, &STATS)), None)
            }
            (Some(SerInDevices::Polling { clk, latch, data }), Some(bus)) => {
                (None, Some(PollingSampler::new(clk, latch, data, bus, &STATS)))
            }
            _ => (None, None),
        };

        if let Some(sampler) = hardware.as_mut() {
            sampler.start().unwrap();
        }
        if let Some(sampler) = poller.as_mut() {
            sampler.start().unwrap();
            poll::spawn().unwrap();
        }

        monitor::spawn().unwrap();

        let local = Local {
            bus,
            kind,
            limit_inputs: board.limit_inputs,
            reporter: Monitor::new(),
        };

        (Shared { hardware, poller }, local)
    }

    /// Frame-complete interrupt of the chain capture.
    ///
    /// The first completed frame is followed by a resync so that every subscriber learns the
    /// initial level of its pin.
    #[task(binds=DMA1_STR2, shared=[hardware], local=[synced: bool = false], priority=3)]
    fn frame(mut c: frame::Context) {
        let synced = c.local.synced;
        c.shared.hardware.lock(|hardware| {
            let Some(sampler) = hardware.as_mut() else {
                return;
            };
            sampler.on_interrupt();
            if !*synced && STATS.snapshot().samples > 0 {
                *synced = true;
                sampler.bus().resync();
            }
        });
    }

    #[task(binds=EXTI15_10, local=[limit_inputs], priority=3)]
    fn native_limits(c: native_limits::Context) {
        c.local.limit_inputs.on_interrupt();
    }

    #[task(priority = 2, shared=[poller])]
    async fn poll(mut c: poll::Context) {
        let mut synced = false;
        loop {
            let running = c.shared.poller.lock(|poller| {
                let Some(sampler) = poller.as_mut() else {
                    return false;
                };
                if let Err(e) = sampler.poll() {
                    log::error!("SerIn shift-in failed: {}", e);
                    sampler.stop();
                    return false;
                }
                if !synced {
                    synced = true;
                    sampler.bus().resync();
                }
                true
            });
            if !running {
                return;
            }
            Systick::delay(POLL_PERIOD).await;
        }
    }

    #[task(priority = 1, shared=[hardware, poller], local=[bus, kind, reporter])]
    async fn monitor(mut c: monitor::Context) {
        loop {
            Systick::delay(MONITOR_PERIOD).await;

            if LIMITS.alarm.is_set() && LIMITS.state.get() != State::Alarm {
                let cause = LIMITS.alarm.get();
                log::error!("Alarm: {:?}", cause);
                if cause == ExecAlarm::HardLimit {
                    LIMITS.state.set(State::Alarm);
                }
            }

            let Some(bus) = *c.local.bus else {
                continue;
            };
            let running = c.shared.hardware.lock(|sampler| {
                sampler.as_ref().is_some_and(|s| s.is_running())
            }) || c.shared.poller.lock(|sampler| {
                sampler.as_ref().is_some_and(|s| s.is_running())
            });
            let telemetry = c.local.reporter.report(
                *c.local.kind,
                running,
                &STATS,
                bus,
                &LIMITS,
            );
            if let Ok(json) =
                serde_json_core::to_string::<_, 512>(&telemetry)
            {
                log::info!("{}", json);
            }
        }
    }
}
