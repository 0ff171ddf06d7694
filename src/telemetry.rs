use core::sync::atomic::{AtomicU32, Ordering};
use serde::Serialize;

use crate::{
    alarm::{ExecAlarm, State},
    bus::InputBus,
    hardware::SamplerKind,
    limits::{LimitSnapshot, LimitState},
};

/// Lock-free diagnostic counters of one sampler.
///
/// # Note
/// The samplers only ever increment these. They are read and reported from a low priority task,
/// so that nothing in interrupt context has to log.
#[derive(Debug, Default)]
pub struct SamplerStats {
    interrupts: AtomicU32,
    samples: AtomicU32,
    changes: AtomicU32,
}

impl SamplerStats {
    pub const fn new() -> Self {
        Self {
            interrupts: AtomicU32::new(0),
            samples: AtomicU32::new(0),
            changes: AtomicU32::new(0),
        }
    }

    /// The sampler was entered (DMA interrupt or poll wakeup).
    pub fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    /// A complete word was captured.
    pub fn sample(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    /// The captured word differed from the previous one.
    pub fn change(&self) {
        self.changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Counts {
        Counts {
            interrupts: self.interrupts.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            changes: self.changes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub interrupts: u32,
    pub samples: u32,
    pub changes: u32,
}

impl Counts {
    fn since(&self, earlier: &Self) -> Self {
        Self {
            interrupts: self.interrupts.wrapping_sub(earlier.interrupts),
            samples: self.samples.wrapping_sub(earlier.samples),
            changes: self.changes.wrapping_sub(earlier.changes),
        }
    }
}

/// Periodic diagnostic report of a bus and its sampler.
#[derive(Clone, Debug, Serialize)]
pub struct Telemetry {
    /// The acquisition back-end.
    pub kind: SamplerKind,

    /// Whether the sampler is started.
    pub running: bool,

    /// Counter increments since the previous report.
    pub delta: Counts,

    /// The last delivered sample word.
    pub value: u32,

    /// Logical pins marked as wired.
    pub pins_used: u32,

    /// Logical pins with a subscriber.
    pub interest: u32,

    pub limits: LimitSnapshot,
    pub alarm: ExecAlarm,
    pub state: State,

    /// No word was captured during the last period although the sampler is running.
    pub stalled: bool,
}

/// Computes [Telemetry] from successive counter snapshots.
#[derive(Debug, Default)]
pub struct Monitor {
    last: Counts,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate the report for the period since the previous call.
    ///
    /// # Args
    /// * `kind` - The sampler feeding `bus`.
    /// * `running` - Whether that sampler is started.
    /// * `stats` - Its counters.
    /// * `bus` - The bus.
    /// * `limits` - The shared limit state.
    pub fn report(
        &mut self,
        kind: SamplerKind,
        running: bool,
        stats: &SamplerStats,
        bus: &InputBus<'_>,
        limits: &LimitState,
    ) -> Telemetry {
        let now = stats.snapshot();
        let delta = now.since(&self.last);
        self.last = now;

        let stalled = running && delta.samples == 0;
        let value = bus.current_value();
        if stalled {
            let name: &'static str = kind.into();
            log::warn!("SerIn {name} sampler stalled (value {value:#010x})");
        } else {
            log::debug!(
                "SerIn interrupts {} frames {} changes {} value {:#010x}",
                delta.interrupts,
                delta.samples,
                delta.changes,
                value
            );
        }

        Telemetry {
            kind,
            running,
            delta,
            value,
            pins_used: bus.pins_used(),
            interest: bus.interest(),
            limits: limits.snapshot(),
            alarm: limits.alarm.get(),
            state: limits.state.get(),
            stalled,
        }
    }
}
