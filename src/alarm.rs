//! Alarm latch and controller state
//!
//! Both values are shared between interrupt context (the limit switch edge handlers) and the
//! task-context state machine. They are stored as atomic `u8` so that they can be observed and
//! updated from either context without locks.
use core::sync::atomic::{AtomicU8, Ordering};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

/// The cause of a critical safety event.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    strum::IntoStaticStr,
)]
#[repr(u8)]
pub enum ExecAlarm {
    None = 0,
    HardLimit = 1,
    SoftLimit = 2,
    AbortCycle = 3,
    ProbeFailInitial = 4,
    ProbeFailContact = 5,
    HomingFailReset = 6,
    HomingFailDoor = 7,
    HomingFailPulloff = 8,
    HomingFailApproach = 9,
    SpindleControl = 10,
    ControlPin = 11,
}

/// Controller state as maintained by the motion state machine.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    strum::IntoStaticStr,
)]
#[repr(u8)]
pub enum State {
    #[default]
    Idle = 0,
    Alarm = 1,
    CheckMode = 2,
    Homing = 3,
    Cycle = 4,
    Hold = 5,
    Jog = 6,
    SafetyDoor = 7,
    Sleep = 8,
    ConfigAlarm = 9,
}

impl State {
    /// Whether a limit activation in this state must not escalate to a hard-limit alarm.
    pub fn suppresses_hard_limit(&self) -> bool {
        matches!(self, Self::Alarm | Self::ConfigAlarm | Self::Homing)
    }
}

/// Halts all motion immediately.
///
/// # Note
/// Implementations are called from interrupt context and must not block.
pub trait EmergencyStop: Sync {
    fn stop(&self);
}

/// The most recent critical safety event.
///
/// Once set to a cause other than [ExecAlarm::None], the flag keeps that cause until it is
/// explicitly cleared.
#[derive(Debug)]
pub struct AlarmFlag(AtomicU8);

impl Default for AlarmFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmFlag {
    pub const fn new() -> Self {
        Self(AtomicU8::new(ExecAlarm::None as u8))
    }

    pub fn get(&self) -> ExecAlarm {
        // Only valid causes are ever stored.
        ExecAlarm::try_from(self.0.load(Ordering::Acquire))
            .unwrap_or(ExecAlarm::None)
    }

    pub fn is_set(&self) -> bool {
        self.get() != ExecAlarm::None
    }

    /// Latch an alarm cause.
    ///
    /// # Returns
    /// `true` if this call set the flag, `false` if a cause was already latched.
    pub fn latch(&self, cause: ExecAlarm) -> bool {
        debug_assert!(cause != ExecAlarm::None);
        self.0
            .compare_exchange(
                ExecAlarm::None as u8,
                cause as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Clear the flag after recovery and return the cause that was latched.
    pub fn clear(&self) -> ExecAlarm {
        ExecAlarm::try_from(self.0.swap(ExecAlarm::None as u8, Ordering::AcqRel))
            .unwrap_or(ExecAlarm::None)
    }
}

/// Shared view of the controller [State].
#[derive(Debug)]
pub struct SystemState(AtomicU8);

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    pub const fn new() -> Self {
        Self(AtomicU8::new(State::Idle as u8))
    }

    pub fn get(&self) -> State {
        State::try_from(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set(&self, state: State) {
        self.0.store(state.into(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latch_once() {
        let alarm = AlarmFlag::new();
        assert!(!alarm.is_set());
        assert!(alarm.latch(ExecAlarm::HardLimit));
        assert!(!alarm.latch(ExecAlarm::SoftLimit));
        assert_eq!(alarm.get(), ExecAlarm::HardLimit);
        assert_eq!(alarm.clear(), ExecAlarm::HardLimit);
        assert_eq!(alarm.get(), ExecAlarm::None);
        assert!(alarm.latch(ExecAlarm::SoftLimit));
        assert_eq!(alarm.get(), ExecAlarm::SoftLimit);
    }

    #[test]
    fn suppressing_states() {
        for (state, suppress) in [
            (State::Idle, false),
            (State::Alarm, true),
            (State::CheckMode, false),
            (State::Homing, true),
            (State::Cycle, false),
            (State::Hold, false),
            (State::Jog, false),
            (State::SafetyDoor, false),
            (State::Sleep, false),
            (State::ConfigAlarm, true),
        ] {
            assert_eq!(state.suppresses_hard_limit(), suppress, "{state:?}");
        }
    }

    #[test]
    fn state_roundtrip() {
        let s = SystemState::new();
        assert_eq!(s.get(), State::Idle);
        s.set(State::Homing);
        assert_eq!(s.get(), State::Homing);
    }
}
