use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle of one supervised port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Open = 2,
    /// Open, but the last poll failed.
    Degraded = 3,
    Closed = 4,
}

/// Overall relay health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineHealth {
    Idle = 0,
    Running = 1,
    Reconnecting = 2,
    /// The reconnect budget ran out. Only an explicit reconnect retries.
    ReconnectFailed = 3,
    Stopped = 4,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        })
    }
}

impl fmt::Display for EngineHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineHealth::Idle => "idle",
            EngineHealth::Running => "running",
            EngineHealth::Reconnecting => "reconnecting",
            EngineHealth::ReconnectFailed => "reconnect_failed",
            EngineHealth::Stopped => "stopped",
        })
    }
}

/// Enums that round-trip through a `u8`.
pub(crate) trait AtomicRepr: Copy {
    fn to_raw(self) -> u8;
    fn from_raw(raw: u8) -> Self;
}

impl AtomicRepr for ConnectionState {
    fn to_raw(self) -> u8 {
        self as u8
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Degraded,
            _ => ConnectionState::Closed,
        }
    }
}

impl AtomicRepr for EngineHealth {
    fn to_raw(self) -> u8 {
        self as u8
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => EngineHealth::Idle,
            1 => EngineHealth::Running,
            2 => EngineHealth::Reconnecting,
            3 => EngineHealth::ReconnectFailed,
            _ => EngineHealth::Stopped,
        }
    }
}

/// Lock-free cell holding one enum value.
#[derive(Debug)]
pub(crate) struct AtomicCell<T> {
    raw: AtomicU8,
    _marker: PhantomData<T>,
}

impl<T: AtomicRepr> AtomicCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            raw: AtomicU8::new(value.to_raw()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn load(&self) -> T {
        T::from_raw(self.raw.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, value: T) {
        self.raw.store(value.to_raw(), Ordering::Release);
    }

    /// Store `new` only if the cell holds `current`.
    pub(crate) fn transition(&self, current: T, new: T) -> bool {
        self.raw
            .compare_exchange(
                current.to_raw(),
                new.to_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Sleep for `total` in short slices while `keep_waiting` holds.
///
/// Returns `false` if the wait was cut short.
pub(crate) fn sleep_while(total: Duration, keep_waiting: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !keep_waiting() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn cell_transitions_only_from_expected_state() {
        let cell = AtomicCell::new(ConnectionState::Open);
        assert!(!cell.transition(ConnectionState::Degraded, ConnectionState::Open));
        assert!(cell.transition(ConnectionState::Open, ConnectionState::Degraded));
        assert_eq!(cell.load(), ConnectionState::Degraded);
    }

    #[test]
    fn every_state_round_trips() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Degraded,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_raw(state.to_raw()), state);
        }
        for health in [
            EngineHealth::Idle,
            EngineHealth::Running,
            EngineHealth::Reconnecting,
            EngineHealth::ReconnectFailed,
            EngineHealth::Stopped,
        ] {
            assert_eq!(EngineHealth::from_raw(health.to_raw()), health);
        }
    }

    #[test]
    fn sleep_stops_when_condition_clears() {
        let go = AtomicBool::new(false);
        let started = Instant::now();
        assert!(!sleep_while(Duration::from_secs(5), || go.load(Ordering::Relaxed)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn health_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EngineHealth::ReconnectFailed).unwrap(),
            "\"reconnect_failed\""
        );
    }
}
