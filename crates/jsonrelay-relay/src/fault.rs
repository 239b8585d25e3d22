use std::io;
use std::time::{Duration, Instant};

/// How consecutive port faults are absorbed.
#[derive(Debug, Clone)]
pub struct FaultPolicy {
    /// Consecutive faults before a full reconnect is requested.
    pub threshold: u32,
    /// The burst must also span at least this long.
    pub min_window: Duration,
    /// Pause after an ordinary fault.
    pub pause: Duration,
    /// Pause after the OS refused access.
    pub permission_pause: Duration,
    /// Faults per burst logged at warn level; the rest go to debug.
    pub warn_limit: u32,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            threshold: 10,
            min_window: Duration::from_secs(2),
            pause: Duration::from_secs(1),
            permission_pause: Duration::from_secs(2),
            warn_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Permission,
    Other,
}

impl FaultKind {
    pub fn of(err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            FaultKind::Permission
        } else {
            FaultKind::Other
        }
    }
}

/// What to do after a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultVerdict {
    Retry { pause: Duration, warn: bool },
    Escalate,
}

/// Counts consecutive faults for one supervisor.
#[derive(Debug)]
pub struct FaultTracker {
    policy: FaultPolicy,
    consecutive: u32,
    burst_start: Option<Instant>,
}

impl FaultTracker {
    pub fn new(policy: FaultPolicy) -> Self {
        Self {
            policy,
            consecutive: 0,
            burst_start: None,
        }
    }

    pub fn record_fault(&mut self, kind: FaultKind, now: Instant) -> FaultVerdict {
        self.consecutive += 1;
        let start = *self.burst_start.get_or_insert(now);

        if self.consecutive >= self.policy.threshold
            && now.duration_since(start) >= self.policy.min_window
        {
            self.reset();
            return FaultVerdict::Escalate;
        }

        let pause = match kind {
            FaultKind::Permission => self.policy.permission_pause,
            FaultKind::Other => self.policy.pause,
        };
        FaultVerdict::Retry {
            pause,
            warn: self.consecutive <= self.policy.warn_limit,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive > 0 {
            self.reset();
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    fn reset(&mut self) {
        self.consecutive = 0;
        self.burst_start = None;
    }
}

/// Poll interval on an idle port: 1 ms, then 5 ms after 50 empty polls,
/// then 10 ms after 200.
#[derive(Debug, Default)]
pub struct IdleBackoff {
    empty_polls: u32,
}

impl IdleBackoff {
    pub fn next_delay(&mut self) -> Duration {
        self.empty_polls = self.empty_polls.saturating_add(1);
        match self.empty_polls {
            0..50 => Duration::from_millis(1),
            50..200 => Duration::from_millis(5),
            _ => Duration::from_millis(10),
        }
    }

    pub fn reset(&mut self) {
        self.empty_polls = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault_times(tracker: &mut FaultTracker, count: u32, step: Duration) -> Vec<FaultVerdict> {
        let start = Instant::now();
        (0..count)
            .map(|i| tracker.record_fault(FaultKind::Other, start + step * i))
            .collect()
    }

    #[test]
    fn ten_faults_over_window_escalate_once() {
        let mut tracker = FaultTracker::new(FaultPolicy::default());
        let verdicts = fault_times(&mut tracker, 10, Duration::from_secs(1));

        let escalations = verdicts
            .iter()
            .filter(|v| **v == FaultVerdict::Escalate)
            .count();
        assert_eq!(escalations, 1);
        assert_eq!(verdicts[9], FaultVerdict::Escalate);
        assert_eq!(tracker.consecutive(), 0);
    }

    #[test]
    fn nine_faults_then_success_never_escalate() {
        let mut tracker = FaultTracker::new(FaultPolicy::default());
        let verdicts = fault_times(&mut tracker, 9, Duration::from_secs(1));
        assert!(verdicts.iter().all(|v| *v != FaultVerdict::Escalate));

        tracker.record_success();
        let verdicts = fault_times(&mut tracker, 9, Duration::from_secs(1));
        assert!(verdicts.iter().all(|v| *v != FaultVerdict::Escalate));
    }

    #[test]
    fn fast_burst_waits_for_window() {
        let mut tracker = FaultTracker::new(FaultPolicy::default());
        let start = Instant::now();
        for i in 0..15 {
            let verdict = tracker.record_fault(FaultKind::Other, start + Duration::from_millis(i));
            assert_ne!(verdict, FaultVerdict::Escalate);
        }
        assert_eq!(
            tracker.record_fault(FaultKind::Other, start + Duration::from_secs(2)),
            FaultVerdict::Escalate
        );
    }

    #[test]
    fn only_first_faults_warn_and_permission_pauses_longer() {
        let mut tracker = FaultTracker::new(FaultPolicy::default());
        let now = Instant::now();
        let warns: Vec<bool> = (0..5)
            .map(|_| match tracker.record_fault(FaultKind::Other, now) {
                FaultVerdict::Retry { warn, .. } => warn,
                FaultVerdict::Escalate => panic!("unexpected escalation"),
            })
            .collect();
        assert_eq!(warns, [true, true, true, false, false]);

        assert!(matches!(
            tracker.record_fault(FaultKind::Permission, now),
            FaultVerdict::Retry { pause, .. } if pause == Duration::from_secs(2)
        ));
    }

    #[test]
    fn idle_backoff_steps_up() {
        let mut backoff = IdleBackoff::default();
        let delays: Vec<Duration> = (0..250).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], Duration::from_millis(1));
        assert_eq!(delays[48], Duration::from_millis(1));
        assert_eq!(delays[49], Duration::from_millis(5));
        assert_eq!(delays[198], Duration::from_millis(5));
        assert_eq!(delays[199], Duration::from_millis(10));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(1));
    }

    #[test]
    fn permission_errors_are_classified() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(FaultKind::of(&err), FaultKind::Permission);
        assert_eq!(
            FaultKind::of(&io::Error::from(io::ErrorKind::BrokenPipe)),
            FaultKind::Other
        );
    }
}
