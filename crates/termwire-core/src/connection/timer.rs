//! Cancellable timer slots.
//!
//! Sessions never sleep. They arm slots with a deadline and the owner of the
//! clock (the registry driver, or a test) calls back with the current instant.
//! A slot remembers the connection generation it was armed under, so a
//! deadline that outlived its connection fires as a no-op.

use std::time::Instant;

use tracing::trace;

/// What a timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Next heartbeat tick.
    Heartbeat,
    /// Abandon the current connect attempt.
    ConnectTimeout,
    /// Start the next reconnection attempt.
    Retry,
}

/// One armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub kind: TimerKind,
    pub deadline: Instant,
    /// Connection generation the task was armed under.
    pub generation: u64,
}

/// Holds at most one pending task of a given kind.
#[derive(Debug, Default)]
pub struct TimerSlot {
    task: Option<ScheduledTask>,
}

impl TimerSlot {
    /// Arm the slot, replacing any previous task.
    pub fn schedule(&mut self, kind: TimerKind, deadline: Instant, generation: u64) -> ScheduledTask {
        let task = ScheduledTask {
            kind,
            deadline,
            generation,
        };
        self.task = Some(task);
        task
    }

    /// Disarm the slot. Returns whether a task was pending.
    pub fn cancel(&mut self) -> bool {
        self.task.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.task.map(|t| t.deadline)
    }

    /// Take the task if it is due at `now`.
    ///
    /// A due task armed under a different generation is discarded and
    /// `None` is returned.
    pub fn take_due(&mut self, now: Instant, generation: u64) -> Option<ScheduledTask> {
        let task = self.task?;
        if task.deadline > now {
            return None;
        }
        self.task = None;
        if task.generation != generation {
            trace!(
                kind = ?task.kind,
                armed = task.generation,
                current = generation,
                "Discarding stale timer"
            );
            return None;
        }
        Some(task)
    }
}

/// The three timer slots a session owns.
#[derive(Debug, Default)]
pub struct SessionTimers {
    pub heartbeat: TimerSlot,
    pub connect: TimerSlot,
    pub retry: TimerSlot,
}

impl SessionTimers {
    /// Earliest armed deadline across all slots.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.heartbeat.deadline(),
            self.connect.deadline(),
            self.retry.deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn cancel_all(&mut self) {
        self.heartbeat.cancel();
        self.connect.cancel();
        self.retry.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn slot_fires_once_when_due() {
        let start = Instant::now();
        let mut slot = TimerSlot::default();
        slot.schedule(TimerKind::Retry, start + Duration::from_secs(1), 4);

        assert!(slot.take_due(start, 4).is_none());
        assert!(slot.is_armed());

        let task = slot.take_due(start + Duration::from_secs(1), 4).unwrap();
        assert_eq!(task.kind, TimerKind::Retry);
        assert!(!slot.is_armed());
        assert!(slot.take_due(start + Duration::from_secs(5), 4).is_none());
    }

    #[test]
    fn stale_generation_is_discarded() {
        let start = Instant::now();
        let mut slot = TimerSlot::default();
        slot.schedule(TimerKind::Heartbeat, start, 1);

        assert!(slot.take_due(start, 2).is_none());
        assert!(!slot.is_armed());
    }

    #[test]
    fn reschedule_replaces_previous() {
        let start = Instant::now();
        let mut slot = TimerSlot::default();
        slot.schedule(TimerKind::ConnectTimeout, start, 1);
        slot.schedule(TimerKind::ConnectTimeout, start + Duration::from_secs(3), 1);

        assert_eq!(slot.deadline(), Some(start + Duration::from_secs(3)));
        assert!(slot.take_due(start, 1).is_none());
    }

    #[test]
    fn cancel_reports_pending() {
        let mut slot = TimerSlot::default();
        assert!(!slot.cancel());
        slot.schedule(TimerKind::Retry, Instant::now(), 0);
        assert!(slot.cancel());
        assert!(slot.deadline().is_none());
    }

    #[test]
    fn timers_next_deadline_is_minimum() {
        let start = Instant::now();
        let mut timers = SessionTimers::default();
        assert!(timers.next_deadline().is_none());

        timers
            .heartbeat
            .schedule(TimerKind::Heartbeat, start + Duration::from_secs(30), 1);
        timers
            .connect
            .schedule(TimerKind::ConnectTimeout, start + Duration::from_secs(10), 1);
        assert_eq!(timers.next_deadline(), Some(start + Duration::from_secs(10)));

        timers.cancel_all();
        assert!(timers.next_deadline().is_none());
        assert!(!timers.retry.is_armed());
    }
}
