//! Heartbeat liveness and latency tracking.
//!
//! One PING is in flight at a time. Each tick either sends a new PING or, if
//! the previous one is still unanswered, reports a timeout. A silent peer is
//! therefore detected between one and two intervals after its last PONG.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::protocol::PingHeader;

/// A PING awaiting its PONG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPing {
    pub request_id: String,
    /// Wall-clock send time in epoch milliseconds, echoed by the peer.
    pub client_send_time: u64,
    /// Monotonic send time used for the latency sample.
    pub sent_at: Instant,
}

/// Outcome of a heartbeat tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send this PING and re-arm the heartbeat timer.
    Ping(PingHeader),
    /// The previous PING went unanswered for a full interval.
    TimedOut {
        request_id: String,
        outstanding: Duration,
    },
}

/// Tracks the outstanding PING for one live connection.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    pending: Option<PendingPing>,
    running: bool,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            running: false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Begin monitoring a freshly opened connection.
    ///
    /// Returns the deadline of the first tick.
    pub fn start(&mut self, now: Instant) -> Instant {
        self.pending = None;
        self.running = true;
        now + self.interval
    }

    /// Stop monitoring and forget any outstanding PING.
    pub fn stop(&mut self) {
        self.pending = None;
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pending(&self) -> Option<&PendingPing> {
        self.pending.as_ref()
    }

    /// Handle a heartbeat tick.
    ///
    /// `request_id` and `wall_ms` are only used when a new PING is produced.
    /// A timeout stops the monitor, so it is reported once per connection.
    pub fn on_tick(
        &mut self,
        now: Instant,
        request_id: String,
        wall_ms: u64,
        session_id: Option<&str>,
    ) -> HeartbeatTick {
        if let Some(stale) = self.pending.take() {
            self.running = false;
            return HeartbeatTick::TimedOut {
                outstanding: now.saturating_duration_since(stale.sent_at),
                request_id: stale.request_id,
            };
        }

        self.pending = Some(PendingPing {
            request_id: request_id.clone(),
            client_send_time: wall_ms,
            sent_at: now,
        });

        HeartbeatTick::Ping(PingHeader {
            session_id: session_id.map(str::to_string),
            request_id,
            timestamp: Some(wall_ms),
        })
    }

    /// Match a PONG against the outstanding PING.
    ///
    /// Only the echoed `requestId` is compared, so a PONG whose other
    /// fields are missing or oddly typed still counts. Returns the latency
    /// sample, or `None` if the PONG does not answer the current PING.
    pub fn on_pong(&mut self, request_id: &str, now: Instant) -> Option<Duration> {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.request_id == request_id);
        if !matches {
            trace!(%request_id, "Ignoring unmatched PONG");
            return None;
        }

        let ping = self.pending.take()?;
        let latency = now.saturating_duration_since(ping.sent_at);
        trace!(
            request_id = %ping.request_id,
            latency_ms = latency.as_millis() as u64,
            "Heartbeat latency sample"
        );
        Some(latency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    #[test]
    fn first_tick_sends_ping() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(INTERVAL);
        assert_eq!(hb.start(start), start + INTERVAL);

        match hb.on_tick(start + INTERVAL, "hb-1".into(), 1_000, Some("s1")) {
            HeartbeatTick::Ping(header) => {
                assert_eq!(header.request_id, "hb-1");
                assert_eq!(header.timestamp, Some(1_000));
                assert_eq!(header.session_id.as_deref(), Some("s1"));
            }
            other => panic!("expected ping, got {other:?}"),
        }
        assert_eq!(hb.pending().unwrap().request_id, "hb-1");
    }

    #[test]
    fn pong_yields_latency() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(INTERVAL);
        hb.start(start);
        hb.on_tick(start, "hb-1".into(), 1_000, None);

        let latency = hb.on_pong("hb-1", start + Duration::from_millis(42));
        assert_eq!(latency, Some(Duration::from_millis(42)));
        assert!(hb.pending().is_none());
    }

    #[test]
    fn unmatched_pong_is_ignored() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(INTERVAL);
        hb.start(start);
        hb.on_tick(start, "hb-2".into(), 1_000, None);

        assert!(hb.on_pong("hb-1", start).is_none());
        assert!(hb.pending().is_some());
    }

    #[test]
    fn unanswered_ping_times_out_once() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(INTERVAL);
        hb.start(start);
        hb.on_tick(start + INTERVAL, "hb-1".into(), 1_000, None);

        let tick = hb.on_tick(start + INTERVAL * 2, "hb-2".into(), 31_000, None);
        assert_eq!(
            tick,
            HeartbeatTick::TimedOut {
                request_id: "hb-1".into(),
                outstanding: INTERVAL,
            }
        );
        assert!(!hb.is_running());
        assert!(hb.pending().is_none());
    }

    #[test]
    fn answered_ping_keeps_running() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(INTERVAL);
        hb.start(start);

        for i in 1..=3u32 {
            let at = start + INTERVAL * i;
            let id = format!("hb-{i}");
            assert!(matches!(
                hb.on_tick(at, id.clone(), 0, None),
                HeartbeatTick::Ping(_)
            ));
            assert!(hb.on_pong(&id, at + Duration::from_millis(5)).is_some());
        }
        assert!(hb.is_running());
    }

    #[test]
    fn stop_clears_pending() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(INTERVAL);
        hb.start(start);
        hb.on_tick(start, "hb-1".into(), 0, None);
        hb.stop();

        assert!(hb.pending().is_none());
        assert!(hb.on_pong("hb-1", start).is_none());
    }
}
