//! Per-session traffic and latency statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters and latency estimates for one logical session.
///
/// Survives reconnects; only a fresh session starts from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    /// Inbound frames dropped because they failed to decode.
    pub decode_errors: u64,
    /// Queued frames discarded because the send queue was full.
    pub dropped_frames: u64,
    /// Most recent heartbeat round trip.
    #[serde(with = "duration_opt_millis")]
    pub latency: Option<Duration>,
    /// Smoothed round trip (EWMA).
    #[serde(with = "duration_opt_millis")]
    pub latency_smoothed: Option<Duration>,
    #[serde(with = "duration_opt_millis")]
    pub jitter: Option<Duration>,
    /// Successful reconnections.
    pub reconnect_count: u32,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a latency sample.
    ///
    /// - smoothed = 7/8 * smoothed + 1/8 * sample
    /// - jitter = 3/4 * jitter + 1/4 * |sample - smoothed|
    pub fn update_latency(&mut self, sample: Duration) {
        self.latency = Some(sample);

        let smoothed = match self.latency_smoothed {
            Some(prev) => {
                let prev_nanos = prev.as_nanos() as u64;
                let sample_nanos = sample.as_nanos() as u64;
                Duration::from_nanos((prev_nanos * 7 + sample_nanos) / 8)
            }
            None => sample,
        };
        self.latency_smoothed = Some(smoothed);

        let diff = Duration::from_nanos(sample.as_nanos().abs_diff(smoothed.as_nanos()) as u64);
        self.jitter = Some(match self.jitter {
            Some(j) => {
                let j_nanos = j.as_nanos() as u64;
                let diff_nanos = diff.as_nanos() as u64;
                Duration::from_nanos((j_nanos * 3 + diff_nanos) / 4)
            }
            None => diff,
        });
    }

    pub fn record_send(&mut self, bytes: usize) {
        self.bytes_sent = self.bytes_sent.saturating_add(bytes as u64);
        self.frames_sent = self.frames_sent.saturating_add(1);
    }

    pub fn record_recv(&mut self, bytes: usize) {
        self.bytes_recv = self.bytes_recv.saturating_add(bytes as u64);
        self.frames_recv = self.frames_recv.saturating_add(1);
    }

    pub fn record_decode_error(&mut self) {
        self.decode_errors = self.decode_errors.saturating_add(1);
    }

    pub fn record_dropped(&mut self) {
        self.dropped_frames = self.dropped_frames.saturating_add(1);
    }

    pub fn record_reconnect(&mut self) {
        self.reconnect_count = self.reconnect_count.saturating_add(1);
    }

    /// Format latency for display.
    pub fn latency_display(&self) -> String {
        self.latency_smoothed
            .or(self.latency)
            .map(|d| format!("{}ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string())
    }
}

mod duration_opt_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_new() {
        let stats = SessionStats::new();
        assert!(stats.latency.is_none());
        assert!(stats.latency_smoothed.is_none());
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.decode_errors, 0);
        assert_eq!(stats.reconnect_count, 0);
        assert_eq!(stats.latency_display(), "-");
    }

    #[test]
    fn first_sample_sets_smoothed() {
        let mut stats = SessionStats::new();
        stats.update_latency(Duration::from_millis(100));

        assert_eq!(stats.latency, Some(Duration::from_millis(100)));
        assert_eq!(stats.latency_smoothed, Some(Duration::from_millis(100)));
        assert_eq!(stats.jitter, Some(Duration::ZERO));
        assert_eq!(stats.latency_display(), "100ms");
    }

    #[test]
    fn later_samples_are_smoothed() {
        let mut stats = SessionStats::new();
        stats.update_latency(Duration::from_millis(100));
        stats.update_latency(Duration::from_millis(200));

        // 7/8 * 100 + 1/8 * 200 = 112.5
        assert_eq!(stats.latency_smoothed, Some(Duration::from_micros(112_500)));
        assert_eq!(stats.latency, Some(Duration::from_millis(200)));
        assert!(stats.jitter.unwrap() > Duration::ZERO);
    }

    #[test]
    fn counters_accumulate() {
        let mut stats = SessionStats::new();
        stats.record_send(100);
        stats.record_send(50);
        stats.record_recv(7);
        stats.record_decode_error();
        stats.record_dropped();
        stats.record_reconnect();

        assert_eq!(stats.bytes_sent, 150);
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_recv, 7);
        assert_eq!(stats.frames_recv, 1);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.dropped_frames, 1);
        assert_eq!(stats.reconnect_count, 1);
    }

    #[test]
    fn stats_serialization() {
        let mut stats = SessionStats::new();
        stats.update_latency(Duration::from_millis(40));
        stats.record_send(10);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["latency"], 40);
        assert_eq!(json["bytesSent"], 10);

        let back: SessionStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }
}
