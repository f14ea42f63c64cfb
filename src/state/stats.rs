use std::time::Duration;

use super::event::PingSummary;

/// Running echo statistics for one ping session
///
/// Only successful round trips contribute to min/max/avg.
#[derive(Debug, Clone, Default)]
pub struct EchoStats {
    pub sent: u64,
    pub received: u64,
    pub min_rtt: Option<Duration>,
    pub max_rtt: Option<Duration>,
    mean_rtt: f64, // microseconds
}

impl EchoStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an echo request was sent
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Update stats with a new RTT sample
    pub fn record_response(&mut self, rtt: Duration) {
        debug_assert!(self.received < self.sent, "response without a matching send");
        self.received += 1;

        self.min_rtt = Some(self.min_rtt.map_or(rtt, |min| min.min(rtt)));
        self.max_rtt = Some(self.max_rtt.map_or(rtt, |max| max.max(rtt)));

        // Welford's online mean
        let delta = rtt.as_micros() as f64 - self.mean_rtt;
        self.mean_rtt += delta / self.received as f64;
    }

    /// Loss percentage
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (self.sent - self.received) as f64 / self.sent as f64 * 100.0
        }
    }

    /// Average RTT over successful replies
    pub fn avg_rtt(&self) -> Option<Duration> {
        (self.received > 0).then(|| Duration::from_micros(self.mean_rtt.round() as u64))
    }

    pub fn summary(&self) -> PingSummary {
        PingSummary {
            sent: self.sent,
            received: self.received,
            loss_pct: self.loss_pct(),
            min_rtt: self.min_rtt,
            max_rtt: self.max_rtt,
            avg_rtt: self.avg_rtt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_initial_state() {
        let stats = EchoStats::new();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.loss_pct(), 0.0);
        assert!(stats.min_rtt.is_none());
        assert!(stats.avg_rtt().is_none());
    }

    #[test]
    fn test_stats_min_max_avg() {
        let mut stats = EchoStats::new();
        for ms in [10, 20, 30] {
            stats.record_sent();
            stats.record_response(Duration::from_millis(ms));
        }

        assert_eq!(stats.min_rtt, Some(Duration::from_millis(10)));
        assert_eq!(stats.max_rtt, Some(Duration::from_millis(30)));
        assert_eq!(stats.avg_rtt(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_stats_loss_calculation() {
        let mut stats = EchoStats::new();
        for _ in 0..4 {
            stats.record_sent();
        }
        assert_eq!(stats.loss_pct(), 100.0);

        stats.record_response(Duration::from_millis(1));
        stats.record_response(Duration::from_millis(1));
        stats.record_response(Duration::from_millis(1));
        assert!((stats.loss_pct() - 25.0).abs() < f64::EPSILON);
        assert!(stats.received <= stats.sent);
    }

    #[test]
    fn test_stats_failures_do_not_touch_rtt() {
        let mut stats = EchoStats::new();
        stats.record_sent();
        stats.record_response(Duration::from_millis(5));
        stats.record_sent();

        let summary = stats.summary();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.received, 1);
        assert_eq!(summary.min_rtt, Some(Duration::from_millis(5)));
        assert_eq!(summary.avg_rtt, Some(Duration::from_millis(5)));
        assert!((summary.loss_pct - 50.0).abs() < f64::EPSILON);
    }
}
