//! Load scoring and latency sampling for a node.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::protocol::NodeStats;

/// Number of latency samples kept per node.
pub const PING_WINDOW: usize = 3;

/// Load score of a node; lower is better.
///
/// `players + round(1.05^(100 * systemLoad) * 10 - 10)`, plus
/// `deficit + 2 * nulled` when the node reports frame counters.
pub fn penalty(stats: &NodeStats) -> i64 {
    let cpu = (1.05f64.powf(100.0 * stats.cpu.system_load) * 10.0 - 10.0).round() as i64;
    let mut total = i64::from(stats.players) + cpu;
    if let Some(frames) = &stats.frame_stats {
        total += frames.deficit + 2 * frames.nulled;
    }
    total
}

/// Window of the latest latency samples, ordered by when each
/// measurement started.
#[derive(Debug, Clone, Default)]
pub struct PingWindow {
    samples: VecDeque<(Instant, Duration)>,
}

impl PingWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(PING_WINDOW),
        }
    }

    /// Record a sample for a measurement that began at `started`.
    ///
    /// A measurement that finishes after a newer one lands in start order,
    /// and is dropped if it is older than everything in a full window.
    pub fn record(&mut self, started: Instant, sample: Duration) {
        let at = self.samples.partition_point(|(start, _)| *start <= started);
        if at == 0 && self.samples.len() == PING_WINDOW {
            return;
        }
        self.samples.insert(at, (started, sample));
        if self.samples.len() > PING_WINDOW {
            self.samples.pop_front();
        }
    }

    /// Mean of the retained samples, zero when there are none.
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().map(|(_, sample)| *sample).sum();
        total / self.samples.len() as u32
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CpuStats, FrameStats};

    fn stats(players: u32, system_load: f64, frames: Option<FrameStats>) -> NodeStats {
        NodeStats {
            players,
            cpu: CpuStats {
                system_load,
                ..CpuStats::default()
            },
            frame_stats: frames,
            ..NodeStats::default()
        }
    }

    #[test]
    fn idle_node_scores_its_player_count() {
        assert_eq!(penalty(&stats(0, 0.0, None)), 0);
        assert_eq!(penalty(&stats(7, 0.0, None)), 7);
        assert_eq!(penalty(&NodeStats::default()), 0);
    }

    #[test]
    fn cpu_load_is_exponential() {
        // 1.05^10 * 10 - 10 = 6.288...
        assert_eq!(penalty(&stats(0, 0.1, None)), 6);
        // 1.05^50 * 10 - 10 = 104.67...
        assert_eq!(penalty(&stats(0, 0.5, None)), 105);
    }

    #[test]
    fn frame_terms_only_when_present() {
        let frames = FrameStats {
            sent: 3000,
            nulled: 4,
            deficit: 3,
        };
        assert_eq!(penalty(&stats(2, 0.0, Some(frames))), 2 + 3 + 8);
    }

    #[test]
    fn ping_window_evicts_oldest() {
        let mut window = PingWindow::new();
        assert_eq!(window.average(), Duration::ZERO);
        assert!(window.is_empty());

        let base = Instant::now();
        for (i, ms) in [10, 20, 30, 40].into_iter().enumerate() {
            window.record(base + Duration::from_secs(i as u64), Duration::from_millis(ms));
        }
        assert_eq!(window.len(), PING_WINDOW);
        assert_eq!(window.average(), Duration::from_millis(30));
    }

    #[test]
    fn late_samples_keep_start_order() {
        let mut window = PingWindow::new();
        let base = Instant::now();
        let at = |secs: u64| base + Duration::from_secs(secs);

        window.record(at(1), Duration::from_millis(30));
        window.record(at(2), Duration::from_millis(60));
        window.record(at(3), Duration::from_millis(90));

        // Started before everything retained: too stale to count.
        window.record(at(0), Duration::from_millis(3000));
        assert_eq!(window.average(), Duration::from_millis(60));

        // Started between retained samples: evicts the oldest instead.
        window.record(at(2), Duration::from_millis(120));
        assert_eq!(window.len(), PING_WINDOW);
        assert_eq!(window.average(), Duration::from_millis(90));
    }
}
