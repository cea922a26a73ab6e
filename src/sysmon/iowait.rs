//! I/O-wait pressure monitor.

use std::io;
use std::time::Duration;
use tracing::{debug, info};

use super::stat::{CpuTimes, StatSource};
use super::window::SlidingWindow;
use super::Transition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoWaitConfig {
    /// Clear threshold, percent.
    pub low: u32,
    /// Alert threshold, percent.
    pub high: u32,
    pub interval: Duration,
    /// Number of samples averaged.
    pub window: usize,
    pub hook: String,
}

impl Default for IoWaitConfig {
    fn default() -> Self {
        Self {
            low: 10,
            high: 80,
            interval: Duration::from_secs(1),
            window: 5,
            hook: "iowait".to_string(),
        }
    }
}

/// Windowed I/O-wait monitor with edge-triggered alert/clear.
#[derive(Debug)]
pub struct IoWaitMonitor {
    config: IoWaitConfig,
    window: SlidingWindow,
    prev: Option<CpuTimes>,
    alerted: bool,
}

impl IoWaitMonitor {
    pub fn new(config: IoWaitConfig) -> Self {
        let window = SlidingWindow::new(config.window);
        Self {
            config,
            window,
            prev: None,
            alerted: false,
        }
    }

    pub fn config(&self) -> &IoWaitConfig {
        &self.config
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    /// Reads the counters and feeds the delta since the previous read.
    pub fn poll(&mut self, source: &mut dyn StatSource) -> io::Result<Option<Transition>> {
        let times = source.cpu_times()?;
        Ok(self.observe(times))
    }

    /// Feeds raw counters. The first call only establishes the baseline.
    pub fn observe(&mut self, times: CpuTimes) -> Option<Transition> {
        let prev = self.prev.replace(times)?;
        self.push(times.iowait_percent_since(&prev))
    }

    /// Feeds one percentage sample.
    pub fn push(&mut self, sample: u32) -> Option<Transition> {
        self.window.push(sample);
        if !self.window.ready() {
            return None;
        }
        let average = self.window.average();
        debug!("iowait sample {}%, window average {}%", sample, average);

        if !self.alerted && average >= self.config.high {
            self.alerted = true;
            info!("I/O-wait alert: average {}% >= {}%", average, self.config.high);
            return Some(Transition::Alert);
        }
        if self.alerted && (sample < self.config.low || average <= self.config.low) {
            self.alerted = false;
            info!("I/O-wait cleared: sample {}%, average {}%", sample, average);
            return Some(Transition::Clear);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> IoWaitMonitor {
        IoWaitMonitor::new(IoWaitConfig {
            low: 10,
            high: 80,
            window: 3,
            ..Default::default()
        })
    }

    #[test]
    fn test_alert_once_then_clear_once() {
        let mut m = monitor();
        let out: Vec<_> = [90, 85, 95].into_iter().map(|s| m.push(s)).collect();
        assert_eq!(out, vec![None, None, Some(Transition::Alert)]);

        assert_eq!(m.push(5), Some(Transition::Clear));
        assert_eq!(m.push(3), None);
        assert!(!m.is_alerted());
    }

    #[test]
    fn test_sustained_pressure_alerts_once() {
        let mut m = monitor();
        let alerts = (0..10)
            .filter_map(|_| m.push(99))
            .filter(|t| *t == Transition::Alert)
            .count();
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_no_decision_before_window_ready() {
        let mut m = monitor();
        assert_eq!(m.push(100), None);
        assert_eq!(m.push(100), None);
        assert!(!m.is_alerted());
    }

    #[test]
    fn test_observe_uses_counter_deltas() {
        let mut m = monitor();
        let mut t = CpuTimes::default();
        assert_eq!(m.observe(t), None);
        for _ in 0..3 {
            t.iowait += 90;
            t.idle += 10;
            m.observe(t);
        }
        assert!(m.is_alerted());
        assert_eq!(m.window().history(), vec![90, 90, 90]);
    }
}
