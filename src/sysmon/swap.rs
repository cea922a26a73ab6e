//! Swap pressure monitor.

use std::io;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::ewma::Ewma;
use super::stat::StatSource;
use super::Transition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapConfig {
    /// Clear threshold, percent of swap used.
    pub low: u32,
    /// Alert threshold, percent of swap used.
    pub high: u32,
    pub interval: Duration,
    /// Minimum gap between repeated alerts while above `high`. Zero never
    /// repeats.
    pub notify_interval: Duration,
    /// EWMA smoothing length in samples.
    pub smoothing: u32,
    pub hook: String,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            low: 40,
            high: 80,
            interval: Duration::from_secs(5),
            notify_interval: Duration::from_secs(60),
            smoothing: 4,
            hook: "swap".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct SwapMonitor {
    config: SwapConfig,
    ewma: Ewma,
    alerted: bool,
    last_alert: Option<Instant>,
}

impl SwapMonitor {
    pub fn new(config: SwapConfig) -> Self {
        let ewma = Ewma::new(config.smoothing);
        Self {
            config,
            ewma,
            alerted: false,
            last_alert: None,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted
    }

    /// Current smoothed usage.
    pub fn smoothed(&self) -> Option<f64> {
        self.ewma.value()
    }

    /// Reads /proc/meminfo figures and feeds them. Systems without swap
    /// produce no samples.
    pub fn poll(
        &mut self,
        source: &mut dyn StatSource,
        now: Instant,
    ) -> io::Result<Option<Transition>> {
        let info = source.swap()?;
        Ok(info.used_percent().and_then(|s| self.push(s, now)))
    }

    /// Feeds one usage sample observed at `now`.
    pub fn push(&mut self, sample: u32, now: Instant) -> Option<Transition> {
        let s = self.ewma.update(f64::from(sample));
        debug!("swap sample {}%, smoothed {:.1}%", sample, s);

        if s >= f64::from(self.config.high) {
            if !self.alerted {
                self.alerted = true;
                self.last_alert = Some(now);
                info!("Swap alert: {:.1}% >= {}%", s, self.config.high);
                return Some(Transition::Alert);
            }
            let due = !self.config.notify_interval.is_zero()
                && self
                    .last_alert
                    .map_or(true, |t| now.duration_since(t) >= self.config.notify_interval);
            if due {
                self.last_alert = Some(now);
                info!("Swap alert repeated: {:.1}%", s);
                return Some(Transition::Alert);
            }
            return None;
        }

        if self.alerted && s <= f64::from(self.config.low) {
            self.alerted = false;
            self.last_alert = None;
            info!("Swap cleared: {:.1}% <= {}%", s, self.config.low);
            return Some(Transition::Clear);
        }
        None
    }
}
