//! Fixed-size sliding window of samples with a running total.

/// A circular buffer of samples with constant-time average.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    samples: Vec<u32>,
    capacity: usize,
    write_index: usize,
    count: usize,
    total: u64,
}

impl SlidingWindow {
    /// Creates a window holding `capacity` samples. A zero capacity is
    /// treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: vec![0; capacity],
            capacity,
            write_index: 0,
            count: 0,
            total: 0,
        }
    }

    /// Pushes a sample, evicting the oldest one once the window is full.
    pub fn push(&mut self, sample: u32) {
        if self.count == self.capacity {
            self.total -= u64::from(self.samples[self.write_index]);
        } else {
            self.count += 1;
        }
        self.samples[self.write_index] = sample;
        self.total += u64::from(sample);
        self.write_index = (self.write_index + 1) % self.capacity;
    }

    /// True once `capacity` samples have been pushed.
    pub fn ready(&self) -> bool {
        self.count == self.capacity
    }

    /// Mean of the samples currently held; zero when empty.
    pub fn average(&self) -> u32 {
        if self.count == 0 {
            return 0;
        }
        (self.total / self.count as u64) as u32
    }

    /// The most recently pushed sample.
    pub fn latest(&self) -> Option<u32> {
        if self.count == 0 {
            return None;
        }
        let idx = (self.write_index + self.capacity - 1) % self.capacity;
        Some(self.samples[idx])
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in chronological order (oldest to newest).
    pub fn history(&self) -> Vec<u32> {
        if self.count < self.capacity {
            return self.samples[..self.count].to_vec();
        }
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&self.samples[self.write_index..]);
        out.extend_from_slice(&self.samples[..self.write_index]);
        out
    }

    pub fn clear(&mut self) {
        self.write_index = 0;
        self.count = 0;
        self.total = 0;
    }
}
