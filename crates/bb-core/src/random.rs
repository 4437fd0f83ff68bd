use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;

/// Source of uniform integers for thresholds and backoff jitter.
pub trait RandomSource: Send + Sync {
    /// Uniform integer in `[low, high]`, both inclusive.
    fn uniform_inclusive(&self, low: u32, high: u32) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn uniform_inclusive(&self, low: u32, high: u32) -> u32 {
        if low >= high {
            return low;
        }
        rand::rng().random_range(low..=high)
    }
}

/// Replays a scripted sequence. Values outside the requested range are
/// clamped into it; once exhausted every draw returns `low`.
#[derive(Debug, Default)]
pub struct SequenceRandom {
    values: Mutex<VecDeque<u32>>,
}

impl SequenceRandom {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: Mutex::new(values.into_iter().collect()),
        }
    }

    pub fn push(&self, value: u32) {
        if let Ok(mut values) = self.values.lock() {
            values.push_back(value);
        }
    }

    pub fn remaining(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }
}

impl RandomSource for SequenceRandom {
    fn uniform_inclusive(&self, low: u32, high: u32) -> u32 {
        let next = self.values.lock().ok().and_then(|mut v| v.pop_front());
        match next {
            Some(v) => v.clamp(low, high.max(low)),
            None => low,
        }
    }
}
