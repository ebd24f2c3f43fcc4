//! Moving-average filter for RSSI smoothing.
//!
//! The average is taken over the samples actually buffered: while fewer than
//! `capacity` samples have arrived the divisor is the buffer length, once the
//! buffer is full it is the capacity. An older revision of the tracker divided
//! by the capacity from the first sample on, which made cold-start averages read
//! low; that behaviour is intentionally not reproduced.

use crate::error::CoreError;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct MovingAverageFilter {
    capacity: usize,
    buffer: VecDeque<f64>,
    sample_count: u64,
    last_input: Option<f64>,
    fallback: Option<f64>,
}

impl MovingAverageFilter {
    pub fn new(period: usize) -> Result<Self, CoreError> {
        let mut filter = Self {
            capacity: 0,
            buffer: VecDeque::new(),
            sample_count: 0,
            last_input: None,
            fallback: None,
        };
        filter.reset(period)?;
        Ok(filter)
    }

    /// Value inserted for an unknown reading when nothing was inserted yet.
    pub fn with_fallback(mut self, fallback: f64) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Set a new capacity and drop every buffered sample.
    pub fn reset(&mut self, period: usize) -> Result<(), CoreError> {
        if period == 0 {
            return Err(CoreError::invalid("filter period must be positive"));
        }
        self.capacity = period;
        self.buffer = VecDeque::with_capacity(period);
        self.sample_count = 0;
        self.last_input = None;
        Ok(())
    }

    /// Insert a sample, evicting the oldest at capacity, and return the new average.
    pub fn add_sample(&mut self, value: f64) -> f64 {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
        self.last_input = Some(value);
        self.sample_count += 1;

        // The buffer is non-empty here.
        self.mean()
    }

    /// Record a reading whose value is unknown.
    ///
    /// The previous input is repeated, or the fallback if nothing was inserted
    /// yet. Without either the buffer is left alone and `None` is returned.
    pub fn add_unknown(&mut self) -> Option<f64> {
        let input = self.last_input.or(self.fallback)?;
        Some(self.add_sample(input))
    }

    /// Mean of the buffered samples, `None` before the first sample.
    pub fn average(&self) -> Option<f64> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.mean())
        }
    }

    /// Value most recently inserted into the buffer, including substitutions.
    pub fn last_input(&self) -> Option<f64> {
        self.last_input
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total samples accepted since the last reset.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    fn mean(&self) -> f64 {
        self.buffer.iter().sum::<f64>() / self.buffer.len() as f64
    }
}
