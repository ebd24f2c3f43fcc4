//! Per-beacon signal source: absolute-value policy, smoothing and the wire payload.

use crate::domain::filter::MovingAverageFilter;
use crate::domain::models::{BeaconRole, Reading, RSSI_SENTINEL};
use crate::error::CoreError;
use crate::infrastructure::bluetooth::protocol;

#[derive(Debug, Clone)]
pub struct SignalSource {
    role: BeaconRole,
    name: String,
    absolute: bool,
    filter: MovingAverageFilter,
    last_raw: Option<i8>,
}

impl SignalSource {
    /// Build the source for `role`, advertised as `name`.
    ///
    /// `fallback` replaces a sentinel reading that arrives before any real one and
    /// is subject to the same absolute-value policy as live samples.
    pub fn new(
        role: BeaconRole,
        name: impl Into<String>,
        period: usize,
        fallback: i8,
    ) -> Result<Self, CoreError> {
        let absolute = role.absolute();
        let filter = MovingAverageFilter::new(period)?.with_fallback(transform(absolute, fallback));

        Ok(Self {
            role,
            name: name.into(),
            absolute,
            filter,
            last_raw: None,
        })
    }

    pub fn role(&self) -> BeaconRole {
        self.role
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Feed one RSSI reading and return the updated reading pair.
    ///
    /// A raw [`RSSI_SENTINEL`] is an unknown reading and never goes through the
    /// absolute transform.
    pub fn sample(&mut self, raw: i8) -> Reading {
        let value = transform(self.absolute, raw);
        let average = if raw == RSSI_SENTINEL {
            // A fallback is always configured.
            self.filter
                .add_unknown()
                .unwrap_or_else(|| self.filter.add_sample(value))
        } else {
            self.filter.add_sample(value)
        };
        let input = self.filter.last_input().unwrap_or(average);
        let reading = Reading {
            last_raw: to_sample(input),
            average: to_sample(average),
        };
        self.last_raw = Some(reading.last_raw);
        reading
    }

    pub fn last_raw(&self) -> Option<i8> {
        self.last_raw
    }

    /// Smoothed estimate in the sample domain, `None` until the first sample.
    pub fn average(&self) -> Option<i8> {
        self.filter.average().map(to_sample)
    }

    pub fn reading(&self) -> Option<Reading> {
        Some(Reading {
            last_raw: self.last_raw?,
            average: self.average()?,
        })
    }

    /// Single-byte payload for the controller.
    pub fn encoded_payload(&self) -> Option<[u8; 1]> {
        self.average().map(protocol::encode_rssi)
    }
}

/// Applied in `f64` so |-128| = 128 is averaged unclamped.
fn transform(absolute: bool, raw: i8) -> f64 {
    let value = f64::from(raw);
    if absolute {
        value.abs()
    } else {
        value
    }
}

/// Round to the nearest integer (half away from zero) and clamp into `i8`.
fn to_sample(value: f64) -> i8 {
    value.round().clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8
}
