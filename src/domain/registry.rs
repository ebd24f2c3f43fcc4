//! Registry of the tracked beacons, keyed by advertised name.

use crate::domain::models::{BeaconRole, Snapshot};
use crate::domain::signal::SignalSource;
use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct PeripheralRegistry {
    left: SignalSource,
    right: SignalSource,
}

impl PeripheralRegistry {
    pub fn new(
        left_name: &str,
        right_name: &str,
        period: usize,
        fallback: i8,
    ) -> Result<Self, CoreError> {
        if left_name.is_empty() || right_name.is_empty() {
            return Err(CoreError::invalid("beacon names must not be empty"));
        }
        if left_name == right_name {
            return Err(CoreError::invalid(format!(
                "beacon names must be distinct, both are {left_name:?}"
            )));
        }

        Ok(Self {
            left: SignalSource::new(BeaconRole::Left, left_name, period, fallback)?,
            right: SignalSource::new(BeaconRole::Right, right_name, period, fallback)?,
        })
    }

    /// Map an advertised name to the beacon it belongs to.
    pub fn resolve(&self, name: &str) -> Option<BeaconRole> {
        BeaconRole::ALL
            .into_iter()
            .find(|&role| self.get(role).name() == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn get(&self, role: BeaconRole) -> &SignalSource {
        match role {
            BeaconRole::Left => &self.left,
            BeaconRole::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, role: BeaconRole) -> &mut SignalSource {
        match role {
            BeaconRole::Left => &mut self.left,
            BeaconRole::Right => &mut self.right,
        }
    }

    /// Sources in transmission order.
    pub fn iter(&self) -> impl Iterator<Item = &SignalSource> {
        BeaconRole::ALL.into_iter().map(move |role| self.get(role))
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            left: self.left.reading(),
            right: self.right.reading(),
        }
    }
}
