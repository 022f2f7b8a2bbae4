use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// One completed sampling window, as served by `/api/data`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Litres per minute over the last window.
    pub flow_rate: f64,
    /// Litres since boot.
    pub total_volume: f64,
}

impl Reading {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Latest published [`Reading`], shared between the sampler and the HTTP handlers.
///
/// Both fields are replaced under the same lock, so readers never see a rate from one
/// window paired with a total from another.
#[derive(Debug, Default)]
pub struct ReadingBoard {
    latest: Mutex<Reading>,
}

impl ReadingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, reading: Reading) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = reading;
    }

    pub fn latest(&self) -> Reading {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
