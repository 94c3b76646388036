// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Farm configuration.
//
// Constructed once at startup and passed explicitly to the supervisor and
// printer constructors — there is no global configuration state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmConfig {
    /// Seconds to sleep between orchestration cycles. The sleep does not
    /// account for time spent in the cycle itself, so the effective cadence
    /// is interval + cycle duration.
    pub cycle_interval_secs: u64,
    /// Name of the on-device folder holding the artifact currently being
    /// printed. Its contents are the sole source of truth for completion
    /// detection.
    pub working_folder: String,
}

impl FarmConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60,
            working_folder: "active".into(),
        }
    }
}
