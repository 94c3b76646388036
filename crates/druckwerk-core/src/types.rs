// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckwerk print farm supervisor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registered printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrinterId(pub Uuid);

impl PrinterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PrinterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PrinterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
///
/// Transitions are monotonic: `Queued -> Running -> {Complete, Failed}`.
/// No path returns from a terminal state — the store rejects any other edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting in the queue for a compatible printer.
    Queued,
    /// Assigned to a printer and physically printing.
    Running,
    /// Device reported a successful print.
    Complete,
    /// Device reported a failed print.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Complete => "Complete",
            JobStatus::Failed => "Failed",
        };
        write!(f, "{text}")
    }
}

/// A print job as recorded in the queue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// Tag matched against a printer's type for assignment eligibility.
    pub printer_type: String,
    pub status: JobStatus,
    /// Original file name of the G-code artifact.
    pub artifact_name: String,
    /// SHA-256 hash of the artifact bytes (content address).
    pub artifact_hash: String,
    pub added: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// Set exactly once, when the job leaves `Queued`.
    pub assigned_printer: Option<PrinterId>,
    /// Measured print duration, reported by the device on completion.
    pub duration_secs: Option<i64>,
    /// Measured material usage in millimetres of filament.
    pub material_used_mm: Option<i64>,
}

impl PrintJob {
    pub fn new(printer_type: String, artifact_name: String, artifact_hash: String) -> Self {
        Self {
            id: JobId::new(),
            printer_type,
            status: JobStatus::Queued,
            artifact_name,
            artifact_hash,
            added: Utc::now(),
            started: None,
            finished: None,
            assigned_printer: None,
            duration_secs: None,
            material_used_mm: None,
        }
    }
}

/// A printer registry entry from the queue store.
///
/// Entries with no API key are placeholders and are skipped by the
/// supervisor when it refreshes its printer set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterRecord {
    pub id: PrinterId,
    /// Vanity name shown in logs.
    pub name: String,
    /// Tag matched against a job's printer type.
    pub printer_type: String,
    /// Host (and optional port) of the controller's REST interface.
    pub endpoint: String,
    pub api_key: Option<String>,
}

/// Normalized operational state of a printer, derived from the device's
/// reported status plus the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterState {
    /// Created but never successfully queried.
    Uninitialized,
    /// Controller unreachable over the network. Sticky until a forced refresh.
    ConnectionOffline,
    /// Malformed endpoint or credential. Terminal — never auto-retried.
    Invalid,
    /// Idle and ready for a new job.
    Operational,
    Printing,
    Paused,
    /// Device reports idle but the bed is still hot with no heating
    /// commanded — physically idle, not yet safe for a new job.
    Cooldown,
    /// Controller reachable but the printer itself is disconnected.
    DeviceOffline,
    /// Any other device-reported state text.
    Other(String),
}

/// Device state text that marks the printer as idle and ready.
pub const OPERATIONAL_TEXT: &str = "Operational";

/// Bed temperature (°C) above which an idle printer is still cooling down.
pub const COOLDOWN_BED_TEMP_C: f64 = 40.0;

impl PrinterState {
    /// Derive a normalized state from a device status report.
    ///
    /// The only synthetic state is `Cooldown`: device reports its idle text
    /// but the bed actual is above the cooldown threshold with target 0.
    pub fn derive(status: &DeviceStatus) -> Self {
        let text = status.state.text.as_str();
        if text == OPERATIONAL_TEXT {
            if let Some(bed) = status.temperature.as_ref().and_then(|t| t.bed.as_ref())
                && bed.actual > COOLDOWN_BED_TEMP_C
                && bed.target == 0.0
            {
                return PrinterState::Cooldown;
            }
            return PrinterState::Operational;
        }
        match text {
            "Printing" => PrinterState::Printing,
            "Paused" | "Pausing" => PrinterState::Paused,
            "Offline" | "Printer Offline" => PrinterState::DeviceOffline,
            other => PrinterState::Other(other.to_string()),
        }
    }

    /// Only `Operational` printers are eligible for new-job assignment.
    pub fn is_assignable(&self) -> bool {
        matches!(self, PrinterState::Operational)
    }

    /// States that stay put until an explicit forced refresh.
    pub fn is_sticky(&self) -> bool {
        matches!(self, PrinterState::ConnectionOffline | PrinterState::Invalid)
    }

    /// The state text, matching the device vocabulary where one exists.
    pub fn text(&self) -> &str {
        match self {
            PrinterState::Uninitialized => "Uninitialized",
            PrinterState::ConnectionOffline => "Connection Offline",
            PrinterState::Invalid => "Invalid",
            PrinterState::Operational => OPERATIONAL_TEXT,
            PrinterState::Printing => "Printing",
            PrinterState::Paused => "Paused",
            PrinterState::Cooldown => "Cooldown",
            PrinterState::DeviceOffline => "Printer Offline",
            PrinterState::Other(text) => text,
        }
    }
}

impl std::fmt::Display for PrinterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text())
    }
}

// ---------------------------------------------------------------------------
// Device status payloads
// ---------------------------------------------------------------------------

/// Status report from a printer controller.
///
/// For offline/invalid printers a synthesized value is constructed via
/// [`DeviceStatus::synthesized`] so callers never special-case connectivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: DeviceStateInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<DeviceTemperatures>,
}

impl DeviceStatus {
    /// Build a status carrying only a state text (no temperature data),
    /// emulating the shape of a real device report.
    pub fn synthesized(text: &str) -> Self {
        Self {
            state: DeviceStateInfo {
                text: text.to_string(),
            },
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStateInfo {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTemperatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bed: Option<TemperatureReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool0: Option<TemperatureReading>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TemperatureReading {
    pub actual: f64,
    pub target: f64,
}

// ---------------------------------------------------------------------------
// Folder listing payloads
// ---------------------------------------------------------------------------

/// Contents of an on-device folder, as reported by the controller's file API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderListing {
    #[serde(default)]
    pub children: Vec<FolderEntry>,
}

/// A single file entry in an on-device folder.
///
/// The optional substructures mirror the device payload: `prints` is absent
/// until the file has been printed at least once, and `gcodeAnalysis` is
/// absent until the controller has analysed the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prints: Option<PrintHistory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcode_analysis: Option<GcodeAnalysis>,
}

impl FolderEntry {
    /// Parse the job id from the entry's file name (`<job-id>.gcode`).
    pub fn job_id(&self) -> Option<JobId> {
        let stem = self.name.split('.').next()?;
        Uuid::parse_str(stem).ok().map(JobId)
    }

    /// Filament length (mm) from the controller's G-code analysis, if present.
    pub fn filament_length_mm(&self) -> Option<f64> {
        Some(
            self.gcode_analysis
                .as_ref()?
                .filament
                .as_ref()?
                .tool0
                .as_ref()?
                .length,
        )
    }
}

/// Print outcome metadata attached to a file once it has finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintHistory {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<LastPrint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastPrint {
    pub print_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcodeAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filament: Option<FilamentUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilamentUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool0: Option<ToolFilament>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ToolFilament {
    pub length: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_status(bed_actual: f64, bed_target: f64) -> DeviceStatus {
        DeviceStatus {
            state: DeviceStateInfo {
                text: OPERATIONAL_TEXT.into(),
            },
            temperature: Some(DeviceTemperatures {
                bed: Some(TemperatureReading {
                    actual: bed_actual,
                    target: bed_target,
                }),
                tool0: None,
            }),
        }
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Complete));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Complete));
        assert!(!JobStatus::Complete.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn hot_idle_bed_derives_cooldown() {
        let state = PrinterState::derive(&idle_status(55.0, 0.0));
        assert_eq!(state, PrinterState::Cooldown);
        assert!(!state.is_assignable());
    }

    #[test]
    fn cool_idle_bed_derives_operational() {
        let state = PrinterState::derive(&idle_status(28.5, 0.0));
        assert_eq!(state, PrinterState::Operational);
        assert!(state.is_assignable());
    }

    #[test]
    fn hot_bed_with_target_is_operational() {
        // Heating commanded — a new job is warming up, not cooling down.
        let state = PrinterState::derive(&idle_status(55.0, 60.0));
        assert_eq!(state, PrinterState::Operational);
    }

    #[test]
    fn missing_temperature_is_operational() {
        let state = PrinterState::derive(&DeviceStatus::synthesized(OPERATIONAL_TEXT));
        assert_eq!(state, PrinterState::Operational);
    }

    #[test]
    fn unknown_text_maps_to_other() {
        let state = PrinterState::derive(&DeviceStatus::synthesized("Error: thermal runaway"));
        assert_eq!(state, PrinterState::Other("Error: thermal runaway".into()));
        assert!(!state.is_assignable());
    }

    #[test]
    fn folder_entry_parses_device_payload() {
        let json = r#"{
            "name": "a1b2c3d4-0000-4000-8000-000000000001.gcode",
            "prints": {"success": true, "last": {"printTime": 3600.0}},
            "gcodeAnalysis": {"filament": {"tool0": {"length": 1000.0}}}
        }"#;
        let entry: FolderEntry = serde_json::from_str(json).expect("parse");
        assert!(entry.job_id().is_some());
        assert_eq!(entry.filament_length_mm(), Some(1000.0));
        assert!(entry.prints.as_ref().expect("prints").success);
    }

    #[test]
    fn folder_entry_without_metadata() {
        let json = r#"{"name": "not-a-job.gcode"}"#;
        let entry: FolderEntry = serde_json::from_str(json).expect("parse");
        assert!(entry.job_id().is_none());
        assert!(entry.prints.is_none());
        assert!(entry.filament_length_mm().is_none());
    }

    #[test]
    fn synthesized_status_round_trips() {
        let status = DeviceStatus::synthesized("Connection Offline");
        let json = serde_json::to_string(&status).expect("serialize");
        let back: DeviceStatus = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.state.text, "Connection Offline");
        assert!(back.temperature.is_none());
    }
}
