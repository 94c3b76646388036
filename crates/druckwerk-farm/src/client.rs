// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer control-surface abstraction.
//
// `PrinterClient` is the per-device handle the supervisor drives;
// `PrinterConnector` establishes handles.  Connection failures are typed so
// state derivation never has to inspect error strings.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use druckwerk_core::error::Result;
use druckwerk_core::types::{DeviceStatus, FolderListing};

/// Why establishing a printer connection failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Malformed endpoint or rejected credential.  Never auto-retried.
    #[error("invalid printer configuration: {0}")]
    InvalidConfig(String),

    /// Network-level failure.  Retried on the next forced refresh.
    #[error("printer unreachable: {0}")]
    Unreachable(String),
}

/// Operations the supervisor performs against a connected printer.
///
/// Paths are relative to the controller's local storage, except
/// `delete_file` which takes the full `local/...` form the controller
/// reports in listings.
#[async_trait]
pub trait PrinterClient: Send + Sync {
    /// Current device status report.
    async fn status(&self) -> Result<DeviceStatus>;

    /// List the contents of an on-device folder.
    async fn list_folder(&self, path: &str, recursive: bool) -> Result<FolderListing>;

    /// Delete a file from device storage.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Upload a local file to the device's storage root.
    async fn upload_file(&self, local: &Path) -> Result<()>;

    /// Move a file within device storage.
    async fn move_file(&self, src: &str, dst: &str) -> Result<()>;

    /// Select a file on the device, optionally starting the print.
    async fn select_file(&self, path: &str, print: bool) -> Result<()>;
}

/// Factory for printer clients.  The production implementation speaks the
/// controller's REST protocol; tests substitute scripted fakes.
#[async_trait]
pub trait PrinterConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        api_key: &str,
    ) -> std::result::Result<Box<dyn PrinterClient>, ConnectError>;
}
