// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckwerk.

use thiserror::Error;

/// Top-level error type for all Druckwerk operations.
#[derive(Debug, Error)]
pub enum DruckwerkError {
    // -- Printer errors --
    #[error("printer unreachable: {0}")]
    Connection(String),

    #[error("invalid printer configuration: {0}")]
    InvalidConfig(String),

    #[error("device request failed: {0}")]
    Device(String),

    // -- Queue store errors --
    #[error("queue store error: {0}")]
    Store(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("invalid job status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // -- Artifact errors --
    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("artifact integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    // -- Ambient --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckwerkError>;
