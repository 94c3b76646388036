// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Store — the system of record for print jobs and the printer
// registry.  The supervisor consumes it exclusively through the `QueueStore`
// trait; the SQLite implementation here is the production backend.

pub mod queue;

pub use queue::{QueueStore, SqliteQueueStore};
