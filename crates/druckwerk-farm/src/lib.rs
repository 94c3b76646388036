// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Farm — printer state machine and the supervisor orchestration
// loop.  Talks to queue storage through `QueueStore` and to physical
// printers through `PrinterClient`, so every piece is testable in isolation.

pub mod client;
pub mod gcode;
pub mod octo;
pub mod printer;
pub mod supervisor;

pub use client::{ConnectError, PrinterClient, PrinterConnector};
pub use octo::OctoConnector;
pub use printer::Printer;
pub use supervisor::Supervisor;
