// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// G-code edits applied around job artifacts.
//
// Every artifact gets a trailing M0 so the printer pauses after the print
// and waits for an operator to clear the bed.  Failed jobs park a small
// hold program on the device that shows the failure on the panel.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use druckwerk_core::error::Result;
use druckwerk_core::types::JobId;

/// Appended to every staged artifact before upload.  The M0 holds the
/// device in `Paused` until the operator confirms bed removal.
pub const END_PAUSE_DIRECTIVE: &str = "\nM117 Clear bed to continue\nM0\n";

/// On-device name of the failure hold program.
pub const HOLD_FILE_NAME: &str = "hold.gcode";

/// Append the end-of-print pause directive to a staged artifact.
pub fn append_end_pause(path: &Path) -> Result<()> {
    let mut file = OpenOptions::new().append(true).open(path)?;
    file.write_all(END_PAUSE_DIRECTIVE.as_bytes())?;
    Ok(())
}

/// The hold program shown on the device panel after a failed print.
pub fn failure_hold(job: &JobId) -> String {
    format!("M117 ID#{job} failed\nM0\nM117 Idle\n")
}

/// Write the failure hold program for `job` into `dir` and return its path.
pub fn write_failure_hold(dir: &Path, job: &JobId) -> Result<PathBuf> {
    let path = dir.join(HOLD_FILE_NAME);
    std::fs::write(&path, failure_hold(job))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_pause_is_appended_after_existing_gcode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("part.gcode");
        std::fs::write(&path, "G28\nG1 X10\n").expect("write");

        append_end_pause(&path).expect("append");

        let contents = std::fs::read_to_string(&path).expect("read");
        assert!(contents.starts_with("G28\n"));
        assert!(contents.ends_with(END_PAUSE_DIRECTIVE));
    }

    #[test]
    fn failure_hold_names_the_job() {
        let job = JobId::new();
        let program = failure_hold(&job);
        assert!(program.contains(&format!("ID#{job} failed")));
        assert!(program.contains("M0"));
        assert!(program.ends_with("M117 Idle\n"));
    }

    #[test]
    fn failure_hold_file_uses_fixed_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = JobId::new();
        let path = write_failure_hold(dir.path(), &job).expect("write hold");
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(HOLD_FILE_NAME));
        let contents = std::fs::read_to_string(&path).expect("read");
        assert_eq!(contents, failure_hold(&job));
    }
}
