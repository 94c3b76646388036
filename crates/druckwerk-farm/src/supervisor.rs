// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The orchestration loop.
//
// Each cycle refreshes the tracked printer set from the registry, re-derives
// every printer's state, inspects working folders for finished prints, and
// assigns the oldest compatible queued job to each idle printer.  Link
// failures to a single printer are absorbed (logged, printer skipped);
// queue store failures abort the cycle.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use druckwerk_core::config::FarmConfig;
use druckwerk_core::error::Result;
use druckwerk_core::types::{FolderEntry, PrinterId};
use druckwerk_store::QueueStore;

use crate::client::{PrinterClient, PrinterConnector};
use crate::gcode;
use crate::printer::Printer;

/// Analysed filament length is scaled by this factor to approximate total
/// material drawn, covering priming and purge moves the analysis omits.
const MATERIAL_USED_FACTOR: f64 = 3.0;

pub struct Supervisor {
    store: Arc<dyn QueueStore>,
    connector: Arc<dyn PrinterConnector>,
    config: FarmConfig,
    printers: BTreeMap<PrinterId, Printer>,
    /// Scratch space for staged artifacts and hold programs.  Removed with
    /// the supervisor.
    staging: TempDir,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn QueueStore>,
        connector: Arc<dyn PrinterConnector>,
        config: FarmConfig,
    ) -> Result<Self> {
        let staging = tempfile::tempdir()?;
        info!(
            interval_secs = config.cycle_interval_secs,
            working_folder = %config.working_folder,
            "supervisor created"
        );
        Ok(Self {
            store,
            connector,
            config,
            printers: BTreeMap::new(),
            staging,
        })
    }

    pub fn printer(&self, id: &PrinterId) -> Option<&Printer> {
        self.printers.get(id)
    }

    pub fn printers(&self) -> impl Iterator<Item = &Printer> {
        self.printers.values()
    }

    /// Sync the tracked printer set with the registry.  Registry entries
    /// without an API key are placeholders and are not tracked; printers are
    /// never dropped once tracked.
    pub fn refresh_printers(&mut self) -> Result<()> {
        for record in self.store.all_printer_details()? {
            if record.api_key.is_none() {
                debug!(printer_id = %record.id, name = %record.name, "skipping placeholder registry entry");
                continue;
            }
            if let Entry::Vacant(slot) = self.printers.entry(record.id) {
                info!(
                    printer_id = %record.id,
                    name = %record.name,
                    printer_type = %record.printer_type,
                    "tracking new printer"
                );
                slot.insert(Printer::new(&record, Arc::clone(&self.connector)));
            }
        }
        Ok(())
    }

    /// Re-derive the state of every tracked printer.  With `force`,
    /// connection-offline printers get a reconnect attempt.
    pub async fn update_printer_states(&mut self, force: bool) {
        for printer in self.printers.values_mut() {
            printer.refresh_state(force).await;
        }
    }

    /// Inspect working folders and hand out new jobs.
    pub async fn check_printer_states(&self) -> Result<()> {
        for printer in self.printers.values() {
            self.check_printer(printer).await?;
        }
        Ok(())
    }

    /// One full orchestration pass.
    #[instrument(skip(self))]
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.refresh_printers()?;
        self.update_printer_states(true).await;
        for printer in self.printers.values() {
            debug!(
                printer = %printer.name(),
                printer_type = %printer.printer_type(),
                state = %printer.state(),
                "printer state"
            );
        }
        self.check_printer_states().await
    }

    /// Run cycles until `shutdown` flips to true or its sender is dropped.
    /// A failed cycle is logged and retried after the normal interval.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.cycle_interval();
        info!(interval_secs = interval.as_secs(), "supervisor loop started");
        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "orchestration cycle failed; retrying after the interval");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested; supervisor stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn check_printer(&self, printer: &Printer) -> Result<()> {
        if !printer.state().is_assignable() {
            return Ok(());
        }
        let Some(client) = printer.client() else {
            return Ok(());
        };

        let listing = match client.list_folder(&self.config.working_folder, true).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(printer = %printer.name(), error = %e, "working folder listing failed");
                return Ok(());
            }
        };

        match listing.children.as_slice() {
            [] => {}
            [entry] => {
                if !self.handle_finished(printer, client, entry).await? {
                    return Ok(());
                }
            }
            entries => {
                error!(
                    printer = %printer.name(),
                    count = entries.len(),
                    "multiple artifacts in the working folder; operator intervention required"
                );
                return Ok(());
            }
        }

        self.assign_next(printer, client).await
    }

    /// Finalize the job behind a finished working-folder entry.  Returns
    /// whether the printer is clear to take a new job this cycle.
    async fn handle_finished(
        &self,
        printer: &Printer,
        client: &dyn PrinterClient,
        entry: &FolderEntry,
    ) -> Result<bool> {
        let Some(job_id) = entry.job_id() else {
            error!(
                printer = %printer.name(),
                file = %entry.name,
                "unrecognized artifact in the working folder; operator intervention required"
            );
            return Ok(false);
        };
        let Some(status) = self.store.status(&job_id)? else {
            error!(
                printer = %printer.name(),
                job_id = %job_id,
                "working folder artifact matches no known job; operator intervention required"
            );
            return Ok(false);
        };
        let Some(prints) = entry.prints.as_ref() else {
            error!(
                printer = %printer.name(),
                job_id = %job_id,
                "finished artifact has no print metadata; operator intervention required"
            );
            return Ok(false);
        };
        let device_path = format!("local/{}/{}", self.config.working_folder, entry.name);

        if prints.success {
            if !status.is_terminal() {
                let (Some(last), Some(length)) = (prints.last.as_ref(), entry.filament_length_mm())
                else {
                    error!(
                        printer = %printer.name(),
                        job_id = %job_id,
                        "success report is missing measurements; operator intervention required"
                    );
                    return Ok(false);
                };
                let duration_secs = last.print_time.round() as i64;
                let material_mm = (length * MATERIAL_USED_FACTOR).round() as i64;
                self.store
                    .mark_complete(&job_id, &printer.id(), duration_secs, material_mm)?;
                info!(
                    job_id = %job_id,
                    printer = %printer.name(),
                    duration_secs,
                    material_mm,
                    "print complete"
                );
            }
            if let Err(e) = client.delete_file(&device_path).await {
                warn!(printer = %printer.name(), error = %e, "could not delete finished artifact");
            }
            Ok(true)
        } else {
            if !status.is_terminal() {
                self.store.mark_failed(&job_id)?;
                info!(job_id = %job_id, printer = %printer.name(), "print failed");
                // Park a hold program so the panel shows the failure until
                // an operator clears it.  The device stays occupied.
                let hold = gcode::write_failure_hold(self.staging.path(), &job_id)?;
                let parked = match client.upload_file(&hold).await {
                    Ok(()) => client.select_file(gcode::HOLD_FILE_NAME, true).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = parked {
                    warn!(printer = %printer.name(), error = %e, "could not park failure notice on device");
                }
                let _ = std::fs::remove_file(&hold);
            }
            if let Err(e) = client.delete_file(&device_path).await {
                warn!(printer = %printer.name(), error = %e, "could not delete failed artifact");
            }
            Ok(false)
        }
    }

    /// Stage, upload, and start the oldest compatible queued job.
    /// `mark_running` comes last: any failure before it leaves the job
    /// queued, to be retried on a later cycle.
    async fn assign_next(&self, printer: &Printer, client: &dyn PrinterClient) -> Result<()> {
        let Some(job_id) = self.store.next_print(printer.printer_type())? else {
            return Ok(());
        };
        let staged = self.store.stage_artifact(&job_id, self.staging.path())?;
        gcode::append_end_pause(&staged)?;

        let file_name = format!("{job_id}.gcode");
        let device_path = format!("{}/{file_name}", self.config.working_folder);
        let started = self
            .start_print(client, &staged, &file_name, &device_path)
            .await;
        let _ = std::fs::remove_file(&staged);

        match started {
            Ok(()) => {
                self.store.mark_running(&job_id, &printer.id())?;
                info!(job_id = %job_id, printer = %printer.name(), "print started");
            }
            Err(e) => {
                warn!(
                    job_id = %job_id,
                    printer = %printer.name(),
                    error = %e,
                    "job start failed; job stays queued"
                );
            }
        }
        Ok(())
    }

    async fn start_print(
        &self,
        client: &dyn PrinterClient,
        staged: &Path,
        file_name: &str,
        device_path: &str,
    ) -> Result<()> {
        client.upload_file(staged).await?;
        client.move_file(file_name, device_path).await?;
        client.select_file(device_path, true).await?;
        Ok(())
    }
}
