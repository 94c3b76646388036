// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-printer state machine.
//
// A `Printer` pairs a registry record with a live client handle and the
// derived state.  `ConnectionOffline` and `Invalid` are sticky: a printer in
// one of those states is not queried again until a forced refresh
// (`ConnectionOffline`) or ever (`Invalid`).

use std::sync::Arc;

use tracing::{debug, warn};

use druckwerk_core::error::DruckwerkError;
use druckwerk_core::types::{DeviceStatus, PrinterId, PrinterRecord, PrinterState};

use crate::client::{ConnectError, PrinterClient, PrinterConnector};

pub struct Printer {
    id: PrinterId,
    name: String,
    printer_type: String,
    endpoint: String,
    api_key: String,
    state: PrinterState,
    client: Option<Box<dyn PrinterClient>>,
    connector: Arc<dyn PrinterConnector>,
}

impl Printer {
    pub fn new(record: &PrinterRecord, connector: Arc<dyn PrinterConnector>) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            printer_type: record.printer_type.clone(),
            endpoint: record.endpoint.clone(),
            api_key: record.api_key.clone().unwrap_or_default(),
            state: PrinterState::Uninitialized,
            client: None,
            connector,
        }
    }

    pub fn id(&self) -> PrinterId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn printer_type(&self) -> &str {
        &self.printer_type
    }

    pub fn state(&self) -> &PrinterState {
        &self.state
    }

    pub fn client(&self) -> Option<&dyn PrinterClient> {
        self.client.as_deref()
    }

    /// Establish (or re-establish) the client handle.  On failure the state
    /// becomes `ConnectionOffline` or `Invalid` depending on the error class.
    pub async fn connect(&mut self) -> bool {
        match self.connector.connect(&self.endpoint, &self.api_key).await {
            Ok(client) => {
                self.client = Some(client);
                true
            }
            Err(ConnectError::Unreachable(detail)) => {
                warn!(printer = %self.name, endpoint = %self.endpoint, detail = %detail, "controller unreachable");
                self.state = PrinterState::ConnectionOffline;
                false
            }
            Err(ConnectError::InvalidConfig(detail)) => {
                warn!(printer = %self.name, endpoint = %self.endpoint, detail = %detail, "printer configuration invalid");
                self.state = PrinterState::Invalid;
                false
            }
        }
    }

    /// Query the device and re-derive the state.  Returns whether a fresh
    /// status was obtained.
    ///
    /// `force` allows a `ConnectionOffline` printer to attempt a reconnect;
    /// without it the offline state is left untouched.  `Invalid` is never
    /// retried.
    pub async fn refresh_state(&mut self, force: bool) -> bool {
        match self.state {
            PrinterState::Invalid => return false,
            PrinterState::ConnectionOffline if !force => return false,
            _ => {}
        }
        if matches!(self.state, PrinterState::ConnectionOffline) && !self.connect().await {
            return false;
        }
        if self.client.is_none() && !self.connect().await {
            return false;
        }
        let Some(client) = self.client.as_ref() else {
            return false;
        };

        match client.status().await {
            Ok(status) => {
                let next = PrinterState::derive(&status);
                if next != self.state {
                    debug!(printer = %self.name, from = %self.state, to = %next, "printer state changed");
                }
                self.state = next;
                true
            }
            Err(DruckwerkError::Device(detail)) => {
                warn!(printer = %self.name, detail = %detail, "device offline");
                self.state = PrinterState::DeviceOffline;
                false
            }
            Err(e) => {
                warn!(printer = %self.name, error = %e, "lost contact with controller");
                self.state = PrinterState::ConnectionOffline;
                false
            }
        }
    }

    /// Full status report, synthesized for printers that cannot be queried
    /// so callers always get the device payload shape.
    pub async fn full_status(&self) -> DeviceStatus {
        if self.state.is_sticky() || self.state == PrinterState::Uninitialized {
            return DeviceStatus::synthesized(self.state.text());
        }
        let Some(client) = self.client.as_ref() else {
            return DeviceStatus::synthesized(self.state.text());
        };
        match client.status().await {
            Ok(status) => status,
            Err(DruckwerkError::Device(_)) => DeviceStatus::synthesized("Printer Offline"),
            Err(_) => DeviceStatus::synthesized("Connection Offline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use async_trait::async_trait;

    use druckwerk_core::error::Result;
    use druckwerk_core::types::{FolderListing, OPERATIONAL_TEXT};

    /// Scripted connector: each `connect` consumes the next outcome.
    struct ScriptedConnector {
        outcomes: Mutex<Vec<ConnectOutcome>>,
        connects: Mutex<usize>,
        queries: Arc<Mutex<usize>>,
    }

    enum ConnectOutcome {
        Ok(Vec<Result<DeviceStatus>>),
        Unreachable,
        Invalid,
    }

    struct ScriptedClient {
        responses: Mutex<Vec<Result<DeviceStatus>>>,
        queries: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl PrinterClient for ScriptedClient {
        async fn status(&self) -> Result<DeviceStatus> {
            *self.queries.lock().unwrap() += 1;
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(DeviceStatus::synthesized(OPERATIONAL_TEXT));
            }
            responses.remove(0)
        }

        async fn list_folder(&self, _path: &str, _recursive: bool) -> Result<FolderListing> {
            Ok(FolderListing::default())
        }

        async fn delete_file(&self, _path: &str) -> Result<()> {
            Ok(())
        }

        async fn upload_file(&self, _local: &std::path::Path) -> Result<()> {
            Ok(())
        }

        async fn move_file(&self, _src: &str, _dst: &str) -> Result<()> {
            Ok(())
        }

        async fn select_file(&self, _path: &str, _print: bool) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl PrinterConnector for ScriptedConnector {
        async fn connect(
            &self,
            _endpoint: &str,
            _api_key: &str,
        ) -> std::result::Result<Box<dyn PrinterClient>, ConnectError> {
            *self.connects.lock().unwrap() += 1;
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.is_empty() {
                ConnectOutcome::Ok(Vec::new())
            } else {
                outcomes.remove(0)
            };
            match outcome {
                ConnectOutcome::Ok(responses) => Ok(Box::new(ScriptedClient {
                    responses: Mutex::new(responses),
                    queries: Arc::clone(&self.queries),
                })),
                ConnectOutcome::Unreachable => {
                    Err(ConnectError::Unreachable("no route to host".into()))
                }
                ConnectOutcome::Invalid => Err(ConnectError::InvalidConfig("bad key".into())),
            }
        }
    }

    fn scripted(outcomes: Vec<ConnectOutcome>) -> Arc<ScriptedConnector> {
        Arc::new(ScriptedConnector {
            outcomes: Mutex::new(outcomes),
            connects: Mutex::new(0),
            queries: Arc::new(Mutex::new(0)),
        })
    }

    fn record() -> PrinterRecord {
        PrinterRecord {
            id: PrinterId::new(),
            name: "mk3-left".into(),
            printer_type: "prusa-mk3".into(),
            endpoint: "10.0.0.5".into(),
            api_key: Some("key".into()),
        }
    }

    #[tokio::test]
    async fn healthy_refresh_derives_operational() {
        let connector = scripted(vec![]);
        let mut printer = Printer::new(&record(), connector);
        assert!(printer.connect().await);

        assert!(printer.refresh_state(false).await);
        assert_eq!(printer.state(), &PrinterState::Operational);

        // A second refresh is an ordinary re-query, not a reconnect.
        assert!(printer.refresh_state(false).await);
        assert_eq!(printer.state(), &PrinterState::Operational);
    }

    #[tokio::test]
    async fn unreachable_controller_is_sticky_until_forced() {
        let connector = scripted(vec![ConnectOutcome::Unreachable, ConnectOutcome::Ok(vec![])]);
        let mut printer = Printer::new(
            &record(),
            Arc::clone(&connector) as Arc<dyn PrinterConnector>,
        );
        assert!(!printer.connect().await);
        assert_eq!(printer.state(), &PrinterState::ConnectionOffline);

        // Unforced refresh does not touch the network at all.
        assert!(!printer.refresh_state(false).await);
        assert_eq!(*connector.connects.lock().unwrap(), 1);
        assert_eq!(*connector.queries.lock().unwrap(), 0);

        // Forced refresh reconnects and recovers.
        assert!(printer.refresh_state(true).await);
        assert_eq!(printer.state(), &PrinterState::Operational);
        assert_eq!(*connector.connects.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn invalid_configuration_is_terminal() {
        let connector = scripted(vec![ConnectOutcome::Invalid, ConnectOutcome::Ok(vec![])]);
        let mut printer = Printer::new(
            &record(),
            Arc::clone(&connector) as Arc<dyn PrinterConnector>,
        );
        assert!(!printer.connect().await);
        assert_eq!(printer.state(), &PrinterState::Invalid);

        // Even a forced refresh never retries an invalid printer.
        assert!(!printer.refresh_state(true).await);
        assert_eq!(printer.state(), &PrinterState::Invalid);
        assert_eq!(*connector.connects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn transport_failure_during_query_demotes_to_offline() {
        let connector = scripted(vec![ConnectOutcome::Ok(vec![
            Ok(DeviceStatus::synthesized(OPERATIONAL_TEXT)),
            Err(DruckwerkError::Connection("connection reset".into())),
        ])]);
        let mut printer = Printer::new(
            &record(),
            Arc::clone(&connector) as Arc<dyn PrinterConnector>,
        );
        assert!(printer.connect().await);

        assert!(printer.refresh_state(false).await);
        assert_eq!(printer.state(), &PrinterState::Operational);

        assert!(!printer.refresh_state(false).await);
        assert_eq!(printer.state(), &PrinterState::ConnectionOffline);

        // Now sticky: no further queries without force.
        let queries_before = *connector.queries.lock().unwrap();
        assert!(!printer.refresh_state(false).await);
        assert_eq!(*connector.queries.lock().unwrap(), queries_before);
    }

    #[tokio::test]
    async fn device_level_failure_is_device_offline() {
        let connector = scripted(vec![ConnectOutcome::Ok(vec![Err(DruckwerkError::Device(
            "printer not operational".into(),
        ))])]);
        let mut printer = Printer::new(&record(), connector);
        assert!(printer.connect().await);

        assert!(!printer.refresh_state(false).await);
        assert_eq!(printer.state(), &PrinterState::DeviceOffline);
        assert!(!printer.state().is_sticky());
    }

    #[tokio::test]
    async fn full_status_is_synthesized_for_sticky_states() {
        let connector = scripted(vec![ConnectOutcome::Unreachable]);
        let mut printer = Printer::new(&record(), connector);
        assert!(!printer.connect().await);

        let status = printer.full_status().await;
        assert_eq!(status.state.text, "Connection Offline");
        assert!(status.temperature.is_none());
    }
}
