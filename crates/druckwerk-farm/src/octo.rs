// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// REST client for OctoPrint-compatible printer controllers.
//
// Error mapping: transport failures become `Connection` (the controller is
// unreachable), HTTP-level failures become `Device` (the controller answered
// but refused), and both are folded into printer state by the caller.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{StatusCode, Url};
use tracing::debug;

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{DeviceStatus, FolderListing};

use crate::client::{ConnectError, PrinterClient, PrinterConnector};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connector for OctoPrint-compatible controllers over plain HTTP.
pub struct OctoConnector {
    http: reqwest::Client,
}

impl OctoConnector {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DruckwerkError::Connection(format!("http client init: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl PrinterConnector for OctoConnector {
    async fn connect(
        &self,
        endpoint: &str,
        api_key: &str,
    ) -> std::result::Result<Box<dyn PrinterClient>, ConnectError> {
        if api_key.trim().is_empty() {
            return Err(ConnectError::InvalidConfig("empty API key".into()));
        }
        let base = Url::parse(&format!("http://{endpoint}/"))
            .map_err(|e| ConnectError::InvalidConfig(format!("endpoint {endpoint:?}: {e}")))?;

        let client = OctoClient {
            http: self.http.clone(),
            base,
            api_key: api_key.to_string(),
        };

        // Probe the version endpoint to confirm reachability and credential
        // before handing the client out.
        let url = client.url("api/version")?;
        let response = client
            .http
            .get(url)
            .header("X-Api-Key", &client.api_key)
            .send()
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                debug!(endpoint, "printer controller reachable");
                Ok(Box::new(client))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ConnectError::InvalidConfig(
                format!("credential rejected by {endpoint}"),
            )),
            status => Err(ConnectError::Unreachable(format!(
                "version probe returned {status}"
            ))),
        }
    }
}

struct OctoClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
}

impl OctoClient {
    fn url(&self, path: &str) -> std::result::Result<Url, ConnectError> {
        self.base
            .join(path)
            .map_err(|e| ConnectError::InvalidConfig(format!("path {path:?}: {e}")))
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| DruckwerkError::Device(format!("path {path:?}: {e}")))
    }

    fn check(op: &str, response: &reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            // The controller answers 409 when the printer itself is not
            // connected over serial.
            return Err(DruckwerkError::Device(format!(
                "{op}: printer not operational"
            )));
        }
        Err(DruckwerkError::Device(format!("{op} returned {status}")))
    }

    async fn get(&self, op: &str, path: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(self.api_url(path)?)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| DruckwerkError::Connection(format!("{op}: {e}")))?;
        Self::check(op, &response)?;
        Ok(response)
    }

    async fn post_command(&self, op: &str, path: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(self.api_url(path)?)
            .header("X-Api-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DruckwerkError::Connection(format!("{op}: {e}")))?;
        Self::check(op, &response)
    }
}

#[async_trait]
impl PrinterClient for OctoClient {
    async fn status(&self) -> Result<DeviceStatus> {
        let response = self.get("status", "api/printer").await?;
        response
            .json::<DeviceStatus>()
            .await
            .map_err(|e| DruckwerkError::Device(format!("status payload: {e}")))
    }

    async fn list_folder(&self, path: &str, recursive: bool) -> Result<FolderListing> {
        let mut url = self.api_url(&format!("api/files/local/{path}"))?;
        url.query_pairs_mut()
            .append_pair("recursive", if recursive { "true" } else { "false" });
        let response = self
            .http
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| DruckwerkError::Connection(format!("list_folder: {e}")))?;
        Self::check("list_folder", &response)?;
        response
            .json::<FolderListing>()
            .await
            .map_err(|e| DruckwerkError::Device(format!("listing payload: {e}")))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.api_url(&format!("api/files/{path}"))?)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| DruckwerkError::Connection(format!("delete_file: {e}")))?;
        Self::check("delete_file", &response)
    }

    async fn upload_file(&self, local: &Path) -> Result<()> {
        let bytes = tokio::fs::read(local).await?;
        let file_name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DruckwerkError::Artifact(format!("unusable file name: {local:?}")))?
            .to_string();

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let response = self
            .http
            .post(self.api_url("api/files/local")?)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DruckwerkError::Connection(format!("upload_file: {e}")))?;
        Self::check("upload_file", &response)
    }

    async fn move_file(&self, src: &str, dst: &str) -> Result<()> {
        self.post_command(
            "move_file",
            &format!("api/files/local/{src}"),
            serde_json::json!({ "command": "move", "destination": dst }),
        )
        .await
    }

    async fn select_file(&self, path: &str, print: bool) -> Result<()> {
        self.post_command(
            "select_file",
            &format!("api/files/local/{path}"),
            serde_json::json!({ "command": "select", "print": print }),
        )
        .await
    }
}
