//! HTTP client for the control API, used by the CLI.

use crate::api::{ErrorResponse, ReloadRequest};
use crate::control::{OperationOutcome, ReloadOutcome};
use crate::supervisor::ServiceStatus;
use fleet_compliance::ComplianceReport;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid control URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Supervisor unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Supervisor returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Decode(String),
}

pub struct ControlClient {
    base_url: String,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ControlClient {
    /// `base_url` like `http://127.0.0.1:9400`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn health(&self) -> Result<bool, ClientError> {
        let (status, _) = self.send(Method::GET, "/api/v1/health", None).await?;
        Ok(status.is_success())
    }

    pub async fn list(&self) -> Result<Vec<ServiceStatus>, ClientError> {
        self.call(Method::GET, "/api/v1/services", None).await
    }

    pub async fn status(&self, name: &str) -> Result<ServiceStatus, ClientError> {
        self.call(Method::GET, &format!("/api/v1/services/{}", name), None)
            .await
    }

    pub async fn start(&self, name: &str, skip_compliance_check: bool) -> Result<OperationOutcome, ClientError> {
        let path = if skip_compliance_check {
            format!("/api/v1/services/{}/start?skip_compliance_check=true", name)
        } else {
            format!("/api/v1/services/{}/start", name)
        };
        self.outcome(&path).await
    }

    pub async fn stop(&self, name: &str) -> Result<OperationOutcome, ClientError> {
        self.outcome(&format!("/api/v1/services/{}/stop", name)).await
    }

    pub async fn restart(&self, name: &str) -> Result<OperationOutcome, ClientError> {
        self.outcome(&format!("/api/v1/services/{}/restart", name))
            .await
    }

    pub async fn start_all(&self) -> Result<Vec<OperationOutcome>, ClientError> {
        self.call(Method::POST, "/api/v1/start-all", None).await
    }

    pub async fn shutdown(&self) -> Result<Vec<OperationOutcome>, ClientError> {
        self.call(Method::POST, "/api/v1/shutdown", None).await
    }

    pub async fn compliance(&self, name: Option<&str>) -> Result<ComplianceReport, ClientError> {
        let path = match name {
            Some(name) => format!("/api/v1/compliance/{}", name),
            None => "/api/v1/compliance".to_string(),
        };
        self.call(Method::GET, &path, None).await
    }

    pub async fn reload(&self, path: Option<PathBuf>) -> Result<ReloadOutcome, ClientError> {
        let body = serde_json::to_vec(&ReloadRequest { path })
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let (_, bytes) = self.send(Method::POST, "/api/v1/reload", Some(body)).await?;
        decode(&bytes)
    }

    /// Operation endpoints answer with an outcome whether or not it succeeded.
    async fn outcome(&self, path: &str) -> Result<OperationOutcome, ClientError> {
        let (status, bytes) = self.send(Method::POST, path, None).await?;
        match decode::<OperationOutcome>(&bytes) {
            Ok(outcome) => Ok(outcome),
            Err(_) => Err(status_error(status, &bytes)),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, ClientError> {
        let (status, bytes) = self.send(method, path, body).await?;
        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        decode(&bytes)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), ClientError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let uri = url.parse::<Uri>().map_err(|e| ClientError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header("content-type", "application/json");
        }
        let req = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| ClientError::InvalidUrl {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ClientError::Unreachable {
                url: self.base_url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Decode(format!("Failed to read response: {}", e)))?
            .to_bytes();

        Ok((status, bytes))
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ClientError> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

fn status_error(status: StatusCode, bytes: &[u8]) -> ClientError {
    let message = serde_json::from_slice::<ErrorResponse>(bytes)
        .map(|e| e.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned());
    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}
