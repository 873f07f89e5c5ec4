//! HTTP client for an IPFS-compatible pinning service.
//!
//! POST {endpoint}/api/v0/add  (multipart "file") -> {"Hash": "<cid>", ...}
//! POST {endpoint}/api/v0/cat?arg=<cid>            -> raw bytes
//! POST {endpoint}/api/v0/id                      -> connectivity probe
//!
//! Every request carries the `pinata_api_key` / `pinata_secret_api_key` headers.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::storage::backend::{BackendError, BlobBackend, Cid};

pub struct PinningBackend {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl PinningBackend {
    pub fn new(endpoint: &str, api_key: &str, secret: &str) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "pinata_api_key",
            HeaderValue::from_str(api_key)
                .map_err(|_| BackendError::Unavailable("invalid API key header".into()))?,
        );
        headers.insert(
            "pinata_secret_api_key",
            HeaderValue::from_str(secret)
                .map_err(|_| BackendError::Unavailable("invalid API secret header".into()))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.endpoint, path)
    }

    /// Verify the service is reachable and accepts our credentials.
    pub async fn probe(&self) -> Result<(), BackendError> {
        let resp = self
            .http
            .post(self.url("id"))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp.status(), "id")?;
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    BackendError::Unavailable(e.to_string())
}

fn check_status(status: StatusCode, what: &str) -> Result<(), BackendError> {
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound(what.to_string()));
    }
    if !status.is_success() {
        return Err(BackendError::Unavailable(format!(
            "{} returned {}",
            what, status
        )));
    }
    Ok(())
}

#[async_trait]
impl BlobBackend for PinningBackend {
    async fn add(&self, data: &[u8]) -> Result<Cid, BackendError> {
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name("blob");
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(self.url("add"))
            .query(&[("pin", "true")])
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        // A 404 on add means a misconfigured endpoint, not a missing blob
        if !resp.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "add returned {}",
                resp.status()
            )));
        }

        let body: AddResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("add response: {}", e)))?;
        Ok(Cid::new(body.hash))
    }

    async fn cat(&self, cid: &Cid) -> Result<Vec<u8>, BackendError> {
        let resp = self
            .http
            .post(self.url("cat"))
            .query(&[("arg", cid.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        check_status(resp.status(), cid.as_str())?;

        let bytes = resp.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}
