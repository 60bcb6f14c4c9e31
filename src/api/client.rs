//! Client for the driver REST API

use super::rest::driver_path;
use super::types::{CreateResponse, DriverRequest, NameResponse, RemoveResponse};
use crate::common::{DriverOptions, Error, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct DriverClient {
    http: reqwest::Client,
    base_url: String,
    driver: String,
}

impl DriverClient {
    pub fn new(base_url: &str, driver: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            driver: driver.to_string(),
        })
    }

    /// Create a volume, returning its id
    pub async fn create(&self, name: &str, opts: DriverOptions) -> Result<String> {
        let request = DriverRequest {
            name: name.to_string(),
            opts: Some(opts),
        };
        let response: CreateResponse = self.call("Create", &request).await?;
        match response {
            CreateResponse { err: Some(err), .. } => Err(Error::Other(err)),
            CreateResponse { id, .. } => Ok(id.unwrap_or_default()),
        }
    }

    pub async fn remove(&self, name: &str) -> Result<()> {
        let request = DriverRequest {
            name: name.to_string(),
            opts: None,
        };
        let response: RemoveResponse = self.call("Remove", &request).await?;
        match response.err {
            Some(err) => Err(Error::Other(err)),
            None => Ok(()),
        }
    }

    pub async fn name(&self, name: &str) -> Result<NameResponse> {
        let request = DriverRequest {
            name: name.to_string(),
            opts: None,
        };
        let response: NameResponse = self.call("Name", &request).await?;
        match response.err {
            Some(err) => Err(Error::Other(err)),
            None => Ok(response),
        }
    }

    async fn call<T: DeserializeOwned>(&self, verb: &str, request: &DriverRequest) -> Result<T> {
        let url = format!("{}{}", self.base_url, driver_path(&self.driver, verb));
        tracing::debug!(url = %url, volume = %request.name, "Driver API call");

        let response = self.http.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("{} {}: {}", verb, status, body)));
        }
        Ok(response.json().await?)
    }
}
