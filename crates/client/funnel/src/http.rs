//! JSON over HTTP, shared by the REST and GraphQL clients.

use reqwest::{RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use fp_chain::NetworkId;

use crate::FunnelError;

#[derive(Debug, Clone)]
pub struct JsonClient {
    network: NetworkId,
    client: reqwest::Client,
    base_url: Url,
}

impl JsonClient {
    pub fn new(network: NetworkId, base_url: Url) -> Self {
        Self { network, client: reqwest::Client::new(), base_url }
    }

    pub fn network(&self) -> &NetworkId {
        &self.network
    }

    fn url(&self, path: &str) -> Result<Url, FunnelError> {
        self.base_url.join(path).map_err(|e| FunnelError::Config(format!("invalid path {path}: {e}")))
    }

    /// `None` on 404. Paths are relative to the base url, without a leading `/`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, FunnelError> {
        let url = self.url(path)?;
        self.send(self.client.get(url)).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, FunnelError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        self.send(self.client.post(url).json(body))
            .await?
            .ok_or_else(|| FunnelError::invalid_response(&self.network, format!("{path} not found")))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, FunnelError> {
        let response = request.send().await.map_err(|e| FunnelError::rpc(&self.network, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(FunnelError::RateLimited {
                    network: self.network.clone(),
                    message: format!("HTTP {}", response.status()),
                })
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(FunnelError::rpc(&self.network, format!("HTTP {status}: {body}")));
            }
            _ => {}
        }
        let body = response.bytes().await.map_err(|e| FunnelError::rpc(&self.network, e))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| FunnelError::invalid_response(&self.network, e.to_string()))
    }
}
