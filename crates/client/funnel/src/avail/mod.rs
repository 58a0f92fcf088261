//! Avail, through the REST API of a light client running in app mode.
//!
//! Game inputs are the data submissions of the configured application id. Headers are expected to carry the
//! block timestamp (milliseconds, as set by the timestamp inherent).

pub mod source;

use async_trait::async_trait;
use base64::Engine;
use fp_chain::NetworkId;
use serde::Deserialize;
use url::Url;

use crate::http::JsonClient;
use crate::FunnelError;

pub use source::AvailBlockSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailHeader {
    pub number: u64,
    pub hash: String,
    /// Unix seconds.
    pub timestamp: u64,
}

/// A data submission of the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailSubmission {
    pub data: Vec<u8>,
    /// SS58 address of the submitter.
    pub sender: String,
    pub tx_hash: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailRpc: Send + Sync {
    /// Last block whose data the light client has verified.
    async fn latest_block(&self) -> Result<u64, FunnelError>;
    async fn header(&self, block_number: u64) -> Result<Option<AvailHeader>, FunnelError>;
    async fn submissions(&self, block_number: u64) -> Result<Option<Vec<AvailSubmission>>, FunnelError>;
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    app_id: Option<u32>,
    blocks: StatusBlocks,
}

#[derive(Deserialize)]
struct StatusBlocks {
    latest: u64,
    #[serde(default)]
    available: Option<BlockRange>,
}

#[derive(Deserialize)]
struct BlockRange {
    last: u64,
}

#[derive(Deserialize)]
struct HeaderResponse {
    hash: String,
    number: u64,
    /// Milliseconds.
    timestamp: u64,
}

#[derive(Deserialize)]
struct DataResponse {
    #[serde(default)]
    data_transactions: Vec<DataTransaction>,
}

#[derive(Deserialize)]
struct DataTransaction {
    /// Base64.
    data: String,
    sender: String,
    #[serde(default)]
    tx_hash: Option<String>,
}

pub struct AvailLightClient {
    http: JsonClient,
    app_id: u32,
}

impl AvailLightClient {
    pub fn new(network: NetworkId, url: Url, app_id: u32) -> Self {
        Self { http: JsonClient::new(network, url), app_id }
    }

    async fn status(&self) -> Result<StatusResponse, FunnelError> {
        self.http
            .get("v2/status")
            .await?
            .ok_or_else(|| FunnelError::invalid_response(self.http.network(), "status endpoint not found"))
    }

    /// Fails when the light client follows another application.
    pub async fn check_app_id(&self) -> Result<(), FunnelError> {
        match self.status().await?.app_id {
            Some(app_id) if app_id != self.app_id => Err(FunnelError::Config(format!(
                "light client of {} runs app {app_id}, expected {}",
                self.http.network(),
                self.app_id
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl AvailRpc for AvailLightClient {
    async fn latest_block(&self) -> Result<u64, FunnelError> {
        let blocks = self.status().await?.blocks;
        Ok(blocks.available.map_or(blocks.latest, |available| available.last))
    }

    async fn header(&self, block_number: u64) -> Result<Option<AvailHeader>, FunnelError> {
        let header: Option<HeaderResponse> = self.http.get(&format!("v2/blocks/{block_number}/header")).await?;
        Ok(header.map(|header| AvailHeader {
            number: header.number,
            hash: header.hash,
            timestamp: header.timestamp / 1000,
        }))
    }

    async fn submissions(&self, block_number: u64) -> Result<Option<Vec<AvailSubmission>>, FunnelError> {
        let data: Option<DataResponse> =
            self.http.get(&format!("v2/blocks/{block_number}/data?fields=data,extrinsic")).await?;
        let Some(data) = data else { return Ok(None) };
        data.data_transactions
            .into_iter()
            .map(|tx| {
                let data = base64::engine::general_purpose::STANDARD.decode(&tx.data).map_err(|e| {
                    FunnelError::invalid_response(self.http.network(), format!("block #{block_number}: {e}"))
                })?;
                Ok(AvailSubmission { data, sender: tx.sender, tx_hash: tx.tx_hash })
            })
            .collect::<Result<_, _>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use httpmock::MockServer;
    use serde_json::json;

    fn client(server: &MockServer, app_id: u32) -> AvailLightClient {
        let network = NetworkId::from("polkadot:b91746b45e0346cc2f815a520b9c6cb4");
        AvailLightClient::new(network, server.base_url().parse().unwrap(), app_id)
    }

    #[tokio::test]
    async fn latest_block_prefers_verified_blocks() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/v2/status");
            then.status(200).json_body(json!({
                "modes": ["light", "app"],
                "app_id": 7,
                "blocks": { "latest": 120, "available": { "first": 10, "last": 118 } }
            }));
        });
        let client = client(&server, 7);
        assert_eq!(client.latest_block().await.unwrap(), 118);
        client.check_app_id().await.unwrap();

        let other = AvailLightClient { app_id: 8, ..client };
        assert_matches!(other.check_app_id().await, Err(FunnelError::Config(_)));
    }

    #[tokio::test]
    async fn headers_and_submissions() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/v2/blocks/12/header");
            then.status(200).json_body(json!({ "hash": "0xabc", "number": 12, "timestamp": 1_700_000_006_500u64 }));
        });
        server.mock(|when, then| {
            when.method("GET").path("/v2/blocks/12/data").query_param("fields", "data,extrinsic");
            then.status(200).json_body(json!({
                "block_number": 12,
                "data_transactions": [
                    {
                        "data": "am9pbnxsb2JieQ==",
                        "sender": "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY",
                        "tx_hash": "0x01"
                    }
                ]
            }));
        });
        let client = client(&server, 7);

        let header = client.header(12).await.unwrap().unwrap();
        assert_eq!(header, AvailHeader { number: 12, hash: "0xabc".into(), timestamp: 1_700_000_006 });
        assert_eq!(client.header(13).await.unwrap(), None);

        let submissions = client.submissions(12).await.unwrap().unwrap();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].data, b"join|lobby".to_vec());
        assert_eq!(submissions[0].tx_hash.as_deref(), Some("0x01"));
    }

    #[tokio::test]
    async fn bad_base64_is_an_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method("GET").path("/v2/blocks/3/data");
            then.status(200).json_body(json!({ "data_transactions": [{ "data": "***", "sender": "5Grw" }] }));
        });
        assert_matches!(client(&server, 7).submissions(3).await, Err(FunnelError::InvalidResponse { .. }));
    }
}
