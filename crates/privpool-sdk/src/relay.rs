/// Client side of the relayer HTTP API.
use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::Address;
use async_trait::async_trait;
use privpool_transport::{Config as TransportConfig, HttpClient};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SdkError};
use crate::proof::ChainProof;

/// Body of `POST /withdraw`. Field elements travel as decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub p_a: [String; 2],
    pub p_b: [[String; 2]; 2],
    pub p_c: [String; 2],
    pub pub_signals: Vec<String>,
    pub recipient: String,
}

impl RelayRequest {
    pub fn new(proof: &ChainProof, recipient: Address) -> Self {
        let pair = |v: &[alloy::primitives::U256; 2]| [v[0].to_string(), v[1].to_string()];
        Self {
            p_a: pair(&proof.p_a),
            p_b: [pair(&proof.p_b[0]), pair(&proof.p_b[1])],
            p_c: pair(&proof.p_c),
            pub_signals: proof.pub_signals.iter().map(|s| s.to_string()).collect(),
            recipient: recipient.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub relayer_address: String,
    pub pool_address: String,
    pub network: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub address: String,
    pub balance: String,
    pub balance_eth: String,
}

/// Submits a formatted withdrawal and returns the transaction hash.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn submit_withdrawal(&self, request: &RelayRequest) -> Result<String>;
}

pub struct RelayerClient {
    base_url: String,
    http: HttpClient,
    require_tor: bool,
    tor_verified: AtomicBool,
}

impl RelayerClient {
    pub fn new(base_url: &str, config: TransportConfig) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: HttpClient::new(config)?,
            require_tor: false,
            tor_verified: AtomicBool::new(false),
        })
    }

    /// Refuse to send anything until the SOCKS exit is confirmed to be Tor.
    pub fn require_tor(mut self) -> Self {
        self.require_tor = true;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ensure_tor(&self) -> Result<()> {
        if !self.require_tor || self.tor_verified.load(Ordering::Acquire) {
            return Ok(());
        }

        if !self.http.verify_tor_connection().await? {
            return Err(SdkError::TorRequired(
                "Tor connection required but not detected. Refusing to contact relayer.".into(),
            ));
        }

        info!("Tor connection verified");
        self.tor_verified.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.ensure_tor().await?;
        let reply = self
            .http
            .get_json::<HealthResponse>(&format!("{}/health", self.base_url))
            .await?;
        Ok(reply.body)
    }

    pub async fn balance(&self) -> Result<BalanceResponse> {
        self.ensure_tor().await?;
        let reply = self
            .http
            .get_json::<serde_json::Value>(&format!("{}/balance", self.base_url))
            .await?;
        if !reply.is_success() {
            return Err(SdkError::Relayer(error_message(&reply.body)));
        }
        serde_json::from_value(reply.body).map_err(|e| SdkError::Serialization(e.to_string()))
    }
}

fn error_message(body: &serde_json::Value) -> String {
    body.get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown relayer error")
        .to_string()
}

#[async_trait]
impl Relay for RelayerClient {
    async fn submit_withdrawal(&self, request: &RelayRequest) -> Result<String> {
        self.ensure_tor().await?;

        let reply = self
            .http
            .post_json::<_, RelayResponse>(&format!("{}/withdraw", self.base_url), request)
            .await?;

        let body = reply.body;
        match (body.success, body.tx_hash) {
            (true, Some(tx_hash)) => {
                info!("Relayer accepted withdrawal: {}", tx_hash);
                Ok(tx_hash)
            }
            _ => {
                let message = body
                    .error
                    .unwrap_or_else(|| format!("Relayer returned status {}", reply.status));
                warn!("Relayer rejected withdrawal: {}", message);
                Err(SdkError::Relayer(message))
            }
        }
    }
}
