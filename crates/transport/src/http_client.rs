use std::time::Duration;
use reqwest::{Client, Proxy, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, TransportError};

/// Decoded JSON body together with the HTTP status it arrived with.
/// The relayer answers 400/500 with the same structured body as 200.
#[derive(Debug, Clone)]
pub struct JsonReply<T> {
    pub status: u16,
    pub body: T,
}

impl<T> JsonReply<T> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub struct HttpClient {
    client: Client,
    config: Config,
}

impl HttpClient {
    pub fn new(config: Config) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));

        if let Some(proxy_url) = config.proxy_url() {
            let proxy = Proxy::all(&proxy_url)
                .map_err(|e| TransportError::Config(format!("Invalid proxy URL: {}", e)))?;
            builder = builder.proxy(proxy);
        } else {
            builder = builder.no_proxy();
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to build client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {}", url);
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("GET request failed: {}", e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<JsonReply<T>> {
        let response = self.get(url).await?;
        Self::decode(response).await
    }

    pub async fn post<T: Serialize>(&self, url: &str, body: &T) -> Result<Response> {
        debug!("POST {}", url);
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("POST request failed: {}", e)))
    }

    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<JsonReply<R>> {
        let response = self.post(url, body).await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: Response) -> Result<JsonReply<R>> {
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Http(format!("Failed to read body: {}", e)))?;

        let body = serde_json::from_slice(&bytes).map_err(|e| TransportError::Response {
            status,
            message: format!("JSON parse failed: {}", e),
        })?;

        Ok(JsonReply { status, body })
    }

    /// Asks the Tor Project check service whether our exit is a Tor node.
    pub async fn verify_tor_connection(&self) -> Result<bool> {
        if !self.config.is_proxied() {
            return Ok(false);
        }

        let response = self.get("https://check.torproject.org/api/ip").await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("JSON parse failed: {}", e)))?;

        Ok(json.get("IsTor").and_then(|v| v.as_bool()).unwrap_or(false))
    }
}
