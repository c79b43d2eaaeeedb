use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;

pub const DEFAULT_RPC_URL: &str = "https://sepolia.base.org";
pub const DEFAULT_NETWORK_NAME: &str = "Base Sepolia";
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024;

#[derive(Clone)]
pub struct RelayerConfig {
    pub rpc_url: String,
    pub signer: PrivateKeySigner,
    pub pool_address: Address,
    pub network_name: String,
    pub host: String,
    pub port: u16,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
}

impl RelayerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let rpc_url = lookup("RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());

        let key_hex = match (lookup("RELAYER_PRIVATE_KEY"), lookup("RELAYER_KEY_FILE")) {
            (Some(key), _) => key,
            (None, Some(path)) => {
                let path = shellexpand::tilde(&path).to_string();
                std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to read relayer key from {}: {}", path, e))?
            }
            (None, None) => {
                anyhow::bail!("RELAYER_PRIVATE_KEY or RELAYER_KEY_FILE must be set")
            }
        };
        let signer: PrivateKeySigner = key_hex
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Relayer private key is not a valid secp256k1 key"))?;

        let pool_address: Address = lookup("PRIVACY_POOL_ADDRESS")
            .ok_or_else(|| anyhow::anyhow!("PRIVACY_POOL_ADDRESS must be set"))?
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("PRIVACY_POOL_ADDRESS is not a valid address"))?;

        let network_name =
            lookup("NETWORK_NAME").unwrap_or_else(|| DEFAULT_NETWORK_NAME.to_string());
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = lookup("PORT").and_then(|s| s.parse().ok()).unwrap_or(3001);

        let rate_limit_per_second = lookup("RATE_LIMIT_PER_SECOND")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(10);
        let rate_limit_burst = lookup("RATE_LIMIT_BURST")
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(20);
        let max_body_bytes = lookup("MAX_BODY_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Ok(Self {
            rpc_url,
            signer,
            pool_address,
            network_name,
            host,
            port,
            rate_limit_per_second,
            rate_limit_burst,
            max_body_bytes,
        })
    }

    pub fn relayer_address(&self) -> Address {
        self.signer.address()
    }

    /// Strings that must never appear in an error returned to a caller.
    pub fn redactions(&self) -> Vec<String> {
        let key = hex::encode(self.signer.to_bytes());
        vec![self.rpc_url.clone(), format!("0x{}", key), key]
    }
}
