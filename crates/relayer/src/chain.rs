//! The relayer's view of the pool contract: simulate, submit, balance.
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::json_rpc::ErrorPayload;
use alloy::transports::http::reqwest::Url;
use alloy::transports::RpcError;
use async_trait::async_trait;
use thiserror::Error;

use privpool_sdk::contract::IPrivacyPool::{self, IPrivacyPoolInstance};

use crate::config::RelayerConfig;

/// Arguments of `withdraw(pA, pB, pC, pubSignals, recipient)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawCall {
    pub p_a: [U256; 2],
    pub p_b: [[U256; 2]; 2],
    pub p_c: [U256; 2],
    pub pub_signals: [U256; 1],
    pub recipient: Address,
}

impl WithdrawCall {
    pub fn nullifier_hash(&self) -> U256 {
        self.pub_signals[0]
    }
}

#[derive(Error, Debug)]
pub enum ChainError {
    /// The node executed the call and rejected it.
    #[error("{0}")]
    Reverted(String),

    /// Transport, signer or decoding failure.
    #[error("{0}")]
    Rpc(String),
}

#[async_trait]
pub trait PoolChain: Send + Sync {
    fn relayer_address(&self) -> Address;

    fn pool_address(&self) -> Address;

    /// Dry-run with the relayer as sender. No state change, no gas.
    async fn simulate_withdraw(&self, call: &WithdrawCall) -> Result<(), ChainError>;

    /// Broadcasts and returns the transaction hash without waiting for inclusion.
    async fn submit_withdraw(&self, call: &WithdrawCall) -> Result<B256, ChainError>;

    async fn balance(&self) -> Result<U256, ChainError>;
}

pub struct EvmPoolChain {
    provider: DynProvider,
    pool: IPrivacyPoolInstance<DynProvider>,
    relayer: Address,
}

impl EvmPoolChain {
    pub fn connect(config: &RelayerConfig) -> anyhow::Result<Self> {
        let url: Url = config
            .rpc_url
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid RPC_URL: {}", e))?;
        let wallet = EthereumWallet::from(config.signer.clone());
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased();
        Ok(Self::new(provider, config.pool_address, config.relayer_address()))
    }

    pub fn new(provider: DynProvider, pool_address: Address, relayer: Address) -> Self {
        let pool = IPrivacyPool::new(pool_address, provider.clone());
        Self {
            provider,
            pool,
            relayer,
        }
    }
}

/// Node-side faults (rate limits, pruned state, quotas) also arrive as
/// JSON-RPC error responses; only an execution revert is the contract saying no.
fn is_execution_revert(payload: &ErrorPayload) -> bool {
    payload.code == 3
        || payload.as_revert_data().is_some()
        || payload.message.starts_with("execution reverted")
}

fn classify(error: alloy::contract::Error) -> ChainError {
    match error {
        alloy::contract::Error::TransportError(RpcError::ErrorResp(payload))
            if is_execution_revert(&payload) =>
        {
            ChainError::Reverted(payload.message.to_string())
        }
        other => ChainError::Rpc(other.to_string()),
    }
}

#[async_trait]
impl PoolChain for EvmPoolChain {
    fn relayer_address(&self) -> Address {
        self.relayer
    }

    fn pool_address(&self) -> Address {
        *self.pool.address()
    }

    async fn simulate_withdraw(&self, call: &WithdrawCall) -> Result<(), ChainError> {
        self.pool
            .withdraw(call.p_a, call.p_b, call.p_c, call.pub_signals, call.recipient)
            .from(self.relayer)
            .call()
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn submit_withdraw(&self, call: &WithdrawCall) -> Result<B256, ChainError> {
        let pending = self
            .pool
            .withdraw(call.p_a, call.p_b, call.p_c, call.pub_signals, call.recipient)
            .from(self.relayer)
            .send()
            .await
            .map_err(classify)?;
        Ok(*pending.tx_hash())
    }

    async fn balance(&self) -> Result<U256, ChainError> {
        self.provider
            .get_balance(self.relayer)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }
}
