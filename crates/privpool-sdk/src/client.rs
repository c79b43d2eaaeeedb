/// Orchestrates a withdrawal: stored secret → proof → relayer.
use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use tracing::{info, warn};

use crate::commitment::format_commitment;
use crate::error::{Result, SdkError};
use crate::proof::format_for_chain;
use crate::prover::ProofGenerator;
use crate::relay::{Relay, RelayRequest};
use crate::session::MessageSigner;
use crate::store::{SecretRecord, SecretStore, StoreVersion};

#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    pub tx_hash: String,
    pub nullifier_hash: U256,
    /// `None` if the record could not be removed after the relayer accepted.
    pub store_version: Option<StoreVersion>,
}

pub struct PrivacyClient {
    store: Arc<dyn SecretStore>,
    prover: Arc<ProofGenerator>,
    relay: Arc<dyn Relay>,
}

impl PrivacyClient {
    pub fn new(
        store: Arc<dyn SecretStore>,
        prover: Arc<ProofGenerator>,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            store,
            prover,
            relay,
        }
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    /// Builds the relayer payload for one record without submitting it.
    pub async fn prepare_withdrawal(
        &self,
        record: &SecretRecord,
        recipient: Address,
    ) -> Result<RelayRequest> {
        record.validate()?;
        let proof = self
            .prover
            .generate_proof(&record.secret, record.nullifier_hash())
            .await?;
        let chain_proof = format_for_chain(&proof)?;
        Ok(RelayRequest::new(&chain_proof, recipient))
    }

    pub async fn withdraw(
        &self,
        commitment: B256,
        recipient: Address,
        owner: Address,
        signer: &dyn MessageSigner,
    ) -> Result<WithdrawalReceipt> {
        if recipient == Address::ZERO {
            return Err(SdkError::InvalidInput("Recipient must not be the zero address".into()));
        }

        let record = self
            .store
            .load(owner, signer)
            .await?
            .into_iter()
            .find(|r| r.commitment == commitment)
            .ok_or_else(|| {
                SdkError::InvalidInput(format!(
                    "No stored secret for commitment {}",
                    format_commitment(&commitment)
                ))
            })?;

        let nullifier_hash = record.nullifier_hash();
        info!("Withdrawing {} to {}", format_commitment(&commitment), recipient);

        let request = self.prepare_withdrawal(&record, recipient).await?;
        let tx_hash = self.relay.submit_withdrawal(&request).await?;

        // The contract enforces nullifier uniqueness; removal only tidies the list.
        let store_version = match self.store.remove(commitment, owner, signer).await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Withdrawal sent but record removal failed: {}", e);
                None
            }
        };

        Ok(WithdrawalReceipt {
            tx_hash,
            nullifier_hash,
            store_version,
        })
    }
}
