pub mod client;
pub mod commitment;
pub mod contract;
pub mod error;
pub mod proof;
pub mod prover;
pub mod relay;
pub mod session;
pub mod storage;
pub mod store;

pub use client::{PrivacyClient, WithdrawalReceipt};
pub use commitment::{
    derive_commitment, derive_nullifier_hash, format_commitment, generate_secret, nullifier_key,
    parse_secret, Secret,
};
pub use error::{Result, SdkError};
pub use proof::{format_for_chain, ChainProof, Proof};
pub use prover::{CircuitArtifacts, ProofGenerator, ProvingBackend, SnarkjsBackend};
pub use relay::{Relay, RelayRequest, RelayerClient};
pub use session::{KeySession, LocalWalletSigner, MessageSigner};
pub use storage::{BlobStorage, FileStorage, MemoryStorage};
pub use store::{EncryptedSecretStore, SecretRecord, SecretStore, StoreVersion};
