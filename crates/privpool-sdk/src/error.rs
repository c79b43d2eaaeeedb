use thiserror::Error;

pub type Result<T> = std::result::Result<T, SdkError>;

#[derive(Error, Debug)]
pub enum SdkError {
    #[error("Entropy source unavailable: {0}")]
    EntropyFailure(String),

    #[error("User rejected signature request")]
    UserRejectedSignature,

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Decryption failed")]
    Decryption,

    #[error("Proof generation failed: {0}")]
    ProofGenerationFailed(String),

    #[error("A proof for this nullifier is already being generated")]
    ProofInFlight,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(#[from] privpool_transport::TransportError),

    #[error("Relayer error: {0}")]
    Relayer(String),

    #[error("Tor connection required: {0}")]
    TorRequired(String),
}
