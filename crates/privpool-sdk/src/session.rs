/// Owner-authorized encryption keys for the secret store.
///
/// The key is keccak256 of the owner's signature over a fixed message, so only
/// someone able to sign for the owner address can decrypt that owner's records.
/// Derived keys are cached in a `KeySession` the caller owns and passes around.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{keccak256, Address};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, SdkError};

#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// Returns the raw signature bytes, or `UserRejectedSignature` if the
    /// owner declines to sign.
    async fn sign_message(&self, message: &str) -> Result<Vec<u8>>;
}

/// EIP-191 personal-sign with a local private key.
pub struct LocalWalletSigner {
    signer: PrivateKeySigner,
}

impl LocalWalletSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    pub fn from_hex(private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|_| SdkError::InvalidInput("Invalid owner private key".into()))?;
        Ok(Self::new(signer))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn inner(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

#[async_trait]
impl MessageSigner for LocalWalletSigner {
    async fn sign_message(&self, message: &str) -> Result<Vec<u8>> {
        let signature = Signer::sign_message(&self.signer, message.as_bytes())
            .await
            .map_err(|e| SdkError::Signer(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}

pub fn key_derivation_message(owner: Address) -> String {
    format!(
        "Sign this message to encrypt your PrivateDEX deposits.\n\nAddress: {}\n\nThis signature will be used to generate an encryption key for your local storage.",
        owner
    )
}

#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_signature(signature: &[u8]) -> Self {
        Self(keccak256(signature).0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

struct CachedKey {
    key: EncryptionKey,
    expires_at: Option<Instant>,
}

impl CachedKey {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

type Slot = Arc<Mutex<Option<CachedKey>>>;

/// Per-owner key cache. Derivation is single-flight per owner: concurrent
/// first use waits on one signature prompt instead of issuing several.
pub struct KeySession {
    ttl: Option<Duration>,
    slots: Mutex<HashMap<Address, Slot>>,
}

impl Default for KeySession {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySession {
    /// Keys live until `disconnect`/`clear`.
    pub fn new() -> Self {
        Self {
            ttl: None,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, owner: Address) -> Slot {
        let mut slots = self.slots.lock().await;
        slots.entry(owner).or_default().clone()
    }

    pub async fn key_for(&self, owner: Address, signer: &dyn MessageSigner) -> Result<EncryptionKey> {
        let slot = self.slot(owner).await;
        let mut cached = slot.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.is_live() {
                return Ok(entry.key.clone());
            }
            debug!("Cached encryption key for {} expired", owner);
        }

        info!("Requesting storage key signature from {}", owner);
        let signature = signer.sign_message(&key_derivation_message(owner)).await?;
        let key = EncryptionKey::from_signature(&signature);

        *cached = Some(CachedKey {
            key: key.clone(),
            expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
        });
        Ok(key)
    }

    pub async fn is_cached(&self, owner: Address) -> bool {
        let slot = {
            let slots = self.slots.lock().await;
            match slots.get(&owner) {
                Some(slot) => slot.clone(),
                None => return false,
            }
        };
        let cached = slot.lock().await;
        cached.as_ref().is_some_and(CachedKey::is_live)
    }

    /// Forget one owner's key, e.g. on wallet disconnect.
    pub async fn disconnect(&self, owner: Address) {
        self.slots.lock().await.remove(&owner);
    }

    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticSigner;
    use super::*;

    const OWNER: Address = Address::repeat_byte(0x11);
    const OTHER: Address = Address::repeat_byte(0x22);

    #[tokio::test]
    async fn test_key_cached_per_owner() {
        let session = KeySession::new();
        let signer = StaticSigner::new(7);

        let k1 = session.key_for(OWNER, &signer).await.unwrap();
        let k2 = session.key_for(OWNER, &signer).await.unwrap();
        assert_eq!(k1, k2);
        assert_eq!(signer.calls(), 1);
        assert!(session.is_cached(OWNER).await);
        assert!(!session.is_cached(OTHER).await);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_prompts_once() {
        let session = KeySession::new();
        let signer = StaticSigner::new(7);

        let (a, b) = tokio::join!(
            session.key_for(OWNER, &signer),
            session.key_for(OWNER, &signer)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(signer.calls(), 1);
    }

    #[tokio::test]
    async fn test_rejection_caches_nothing() {
        let session = KeySession::new();
        let result = session.key_for(OWNER, &StaticSigner::rejecting()).await;
        assert!(matches!(result, Err(SdkError::UserRejectedSignature)));
        assert!(!session.is_cached(OWNER).await);
    }

    #[tokio::test]
    async fn test_disconnect_and_expiry_prompt_again() {
        let session = KeySession::new();
        let signer = StaticSigner::new(7);
        session.key_for(OWNER, &signer).await.unwrap();
        session.disconnect(OWNER).await;
        session.key_for(OWNER, &signer).await.unwrap();
        assert_eq!(signer.calls(), 2);

        let expiring = KeySession::with_ttl(Duration::ZERO);
        let signer = StaticSigner::new(7);
        expiring.key_for(OWNER, &signer).await.unwrap();
        expiring.key_for(OWNER, &signer).await.unwrap();
        assert_eq!(signer.calls(), 2);
    }

    #[tokio::test]
    async fn test_local_wallet_key_is_stable() {
        let signer = LocalWalletSigner::new(PrivateKeySigner::random());
        let owner = signer.address();

        let first = KeySession::new().key_for(owner, &signer).await.unwrap();
        let second = KeySession::new().key_for(owner, &signer).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_message_embeds_owner() {
        let message = key_derivation_message(OWNER);
        assert!(message.contains(&OWNER.to_string()));
        assert!(message.starts_with("Sign this message to encrypt your PrivateDEX deposits."));
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = EncryptionKey::from_signature(&[1, 2, 3]);
        assert_eq!(format!("{:?}", key), "EncryptionKey(<redacted>)");
    }
}
