/// Encrypted, per-owner persistence of deposit secrets.
///
/// Each owner's records are one AES-256-GCM blob keyed by the owner address.
/// The owner address and version are bound as associated data, so a blob moved
/// into another owner's slot fails authentication instead of decrypting.
use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::commitment::{derive_commitment, derive_nullifier_hash, nullifier_key, Secret};
use crate::error::{Result, SdkError};
use crate::session::{EncryptionKey, KeySession, MessageSigner};
use crate::storage::BlobStorage;

pub const STORAGE_KEY_PREFIX: &str = "privacy-secrets-";

/// One deposit. `commitment` is the uniqueness key within an owner's set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub secret: Secret,
    pub commitment: B256,
    /// bytes32 form of the circuit nullifier hash
    pub nullifier: B256,
    /// Unix milliseconds
    pub timestamp: u64,
}

impl SecretRecord {
    pub fn new(secret: Secret) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            secret,
            commitment: derive_commitment(&secret),
            nullifier: nullifier_key(derive_nullifier_hash(&secret)),
            timestamp,
        }
    }

    pub fn nullifier_hash(&self) -> U256 {
        derive_nullifier_hash(&self.secret)
    }

    pub fn validate(&self) -> Result<()> {
        if derive_commitment(&self.secret) != self.commitment {
            return Err(SdkError::InvalidInput(
                "Commitment does not match secret".into(),
            ));
        }
        if nullifier_key(derive_nullifier_hash(&self.secret)) != self.nullifier {
            return Err(SdkError::InvalidInput("Nullifier does not match secret".into()));
        }
        Ok(())
    }
}

/// Monotonic per-owner counter bumped on every write. Readable without the
/// owner's key, so a consumer can tell whether its decrypted copy is stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreVersion(pub u64);

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn save(
        &self,
        record: SecretRecord,
        owner: Address,
        signer: &dyn MessageSigner,
    ) -> Result<StoreVersion>;

    /// Empty when nothing is stored or the blob cannot be decrypted.
    async fn load(&self, owner: Address, signer: &dyn MessageSigner) -> Result<Vec<SecretRecord>>;

    async fn remove(
        &self,
        commitment: B256,
        owner: Address,
        signer: &dyn MessageSigner,
    ) -> Result<StoreVersion>;

    async fn version(&self, owner: Address) -> Result<StoreVersion>;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u64,
    nonce: String,
    ciphertext: String,
}

pub fn storage_key(owner: Address) -> String {
    format!("{}{}", STORAGE_KEY_PREFIX, owner.to_string().to_lowercase())
}

fn associated_data(owner: Address, version: u64) -> Vec<u8> {
    format!("{}:{}", owner.to_string().to_lowercase(), version).into_bytes()
}

fn encrypt_records(
    records: &[SecretRecord],
    key: &EncryptionKey,
    owner: Address,
    version: u64,
) -> Result<Vec<u8>> {
    let plaintext =
        serde_json::to_vec(records).map_err(|e| SdkError::Serialization(e.to_string()))?;

    let mut nonce = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| SdkError::EntropyFailure(e.to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| SdkError::Storage("Invalid key length".into()))?;
    let aad = associated_data(owner, version);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &plaintext,
                aad: &aad,
            },
        )
        .map_err(|_| SdkError::Storage("Encryption failed".into()))?;

    let envelope = Envelope {
        version,
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    };
    serde_json::to_vec(&envelope).map_err(|e| SdkError::Serialization(e.to_string()))
}

fn decrypt_records(envelope: &Envelope, key: &EncryptionKey, owner: Address) -> Result<Vec<SecretRecord>> {
    let nonce = hex::decode(&envelope.nonce).map_err(|_| SdkError::Decryption)?;
    if nonce.len() != 12 {
        return Err(SdkError::Decryption);
    }
    let ciphertext = hex::decode(&envelope.ciphertext).map_err(|_| SdkError::Decryption)?;

    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| SdkError::Decryption)?;
    let aad = associated_data(owner, envelope.version);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| SdkError::Decryption)?;

    serde_json::from_slice(&plaintext).map_err(|_| SdkError::Decryption)
}

struct Snapshot {
    records: Vec<SecretRecord>,
    version: u64,
    /// Raw blob that could not be decrypted, kept aside before overwriting.
    undecryptable: Option<Vec<u8>>,
}

/// Reference `SecretStore`: AES-256-GCM under a signature-derived key.
///
/// Writers for the same owner are serialized within this process. Two
/// processes writing the same owner slot race last-writer-wins.
pub struct EncryptedSecretStore<S: BlobStorage> {
    storage: S,
    session: Arc<KeySession>,
    write_locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl<S: BlobStorage> EncryptedSecretStore<S> {
    pub fn new(storage: S, session: Arc<KeySession>) -> Self {
        Self {
            storage,
            session,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<KeySession> {
        &self.session
    }

    async fn write_lock(&self, owner: Address) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .await
            .entry(owner)
            .or_default()
            .clone()
    }

    async fn read_envelope(&self, owner: Address) -> Result<Option<(Envelope, Vec<u8>)>> {
        let Some(blob) = self.storage.get(&storage_key(owner)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Envelope>(&blob) {
            Ok(envelope) => Ok(Some((envelope, blob))),
            Err(e) => {
                warn!("Stored secrets for {} are not a valid envelope: {}", owner, e);
                Ok(Some((
                    Envelope {
                        version: 0,
                        nonce: String::new(),
                        ciphertext: String::new(),
                    },
                    blob,
                )))
            }
        }
    }

    async fn snapshot(&self, owner: Address, key: &EncryptionKey) -> Result<Snapshot> {
        let Some((envelope, blob)) = self.read_envelope(owner).await? else {
            return Ok(Snapshot {
                records: Vec::new(),
                version: 0,
                undecryptable: None,
            });
        };

        match decrypt_records(&envelope, key, owner) {
            Ok(records) => Ok(Snapshot {
                records,
                version: envelope.version,
                undecryptable: None,
            }),
            Err(_) => {
                warn!("Failed to decrypt stored secrets for {}; treating as empty", owner);
                Ok(Snapshot {
                    records: Vec::new(),
                    version: envelope.version,
                    undecryptable: Some(blob),
                })
            }
        }
    }

    async fn write(
        &self,
        owner: Address,
        key: &EncryptionKey,
        snapshot: &Snapshot,
        records: &[SecretRecord],
    ) -> Result<StoreVersion> {
        let version = snapshot
            .version
            .checked_add(1)
            .ok_or_else(|| SdkError::Storage("Store version exhausted".into()))?;

        if let Some(blob) = &snapshot.undecryptable {
            let backup_key = format!("{}.undecryptable-{}", storage_key(owner), snapshot.version);
            warn!("Preserving undecryptable blob for {} as {}", owner, backup_key);
            self.storage.put(&backup_key, blob).await?;
        }

        let blob = encrypt_records(records, key, owner, version)?;
        self.storage.put(&storage_key(owner), &blob).await?;
        Ok(StoreVersion(version))
    }
}

#[async_trait]
impl<S: BlobStorage> SecretStore for EncryptedSecretStore<S> {
    async fn save(
        &self,
        record: SecretRecord,
        owner: Address,
        signer: &dyn MessageSigner,
    ) -> Result<StoreVersion> {
        record.validate()?;

        let lock = self.write_lock(owner).await;
        let _guard = lock.lock().await;

        let key = self.session.key_for(owner, signer).await?;
        let snapshot = self.snapshot(owner, &key).await?;

        if snapshot
            .records
            .iter()
            .any(|r| r.commitment == record.commitment)
        {
            info!("Commitment {} already stored for {}", record.commitment, owner);
            return Ok(StoreVersion(snapshot.version));
        }

        let mut records = snapshot.records.clone();
        records.push(record);
        let version = self.write(owner, &key, &snapshot, &records).await?;
        info!("Saved secret for {} ({} records, {:?})", owner, records.len(), version);
        Ok(version)
    }

    async fn load(&self, owner: Address, signer: &dyn MessageSigner) -> Result<Vec<SecretRecord>> {
        // No blob means nothing to decrypt: skip the signature prompt.
        if self.storage.get(&storage_key(owner)).await?.is_none() {
            return Ok(Vec::new());
        }

        let key = self.session.key_for(owner, signer).await?;
        Ok(self.snapshot(owner, &key).await?.records)
    }

    async fn remove(
        &self,
        commitment: B256,
        owner: Address,
        signer: &dyn MessageSigner,
    ) -> Result<StoreVersion> {
        let lock = self.write_lock(owner).await;
        let _guard = lock.lock().await;

        let key = self.session.key_for(owner, signer).await?;
        let snapshot = self.snapshot(owner, &key).await?;

        let records: Vec<SecretRecord> = snapshot
            .records
            .iter()
            .filter(|r| r.commitment != commitment)
            .cloned()
            .collect();
        if records.len() == snapshot.records.len() {
            return Ok(StoreVersion(snapshot.version));
        }

        let version = self.write(owner, &key, &snapshot, &records).await?;
        info!("Removed secret {} for {}", commitment, owner);
        Ok(version)
    }

    async fn version(&self, owner: Address) -> Result<StoreVersion> {
        Ok(self
            .read_envelope(owner)
            .await?
            .map(|(envelope, _)| StoreVersion(envelope.version))
            .unwrap_or_default())
    }
}
