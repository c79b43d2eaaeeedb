/// Commitment / nullifier derivation. Pure functions, no state.
///
/// commitment    = keccak256(secret)
/// nullifierHash = secret * NULLIFIER_MULTIPLIER over the BN254 scalar field
use std::fmt;

use alloy::primitives::{keccak256, B256, U256};
use ark_bn254::Fr;
use ark_ff::PrimeField;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SdkError};

// MUST match the withdraw circuit: nullifierHash === secret * 123456789.
// This binding is linear and therefore reversible from the public signal.
// Replacing it needs a new circuit and verifier, not just a change here.
pub const NULLIFIER_MULTIPLIER: u64 = 123_456_789;

pub const SECRET_LEN: usize = 32;

/// 32 uniformly random bytes known only to the depositor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// The secret as the circuit sees it (reduced into the scalar field).
    pub fn to_field(&self) -> U256 {
        fr_to_u256(Fr::from_be_bytes_mod_order(&self.0))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_secret(&s).map_err(serde::de::Error::custom)
    }
}

/// Draws a fresh secret from the OS CSPRNG. There is no fallback source.
pub fn generate_secret() -> Result<Secret> {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SdkError::EntropyFailure(e.to_string()))?;
    Ok(Secret(bytes))
}

pub fn derive_commitment(secret: &Secret) -> B256 {
    keccak256(secret.as_bytes())
}

pub fn derive_nullifier_hash(secret: &Secret) -> U256 {
    let secret = Fr::from_be_bytes_mod_order(secret.as_bytes());
    fr_to_u256(secret * Fr::from(NULLIFIER_MULTIPLIER))
}

/// bytes32 form of a nullifier hash, as taken by `isNullifierUsed`.
pub fn nullifier_key(nullifier_hash: U256) -> B256 {
    B256::from(nullifier_hash.to_be_bytes::<32>())
}

/// Accepts `0x`-prefixed or bare hex, exactly 32 bytes.
pub fn parse_secret(input: &str) -> Result<Secret> {
    let trimmed = input.trim();
    let hex_str = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(hex_str)
        .map_err(|e| SdkError::InvalidInput(format!("Secret is not valid hex: {}", e)))?;
    let bytes: [u8; SECRET_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
        SdkError::InvalidInput(format!("Secret must be 32 bytes, got {}", b.len()))
    })?;
    Ok(Secret(bytes))
}

pub fn format_commitment(commitment: &B256) -> String {
    let hex_str = hex::encode(commitment.as_slice());
    format!("0x{}...{}", &hex_str[..8], &hex_str[hex_str.len() - 8..])
}

pub(crate) fn fr_to_u256(value: Fr) -> U256 {
    U256::from_limbs(value.into_bigint().0)
}
