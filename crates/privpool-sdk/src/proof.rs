/// Groth16 proof shapes: what snarkjs emits, what we hold internally,
/// and the exact tuple layout the on-chain verifier expects.
use std::str::FromStr;

use alloy::primitives::U256;
use ark_bn254::{Fq, Fr};
use ark_ff::PrimeField;
use serde::Deserialize;

use crate::error::{Result, SdkError};

/// snarkjs `proof.json`. Points are projective, so each carries a trailing
/// `z` coordinate that is always 1 for a normalized proof.
#[derive(Clone, Debug, Deserialize)]
pub struct SnarkjsProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub curve: Option<String>,
}

/// Affine proof in snarkjs coordinate order plus its public signals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub pi_a: [U256; 2],
    pub pi_b: [[U256; 2]; 2],
    pub pi_c: [U256; 2],
    pub public_signals: Vec<U256>,
}

/// Arguments of `withdraw(pA, pB, pC, pubSignals, recipient)` minus the recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainProof {
    pub p_a: [U256; 2],
    pub p_b: [[U256; 2]; 2],
    pub p_c: [U256; 2],
    pub pub_signals: [U256; 1],
}

pub fn base_field_modulus() -> U256 {
    U256::from_limbs(<Fq as PrimeField>::MODULUS.0)
}

pub fn scalar_field_modulus() -> U256 {
    U256::from_limbs(<Fr as PrimeField>::MODULUS.0)
}

/// Decimal or `0x` hex.
pub fn parse_field_element(input: &str) -> Result<U256> {
    U256::from_str(input.trim())
        .map_err(|e| SdkError::InvalidInput(format!("Invalid field element '{}': {}", input, e)))
}

pub fn check_base_field(value: &U256) -> Result<()> {
    if *value >= base_field_modulus() {
        return Err(SdkError::InvalidInput(
            "Proof coordinate exceeds BN254 base field".into(),
        ));
    }
    Ok(())
}

pub fn check_scalar_field(value: &U256) -> Result<()> {
    if *value >= scalar_field_modulus() {
        return Err(SdkError::InvalidInput(
            "Public signal exceeds BN254 scalar field".into(),
        ));
    }
    Ok(())
}

fn pair(values: &[String], what: &str) -> Result<[U256; 2]> {
    if values.len() < 2 {
        return Err(SdkError::ProofGenerationFailed(format!(
            "{} has {} coordinates, expected at least 2",
            what,
            values.len()
        )));
    }
    let x = parse_field_element(&values[0])
        .map_err(|e| SdkError::ProofGenerationFailed(e.to_string()))?;
    let y = parse_field_element(&values[1])
        .map_err(|e| SdkError::ProofGenerationFailed(e.to_string()))?;
    Ok([x, y])
}

impl Proof {
    pub fn from_snarkjs(raw: &SnarkjsProof, public_signals: &[String]) -> Result<Self> {
        if let Some(protocol) = &raw.protocol {
            if protocol != "groth16" {
                return Err(SdkError::ProofGenerationFailed(format!(
                    "Unexpected proof protocol: {}",
                    protocol
                )));
            }
        }
        // snarkjs calls BN254 "bn128"
        if let Some(curve) = &raw.curve {
            if curve != "bn128" && curve != "bn254" {
                return Err(SdkError::ProofGenerationFailed(format!(
                    "Unexpected proof curve: {}",
                    curve
                )));
            }
        }
        if raw.pi_b.len() < 2 {
            return Err(SdkError::ProofGenerationFailed(
                "pi_b must contain at least 2 coordinate pairs".into(),
            ));
        }

        let public_signals = public_signals
            .iter()
            .map(|s| parse_field_element(s))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| SdkError::ProofGenerationFailed(e.to_string()))?;

        let proof = Self {
            pi_a: pair(&raw.pi_a, "pi_a")?,
            pi_b: [pair(&raw.pi_b[0], "pi_b[0]")?, pair(&raw.pi_b[1], "pi_b[1]")?],
            pi_c: pair(&raw.pi_c, "pi_c")?,
            public_signals,
        };
        proof
            .check_fields()
            .map_err(|e| SdkError::ProofGenerationFailed(e.to_string()))?;
        Ok(proof)
    }

    pub fn check_fields(&self) -> Result<()> {
        self.pi_a.iter().try_for_each(check_base_field)?;
        self.pi_b.iter().flatten().try_for_each(check_base_field)?;
        self.pi_c.iter().try_for_each(check_base_field)?;
        self.public_signals.iter().try_for_each(check_scalar_field)
    }
}

/// Reshape a proof into the verifier's calldata layout.
///
/// The G2 point `pi_b` is stored by snarkjs as `[x_c0, x_c1]`, `[y_c0, y_c1]`
/// while the EVM pairing precompile takes each Fq2 element as `[c1, c0]`.
/// The swap inside each pair is required, not cosmetic.
pub fn format_for_chain(proof: &Proof) -> Result<ChainProof> {
    let [signal] = proof.public_signals.as_slice() else {
        return Err(SdkError::InvalidInput(format!(
            "Expected exactly 1 public signal, got {}",
            proof.public_signals.len()
        )));
    };

    Ok(ChainProof {
        p_a: proof.pi_a,
        p_b: [
            [proof.pi_b[0][1], proof.pi_b[0][0]],
            [proof.pi_b[1][1], proof.pi_b[1][0]],
        ],
        p_c: proof.pi_c,
        pub_signals: [*signal],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_proof() -> SnarkjsProof {
        serde_json::from_str(
            r#"{
                "pi_a": ["1", "2", "1"],
                "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
                "pi_c": ["7", "8", "1"],
                "protocol": "groth16",
                "curve": "bn128"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_snarkjs_drops_projective_z() {
        let proof = Proof::from_snarkjs(&raw_proof(), &["42".to_string()]).unwrap();
        assert_eq!(proof.pi_a, [U256::from(1u64), U256::from(2u64)]);
        assert_eq!(proof.pi_c, [U256::from(7u64), U256::from(8u64)]);
        assert_eq!(proof.public_signals, vec![U256::from(42u64)]);
    }

    #[test]
    fn test_format_swaps_g2_pairs() {
        let proof = Proof::from_snarkjs(&raw_proof(), &["42".to_string()]).unwrap();
        let chain = format_for_chain(&proof).unwrap();

        assert_eq!(chain.p_a, proof.pi_a);
        assert_eq!(
            chain.p_b,
            [
                [U256::from(4u64), U256::from(3u64)],
                [U256::from(6u64), U256::from(5u64)],
            ]
        );
        assert_eq!(chain.p_c, proof.pi_c);
        assert_eq!(chain.pub_signals, [U256::from(42u64)]);
    }

    #[test]
    fn test_format_requires_single_signal() {
        let mut proof = Proof::from_snarkjs(&raw_proof(), &["42".to_string()]).unwrap();
        proof.public_signals.push(U256::from(1u64));
        assert!(format_for_chain(&proof).is_err());

        proof.public_signals.clear();
        assert!(format_for_chain(&proof).is_err());
    }

    #[test]
    fn test_rejects_out_of_field_coordinates() {
        let mut raw = raw_proof();
        raw.pi_a[0] = base_field_modulus().to_string();
        assert!(matches!(
            Proof::from_snarkjs(&raw, &["1".to_string()]),
            Err(SdkError::ProofGenerationFailed(_))
        ));

        let too_big_signal = scalar_field_modulus().to_string();
        assert!(Proof::from_snarkjs(&raw_proof(), &[too_big_signal]).is_err());
    }

    #[test]
    fn test_rejects_wrong_protocol_and_short_points() {
        let mut raw = raw_proof();
        raw.protocol = Some("plonk".into());
        assert!(Proof::from_snarkjs(&raw, &[]).is_err());

        let mut raw = raw_proof();
        raw.curve = Some("bls12381".into());
        assert!(Proof::from_snarkjs(&raw, &[]).is_err());

        let mut raw = raw_proof();
        raw.pi_c = vec!["7".into()];
        assert!(Proof::from_snarkjs(&raw, &[]).is_err());
    }

    #[test]
    fn test_parse_field_element_accepts_hex_and_decimal() {
        assert_eq!(parse_field_element("255").unwrap(), U256::from(255u64));
        assert_eq!(parse_field_element("0xff").unwrap(), U256::from(255u64));
        assert!(parse_field_element("nope").is_err());
    }
}
