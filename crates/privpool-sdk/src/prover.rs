/// Withdrawal proof generation.
/// Proves knowledge of `secret` such that `nullifierHash == secret * NULLIFIER_MULTIPLIER`,
/// with `nullifierHash` as the single public signal.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::commitment::{derive_nullifier_hash, Secret};
use crate::error::{Result, SdkError};
use crate::proof::{Proof, SnarkjsProof};

/// Compiled circuit (witness calculator) and its proving key. They are
/// versioned together with the deployed verifier; swapping either one
/// invalidates every proof produced with the old pair.
#[derive(Clone, Debug)]
pub struct CircuitArtifacts {
    pub wasm: PathBuf,
    pub zkey: PathBuf,
}

impl CircuitArtifacts {
    pub fn new(wasm: impl Into<PathBuf>, zkey: impl Into<PathBuf>) -> Self {
        Self {
            wasm: wasm.into(),
            zkey: zkey.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for path in [&self.wasm, &self.zkey] {
            if !path.is_file() {
                return Err(SdkError::ProofGenerationFailed(format!(
                    "Circuit artifact not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Circuit input signals, as decimal strings.
#[derive(Clone, Debug, Serialize)]
pub struct WitnessInput {
    #[serde(serialize_with = "as_decimal")]
    pub secret: U256,
    #[serde(rename = "nullifierHash", serialize_with = "as_decimal")]
    pub nullifier_hash: U256,
}

fn as_decimal<S: serde::Serializer>(value: &U256, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&value.to_string())
}

#[async_trait]
pub trait ProvingBackend: Send + Sync {
    async fn prove(&self, input: &WitnessInput) -> Result<Proof>;
}

/// Runs `snarkjs groth16 fullprove` in a scratch directory.
/// The child is killed if the returned future is dropped.
pub struct SnarkjsBackend {
    program: String,
    leading_args: Vec<String>,
    artifacts: CircuitArtifacts,
}

impl SnarkjsBackend {
    pub fn new(program: impl Into<String>, artifacts: CircuitArtifacts) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            artifacts,
        }
    }

    /// Parses a command line such as `npx snarkjs`.
    pub fn from_command_line(command: &str, artifacts: CircuitArtifacts) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| SdkError::InvalidInput("Empty snarkjs command".into()))?;
        Ok(Self {
            program,
            leading_args: parts.collect(),
            artifacts,
        })
    }

    pub fn artifacts(&self) -> &CircuitArtifacts {
        &self.artifacts
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            SdkError::ProofGenerationFailed(format!("Missing output {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            SdkError::ProofGenerationFailed(format!("Malformed output {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl ProvingBackend for SnarkjsBackend {
    async fn prove(&self, input: &WitnessInput) -> Result<Proof> {
        self.artifacts.validate()?;

        let workdir = tempfile::tempdir()
            .map_err(|e| SdkError::ProofGenerationFailed(format!("Scratch dir: {}", e)))?;
        let input_path = workdir.path().join("input.json");
        let proof_path = workdir.path().join("proof.json");
        let public_path = workdir.path().join("public.json");

        let input_json = serde_json::to_vec(input)
            .map_err(|e| SdkError::Serialization(e.to_string()))?;
        tokio::fs::write(&input_path, input_json)
            .await
            .map_err(|e| SdkError::ProofGenerationFailed(format!("Write input: {}", e)))?;

        debug!("Running {} groth16 fullprove", self.program);
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("groth16")
            .arg("fullprove")
            .arg(&input_path)
            .arg(&self.artifacts.wasm)
            .arg(&self.artifacts.zkey)
            .arg(&proof_path)
            .arg(&public_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SdkError::ProofGenerationFailed(format!("Failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr.lines().last().unwrap_or("no output").trim().to_string();
            return Err(SdkError::ProofGenerationFailed(format!(
                "snarkjs exited with {}: {}",
                output.status, reason
            )));
        }

        let raw: SnarkjsProof = Self::read_json(&proof_path).await?;
        let public: Vec<String> = Self::read_json(&public_path).await?;
        Proof::from_snarkjs(&raw, &public)
    }
}

/// Fronts a backend with input checks and a per-nullifier in-flight guard.
pub struct ProofGenerator {
    backend: Arc<dyn ProvingBackend>,
    in_flight: Mutex<HashSet<U256>>,
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<U256>>,
    key: U256,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<U256>>, key: U256) -> Result<Self> {
        let mut pending = set
            .lock()
            .map_err(|_| SdkError::ProofGenerationFailed("in-flight set poisoned".into()))?;
        if !pending.insert(key) {
            return Err(SdkError::ProofInFlight);
        }
        Ok(Self { set, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.set.lock() {
            pending.remove(&self.key);
        }
    }
}

impl ProofGenerator {
    pub fn new(backend: Arc<dyn ProvingBackend>) -> Self {
        Self {
            backend,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn snarkjs(command: &str, artifacts: CircuitArtifacts) -> Result<Self> {
        Ok(Self::new(Arc::new(SnarkjsBackend::from_command_line(
            command, artifacts,
        )?)))
    }

    /// Number of proofs currently being generated.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Long-running; drop the future to cancel. A second call for the same
    /// nullifier while one is running fails with `ProofInFlight`.
    pub async fn generate_proof(&self, secret: &Secret, nullifier_hash: U256) -> Result<Proof> {
        if derive_nullifier_hash(secret) != nullifier_hash {
            return Err(SdkError::ProofGenerationFailed(
                "Nullifier hash does not belong to this secret".into(),
            ));
        }

        let _guard = InFlightGuard::acquire(&self.in_flight, nullifier_hash)?;
        info!("Generating withdrawal proof for nullifier {}", nullifier_hash);

        let input = WitnessInput {
            secret: secret.to_field(),
            nullifier_hash,
        };
        let proof = self.backend.prove(&input).await.map_err(|e| match e {
            SdkError::ProofGenerationFailed(_) => e,
            other => SdkError::ProofGenerationFailed(other.to_string()),
        })?;

        if proof.public_signals != [nullifier_hash] {
            warn!(
                "Prover returned unexpected public signals: {:?}",
                proof.public_signals
            );
            return Err(SdkError::ProofGenerationFailed(
                "Public signals do not match the nullifier hash".into(),
            ));
        }

        info!("Withdrawal proof generated");
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct EchoBackend {
        delay: Duration,
        tamper: bool,
    }

    #[async_trait]
    impl ProvingBackend for EchoBackend {
        async fn prove(&self, input: &WitnessInput) -> Result<Proof> {
            tokio::time::sleep(self.delay).await;
            let signal = if self.tamper {
                input.nullifier_hash + U256::from(1u64)
            } else {
                input.nullifier_hash
            };
            Ok(Proof {
                pi_a: [U256::from(1u64), U256::from(2u64)],
                pi_b: [
                    [U256::from(3u64), U256::from(4u64)],
                    [U256::from(5u64), U256::from(6u64)],
                ],
                pi_c: [U256::from(7u64), U256::from(8u64)],
                public_signals: vec![signal],
            })
        }
    }

    fn generator(delay_ms: u64, tamper: bool) -> ProofGenerator {
        ProofGenerator::new(Arc::new(EchoBackend {
            delay: Duration::from_millis(delay_ms),
            tamper,
        }))
    }

    #[tokio::test]
    async fn test_public_signal_is_nullifier_hash() {
        let secret = Secret::from_bytes([0xAA; 32]);
        let nullifier = derive_nullifier_hash(&secret);

        let proof = generator(0, false)
            .generate_proof(&secret, nullifier)
            .await
            .unwrap();
        assert_eq!(proof.public_signals, vec![nullifier]);
    }

    #[tokio::test]
    async fn test_mismatched_nullifier_rejected() {
        let secret = Secret::from_bytes([0xAA; 32]);
        let result = generator(0, false)
            .generate_proof(&secret, U256::from(5u64))
            .await;
        assert!(matches!(result, Err(SdkError::ProofGenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_tampered_signals_rejected() {
        let secret = Secret::from_bytes([0x01; 32]);
        let nullifier = derive_nullifier_hash(&secret);
        let result = generator(0, true).generate_proof(&secret, nullifier).await;
        assert!(matches!(result, Err(SdkError::ProofGenerationFailed(_))));
    }

    #[tokio::test]
    async fn test_same_secret_not_proven_twice_concurrently() {
        let gen = generator(50, false);
        let secret = Secret::from_bytes([0x02; 32]);
        let nullifier = derive_nullifier_hash(&secret);

        let (first, second) = tokio::join!(
            gen.generate_proof(&secret, nullifier),
            gen.generate_proof(&secret, nullifier)
        );
        let rejected = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(SdkError::ProofInFlight)))
            .count();
        assert_eq!(rejected, 1);
        assert!(first.is_ok() || second.is_ok());
        assert_eq!(gen.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_secrets_run_concurrently() {
        let gen = generator(20, false);
        let a = Secret::from_bytes([0x03; 32]);
        let b = Secret::from_bytes([0x04; 32]);

        let (ra, rb) = tokio::join!(
            gen.generate_proof(&a, derive_nullifier_hash(&a)),
            gen.generate_proof(&b, derive_nullifier_hash(&b))
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_releases_guard() {
        let gen = generator(1_000, false);
        let secret = Secret::from_bytes([0x05; 32]);
        let nullifier = derive_nullifier_hash(&secret);

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            gen.generate_proof(&secret, nullifier),
        )
        .await;
        assert!(timed_out.is_err());
        assert_eq!(gen.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_snarkjs_missing_artifacts() {
        let backend = SnarkjsBackend::new(
            "snarkjs",
            CircuitArtifacts::new("/nonexistent/withdraw.wasm", "/nonexistent/withdraw.zkey"),
        );
        let input = WitnessInput {
            secret: U256::from(1u64),
            nullifier_hash: U256::from(123_456_789u64),
        };
        assert!(matches!(
            backend.prove(&input).await,
            Err(SdkError::ProofGenerationFailed(_))
        ));
    }

    #[test]
    fn test_witness_input_json() {
        let input = WitnessInput {
            secret: U256::from(2u64),
            nullifier_hash: U256::from(246_913_578u64),
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["secret"], "2");
        assert_eq!(json["nullifierHash"], "246913578");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snarkjs_output_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let wasm = dir.path().join("withdraw.wasm");
        let zkey = dir.path().join("withdraw_0000.zkey");
        std::fs::write(&wasm, b"wasm").unwrap();
        std::fs::write(&zkey, b"zkey").unwrap();

        // Stand-in for snarkjs: $6 = proof.json, $7 = public.json
        let script = dir.path().join("fake-snarkjs.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             echo '{\"pi_a\":[\"1\",\"2\",\"1\"],\"pi_b\":[[\"3\",\"4\"],[\"5\",\"6\"],[\"1\",\"0\"]],\"pi_c\":[\"7\",\"8\",\"1\"],\"protocol\":\"groth16\"}' > \"$6\"\n\
             echo '[\"246913578\"]' > \"$7\"\n",
        )
        .unwrap();

        let command = format!("sh {}", script.display());
        let gen = ProofGenerator::snarkjs(&command, CircuitArtifacts::new(&wasm, &zkey)).unwrap();

        let mut bytes = [0u8; 32];
        bytes[31] = 2;
        let secret = Secret::from_bytes(bytes);
        let proof = gen
            .generate_proof(&secret, U256::from(246_913_578u64))
            .await
            .unwrap();
        assert_eq!(proof.pi_b[0], [U256::from(3u64), U256::from(4u64)]);
        assert_eq!(proof.public_signals, vec![U256::from(246_913_578u64)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_snarkjs_failure_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let wasm = dir.path().join("withdraw.wasm");
        let zkey = dir.path().join("withdraw_0000.zkey");
        std::fs::write(&wasm, b"wasm").unwrap();
        std::fs::write(&zkey, b"zkey").unwrap();

        let script = dir.path().join("failing-snarkjs.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'Assert Failed' >&2\nexit 1\n").unwrap();

        let backend = SnarkjsBackend::from_command_line(
            &format!("sh {}", script.display()),
            CircuitArtifacts::new(&wasm, &zkey),
        )
        .unwrap();
        let input = WitnessInput {
            secret: U256::from(1u64),
            nullifier_hash: U256::from(1u64),
        };
        match backend.prove(&input).await {
            Err(SdkError::ProofGenerationFailed(msg)) => assert!(msg.contains("Assert Failed")),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
