use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde_json::Value;
use tracing::{error, info, warn};

use privpool_sdk::proof::{check_base_field, check_scalar_field, parse_field_element};
use privpool_sdk::relay::RelayResponse;

use crate::chain::{ChainError, PoolChain, WithdrawCall};
use crate::error::{RelayerError, Result, Sanitizer};

const MISSING_PARAMS: &str = "Missing required parameters: pA, pB, pC, pubSignals, recipient";

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn array_of<'a>(value: &'a Value, len: usize, format_error: &str) -> Result<&'a Vec<Value>> {
    match value.as_array() {
        Some(items) if items.len() == len => Ok(items),
        _ => Err(RelayerError::Validation(format_error.to_string())),
    }
}

fn element(value: &Value, name: &str) -> Result<U256> {
    let text = match value {
        Value::String(s) if !s.trim().is_empty() => s.clone(),
        Value::Number(n) if n.is_u64() => n.to_string(),
        _ => {
            return Err(RelayerError::Validation(format!(
                "Invalid {} element (expected numeric string)",
                name
            )))
        }
    };
    parse_field_element(&text).map_err(|_| {
        RelayerError::Validation(format!("Invalid {} element (expected numeric string)", name))
    })
}

fn coordinate(value: &Value, name: &str) -> Result<U256> {
    let v = element(value, name)?;
    check_base_field(&v)
        .map_err(|_| RelayerError::Validation(format!("{} coordinate is outside the BN254 base field", name)))?;
    Ok(v)
}

fn point(value: &Value, name: &str, format_error: &str) -> Result<[U256; 2]> {
    let items = array_of(value, 2, format_error)?;
    Ok([coordinate(&items[0], name)?, coordinate(&items[1], name)?])
}

/// Syntactic gate in front of the chain. Says nothing about proof soundness.
pub fn parse_withdraw_call(body: &Value) -> Result<WithdrawCall> {
    let field = |name: &str| body.get(name);
    if ["pA", "pB", "pC", "pubSignals", "recipient"]
        .iter()
        .any(|name| is_missing(field(name)))
    {
        return Err(RelayerError::Validation(MISSING_PARAMS.into()));
    }

    const PA_FORMAT: &str = "Invalid pA format (expected array of 2 elements)";
    const PB_FORMAT: &str = "Invalid pB format (expected 2x2 array)";
    const PC_FORMAT: &str = "Invalid pC format (expected array of 2 elements)";
    const SIGNALS_FORMAT: &str = "Invalid pubSignals format (expected array of 1 element)";

    // Shapes first, so a malformed later field is reported before a bad number.
    let pa = array_of(&body["pA"], 2, PA_FORMAT)?;
    let pb = array_of(&body["pB"], 2, PB_FORMAT)?;
    for row in pb {
        array_of(row, 2, PB_FORMAT)?;
    }
    let pc = array_of(&body["pC"], 2, PC_FORMAT)?;
    let signals = array_of(&body["pubSignals"], 1, SIGNALS_FORMAT)?;

    let p_a = [coordinate(&pa[0], "pA")?, coordinate(&pa[1], "pA")?];
    let p_b = [
        point(&pb[0], "pB", PB_FORMAT)?,
        point(&pb[1], "pB", PB_FORMAT)?,
    ];
    let p_c = [coordinate(&pc[0], "pC")?, coordinate(&pc[1], "pC")?];

    let nullifier = element(&signals[0], "pubSignals")?;
    check_scalar_field(&nullifier).map_err(|_| {
        RelayerError::Validation("pubSignals element is outside the BN254 scalar field".into())
    })?;

    let recipient: Address = body["recipient"]
        .as_str()
        .and_then(|s| s.trim().parse().ok())
        .filter(|a: &Address| !a.is_zero())
        .ok_or_else(|| RelayerError::Validation("Invalid recipient address".into()))?;

    Ok(WithdrawCall {
        p_a,
        p_b,
        p_c,
        pub_signals: [nullifier],
        recipient,
    })
}

/// Validate, simulate, submit. Holds no nullifier state of its own; the
/// contract's used-set, checked in simulation, is the only double-spend guard.
pub struct WithdrawalService {
    chain: Arc<dyn PoolChain>,
    sanitizer: Sanitizer,
}

impl WithdrawalService {
    pub fn new(chain: Arc<dyn PoolChain>, sanitizer: Sanitizer) -> Self {
        Self { chain, sanitizer }
    }

    pub async fn handle_withdrawal(&self, body: &Value) -> Result<RelayResponse> {
        let call = parse_withdraw_call(body)?;

        info!(
            "Processing withdrawal to {} (nullifier hash {})",
            call.recipient,
            call.nullifier_hash()
        );

        match self.chain.simulate_withdraw(&call).await {
            Ok(()) => info!("Withdrawal simulation passed"),
            Err(ChainError::Reverted(reason)) => {
                warn!("Withdrawal simulation reverted: {}", reason);
                return Err(RelayerError::Simulation(self.sanitizer.clean(&reason)));
            }
            Err(ChainError::Rpc(e)) => {
                error!("Simulation could not reach the chain: {}", e);
                return Err(RelayerError::Chain(self.sanitizer.clean(&e)));
            }
        }

        let tx_hash = self.chain.submit_withdraw(&call).await.map_err(|e| {
            error!("Withdrawal submission failed: {}", e);
            RelayerError::Submission(self.sanitizer.clean(&e.to_string()))
        })?;

        info!("Withdrawal transaction sent: {}", tx_hash);
        Ok(RelayResponse {
            success: true,
            tx_hash: Some(tx_hash.to_string()),
            message: Some("Withdrawal transaction sent successfully".into()),
            error: None,
        })
    }
}
