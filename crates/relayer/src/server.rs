use std::sync::Arc;

use alloy::primitives::utils::format_units;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info};

use privpool_sdk::relay::{BalanceResponse, HealthResponse, RelayResponse};

use crate::chain::PoolChain;
use crate::config::RelayerConfig;
use crate::error::{RelayerError, Sanitizer};
use crate::withdrawal::WithdrawalService;

pub struct RelayerState {
    pub chain: Arc<dyn PoolChain>,
    pub withdrawal_service: Arc<WithdrawalService>,
    pub sanitizer: Sanitizer,
    pub network_name: String,
    pub max_body_bytes: usize,
}

impl RelayerState {
    pub fn new(config: &RelayerConfig, chain: Arc<dyn PoolChain>) -> Self {
        let sanitizer = Sanitizer::new(config.redactions());
        let withdrawal_service = Arc::new(WithdrawalService::new(chain.clone(), sanitizer.clone()));
        Self {
            chain,
            withdrawal_service,
            sanitizer,
            network_name: config.network_name.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// Routes plus body limit, tracing and CORS. Rate limiting needs the peer
/// address, so it is layered on in `run`.
pub fn router(state: Arc<RelayerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/balance", get(balance))
        .route("/withdraw", post(withdraw))
        .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(state: Arc<RelayerState>, config: &RelayerConfig) -> anyhow::Result<()> {
    // SmartIpKeyExtractor handles both direct connections and proxied requests
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_second)
        .burst_size(config.rate_limit_burst)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?;

    let app = router(state).layer(GovernorLayer {
        config: Arc::new(governor_conf),
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Relayer listening on {} (rate limited: {} req/s per IP, burst {})",
        addr, config.rate_limit_per_second, config.rate_limit_burst
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health(State(state): State<Arc<RelayerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        relayer_address: state.chain.relayer_address().to_string(),
        pool_address: state.chain.pool_address().to_string(),
        network: state.network_name.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Ether amount with six decimals, truncated.
fn format_eth(wei: alloy::primitives::U256) -> String {
    let full = format_units(wei, "ether").unwrap_or_else(|_| "0.0".to_string());
    match full.split_once('.') {
        Some((whole, frac)) => {
            let mut frac: String = frac.chars().take(6).collect();
            while frac.len() < 6 {
                frac.push('0');
            }
            format!("{}.{}", whole, frac)
        }
        None => format!("{}.000000", full),
    }
}

async fn balance(
    State(state): State<Arc<RelayerState>>,
) -> std::result::Result<Json<BalanceResponse>, RelayerError> {
    let wei = state.chain.balance().await.map_err(|e| {
        error!("Balance check failed: {}", e);
        RelayerError::Chain(state.sanitizer.clean(&e.to_string()))
    })?;

    Ok(Json(BalanceResponse {
        address: state.chain.relayer_address().to_string(),
        balance: wei.to_string(),
        balance_eth: format_eth(wei),
    }))
}

async fn withdraw(
    State(state): State<Arc<RelayerState>>,
    payload: std::result::Result<Json<Value>, JsonRejection>,
) -> std::result::Result<Json<RelayResponse>, RelayerError> {
    let Json(body) = payload
        .map_err(|e| RelayerError::Validation(format!("Invalid JSON body: {}", e.body_text())))?;
    let response = state.withdrawal_service.handle_withdrawal(&body).await?;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use alloy::primitives::U256;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    fn state(chain: Arc<MockChain>) -> Arc<RelayerState> {
        let sanitizer = Sanitizer::new(vec!["http://node.internal:8545".into()]);
        Arc::new(RelayerState {
            withdrawal_service: Arc::new(WithdrawalService::new(chain.clone(), sanitizer.clone())),
            chain,
            sanitizer,
            network_name: "Base Sepolia".into(),
            max_body_bytes: 16 * 1024,
        })
    }

    fn withdraw_request(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/withdraw")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn valid_body() -> Value {
        json!({
            "pA": ["1", "2"],
            "pB": [["3", "4"], ["5", "6"]],
            "pC": ["7", "8"],
            "pubSignals": ["123456789"],
            "recipient": "0x1111111111111111111111111111111111111111",
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state(Arc::new(MockChain::default())));
        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["network"], "Base Sepolia");
        assert_eq!(
            body["poolAddress"],
            alloy::primitives::Address::repeat_byte(0x33).to_string()
        );
        assert!(body["relayerAddress"].is_string());
    }

    #[tokio::test]
    async fn test_balance() {
        let app = router(state(Arc::new(MockChain::default())));
        let request = Request::get("/balance").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], "1234567000000000000");
        assert_eq!(body["balanceEth"], "1.234567");
    }

    #[tokio::test]
    async fn test_balance_failure_is_500_and_sanitized() {
        let chain = Arc::new(MockChain::default());
        chain.rpc_down.store(true, Ordering::SeqCst);
        let request = Request::get("/balance").body(Body::empty()).unwrap();
        let (status, body) = send(router(state(chain)), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(!body["error"].as_str().unwrap().contains("node.internal"));
    }

    #[tokio::test]
    async fn test_short_pa_rejected_without_chain_call() {
        let chain = Arc::new(MockChain::default());
        let mut body = valid_body();
        body["pA"] = json!(["1"]);

        let (status, resp) = send(router(state(chain.clone())), withdraw_request(&body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["success"], false);
        assert_eq!(
            resp["error"],
            "Invalid pA format (expected array of 2 elements)"
        );
        assert_eq!(chain.simulations(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let chain = Arc::new(MockChain::default());
        let request = Request::builder()
            .method("POST")
            .uri("/withdraw")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, resp) = send(router(state(chain.clone())), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(resp["success"], false);
        assert_eq!(chain.simulations(), 0);
    }

    #[tokio::test]
    async fn test_simulation_revert_is_400_without_submit() {
        let chain = Arc::new(MockChain::default());
        *chain.revert_with.lock().unwrap() = Some("execution reverted: invalid proof".into());

        let (status, resp) = send(router(state(chain.clone())), withdraw_request(&valid_body())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["error"]
            .as_str()
            .unwrap()
            .starts_with("Simulation failed: "));
        assert_eq!(chain.simulations(), 1);
        assert_eq!(chain.submissions(), 0);
    }

    #[tokio::test]
    async fn test_withdraw_once_then_replay() {
        let chain = Arc::new(MockChain::default());
        let app = router(state(chain.clone()));

        let (status, resp) = send(app.clone(), withdraw_request(&valid_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["success"], true);
        assert_eq!(resp["message"], "Withdrawal transaction sent successfully");
        assert!(!resp["txHash"].as_str().unwrap().is_empty());
        assert_eq!(chain.submissions(), 1);

        let (status, resp) = send(app, withdraw_request(&valid_body())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["error"]
            .as_str()
            .unwrap()
            .contains("nullifier already used"));
        assert_eq!(chain.submissions(), 1);
    }

    #[tokio::test]
    async fn test_submit_failure_is_500_and_sanitized() {
        let chain = Arc::new(MockChain::default());
        chain.fail_submit.store(true, Ordering::SeqCst);

        let (status, resp) = send(router(state(chain.clone())), withdraw_request(&valid_body())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp["success"], false);
        let error = resp["error"].as_str().unwrap();
        assert!(error.starts_with("Failed to send transaction: "));
        assert!(!error.contains("node.internal"));
        assert!(resp.get("txHash").is_none());
        assert_eq!(chain.simulations(), 1);
        assert_eq!(chain.submissions(), 1);
    }

    #[tokio::test]
    async fn test_responses_decode_as_sdk_types() {
        let chain = Arc::new(MockChain::default());
        let app = router(state(chain));

        let (_, body) = send(app.clone(), Request::get("/health").body(Body::empty()).unwrap()).await;
        let health: HealthResponse = serde_json::from_value(body).unwrap();
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));

        let (_, body) = send(app.clone(), Request::get("/balance").body(Body::empty()).unwrap()).await;
        let balance: BalanceResponse = serde_json::from_value(body).unwrap();
        assert_eq!(balance.balance_eth, "1.234567");

        let (_, body) = send(app, withdraw_request(&valid_body())).await;
        let relay: RelayResponse = serde_json::from_value(body).unwrap();
        assert!(relay.success);
        assert!(relay.tx_hash.is_some());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let chain = Arc::new(MockChain::default());
        let mut body = valid_body();
        body["padding"] = json!("x".repeat(32 * 1024));
        let payload = body.to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/withdraw")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, payload.len())
            .body(Body::from(payload))
            .unwrap();

        let response = router(state(chain.clone())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(chain.simulations(), 0);
    }

    #[test]
    fn test_format_eth() {
        assert_eq!(format_eth(U256::ZERO), "0.000000");
        assert_eq!(format_eth(U256::from(1_500_000_000_000_000_000u128)), "1.500000");
        assert_eq!(format_eth(U256::from(123u64)), "0.000000");
    }
}
