//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Fallback for unknown routes: JSON 404 in the API error shape
async fn fallback_handler(uri: axum::http::Uri) -> impl IntoResponse {
    let body = serde_json::json!({
        "code": "NOT_FOUND",
        "error": format!("no route for {}", uri.path()),
    });
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::NOT_FOUND.into_response())
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Wallets
        .route("/wallets", post(handlers::create_wallet))
        .route("/wallets/{id}", get(handlers::get_wallet))
        .route("/wallets/{id}/copayers", post(handlers::join_wallet))
        .route("/wallets/{id}/addresses", post(handlers::create_address))
        .route("/wallets/{id}/utxos", post(handlers::register_utxo))
        // Proposals
        .route(
            "/txproposals",
            get(handlers::list_proposals).post(handlers::create_proposal),
        )
        .route(
            "/txproposals/{id}",
            get(handlers::get_proposal).delete(handlers::remove_proposal),
        )
        .route(
            "/txproposals/{id}/signatures",
            post(handlers::submit_signatures),
        )
        .route("/txproposals/{id}/publish", post(handlers::publish_proposal))
        .route(
            "/txproposals/{id}/broadcast",
            post(handlers::broadcast_proposal),
        )
        .route(
            "/txproposals/{id}/rejections",
            post(handlers::reject_proposal),
        )
        .fallback(fallback_handler)
        // Add state and middleware
        .with_state(state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OutPoint, SignatureScheme, TxId};
    use crate::crypto::keys::test_keys::TestSigner;
    use crate::multisig::{EngineConfig, MultisigManager};
    use crate::network::RecordingBroadcaster;
    use crate::storage::MemoryStore;
    use crate::wallet::AdditiveDeriver;
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn test_state() -> ApiState {
        let manager = MultisigManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingBroadcaster::new()),
            Arc::new(AdditiveDeriver),
            EngineConfig::default(),
        )
        .unwrap();
        ApiState {
            manager: Arc::new(manager),
        }
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        identity: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = identity {
            builder = builder.header(handlers::IDENTITY_HEADER, id);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wallet_setup_and_proposal_routes() {
        let state = test_state();
        let app = create_router(state.clone());

        let (status, wallet) = call(
            &app,
            "POST",
            "/wallets",
            None,
            Some(json!({ "name": "ops", "m": 1, "n": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let wallet_id = wallet["id"].as_str().unwrap().to_string();

        let mut copayers = Vec::new();
        for name in ["alice", "bob"] {
            let signer = TestSigner::generate();
            let (status, joined) = call(
                &app,
                "POST",
                &format!("/wallets/{}/copayers", wallet_id),
                None,
                Some(json!({ "name": name, "publicKey": signer.point.to_hex() })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            copayers.push(joined["copayer"]["id"].as_str().unwrap().to_string());
        }

        let (status, address) = call(
            &app,
            "POST",
            &format!("/wallets/{}/addresses", wallet_id),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(address["path"], "m/0/0");

        let (status, _) = call(
            &app,
            "POST",
            &format!("/wallets/{}/utxos", wallet_id),
            None,
            Some(json!({
                "txId": TxId([7; 32]).to_string(),
                "outputIndex": 1,
                "amount": 100_000,
                "address": address["address"],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, proposal) = call(
            &app,
            "POST",
            "/txproposals",
            Some(&copayers[0]),
            Some(json!({
                "walletId": wallet_id,
                "outputs": [{ "address": "3ExternalRecipientAddress", "amount": 40_000 }],
                "feeRate": 2,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(proposal["status"], "pending");
        let proposal_id = proposal["id"].as_str().unwrap().to_string();

        let (status, list) = call(
            &app,
            "GET",
            &format!("/txproposals?walletId={}&status=pending", wallet_id),
            Some(&copayers[1]),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, wallet) =
            call(&app, "GET", &format!("/wallets/{}", wallet_id), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(wallet["balance"]["locked"], 100_000);

        // Duplicate rejection is a conflict
        let uri = format!("/txproposals/{}/rejections", proposal_id);
        let (status, _) = call(&app, "POST", &uri, Some(&copayers[1]), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", &uri, Some(&copayers[1]), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "DUPLICATE_VOTE");

        // Removal by the creator frees the funds
        let uri = format!("/txproposals/{}", proposal_id);
        let (status, removed) = call(&app, "DELETE", &uri, Some(&copayers[0]), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(removed["status"], "removed");
        let outpoint = OutPoint::new(TxId([7; 32]), 1);
        assert!(state.manager.locks().is_free(&outpoint));
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let state = test_state();
        let app = create_router(state.clone());

        let (status, body) = call(&app, "GET", "/txproposals/nope", Some("someone"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, body) = call(&app, "GET", "/txproposals/nope", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "NOT_AUTHORIZED");

        let (status, body) = call(
            &app,
            "POST",
            "/wallets",
            None,
            Some(json!({ "name": "bad", "m": 3, "n": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");

        let wallet = state
            .manager
            .register_wallet("x", 1, 1, SignatureScheme::Ecdsa)
            .unwrap();
        let (status, body) = call(
            &app,
            "POST",
            &format!("/wallets/{}/copayers", wallet.id),
            None,
            Some(json!({ "name": "c", "publicKey": "02" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_POINT");

        let (status, body) = call(&app, "GET", "/nowhere", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_json_is_invalid_argument() {
        let app = create_router(test_state());

        for (uri, body) in [
            ("/wallets", "{ not json"),
            ("/wallets", r#"{ "name": "ops" }"#),
            ("/txproposals", r#"{ "walletId": 7 }"#),
        ] {
            let request = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(handlers::IDENTITY_HEADER, "someone")
                .body(Body::from(body))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{} {}", uri, body);
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value["code"], "INVALID_ARGUMENT");
            assert!(value["error"].as_str().unwrap().starts_with("Invalid argument"));
        }

        // Missing content type goes through the same mapping
        let request = Request::post("/wallets")
            .body(Body::from(r#"{ "name": "ops", "m": 1, "n": 1 }"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_map() {
        assert_eq!(handlers::status_for("LOCK_CONFLICT"), StatusCode::CONFLICT);
        assert_eq!(
            handlers::status_for("SIGNATURE_MISMATCH"),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(handlers::status_for("BROADCAST_FAILED"), StatusCode::BAD_GATEWAY);
        assert_eq!(
            handlers::status_for("INVARIANT_VIOLATION"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
