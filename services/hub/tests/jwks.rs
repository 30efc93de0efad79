// JWKS-backed key sets: initial fetch over HTTP, and startup behavior
// when the endpoint is unusable. Interval-driven refresh is covered on
// the virtual clock in the service's auth unit tests.
mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::*;
use hub::config::JwtConfig;
use hub::server::Server;

/// Serve fixed JWKS documents for the two roles on an ephemeral port.
async fn serve_jwks(pub_body: String, sub_body: String) -> SocketAddr {
    let app = Router::new()
        .route(
            "/pub",
            get(move || {
                let body = pub_body.clone();
                async move { ([(header::CACHE_CONTROL, "max-age=600")], body).into_response() }
            }),
        )
        .route(
            "/sub",
            get(move || {
                let body = sub_body.clone();
                async move { ([(header::CACHE_CONTROL, "max-age=600")], body).into_response() }
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind jwks server");
    let addr = listener.local_addr().expect("jwks addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    addr
}

fn jwks_only(url: String) -> JwtConfig {
    JwtConfig {
        alg: String::new(),
        key: String::new(),
        jwks_url: Some(url),
    }
}

#[tokio::test]
async fn jwks_backed_roles_verify_tokens() {
    let addr = serve_jwks(
        format!(r#"{{"keys":[{PUB_JWK}]}}"#),
        format!(r#"{{"keys":[{SUB_JWK}]}}"#),
    )
    .await;
    let running = start(base_config(
        jwks_only(format!("http://{addr}/pub")),
        jwks_only(format!("http://{addr}/sub")),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_RS512, SUB_JWT_RS512).await;
    running.stop().await;
}

#[tokio::test]
async fn one_document_can_back_both_roles() {
    let both = format!(r#"{{"keys":[{PUB_JWK},{SUB_JWK}]}}"#);
    let addr = serve_jwks(both.clone(), both).await;
    let running = start(base_config(
        jwks_only(format!("http://{addr}/pub")),
        jwks_only(format!("http://{addr}/sub")),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_RS512, SUB_JWT_RS512).await;
    running.stop().await;
}

#[tokio::test]
async fn keys_from_the_wrong_pair_reject_tokens() {
    let addr = serve_jwks(
        format!(r#"{{"keys":[{JUNK_JWK}]}}"#),
        format!(r#"{{"keys":[{SUB_JWK}]}}"#),
    )
    .await;
    let running = start(base_config(
        jwks_only(format!("http://{addr}/pub")),
        jwks_only(format!("http://{addr}/sub")),
    ))
    .await;
    expect_publish_forbidden(&running, PUB_JWT_RS512).await;
    running.stop().await;
}

#[tokio::test]
async fn unreachable_jwks_without_static_keys_fails_startup() {
    let result = Server::new(base_config(
        jwks_only("http://127.0.0.1:1/pub".to_string()),
        jwks_only("http://127.0.0.1:1/sub".to_string()),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn malformed_jwks_without_static_keys_fails_startup() {
    let addr = serve_jwks("not json".to_string(), "not json".to_string()).await;
    let result = Server::new(base_config(
        jwks_only(format!("http://{addr}/pub")),
        jwks_only(format!("http://{addr}/sub")),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn static_keys_cover_a_failing_jwks_endpoint() {
    // The fetch fails but the static keys keep the role usable.
    let mut publisher = jwt_config("RS512", PUB_KEY_RS512);
    publisher.jwks_url = Some("http://127.0.0.1:1/pub".to_string());
    let running = start(base_config(publisher, jwt_config("RS512", SUB_KEY_RS512))).await;
    run_protocol_scenario(&running, PUB_JWT_RS512, SUB_JWT_RS512).await;
    running.stop().await;
}
