// End-to-end protocol tests across the supported algorithm families,
// plus the startup validation matrix.
mod common;

use common::*;
use hub::server::Server;

#[tokio::test]
async fn rs512_round_trip() {
    let running = start(base_config(
        jwt_config("RS512", PUB_KEY_RS512),
        jwt_config("RS512", SUB_KEY_RS512),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_RS512, SUB_JWT_RS512).await;
    running.stop().await;
}

#[tokio::test]
async fn newline_delimited_multi_key_accepts_either_signer() {
    // Both roles carry both public keys; tokens signed by either verify.
    let both = format!("{PUB_KEY_RS512}\n{SUB_KEY_RS512}");
    let running = start(base_config(
        jwt_config("RS512", &both),
        jwt_config("RS512", &both),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_RS512, SUB_JWT_RS512).await;
    running.stop().await;
}

#[tokio::test]
async fn hs256_round_trip() {
    let running = start(base_config(
        jwt_config("HS256", PUB_KEY_HS256),
        jwt_config("HS256", SUB_KEY_HS256),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_HS256, SUB_JWT_HS256).await;
    running.stop().await;
}

#[tokio::test]
async fn es256_round_trip() {
    let running = start(base_config(
        jwt_config("ES256", PUB_KEY_ES256),
        jwt_config("ES256", SUB_KEY_ES256),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_ES256, SUB_JWT_ES256).await;
    running.stop().await;
}

#[tokio::test]
async fn ps384_round_trip() {
    let running = start(base_config(
        jwt_config("PS384", PUB_KEY_PS384),
        jwt_config("PS384", SUB_KEY_PS384),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_PS384, SUB_JWT_PS384).await;
    running.stop().await;
}

#[tokio::test]
async fn tokens_without_exp_are_accepted() {
    let running = start(base_config(
        jwt_config("HS256", PUB_KEY_HS256),
        jwt_config("HS256", SUB_KEY_HS256),
    ))
    .await;
    run_protocol_scenario(&running, PUB_JWT_HS256_NO_EXP, SUB_JWT_HS256_NO_EXP).await;
    running.stop().await;
}

#[tokio::test]
async fn wrong_role_keys_reject_the_publish() {
    // Publisher key set only holds the subscriber's key.
    let running = start(base_config(
        jwt_config("RS512", SUB_KEY_RS512),
        jwt_config("RS512", SUB_KEY_RS512),
    ))
    .await;
    expect_publish_forbidden(&running, PUB_JWT_RS512).await;
    running.stop().await;
}

#[tokio::test]
async fn eddsa_configuration_fails_startup() {
    let result = Server::new(base_config(
        jwt_config("EdDSA", PUB_KEY_PS384),
        jwt_config("EdDSA", SUB_KEY_PS384),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unknown_algorithm_fails_startup() {
    let result = Server::new(base_config(
        jwt_config("noalg", PUB_KEY_PS384),
        jwt_config("noalg", SUB_KEY_PS384),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn garbage_key_material_fails_startup() {
    let result = Server::new(base_config(
        jwt_config("RS512", "herp"),
        jwt_config("RS512", "derp"),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn key_of_the_wrong_family_fails_startup() {
    let result = Server::new(base_config(
        jwt_config("RS512", PUB_KEY_ES256),
        jwt_config("RS512", SUB_KEY_ES256),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn private_key_material_fails_startup() {
    let result = Server::new(base_config(
        jwt_config("RS512", PRIV_KEY_RS512),
        jwt_config("RS512", PRIV_KEY_RS512),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn missing_publisher_keys_fail_startup() {
    let result = Server::new(base_config(
        jwt_config("RS512", ""),
        jwt_config("RS512", SUB_KEY_RS512),
    ))
    .start()
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn missing_subscriber_keys_fail_startup() {
    let result = Server::new(base_config(
        jwt_config("RS512", PUB_KEY_RS512),
        jwt_config("RS512", ""),
    ))
    .start()
    .await;
    assert!(result.is_err());
}
