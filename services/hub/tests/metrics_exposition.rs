// Prometheus exposition end to end. This lives in its own test binary
// because the recorder installs globally, once per process.
mod common;

use common::*;
use std::time::Duration;

fn free_port() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe port");
    listener.local_addr().expect("probe addr")
}

#[tokio::test]
async fn counters_are_exposed_after_a_round_trip() {
    let metrics_addr = free_port();
    let mut config = base_config(
        jwt_config("PS384", PUB_KEY_PS384),
        jwt_config("PS384", SUB_KEY_PS384),
    );
    config.metrics_listen = Some(metrics_addr);
    let running = start(config).await;

    run_protocol_scenario(&running, PUB_JWT_PS384, SUB_JWT_PS384).await;
    // Let the gauge sampler tick at least once.
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let body = client()
        .get(format!("http://{metrics_addr}/metrics"))
        .send()
        .await
        .expect("scrape")
        .text()
        .await
        .expect("exposition");

    assert!(body.contains("cinnabar_connections_active"), "{body}");
    assert!(body.contains("cinnabar_messages_published 1"), "{body}");
    // Subscribe event, the message itself, unsubscribe event.
    assert!(body.contains("cinnabar_messages_sent 3"), "{body}");
    assert!(body.contains("cinnabar_subscriptions_total 2"), "{body}");
    assert!(body.contains("cinnabar_connections_terminated 0"), "{body}");
    assert!(body.contains("cinnabar_message_cache_count"), "{body}");

    running.stop().await;
}
