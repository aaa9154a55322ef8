mod support;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use support::{make_library, mem_pool, KNOWN_CLAIM_ID};
use transcode_conductor::admin::AdminServer;
use transcode_conductor::metrics::Metrics;

const TOKEN: &str = "test-token";

async fn start_server() -> (String, CancellationToken) {
    let pool = mem_pool().await;
    let library = make_library(pool);
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let stop = CancellationToken::new();

    let server = AdminServer::new(library, metrics, TOKEN, "127.0.0.1:0");
    let addr = server.start(stop.clone()).await.expect("bind admin server");
    (format!("http://{addr}"), stop)
}

#[tokio::test]
async fn channel_creation_and_duplicate_rejection() {
    let (base, stop) = start_server().await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/channel");

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .form(&[("channel", "@specialoperationstest:3")])
        .send()
        .await
        .expect("first request");
    assert_eq!(resp.status(), 201);
    let body = resp.text().await.expect("body");
    assert!(body.contains(KNOWN_CLAIM_ID));
    assert!(body.contains("lbry://@specialoperationstest#3"));

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .form(&[("channel", "@specialoperationstest:3")])
        .send()
        .await
        .expect("duplicate request");
    assert_eq!(resp.status(), 400);
    let body = resp.text().await.expect("body");
    assert!(body.contains("UNIQUE constraint"), "body was: {body}");

    stop.cancel();
}

#[tokio::test]
async fn unknown_channel_is_a_bad_request() {
    let (base, stop) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/v1/channel"))
        .header("Authorization", format!("Bearer {TOKEN}"))
        .form(&[("channel", "@nosuchchannelanywhere")])
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    let body = resp.text().await.expect("body");
    assert!(body.contains("channel not found"), "body was: {body}");

    stop.cancel();
}

#[tokio::test]
async fn auth_and_validation_failures() {
    let (base, stop) = start_server().await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/channel");

    let resp = client
        .post(&url)
        .header("Authorization", "Bearer wrong-token")
        .form(&[("channel", "@specialoperationstest:3")])
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(&url)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .form(&[("other", "value")])
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await.expect("body").contains("channel field is required"));

    stop.cancel();
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let (base, stop) = start_server().await;

    let resp = reqwest::get(format!("{base}/metrics")).await.expect("request");
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.expect("body");
    // Vector metrics only appear once labeled; the plain counter is always there.
    assert!(body.contains("transcoding_requests_published"));

    stop.cancel();
}
