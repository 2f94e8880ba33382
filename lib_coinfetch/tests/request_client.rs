//! Integration tests for `RequestClient` against a local mockito server.

use std::time::{Duration, Instant};

use lib_coinfetch::retrieve::transport::TransportOptions;
use lib_coinfetch::{
    build_url_with_params, Envelope, FetchError, Fetched, ParamValue, RateLimitPolicy,
    RequestClient,
};
use mockito::{Matcher, Server};
use reqwest::StatusCode;
use serde_json::json;

/// Transport settings with millisecond backoff so retry tests stay fast.
fn fast_transport(max_retries: u32) -> TransportOptions {
    TransportOptions {
        timeout: Duration::from_secs(10),
        max_retries,
        backoff_min: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        ..TransportOptions::default()
    }
}

fn client() -> RequestClient {
    RequestClient::with_options(&fast_transport(5), RateLimitPolicy::default()).unwrap()
}

#[tokio::test]
async fn object_body_comes_back_with_numeric_status() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/simple/price")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"bitcoin":{"usd":30123.5,"eur":27801.1}}"#)
        .expect(1)
        .create_async()
        .await;

    let envelope = client()
        .fetch_json(&format!("{}/simple/price", server.url()))
        .await
        .unwrap();

    mock.assert_async().await;
    assert!(!envelope.is_error());
    assert_eq!(
        envelope.to_value(),
        json!({"bitcoin": {"usd": 30123.5, "eur": 27801.1}, "status": 200})
    );
}

#[tokio::test]
async fn array_body_is_wrapped_in_result() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/coins/list")
        .with_status(200)
        .with_body(r#"[{"id":"bitcoin"},{"id":"litecoin"}]"#)
        .create_async()
        .await;

    let fetched = client()
        .fetch(&format!("{}/coins/list", server.url()), false)
        .await
        .unwrap();

    let Fetched::Json(envelope) = fetched else {
        panic!("expected a JSON envelope");
    };
    assert_eq!(
        envelope.to_value(),
        json!({"result": [{"id": "bitcoin"}, {"id": "litecoin"}], "status": 200})
    );
}

#[tokio::test]
async fn not_found_becomes_an_error_envelope() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/coins/nope")
        .with_status(404)
        .with_body(r#"{"error":"coin not found"}"#)
        .create_async()
        .await;

    let envelope = client()
        .fetch_json(&format!("{}/coins/nope", server.url()))
        .await
        .expect("HTTP errors must not escape as Err");

    assert!(envelope.is_error());
    assert_eq!(envelope.status(), StatusCode::NOT_FOUND);
    let message = envelope.error_message().unwrap();
    assert!(message.contains("404"), "unexpected message: {message}");

    let flat = envelope.to_value();
    assert_eq!(flat["status"], json!("error"));
    assert_eq!(flat["error"], json!(message));
    assert_eq!(flat["prices"], json!([]));
}

#[tokio::test]
async fn invalid_json_is_treated_as_an_empty_body() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/status")
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let envelope = client()
        .fetch_json(&format!("{}/status", server.url()))
        .await
        .unwrap();

    assert_eq!(envelope.to_value(), json!({"status": 200}));
}

#[tokio::test]
async fn rate_limit_waits_retry_after_plus_one_second() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/ticker")
        .with_status(429)
        .with_header("retry-after", "2")
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/ticker")
        .with_status(200)
        .with_body(r#"{"price":1.25}"#)
        .expect(1)
        .create_async()
        .await;

    let started = Instant::now();
    let envelope = client()
        .fetch_json(&format!("{}/ticker", server.url()))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    limited.assert_async().await;
    ok.assert_async().await;
    assert_eq!(envelope.to_value(), json!({"price": 1.25, "status": 200}));
    assert!(elapsed >= Duration::from_secs(3), "waited only {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "waited too long: {elapsed:?}");
}

#[tokio::test]
async fn rate_limit_without_retry_after_is_an_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/ticker")
        .with_status(429)
        .create_async()
        .await;

    let err = client()
        .fetch_json(&format!("{}/ticker", server.url()))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RateLimited { .. }), "got {err:?}");
}

#[tokio::test]
async fn exhausted_rate_limit_budget_gives_up() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/ticker")
        .with_status(429)
        .with_header("retry-after", "0")
        .expect(1)
        .create_async()
        .await;

    let policy = RateLimitPolicy {
        max_waits: Some(0),
        max_total_wait: None,
    };
    let client = RequestClient::with_options(&fast_transport(0), policy).unwrap();
    let err = client
        .fetch_json(&format!("{}/ticker", server.url()))
        .await
        .unwrap_err();

    limited.assert_async().await;
    assert!(
        matches!(err, FetchError::GaveUpWaiting { waits: 0, .. }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn huge_retry_after_gives_up_instead_of_waiting() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/ticker")
        .with_status(429)
        .with_header("retry-after", "18446744073709551615")
        .expect(1)
        .create_async()
        .await;

    let started = Instant::now();
    let err = client()
        .fetch_json(&format!("{}/ticker", server.url()))
        .await
        .unwrap_err();

    limited.assert_async().await;
    assert!(
        matches!(err, FetchError::GaveUpWaiting { waits: 0, .. }),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn transient_503s_are_absorbed_by_the_transport() {
    let mut server = Server::new_async().await;
    let unavailable = server
        .mock("GET", "/markets")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/markets")
        .with_status(200)
        .with_body(r#"{"markets":["btc-usd"]}"#)
        .expect(1)
        .create_async()
        .await;

    let envelope = client()
        .fetch_json(&format!("{}/markets", server.url()))
        .await
        .unwrap();

    unavailable.assert_async().await;
    ok.assert_async().await;
    assert_eq!(envelope.to_value(), json!({"markets": ["btc-usd"], "status": 200}));
}

#[tokio::test]
async fn persistent_503_ends_as_an_error_envelope() {
    let mut server = Server::new_async().await;
    let unavailable = server
        .mock("GET", "/markets")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let client = RequestClient::with_options(&fast_transport(2), RateLimitPolicy::default()).unwrap();
    let envelope = client
        .fetch_json(&format!("{}/markets", server.url()))
        .await
        .unwrap();

    unavailable.assert_async().await;
    assert!(envelope.is_error());
    assert_eq!(envelope.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn not_found_is_not_retried_by_the_transport() {
    let mut server = Server::new_async().await;
    let missing = server
        .mock("GET", "/gone")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let envelope = client()
        .fetch_json(&format!("{}/gone", server.url()))
        .await
        .unwrap();

    missing.assert_async().await;
    assert!(envelope.is_error());
}

#[tokio::test]
async fn repeated_fetches_yield_identical_envelopes() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/simple/price")
        .with_status(200)
        .with_body(r#"{"ethereum":{"usd":1800}}"#)
        .expect(2)
        .create_async()
        .await;

    let client = client();
    let url = format!("{}/simple/price", server.url());
    let first = client.fetch_json(&url).await.unwrap();
    let second = client.fetch_json(&url).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.to_value(), second.to_value());
}

#[tokio::test]
async fn default_headers_are_sent_with_every_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/balances")
        .match_header("x-api-key", "secret")
        .match_header("accept", "application/json")
        .with_status(200)
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let mut client = client();
    client
        .set_default_headers([("X-API-Key", "secret"), ("Accept", "application/json")])
        .unwrap();

    let url = format!("{}/balances", server.url());
    assert!(!client.fetch_json(&url).await.unwrap().is_error());
    assert!(!client.fetch_json(&url).await.unwrap().is_error());
    mock.assert_async().await;
}

#[tokio::test]
async fn built_query_strings_reach_the_server_decoded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", Matcher::Regex(r"^/simple/price".to_string()))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("ids".into(), "bitcoin,litecoin".into()),
            Matcher::UrlEncoded("vs_currencies".into(), "usd".into()),
            Matcher::UrlEncoded("include_last_updated_at".into(), "true".into()),
            Matcher::UrlEncoded("note".into(), "a&b=c".into()),
        ]))
        .with_status(200)
        .with_body(r#"{"bitcoin":{"usd":1}}"#)
        .create_async()
        .await;

    let url = build_url_with_params(
        &format!("{}/simple/price", server.url()),
        vec![
            ("ids", ParamValue::from("bitcoin,litecoin")),
            ("vs_currencies", ParamValue::from("usd")),
            ("include_last_updated_at", ParamValue::from(true)),
            ("note", ParamValue::from("a&b=c")),
        ],
        false,
    );
    let envelope = client().fetch_json(&url).await.unwrap();

    mock.assert_async().await;
    assert_eq!(envelope.status(), StatusCode::OK);
}

#[tokio::test]
async fn downloads_return_the_raw_response() {
    let png_header: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/thumb.png")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body(png_header)
        .create_async()
        .await;

    let response = client()
        .download(&format!("{}/thumb.png", server.url()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), png_header);
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    // Grab a free port and close it again so nothing is listening there
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = RequestClient::with_options(&fast_transport(1), RateLimitPolicy::default()).unwrap();
    let err = client
        .fetch_json(&format!("http://127.0.0.1:{port}/anything"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Transport { .. }), "got {err:?}");
}

#[test]
fn envelope_is_reexported_at_the_crate_root() {
    let envelope = Envelope::from_parts(StatusCode::OK, None, json!({}));
    assert_eq!(envelope.to_value(), json!({"status": 200}));
}
