//! Integration tests for the HTTP snapshot provider against a mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use zero_scanner::data::{DataProvider, ProviderError, SnapshotProvider};
use zero_scanner::universe::rank_and_cap;

const ENDPOINT: &str = "/v2/snapshot/locale/us/markets/stocks/tickers";

fn provider(server: &MockServer) -> SnapshotProvider {
    SnapshotProvider::new(server.uri(), Some("test-key".into()), Duration::from_secs(5))
}

#[tokio::test]
async fn test_parses_and_ranks_by_dollar_volume() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("apiKey", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "tickers": [
                { "ticker": "aapl", "day": { "c": 190.0, "v": 1000.0, "vw": 189.5 } },
                { "ticker": "SPY",  "day": { "c": 500.0, "v": 2000.0, "vw": 499.0 } },
                { "ticker": "TINY", "day": { "c": 1.0,   "v": 10.0 } },
                { "ticker": "",     "day": { "c": 1.0,   "v": 10.0 } },
                { "ticker": "HALT", "prevDay": { "c": 10.0, "v": 100.0, "vw": 10.0 } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let ranked = provider(&server).list_ranked_symbols().await.unwrap();
    assert_eq!(ranked.len(), 4);

    let universe = rank_and_cap(ranked, 3);
    assert_eq!(universe, vec!["SPY", "AAPL", "HALT"]);
}

#[tokio::test]
async fn test_status_codes_map_to_provider_errors() {
    let cases = [
        (401, "auth"),
        (403, "auth"),
        (429, "rate"),
        (503, "unavailable"),
        (404, "invalid"),
    ];

    for (code, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ENDPOINT))
            .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
            .mount(&server)
            .await;

        let err = provider(&server).list_ranked_symbols().await.unwrap_err();
        let matched = match kind {
            "auth" => matches!(err, ProviderError::Auth(_)),
            "rate" => matches!(err, ProviderError::RateLimited { .. }),
            "unavailable" => matches!(err, ProviderError::Unavailable(_)),
            _ => matches!(err, ProviderError::InvalidResponse(_)),
        };
        assert!(matched, "HTTP {code} gave {err:?}");
    }
}

#[tokio::test]
async fn test_error_payload_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ERROR",
            "error": "Unknown API Key"
        })))
        .mount(&server)
        .await;

    let err = provider(&server).list_ranked_symbols().await.unwrap_err();
    match err {
        ProviderError::InvalidResponse(msg) => assert_eq!(msg, "Unknown API Key"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = provider(&server).list_ranked_symbols().await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}
