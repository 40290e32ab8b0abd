//! Integration tests for the OpenFEMA HTTP client using wiremock.
//!
//! These tests verify:
//! - Query parameters sent for single-page and multi-page retrievals
//! - The confirmation gate stops data requests when declined
//! - Error mapping for HTTP failures and timeouts
//! - Metadata endpoints and catalog refresh
//! - Column reconciliation and date coercion end to end

use chrono::{Datelike, TimeZone, Utc};
use openfema_client::{
    AlwaysConfirm, ClientConfig, ColumnType, FilterSpec, NeverConfirm, OpenFemaClient,
    RetrievalError, RetrievalRequest, Value,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a test client pointing to the mock server
fn test_client(server: &MockServer, page_size: u32) -> OpenFemaClient {
    let config = ClientConfig::builder(server.uri())
        .timeout(Duration::from_secs(5))
        .page_size(page_size)
        .build()
        .unwrap();
    OpenFemaClient::new(config).unwrap()
}

/// Entity envelope as the API returns it
fn envelope(entity: &str, count: u64, rows: serde_json::Value) -> serde_json::Value {
    json!({
        "metadata": {
            "skip": 0,
            "top": 1000,
            "count": count,
            "filter": "",
            "format": "json",
            "entityname": entity,
            "url": format!("/api/open/v2/{}", entity)
        },
        entity: rows
    })
}

fn claims(range: std::ops::Range<u64>) -> serde_json::Value {
    range
        .map(|n| json!({"id": format!("claim-{}", n), "yearOfLoss": 2000 + n}))
        .collect()
}

// ============================================================================
// Single-Page Retrieval Tests
// ============================================================================

#[tokio::test]
async fn test_small_top_n_is_one_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/FimaNfipClaims"))
        .and(query_param("$inlinecount", "allpages"))
        .and(query_param("$top", "10"))
        .and(query_param("$skip", "0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope("FimaNfipClaims", 2_565_000, claims(0..10))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let table = client
        .retrieve(
            &RetrievalRequest::new("fimaNfipClaims").top_n(10),
            &mut NeverConfirm,
        )
        .await
        .unwrap();

    assert_eq!(table.len(), 10);
    assert_eq!(table.column_names(), vec!["id", "yearOfLoss"]);
}

#[tokio::test]
async fn test_filter_and_select_are_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/FimaNfipClaims"))
        .and(query_param(
            "$filter",
            "countyCode eq '01001' and (yearOfLoss ge 2010 and yearOfLoss le 2020)",
        ))
        .and(query_param("$select", "id,countyCode,yearOfLoss"))
        .and(query_param("$top", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            "FimaNfipClaims",
            2,
            json!([
                {"id": "a", "countyCode": "01001", "yearOfLoss": 2012},
                {"id": "b", "countyCode": "01001", "yearOfLoss": 2019}
            ]),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let request = RetrievalRequest::new("FimaNfipClaims")
        .select(["countyCode", "yearOfLoss"])
        .filters(
            FilterSpec::new()
                .field("countyCode", ["= 01001"])
                .field("yearOfLoss", [">= 2010", "<= 2020"]),
        )
        .top_n(5);

    let client = test_client(&server, 1000);
    let table = client.retrieve(&request, &mut NeverConfirm).await.unwrap();

    assert_eq!(table.len(), 2);
    assert_eq!(
        table.get(0, "countyCode").and_then(Value::as_str),
        Some("01001")
    );
    assert_eq!(
        table.column("yearOfLoss").map(|c| c.column_type),
        Some(ColumnType::Numeric)
    );
}

#[tokio::test]
async fn test_accept_and_user_agent_headers_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("accept", "application/json"))
        .and(header(
            "user-agent",
            format!("openfema-client/{}", env!("CARGO_PKG_VERSION")).as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope("FimaNfipClaims", 1, claims(0..1))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let table = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims").top_n(1), &mut NeverConfirm)
        .await
        .unwrap();
    assert_eq!(table.len(), 1);
}

// ============================================================================
// Multi-Page Retrieval Tests
// ============================================================================

/// Mount a probe answering `count` plus pages of two rows over `count` claims.
async fn mount_paged_claims(server: &MockServer, count: u64, pages_requested: bool) {
    Mock::given(method("GET"))
        .and(path("/v2/FimaNfipClaims"))
        .and(query_param("$top", "1"))
        .and(query_param("$skip", "0"))
        .and(query_param("$select", "id"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope("FimaNfipClaims", count, claims(0..1))),
        )
        .expect(1)
        .mount(server)
        .await;

    let mut skip = 0;
    while skip < count {
        let end = (skip + 2).min(count);
        Mock::given(method("GET"))
            .and(path("/v2/FimaNfipClaims"))
            .and(query_param("$skip", skip.to_string().as_str()))
            .and(query_param("$top", (end - skip).to_string().as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(envelope("FimaNfipClaims", count, claims(skip..end))),
            )
            .expect(u64::from(pages_requested))
            .mount(server)
            .await;
        skip = end;
    }
}

#[tokio::test]
async fn test_multi_page_retrieval_in_order() {
    let server = MockServer::start().await;
    mount_paged_claims(&server, 5, true).await;

    let client = test_client(&server, 2);
    let table = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims"), &mut AlwaysConfirm)
        .await
        .unwrap();

    assert_eq!(table.len(), 5);
    let ids: Vec<&str> = (0..table.len())
        .filter_map(|i| table.get(i, "id").and_then(Value::as_str))
        .collect();
    assert_eq!(
        ids,
        vec!["claim-0", "claim-1", "claim-2", "claim-3", "claim-4"]
    );
}

#[tokio::test]
async fn test_declined_prompt_sends_only_probe() {
    let server = MockServer::start().await;
    mount_paged_claims(&server, 5, false).await;

    let client = test_client(&server, 2);
    let mut seen = None;
    let mut prompt = |plan: &openfema_client::RetrievalPlan| {
        seen = Some(*plan);
        false
    };
    let err = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims"), &mut prompt)
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::Aborted { .. }));
    assert!(!err.is_fault());
    let plan = seen.unwrap();
    assert_eq!(plan.total_records, 5);
    assert_eq!(plan.page_count, 3);
}

#[tokio::test]
async fn test_zero_matches_returns_empty_table() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/FimaNfipClaims"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope("FimaNfipClaims", 0, json!([]))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 2);
    let table = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims"), &mut AlwaysConfirm)
        .await
        .unwrap();
    assert!(table.is_empty());
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[tokio::test]
async fn test_server_error_on_page_fails_retrieval() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("$top", "1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope("FimaNfipClaims", 4, claims(0..1))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("$skip", "0"))
        .and(query_param("$top", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope("FimaNfipClaims", 4, claims(0..2))),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("$skip", "2"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"message": "Internal error"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 2);
    let err = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims"), &mut AlwaysConfirm)
        .await
        .unwrap_err();

    match err {
        RetrievalError::Upstream {
            status,
            message,
            page,
            ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Internal error");
            assert_eq!(page, Some(1));
        }
        other => panic!("Expected Upstream error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_rate_limited_probe_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "30")
                .set_body_string("Too Many Requests"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let err = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims"), &mut AlwaysConfirm)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    match err {
        RetrievalError::Upstream {
            status,
            page,
            retry_after,
            ..
        } => {
            assert_eq!(status, 429);
            assert_eq!(page, None);
            assert_eq!(retry_after, Some(Duration::from_secs(30)));
        }
        other => panic!("Expected Upstream error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_unparseable_body_is_upstream_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let err = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims").top_n(3), &mut NeverConfirm)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RetrievalError::Upstream {
            status: 200,
            page: Some(0),
            ..
        }
    ));
}

#[tokio::test]
async fn test_timeout_is_transient_network_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope("FimaNfipClaims", 1, claims(0..1)))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let config = ClientConfig::builder(server.uri())
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let client = OpenFemaClient::new(config).unwrap();

    let err = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims").top_n(1), &mut NeverConfirm)
        .await
        .unwrap_err();

    assert!(matches!(err, RetrievalError::TransientNetwork(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unknown_dataset_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let err = client
        .retrieve(&RetrievalRequest::new("NotADataset"), &mut AlwaysConfirm)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::UnknownDataset(_)));
}

// ============================================================================
// Normalization Tests
// ============================================================================

#[tokio::test]
async fn test_dates_coerced_and_missing_fields_null() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/FimaNfipClaims"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(
            "FimaNfipClaims",
            3,
            json!([
                {"id": "a", "dateOfLoss": "2010-08-21T00:00:00.000Z", "state": "TX"},
                {"id": "b", "dateOfLoss": "not a date"},
                {"id": "c", "dateOfLoss": "2017-08-25", "state": "LA\r\n"}
            ]),
        )))
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let table = client
        .retrieve(&RetrievalRequest::new("FimaNfipClaims").top_n(3), &mut NeverConfirm)
        .await
        .unwrap();

    assert_eq!(table.column_names(), vec!["id", "dateOfLoss", "state"]);
    assert_eq!(
        table.column("dateOfLoss").map(|c| c.column_type),
        Some(ColumnType::Timestamp)
    );

    let first = table.get(0, "dateOfLoss").and_then(Value::as_timestamp);
    assert_eq!(
        first.copied(),
        Some(Utc.with_ymd_and_hms(2010, 8, 21, 0, 0, 0).unwrap())
    );
    assert!(table.get(1, "dateOfLoss").unwrap().is_null());
    assert!(table.get(1, "state").unwrap().is_null());
    assert_eq!(
        table
            .get(2, "dateOfLoss")
            .and_then(Value::as_timestamp)
            .map(|ts| ts.year()),
        Some(2017)
    );
    assert_eq!(table.get(2, "state").and_then(Value::as_str), Some("LA"));
}

// ============================================================================
// Metadata Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_list_data_sets() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/DataSets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": {"count": 2, "entityname": "DataSets"},
            "DataSets": [
                {
                    "name": "FimaNfipClaims",
                    "title": "FIMA NFIP Redacted Claims",
                    "version": 2,
                    "lastRefresh": "2024-01-15T12:00:00.000Z"
                },
                {"name": "DisasterDeclarationsSummaries", "version": 2}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let data_sets = client.list_data_sets().await.unwrap();

    assert_eq!(data_sets.len(), 2);
    assert_eq!(data_sets[0].name, "FimaNfipClaims");
    assert_eq!(data_sets[0].version, 2);
    assert!(data_sets[0].last_refresh.is_some());
    assert!(data_sets[1].title.is_none());
}

#[tokio::test]
async fn test_data_set_fields_filters_by_name_and_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/DataSetFields"))
        .and(query_param(
            "$filter",
            "openFemaDataSet eq 'FimaNfipClaims' and datasetVersion eq 2",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "metadata": {"count": 2},
            "DataSetFields": [
                {"name": "id", "title": "ID", "type": "uuid", "primaryKey": true},
                {"name": "asOfDate", "title": "As of Date", "type": "date", "primaryKey": false}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let fields = client.data_set_fields("FimaNfipClaims", 2).await.unwrap();

    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].primary_key, Some(true));
    assert!(!fields[0].is_date());
    assert!(fields[1].is_date());
}

#[tokio::test]
async fn test_refreshed_catalog_follows_newer_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/DataSets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "DataSets": [{"name": "FimaNfipClaims", "version": 3}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v3/FimaNfipClaims"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope("FimaNfipClaims", 1, claims(0..1))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, 1000);
    let catalog = client.refreshed_catalog().await.unwrap();
    let table = client
        .retriever(catalog)
        .retrieve(&RetrievalRequest::new("FimaNfipClaims").top_n(1), &mut NeverConfirm)
        .await
        .unwrap();
    assert_eq!(table.len(), 1);
}
