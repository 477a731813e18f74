//! Integration tests for the upload API

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use csvcluster::{build_router, AppState};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "csvcluster-test-boundary";
const MAX_UPLOAD_BYTES: usize = 1024 * 1024;
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Ten customers, two numeric columns and one text column
const CUSTOMERS: &str = "\
Name,Age,Spend
Ana,21,120.5
Ben,23,135.0
Cleo,22,110.25
Dev,45,560.0
Eli,47,610.75
Fay,44,590.0
Gus,67,1500.0
Hal,70,1450.5
Ivy,69,1525.0
Jo,68,1490.0
";

fn app() -> Router {
    build_router(AppState::default(), MAX_UPLOAD_BYTES)
}

fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(field: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload_csv/")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, "data.csv", content)))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn assert_png(encoded: &Value) {
    let encoded = encoded.as_str().expect("chart should be a string");
    assert!(!encoded.is_empty());
    let bytes = STANDARD.decode(encoded).unwrap();
    assert!(bytes.starts_with(&PNG_SIGNATURE));
    image::load_from_memory(&bytes).unwrap();
}

fn count_sum(json: &Value) -> u64 {
    json["cluster_count"]
        .as_object()
        .unwrap()
        .values()
        .map(|count| count.as_u64().unwrap())
        .sum()
}

#[tokio::test]
async fn test_home_is_alive() {
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("Running"));
}

#[tokio::test]
async fn test_end_to_end_upload() {
    let (status, json) = send(app(), upload_request("file", CUSTOMERS.as_bytes())).await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {json}");

    let summary = json["cluster_summary"].as_object().unwrap();
    assert!(!summary.is_empty() && summary.len() <= 3);
    for (label, means) in summary {
        assert!(["0", "1", "2"].contains(&label.as_str()));
        let means = means.as_object().unwrap();
        assert_eq!(means.len(), 2);
        assert!(means.contains_key("Age"));
        assert!(means.contains_key("Spend"));
        assert!(!means.contains_key("Name"));
    }

    assert_eq!(count_sum(&json), 10);

    for chart in ["scatter", "heatmap", "boxplot", "bar"] {
        assert_png(&json["charts"][chart]);
    }
}

#[tokio::test]
async fn test_upload_is_reproducible() {
    let (_, first) = send(app(), upload_request("file", CUSTOMERS.as_bytes())).await;
    let (_, second) = send(app(), upload_request("file", CUSTOMERS.as_bytes())).await;

    assert_eq!(first["cluster_summary"], second["cluster_summary"]);
    assert_eq!(first["cluster_count"], second["cluster_count"]);
}

#[tokio::test]
async fn test_missing_file_field() {
    let (status, json) = send(app(), upload_request("attachment", CUSTOMERS.as_bytes())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "No file uploaded");
}

#[tokio::test]
async fn test_not_multipart() {
    let request = Request::builder()
        .method("POST")
        .uri("/upload_csv/")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, json) = send(app(), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_text_only_csv() {
    let csv = b"Name,City\nAna,Paris\nBen,Lyon\nCleo,Nice\n";
    let (status, json) = send(app(), upload_request("file", csv)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("numeric columns"));
}

#[tokio::test]
async fn test_too_few_rows() {
    let csv = b"Age,Spend\n21,120\n45,560\n";
    let (status, json) = send(app(), upload_request("file", csv)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("at least 3"));
}

#[tokio::test]
async fn test_ragged_csv_is_processing_error() {
    let csv = b"x,y\n1,2\n3,4,5,6\n7,8\n9,9\n";
    let (status, json) = send(app(), upload_request("file", csv)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!json["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_column_without_values_is_processing_error() {
    let csv = b"x,y,z\n1,,a\n2,,b\n3,,c\n9,,d\n";
    let (status, json) = send(app(), upload_request("file", csv)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["error"].as_str().unwrap().contains("'y'"));
}

#[tokio::test]
async fn test_missing_values_are_mean_imputed() {
    // Age is missing twice, Spend once
    let csv = "\
Name,Age,Spend
Ana,21,120
Ben,,135
Cleo,22,110
Dev,45,
Eli,47,610
Fay,NA,590
Gus,67,1500
Hal,70,1450
";
    let (status, json) = send(app(), upload_request("file", csv.as_bytes())).await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {json}");
    assert_eq!(count_sum(&json), 8);

    // Mean imputation keeps each column mean, so the count-weighted average
    // of the cluster means equals the mean of the present cells.
    let expected_age = (21.0 + 22.0 + 45.0 + 47.0 + 67.0 + 70.0) / 6.0;
    let expected_spend = (120.0 + 135.0 + 110.0 + 610.0 + 590.0 + 1500.0 + 1450.0) / 7.0;

    let mut weighted_age = 0.0;
    let mut weighted_spend = 0.0;
    for (label, means) in json["cluster_summary"].as_object().unwrap() {
        let count = json["cluster_count"][label].as_f64().unwrap();
        weighted_age += count * means["Age"].as_f64().unwrap();
        weighted_spend += count * means["Spend"].as_f64().unwrap();
    }

    assert!((weighted_age / 8.0 - expected_age).abs() < 1e-9);
    assert!((weighted_spend / 8.0 - expected_spend).abs() < 1e-9);
}

#[tokio::test]
async fn test_latin1_upload() {
    let mut csv = b"Nom,\xC2ge,D\xE9pense\n".to_vec();
    csv.extend_from_slice(b"Zo\xEB,21,120\nLu,45,560\nAl,67,1500\nJo,22,130\n");

    let (status, json) = send(app(), upload_request("file", &csv)).await;
    assert_eq!(status, StatusCode::OK, "unexpected body: {json}");

    let first = json["cluster_summary"].as_object().unwrap().values().next().unwrap();
    assert!(first.get("Dépense").is_some());
    assert_eq!(count_sum(&json), 4);
}

#[tokio::test]
async fn test_cors_is_open() {
    let request = Request::builder()
        .uri("/")
        .header("origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_upload_over_limit() {
    let app = build_router(AppState::default(), 256);
    let mut csv = String::from("Age,Spend\n");
    for i in 0..100 {
        csv.push_str(&format!("{},{}\n", 20 + i, 100 * i));
    }

    let (status, json) = send(app, upload_request("file", csv.as_bytes())).await;
    assert!(status.is_client_error());
    assert!(json["error"].is_string());
}
