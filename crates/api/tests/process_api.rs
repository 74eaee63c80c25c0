//! Integration tests for `POST /process`.

mod common;

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use serde_json::json;

use common::{
    body_bytes, body_json, build_test_app, get, post_json, post_raw, spawn_image_server,
    BASE_URL,
};

// ---------------------------------------------------------------------------
// Test: a full job answers with both output URLs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn process_returns_output_urls() {
    let app = build_test_app(true).await;
    let images = spawn_image_server().await;

    let response = post_json(
        app.router.clone(),
        "/process",
        json!({
            "id": 42,
            "output": {
                "front": format!("{images}/front.png"),
                "back": format!("{images}/back.png"),
            },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let fields = json.as_object().unwrap();
    assert_eq!(fields.len(), 4);
    assert_eq!(json["id"], 42);
    assert_eq!(
        json["front_output"],
        format!("{BASE_URL}/design_42_front_birefnet.png")
    );
    assert_eq!(
        json["back_output"],
        format!("{BASE_URL}/design_42_back_birefnet.png")
    );
    assert!(json["processing_time_seconds"].as_f64().unwrap() >= 0.0);

    assert!(app
        .output_dir
        .path()
        .join("design_42_front_birefnet.png")
        .is_file());
    assert!(app
        .output_dir
        .path()
        .join("design_42_back_birefnet.png")
        .is_file());
}

// ---------------------------------------------------------------------------
// Test: persisted outputs are served under /outputs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn outputs_are_served_statically() {
    let app = build_test_app(true).await;
    let images = spawn_image_server().await;

    let response = post_json(
        app.router.clone(),
        "/process",
        json!({
            "id": "order-7",
            "output": {
                "front": format!("{images}/front.png"),
                "back": format!("{images}/back.png"),
            },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(app.router, "/outputs/design_order-7_back_birefnet.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "image/png");

    let bytes = body_bytes(response).await;
    let decoded = image::load_from_memory(&bytes).unwrap();
    // 16px input enlarged four times.
    assert_eq!((decoded.width(), decoded.height()), (64, 64));
    assert!(decoded.color().has_alpha());
}

// ---------------------------------------------------------------------------
// Test: requests before model load are refused with the id echoed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn not_ready_is_service_unavailable() {
    let app = build_test_app(false).await;

    let response = post_json(
        app.router,
        "/process",
        json!({
            "id": 9,
            "output": {
                "front": "http://127.0.0.1:9/front.png",
                "back": "http://127.0.0.1:9/back.png",
            },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["id"], 9);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
    assert_eq!(json["kind"], "ServiceUnavailable");
}

// ---------------------------------------------------------------------------
// Test: validation failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_url_is_bad_request() {
    let app = build_test_app(true).await;

    let response = post_json(
        app.router,
        "/process",
        json!({
            "id": "abc",
            "output": {
                "front": "not a url",
                "back": "https://cdn.test/back.png",
            },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["id"], "abc");
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["stage"], "request");
}

#[tokio::test]
async fn missing_field_keeps_the_id() {
    let app = build_test_app(true).await;

    let response = post_json(
        app.router,
        "/process",
        json!({ "id": 5, "output": { "front": "https://cdn.test/front.png" } }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert_eq!(json["id"], 5);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn malformed_json_has_no_id() {
    let app = build_test_app(true).await;

    let response = post_raw(app.router, "/process", "{ not json".to_string()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    assert!(json.get("id").is_none());
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: a missing source image is a download failure attributed to its slot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn download_failure_is_bad_gateway() {
    let app = build_test_app(true).await;
    let images = spawn_image_server().await;

    let response = post_json(
        app.router,
        "/process",
        json!({
            "id": 11,
            "output": {
                "front": format!("{images}/missing.png"),
                "back": format!("{images}/back.png"),
            },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json = body_json(response).await;
    assert_eq!(json["id"], 11);
    assert_eq!(json["code"], "DOWNLOAD_ERROR");
    assert_eq!(json["stage"], "download");
    assert_eq!(json["slot"], "front");

    let leftovers: Vec<_> = std::fs::read_dir(app.output_dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
        .collect();
    assert!(leftovers.is_empty());
}
