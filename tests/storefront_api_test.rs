mod common;

use axum::http::{Method, StatusCode};
use common::{data, decimal, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn health_reports_database_and_request_id() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/health", None, &[("x-request-id", "health-1")])
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "up");
    assert_eq!(body["database"]["status"], "up");
    assert_eq!(body["payments_simulated"], true);
    assert_eq!(response.header("x-request-id").as_deref(), Some("health-1"));
    assert_eq!(
        response.header("x-content-type-options").as_deref(),
        Some("nosniff")
    );
}

#[tokio::test]
async fn catalog_lists_filters_and_resolves_slugs() {
    let app = TestApp::new().await;
    app.create_product("Vase", dec!(1000)).await;
    app.create_product("Dragon Lamp", dec!(4500)).await;

    let list = app.get("/api/products?sort=price_desc").await;
    assert_eq!(list.status, StatusCode::OK);
    let page = data(&list);
    assert_eq!(page["total"], 2);
    assert_eq!(page["items"][0]["slug"], "dragon-lamp");

    let search = app.get("/api/products?q=lamp").await;
    assert_eq!(data(&search)["total"], 1);

    let categories = app.get("/api/categories").await;
    assert_eq!(data(&categories), json!(["decoracion"]));

    let missing = app.get("/api/products/nope").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json()["error"], "Not Found");
}

#[tokio::test]
async fn quote_is_priced_repriced_and_ordered() {
    let app = TestApp::new().await;
    let model = app
        .admin(
            Method::POST,
            "/admin/models",
            Some(json!({
                "filename": "benchy.stl",
                "volume_cm3": "15",
                "estimated_time_min": 90,
            })),
        )
        .await;
    assert_eq!(model.status, StatusCode::CREATED, "{}", model.text());
    let model_id = data(&model)["id"].as_str().unwrap().to_string();

    let quote = app
        .post(
            "/api/quote",
            json!({
                "model_id": model_id,
                "material": "pla",
                "quality": "standard",
                "infill_pct": 20,
                "layer_height_mm": "0.2",
            }),
        )
        .await;
    assert_eq!(quote.status, StatusCode::CREATED, "{}", quote.text());
    let priced = data(&quote);
    let price = decimal(&priced["quote"]["price"]);
    assert!(price > Decimal::ZERO);
    assert_eq!(price, decimal(&priced["breakdown"]["total"]));
    let quote_id = priced["quote"]["id"].as_str().unwrap().to_string();

    let denser = app
        .post(
            &format!("/api/quote/{}/reprice", quote_id),
            json!({
                "material": "PLA",
                "quality": "standard",
                "infill_pct": 80,
                "layer_height_mm": "0.2",
            }),
        )
        .await;
    assert_eq!(denser.status, StatusCode::OK, "{}", denser.text());
    assert!(decimal(&data(&denser)["quote"]["price"]) > price);

    let ordered = app
        .post(
            &format!("/api/quote/{}/checkout", quote_id),
            json!({ "email": "maker@mail.com", "name": "Maker" }),
        )
        .await;
    assert_eq!(ordered.status, StatusCode::CREATED, "{}", ordered.text());
    let outcome = data(&ordered);
    assert_eq!(outcome["order"]["status"], "quoted");
    let order_id = outcome["order"]["id"].as_str().unwrap();
    assert_eq!(outcome["redirect_url"], format!("/pay/{}", order_id));
}

#[tokio::test]
async fn quote_rejects_unknown_material_and_model() {
    let app = TestApp::new().await;
    let wood = app
        .post(
            "/api/quote",
            json!({
                "model_id": uuid::Uuid::new_v4(),
                "material": "wood",
                "quality": "standard",
                "infill_pct": 20,
                "layer_height_mm": "0.2",
            }),
        )
        .await;
    assert_eq!(wood.status, StatusCode::BAD_REQUEST);

    let missing = app
        .post(
            "/api/quote",
            json!({
                "model_id": uuid::Uuid::new_v4(),
                "material": "pla",
                "quality": "standard",
                "infill_pct": 20,
                "layer_height_mm": "0.2",
            }),
        )
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn quote_with_non_positive_price_is_rejected() {
    let app = TestApp::new().await;
    let model = app
        .admin(
            Method::POST,
            "/admin/models",
            Some(json!({
                "filename": "pin.stl",
                "volume_cm3": "0.5",
                "estimated_time_min": 0,
            })),
        )
        .await;
    assert_eq!(model.status, StatusCode::CREATED, "{}", model.text());
    let model_id = data(&model)["id"].as_str().unwrap().to_string();

    let quote = app
        .post(
            "/api/quote",
            json!({
                "model_id": model_id,
                "material": "pla",
                "quality": "draft",
                "infill_pct": 0,
                "layer_height_mm": "1.0",
            }),
        )
        .await;
    assert_eq!(quote.status, StatusCode::BAD_REQUEST, "{}", quote.text());
    assert!(quote.json()["message"]
        .as_str()
        .unwrap()
        .contains("not positive"));
}

#[tokio::test]
async fn api_requests_are_limited_per_client() {
    let app = TestApp::builder().requests_per_window(3).build().await;
    let client = [("x-forwarded-for", "10.0.0.1")];

    for _ in 0..3 {
        let ok = app
            .request(Method::GET, "/api/products", None, &client)
            .await;
        assert_eq!(ok.status, StatusCode::OK);
    }
    let denied = app
        .request(Method::GET, "/api/products", None, &client)
        .await;
    assert_eq!(denied.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.header("retry-after").as_deref(), Some("60"));
    assert_eq!(denied.header("x-ratelimit-remaining").as_deref(), Some("0"));

    let other = app
        .request(
            Method::GET,
            "/api/products",
            None,
            &[("x-forwarded-for", "10.0.0.2")],
        )
        .await;
    assert_eq!(other.status, StatusCode::OK);

    // pages outside /api are not limited
    let cart = app.request(Method::GET, "/cart", None, &client).await;
    assert_eq!(cart.status, StatusCode::OK);
}
