mod common;

use axum::http::StatusCode;
use common::{data, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

async fn place_order(app: &TestApp) -> Uuid {
    let vase = app.create_product("Vase", dec!(1000)).await;
    let response = app
        .post(
            "/api/checkout",
            json!({
                "items": [{ "slug": vase.product.slug, "qty": 1, "price": "1000" }],
                "email": "ana@mail.com",
                "name": "Ana",
            }),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.text());
    data(&response)["order"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap()
}

fn notification(payment_id: &str) -> serde_json::Value {
    json!({ "type": "payment", "action": "payment.updated", "data": { "id": payment_id } })
}

#[tokio::test]
async fn approved_payment_finishes_order_and_notifies_once() {
    let app = TestApp::builder().with_gateway().build().await;
    let order_id = place_order(&app).await;
    app.gateway
        .script("pay-1", "approved", &app.external_reference(order_id));

    let first = app.post("/webhooks/mp", notification("pay-1")).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(data(&first)["outcome"], "updated");

    let second = app.post("/webhooks/mp", notification("pay-1")).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(data(&second)["outcome"], "updated");

    let order = app.state.services.orders.get(order_id).await.unwrap();
    assert_eq!(order.order.status.to_string(), "finished");
    assert_eq!(order.order.mp_status, "approved");
    assert!(order.order.notified);

    let messages = app.notifications(1).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(app.notifier.messages().len(), 1, "{:?}", messages);
}

#[tokio::test]
async fn pending_never_downgrades_finished_but_rejected_cancels() {
    let app = TestApp::builder().with_gateway().build().await;
    let order_id = place_order(&app).await;
    let reference = app.external_reference(order_id);

    app.gateway.script("pay-a", "approved", &reference);
    app.post("/webhooks/mp", notification("pay-a")).await;

    app.gateway.script("pay-p", "in_process", &reference);
    app.post("/webhooks/mp", notification("pay-p")).await;
    let order = app.state.services.orders.get(order_id).await.unwrap();
    assert_eq!(order.order.status.to_string(), "finished");
    assert_eq!(order.order.mp_status, "in_process");

    app.gateway.script("pay-r", "Rejected", &reference);
    app.post("/webhooks/mp", notification("pay-r")).await;
    let order = app.state.services.orders.get(order_id).await.unwrap();
    assert_eq!(order.order.status.to_string(), "cancelled");
    assert_eq!(order.order.mp_status, "Rejected");
}

#[tokio::test]
async fn payment_id_falls_back_to_query_string() {
    let app = TestApp::builder().with_gateway().build().await;
    let order_id = place_order(&app).await;
    app.gateway
        .script("777", "pending", &app.external_reference(order_id));

    let response = app.post("/webhooks/mp?data.id=777", json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(data(&response)["outcome"], "updated");
    assert_eq!(app.gateway.lookups(), vec!["777".to_string()]);
}

#[tokio::test]
async fn unattributable_notifications_are_acknowledged() {
    let app = TestApp::builder().with_gateway().build().await;
    app.gateway.script("forged", "approved", "not-a-reference");
    app.gateway.script(
        "orphan",
        "approved",
        &app.external_reference(Uuid::new_v4()),
    );

    for (body, outcome) in [
        (json!({ "type": "payment" }), "missing_payment_id"),
        (notification("unknown"), "gateway_error"),
        (notification("forged"), "invalid_reference"),
        (notification("orphan"), "order_not_found"),
    ] {
        let response = app.post("/webhooks/mp", body).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(data(&response)["outcome"], outcome);
    }
    assert!(app.notifier.messages().is_empty());
}

#[tokio::test]
async fn malformed_body_still_gets_200() {
    let app = TestApp::builder().with_gateway().build().await;
    let response = app
        .request(
            axum::http::Method::POST,
            "/webhooks/mp",
            None,
            &[("content-type", "application/json")],
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(data(&response)["outcome"], "missing_payment_id");
}

#[tokio::test]
async fn simulated_payments_ignore_webhooks() {
    let app = TestApp::new().await;
    let response = app.post("/webhooks/mp", notification("pay-1")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(data(&response)["outcome"], "gateway_not_configured");
}
