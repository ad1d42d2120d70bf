mod common;

use axum::http::{Method, StatusCode};
use common::{data, decimal, TestApp, ADMIN_EMAIL, ADMIN_KEY};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn login_requires_key_and_allowed_email() {
    let app = TestApp::new().await;
    let body = json!({ "email": ADMIN_EMAIL });

    let no_key = app.post("/admin/login", body.clone()).await;
    assert_eq!(no_key.status, StatusCode::UNAUTHORIZED);
    assert_eq!(no_key.json()["error"]["code"], "AUTH_INVALID_API_KEY");

    let stranger = app
        .request(
            Method::POST,
            "/admin/login",
            Some(json!({ "email": "someone@else.com" })),
            &[("x-admin-key", ADMIN_KEY)],
        )
        .await;
    assert_eq!(stranger.status, StatusCode::FORBIDDEN);

    let ok = app
        .request(
            Method::POST,
            "/admin/login",
            Some(json!({ "email": "  Owner@Chroma3D.com " })),
            &[("x-admin-key", ADMIN_KEY)],
        )
        .await;
    assert_eq!(ok.status, StatusCode::OK, "{}", ok.text());
    assert_eq!(data(&ok)["email"], ADMIN_EMAIL);
    let cookie = ok.cookie("admin_token").expect("admin cookie");

    let orders = app
        .request(Method::GET, "/admin/orders", None, &[("cookie", cookie.as_str())])
        .await;
    assert_eq!(orders.status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_reject_missing_or_forged_tokens() {
    let app = TestApp::new().await;

    let missing = app.get("/admin/orders").await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.json()["error"]["code"], "AUTH_MISSING");

    let forged = app
        .request(
            Method::GET,
            "/admin/sales",
            None,
            &[("authorization", "Bearer not.a.token")],
        )
        .await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);

    let logout = app.post("/admin/logout", json!({})).await;
    assert_eq!(logout.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn orders_filter_and_status_update() {
    let app = TestApp::new().await;
    let vase = app.create_product("Vase", dec!(1000)).await;
    let created = app
        .post(
            "/api/checkout",
            json!({
                "items": [{ "slug": vase.product.slug, "qty": 1, "price": "1000" }],
                "email": "ana@mail.com",
                "name": "Ana",
            }),
        )
        .await;
    let id = data(&created)["order"]["id"].as_str().unwrap().to_string();

    let all = app.admin(Method::GET, "/admin/orders", None).await;
    assert_eq!(data(&all)["total"], 1);

    let approved = app.admin(Method::GET, "/admin/orders?approved=1", None).await;
    assert_eq!(data(&approved)["total"], 0);

    let bogus = app.admin(Method::GET, "/admin/orders?status=lost", None).await;
    assert_eq!(bogus.status, StatusCode::BAD_REQUEST);

    let updated = app
        .admin(
            Method::PUT,
            &format!("/admin/orders/{}/status", id),
            Some(json!({ "status": "in_print" })),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK, "{}", updated.text());
    assert_eq!(data(&updated)["status"], "in_print");

    let in_print = app
        .admin(Method::GET, "/admin/orders?status=IN_PRINT", None)
        .await;
    assert_eq!(data(&in_print)["total"], 1);

    let one = app
        .admin(Method::GET, &format!("/admin/orders/{}", id), None)
        .await;
    assert_eq!(data(&one)["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn product_management() {
    let app = TestApp::new().await;

    let created = app
        .admin(
            Method::POST,
            "/admin/products",
            Some(json!({
                "name": "Dragon Lamp",
                "base_price": "4500",
                "category": "lamparas",
                "images": [{ "url": "/static/uploads/dragon.jpg" }],
            })),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.text());
    assert_eq!(data(&created)["slug"], "dragon-lamp");

    let duplicate = app
        .admin(
            Method::POST,
            "/admin/products",
            Some(json!({ "name": "dragon lamp", "base_price": "10" })),
        )
        .await;
    assert_eq!(duplicate.status, StatusCode::CONFLICT);

    let public = app.get("/api/products/dragon-lamp").await;
    assert_eq!(public.status, StatusCode::OK);

    app.create_product("Plant Pot", dec!(800)).await;
    let bulk = app
        .admin(
            Method::POST,
            "/admin/products/bulk-delete",
            Some(json!({ "slugs": ["dragon-lamp", "plant-pot", "ghost"] })),
        )
        .await;
    assert_eq!(bulk.status, StatusCode::OK);
    let result = data(&bulk);
    assert_eq!(result["deleted"].as_array().unwrap().len(), 2);
    assert_eq!(result["not_found"], json!(["ghost"]));
    assert_eq!(result["image_urls"], json!(["/static/uploads/dragon.jpg"]));

    let gone = app.get("/api/products/dragon-lamp").await;
    assert_eq!(gone.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn coupon_lifecycle_and_redemption() {
    let app = TestApp::new().await;
    let vase = app.create_product("Vase", dec!(1000)).await;

    let created = app
        .admin(
            Method::POST,
            "/admin/coupons",
            Some(json!({
                "code": " promo10 ",
                "discount_type": "percentage",
                "discount_value": "10",
                "max_uses": 1,
            })),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.text());
    let coupon = data(&created);
    assert_eq!(coupon["code"], "PROMO10");
    let coupon_id = coupon["id"].as_str().unwrap().to_string();

    let checkout = |email: &'static str| {
        json!({
            "items": [{ "slug": vase.product.slug, "qty": 2, "price": "1000" }],
            "email": email,
            "name": "Buyer",
            "coupon_code": "Promo10",
        })
    };

    let first = app.post("/api/checkout", checkout("ana@mail.com")).await;
    assert_eq!(first.status, StatusCode::CREATED, "{}", first.text());
    let order = &data(&first)["order"];
    assert_eq!(decimal(&order["discount"]), dec!(200));
    assert_eq!(decimal(&order["total"]), dec!(1800));
    assert_eq!(order["coupon_code"], "PROMO10");

    let capped = app.post("/api/checkout", checkout("leo@mail.com")).await;
    assert_eq!(capped.status, StatusCode::BAD_REQUEST);

    let stats = app
        .admin(Method::GET, &format!("/admin/coupons/{}/stats", coupon_id), None)
        .await;
    assert_eq!(data(&stats)["total_uses"], 1);
    assert_eq!(decimal(&data(&stats)["total_discount"]), dec!(200));

    let toggled = app
        .admin(
            Method::POST,
            &format!("/admin/coupons/{}/toggle", coupon_id),
            None,
        )
        .await;
    assert_eq!(data(&toggled)["active"], false);

    let active = app.admin(Method::GET, "/admin/coupons?active=1", None).await;
    assert_eq!(data(&active)["total"], 0);

    let deleted = app
        .admin(Method::DELETE, &format!("/admin/coupons/{}", coupon_id), None)
        .await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn sales_report_exports_csv() {
    let app = TestApp::new().await;
    let vase = app.create_product("Vase", dec!(1000)).await;
    let created = app
        .post(
            "/api/checkout",
            json!({
                "items": [{ "slug": vase.product.slug, "qty": 1, "price": "1000" }],
                "email": "ana@mail.com",
                "name": "Ana",
            }),
        )
        .await;
    let id = data(&created)["order"]["id"].as_str().unwrap().to_string();
    app.get(&format!("/pay/{}?status=approved", id)).await;

    let report = app.admin(Method::GET, "/admin/sales", None).await;
    assert_eq!(report.status, StatusCode::OK);
    assert_eq!(data(&report)["orders_count"], 1);
    assert_eq!(decimal(&data(&report)["total_revenue"]), dec!(1000));

    let csv = app
        .admin(Method::GET, "/admin/sales?format=csv", None)
        .await;
    assert_eq!(csv.status, StatusCode::OK);
    assert!(csv.header("content-type").unwrap().starts_with("text/csv"));
    let disposition = csv.header("content-disposition").unwrap();
    assert!(disposition.starts_with("attachment; filename=ventas_"));
    let body = csv.text();
    let mut lines = body.lines();
    assert_eq!(
        lines.next(),
        Some("order_id,created_at,status,mp_status,total,shipping_method,shipping_cost,province")
    );
    assert!(lines.next().unwrap().starts_with(&id));
}
