mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chroma3d_store::{
    entities::order::{OrderStatus, ShippingMethod},
    errors::ServiceError,
    services::{
        coupons::{apply_coupon, CouponError},
        orders::{insert_order, NewOrder, NewOrderItem, OrderContact},
    },
};
use common::{data, decimal, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde_json::{json, Value};
use uuid::Uuid;

async fn create_coupon(app: &TestApp, code: &str, max_uses: Option<i32>) -> Uuid {
    let created = app
        .admin(
            Method::POST,
            "/admin/coupons",
            Some(json!({
                "code": code,
                "discount_type": "fixed_amount",
                "discount_value": "100",
                "max_uses": max_uses,
            })),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED, "{}", created.text());
    data(&created)["id"].as_str().unwrap().parse().unwrap()
}

fn checkout_body(slug: &str, email: &str, coupon: &str) -> Value {
    json!({
        "items": [{ "slug": slug, "qty": 1, "price": "1000" }],
        "email": email,
        "name": "Buyer",
        "coupon_code": coupon,
    })
}

fn pending_order(email: &str, coupon_code: Option<&str>) -> NewOrder {
    NewOrder {
        status: OrderStatus::AwaitingPayment,
        contact: OrderContact {
            email: email.into(),
            name: "Leo".into(),
            ..Default::default()
        },
        shipping_method: ShippingMethod::Retiro,
        shipping_cost: Decimal::ZERO,
        discount: Decimal::ZERO,
        coupon_code: coupon_code.map(String::from),
        items: vec![NewOrderItem {
            product_id: None,
            quote_id: None,
            title: "Vase".into(),
            color: String::new(),
            qty: 1,
            unit_price: dec!(1000),
        }],
    }
}

/// Same write sequence as checkout: order, redemption, commit.
async fn place_with_coupon(
    db: &DatabaseConnection,
    coupon_id: Uuid,
    email: &str,
) -> Result<Uuid, ServiceError> {
    let txn = db.begin().await?;
    let order = insert_order(&txn, pending_order(email, Some("CAPPED"))).await?;
    apply_coupon(
        &txn,
        coupon_id,
        order.order.id,
        email,
        dec!(100),
        order.order.total,
    )
    .await?;
    txn.commit().await?;
    Ok(order.order.id)
}

#[tokio::test]
async fn same_email_cannot_redeem_twice() {
    let app = TestApp::new().await;
    let vase = app.create_product("Vase", dec!(1000)).await;
    create_coupon(&app, "ONCE", None).await;

    let first = app
        .post("/api/checkout", checkout_body(&vase.product.slug, "ana@mail.com", "once"))
        .await;
    assert_eq!(first.status, StatusCode::CREATED, "{}", first.text());
    assert_eq!(decimal(&data(&first)["order"]["discount"]), dec!(100));

    let again = app
        .post("/api/checkout", checkout_body(&vase.product.slug, " ANA@mail.com", "ONCE"))
        .await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);
    assert!(again.json()["message"]
        .as_str()
        .unwrap()
        .contains(&CouponError::AlreadyUsed.to_string()));

    let other = app
        .post("/api/checkout", checkout_body(&vase.product.slug, "leo@mail.com", "ONCE"))
        .await;
    assert_eq!(other.status, StatusCode::CREATED, "{}", other.text());
}

#[tokio::test]
async fn pending_order_with_the_coupon_blocks_redemption() {
    let app = TestApp::new().await;
    create_coupon(&app, "WAIT", None).await;
    insert_order(&*app.state.db, pending_order("leo@mail.com", Some("WAIT")))
        .await
        .unwrap();

    let err = app
        .state
        .services
        .coupons
        .validate("wait", "Leo@Mail.com", dec!(1000))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::ValidationError(ref message)
            if message == &CouponError::PendingOrder(1).to_string()
    );

    // other customers are unaffected
    app.state
        .services
        .coupons
        .validate("WAIT", "ana@mail.com", dec!(1000))
        .await
        .unwrap();
}

#[tokio::test]
async fn cap_hit_during_the_transaction_writes_nothing() {
    let app = TestApp::new().await;
    let coupon_id = create_coupon(&app, "CAPPED", Some(1)).await;

    let first = place_with_coupon(&app.state.db, coupon_id, "ana@mail.com").await;
    assert!(first.is_ok(), "{:?}", first.err());

    let raced = place_with_coupon(&app.state.db, coupon_id, "leo@mail.com").await;
    assert_matches!(raced, Err(ServiceError::Conflict(_)));
    assert_eq!(
        ServiceError::from(CouponError::CapRace).status_code(),
        StatusCode::CONFLICT
    );

    let orders = app.admin(Method::GET, "/admin/orders", None).await;
    assert_eq!(data(&orders)["total"], 1);
    assert_eq!(data(&orders)["items"][0]["email"], "ana@mail.com");

    let stats = app
        .admin(Method::GET, &format!("/admin/coupons/{}/stats", coupon_id), None)
        .await;
    assert_eq!(data(&stats)["total_uses"], 1);

    let coupon = app.state.services.coupons.get(coupon_id).await.unwrap();
    assert_eq!(coupon.current_uses, 1);
}
