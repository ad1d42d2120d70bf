use crate::{
    entities::order::{self, OrderStatus},
    errors::ServiceError,
    services::{
        notifications::{order_message, NotificationQueue},
        orders::{OrderService, OrderWithItems},
        payments::PaymentGateway,
    },
    signing::TokenSigner,
};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const APPROVED: &str = "approved";

/// Result of applying a gateway status to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub status: OrderStatus,
    pub mp_status: String,
    pub approved: bool,
}

/// Maps a gateway payment status onto the order state machine.
/// Pending states never downgrade a `finished` order; `rejected` always cancels.
/// The gateway's status string is kept as reported.
pub fn decide(current: OrderStatus, gateway_status: &str) -> Transition {
    let normalized = gateway_status.trim().to_ascii_lowercase();
    let status = match normalized.as_str() {
        APPROVED => OrderStatus::Finished,
        "rejected" => OrderStatus::Cancelled,
        "pending" | "in_process" | "in_mediation" if current != OrderStatus::Finished => {
            OrderStatus::AwaitingPayment
        }
        _ => current,
    };
    Transition {
        approved: normalized == APPROVED,
        status,
        mp_status: gateway_status.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    MissingPaymentId,
    GatewayNotConfigured,
    GatewayError,
    InvalidReference,
    OrderNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Ignored(IgnoreReason),
    Updated {
        order_id: Uuid,
        status: OrderStatus,
        notified: bool,
    },
}

impl ReconcileOutcome {
    pub fn label(&self) -> String {
        match self {
            Self::Ignored(reason) => reason.to_string(),
            Self::Updated { .. } => "updated".to_string(),
        }
    }
}

/// Applies gateway payment reports to orders.
#[derive(Clone)]
pub struct ReconcilerService {
    orders: OrderService,
    gateway: Option<Arc<dyn PaymentGateway>>,
    signer: TokenSigner,
    notifications: NotificationQueue,
}

impl ReconcilerService {
    pub fn new(
        orders: OrderService,
        gateway: Option<Arc<dyn PaymentGateway>>,
        signer: TokenSigner,
        notifications: NotificationQueue,
    ) -> Self {
        Self {
            orders,
            gateway,
            signer,
            notifications,
        }
    }

    pub fn payments_simulated(&self) -> bool {
        self.gateway.is_none()
    }

    /// Looks the payment up at the gateway and applies its status to the referenced order.
    /// Anything that cannot be attributed to an order is ignored, never surfaced.
    #[instrument(skip(self))]
    pub async fn reconcile_payment(
        &self,
        payment_id: &str,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let outcome = self.reconcile_inner(payment_id.trim()).await;
        let label = match &outcome {
            Ok(o) => o.label(),
            Err(_) => "error".to_string(),
        };
        counter!("webhook_events_total", 1, "outcome" => label);
        outcome
    }

    async fn reconcile_inner(&self, payment_id: &str) -> Result<ReconcileOutcome, ServiceError> {
        if payment_id.is_empty() {
            warn!("payment notification without payment id");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::MissingPaymentId));
        }
        let Some(gateway) = &self.gateway else {
            warn!(payment_id, "payment notification received but no gateway is configured");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::GatewayNotConfigured));
        };

        let info = match gateway.payment_info(payment_id).await {
            Ok(info) => info,
            Err(err) => {
                error!(payment_id, error = %err, "payment lookup failed");
                return Ok(ReconcileOutcome::Ignored(IgnoreReason::GatewayError));
            }
        };

        let Some(order_id) = self.signer.verify_external_reference(&info.external_reference)
        else {
            warn!(payment_id, reference = %info.external_reference, "external reference rejected");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::InvalidReference));
        };

        let Some(order) = self.orders.find_by_id(order_id).await? else {
            // may arrive before the checkout write is visible; the gateway retries
            warn!(payment_id, %order_id, "order not found for payment");
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::OrderNotFound));
        };

        let (updated, notified) = self.apply(order, &info.status).await?;
        info!(
            payment_id,
            %order_id,
            mp_status = %updated.mp_status,
            status = %updated.status,
            notified,
            "payment reconciled"
        );
        Ok(ReconcileOutcome::Updated {
            order_id,
            status: updated.status,
            notified,
        })
    }

    /// Status reported back on the local pay page. Only honoured when payments are
    /// simulated; with a gateway the page reconciles through [`Self::reconcile_payment`].
    #[instrument(skip(self))]
    pub async fn apply_return_status(
        &self,
        order_id: Uuid,
        status: &str,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.orders.get(order_id).await?;
        let status = status.trim();
        if status.is_empty() || !self.payments_simulated() {
            return Ok(order);
        }
        let (updated, _) = self.apply(order.clone(), status).await?;
        Ok(OrderWithItems {
            order: updated,
            items: order.items,
        })
    }

    async fn apply(
        &self,
        order: OrderWithItems,
        gateway_status: &str,
    ) -> Result<(order::Model, bool), ServiceError> {
        let transition = decide(order.order.status, gateway_status);
        let updated = self
            .orders
            .record_payment_status(order.order.id, transition.status, &transition.mp_status)
            .await?;

        let mut notified = false;
        if transition.approved && self.orders.mark_notified_once(updated.id).await? {
            let snapshot = OrderWithItems {
                order: updated.clone(),
                items: order.items,
            };
            self.notifications
                .enqueue(updated.id, order_message(&snapshot, true));
            notified = true;
        }
        Ok((updated, notified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(OrderStatus::AwaitingPayment, "approved", OrderStatus::Finished, true)]
    #[case(OrderStatus::Cancelled, "APPROVED", OrderStatus::Finished, true)]
    #[case(OrderStatus::AwaitingPayment, "pending", OrderStatus::AwaitingPayment, false)]
    #[case(OrderStatus::Quoted, "in_process", OrderStatus::AwaitingPayment, false)]
    #[case(OrderStatus::Cancelled, "in_mediation", OrderStatus::AwaitingPayment, false)]
    #[case(OrderStatus::AwaitingPayment, "rejected", OrderStatus::Cancelled, false)]
    #[case(OrderStatus::InPrint, "refunded", OrderStatus::InPrint, false)]
    #[case(OrderStatus::Finished, "pending", OrderStatus::Finished, false)]
    #[case(OrderStatus::Finished, "in_process", OrderStatus::Finished, false)]
    #[case(OrderStatus::Finished, "rejected", OrderStatus::Cancelled, false)]
    #[case(OrderStatus::Finished, "charged_back", OrderStatus::Finished, false)]
    #[case(OrderStatus::AwaitingPayment, " Rejected ", OrderStatus::Cancelled, false)]
    fn transitions(
        #[case] current: OrderStatus,
        #[case] reported: &str,
        #[case] expected: OrderStatus,
        #[case] approved: bool,
    ) {
        let t = decide(current, reported);
        assert_eq!(t.status, expected);
        assert_eq!(t.approved, approved);
        assert_eq!(t.mp_status, reported);
    }

    mod with_db {
        use super::*;
        use crate::{
            db::{establish_connection_with_config, run_migrations, DbConfig},
            entities::order::ShippingMethod,
            services::{
                notifications::{NotificationQueue, NotificationWorker, Notifier, NotifyError},
                orders::{insert_order, NewOrder, NewOrderItem, OrderContact},
                payments::{MockPaymentGateway, PaymentInfo},
            },
        };
        use assert_matches::assert_matches;
        use async_trait::async_trait;
        use rust_decimal_macros::dec;
        use std::sync::Mutex;
        use std::time::Duration;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        #[async_trait]
        impl Notifier for Recorder {
            fn name(&self) -> &'static str {
                "recorder"
            }

            async fn send(&self, text: &str) -> Result<(), NotifyError> {
                self.0.lock().unwrap().push(text.to_string());
                Ok(())
            }
        }

        fn signer() -> TokenSigner {
            TokenSigner::new(b"reconciler-test-key-0123456789abcdef".to_vec()).unwrap()
        }

        async fn setup(
            gateway: MockPaymentGateway,
        ) -> (
            ReconcilerService,
            OrderService,
            NotificationWorker,
            Arc<Recorder>,
            Arc<sea_orm::DatabaseConnection>,
        ) {
            let db = establish_connection_with_config(&DbConfig {
                url: "sqlite::memory:".into(),
                max_connections: 1,
                ..Default::default()
            })
            .await
            .unwrap();
            run_migrations(&db).await.unwrap();
            let db = Arc::new(db);
            let orders = OrderService::new(db.clone());
            let recorder = Arc::new(Recorder::default());
            let (queue, worker) =
                NotificationQueue::new(recorder.clone(), 1, Duration::from_millis(1));
            let service = ReconcilerService::new(
                orders.clone(),
                Some(Arc::new(gateway)),
                signer(),
                queue,
            );
            (service, orders, worker, recorder, db)
        }

        #[tokio::test]
        async fn approved_twice_notifies_once() {
            let mut gateway = MockPaymentGateway::new();
            let holder: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
            let reference = holder.clone();
            gateway.expect_payment_info().times(2).returning(move |_| {
                Ok(PaymentInfo {
                    status: "approved".into(),
                    external_reference: reference.lock().unwrap().clone().unwrap_or_default(),
                })
            });

            let (service, orders, worker, recorder, db) = setup(gateway).await;
            let order = insert_order(
                &*db,
                NewOrder {
                    status: OrderStatus::AwaitingPayment,
                    contact: OrderContact {
                        email: "ana@mail.com".into(),
                        name: "Ana".into(),
                        ..Default::default()
                    },
                    shipping_method: ShippingMethod::Retiro,
                    shipping_cost: dec!(0),
                    discount: dec!(0),
                    coupon_code: None,
                    items: vec![NewOrderItem {
                        product_id: None,
                        quote_id: None,
                        title: "Vaso".into(),
                        color: String::new(),
                        qty: 1,
                        unit_price: dec!(1000),
                    }],
                },
            )
            .await
            .unwrap();
            *holder.lock().unwrap() = Some(signer().external_reference(order.order.id));

            let first = service.reconcile_payment("p-1").await.unwrap();
            assert_matches!(first, ReconcileOutcome::Updated { status: OrderStatus::Finished, notified: true, .. });
            let second = service.reconcile_payment("p-1").await.unwrap();
            assert_matches!(second, ReconcileOutcome::Updated { status: OrderStatus::Finished, notified: false, .. });

            drop(service);
            worker.run().await;
            assert_eq!(recorder.0.lock().unwrap().len(), 1);

            let stored = orders.get(order.order.id).await.unwrap();
            assert!(stored.order.notified);
            assert_eq!(stored.order.mp_status, "approved");
        }

        #[tokio::test]
        async fn forged_reference_is_ignored() {
            let mut gateway = MockPaymentGateway::new();
            gateway.expect_payment_info().returning(|_| {
                Ok(PaymentInfo {
                    status: "approved".into(),
                    external_reference: format!("{}|{}", Uuid::new_v4(), "0".repeat(24)),
                })
            });
            let (service, ..) = setup(gateway).await;
            assert_eq!(
                service.reconcile_payment("p-2").await.unwrap(),
                ReconcileOutcome::Ignored(IgnoreReason::InvalidReference)
            );
            assert_eq!(
                service.reconcile_payment(" ").await.unwrap(),
                ReconcileOutcome::Ignored(IgnoreReason::MissingPaymentId)
            );
        }

        #[tokio::test]
        async fn unknown_order_is_ignored() {
            let mut gateway = MockPaymentGateway::new();
            gateway.expect_payment_info().returning(|_| {
                Ok(PaymentInfo {
                    status: "approved".into(),
                    external_reference: signer().external_reference(Uuid::new_v4()),
                })
            });
            let (service, ..) = setup(gateway).await;
            assert_eq!(
                service.reconcile_payment("p-3").await.unwrap(),
                ReconcileOutcome::Ignored(IgnoreReason::OrderNotFound)
            );
        }
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(
            ReconcileOutcome::Ignored(IgnoreReason::InvalidReference).label(),
            "invalid_reference"
        );
        let updated = ReconcileOutcome::Updated {
            order_id: Uuid::nil(),
            status: OrderStatus::Finished,
            notified: true,
        };
        assert_eq!(updated.label(), "updated");
    }
}
