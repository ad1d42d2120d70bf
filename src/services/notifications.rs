//! Order notifications for the shop owner.
//!
//! Delivery is decoupled from the request that triggers it: callers push a
//! [`NotificationJob`] onto the [`NotificationQueue`] and return immediately. A
//! background worker delivers each job at least once, retrying with exponential
//! backoff, and records jobs that exhaust their attempts on the
//! `notifications::dead_letter` tracing target.

use crate::{
    config::AppConfig, entities::order::ShippingMethod, services::orders::OrderWithItems,
};
use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const QUEUE_CAPACITY: usize = 1024;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel is not configured")]
    NotConfigured,
    #[error("channel returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Telegram Bot API `sendMessage`
#[derive(Clone)]
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Option<Self>, NotifyError> {
        let token = config.telegram_bot_token.as_deref().unwrap_or("").trim();
        let chat_id = config.telegram_chat_id.as_deref().unwrap_or("").trim();
        if token.is_empty() || chat_id.is_empty() {
            return Ok(None);
        }
        Self::new(config.telegram_api_base_url.as_str(), token, chat_id).map(Some)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        if self.token.is_empty() || self.chat_id.is_empty() {
            return Err(NotifyError::NotConfigured);
        }
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.api_base, self.token))
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", text),
                ("disable_web_page_preview", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Writes notifications to the log instead of an external channel.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(target: "notifications::order", message = %text, "order notification");
        Ok(())
    }
}

/// Tries `primary`, then `secondary` when the primary fails.
pub struct FallbackNotifier {
    primary: Arc<dyn Notifier>,
    secondary: Arc<dyn Notifier>,
}

impl FallbackNotifier {
    pub fn new(primary: Arc<dyn Notifier>, secondary: Arc<dyn Notifier>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl Notifier for FallbackNotifier {
    fn name(&self) -> &'static str {
        "fallback"
    }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        match self.primary.send(text).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(channel = self.primary.name(), error = %err, "primary notifier failed");
                self.secondary.send(text).await
            }
        }
    }
}

/// Telegram with a log fallback when configured, otherwise just the log.
pub fn notifier_from_config(config: &AppConfig) -> Arc<dyn Notifier> {
    match TelegramNotifier::from_config(config) {
        Ok(Some(telegram)) => Arc::new(FallbackNotifier::new(
            Arc::new(telegram),
            Arc::new(LogNotifier),
        )),
        Ok(None) => Arc::new(LogNotifier),
        Err(err) => {
            warn!(error = %err, "telegram notifier unavailable; logging notifications");
            Arc::new(LogNotifier)
        }
    }
}

/// Plain-text summary of an order for the shop owner.
pub fn order_message(order: &OrderWithItems, approved: bool) -> String {
    let o = &order.order;
    let status = if approved {
        "PAGO APROBADO"
    } else {
        "PAGO FALLIDO"
    };

    let mut text = String::new();
    let _ = writeln!(text, "Orden {} - {}", o.id, status);
    let _ = writeln!(
        text,
        "Nombre: {}\nEmail: {}\nTel: {}\nDNI: {}",
        o.name, o.email, o.phone, o.dni
    );
    match o.shipping_method {
        ShippingMethod::Envio | ShippingMethod::Cadete => {
            let _ = writeln!(
                text,
                "Envío ({}) a: {} ({}) CP:{}",
                o.shipping_method, o.address, o.province, o.postal_code
            );
        }
        ShippingMethod::Retiro => text.push_str("Retiro en local\n"),
    }
    text.push_str("Items:\n");
    for item in &order.items {
        let _ = writeln!(
            text,
            "- {} x{} ${:.2} {}",
            item.title, item.qty, item.unit_price, item.color
        );
    }
    let _ = write!(
        text,
        "Total: ${:.2} (Envío: ${:.2})",
        o.total, o.shipping_cost
    );
    text
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub order_id: Uuid,
    pub text: String,
}

/// Sends `job` through `notifier`, retrying up to `max_attempts` times.
/// Returns whether the job was delivered.
pub async fn deliver_with_retry(
    notifier: &dyn Notifier,
    job: &NotificationJob,
    max_attempts: u32,
    base_backoff: Duration,
) -> bool {
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match notifier.send(&job.text).await {
            Ok(()) => {
                counter!("notifications_sent_total", 1, "channel" => notifier.name());
                info!(order_id = %job.order_id, attempt, channel = notifier.name(), "notification delivered");
                return true;
            }
            Err(err) => {
                warn!(
                    order_id = %job.order_id,
                    attempt,
                    max_attempts,
                    error = %err,
                    "notification attempt failed"
                );
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(base_backoff * 2_u32.pow(attempt - 1)).await;
        }
    }

    dead_letter(job, "delivery attempts exhausted");
    false
}

fn dead_letter(job: &NotificationJob, reason: &str) {
    counter!("notifications_dead_letter_total", 1);
    error!(
        target: "notifications::dead_letter",
        order_id = %job.order_id,
        reason,
        text = %job.text,
        "notification dead-lettered"
    );
}

/// Handle used by request paths to schedule notifications.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationJob>,
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationQueue")
            .field("capacity", &self.tx.max_capacity())
            .finish()
    }
}

/// Consumes the queue; see [`NotificationWorker::run`].
pub struct NotificationWorker {
    rx: mpsc::Receiver<NotificationJob>,
    notifier: Arc<dyn Notifier>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl NotificationQueue {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        max_attempts: u32,
        base_backoff: Duration,
    ) -> (Self, NotificationWorker) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Self { tx },
            NotificationWorker {
                rx,
                notifier,
                max_attempts,
                base_backoff,
            },
        )
    }

    /// Creates the queue and spawns its worker on the current runtime.
    pub fn start(notifier: Arc<dyn Notifier>, max_attempts: u32) -> Self {
        let (queue, worker) = Self::new(notifier, max_attempts, DEFAULT_BACKOFF);
        tokio::spawn(worker.run());
        queue
    }

    /// Never waits: a full or closed queue dead-letters the job.
    #[instrument(skip(self, text))]
    pub fn enqueue(&self, order_id: Uuid, text: String) {
        let job = NotificationJob { order_id, text };
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => dead_letter(&job, "queue full"),
            Err(mpsc::error::TrySendError::Closed(job)) => dead_letter(&job, "queue closed"),
        }
    }
}

impl NotificationWorker {
    /// Runs until every queue handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            deliver_with_retry(
                self.notifier.as_ref(),
                &job,
                self.max_attempts,
                self.base_backoff,
            )
            .await;
        }
        info!("notification worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{
        order::{self, OrderStatus},
        order_item,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    /// Fails the first `failures` sends, then records messages.
    #[derive(Default)]
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, text: &str) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(NotifyError::NotConfigured);
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn job() -> NotificationJob {
        NotificationJob {
            order_id: Uuid::new_v4(),
            text: "hola".into(),
        }
    }

    fn sample_order(method: ShippingMethod) -> OrderWithItems {
        let id = Uuid::new_v4();
        OrderWithItems {
            order: order::Model {
                id,
                status: OrderStatus::Finished,
                email: "ana@mail.com".into(),
                name: "Ana".into(),
                phone: "341555".into(),
                dni: "30123456".into(),
                address: "Calle 1".into(),
                postal_code: "2000".into(),
                province: "Santa Fe".into(),
                mp_preference_id: None,
                mp_status: "approved".into(),
                total: dec!(11500),
                shipping_method: method,
                shipping_cost: dec!(9000),
                discount: dec!(0),
                coupon_code: None,
                notified: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            items: vec![order_item::Model {
                id: Uuid::new_v4(),
                order_id: id,
                product_id: None,
                quote_id: None,
                title: "Vaso".into(),
                color: "rojo".into(),
                qty: 2,
                unit_price: dec!(1000),
            }],
        }
    }

    #[test]
    fn message_lists_contact_items_and_totals() {
        let order = sample_order(ShippingMethod::Envio);
        let text = order_message(&order, true);
        assert!(text.starts_with(&format!("Orden {} - PAGO APROBADO", order.order.id)));
        assert!(text.contains("DNI: 30123456"));
        assert!(text.contains("Envío (envio) a: Calle 1 (Santa Fe) CP:2000"));
        assert!(text.contains("- Vaso x2 $1000.00 rojo"));
        assert!(text.ends_with("Total: $11500.00 (Envío: $9000.00)"));

        let pickup = order_message(&sample_order(ShippingMethod::Retiro), false);
        assert!(pickup.contains("PAGO FALLIDO"));
        assert!(pickup.contains("Retiro en local"));
    }

    #[tokio::test]
    async fn retries_until_delivered() {
        let notifier = Flaky {
            failures: 2,
            ..Default::default()
        };
        assert!(deliver_with_retry(&notifier, &job(), 3, Duration::from_millis(1)).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let notifier = Flaky {
            failures: u32::MAX,
            ..Default::default()
        };
        assert!(!deliver_with_retry(&notifier, &job(), 2, Duration::from_millis(1)).await);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fallback_uses_secondary_on_failure() {
        let primary = Arc::new(Flaky {
            failures: u32::MAX,
            ..Default::default()
        });
        let secondary = Arc::new(Flaky::default());
        let fallback = FallbackNotifier::new(primary.clone(), secondary.clone());
        fallback.send("hola").await.unwrap();
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary.sent.lock().unwrap().as_slice(), ["hola"]);
    }

    #[tokio::test]
    async fn worker_drains_queue() {
        let notifier = Arc::new(Flaky::default());
        let (queue, worker) =
            NotificationQueue::new(notifier.clone(), 3, Duration::from_millis(1));
        let handle = tokio::spawn(worker.run());
        queue.enqueue(Uuid::new_v4(), "uno".into());
        queue.enqueue(Uuid::new_v4(), "dos".into());
        drop(queue);
        handle.await.unwrap();
        assert_eq!(notifier.sent.lock().unwrap().as_slice(), ["uno", "dos"]);
    }

    #[tokio::test]
    async fn telegram_posts_form_to_send_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_string_contains("chat_id=42"))
            .and(body_string_contains("disable_web_page_preview=1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let telegram = TelegramNotifier::new(server.uri(), "TOKEN", "42").unwrap();
        telegram.send("Orden 1").await.unwrap();
    }

    #[tokio::test]
    async fn telegram_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let telegram = TelegramNotifier::new(server.uri(), "TOKEN", "42").unwrap();
        let err = telegram.send("x").await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 403, .. }));
    }

    #[test]
    fn config_without_telegram_logs_only() {
        let config = AppConfig::new("sqlite::memory:", "test");
        assert_eq!(notifier_from_config(&config).name(), "log");
    }
}
