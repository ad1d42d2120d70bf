use crate::{
    entities::{
        order::{self, Entity as Order, OrderStatus, ShippingMethod},
        order_item::{self, Entity as OrderItem},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func}, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Order with its line items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub mp_status: Option<String>,
    pub page: u64,
    pub page_size: u64,
}

/// Customer and delivery data copied onto a new order
#[derive(Debug, Clone, Default)]
pub struct OrderContact {
    pub email: String,
    pub name: String,
    pub phone: String,
    pub dni: String,
    pub address: String,
    pub postal_code: String,
    pub province: String,
}

#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: Option<Uuid>,
    pub quote_id: Option<Uuid>,
    pub title: String,
    pub color: String,
    pub qty: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub status: OrderStatus,
    pub contact: OrderContact,
    pub shipping_method: ShippingMethod,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub coupon_code: Option<String>,
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    /// Σ unit_price × qty + shipping − discount
    pub fn total(&self) -> Decimal {
        let items: Decimal = self
            .items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.qty))
            .sum();
        items + self.shipping_cost - self.discount
    }
}

/// Persists an order and its items on `conn`; callers own the transaction.
pub async fn insert_order<C: ConnectionTrait>(
    conn: &C,
    new_order: NewOrder,
) -> Result<OrderWithItems, ServiceError> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let total = new_order.total();
    let contact = new_order.contact;

    let order = order::ActiveModel {
        id: Set(order_id),
        status: Set(new_order.status),
        email: Set(contact.email),
        name: Set(contact.name),
        phone: Set(contact.phone),
        dni: Set(contact.dni),
        address: Set(contact.address),
        postal_code: Set(contact.postal_code),
        province: Set(contact.province),
        mp_preference_id: Set(None),
        mp_status: Set(String::new()),
        total: Set(total),
        shipping_method: Set(new_order.shipping_method),
        shipping_cost: Set(new_order.shipping_cost),
        discount: Set(new_order.discount),
        coupon_code: Set(new_order.coupon_code),
        notified: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(new_order.items.len());
    for item in new_order.items {
        let saved = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(item.product_id),
            quote_id: Set(item.quote_id),
            title: Set(item.title),
            color: Set(item.color),
            qty: Set(item.qty),
            unit_price: Set(item.unit_price),
        }
        .insert(conn)
        .await?;
        items.push(saved);
    }

    Ok(OrderWithItems { order, items })
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderWithItems>, ServiceError> {
        let Some(order) = Order::find_by_id(id).one(&*self.db).await? else {
            return Ok(None);
        };
        let items = self.items_for(&[order.id]).await?.remove(&order.id);
        Ok(Some(OrderWithItems {
            order,
            items: items.unwrap_or_default(),
        }))
    }

    pub async fn get(&self, id: Uuid) -> Result<OrderWithItems, ServiceError> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }

    /// Newest first, with items. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: OrderFilter,
    ) -> Result<(Vec<OrderWithItems>, u64), ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(mp_status) = filter.mp_status.filter(|s| !s.is_empty()) {
            query = query.filter(
                Expr::expr(Func::lower(Expr::col(order::Column::MpStatus)))
                    .eq(mp_status.to_lowercase()),
            );
        }

        let page_size = if filter.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            filter.page_size
        };
        let paginator = query.paginate(&*self.db, page_size);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(filter.page.max(1) - 1).await?;

        Ok((self.attach_items(orders).await?, total))
    }

    /// Orders created on any day in `[from, to]` (UTC), oldest first.
    /// Reversed bounds are swapped.
    #[instrument(skip(self))]
    pub async fn list_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let (start, end) = day_bounds(from, to);
        let orders = Order::find()
            .filter(order::Column::CreatedAt.gte(start))
            .filter(order::Column::CreatedAt.lt(end))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.attach_items(orders).await
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: Uuid,
        status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let existing = Order::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let previous = existing.status;
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        info!(order_id = %id, from = %previous, to = %status, "order status updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn set_preference_id(
        &self,
        id: Uuid,
        preference_id: &str,
    ) -> Result<(), ServiceError> {
        Order::update_many()
            .col_expr(order::Column::MpPreferenceId, Expr::value(preference_id))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Stores the reconciled status pair.
    #[instrument(skip(self))]
    pub async fn record_payment_status(
        &self,
        id: Uuid,
        status: OrderStatus,
        mp_status: &str,
    ) -> Result<order::Model, ServiceError> {
        let existing = Order::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
        let mut active: order::ActiveModel = existing.into();
        active.status = Set(status);
        active.mp_status = Set(mp_status.to_string());
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Flips `notified` from false to true. Only the first caller gets `true`.
    #[instrument(skip(self))]
    pub async fn mark_notified_once(&self, id: Uuid) -> Result<bool, ServiceError> {
        let result = Order::update_many()
            .col_expr(order::Column::Notified, Expr::value(true))
            .filter(order::Column::Id.eq(id))
            .filter(order::Column::Notified.eq(false))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn items_for(
        &self,
        order_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<order_item::Model>>, ServiceError> {
        let mut grouped: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(grouped);
        }
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(order_ids.iter().copied()))
            .all(&*self.db)
            .await?;
        for item in items {
            grouped.entry(item.order_id).or_default().push(item);
        }
        Ok(grouped)
    }

    async fn attach_items(
        &self,
        orders: Vec<order::Model>,
    ) -> Result<Vec<OrderWithItems>, ServiceError> {
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items = self.items_for(&ids).await?;
        Ok(orders
            .into_iter()
            .map(|order| OrderWithItems {
                items: items.remove(&order.id).unwrap_or_default(),
                order,
            })
            .collect())
    }
}

/// `[start of first day, start of day after last)` in UTC.
pub fn day_bounds(from: NaiveDate, to: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let (from, to) = if from > to { (to, from) } else { (from, to) };
    let start = from.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = (to + Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc();
    (start, end)
}
