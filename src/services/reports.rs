use crate::{
    entities::order,
    errors::ServiceError,
    services::orders::{OrderService, OrderWithItems},
    services::reconciler::APPROVED,
};
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use tracing::instrument;
use utoipa::ToSchema;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_RANGE_DAYS: i64 = 30;
pub const TOP_PRODUCTS: usize = 25;
pub const CSV_HEADER: &str =
    "order_id,created_at,status,mp_status,total,shipping_method,shipping_cost,province";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductSales {
    pub title: String,
    pub qty: i64,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DailySales {
    pub day: String,
    pub revenue: Decimal,
    pub orders: u64,
}

/// Approved sales in a date range
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SalesReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub orders_count: u64,
    pub total_revenue: Decimal,
    pub items_revenue: Decimal,
    pub shipping_revenue: Decimal,
    pub average_order_value: Decimal,
    pub status_counts: BTreeMap<String, u64>,
    pub mp_status_counts: BTreeMap<String, u64>,
    pub shipping_method_counts: BTreeMap<String, u64>,
    pub province_counts: BTreeMap<String, u64>,
    pub top_products: Vec<ProductSales>,
    pub daily: Vec<DailySales>,
    #[serde(skip)]
    pub orders: Vec<order::Model>,
}

impl SalesReport {
    pub fn csv_filename(&self) -> String {
        format!(
            "ventas_{}_{}.csv",
            self.from.format(DATE_FORMAT),
            self.to.format(DATE_FORMAT)
        )
    }
}

/// Parses optional `YYYY-MM-DD` bounds. Missing or unparsable `to` is today, missing or
/// unparsable `from` is 30 days ending at `to`; reversed bounds are swapped.
pub fn resolve_range(
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let parse = |s: Option<&str>| {
        s.map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| NaiveDate::parse_from_str(s, DATE_FORMAT).ok())
    };
    let to = parse(to).unwrap_or(today);
    let from = parse(from).unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS - 1));
    if from > to {
        (to, from)
    } else {
        (from, to)
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    if !key.is_empty() {
        *map.entry(key.to_string()).or_default() += 1;
    }
}

/// Aggregates the approved orders among `orders`.
pub fn build_report(from: NaiveDate, to: NaiveDate, orders: Vec<OrderWithItems>) -> SalesReport {
    let approved: Vec<OrderWithItems> = orders
        .into_iter()
        .filter(|o| o.order.mp_status.trim().eq_ignore_ascii_case(APPROVED))
        .collect();

    let mut report = SalesReport {
        from,
        to,
        orders_count: approved.len() as u64,
        total_revenue: Decimal::ZERO,
        items_revenue: Decimal::ZERO,
        shipping_revenue: Decimal::ZERO,
        average_order_value: Decimal::ZERO,
        status_counts: BTreeMap::new(),
        mp_status_counts: BTreeMap::new(),
        shipping_method_counts: BTreeMap::new(),
        province_counts: BTreeMap::new(),
        top_products: Vec::new(),
        daily: Vec::new(),
        orders: Vec::with_capacity(approved.len()),
    };

    let mut products: HashMap<String, ProductSales> = HashMap::new();
    let mut days: BTreeMap<String, DailySales> = BTreeMap::new();

    for entry in approved {
        let o = &entry.order;
        report.total_revenue += o.total;
        report.shipping_revenue += o.shipping_cost;
        bump(&mut report.status_counts, &o.status.to_string());
        bump(&mut report.mp_status_counts, &o.mp_status);
        bump(&mut report.shipping_method_counts, &o.shipping_method.to_string());
        bump(&mut report.province_counts, &o.province);

        let day = o.created_at.format(DATE_FORMAT).to_string();
        let daily = days.entry(day.clone()).or_insert_with(|| DailySales {
            day,
            revenue: Decimal::ZERO,
            orders: 0,
        });
        daily.revenue += o.total;
        daily.orders += 1;

        for item in &entry.items {
            let line = item.line_total();
            report.items_revenue += line;
            let agg = products
                .entry(item.title.clone())
                .or_insert_with(|| ProductSales {
                    title: item.title.clone(),
                    qty: 0,
                    revenue: Decimal::ZERO,
                });
            agg.qty += i64::from(item.qty);
            agg.revenue += line;
        }
        report.orders.push(entry.order);
    }

    if report.orders_count > 0 {
        report.average_order_value =
            (report.total_revenue / Decimal::from(report.orders_count)).round_dp(2);
    }

    let mut top: Vec<ProductSales> = products.into_values().collect();
    top.sort_by(|a, b| {
        b.qty
            .cmp(&a.qty)
            .then_with(|| b.revenue.cmp(&a.revenue))
            .then_with(|| a.title.cmp(&b.title))
    });
    top.truncate(TOP_PRODUCTS);
    report.top_products = top;
    report.daily = days.into_values().collect();
    report
}

/// One line per approved order under [`CSV_HEADER`].
pub fn to_csv(report: &SalesReport) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + report.orders.len() * 96);
    out.push_str(CSV_HEADER);
    out.push('\n');
    for o in &report.orders {
        let _ = writeln!(
            out,
            "{},{},{},{},{:.2},{},{:.2},{}",
            o.id,
            o.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            o.status,
            o.mp_status,
            o.total,
            o.shipping_method,
            o.shipping_cost,
            o.province.replace(',', " ")
        );
    }
    out
}

#[derive(Clone)]
pub struct ReportService {
    orders: OrderService,
}

impl ReportService {
    pub fn new(orders: OrderService) -> Self {
        Self { orders }
    }

    #[instrument(skip(self))]
    pub async fn sales_report(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<SalesReport, ServiceError> {
        let (from, to) = resolve_range(from, to, Utc::now().date_naive());
        let orders = self.orders.list_in_range(from, to).await?;
        Ok(build_report(from, to, orders))
    }
}
