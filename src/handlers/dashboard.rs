use std::collections::BTreeMap;

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use sqlx::{Row, SqlitePool};

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::i18n;
use crate::models::{ShipmentStatus, TripStatus};
use crate::services::currency::CurrencyTotals;
use crate::state::AppState;

/// Runs a `currency, total` aggregate into per-currency totals.
async fn currency_sums(pool: &SqlitePool, sql: &str) -> Result<CurrencyTotals, ApiError> {
    let mut totals = CurrencyTotals::new();
    for r in sqlx::query(sql).fetch_all(pool).await? {
        totals.add(&r.get::<String, _>("currency"), r.get::<f64, _>("total"));
    }
    Ok(totals)
}

pub async fn dashboard(
    req: HttpRequest,
    auth: AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let locale = i18n::detect_locale(&req);

    let mut shipment_counts: BTreeMap<&'static str, i64> =
        ShipmentStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for r in sqlx::query("SELECT status, COUNT(1) AS n FROM shipments GROUP BY status")
        .fetch_all(pool)
        .await?
    {
        let status: ShipmentStatus = r.get::<String, _>("status").parse()?;
        shipment_counts.insert(status.as_str(), r.get::<i64, _>("n"));
    }

    let mut fees = CurrencyTotals::new();
    let mut cod = CurrencyTotals::new();
    for r in sqlx::query(
        "SELECT currency, SUM(shipping_fee) AS fees, SUM(cod_amount) AS cod FROM shipments \
         WHERE status != 'cancelled' GROUP BY currency"
    )
    .fetch_all(pool)
    .await?
    {
        let currency = r.get::<String, _>("currency");
        fees.add(&currency, r.get::<f64, _>("fees"));
        cod.add(&currency, r.get::<f64, _>("cod"));
    }

    let mut trip_counts: BTreeMap<&'static str, i64> = TripStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for r in sqlx::query("SELECT status, COUNT(1) AS n FROM trips GROUP BY status")
        .fetch_all(pool)
        .await?
    {
        let status: TripStatus = r.get::<String, _>("status").parse()?;
        trip_counts.insert(status.as_str(), r.get::<i64, _>("n"));
    }

    let debts = currency_sums(
        pool,
        "SELECT currency, SUM(amount) AS total FROM transactions WHERE kind = 'debt' AND settled = 0 GROUP BY currency",
    )
    .await?;
    let unpaid = currency_sums(
        pool,
        "SELECT currency, SUM(amount) AS total FROM commissions WHERE paid = 0 GROUP BY currency",
    )
    .await?;

    let total: i64 = shipment_counts.values().sum();
    let labels: BTreeMap<&'static str, &'static str> =
        ShipmentStatus::ALL.iter().map(|s| (s.as_str(), s.label(locale))).collect();

    Ok(HttpResponse::Ok().json(json!({
        "shipments": {
            "by_status": shipment_counts,
            "status_labels": labels,
            "total": total,
            "shipping_fees": fees,
            "cod_amounts": cod,
        },
        "trips": { "by_status": trip_counts },
        "outstanding_debts": debts,
        "unpaid_commissions": unpaid,
        "generated_at": crate::util::now_rfc3339(),
    })))
}
