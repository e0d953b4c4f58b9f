use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::handlers::finance::insert_transaction;
use crate::handlers::trips::{fetch_stations, fetch_trip, fetch_trip_shipments};
use crate::models::{Commission, CommissionFilter, Transaction, TransactionKind, TripStatus};
use crate::services::commission::compute_commissions;
use crate::services::currency::{round2, CurrencyTotals};
use crate::state::AppState;
use crate::util::{non_empty, now_rfc3339, today};

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct DriverBalance {
    owed: f64,
    paid: f64,
}

pub async fn preview(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let trip = fetch_trip(pool, &path.into_inner()).await?;
    let stations = fetch_stations(pool, &trip.id).await?;
    let shipments = fetch_trip_shipments(pool, &trip.id).await?;

    let lines = compute_commissions(&stations, &shipments);
    let totals: CurrencyTotals = lines.iter().map(|l| (l.currency.as_str(), l.amount)).collect();

    Ok(HttpResponse::Ok().json(json!({
        "trip_id": trip.id,
        "trip_number": trip.trip_number,
        "driver_name": trip.driver_name,
        "trip_status": trip.status,
        "lines": lines,
        "totals": totals,
    })))
}

pub async fn record(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let trip = fetch_trip(pool, &path.into_inner()).await?;
    if trip.status != TripStatus::Completed {
        return Err(ApiError::conflict("commissions are recorded once the trip is completed"));
    }
    let stations = fetch_stations(pool, &trip.id).await?;
    let shipments = fetch_trip_shipments(pool, &trip.id).await?;
    let lines = compute_commissions(&stations, &shipments);

    let mut tx = pool.begin().await?;
    let already_paid = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM commissions WHERE trip_id = ? AND paid = 1")
        .bind(&trip.id)
        .fetch_one(&mut *tx)
        .await?;
    if already_paid > 0 {
        return Err(ApiError::conflict("commissions of this trip were already paid"));
    }

    sqlx::query("DELETE FROM commissions WHERE trip_id = ? AND paid = 0")
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;

    let now = now_rfc3339();
    let mut recorded = Vec::with_capacity(lines.len());
    for line in lines {
        let c = Commission {
            id: Uuid::new_v4().to_string(),
            trip_id: trip.id.clone(),
            driver_name: trip.driver_name.clone(),
            station: line.station,
            currency: line.currency,
            shipment_count: line.shipment_count,
            collected: line.collected,
            rate: line.rate,
            amount: line.amount,
            paid: false,
            paid_at: None,
            transaction_id: None,
            created_at: now.clone(),
        };
        sqlx::query(
            "INSERT INTO commissions (id, trip_id, driver_name, station, currency, shipment_count, collected, \
             rate, amount, paid, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)"
        )
        .bind(&c.id)
        .bind(&c.trip_id)
        .bind(&c.driver_name)
        .bind(&c.station)
        .bind(&c.currency)
        .bind(c.shipment_count)
        .bind(c.collected)
        .bind(c.rate)
        .bind(c.amount)
        .bind(&c.created_at)
        .execute(&mut *tx)
        .await?;
        recorded.push(c);
    }
    tx.commit().await?;

    tracing::info!(trip_id = %trip.id, rows = recorded.len(), "commissions recorded");
    let totals: CurrencyTotals = recorded.iter().map(|c| (c.currency.as_str(), c.amount)).collect();
    Ok(HttpResponse::Created().json(json!({
        "trip_id": trip.id,
        "commissions": recorded,
        "totals": totals,
    })))
}

pub async fn list_commissions(
    auth: AuthUser,
    query: web::Query<CommissionFilter>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let f = query.into_inner();

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM commissions WHERE 1 = 1", Commission::COLUMNS));
    if let Some(driver) = non_empty(f.driver) {
        qb.push(" AND driver_name = ").push_bind(driver);
    }
    if let Some(paid) = f.paid {
        qb.push(" AND paid = ").push_bind(paid as i64);
    }
    qb.push(" ORDER BY created_at DESC, station ASC");

    let commissions: Vec<Commission> = qb
        .build()
        .fetch_all(&state.pool)
        .await?
        .iter()
        .map(Commission::from_row)
        .collect();

    Ok(HttpResponse::Ok().json(json!({ "commissions": commissions, "count": commissions.len() })))
}

pub async fn summary(auth: AuthUser, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;

    let rows = sqlx::query(
        "SELECT driver_name, currency, paid, SUM(amount) AS total FROM commissions \
         GROUP BY driver_name, currency, paid"
    )
    .fetch_all(&state.pool)
    .await?;

    let mut drivers: BTreeMap<String, BTreeMap<String, DriverBalance>> = BTreeMap::new();
    for r in &rows {
        let slot = drivers
            .entry(r.get::<String, _>("driver_name"))
            .or_default()
            .entry(r.get::<String, _>("currency"))
            .or_default();
        let total = round2(r.get::<f64, _>("total"));
        if r.get::<i64, _>("paid") != 0 {
            slot.paid = total;
        } else {
            slot.owed = total;
        }
    }

    let drivers: Vec<_> = drivers
        .into_iter()
        .map(|(driver_name, currencies)| json!({ "driver_name": driver_name, "currencies": currencies }))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "drivers": drivers })))
}

pub async fn pay(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let mut tx = state.pool.begin().await?;
    let sql = format!("SELECT {} FROM commissions WHERE id = ?", Commission::COLUMNS);
    let mut commission = sqlx::query(&sql)
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| Commission::from_row(&r))
        .ok_or(ApiError::NotFound("commission"))?;
    if commission.paid {
        return Err(ApiError::conflict("commission already paid"));
    }

    let now = now_rfc3339();
    // A zero-rate station still gets closed, but there is no money to book.
    if commission.amount > 0.0 {
        let expense = Transaction {
            id: Uuid::new_v4().to_string(),
            kind: TransactionKind::Expense,
            amount: commission.amount,
            currency: commission.currency.clone(),
            customer_name: None,
            branch: None,
            counter_branch: None,
            description: Some(format!(
                "Driver commission: {} ({})",
                commission.driver_name, commission.station
            )),
            settled: false,
            occurred_on: today(),
            created_by: Some(auth.id().to_string()),
            created_at: now.clone(),
        };
        insert_transaction(&mut *tx, &expense).await?;
        commission.transaction_id = Some(expense.id);
    }

    sqlx::query("UPDATE commissions SET paid = 1, paid_at = ?, transaction_id = ? WHERE id = ?")
        .bind(&now)
        .bind(&commission.transaction_id)
        .bind(&commission.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    commission.paid = true;
    commission.paid_at = Some(now);
    tracing::info!(commission_id = %commission.id, amount = commission.amount, currency = %commission.currency, "commission paid");
    Ok(HttpResponse::Ok().json(commission))
}
