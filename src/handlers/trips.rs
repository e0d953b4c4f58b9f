use std::collections::HashSet;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::json;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::handlers::shipments::{checked_currency, labeled, set_status};
use crate::i18n::{self, Locale};
use crate::models::{
    page_bounds, AssignShipmentsRequest, CreateTripRequest, Shipment, ShipmentStatus, Trip,
    TripExpensesRequest, TripFilter, TripStation, TripStatus, TripStatusRequest,
};
use crate::services::currency::{round2, CurrencyTotals};
use crate::state::AppState;
use crate::util::{non_empty, non_negative, now_rfc3339, reference_number, required};

#[derive(Debug, Serialize)]
struct TripView {
    #[serde(flatten)]
    trip: Trip,
    status_label: &'static str,
    total_expenses: f64,
    shipment_count: i64,
}

fn view(trip: Trip, shipment_count: i64, locale: Locale) -> TripView {
    TripView {
        status_label: trip.status.label(locale),
        total_expenses: trip.total_expenses(),
        shipment_count,
        trip,
    }
}

pub(crate) async fn fetch_trip(pool: &SqlitePool, id: &str) -> Result<Trip, ApiError> {
    let sql = format!("SELECT {} FROM trips WHERE id = ?", Trip::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("trip"))?;
    Trip::from_row(&row)
}

/// Reads the trip on the caller's transaction so status checks and writes see the same row.
pub(crate) async fn fetch_trip_in(conn: &mut SqliteConnection, id: &str) -> Result<Trip, ApiError> {
    let sql = format!("SELECT {} FROM trips WHERE id = ?", Trip::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(ApiError::NotFound("trip"))?;
    Trip::from_row(&row)
}

pub(crate) async fn fetch_stations(pool: &SqlitePool, trip_id: &str) -> Result<Vec<TripStation>, ApiError> {
    let rows = sqlx::query(
        "SELECT governorate, commission_rate FROM trip_stations WHERE trip_id = ? ORDER BY position ASC"
    )
    .bind(trip_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| TripStation {
            governorate: r.get::<String, _>("governorate"),
            commission_rate: r.get::<f64, _>("commission_rate"),
        })
        .collect())
}

pub(crate) async fn fetch_trip_shipments(pool: &SqlitePool, trip_id: &str) -> Result<Vec<Shipment>, ApiError> {
    let sql = format!("SELECT {} FROM shipments WHERE trip_id = ? ORDER BY created_at ASC", Shipment::COLUMNS);
    let rows = sqlx::query(&sql).bind(trip_id).fetch_all(pool).await?;
    rows.iter().map(Shipment::from_row).collect()
}

async fn trip_shipments_in(conn: &mut SqliteConnection, trip_id: &str) -> Result<Vec<Shipment>, ApiError> {
    let sql = format!("SELECT {} FROM shipments WHERE trip_id = ?", Shipment::COLUMNS);
    let rows = sqlx::query(&sql).bind(trip_id).fetch_all(&mut *conn).await?;
    rows.iter().map(Shipment::from_row).collect()
}

/// Puts warehouse stock dispatched to a trip back on its entries; returns the units released.
async fn release_dispatched(conn: &mut SqliteConnection, trip_id: &str) -> Result<i64, ApiError> {
    let released = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(quantity), 0) FROM dispatch_history WHERE trip_id = ?"
    )
    .bind(trip_id)
    .fetch_one(&mut *conn)
    .await?;
    if released == 0 {
        return Ok(0);
    }

    sqlx::query(
        "UPDATE branch_entry_items SET dispatched_quantity = dispatched_quantity - \
         (SELECT SUM(h.quantity) FROM dispatch_history h WHERE h.item_id = branch_entry_items.id AND h.trip_id = ?) \
         WHERE id IN (SELECT item_id FROM dispatch_history WHERE trip_id = ?)"
    )
    .bind(trip_id)
    .bind(trip_id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM dispatch_history WHERE trip_id = ?")
        .bind(trip_id)
        .execute(&mut *conn)
        .await?;
    Ok(released)
}

fn validate_stations(stations: &[TripStation]) -> Result<Vec<TripStation>, ApiError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(stations.len());
    for st in stations {
        let governorate = required(&st.governorate, "station governorate")?;
        if !st.commission_rate.is_finite() || !(0.0..=100.0).contains(&st.commission_rate) {
            return Err(ApiError::validation(format!(
                "commission rate for {} must be between 0 and 100",
                governorate
            )));
        }
        if !seen.insert(governorate.to_lowercase()) {
            return Err(ApiError::validation(format!("station {} is listed twice", governorate)));
        }
        out.push(TripStation { governorate, commission_rate: st.commission_rate });
    }
    Ok(out)
}

/// Loads shipments onto an open trip; every id must be loadable or nothing is attached.
async fn attach_shipments(
    conn: &mut SqliteConnection,
    trip: &Trip,
    shipment_ids: &[String],
    by: &str,
) -> Result<usize, ApiError> {
    let unique: Vec<&String> = {
        let mut seen = HashSet::new();
        shipment_ids.iter().filter(|id| seen.insert(id.as_str())).collect()
    };

    let sql = format!("SELECT {} FROM shipments WHERE id = ?", Shipment::COLUMNS);
    let mut loaded = Vec::with_capacity(unique.len());
    for id in &unique {
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(ApiError::NotFound("shipment"))?;
        let shipment = Shipment::from_row(&row)?;
        if let Some(other) = &shipment.trip_id {
            if *other != trip.id {
                return Err(ApiError::conflict(format!(
                    "shipment {} is already on another trip",
                    shipment.tracking_number
                )));
            }
            continue;
        }
        if !shipment.status.is_loadable() {
            return Err(ApiError::conflict(format!(
                "shipment {} is {} and cannot be loaded",
                shipment.tracking_number, shipment.status
            )));
        }
        loaded.push(shipment);
    }

    let note = format!("loaded on trip {}", trip.trip_number);
    for shipment in &loaded {
        sqlx::query("UPDATE shipments SET trip_id = ?, updated_at = ? WHERE id = ?")
            .bind(&trip.id)
            .bind(now_rfc3339())
            .bind(&shipment.id)
            .execute(&mut *conn)
            .await?;
        if trip.status == TripStatus::InProgress {
            set_status(&mut *conn, &shipment.id, ShipmentStatus::InTransit, Some(&note), Some(by)).await?;
        }
    }

    Ok(loaded.len())
}

async fn unique_trip_number(pool: &SqlitePool) -> Result<String, ApiError> {
    for _ in 0..5 {
        let candidate = reference_number("TRP", 4);
        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM trips WHERE trip_number = ?")
            .bind(&candidate)
            .fetch_one(pool)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(ApiError::Internal("could not allocate a trip number".into()))
}

pub async fn create_trip(
    req: HttpRequest,
    auth: AuthUser,
    body: web::Json<CreateTripRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let b = body.into_inner();
    let pool = &state.pool;

    let stations = validate_stations(&b.stations)?;
    let trip = Trip {
        id: Uuid::new_v4().to_string(),
        trip_number: unique_trip_number(pool).await?,
        vehicle: required(&b.vehicle, "vehicle")?,
        driver_name: required(&b.driver_name, "driver_name")?,
        destination: required(&b.destination, "destination")?,
        status: TripStatus::Planned,
        fuel_expense: round2(non_negative(b.fuel_expense.unwrap_or(0.0), "fuel_expense")?),
        toll_expense: round2(non_negative(b.toll_expense.unwrap_or(0.0), "toll_expense")?),
        other_expense: round2(non_negative(b.other_expense.unwrap_or(0.0), "other_expense")?),
        expense_currency: checked_currency(b.expense_currency.as_deref())?,
        notes: non_empty(b.notes),
        departed_at: None,
        completed_at: None,
        created_at: now_rfc3339(),
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO trips (id, trip_number, vehicle, driver_name, destination, status, fuel_expense, toll_expense, \
         other_expense, expense_currency, notes, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&trip.id)
    .bind(&trip.trip_number)
    .bind(&trip.vehicle)
    .bind(&trip.driver_name)
    .bind(&trip.destination)
    .bind(trip.status.as_str())
    .bind(trip.fuel_expense)
    .bind(trip.toll_expense)
    .bind(trip.other_expense)
    .bind(&trip.expense_currency)
    .bind(&trip.notes)
    .bind(&trip.created_at)
    .execute(&mut *tx)
    .await?;

    for (position, st) in stations.iter().enumerate() {
        sqlx::query(
            "INSERT INTO trip_stations (trip_id, position, governorate, commission_rate) VALUES (?, ?, ?, ?)"
        )
        .bind(&trip.id)
        .bind(position as i64)
        .bind(&st.governorate)
        .bind(st.commission_rate)
        .execute(&mut *tx)
        .await?;
    }

    let attached = attach_shipments(&mut *tx, &trip, &b.shipment_ids, auth.id()).await?;
    tx.commit().await?;

    tracing::info!(trip_id = %trip.id, trip_number = %trip.trip_number, shipments = attached, "trip created");
    let locale = i18n::detect_locale(&req);
    Ok(HttpResponse::Created().json(json!({
        "trip": view(trip, attached as i64, locale),
        "stations": stations,
    })))
}

pub async fn list_trips(
    req: HttpRequest,
    auth: AuthUser,
    query: web::Query<TripFilter>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let f = query.into_inner();
    let locale = i18n::detect_locale(&req);
    let (limit, offset) = page_bounds(f.limit, f.offset);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {}, (SELECT COUNT(1) FROM shipments s WHERE s.trip_id = trips.id) AS shipment_count \
         FROM trips WHERE 1 = 1",
        Trip::COLUMNS
    ));
    if let Some(status) = non_empty(f.status) {
        let status: TripStatus = status.parse()?;
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(driver) = non_empty(f.driver) {
        qb.push(" AND driver_name LIKE ").push_bind(format!("%{}%", driver));
    }
    qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit)
        .push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.pool).await?;
    let trips = rows
        .iter()
        .map(|r| Trip::from_row(r).map(|t| view(t, r.get::<i64, _>("shipment_count"), locale)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(json!({ "trips": trips, "count": trips.len() })))
}

pub async fn get_trip(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let locale = i18n::detect_locale(&req);
    let trip = fetch_trip(pool, &path.into_inner()).await?;
    let stations = fetch_stations(pool, &trip.id).await?;
    let shipments = fetch_trip_shipments(pool, &trip.id).await?;

    let mut fees = CurrencyTotals::new();
    let mut cod = CurrencyTotals::new();
    for s in &shipments {
        fees.add(&s.currency, s.shipping_fee);
        cod.add(&s.currency, s.cod_amount);
    }

    let dispatched = sqlx::query(
        "SELECT h.item_id, h.entry_id, h.quantity, h.dispatched_at, i.description, e.branch \
         FROM dispatch_history h \
         JOIN branch_entry_items i ON i.id = h.item_id \
         JOIN branch_entries e ON e.id = h.entry_id \
         WHERE h.trip_id = ? ORDER BY h.dispatched_at ASC"
    )
    .bind(&trip.id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|r| json!({
        "item_id": r.get::<String, _>("item_id"),
        "entry_id": r.get::<String, _>("entry_id"),
        "description": r.get::<String, _>("description"),
        "branch": r.get::<String, _>("branch"),
        "quantity": r.get::<i64, _>("quantity"),
        "dispatched_at": r.get::<String, _>("dispatched_at"),
    }))
    .collect::<Vec<_>>();

    let count = shipments.len() as i64;
    let shipments: Vec<_> = shipments.into_iter().map(|s| labeled(s, locale)).collect();

    Ok(HttpResponse::Ok().json(json!({
        "trip": view(trip, count, locale),
        "stations": stations,
        "shipments": shipments,
        "shipping_fees": fees,
        "cod_amounts": cod,
        "dispatched_items": dispatched,
    })))
}

pub async fn update_trip_status(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<TripStatusRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();
    let next = body.into_inner().status;

    let mut tx = state.pool.begin().await?;
    let mut trip = fetch_trip_in(&mut *tx, &id).await?;
    if !trip.status.can_transition_to(next) {
        return Err(ApiError::conflict(format!("cannot move trip from {} to {}", trip.status, next)));
    }

    let now = now_rfc3339();
    match next {
        TripStatus::InProgress => trip.departed_at = Some(now.clone()),
        TripStatus::Completed => trip.completed_at = Some(now.clone()),
        TripStatus::Planned | TripStatus::Cancelled => {}
    }

    // The status guard makes a concurrent transition of the same trip lose.
    let claimed = sqlx::query(
        "UPDATE trips SET status = ?, departed_at = ?, completed_at = ? WHERE id = ? AND status = ?"
    )
    .bind(next.as_str())
    .bind(&trip.departed_at)
    .bind(&trip.completed_at)
    .bind(&trip.id)
    .bind(trip.status.as_str())
    .execute(&mut *tx)
    .await?;
    if claimed.rows_affected() != 1 {
        return Err(ApiError::conflict("trip status changed meanwhile"));
    }

    let note = format!("trip {} {}", trip.trip_number, next);
    let shipments = trip_shipments_in(&mut *tx, &trip.id).await?;
    let mut moved = 0usize;
    let mut released = 0i64;

    match next {
        TripStatus::InProgress => {
            for s in shipments.iter().filter(|s| s.status.is_loadable()) {
                set_status(&mut *tx, &s.id, ShipmentStatus::InTransit, Some(&note), Some(auth.id())).await?;
                moved += 1;
            }
        }
        TripStatus::Completed => {
            for s in shipments.iter().filter(|s| s.status == ShipmentStatus::InTransit) {
                set_status(&mut *tx, &s.id, ShipmentStatus::Delivered, Some(&note), Some(auth.id())).await?;
                moved += 1;
            }
        }
        TripStatus::Cancelled => {
            for s in shipments.iter().filter(|s| s.status == ShipmentStatus::InTransit) {
                set_status(&mut *tx, &s.id, ShipmentStatus::InWarehouse, Some(&note), Some(auth.id())).await?;
                moved += 1;
            }
            sqlx::query("UPDATE shipments SET trip_id = NULL, updated_at = ? WHERE trip_id = ?")
                .bind(&now)
                .bind(&trip.id)
                .execute(&mut *tx)
                .await?;
            released = release_dispatched(&mut *tx, &trip.id).await?;
        }
        TripStatus::Planned => {}
    }
    tx.commit().await?;

    tracing::info!(
        trip_id = %trip.id, from = %trip.status, to = %next,
        shipments_moved = moved, stock_released = released,
        "trip status changed"
    );
    trip.status = next;
    let count = if next == TripStatus::Cancelled { 0 } else { shipments.len() as i64 };
    Ok(HttpResponse::Ok().json(json!({
        "trip": view(trip, count, i18n::detect_locale(&req)),
        "shipments_moved": moved,
        "stock_released": released,
    })))
}

pub async fn assign_shipments(
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<AssignShipmentsRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();
    let ids = body.into_inner().shipment_ids;
    if ids.is_empty() {
        return Err(ApiError::validation("shipment_ids must not be empty"));
    }

    let mut tx = state.pool.begin().await?;
    let trip = fetch_trip_in(&mut *tx, &id).await?;
    if !trip.status.is_open() {
        return Err(ApiError::conflict(format!("trip is {}", trip.status)));
    }
    let attached = attach_shipments(&mut *tx, &trip, &ids, auth.id()).await?;
    tx.commit().await?;

    tracing::info!(trip_id = %trip.id, attached, "shipments assigned");
    Ok(HttpResponse::Ok().json(json!({ "trip_id": trip.id, "attached": attached })))
}

pub async fn remove_shipment(
    auth: AuthUser,
    path: web::Path<(String, String)>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let (trip_id, shipment_id) = path.into_inner();

    let mut tx = state.pool.begin().await?;
    let trip = fetch_trip_in(&mut *tx, &trip_id).await?;
    if trip.status != TripStatus::Planned {
        return Err(ApiError::conflict("shipments can only be removed from planned trips"));
    }

    let result = sqlx::query("UPDATE shipments SET trip_id = NULL, updated_at = ? WHERE id = ? AND trip_id = ?")
        .bind(now_rfc3339())
        .bind(&shipment_id)
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("shipment on this trip"));
    }
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(json!({ "status": "removed", "trip_id": trip.id, "shipment_id": shipment_id })))
}

pub async fn update_expenses(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<TripExpensesRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let mut trip = fetch_trip(pool, &path.into_inner()).await?;
    let b = body.into_inner();

    if trip.status == TripStatus::Cancelled {
        return Err(ApiError::conflict("trip is cancelled"));
    }
    if let Some(v) = b.fuel_expense { trip.fuel_expense = round2(non_negative(v, "fuel_expense")?); }
    if let Some(v) = b.toll_expense { trip.toll_expense = round2(non_negative(v, "toll_expense")?); }
    if let Some(v) = b.other_expense { trip.other_expense = round2(non_negative(v, "other_expense")?); }
    if let Some(v) = b.expense_currency { trip.expense_currency = checked_currency(Some(&v))?; }

    sqlx::query(
        "UPDATE trips SET fuel_expense = ?, toll_expense = ?, other_expense = ?, expense_currency = ? WHERE id = ?"
    )
    .bind(trip.fuel_expense)
    .bind(trip.toll_expense)
    .bind(trip.other_expense)
    .bind(&trip.expense_currency)
    .bind(&trip.id)
    .execute(pool)
    .await?;

    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM shipments WHERE trip_id = ?")
        .bind(&trip.id)
        .fetch_one(pool)
        .await?;
    Ok(HttpResponse::Ok().json(view(trip, count, i18n::detect_locale(&req))))
}

pub async fn delete_trip(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let mut tx = state.pool.begin().await?;
    let trip = fetch_trip_in(&mut *tx, &id).await?;
    if trip.status != TripStatus::Planned {
        return Err(ApiError::conflict("only planned trips can be deleted"));
    }
    let dispatched = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM dispatch_history WHERE trip_id = ?")
        .bind(&trip.id)
        .fetch_one(&mut *tx)
        .await?;
    if dispatched > 0 {
        return Err(ApiError::conflict("warehouse items were already dispatched to this trip"));
    }

    sqlx::query("UPDATE shipments SET trip_id = NULL, updated_at = ? WHERE trip_id = ?")
        .bind(now_rfc3339())
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM trips WHERE id = ?")
        .bind(&trip.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(trip_id = %trip.id, by = %auth.id(), "trip deleted");
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted", "trip_id": trip.id })))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    use crate::handlers::{self, testing};

    #[actix_web::test]
    async fn departure_and_completion_cascade_to_shipments() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "dispatcher@example.com", "employee").await;
        let a = testing::seed_shipment(&state, "Basra", 10.0, "USD").await;
        let b = testing::seed_shipment(&state, "Najaf", 5.0, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({
                "vehicle": "Truck 12",
                "driver_name": "Hassan",
                "destination": "South",
                "stations": [{ "governorate": "Basra", "commission_rate": 10.0 }],
                "shipment_ids": [a, a]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["trip"]["shipment_count"], 1);
        let trip_id = created["trip"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::put()
            .uri(&format!("/api/trips/{}/status", trip_id))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "status": "in_progress" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["shipments_moved"], 1);

        // loading onto a running trip puts the shipment straight in transit
        let req = test::TestRequest::post()
            .uri(&format!("/api/trips/{}/shipments", trip_id))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "shipment_ids": [b] }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::put()
            .uri(&format!("/api/trips/{}/status", trip_id))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "status": "completed" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["shipments_moved"], 2);
        assert_eq!(body["trip"]["status"], "completed");

        let req = test::TestRequest::get()
            .uri(&format!("/api/trips/{}", trip_id))
            .insert_header(testing::bearer(&token))
            .to_request();
        let detail: Value = test::call_and_read_body_json(&app, req).await;
        let statuses: Vec<&str> = detail["shipments"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["delivered", "delivered"]);
        assert_eq!(detail["shipping_fees"]["USD"], 15.0);

        let req = test::TestRequest::put()
            .uri(&format!("/api/trips/{}/status", trip_id))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn a_shipment_rides_one_trip_at_a_time() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "dispatcher@example.com", "employee").await;
        let a = testing::seed_shipment(&state, "Basra", 10.0, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let new_trip = |ids: Vec<String>| {
            test::TestRequest::post()
                .uri("/api/trips")
                .insert_header(testing::bearer(&token))
                .set_json(json!({ "vehicle": "Van", "driver_name": "Omar", "destination": "North", "shipment_ids": ids }))
                .to_request()
        };

        assert_eq!(test::call_service(&app, new_trip(vec![a.clone()])).await.status(), StatusCode::CREATED);
        assert_eq!(test::call_service(&app, new_trip(vec![a.clone()])).await.status(), StatusCode::CONFLICT);
        assert_eq!(
            test::call_service(&app, new_trip(vec!["missing".to_string()])).await.status(),
            StatusCode::NOT_FOUND
        );

        let req = test::TestRequest::get()
            .uri("/api/trips?driver=Om")
            .insert_header(testing::bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        // failed creations roll back entirely
        assert_eq!(body["count"], 1);
    }

    #[actix_web::test]
    async fn cancelling_returns_cargo_to_the_warehouse() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "dispatcher@example.com", "employee").await;
        let a = testing::seed_shipment(&state, "Basra", 10.0, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "vehicle": "Van", "driver_name": "Omar", "destination": "North", "shipment_ids": [a] }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let trip_id = created["trip"]["id"].as_str().unwrap().to_string();

        for status in ["in_progress", "cancelled"] {
            let req = test::TestRequest::put()
                .uri(&format!("/api/trips/{}/status", trip_id))
                .insert_header(testing::bearer(&token))
                .set_json(json!({ "status": status }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get()
            .uri(&format!("/api/shipments/{}", a))
            .insert_header(testing::bearer(&token))
            .to_request();
        let shipment: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(shipment["status"], "in_warehouse");
        assert!(shipment["trip_id"].is_null());
    }

    #[actix_web::test]
    async fn rejects_bad_stations_and_expenses() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "dispatcher@example.com", "employee").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({
                "vehicle": "Van", "driver_name": "Omar", "destination": "North",
                "stations": [{ "governorate": "Basra", "commission_rate": 150.0 }]
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({
                "vehicle": "Van", "driver_name": "Omar", "destination": "North",
                "stations": [{ "governorate": "Basra", "commission_rate": 5.0 }, { "governorate": "basra", "commission_rate": 6.0 }]
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "vehicle": "Van", "driver_name": "Omar", "destination": "North", "fuel_expense": -5.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn loading_rules_follow_trip_status() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "dispatcher@example.com", "employee").await;
        let admin = testing::login_as(&state, "root@example.com", "admin").await;
        let a = testing::seed_shipment(&state, "Basra", 10.0, "USD").await;
        let b = testing::seed_shipment(&state, "Basra", 4.0, "USD").await;
        let gone = testing::seed_shipment(&state, "Najaf", 3.0, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::put()
            .uri(&format!("/api/shipments/{}/status", gone))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "vehicle": "Van", "driver_name": "Omar", "destination": "South", "shipment_ids": [a] }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let trip_id = created["trip"]["id"].as_str().unwrap().to_string();
        let assign = |ids: Vec<&String>| {
            test::TestRequest::post()
                .uri(&format!("/api/trips/{}/shipments", trip_id))
                .insert_header(testing::bearer(&token))
                .set_json(json!({ "shipment_ids": ids }))
                .to_request()
        };
        let set_trip_status = |status: &str| {
            test::TestRequest::put()
                .uri(&format!("/api/trips/{}/status", trip_id))
                .insert_header(testing::bearer(&token))
                .set_json(json!({ "status": status }))
                .to_request()
        };
        let shipment_trip = |id: &String| {
            test::TestRequest::get()
                .uri(&format!("/api/shipments/{}", id))
                .insert_header(testing::bearer(&token))
                .to_request()
        };

        // one cancelled shipment in the batch keeps the others off the trip too
        assert_eq!(test::call_service(&app, assign(vec![&b, &gone])).await.status(), StatusCode::CONFLICT);
        let body: Value = test::call_and_read_body_json(&app, shipment_trip(&b)).await;
        assert!(body["trip_id"].is_null());

        assert_eq!(test::call_service(&app, assign(vec![&b])).await.status(), StatusCode::OK);
        let req = test::TestRequest::delete()
            .uri(&format!("/api/trips/{}/shipments/{}", trip_id, b))
            .insert_header(testing::bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        let body: Value = test::call_and_read_body_json(&app, shipment_trip(&b)).await;
        assert!(body["trip_id"].is_null());

        assert_eq!(test::call_service(&app, set_trip_status("in_progress")).await.status(), StatusCode::OK);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/trips/{}/shipments/{}", trip_id, a))
            .insert_header(testing::bearer(&token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/trips/{}", trip_id))
            .insert_header(testing::bearer(&admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        assert_eq!(test::call_service(&app, set_trip_status("completed")).await.status(), StatusCode::OK);
        assert_eq!(test::call_service(&app, assign(vec![&b])).await.status(), StatusCode::CONFLICT);
        assert_eq!(test::call_service(&app, set_trip_status("completed")).await.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn expenses_stay_non_negative_and_freeze_on_cancel() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "dispatcher@example.com", "employee").await;
        let admin = testing::login_as(&state, "root@example.com", "admin").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/trips")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "vehicle": "Van", "driver_name": "Omar", "destination": "North" }))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        let trip_id = created["trip"]["id"].as_str().unwrap().to_string();
        let expenses = |body: Value| {
            test::TestRequest::put()
                .uri(&format!("/api/trips/{}/expenses", trip_id))
                .insert_header(testing::bearer(&token))
                .set_json(body)
                .to_request()
        };

        let body: Value =
            test::call_and_read_body_json(&app, expenses(json!({ "fuel_expense": 40.0, "toll_expense": 5.5 }))).await;
        assert_eq!(body["total_expenses"], 45.5);

        let resp = test::call_service(&app, expenses(json!({ "other_expense": -1.0 }))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri(&format!("/api/trips/{}/status", trip_id))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let resp = test::call_service(&app, expenses(json!({ "fuel_expense": 10.0 }))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // only planned trips can be deleted
        let req = test::TestRequest::delete()
            .uri(&format!("/api/trips/{}", trip_id))
            .insert_header(testing::bearer(&admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
    }
}
