use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::i18n::{self, Locale};
use crate::models::{
    page_bounds, CreateShipmentRequest, Labeled, PaymentMethod, Shipment, ShipmentEvent,
    ShipmentFilter, ShipmentStatus, StatusUpdateRequest, UpdateShipmentRequest,
};
use crate::services::currency::{is_valid_currency, normalize_currency, round2};
use crate::state::AppState;
use crate::util::{non_empty, non_negative, now_rfc3339, reference_number, required};

pub(crate) fn labeled(shipment: Shipment, locale: Locale) -> Labeled<Shipment> {
    let status_label = shipment.status.label(locale);
    Labeled { inner: shipment, status_label }
}

pub(crate) fn checked_currency(code: Option<&str>) -> Result<String, ApiError> {
    let currency = normalize_currency(code);
    if is_valid_currency(&currency) {
        Ok(currency)
    } else {
        Err(ApiError::validation(format!("currency '{}' is not a 3-letter code", currency)))
    }
}

pub(crate) async fn fetch_shipment(pool: &SqlitePool, id: &str) -> Result<Shipment, ApiError> {
    let sql = format!("SELECT {} FROM shipments WHERE id = ?", Shipment::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    Shipment::from_row(&row)
}

/// Appends one status-history row; callers pass the connection of their transaction.
pub(crate) async fn record_event(
    conn: &mut SqliteConnection,
    shipment_id: &str,
    status: ShipmentStatus,
    note: Option<&str>,
    created_by: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO shipment_events (id, shipment_id, status, note, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(Uuid::new_v4().to_string())
    .bind(shipment_id)
    .bind(status.as_str())
    .bind(note)
    .bind(created_by)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves one shipment to `status` and logs the event, inside the caller's transaction.
pub(crate) async fn set_status(
    conn: &mut SqliteConnection,
    shipment_id: &str,
    status: ShipmentStatus,
    note: Option<&str>,
    created_by: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE shipments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now_rfc3339())
        .bind(shipment_id)
        .execute(&mut *conn)
        .await?;
    record_event(conn, shipment_id, status, note, created_by).await
}

async fn unique_tracking_number(pool: &SqlitePool) -> Result<String, ApiError> {
    for _ in 0..5 {
        let candidate = reference_number("SH", 6);
        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM shipments WHERE tracking_number = ?")
            .bind(&candidate)
            .fetch_one(pool)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    Err(ApiError::Internal("could not allocate a tracking number".into()))
}

pub async fn create_shipment(
    req: HttpRequest,
    auth: AuthUser,
    body: web::Json<CreateShipmentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let b = body.into_inner();
    let pool = &state.pool;

    let status = b.status.unwrap_or(ShipmentStatus::Pending);
    if !status.is_loadable() {
        return Err(ApiError::validation("new shipments start as pending or in_warehouse"));
    }
    let pieces = b.pieces.unwrap_or(1);
    if pieces < 1 {
        return Err(ApiError::validation("pieces must be at least 1"));
    }

    let now = now_rfc3339();
    let shipment = Shipment {
        id: Uuid::new_v4().to_string(),
        tracking_number: unique_tracking_number(pool).await?,
        sender_name: required(&b.sender_name, "sender_name")?,
        sender_phone: non_empty(b.sender_phone),
        recipient_name: required(&b.recipient_name, "recipient_name")?,
        recipient_phone: non_empty(b.recipient_phone),
        recipient_address: non_empty(b.recipient_address),
        governorate: required(&b.governorate, "governorate")?,
        weight_kg: non_negative(b.weight_kg.unwrap_or(0.0), "weight_kg")?,
        pieces,
        shipping_fee: round2(non_negative(b.shipping_fee.unwrap_or(0.0), "shipping_fee")?),
        cod_amount: round2(non_negative(b.cod_amount.unwrap_or(0.0), "cod_amount")?),
        currency: checked_currency(b.currency.as_deref())?,
        payment_method: b.payment_method.unwrap_or(PaymentMethod::Prepaid),
        status,
        branch: non_empty(b.branch).or_else(|| auth.user.branch.clone()),
        trip_id: None,
        notes: non_empty(b.notes),
        created_by: Some(auth.id().to_string()),
        created_at: now.clone(),
        updated_at: now,
    };

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO shipments (id, tracking_number, sender_name, sender_phone, recipient_name, recipient_phone, \
         recipient_address, governorate, weight_kg, pieces, shipping_fee, cod_amount, currency, payment_method, \
         status, branch, trip_id, notes, created_by, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&shipment.id)
    .bind(&shipment.tracking_number)
    .bind(&shipment.sender_name)
    .bind(&shipment.sender_phone)
    .bind(&shipment.recipient_name)
    .bind(&shipment.recipient_phone)
    .bind(&shipment.recipient_address)
    .bind(&shipment.governorate)
    .bind(shipment.weight_kg)
    .bind(shipment.pieces)
    .bind(shipment.shipping_fee)
    .bind(shipment.cod_amount)
    .bind(&shipment.currency)
    .bind(shipment.payment_method.as_str())
    .bind(shipment.status.as_str())
    .bind(&shipment.branch)
    .bind(&shipment.trip_id)
    .bind(&shipment.notes)
    .bind(&shipment.created_by)
    .bind(&shipment.created_at)
    .bind(&shipment.updated_at)
    .execute(&mut *tx)
    .await?;
    record_event(&mut *tx, &shipment.id, shipment.status, Some("created"), Some(auth.id())).await?;
    tx.commit().await?;

    tracing::info!(shipment_id = %shipment.id, tracking = %shipment.tracking_number, "shipment created");
    Ok(HttpResponse::Created().json(labeled(shipment, i18n::detect_locale(&req))))
}

pub async fn list_shipments(
    req: HttpRequest,
    auth: AuthUser,
    query: web::Query<ShipmentFilter>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let f = query.into_inner();
    let locale = i18n::detect_locale(&req);
    let (limit, offset) = page_bounds(f.limit, f.offset);

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("SELECT {} FROM shipments WHERE 1 = 1", Shipment::COLUMNS));
    if let Some(status) = non_empty(f.status) {
        let status: ShipmentStatus = status.parse()?;
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(governorate) = non_empty(f.governorate) {
        qb.push(" AND lower(governorate) = lower(").push_bind(governorate).push(")");
    }
    if let Some(branch) = non_empty(f.branch) {
        qb.push(" AND branch = ").push_bind(branch);
    }
    if let Some(trip_id) = non_empty(f.trip_id) {
        qb.push(" AND trip_id = ").push_bind(trip_id);
    }
    if let Some(q) = non_empty(f.q) {
        let pattern = format!("%{}%", q);
        qb.push(" AND (tracking_number LIKE ").push_bind(pattern.clone())
            .push(" OR sender_name LIKE ").push_bind(pattern.clone())
            .push(" OR recipient_name LIKE ").push_bind(pattern.clone())
            .push(" OR sender_phone LIKE ").push_bind(pattern.clone())
            .push(" OR recipient_phone LIKE ").push_bind(pattern)
            .push(")");
    }
    qb.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit)
        .push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.pool).await?;
    let shipments = rows
        .iter()
        .map(|r| Shipment::from_row(r).map(|s| labeled(s, locale)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(json!({
        "shipments": shipments,
        "count": shipments.len(),
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn get_shipment(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let shipment = fetch_shipment(&state.pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(labeled(shipment, i18n::detect_locale(&req))))
}

pub async fn update_shipment(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<UpdateShipmentRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let mut s = fetch_shipment(pool, &path.into_inner()).await?;
    let b = body.into_inner();

    if let Some(v) = b.sender_name { s.sender_name = required(&v, "sender_name")?; }
    if let Some(v) = b.recipient_name { s.recipient_name = required(&v, "recipient_name")?; }
    if let Some(v) = b.governorate { s.governorate = required(&v, "governorate")?; }
    if b.sender_phone.is_some() { s.sender_phone = non_empty(b.sender_phone); }
    if b.recipient_phone.is_some() { s.recipient_phone = non_empty(b.recipient_phone); }
    if b.recipient_address.is_some() { s.recipient_address = non_empty(b.recipient_address); }
    if b.branch.is_some() { s.branch = non_empty(b.branch); }
    if b.notes.is_some() { s.notes = non_empty(b.notes); }
    if let Some(v) = b.weight_kg { s.weight_kg = non_negative(v, "weight_kg")?; }
    if let Some(v) = b.pieces {
        if v < 1 {
            return Err(ApiError::validation("pieces must be at least 1"));
        }
        s.pieces = v;
    }
    if let Some(v) = b.shipping_fee { s.shipping_fee = round2(non_negative(v, "shipping_fee")?); }
    if let Some(v) = b.cod_amount { s.cod_amount = round2(non_negative(v, "cod_amount")?); }
    if let Some(v) = b.currency { s.currency = checked_currency(Some(&v))?; }
    if let Some(v) = b.payment_method { s.payment_method = v; }
    s.updated_at = now_rfc3339();

    sqlx::query(
        "UPDATE shipments SET sender_name = ?, sender_phone = ?, recipient_name = ?, recipient_phone = ?, \
         recipient_address = ?, governorate = ?, weight_kg = ?, pieces = ?, shipping_fee = ?, cod_amount = ?, \
         currency = ?, payment_method = ?, branch = ?, notes = ?, updated_at = ? WHERE id = ?"
    )
    .bind(&s.sender_name)
    .bind(&s.sender_phone)
    .bind(&s.recipient_name)
    .bind(&s.recipient_phone)
    .bind(&s.recipient_address)
    .bind(&s.governorate)
    .bind(s.weight_kg)
    .bind(s.pieces)
    .bind(s.shipping_fee)
    .bind(s.cod_amount)
    .bind(&s.currency)
    .bind(s.payment_method.as_str())
    .bind(&s.branch)
    .bind(&s.notes)
    .bind(&s.updated_at)
    .bind(&s.id)
    .execute(pool)
    .await?;

    Ok(HttpResponse::Ok().json(labeled(s, i18n::detect_locale(&req))))
}

pub async fn update_status(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    body: web::Json<StatusUpdateRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let pool = &state.pool;
    let mut shipment = fetch_shipment(pool, &path.into_inner()).await?;
    let b = body.into_inner();

    if !shipment.status.can_transition_to(b.status) {
        return Err(ApiError::conflict(format!(
            "cannot move shipment from {} to {}",
            shipment.status, b.status
        )));
    }

    let note = non_empty(b.note);
    let mut tx = pool.begin().await?;
    set_status(&mut *tx, &shipment.id, b.status, note.as_deref(), Some(auth.id())).await?;
    tx.commit().await?;

    tracing::info!(shipment_id = %shipment.id, from = %shipment.status, to = %b.status, "shipment status changed");
    shipment.status = b.status;
    Ok(HttpResponse::Ok().json(labeled(shipment, i18n::detect_locale(&req))))
}

async fn fetch_events(pool: &SqlitePool, shipment_id: &str) -> Result<Vec<ShipmentEvent>, ApiError> {
    let rows = sqlx::query(
        "SELECT id, shipment_id, status, note, created_by, created_at FROM shipment_events \
         WHERE shipment_id = ? ORDER BY created_at ASC, rowid ASC"
    )
    .bind(shipment_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(ShipmentEvent::from_row).collect()
}

pub async fn shipment_events(
    req: HttpRequest,
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let shipment = fetch_shipment(&state.pool, &path.into_inner()).await?;
    let locale = i18n::detect_locale(&req);
    let events: Vec<Labeled<ShipmentEvent>> = fetch_events(&state.pool, &shipment.id)
        .await?
        .into_iter()
        .map(|e| {
            let status_label = e.status.label(locale);
            Labeled { inner: e, status_label }
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "shipment_id": shipment.id,
        "events": events,
    })))
}

pub async fn delete_shipment(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let shipment = fetch_shipment(&state.pool, &path.into_inner()).await?;
    if shipment.trip_id.is_some() {
        return Err(ApiError::conflict("shipment is assigned to a trip"));
    }

    sqlx::query("DELETE FROM shipments WHERE id = ?")
        .bind(&shipment.id)
        .execute(&state.pool)
        .await?;

    tracing::info!(shipment_id = %shipment.id, by = %auth.id(), "shipment deleted");
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted", "shipment_id": shipment.id })))
}

/// Public lookup by tracking number; exposes no contact details or fees.
pub async fn track(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let tracking_number = path.into_inner().trim().to_ascii_uppercase();
    let locale = i18n::detect_locale(&req);

    let sql = format!("SELECT {} FROM shipments WHERE tracking_number = ?", Shipment::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(&tracking_number)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(ApiError::NotFound("shipment"))?;
    let shipment = Shipment::from_row(&row)?;

    let history: Vec<serde_json::Value> = fetch_events(&state.pool, &shipment.id)
        .await?
        .into_iter()
        .map(|e| json!({
            "status": e.status,
            "status_label": e.status.label(locale),
            "note": e.note,
            "at": e.created_at,
        }))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "tracking_number": shipment.tracking_number,
        "status": shipment.status,
        "status_label": shipment.status.label(locale),
        "governorate": shipment.governorate,
        "pieces": shipment.pieces,
        "updated_at": shipment.updated_at,
        "history": history,
    })))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    use crate::handlers::{self, testing};

    #[actix_web::test]
    async fn create_list_and_track() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "clerk@example.com", "employee").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/shipments")
            .insert_header(testing::bearer(&token))
            .set_json(json!({
                "sender_name": "Ali",
                "recipient_name": "Sara",
                "recipient_phone": "0770",
                "governorate": "Basra",
                "shipping_fee": 12.349,
                "currency": "usd"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        assert_eq!(created["status"], "pending");
        assert_eq!(created["currency"], "USD");
        assert_eq!(created["shipping_fee"], 12.35);
        let tracking = created["tracking_number"].as_str().unwrap().to_string();
        assert!(tracking.starts_with("SH-"));

        let req = test::TestRequest::get()
            .uri("/api/shipments?governorate=basra&q=Sar")
            .insert_header(testing::bearer(&token))
            .to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed["count"], 1);

        let req = test::TestRequest::get()
            .uri(&format!("/api/track/{}?lang=ar", tracking.to_lowercase()))
            .to_request();
        let tracked: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tracked["status_label"], "قيد الانتظار");
        assert_eq!(tracked["history"].as_array().unwrap().len(), 1);
        assert!(tracked.get("recipient_phone").is_none());
    }

    #[actix_web::test]
    async fn status_changes_follow_transitions() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "clerk@example.com", "employee").await;
        let id = testing::seed_shipment(&state, "Basra", 10.0, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::put()
            .uri(&format!("/api/shipments/{}/status", id))
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "status": "تم التسليم" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        for status in ["in_transit", "delivered"] {
            let req = test::TestRequest::put()
                .uri(&format!("/api/shipments/{}/status", id))
                .insert_header(testing::bearer(&token))
                .set_json(json!({ "status": status, "note": "scan" }))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get()
            .uri(&format!("/api/shipments/{}/events", id))
            .insert_header(testing::bearer(&token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let statuses: Vec<&str> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["pending", "in_transit", "delivered"]);
    }

    #[actix_web::test]
    async fn rejects_invalid_input_and_customers() {
        let state = testing::state().await;
        let staff = testing::login_as(&state, "clerk@example.com", "employee").await;
        let customer = testing::login_as(&state, "buyer@example.com", "customer").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/shipments")
            .insert_header(testing::bearer(&staff))
            .set_json(json!({ "sender_name": "Ali", "recipient_name": "Sara", "governorate": " ", "shipping_fee": 1.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/shipments")
            .insert_header(testing::bearer(&staff))
            .set_json(json!({ "sender_name": "Ali", "recipient_name": "Sara", "governorate": "Basra", "shipping_fee": -3.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/api/shipments")
            .insert_header(testing::bearer(&customer))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get().uri("/api/shipments").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn only_admins_delete_and_never_while_loaded() {
        let state = testing::state().await;
        let staff = testing::login_as(&state, "clerk@example.com", "employee").await;
        let admin = testing::login_as(&state, "boss@example.com", "admin").await;
        let id = testing::seed_shipment(&state, "Basra", 10.0, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::delete()
            .uri(&format!("/api/shipments/{}", id))
            .insert_header(testing::bearer(&staff))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/shipments/{}", id))
            .insert_header(testing::bearer(&admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/shipments/{}", id))
            .insert_header(testing::bearer(&admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }
}
