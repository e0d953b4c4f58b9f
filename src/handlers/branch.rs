use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::handlers::trips::fetch_trip_in;
use crate::models::{
    BranchEntry, BranchEntryItem, BulkDispatchRequest, CreateEntryRequest, DispatchRecord, EntryFilter,
    EntryStatus,
};
use crate::services::dispatch::{lines_for_entries, plan_dispatch, DispatchLine, ItemStock};
use crate::state::AppState;
use crate::util::{non_empty, now_rfc3339, parse_date, required, today};

#[derive(Debug, Serialize)]
struct EntrySummary {
    #[serde(flatten)]
    entry: BranchEntry,
    total_quantity: i64,
    dispatched_quantity: i64,
    remaining_quantity: i64,
    status: EntryStatus,
}

impl EntrySummary {
    fn new(entry: BranchEntry, total: i64, dispatched: i64) -> Self {
        EntrySummary {
            entry,
            total_quantity: total,
            dispatched_quantity: dispatched,
            remaining_quantity: (total - dispatched).max(0),
            status: EntryStatus::from_totals(total, dispatched),
        }
    }
}

pub async fn create_entry(
    auth: AuthUser,
    body: web::Json<CreateEntryRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let b = body.into_inner();

    if b.items.is_empty() {
        return Err(ApiError::validation("an entry needs at least one item"));
    }
    let entry = BranchEntry {
        id: Uuid::new_v4().to_string(),
        branch: required(&b.branch, "branch")?,
        source: non_empty(b.source),
        received_on: match non_empty(b.received_on) {
            Some(d) => parse_date(&d, "received_on")?,
            None => today(),
        },
        notes: non_empty(b.notes),
        created_by: Some(auth.id().to_string()),
        created_at: now_rfc3339(),
    };

    let mut items = Vec::with_capacity(b.items.len());
    for item in b.items {
        if item.quantity <= 0 {
            return Err(ApiError::validation("item quantity must be positive"));
        }
        items.push(BranchEntryItem {
            id: Uuid::new_v4().to_string(),
            entry_id: entry.id.clone(),
            description: required(&item.description, "item description")?,
            unit: non_empty(item.unit),
            quantity: item.quantity,
            dispatched_quantity: 0,
            remaining_quantity: item.quantity,
        });
    }

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO branch_entries (id, branch, source, received_on, notes, created_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&entry.id)
    .bind(&entry.branch)
    .bind(&entry.source)
    .bind(&entry.received_on)
    .bind(&entry.notes)
    .bind(&entry.created_by)
    .bind(&entry.created_at)
    .execute(&mut *tx)
    .await?;

    for item in &items {
        sqlx::query(
            "INSERT INTO branch_entry_items (id, entry_id, description, unit, quantity, dispatched_quantity) \
             VALUES (?, ?, ?, ?, ?, 0)"
        )
        .bind(&item.id)
        .bind(&item.entry_id)
        .bind(&item.description)
        .bind(&item.unit)
        .bind(item.quantity)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(entry_id = %entry.id, branch = %entry.branch, items = items.len(), "branch entry received");
    let total = items.iter().map(|i| i.quantity).sum();
    Ok(HttpResponse::Created().json(json!({
        "entry": EntrySummary::new(entry, total, 0),
        "items": items,
    })))
}

pub async fn list_entries(
    auth: AuthUser,
    query: web::Query<EntryFilter>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let f = query.into_inner();

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT e.id, e.branch, e.source, e.received_on, e.notes, e.created_by, e.created_at, \
         COALESCE(SUM(i.quantity), 0) AS total_quantity, \
         COALESCE(SUM(i.dispatched_quantity), 0) AS dispatched_total \
         FROM branch_entries e LEFT JOIN branch_entry_items i ON i.entry_id = e.id WHERE 1 = 1",
    );
    if let Some(branch) = non_empty(f.branch) {
        qb.push(" AND e.branch = ").push_bind(branch);
    }
    qb.push(" GROUP BY e.id");
    if f.pending_only.unwrap_or(false) {
        qb.push(" HAVING total_quantity > dispatched_total");
    }
    qb.push(" ORDER BY e.received_on DESC, e.created_at DESC");

    let rows = qb.build().fetch_all(&state.pool).await?;
    let entries: Vec<EntrySummary> = rows
        .iter()
        .map(|r| {
            EntrySummary::new(
                BranchEntry::from_row(r),
                r.get::<i64, _>("total_quantity"),
                r.get::<i64, _>("dispatched_total"),
            )
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({ "entries": entries, "count": entries.len() })))
}

pub async fn get_entry(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();
    let pool = &state.pool;

    let entry = sqlx::query(
        "SELECT id, branch, source, received_on, notes, created_by, created_at FROM branch_entries WHERE id = ?"
    )
    .bind(&id)
    .fetch_optional(pool)
    .await?
    .map(|r| BranchEntry::from_row(&r))
    .ok_or(ApiError::NotFound("branch entry"))?;

    let items: Vec<BranchEntryItem> = sqlx::query(
        "SELECT id, entry_id, description, unit, quantity, dispatched_quantity FROM branch_entry_items \
         WHERE entry_id = ? ORDER BY rowid ASC"
    )
    .bind(&id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(BranchEntryItem::from_row)
    .collect();

    let history: Vec<DispatchRecord> = sqlx::query(
        "SELECT id, entry_id, item_id, trip_id, quantity, dispatched_by, dispatched_at FROM dispatch_history \
         WHERE entry_id = ? ORDER BY dispatched_at ASC"
    )
    .bind(&id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(DispatchRecord::from_row)
    .collect();

    let total = items.iter().map(|i| i.quantity).sum();
    let dispatched = items.iter().map(|i| i.dispatched_quantity).sum();
    Ok(HttpResponse::Ok().json(json!({
        "entry": EntrySummary::new(entry, total, dispatched),
        "items": items,
        "history": history,
    })))
}

pub async fn delete_entry(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();
    let pool = &state.pool;

    let dispatched = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(SUM(dispatched_quantity), 0) FROM branch_entry_items WHERE entry_id = ?"
    )
    .bind(&id)
    .fetch_one(pool)
    .await?;
    if dispatched > 0 {
        return Err(ApiError::conflict("items of this entry were already dispatched"));
    }

    let result = sqlx::query("DELETE FROM branch_entries WHERE id = ?")
        .bind(&id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("branch entry"));
    }

    Ok(HttpResponse::Ok().json(json!({ "status": "deleted", "entry_id": id })))
}

/// Moves warehouse stock onto a trip in one transaction.
pub async fn bulk_dispatch(
    auth: AuthUser,
    body: web::Json<BulkDispatchRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let b = body.into_inner();

    if b.items.is_empty() && b.entry_ids.is_empty() {
        return Err(ApiError::validation("provide items or entry_ids to dispatch"));
    }
    let mut tx = state.pool.begin().await?;
    let trip = fetch_trip_in(&mut *tx, &b.trip_id).await?;
    if !trip.status.is_open() {
        return Err(ApiError::conflict(format!("trip is {}", trip.status)));
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, entry_id, quantity, dispatched_quantity FROM branch_entry_items WHERE 0 = 1",
    );
    if !b.items.is_empty() {
        qb.push(" OR id IN (");
        let mut ids = qb.separated(", ");
        for item in &b.items {
            ids.push_bind(item.item_id.clone());
        }
        ids.push_unseparated(")");
    }
    if !b.entry_ids.is_empty() {
        qb.push(" OR entry_id IN (");
        let mut ids = qb.separated(", ");
        for entry_id in &b.entry_ids {
            ids.push_bind(entry_id.clone());
        }
        ids.push_unseparated(")");
    }
    qb.push(" ORDER BY rowid ASC");

    let stock: Vec<ItemStock> = qb
        .build()
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|r| ItemStock {
            item_id: r.get::<String, _>("id"),
            entry_id: r.get::<String, _>("entry_id"),
            quantity: r.get::<i64, _>("quantity"),
            dispatched: r.get::<i64, _>("dispatched_quantity"),
        })
        .collect();

    let mut lines: Vec<DispatchLine> = b
        .items
        .iter()
        .map(|i| DispatchLine { item_id: i.item_id.clone(), quantity: i.quantity })
        .collect();
    lines.extend(lines_for_entries(&stock, &b.entry_ids));

    let plan = plan_dispatch(&stock, &lines);
    if plan.is_empty() {
        return Err(ApiError::validation("nothing left to dispatch for the requested items"));
    }

    let now = now_rfc3339();
    for a in &plan.allocations {
        let updated = sqlx::query(
            "UPDATE branch_entry_items SET dispatched_quantity = dispatched_quantity + ? \
             WHERE id = ? AND quantity - dispatched_quantity >= ?"
        )
        .bind(a.quantity)
        .bind(&a.item_id)
        .bind(a.quantity)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Err(ApiError::conflict(format!("stock of item {} changed, retry", a.item_id)));
        }

        sqlx::query(
            "INSERT INTO dispatch_history (id, entry_id, item_id, trip_id, quantity, dispatched_by, dispatched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&a.entry_id)
        .bind(&a.item_id)
        .bind(&trip.id)
        .bind(a.quantity)
        .bind(auth.id())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!(
        trip_id = %trip.id,
        allocations = plan.allocations.len(),
        skipped = plan.skipped.len(),
        quantity = plan.total_quantity(),
        "bulk dispatch applied"
    );
    Ok(HttpResponse::Ok().json(json!({
        "trip_id": trip.id,
        "total_quantity": plan.total_quantity(),
        "allocations": plan.allocations,
        "skipped": plan.skipped,
    })))
}
