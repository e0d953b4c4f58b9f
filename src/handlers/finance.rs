use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::handlers::shipments::checked_currency;
use crate::models::{
    page_bounds, CreateTransactionRequest, JournalQuery, Transaction, TransactionFilter, TransactionKind,
};
use crate::services::currency::{round2, CurrencyTotals};
use crate::state::AppState;
use crate::util::{non_empty, now_rfc3339, parse_date, today};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct JournalTotals {
    pub income: f64,
    pub expense: f64,
    pub net: f64,
}

pub(crate) async fn insert_transaction(conn: &mut SqliteConnection, t: &Transaction) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions (id, kind, amount, currency, customer_name, branch, counter_branch, description, \
         settled, occurred_on, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(&t.id)
    .bind(t.kind.as_str())
    .bind(t.amount)
    .bind(&t.currency)
    .bind(&t.customer_name)
    .bind(&t.branch)
    .bind(&t.counter_branch)
    .bind(&t.description)
    .bind(t.settled as i64)
    .bind(&t.occurred_on)
    .bind(&t.created_by)
    .bind(&t.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Validates a ledger request into a transaction row.
fn build_transaction(b: CreateTransactionRequest, created_by: &str) -> Result<Transaction, ApiError> {
    if !b.amount.is_finite() || b.amount <= 0.0 {
        return Err(ApiError::validation("amount must be positive"));
    }
    let branch = non_empty(b.branch);
    let counter_branch = non_empty(b.counter_branch);
    let customer_name = non_empty(b.customer_name);

    match b.kind {
        TransactionKind::Transfer => match (&branch, &counter_branch) {
            (Some(from), Some(to)) if from.eq_ignore_ascii_case(to) => {
                return Err(ApiError::validation("a transfer needs two different branches"));
            }
            (Some(_), Some(_)) => {}
            _ => return Err(ApiError::validation("a transfer needs branch and counter_branch")),
        },
        TransactionKind::Debt if customer_name.is_none() => {
            return Err(ApiError::validation("a debt needs customer_name"));
        }
        _ => {}
    }

    Ok(Transaction {
        id: Uuid::new_v4().to_string(),
        kind: b.kind,
        amount: round2(b.amount),
        currency: checked_currency(b.currency.as_deref())?,
        customer_name,
        branch,
        counter_branch: if b.kind == TransactionKind::Transfer { counter_branch } else { None },
        description: non_empty(b.description),
        settled: false,
        occurred_on: match non_empty(b.occurred_on) {
            Some(d) => parse_date(&d, "occurred_on")?,
            None => today(),
        },
        created_by: Some(created_by.to_string()),
        created_at: now_rfc3339(),
    })
}

/// Income minus expense per currency; transfers and debts do not count.
pub fn journal_totals(transactions: &[Transaction]) -> BTreeMap<String, JournalTotals> {
    let mut income = CurrencyTotals::new();
    let mut expense = CurrencyTotals::new();
    for t in transactions {
        match t.kind {
            TransactionKind::Income => income.add(&t.currency, t.amount),
            TransactionKind::Expense => expense.add(&t.currency, t.amount),
            TransactionKind::Transfer | TransactionKind::Debt => {}
        }
    }

    let net = income.minus(&expense);
    net.iter()
        .map(|(currency, net)| {
            (
                currency.to_string(),
                JournalTotals { income: income.get(currency), expense: expense.get(currency), net },
            )
        })
        .collect()
}

/// Running balance per branch and currency.
pub fn branch_totals(transactions: &[Transaction]) -> BTreeMap<String, CurrencyTotals> {
    let mut balances: BTreeMap<String, CurrencyTotals> = BTreeMap::new();
    let mut post = |branch: &Option<String>, currency: &str, amount: f64| {
        if let Some(b) = branch {
            balances.entry(b.clone()).or_default().add(currency, amount);
        }
    };
    for t in transactions {
        match t.kind {
            TransactionKind::Income => post(&t.branch, &t.currency, t.amount),
            TransactionKind::Expense => post(&t.branch, &t.currency, -t.amount),
            TransactionKind::Transfer => {
                post(&t.branch, &t.currency, -t.amount);
                post(&t.counter_branch, &t.currency, t.amount);
            }
            TransactionKind::Debt => {}
        }
    }
    balances
}

pub async fn create_transaction(
    auth: AuthUser,
    body: web::Json<CreateTransactionRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let t = build_transaction(body.into_inner(), auth.id())?;

    let mut conn = state.pool.acquire().await?;
    insert_transaction(&mut conn, &t).await?;

    tracing::info!(transaction_id = %t.id, kind = %t.kind, amount = t.amount, currency = %t.currency, "transaction recorded");
    Ok(HttpResponse::Created().json(t))
}

pub async fn list_transactions(
    auth: AuthUser,
    query: web::Query<TransactionFilter>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let f = query.into_inner();
    let (limit, offset) = page_bounds(f.limit, f.offset);

    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM transactions WHERE 1 = 1", Transaction::COLUMNS));
    if let Some(kind) = non_empty(f.kind) {
        let kind: TransactionKind = kind.parse()?;
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(currency) = non_empty(f.currency) {
        qb.push(" AND currency = ").push_bind(currency.to_ascii_uppercase());
    }
    if let Some(customer) = non_empty(f.customer) {
        qb.push(" AND customer_name LIKE ").push_bind(format!("%{}%", customer));
    }
    if let Some(branch) = non_empty(f.branch) {
        qb.push(" AND (branch = ").push_bind(branch.clone())
            .push(" OR counter_branch = ").push_bind(branch)
            .push(")");
    }
    if let Some(from) = non_empty(f.from) {
        qb.push(" AND occurred_on >= ").push_bind(parse_date(&from, "from")?);
    }
    if let Some(to) = non_empty(f.to) {
        qb.push(" AND occurred_on <= ").push_bind(parse_date(&to, "to")?);
    }
    qb.push(" ORDER BY occurred_on DESC, created_at DESC LIMIT ").push_bind(limit)
        .push(" OFFSET ").push_bind(offset);

    let rows = qb.build().fetch_all(&state.pool).await?;
    let transactions = rows.iter().map(Transaction::from_row).collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(json!({
        "transactions": transactions,
        "count": transactions.len(),
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn delete_transaction(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_admin()?;
    let id = path.into_inner();

    let mut tx = state.pool.begin().await?;
    let linked = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM commissions WHERE transaction_id = ?")
        .bind(&id)
        .fetch_one(&mut *tx)
        .await?;
    if linked > 0 {
        return Err(ApiError::conflict("transaction pays a driver commission"));
    }

    let settles = sqlx::query_scalar::<_, Option<String>>("SELECT settles_id FROM transactions WHERE id = ?")
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("transaction"))?;

    sqlx::query("DELETE FROM transactions WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    // a removed settlement reopens its debt
    if let Some(debt_id) = &settles {
        sqlx::query("UPDATE transactions SET settled = 0 WHERE id = ? AND kind = 'debt'")
            .bind(debt_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(transaction_id = %id, reopened = ?settles, by = %auth.id(), "transaction deleted");
    Ok(HttpResponse::Ok().json(json!({ "status": "deleted", "transaction_id": id, "reopened_debt": settles })))
}

pub async fn daily_journal(
    auth: AuthUser,
    query: web::Query<JournalQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let date = match non_empty(query.into_inner().date) {
        Some(d) => parse_date(&d, "date")?,
        None => today(),
    };

    let transactions = journal_rows(&state, &date).await?;
    let totals = journal_totals(&transactions);
    Ok(HttpResponse::Ok().json(json!({
        "date": date,
        "transactions": transactions,
        "totals": totals,
    })))
}

pub(crate) async fn journal_rows(state: &AppState, date: &str) -> Result<Vec<Transaction>, ApiError> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE occurred_on = ? ORDER BY created_at ASC",
        Transaction::COLUMNS
    );
    let rows = sqlx::query(&sql).bind(date).fetch_all(&state.pool).await?;
    rows.iter().map(Transaction::from_row).collect()
}

pub async fn outstanding_debts(auth: AuthUser, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let sql = format!(
        "SELECT {} FROM transactions WHERE kind = 'debt' AND settled = 0 ORDER BY customer_name ASC, occurred_on ASC",
        Transaction::COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await?;
    let debts = rows.iter().map(Transaction::from_row).collect::<Result<Vec<_>, _>>()?;

    let mut grand = CurrencyTotals::new();
    let mut customers: BTreeMap<String, (CurrencyTotals, Vec<Transaction>)> = BTreeMap::new();
    for d in debts {
        grand.add(&d.currency, d.amount);
        let slot = customers.entry(d.customer_name.clone().unwrap_or_default()).or_default();
        slot.0.add(&d.currency, d.amount);
        slot.1.push(d);
    }

    let customers: Vec<_> = customers
        .into_iter()
        .map(|(name, (totals, debts))| json!({
            "customer_name": name,
            "count": debts.len(),
            "totals": totals,
            "debts": debts,
        }))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "customers": customers, "totals": grand })))
}

pub async fn settle_debt(
    auth: AuthUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let id = path.into_inner();

    let mut tx = state.pool.begin().await?;
    let sql = format!("SELECT {} FROM transactions WHERE id = ?", Transaction::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ApiError::NotFound("debt"))?;
    let mut debt = Transaction::from_row(&row)?;

    if debt.kind != TransactionKind::Debt {
        return Err(ApiError::validation("only debts can be settled"));
    }
    if debt.settled {
        return Err(ApiError::conflict("debt already settled"));
    }

    let income = Transaction {
        id: Uuid::new_v4().to_string(),
        kind: TransactionKind::Income,
        amount: debt.amount,
        currency: debt.currency.clone(),
        customer_name: debt.customer_name.clone(),
        branch: debt.branch.clone(),
        counter_branch: None,
        description: Some(match &debt.description {
            Some(d) => format!("Debt settlement: {}", d),
            None => "Debt settlement".to_string(),
        }),
        settled: false,
        occurred_on: today(),
        created_by: Some(auth.id().to_string()),
        created_at: now_rfc3339(),
    };

    sqlx::query("UPDATE transactions SET settled = 1 WHERE id = ?")
        .bind(&debt.id)
        .execute(&mut *tx)
        .await?;
    insert_transaction(&mut *tx, &income).await?;
    sqlx::query("UPDATE transactions SET settles_id = ? WHERE id = ?")
        .bind(&debt.id)
        .bind(&income.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    debt.settled = true;
    tracing::info!(debt_id = %debt.id, income_id = %income.id, "debt settled");
    Ok(HttpResponse::Ok().json(json!({ "debt": debt, "income": income })))
}

pub async fn branch_balances(auth: AuthUser, state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let sql = format!(
        "SELECT {} FROM transactions WHERE branch IS NOT NULL OR counter_branch IS NOT NULL",
        Transaction::COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await?;
    let transactions = rows.iter().map(Transaction::from_row).collect::<Result<Vec<_>, _>>()?;

    let branches: Vec<_> = branch_totals(&transactions)
        .into_iter()
        .map(|(branch, balance)| json!({ "branch": branch, "balance": balance }))
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "branches": branches })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(kind: TransactionKind, amount: f64, currency: &str, branch: Option<&str>, to: Option<&str>) -> Transaction {
        Transaction {
            id: Uuid::new_v4().to_string(),
            kind,
            amount,
            currency: currency.to_string(),
            customer_name: None,
            branch: branch.map(str::to_string),
            counter_branch: to.map(str::to_string),
            description: None,
            settled: false,
            occurred_on: "2026-03-01".to_string(),
            created_by: None,
            created_at: now_rfc3339(),
        }
    }

    #[test]
    fn journal_nets_income_against_expense_only() {
        let rows = vec![
            tx(TransactionKind::Income, 100.0, "USD", None, None),
            tx(TransactionKind::Expense, 30.5, "USD", None, None),
            tx(TransactionKind::Expense, 5000.0, "IQD", None, None),
            tx(TransactionKind::Transfer, 40.0, "USD", Some("A"), Some("B")),
            tx(TransactionKind::Debt, 70.0, "USD", None, None),
        ];
        let totals = journal_totals(&rows);
        assert_eq!(totals["USD"], JournalTotals { income: 100.0, expense: 30.5, net: 69.5 });
        assert_eq!(totals["IQD"], JournalTotals { income: 0.0, expense: 5000.0, net: -5000.0 });
    }

    #[test]
    fn transfers_move_money_between_branches() {
        let rows = vec![
            tx(TransactionKind::Income, 100.0, "USD", Some("Baghdad"), None),
            tx(TransactionKind::Expense, 20.0, "USD", Some("Baghdad"), None),
            tx(TransactionKind::Transfer, 50.0, "USD", Some("Baghdad"), Some("Basra")),
            tx(TransactionKind::Debt, 999.0, "USD", Some("Basra"), None),
        ];
        let balances = branch_totals(&rows);
        assert_eq!(balances["Baghdad"].get("USD"), 30.0);
        assert_eq!(balances["Basra"].get("USD"), 50.0);
    }

    #[test]
    fn validates_kind_specific_fields() {
        let base = CreateTransactionRequest {
            kind: TransactionKind::Transfer,
            amount: 10.0,
            currency: None,
            customer_name: None,
            branch: Some("Baghdad".into()),
            counter_branch: Some("baghdad".into()),
            description: None,
            occurred_on: None,
        };
        assert!(build_transaction(base.clone(), "u").is_err());

        let debt = CreateTransactionRequest { kind: TransactionKind::Debt, ..base.clone() };
        assert!(build_transaction(debt, "u").is_err());

        let zero = CreateTransactionRequest { kind: TransactionKind::Income, amount: 0.0, ..base.clone() };
        assert!(build_transaction(zero, "u").is_err());

        let income = CreateTransactionRequest { kind: TransactionKind::Income, ..base };
        let t = build_transaction(income, "u").unwrap();
        assert_eq!(t.currency, "USD");
        assert_eq!(t.counter_branch, None);
        assert_eq!(t.occurred_on, today());
    }
}
