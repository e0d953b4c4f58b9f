use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
    Debt,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Debt => "debt",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "income" => Ok(TransactionKind::Income),
            "expense" => Ok(TransactionKind::Expense),
            "transfer" => Ok(TransactionKind::Transfer),
            "debt" => Ok(TransactionKind::Debt),
            other => Err(ApiError::validation(format!("unknown transaction type '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct Transaction {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub currency: String,
    pub customer_name: Option<String>,
    pub branch: Option<String>,
    pub counter_branch: Option<String>,
    pub description: Option<String>,
    pub settled: bool,
    pub occurred_on: String,
    pub created_by: Option<String>,
    pub created_at: String,
}

impl Transaction {
    pub const COLUMNS: &'static str = "id, kind, amount, currency, customer_name, branch, counter_branch, \
        description, settled, occurred_on, created_by, created_at";

    pub fn from_row(r: &SqliteRow) -> Result<Self, ApiError> {
        Ok(Transaction {
            id: r.get::<String, _>("id"),
            kind: r.get::<String, _>("kind").parse()?,
            amount: r.get::<f64, _>("amount"),
            currency: r.get::<String, _>("currency"),
            customer_name: r.try_get::<Option<String>, _>("customer_name").unwrap_or(None),
            branch: r.try_get::<Option<String>, _>("branch").unwrap_or(None),
            counter_branch: r.try_get::<Option<String>, _>("counter_branch").unwrap_or(None),
            description: r.try_get::<Option<String>, _>("description").unwrap_or(None),
            settled: r.get::<i64, _>("settled") != 0,
            occurred_on: r.get::<String, _>("occurred_on"),
            created_by: r.try_get::<Option<String>, _>("created_by").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateTransactionRequest {
    pub kind: TransactionKind,
    pub amount: f64,
    pub currency: Option<String>,
    pub customer_name: Option<String>,
    pub branch: Option<String>,
    pub counter_branch: Option<String>,
    pub description: Option<String>,
    pub occurred_on: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TransactionFilter {
    pub kind: Option<String>,
    pub currency: Option<String>,
    pub customer: Option<String>,
    pub branch: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct JournalQuery {
    pub date: Option<String>,
}
