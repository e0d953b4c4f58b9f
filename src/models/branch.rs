use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[derive(Debug, Serialize, Clone)]
pub struct BranchEntry {
    pub id: String,
    pub branch: String,
    pub source: Option<String>,
    pub received_on: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

impl BranchEntry {
    pub fn from_row(r: &SqliteRow) -> Self {
        BranchEntry {
            id: r.get::<String, _>("id"),
            branch: r.get::<String, _>("branch"),
            source: r.try_get::<Option<String>, _>("source").unwrap_or(None),
            received_on: r.get::<String, _>("received_on"),
            notes: r.try_get::<Option<String>, _>("notes").unwrap_or(None),
            created_by: r.try_get::<Option<String>, _>("created_by").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct BranchEntryItem {
    pub id: String,
    pub entry_id: String,
    pub description: String,
    pub unit: Option<String>,
    pub quantity: i64,
    pub dispatched_quantity: i64,
    pub remaining_quantity: i64,
}

impl BranchEntryItem {
    pub fn from_row(r: &SqliteRow) -> Self {
        let quantity = r.get::<i64, _>("quantity");
        let dispatched_quantity = r.get::<i64, _>("dispatched_quantity");
        BranchEntryItem {
            id: r.get::<String, _>("id"),
            entry_id: r.get::<String, _>("entry_id"),
            description: r.get::<String, _>("description"),
            unit: r.try_get::<Option<String>, _>("unit").unwrap_or(None),
            quantity,
            dispatched_quantity,
            remaining_quantity: (quantity - dispatched_quantity).max(0),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct DispatchRecord {
    pub id: String,
    pub entry_id: String,
    pub item_id: String,
    pub trip_id: String,
    pub quantity: i64,
    pub dispatched_by: Option<String>,
    pub dispatched_at: String,
}

impl DispatchRecord {
    pub fn from_row(r: &SqliteRow) -> Self {
        DispatchRecord {
            id: r.get::<String, _>("id"),
            entry_id: r.get::<String, _>("entry_id"),
            item_id: r.get::<String, _>("item_id"),
            trip_id: r.get::<String, _>("trip_id"),
            quantity: r.get::<i64, _>("quantity"),
            dispatched_by: r.try_get::<Option<String>, _>("dispatched_by").unwrap_or(None),
            dispatched_at: r.get::<String, _>("dispatched_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Partial,
    Dispatched,
}

impl EntryStatus {
    pub fn from_totals(total: i64, dispatched: i64) -> Self {
        if dispatched <= 0 {
            EntryStatus::Pending
        } else if dispatched < total {
            EntryStatus::Partial
        } else {
            EntryStatus::Dispatched
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewEntryItem {
    pub description: String,
    pub unit: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateEntryRequest {
    pub branch: String,
    pub source: Option<String>,
    pub received_on: Option<String>,
    pub notes: Option<String>,
    pub items: Vec<NewEntryItem>,
}

#[derive(Debug, Deserialize, Default)]
pub struct EntryFilter {
    pub branch: Option<String>,
    pub pending_only: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchItemRequest {
    pub item_id: String,
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDispatchRequest {
    pub trip_id: String,
    #[serde(default)]
    pub items: Vec<DispatchItemRequest>,
    #[serde(default)]
    pub entry_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_status_from_totals() {
        assert_eq!(EntryStatus::from_totals(10, 0), EntryStatus::Pending);
        assert_eq!(EntryStatus::from_totals(10, 4), EntryStatus::Partial);
        assert_eq!(EntryStatus::from_totals(10, 10), EntryStatus::Dispatched);
    }
}
