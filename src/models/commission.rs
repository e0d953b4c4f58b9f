use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

#[derive(Debug, Serialize, Clone)]
pub struct Commission {
    pub id: String,
    pub trip_id: String,
    pub driver_name: String,
    pub station: String,
    pub currency: String,
    pub shipment_count: i64,
    pub collected: f64,
    pub rate: f64,
    pub amount: f64,
    pub paid: bool,
    pub paid_at: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: String,
}

impl Commission {
    pub const COLUMNS: &'static str = "id, trip_id, driver_name, station, currency, shipment_count, \
        collected, rate, amount, paid, paid_at, transaction_id, created_at";

    pub fn from_row(r: &SqliteRow) -> Self {
        Commission {
            id: r.get::<String, _>("id"),
            trip_id: r.get::<String, _>("trip_id"),
            driver_name: r.get::<String, _>("driver_name"),
            station: r.get::<String, _>("station"),
            currency: r.get::<String, _>("currency"),
            shipment_count: r.get::<i64, _>("shipment_count"),
            collected: r.get::<f64, _>("collected"),
            rate: r.get::<f64, _>("rate"),
            amount: r.get::<f64, _>("amount"),
            paid: r.get::<i64, _>("paid") != 0,
            paid_at: r.try_get::<Option<String>, _>("paid_at").unwrap_or(None),
            transaction_id: r.try_get::<Option<String>, _>("transaction_id").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CommissionFilter {
    pub driver: Option<String>,
    pub paid: Option<bool>,
}
