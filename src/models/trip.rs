use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::ApiError;
use crate::i18n::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum TripStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl TripStatus {
    pub const ALL: [TripStatus; 4] = [
        TripStatus::Planned,
        TripStatus::InProgress,
        TripStatus::Completed,
        TripStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Planned => "planned",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::Ar, TripStatus::Planned) => "مخططة",
            (Locale::Ar, TripStatus::InProgress) => "قيد التنفيذ",
            (Locale::Ar, TripStatus::Completed) => "مكتملة",
            (Locale::Ar, TripStatus::Cancelled) => "ملغاة",
            (Locale::En, TripStatus::Planned) => "Planned",
            (Locale::En, TripStatus::InProgress) => "In progress",
            (Locale::En, TripStatus::Completed) => "Completed",
            (Locale::En, TripStatus::Cancelled) => "Cancelled",
        }
    }

    pub fn can_transition_to(&self, next: TripStatus) -> bool {
        use TripStatus::*;
        matches!(
            (self, next),
            (Planned, InProgress) | (InProgress, Completed) | (Planned, Cancelled) | (InProgress, Cancelled)
        )
    }

    /// Planned and in-progress trips still accept cargo.
    pub fn is_open(&self) -> bool {
        matches!(self, TripStatus::Planned | TripStatus::InProgress)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TripStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().replace([' ', '-'], "_").as_str() {
            "planned" | "مخططة" => Ok(TripStatus::Planned),
            "in_progress" | "قيد_التنفيذ" => Ok(TripStatus::InProgress),
            "completed" | "مكتملة" => Ok(TripStatus::Completed),
            "cancelled" | "canceled" | "ملغاة" => Ok(TripStatus::Cancelled),
            _ => Err(ApiError::validation(format!("unknown trip status '{}'", trimmed))),
        }
    }
}

impl TryFrom<String> for TripStatus {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct Trip {
    pub id: String,
    pub trip_number: String,
    pub vehicle: String,
    pub driver_name: String,
    pub destination: String,
    pub status: TripStatus,
    pub fuel_expense: f64,
    pub toll_expense: f64,
    pub other_expense: f64,
    pub expense_currency: String,
    pub notes: Option<String>,
    pub departed_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

impl Trip {
    pub const COLUMNS: &'static str = "id, trip_number, vehicle, driver_name, destination, status, \
        fuel_expense, toll_expense, other_expense, expense_currency, notes, departed_at, completed_at, created_at";

    pub fn from_row(r: &SqliteRow) -> Result<Self, ApiError> {
        Ok(Trip {
            id: r.get::<String, _>("id"),
            trip_number: r.get::<String, _>("trip_number"),
            vehicle: r.get::<String, _>("vehicle"),
            driver_name: r.get::<String, _>("driver_name"),
            destination: r.get::<String, _>("destination"),
            status: r.get::<String, _>("status").parse()?,
            fuel_expense: r.get::<f64, _>("fuel_expense"),
            toll_expense: r.get::<f64, _>("toll_expense"),
            other_expense: r.get::<f64, _>("other_expense"),
            expense_currency: r.get::<String, _>("expense_currency"),
            notes: r.try_get::<Option<String>, _>("notes").unwrap_or(None),
            departed_at: r.try_get::<Option<String>, _>("departed_at").unwrap_or(None),
            completed_at: r.try_get::<Option<String>, _>("completed_at").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
        })
    }

    pub fn total_expenses(&self) -> f64 {
        crate::services::currency::round2(self.fuel_expense + self.toll_expense + self.other_expense)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TripStation {
    pub governorate: String,
    /// Percent of collected shipping fees owed to the driver.
    pub commission_rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTripRequest {
    pub vehicle: String,
    pub driver_name: String,
    pub destination: String,
    #[serde(default)]
    pub stations: Vec<TripStation>,
    #[serde(default)]
    pub shipment_ids: Vec<String>,
    pub fuel_expense: Option<f64>,
    pub toll_expense: Option<f64>,
    pub other_expense: Option<f64>,
    pub expense_currency: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TripStatusRequest {
    pub status: TripStatus,
}

#[derive(Debug, Deserialize, Default)]
pub struct TripExpensesRequest {
    pub fuel_expense: Option<f64>,
    pub toll_expense: Option<f64>,
    pub other_expense: Option<f64>,
    pub expense_currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignShipmentsRequest {
    pub shipment_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TripFilter {
    pub status: Option<String>,
    pub driver: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
