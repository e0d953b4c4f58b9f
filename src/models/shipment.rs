use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::ApiError;
use crate::i18n::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ShipmentStatus {
    Pending,
    InWarehouse,
    InTransit,
    Delivered,
    Returned,
    Cancelled,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 6] = [
        ShipmentStatus::Pending,
        ShipmentStatus::InWarehouse,
        ShipmentStatus::InTransit,
        ShipmentStatus::Delivered,
        ShipmentStatus::Returned,
        ShipmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "pending",
            ShipmentStatus::InWarehouse => "in_warehouse",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Returned => "returned",
            ShipmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn label(&self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::Ar, ShipmentStatus::Pending) => "قيد الانتظار",
            (Locale::Ar, ShipmentStatus::InWarehouse) => "في المستودع",
            (Locale::Ar, ShipmentStatus::InTransit) => "قيد التوصيل",
            (Locale::Ar, ShipmentStatus::Delivered) => "تم التسليم",
            (Locale::Ar, ShipmentStatus::Returned) => "مرتجع",
            (Locale::Ar, ShipmentStatus::Cancelled) => "ملغاة",
            (Locale::En, ShipmentStatus::Pending) => "Pending",
            (Locale::En, ShipmentStatus::InWarehouse) => "In warehouse",
            (Locale::En, ShipmentStatus::InTransit) => "In transit",
            (Locale::En, ShipmentStatus::Delivered) => "Delivered",
            (Locale::En, ShipmentStatus::Returned) => "Returned",
            (Locale::En, ShipmentStatus::Cancelled) => "Cancelled",
        }
    }

    pub fn can_transition_to(&self, next: ShipmentStatus) -> bool {
        use ShipmentStatus::*;
        matches!(
            (self, next),
            (Pending, InWarehouse)
                | (Pending, InTransit)
                | (Pending, Cancelled)
                | (InWarehouse, InTransit)
                | (InWarehouse, Pending)
                | (InWarehouse, Cancelled)
                | (InTransit, Delivered)
                | (InTransit, Returned)
                | (InTransit, InWarehouse)
                | (Delivered, Returned)
                | (Returned, InWarehouse)
        )
    }

    /// Whether a shipment in this status may be loaded onto a trip.
    pub fn is_loadable(&self) -> bool {
        matches!(self, ShipmentStatus::Pending | ShipmentStatus::InWarehouse)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed.to_lowercase().replace([' ', '-'], "_");
        match code.as_str() {
            "pending" | "قيد_الانتظار" => return Ok(ShipmentStatus::Pending),
            "in_warehouse" | "في_المستودع" => return Ok(ShipmentStatus::InWarehouse),
            "in_transit" | "قيد_التوصيل" | "في_الطريق" => return Ok(ShipmentStatus::InTransit),
            "delivered" | "تم_التسليم" => return Ok(ShipmentStatus::Delivered),
            "returned" | "مرتجع" | "راجع" => return Ok(ShipmentStatus::Returned),
            "cancelled" | "canceled" | "ملغاة" | "ملغي" => return Ok(ShipmentStatus::Cancelled),
            _ => {}
        }
        Err(ApiError::validation(format!("unknown shipment status '{}'", trimmed)))
    }
}

impl TryFrom<String> for ShipmentStatus {
    type Error = ApiError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Prepaid,
    CashOnDelivery,
    Credit,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Prepaid => "prepaid",
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::Credit => "credit",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "prepaid" => Ok(PaymentMethod::Prepaid),
            "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            "credit" => Ok(PaymentMethod::Credit),
            other => Err(ApiError::Internal(format!("stored payment method '{}' is invalid", other))),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct Shipment {
    pub id: String,
    pub tracking_number: String,
    pub sender_name: String,
    pub sender_phone: Option<String>,
    pub recipient_name: String,
    pub recipient_phone: Option<String>,
    pub recipient_address: Option<String>,
    pub governorate: String,
    pub weight_kg: f64,
    pub pieces: i64,
    pub shipping_fee: f64,
    pub cod_amount: f64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub status: ShipmentStatus,
    pub branch: Option<String>,
    pub trip_id: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Shipment {
    pub const COLUMNS: &'static str = "id, tracking_number, sender_name, sender_phone, recipient_name, \
        recipient_phone, recipient_address, governorate, weight_kg, pieces, shipping_fee, cod_amount, \
        currency, payment_method, status, branch, trip_id, notes, created_by, created_at, updated_at";

    pub fn from_row(r: &SqliteRow) -> Result<Self, ApiError> {
        let status: ShipmentStatus = r
            .get::<String, _>("status")
            .parse()
            .map_err(|e: ApiError| ApiError::Internal(format!("corrupt shipment row: {}", e)))?;

        Ok(Shipment {
            id: r.get::<String, _>("id"),
            tracking_number: r.get::<String, _>("tracking_number"),
            sender_name: r.get::<String, _>("sender_name"),
            sender_phone: r.try_get::<Option<String>, _>("sender_phone").unwrap_or(None),
            recipient_name: r.get::<String, _>("recipient_name"),
            recipient_phone: r.try_get::<Option<String>, _>("recipient_phone").unwrap_or(None),
            recipient_address: r.try_get::<Option<String>, _>("recipient_address").unwrap_or(None),
            governorate: r.get::<String, _>("governorate"),
            weight_kg: r.get::<f64, _>("weight_kg"),
            pieces: r.get::<i64, _>("pieces"),
            shipping_fee: r.get::<f64, _>("shipping_fee"),
            cod_amount: r.get::<f64, _>("cod_amount"),
            currency: r.get::<String, _>("currency"),
            payment_method: r.get::<String, _>("payment_method").parse()?,
            status,
            branch: r.try_get::<Option<String>, _>("branch").unwrap_or(None),
            trip_id: r.try_get::<Option<String>, _>("trip_id").unwrap_or(None),
            notes: r.try_get::<Option<String>, _>("notes").unwrap_or(None),
            created_by: r.try_get::<Option<String>, _>("created_by").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
            updated_at: r.get::<String, _>("updated_at"),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateShipmentRequest {
    pub sender_name: String,
    pub sender_phone: Option<String>,
    pub recipient_name: String,
    pub recipient_phone: Option<String>,
    pub recipient_address: Option<String>,
    pub governorate: String,
    pub weight_kg: Option<f64>,
    pub pieces: Option<i64>,
    pub shipping_fee: Option<f64>,
    pub cod_amount: Option<f64>,
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<ShipmentStatus>,
    pub branch: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateShipmentRequest {
    pub sender_name: Option<String>,
    pub sender_phone: Option<String>,
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub recipient_address: Option<String>,
    pub governorate: Option<String>,
    pub weight_kg: Option<f64>,
    pub pieces: Option<i64>,
    pub shipping_fee: Option<f64>,
    pub cod_amount: Option<f64>,
    pub currency: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub branch: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: ShipmentStatus,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ShipmentFilter {
    pub status: Option<String>,
    pub governorate: Option<String>,
    pub branch: Option<String>,
    pub trip_id: Option<String>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ShipmentEvent {
    pub id: String,
    pub shipment_id: String,
    pub status: ShipmentStatus,
    pub note: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
}

impl ShipmentEvent {
    pub fn from_row(r: &SqliteRow) -> Result<Self, ApiError> {
        Ok(ShipmentEvent {
            id: r.get::<String, _>("id"),
            shipment_id: r.get::<String, _>("shipment_id"),
            status: r.get::<String, _>("status").parse()?,
            note: r.try_get::<Option<String>, _>("note").unwrap_or(None),
            created_by: r.try_get::<Option<String>, _>("created_by").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
        })
    }
}
