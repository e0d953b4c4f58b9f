pub mod user;
pub mod shipment;
pub mod trip;
pub mod branch;
pub mod finance;
pub mod commission;
pub mod file;

use serde::Serialize;

pub use user::{LoginRequest, RegisterRequest, Role, UpdateRoleRequest, User};
pub use shipment::{
    CreateShipmentRequest,
    PaymentMethod,
    Shipment,
    ShipmentEvent,
    ShipmentFilter,
    ShipmentStatus,
    StatusUpdateRequest,
    UpdateShipmentRequest,
};
pub use trip::{
    AssignShipmentsRequest,
    CreateTripRequest,
    Trip,
    TripExpensesRequest,
    TripFilter,
    TripStation,
    TripStatus,
    TripStatusRequest,
};
pub use branch::{
    BranchEntry,
    BranchEntryItem,
    BulkDispatchRequest,
    CreateEntryRequest,
    DispatchRecord,
    EntryFilter,
    EntryStatus,
};
pub use finance::{CreateTransactionRequest, JournalQuery, Transaction, TransactionFilter, TransactionKind};
pub use commission::{Commission, CommissionFilter};
pub use file::{Cell, ExportFormat, ExportRequest, FileAttachment, ReportKind, TableSpec};

/// Wraps a record with the human label of its status in the caller's locale.
#[derive(Debug, Serialize)]
pub struct Labeled<T: Serialize> {
    #[serde(flatten)]
    pub inner: T,
    pub status_label: &'static str,
}

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Clamps client paging input to `(limit, offset)`.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}
