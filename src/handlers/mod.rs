pub mod auth;
pub mod shipments;
pub mod trips;
pub mod branch;
pub mod commissions;
pub mod finance;
pub mod dashboard;
pub mod reports;
pub mod files;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::ApiError;

pub async fn main() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registers every route; shared by `main` and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::validation(err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        ApiError::validation(err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        ApiError::validation(err.to_string()).into()
    }))
    .route("/", web::get().to(main))
    .route("/health", web::get().to(health_check))

    .route("/api/auth/register", web::post().to(auth::register))
    .route("/api/auth/login", web::post().to(auth::login))
    .route("/api/auth/me", web::get().to(auth::me))
    .route("/api/auth/logout", web::post().to(auth::logout))
    .route("/api/users", web::get().to(auth::list_users))
    .route("/api/users/{id}/role", web::put().to(auth::update_role))

    .route("/api/track/{tracking_number}", web::get().to(shipments::track))
    .route("/api/shipments", web::post().to(shipments::create_shipment))
    .route("/api/shipments", web::get().to(shipments::list_shipments))
    .route("/api/shipments/{id}", web::get().to(shipments::get_shipment))
    .route("/api/shipments/{id}", web::put().to(shipments::update_shipment))
    .route("/api/shipments/{id}", web::delete().to(shipments::delete_shipment))
    .route("/api/shipments/{id}/status", web::put().to(shipments::update_status))
    .route("/api/shipments/{id}/events", web::get().to(shipments::shipment_events))

    .route("/api/trips", web::post().to(trips::create_trip))
    .route("/api/trips", web::get().to(trips::list_trips))
    .route("/api/trips/{id}", web::get().to(trips::get_trip))
    .route("/api/trips/{id}", web::delete().to(trips::delete_trip))
    .route("/api/trips/{id}/status", web::put().to(trips::update_trip_status))
    .route("/api/trips/{id}/expenses", web::put().to(trips::update_expenses))
    .route("/api/trips/{id}/shipments", web::post().to(trips::assign_shipments))
    .route("/api/trips/{id}/shipments/{shipment_id}", web::delete().to(trips::remove_shipment))
    .route("/api/trips/{id}/commissions", web::get().to(commissions::preview))
    .route("/api/trips/{id}/commissions", web::post().to(commissions::record))

    .route("/api/branch-entries", web::post().to(branch::create_entry))
    .route("/api/branch-entries", web::get().to(branch::list_entries))
    .route("/api/branch-entries/dispatch", web::post().to(branch::bulk_dispatch))
    .route("/api/branch-entries/{id}", web::get().to(branch::get_entry))
    .route("/api/branch-entries/{id}", web::delete().to(branch::delete_entry))

    .route("/api/commissions", web::get().to(commissions::list_commissions))
    .route("/api/commissions/summary", web::get().to(commissions::summary))
    .route("/api/commissions/{id}/pay", web::post().to(commissions::pay))

    .route("/api/finance/transactions", web::post().to(finance::create_transaction))
    .route("/api/finance/transactions", web::get().to(finance::list_transactions))
    .route("/api/finance/transactions/{id}", web::delete().to(finance::delete_transaction))
    .route("/api/finance/journal", web::get().to(finance::daily_journal))
    .route("/api/finance/debts", web::get().to(finance::outstanding_debts))
    .route("/api/finance/debts/{id}/settle", web::post().to(finance::settle_debt))
    .route("/api/finance/branches", web::get().to(finance::branch_balances))

    .route("/api/dashboard", web::get().to(dashboard::dashboard))
    .route("/api/reports/export", web::post().to(reports::export))
    .route("/api/files/{id}", web::get().to(files::download_file));
}
