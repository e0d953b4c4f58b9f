use actix_web::{web, HttpRequest, HttpResponse};
use sqlx::Row;

use crate::error::ApiError;
use crate::handlers::auth::AuthUser;
use crate::handlers::finance::{journal_rows, journal_totals};
use crate::i18n::{self, column_label, Locale};
use crate::models::{Cell, ExportRequest, ReportKind, Shipment, TableSpec, Transaction};
use crate::services::export::generate_file_and_store;
use crate::state::AppState;
use crate::util::{non_empty, parse_date, today};

const SHIPMENT_COLUMNS: &[&str] = &[
    "tracking_number", "sender", "recipient", "recipient_phone", "governorate", "weight_kg",
    "shipping_fee", "cod_amount", "currency", "status", "created_at",
];
const TRANSACTION_COLUMNS: &[&str] =
    &["date", "kind", "amount", "currency", "customer", "branch", "counter_branch", "description"];
const COMMISSION_COLUMNS: &[&str] =
    &["driver", "trip", "station", "currency", "collected", "rate", "commission", "paid"];

fn headers(locale: Locale, columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| column_label(locale, c).to_string()).collect()
}

fn transaction_row(t: Transaction) -> Vec<Cell> {
    vec![
        t.occurred_on.into(),
        t.kind.as_str().into(),
        t.amount.into(),
        t.currency.into(),
        t.customer_name.into(),
        t.branch.into(),
        t.counter_branch.into(),
        t.description.into(),
    ]
}

async fn shipments_table(state: &AppState, locale: Locale) -> Result<TableSpec, ApiError> {
    let sql = format!("SELECT {} FROM shipments ORDER BY created_at DESC", Shipment::COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await?;

    let mut table = TableSpec { headers: headers(locale, SHIPMENT_COLUMNS), rows: Vec::with_capacity(rows.len()) };
    for r in &rows {
        let s = Shipment::from_row(r)?;
        table.rows.push(vec![
            s.tracking_number.into(),
            s.sender_name.into(),
            s.recipient_name.into(),
            s.recipient_phone.into(),
            s.governorate.into(),
            s.weight_kg.into(),
            s.shipping_fee.into(),
            s.cod_amount.into(),
            s.currency.into(),
            s.status.label(locale).into(),
            s.created_at.into(),
        ]);
    }
    Ok(table)
}

async fn transactions_table(state: &AppState, locale: Locale) -> Result<TableSpec, ApiError> {
    let sql = format!(
        "SELECT {} FROM transactions ORDER BY occurred_on DESC, created_at DESC",
        Transaction::COLUMNS
    );
    let rows = sqlx::query(&sql).fetch_all(&state.pool).await?;
    let rows = rows
        .iter()
        .map(|r| Transaction::from_row(r).map(transaction_row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TableSpec { headers: headers(locale, TRANSACTION_COLUMNS), rows })
}

/// The day's ledger rows followed by income, expense and net per currency.
async fn journal_table(state: &AppState, locale: Locale, date: &str) -> Result<TableSpec, ApiError> {
    let transactions = journal_rows(state, date).await?;
    let totals = journal_totals(&transactions);

    let mut rows: Vec<Vec<Cell>> = transactions.into_iter().map(transaction_row).collect();
    for (currency, t) in totals {
        for (label, amount) in [("income", t.income), ("expense", t.expense), ("net", t.net)] {
            rows.push(vec![
                date.into(),
                label.into(),
                amount.into(),
                currency.as_str().into(),
                Cell::from(""),
                Cell::from(""),
                Cell::from(""),
                Cell::from(""),
            ]);
        }
    }
    Ok(TableSpec { headers: headers(locale, TRANSACTION_COLUMNS), rows })
}

async fn commissions_table(state: &AppState, locale: Locale) -> Result<TableSpec, ApiError> {
    let rows = sqlx::query(
        "SELECT c.driver_name, t.trip_number, c.station, c.currency, c.collected, c.rate, c.amount, c.paid \
         FROM commissions c JOIN trips t ON t.id = c.trip_id \
         ORDER BY c.driver_name ASC, c.created_at ASC"
    )
    .fetch_all(&state.pool)
    .await?;

    let (yes, no) = match locale {
        Locale::Ar => ("نعم", "لا"),
        Locale::En => ("yes", "no"),
    };
    let rows: Vec<Vec<Cell>> = rows
        .iter()
        .map(|r| {
            vec![
                r.get::<String, _>("driver_name").into(),
                r.get::<String, _>("trip_number").into(),
                r.get::<String, _>("station").into(),
                r.get::<String, _>("currency").into(),
                r.get::<f64, _>("collected").into(),
                r.get::<f64, _>("rate").into(),
                r.get::<f64, _>("amount").into(),
                Cell::from(if r.get::<i64, _>("paid") != 0 { yes } else { no }),
            ]
        })
        .collect();
    Ok(TableSpec { headers: headers(locale, COMMISSION_COLUMNS), rows })
}

pub async fn export(
    req: HttpRequest,
    auth: AuthUser,
    body: web::Json<ExportRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.require_staff()?;
    let b = body.into_inner();
    let locale = i18n::detect_locale(&req);

    let (base_name, table) = match b.report {
        ReportKind::Shipments => ("shipments".to_string(), shipments_table(&state, locale).await?),
        ReportKind::Transactions => ("transactions".to_string(), transactions_table(&state, locale).await?),
        ReportKind::Journal => {
            let date = match non_empty(b.date) {
                Some(d) => parse_date(&d, "date")?,
                None => today(),
            };
            (format!("journal-{}", date), journal_table(&state, locale, &date).await?)
        }
        ReportKind::Commissions => ("commissions".to_string(), commissions_table(&state, locale).await?),
    };

    let file = generate_file_and_store(&state.pool, &base_name, b.format, &table).await?;
    tracing::info!(report = %base_name, rows = table.rows.len(), size = file.size, "report exported");
    Ok(HttpResponse::Ok().json(file))
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};

    use crate::handlers::{self, testing};

    #[actix_web::test]
    async fn csv_export_is_downloadable() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "ops@example.com", "employee").await;
        testing::seed_shipment(&state, "Basra", 12.5, "USD").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/reports/export")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "report": "shipments", "format": "csv" }))
            .to_request();
        let file: Value = test::call_and_read_body_json(&app, req).await;
        assert!(file["filename"].as_str().unwrap().ends_with(".csv"));
        assert!(file["content_base64"].is_string());
        let url = file["download_url"].as_str().unwrap().to_string();

        let req = test::TestRequest::get().uri(&url).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri(&url).insert_header(testing::bearer(&token)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let disposition = resp.headers().get("Content-Disposition").unwrap().to_str().unwrap().to_string();
        assert!(disposition.starts_with("attachment"));
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Tracking number,Sender,Recipient"));
        assert!(text.contains(",12.5,0,USD,Pending,"));
    }

    #[actix_web::test]
    async fn journal_export_uses_arabic_headers() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "ops@example.com", "employee").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/finance/transactions")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "kind": "income", "amount": 50.0, "occurred_on": "2026-01-15" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/reports/export")
            .insert_header(testing::bearer(&token))
            .insert_header(("Accept-Language", "ar"))
            .set_json(json!({ "report": "journal", "format": "csv", "date": "2026-01-15" }))
            .to_request();
        let file: Value = test::call_and_read_body_json(&app, req).await;
        assert!(file["filename"].as_str().unwrap().starts_with("journal-2026-01-15-"));

        let req = test::TestRequest::get()
            .uri(file["download_url"].as_str().unwrap())
            .insert_header(testing::bearer(&token))
            .to_request();
        let text = String::from_utf8(test::call_and_read_body(&app, req).await.to_vec()).unwrap();
        assert!(text.starts_with("التاريخ,النوع,المبلغ"));
        assert!(text.contains("2026-01-15,net,50,USD"));
    }

    #[actix_web::test]
    async fn xlsx_is_the_default_and_unknown_reports_fail() {
        let state = testing::state().await;
        let token = testing::login_as(&state, "ops@example.com", "employee").await;
        let app = test::init_service(App::new().app_data(state.clone()).configure(handlers::configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/reports/export")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "report": "commissions" }))
            .to_request();
        let file: Value = test::call_and_read_body_json(&app, req).await;
        assert!(file["filename"].as_str().unwrap().ends_with(".xlsx"));

        let req = test::TestRequest::post()
            .uri("/api/reports/export")
            .insert_header(testing::bearer(&token))
            .set_json(json!({ "report": "payroll" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
