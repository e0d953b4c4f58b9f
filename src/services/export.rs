use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rust_xlsxwriter::{Format, Workbook};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Cell, ExportFormat, FileAttachment, TableSpec};

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const CSV_MIME: &str = "text/csv; charset=utf-8";

/// Exports up to this size are inlined as base64 next to the download link.
const INLINE_LIMIT: usize = 1024 * 1024;

pub fn render_xlsx(sheet_name: &str, table: &TableSpec) -> Result<Vec<u8>, ApiError> {
    let mut wb = Workbook::new();
    let header = Format::new().set_bold();
    let ws = wb.add_worksheet();
    ws.set_name(sheet_name)?;

    for (c, h) in table.headers.iter().enumerate() {
        ws.write_string_with_format(0, c as u16, h, &header)?;
        ws.set_column_width(c as u16, (h.chars().count().max(12) + 2) as f64)?;
    }
    for (r, row) in table.rows.iter().enumerate() {
        let r = (r as u32) + 1;
        for (c, cell) in row.iter().enumerate() {
            match cell {
                Cell::Text(v) => ws.write_string(r, c as u16, v)?,
                Cell::Number(v) => ws.write_number(r, c as u16, *v)?,
            };
        }
    }

    Ok(wb.save_to_buffer()?)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(table: &TableSpec) -> Vec<u8> {
    let mut s = String::new();
    s.push_str(&table.headers.iter().map(|h| csv_field(h)).collect::<Vec<_>>().join(","));
    s.push_str("\r\n");
    for row in &table.rows {
        let fields: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                Cell::Text(v) => csv_field(v),
                Cell::Number(v) => v.to_string(),
            })
            .collect();
        s.push_str(&fields.join(","));
        s.push_str("\r\n");
    }
    s.into_bytes()
}

/// Renders `table` in `format`, persists it in `files` and returns the attachment.
pub async fn generate_file_and_store(
    pool: &SqlitePool,
    base_name: &str,
    format: ExportFormat,
    table: &TableSpec,
) -> Result<FileAttachment, ApiError> {
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let (filename, mime, bytes) = match format {
        ExportFormat::Xlsx => (
            format!("{}-{}.xlsx", base_name, stamp),
            XLSX_MIME,
            render_xlsx(base_name, table)?,
        ),
        ExportFormat::Csv => (
            format!("{}-{}.csv", base_name, stamp),
            CSV_MIME,
            render_csv(table),
        ),
    };

    let size = bytes.len();
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO files (id, filename, mime, size, bytes, created_at) VALUES (?, ?, ?, ?, ?, ?)"
    )
    .bind(&id)
    .bind(&filename)
    .bind(mime)
    .bind(size as i64)
    .bind(&bytes)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    let content_base64 = if size <= INLINE_LIMIT {
        Some(B64.encode(&bytes))
    } else {
        None
    };
    let download_url = Some(format!("/api/files/{}", id));

    Ok(FileAttachment {
        id: Some(id),
        filename,
        mime: mime.to_string(),
        size,
        content_base64,
        download_url,
    })
}
