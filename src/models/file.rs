use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FileAttachment {
    pub id: Option<String>,
    pub filename: String,
    pub mime: String,
    pub size: usize,
    pub content_base64: Option<String>,
    pub download_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Shipments,
    Transactions,
    Journal,
    Commissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub report: ReportKind,
    #[serde(default)]
    pub format: ExportFormat,
    /// Day for the journal report, `YYYY-MM-DD`; today when omitted.
    pub date: Option<String>,
}

/// A rectangular table ready to be written as a spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Cell::Text(v)
    }
}

impl From<Option<String>> for Cell {
    fn from(v: Option<String>) -> Self {
        Cell::Text(v.unwrap_or_default())
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Number(v)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Number(v as f64)
    }
}
