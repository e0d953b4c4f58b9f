use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Employee,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Employee => "employee",
            Role::Customer => "customer",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Employee)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "employee" => Ok(Role::Employee),
            "customer" => Ok(Role::Customer),
            other => Err(ApiError::validation(format!("unknown role '{}'", other))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role: Role,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub branch: Option<String>,
    pub created_at: String,
}

impl User {
    pub const COLUMNS: &'static str = "id, email, password, role, full_name, phone, branch, created_at";

    pub fn from_row(r: &SqliteRow) -> Result<Self, ApiError> {
        Ok(User {
            id: r.get::<String, _>("id"),
            email: r.get::<String, _>("email"),
            password: r.get::<String, _>("password"),
            role: r.get::<String, _>("role").parse()?,
            full_name: r.try_get::<Option<String>, _>("full_name").unwrap_or(None),
            phone: r.try_get::<Option<String>, _>("phone").unwrap_or(None),
            branch: r.try_get::<Option<String>, _>("branch").unwrap_or(None),
            created_at: r.get::<String, _>("created_at"),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}
