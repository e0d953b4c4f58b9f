use std::env;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,
    pub session_ttl_days: i64,
    pub admin_emails: Vec<String>,
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "sqlite://app.db".to_string(),
            max_connections: 5,
            session_ttl_days: 30,
            admin_emails: Vec::new(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = parse_or(&lookup, "PORT", defaults.port)?;
        let max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", defaults.max_connections)?;
        let session_ttl_days = parse_or(&lookup, "SESSION_TTL_DAYS", defaults.session_ttl_days)?;
        if session_ttl_days <= 0 {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_DAYS",
                value: session_ttl_days.to_string(),
            });
        }

        let bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", defaults.bcrypt_cost)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.database_url);

        let admin_emails = lookup("ADMIN_EMAILS")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_ascii_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            port,
            database_url,
            max_connections,
            session_ttl_days,
            admin_emails,
            bcrypt_cost,
        })
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_ascii_lowercase();
        self.admin_emails.iter().any(|e| *e == email)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url, "sqlite://app.db");
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.session_ttl_days, 30);
        assert!(cfg.admin_emails.is_empty());
        assert_eq!(cfg.bcrypt_cost, bcrypt::DEFAULT_COST);
    }

    #[test]
    fn reads_overrides_and_admin_list() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("PORT", "9000"),
            ("DATABASE_URL", "sqlite::memory:"),
            ("ADMIN_EMAILS", " Boss@Example.com, ,ops@example.com"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_url, "sqlite::memory:");
        assert_eq!(cfg.admin_emails, vec!["boss@example.com", "ops@example.com"]);
        assert!(cfg.is_admin_email("  BOSS@example.com "));
        assert!(!cfg.is_admin_email("clerk@example.com"));
    }

    #[test]
    fn rejects_unparsable_numbers() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
        assert!(Config::from_lookup(lookup_from(&[("SESSION_TTL_DAYS", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("BCRYPT_COST", "3")])).is_err());
    }
}
