use sqlx::{sqlite::{SqlitePoolOptions, SqliteConnectOptions}, SqlitePool};
use std::str::FromStr;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        role TEXT NOT NULL CHECK(role IN ('admin', 'employee', 'customer')),
        full_name TEXT,
        phone TEXT,
        branch TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trips (
        id TEXT PRIMARY KEY,
        trip_number TEXT NOT NULL UNIQUE,
        vehicle TEXT NOT NULL,
        driver_name TEXT NOT NULL,
        destination TEXT NOT NULL,
        status TEXT NOT NULL CHECK(status IN ('planned', 'in_progress', 'completed', 'cancelled')),
        fuel_expense REAL NOT NULL DEFAULT 0,
        toll_expense REAL NOT NULL DEFAULT 0,
        other_expense REAL NOT NULL DEFAULT 0,
        expense_currency TEXT NOT NULL DEFAULT 'USD',
        notes TEXT,
        departed_at TEXT,
        completed_at TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trip_stations (
        trip_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        governorate TEXT NOT NULL,
        commission_rate REAL NOT NULL CHECK(commission_rate >= 0 AND commission_rate <= 100),
        PRIMARY KEY (trip_id, position),
        FOREIGN KEY(trip_id) REFERENCES trips(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS shipments (
        id TEXT PRIMARY KEY,
        tracking_number TEXT NOT NULL UNIQUE,
        sender_name TEXT NOT NULL,
        sender_phone TEXT,
        recipient_name TEXT NOT NULL,
        recipient_phone TEXT,
        recipient_address TEXT,
        governorate TEXT NOT NULL,
        weight_kg REAL NOT NULL DEFAULT 0,
        pieces INTEGER NOT NULL DEFAULT 1,
        shipping_fee REAL NOT NULL DEFAULT 0,
        cod_amount REAL NOT NULL DEFAULT 0,
        currency TEXT NOT NULL DEFAULT 'USD',
        payment_method TEXT NOT NULL CHECK(payment_method IN ('prepaid', 'cash_on_delivery', 'credit')),
        status TEXT NOT NULL,
        branch TEXT,
        trip_id TEXT,
        notes TEXT,
        created_by TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(trip_id) REFERENCES trips(id)
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_shipments_trip ON shipments(trip_id);",
    "CREATE INDEX IF NOT EXISTS idx_shipments_status ON shipments(status);",
    r#"
    CREATE TABLE IF NOT EXISTS shipment_events (
        id TEXT PRIMARY KEY,
        shipment_id TEXT NOT NULL,
        status TEXT NOT NULL,
        note TEXT,
        created_by TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY(shipment_id) REFERENCES shipments(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS branch_entries (
        id TEXT PRIMARY KEY,
        branch TEXT NOT NULL,
        source TEXT,
        received_on TEXT NOT NULL,
        notes TEXT,
        created_by TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS branch_entry_items (
        id TEXT PRIMARY KEY,
        entry_id TEXT NOT NULL,
        description TEXT NOT NULL,
        unit TEXT,
        quantity INTEGER NOT NULL CHECK(quantity > 0),
        dispatched_quantity INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY(entry_id) REFERENCES branch_entries(id) ON DELETE CASCADE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dispatch_history (
        id TEXT PRIMARY KEY,
        entry_id TEXT NOT NULL,
        item_id TEXT NOT NULL,
        trip_id TEXT NOT NULL,
        quantity INTEGER NOT NULL CHECK(quantity > 0),
        dispatched_by TEXT,
        dispatched_at TEXT NOT NULL,
        FOREIGN KEY(item_id) REFERENCES branch_entry_items(id) ON DELETE CASCADE,
        FOREIGN KEY(trip_id) REFERENCES trips(id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL CHECK(kind IN ('income', 'expense', 'transfer', 'debt')),
        amount REAL NOT NULL CHECK(amount > 0),
        currency TEXT NOT NULL DEFAULT 'USD',
        customer_name TEXT,
        branch TEXT,
        counter_branch TEXT,
        description TEXT,
        settled INTEGER NOT NULL DEFAULT 0,
        settles_id TEXT,
        occurred_on TEXT NOT NULL,
        created_by TEXT,
        created_at TEXT NOT NULL
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_day ON transactions(occurred_on);",
    r#"
    CREATE TABLE IF NOT EXISTS commissions (
        id TEXT PRIMARY KEY,
        trip_id TEXT NOT NULL,
        driver_name TEXT NOT NULL,
        station TEXT NOT NULL,
        currency TEXT NOT NULL,
        shipment_count INTEGER NOT NULL,
        collected REAL NOT NULL,
        rate REAL NOT NULL,
        amount REAL NOT NULL,
        paid INTEGER NOT NULL DEFAULT 0,
        paid_at TEXT,
        transaction_id TEXT,
        created_at TEXT NOT NULL,
        FOREIGN KEY(trip_id) REFERENCES trips(id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY,
        filename TEXT NOT NULL,
        mime TEXT NOT NULL,
        size INTEGER NOT NULL,
        bytes BLOB NOT NULL,
        created_at TEXT NOT NULL
    );
    "#,
];

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let connect_opts = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to an in-memory database is a separate database.
    let max_connections = if database_url.contains(":memory:") { 1 } else { max_connections.max(1) };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(connect_opts)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA.iter().copied() {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    init_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}
