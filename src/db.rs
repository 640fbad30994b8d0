use crate::config::AppConfig;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};
use std::time::Duration;
use tracing::info;

pub type DbPool = DatabaseConnection;

/// Establishes the database connection with pool settings from config.
pub async fn establish_connection(config: &AppConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opts = ConnectOptions::new(config.database_url().to_string());
    opts.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(config.db_connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.db_idle_timeout_secs))
        .acquire_timeout(Duration::from_secs(config.db_acquire_timeout_secs))
        .sqlx_logging(false);

    let db = Database::connect(opts).await?;
    info!("Database connection established");
    Ok(db)
}

/// Idempotent schema bootstrap. The DDL is deliberately portable so the
/// same statements run against Postgres in production and SQLite in tests.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let statements = [
        r#"CREATE TABLE IF NOT EXISTS patients (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT,
            line_user_id TEXT,
            default_shipping_address TEXT,
            default_shipping_city TEXT,
            default_shipping_postal_code TEXT,
            default_shipping_phone TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS herbs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            thai_name TEXT,
            description TEXT,
            stock_quantity INTEGER NOT NULL DEFAULT 0,
            default_price REAL NOT NULL,
            default_currency TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS herb_prices (
            id TEXT PRIMARY KEY,
            herb_id TEXT NOT NULL,
            currency TEXT NOT NULL,
            unit_price REAL NOT NULL,
            cost_per_unit REAL,
            created_at TIMESTAMP NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS recommendations (
            id TEXT PRIMARY KEY,
            practitioner_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            diagnosis TEXT,
            notes TEXT,
            total_cost REAL NOT NULL,
            status TEXT NOT NULL,
            notification_channels TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS recommendation_items (
            id TEXT PRIMARY KEY,
            recommendation_id TEXT NOT NULL,
            herb_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            unit_price REAL NOT NULL,
            currency TEXT NOT NULL,
            dosage_note TEXT,
            created_at TIMESTAMP NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS checkout_tokens (
            token TEXT PRIMARY KEY,
            recommendation_id TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            expires_at TIMESTAMP NOT NULL,
            used_at TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL,
            recommendation_id TEXT NOT NULL,
            patient_id TEXT NOT NULL,
            total_amount REAL NOT NULL,
            currency TEXT NOT NULL,
            exchange_rate REAL,
            payment_method TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            stripe_session_id TEXT,
            stripe_payment_intent_id TEXT,
            status TEXT NOT NULL,
            shipping_address TEXT,
            shipping_city TEXT,
            shipping_postal_code TEXT,
            shipping_phone TEXT,
            tracking_number TEXT,
            courier TEXT,
            paid_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )"#,
        r#"CREATE TABLE IF NOT EXISTS exchange_rates (
            id TEXT PRIMARY KEY,
            currency TEXT NOT NULL,
            rate REAL NOT NULL,
            recorded_at TIMESTAMP NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS reconciliation_tasks (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            task_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            available_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_checkout_tokens_recommendation
            ON checkout_tokens (recommendation_id)"#,
        r#"CREATE INDEX IF NOT EXISTS idx_recommendation_items_recommendation
            ON recommendation_items (recommendation_id)"#,
        r#"CREATE INDEX IF NOT EXISTS idx_herb_prices_herb
            ON herb_prices (herb_id, currency)"#,
        r#"CREATE INDEX IF NOT EXISTS idx_orders_recommendation
            ON orders (recommendation_id)"#,
        r#"CREATE INDEX IF NOT EXISTS idx_reconciliation_tasks_status
            ON reconciliation_tasks (status, available_at)"#,
    ];

    let backend = db.get_database_backend();
    for sql in statements {
        db.execute(Statement::from_string(backend, sql.to_string()))
            .await?;
    }

    info!("Schema bootstrap complete");
    Ok(())
}
