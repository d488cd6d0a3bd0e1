use anyhow::{Context, Result};
use rusqlite::Connection;

/// Runs all schema creation and migrations for the unified SQLite database.
pub fn run_all(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    migrate_tables(conn)?;
    create_claim_guards(conn)?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            vendor_slug TEXT NOT NULL,
            remote_id TEXT,
            domain TEXT NOT NULL,
            status TEXT NOT NULL,
            begin_date TEXT,
            end_date TEXT,
            vendor_payload TEXT NOT NULL DEFAULT '{}',
            claim_origin_table TEXT,
            claim_origin_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Legacy order sources. Written by older billing modules, read-only here.
        CREATE TABLE IF NOT EXISTS legacy_a_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            module TEXT,
            remote_id TEXT,
            status TEXT,
            config_data TEXT,
            created_at TEXT
        );

        CREATE TABLE IF NOT EXISTS legacy_b_orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT,
            cert_id TEXT,
            common_name TEXT,
            order_status TEXT,
            valid_from TEXT,
            valid_until TEXT,
            raw_response TEXT,
            created_on TEXT
        );

        CREATE TABLE IF NOT EXISTS products (
            vendor_slug TEXT NOT NULL,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            validation_type TEXT NOT NULL,
            product_type TEXT NOT NULL,
            supports_wildcard INTEGER NOT NULL DEFAULT 0,
            supports_san INTEGER NOT NULL DEFAULT 0,
            max_domains INTEGER NOT NULL DEFAULT 1,
            min_years INTEGER NOT NULL DEFAULT 1,
            max_years INTEGER NOT NULL DEFAULT 1,
            price_table TEXT NOT NULL DEFAULT '{}',
            vendor_extra TEXT NOT NULL DEFAULT '{}',
            synced_at TEXT NOT NULL,
            PRIMARY KEY (vendor_slug, code)
        );

        CREATE TABLE IF NOT EXISTS provider_settings (
            slug TEXT PRIMARY KEY,
            enabled INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn migrate_tables(conn: &Connection) -> Result<()> {
    ensure_columns(conn, "orders", &[
        ("vendor_payload", "ALTER TABLE orders ADD COLUMN vendor_payload TEXT NOT NULL DEFAULT '{}'"),
        ("claim_origin_table", "ALTER TABLE orders ADD COLUMN claim_origin_table TEXT"),
        ("claim_origin_id", "ALTER TABLE orders ADD COLUMN claim_origin_id INTEGER"),
    ])?;
    ensure_columns(conn, "products", &[(
        "vendor_extra",
        "ALTER TABLE products ADD COLUMN vendor_extra TEXT NOT NULL DEFAULT '{}'",
    )])?;
    Ok(())
}

/// At most one canonical row per claim key, and the key never changes once set.
fn create_claim_guards(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_claim_key
            ON orders (claim_origin_table, claim_origin_id)
            WHERE claim_origin_table IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_orders_vendor_remote
            ON orders (vendor_slug, remote_id);

        CREATE TRIGGER IF NOT EXISTS trg_orders_claim_immutable
        BEFORE UPDATE OF claim_origin_table, claim_origin_id ON orders
        WHEN OLD.claim_origin_table IS NOT NEW.claim_origin_table
          OR OLD.claim_origin_id IS NOT NEW.claim_origin_id
        BEGIN
            SELECT RAISE(ABORT, 'claim back-reference is immutable');
        END;
        "#,
    )
    .context("failed to create claim guards")?;
    Ok(())
}

fn ensure_columns(conn: &Connection, table: &str, alters: &[(&str, &str)]) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to introspect table {table}"))?;
    let mut rows = stmt.query([])?;
    let mut existing = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        existing.push(name);
    }

    for (column, alter_sql) in alters {
        if !existing.iter().any(|c| c == column) {
            conn.execute(alter_sql, [])
                .with_context(|| format!("failed to apply migration for {table}.{column}"))?;
        }
    }

    Ok(())
}
