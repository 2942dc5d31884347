//! Database schema creation for the per-wallet ledger tables.

use rusqlite::{Connection, Result};

/// Reduce a wallet address to a table-name-safe suffix.
pub fn address_slug(address: &str) -> String {
    address
        .to_ascii_lowercase()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Create the trade and position tables for one tracked wallet.
pub fn create_tables(conn: &Connection, slug: &str) -> Result<()> {
    // Trades: append-only audit trail plus executor-owned processing state
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS trades_{slug} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_hash TEXT UNIQUE NOT NULL,
                condition_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                side TEXT NOT NULL,
                size REAL NOT NULL,
                price REAL NOT NULL,
                usdc_size REAL NOT NULL,
                title TEXT NOT NULL,
                outcome TEXT NOT NULL,
                outcome_index INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                execution_status TEXT,
                created_at INTEGER NOT NULL
            )"
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE INDEX IF NOT EXISTS idx_trades_{slug}_pending
             ON trades_{slug}(processed, attempt_count, timestamp)"
        ),
        [],
    )?;

    // Positions: latest snapshot per condition, upserted every monitor tick
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS positions_{slug} (
                condition_id TEXT PRIMARY KEY,
                asset TEXT NOT NULL,
                size REAL NOT NULL,
                outcome TEXT NOT NULL,
                outcome_index INTEGER NOT NULL,
                redeemable INTEGER NOT NULL,
                title TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )"
        ),
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_slug_strips_prefix_and_case() {
        assert_eq!(address_slug("0xAbC123"), "abc123");
        assert_eq!(address_slug("abc123"), "abc123");
    }

    #[test]
    fn test_address_slug_drops_non_alphanumeric() {
        assert_eq!(address_slug("0xab-c1;23"), "abc123");
    }

    #[test]
    fn test_create_tables_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn, "abc").unwrap();
        create_tables(&conn, "abc").unwrap();
    }
}
