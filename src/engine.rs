//! In-process DuckDB instance shared by every upload.
//!
//! The base handle is only used to hand out connections; each query runs on its own
//! clone, which is dropped as soon as the closure returns.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use duckdb::{Connection, Row};

pub struct Engine {
    base: Mutex<Connection>,
}

impl Engine {
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory duckdb")?;
        Ok(Self {
            base: Mutex::new(conn),
        })
    }

    /// Exposes a CSV file as table `name`. Registering the same name again replaces it.
    pub fn register_csv(&self, name: &str, path: &Path) -> anyhow::Result<()> {
        if !is_plain_identifier(name) {
            return Err(anyhow!("invalid table name {name:?}"));
        }
        let path = sql_quote_path(path);
        let sql = format!(
            "CREATE OR REPLACE VIEW \"{name}\" AS SELECT * FROM read_csv_auto('{path}', header=true)"
        );
        self.with_connection(|conn| {
            conn.execute_batch(&sql)
                .with_context(|| format!("register {name}"))?;
            Ok(())
        })?;
        tracing::debug!("registered table {name}");
        Ok(())
    }

    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let conn = {
            let base = self
                .base
                .lock()
                .map_err(|_| anyhow!("duckdb handle poisoned"))?;
            base.try_clone().context("open duckdb connection")?
        };
        let out = f(&conn);
        drop(conn);
        out
    }

    pub fn query_row<T>(
        &self,
        sql: &str,
        map: impl FnOnce(&Row<'_>) -> duckdb::Result<T>,
    ) -> anyhow::Result<T> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let v = stmt.query_row([], map)?;
            Ok(v)
        })
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn sql_quote_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}
