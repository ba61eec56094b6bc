use super::{QueryEngine, QueryRows};
use crate::errors::TaskError;
use async_trait::async_trait;
use base64::Engine as _;
use rusqlite::{types::ValueRef, Connection, OpenFlags};
use serde_json::Value;
use std::{path::Path, sync::Arc};

/// Relational engines selectable by database file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sqlite,
    DuckDb,
}

impl Engine {
    pub fn for_path(db: &Path) -> Result<Self, TaskError> {
        let ext = db.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("db" | "sqlite" | "sqlite3") => Ok(Engine::Sqlite),
            Some("duckdb" | "ddb") => Ok(Engine::DuckDb),
            _ => Err(TaskError::UnsupportedFormat(format!("no query engine for {}", db.display()))),
        }
    }
}

pub struct SqlEngine;

/// Anything that can stop a statement running on another thread.
trait Interrupt: Send {
    fn interrupt(&self);
}

impl Interrupt for rusqlite::InterruptHandle {
    fn interrupt(&self) { rusqlite::InterruptHandle::interrupt(self) }
}

impl Interrupt for Arc<duckdb::InterruptHandle> {
    fn interrupt(&self) { duckdb::InterruptHandle::interrupt(self) }
}

/// Interrupts the statement still running on the blocking thread if the
/// awaiting task is dropped (timeout or client gone).
struct InterruptOnDrop<H: Interrupt>(Option<H>);

impl<H: Interrupt> Drop for InterruptOnDrop<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.interrupt();
        }
    }
}

/// Runs `work` on a blocking thread, interrupting it through `handle` if the
/// caller stops waiting.
async fn interruptible<H, F>(handle: H, work: F) -> Result<QueryRows, TaskError>
where
    H: Interrupt,
    F: FnOnce() -> Result<QueryRows, TaskError> + Send + 'static,
{
    let mut guard = InterruptOnDrop(Some(handle));
    let rows = tokio::task::spawn_blocking(work).await.map_err(TaskError::internal)??;
    guard.0 = None;
    Ok(rows)
}

#[async_trait]
impl QueryEngine for SqlEngine {
    async fn query(&self, db: &Path, sql: &str) -> Result<QueryRows, TaskError> {
        let engine = Engine::for_path(db)?;
        let sql = sql.to_string();
        match engine {
            Engine::Sqlite => {
                let conn = Connection::open_with_flags(db, OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX)
                    .map_err(|e| TaskError::ExternalService(format!("open {}: {e}", db.display())))?;
                let handle = conn.get_interrupt_handle();
                interruptible(handle, move || run_sqlite(&conn, &sql)).await
            }
            Engine::DuckDb => {
                // duckdb creates missing files on open
                if !db.is_file() {
                    return Err(TaskError::ExternalService(format!("open {}: no such database file", db.display())));
                }
                let conn = duckdb::Connection::open(db)
                    .map_err(|e| TaskError::ExternalService(format!("open {}: {e}", db.display())))?;
                let handle = conn.interrupt_handle();
                interruptible(handle, move || run_duckdb(&conn, &sql)).await
            }
        }
    }
}

fn run_sqlite(conn: &Connection, sql: &str) -> Result<QueryRows, TaskError> {
    let mut stmt = conn.prepare(sql).map_err(TaskError::external)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
    let width = columns.len();
    let mut rows = Vec::new();
    let mut cursor = stmt.query([]).map_err(TaskError::external)?;
    while let Some(row) = cursor.next().map_err(TaskError::external)? {
        let mut out = Vec::with_capacity(width);
        for i in 0..width {
            out.push(to_json(row.get_ref(i).map_err(TaskError::external)?));
        }
        rows.push(out);
    }
    Ok(QueryRows { columns, rows })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}

fn run_duckdb(conn: &duckdb::Connection, sql: &str) -> Result<QueryRows, TaskError> {
    let mut stmt = conn.prepare(sql).map_err(TaskError::external)?;
    let mut cursor = stmt.query([]).map_err(TaskError::external)?;
    // column metadata only exists once the statement has run
    let columns: Vec<String> = cursor.as_ref().map(|s| s.column_names()).unwrap_or_default();
    let width = columns.len();
    let mut rows = Vec::new();
    while let Some(row) = cursor.next().map_err(TaskError::external)? {
        let mut out = Vec::with_capacity(width);
        for i in 0..width {
            out.push(duck_to_json(row.get::<_, duckdb::types::Value>(i).map_err(TaskError::external)?));
        }
        rows.push(out);
    }
    Ok(QueryRows { columns, rows })
}

fn duck_to_json(value: duckdb::types::Value) -> Value {
    use duckdb::types::Value as Duck;
    match value {
        Duck::Null => Value::Null,
        Duck::Boolean(b) => Value::Bool(b),
        Duck::TinyInt(i) => Value::from(i),
        Duck::SmallInt(i) => Value::from(i),
        Duck::Int(i) => Value::from(i),
        Duck::BigInt(i) => Value::from(i),
        Duck::UTinyInt(i) => Value::from(i),
        Duck::USmallInt(i) => Value::from(i),
        Duck::UInt(i) => Value::from(i),
        Duck::UBigInt(i) => Value::from(i),
        Duck::HugeInt(i) => Value::String(i.to_string()),
        Duck::Float(f) => Value::from(f64::from(f)),
        Duck::Double(f) => Value::from(f),
        Duck::Text(t) => Value::String(t),
        Duck::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
        Duck::List(items) => Value::Array(items.into_iter().map(duck_to_json).collect()),
        // dates, decimals, intervals and nested types keep duckdb's own rendering
        other => Value::String(format!("{other:?}")),
    }
}
