//! SQLite as the real statement-execution target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{Connection as RawConnection, OpenFlags};

use crate::driver::{Connection, DataSource, Execution, Statement};
use crate::error::{Error, Result, SqlError};
use crate::pool::{Pool, Pooled};
use crate::rowset::RowSet;
use crate::value::Value;

const BUSY_TIMEOUT_MS: u64 = 100;
const GENERAL_ERROR: &str = "HY000";

#[derive(Clone, Copy, Debug)]
pub enum SqliteOpenMode {
    ReadOnly,
    ReadWrite,
}

/// One sqlite connection, shareable between threads.
#[derive(Clone)]
pub struct SqliteConn {
    conn: Arc<Mutex<RawConnection>>,
}

impl SqliteConn {
    pub fn open(path: &Path, mode: SqliteOpenMode) -> Result<Self> {
        let flags = match mode {
            SqliteOpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            SqliteOpenMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        };
        let conn = RawConnection::open_with_flags(path, flags).map_err(sql_error)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
            .map_err(sql_error)?;
        if matches!(mode, SqliteOpenMode::ReadOnly) {
            conn.pragma_update(None, "query_only", 1).map_err(sql_error)?;
        }
        Ok(Self::wrap(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        RawConnection::open_in_memory()
            .map(Self::wrap)
            .map_err(sql_error)
    }

    fn wrap(conn: RawConnection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs a batch of `;`-separated statements without parameters.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql).map_err(sql_error)
    }
}

impl Connection for SqliteConn {
    type Statement = SqliteStatement;

    /// Compiles once to surface syntax errors at prepare time.
    fn prepare(&self, sql: &str) -> Result<SqliteStatement> {
        let (parameter_count, returns_rows) = {
            let conn = self.conn.lock();
            let statement = conn.prepare(sql).map_err(sql_error)?;
            (statement.parameter_count(), statement.column_count() > 0)
        };
        Ok(SqliteStatement {
            conn: Arc::clone(&self.conn),
            sql: sql.to_string(),
            parameter_count,
            returns_rows,
            parameters: BTreeMap::new(),
            batch: Vec::new(),
        })
    }
}

pub struct SqliteStatement {
    conn: Arc<Mutex<RawConnection>>,
    sql: String,
    parameter_count: usize,
    returns_rows: bool,
    parameters: BTreeMap<usize, Value>,
    batch: Vec<BTreeMap<usize, Value>>,
}

impl SqliteStatement {
    fn run<R>(
        &self,
        parameters: &BTreeMap<usize, Value>,
        body: impl FnOnce(&mut rusqlite::Statement<'_>) -> rusqlite::Result<R>,
    ) -> Result<R> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(&self.sql).map_err(sql_error)?;
        for (position, value) in parameters {
            statement
                .raw_bind_parameter(*position, to_sqlite(value))
                .map_err(sql_error)?;
        }
        body(&mut statement).map_err(sql_error)
    }

    fn query(&self) -> Result<RowSet> {
        self.run(&self.parameters, read_rows)
    }

    fn update(&self, parameters: &BTreeMap<usize, Value>) -> Result<i32> {
        let changed = self.run(parameters, |statement| statement.raw_execute())?;
        Ok(i32::try_from(changed).unwrap_or(i32::MAX))
    }
}

impl Statement for SqliteStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, position: usize, value: Value) -> Result<()> {
        if position == 0 || position > self.parameter_count {
            return Err(SqlError::invalid_parameter_index(position).into());
        }
        self.parameters.insert(position, value);
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<()> {
        self.parameters.clear();
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        self.batch.push(self.parameters.clone());
        Ok(())
    }

    fn execute(&mut self) -> Result<Execution> {
        if self.returns_rows {
            self.query().map(Execution::Rows)
        } else {
            self.update(&self.parameters).map(Execution::UpdateCount)
        }
    }

    fn execute_query(&mut self) -> Result<RowSet> {
        if !self.returns_rows {
            return Err(SqlError::new("statement does not return rows", GENERAL_ERROR, 0).into());
        }
        self.query()
    }

    fn execute_update(&mut self) -> Result<i32> {
        if self.returns_rows {
            return Err(SqlError::new("statement returns rows", GENERAL_ERROR, 0).into());
        }
        self.update(&self.parameters)
    }

    fn execute_batch(&mut self) -> Result<Vec<i32>> {
        let batch = std::mem::take(&mut self.batch);
        batch.iter().map(|parameters| self.update(parameters)).collect()
    }
}

fn read_rows(statement: &mut rusqlite::Statement<'_>) -> rusqlite::Result<RowSet> {
    let columns: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();
    let width = columns.len();
    let mut set = RowSet::new(columns);
    let mut rows = statement.raw_query();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(from_sqlite(row.get_ref(index)?));
        }
        set.push_row(values);
    }
    Ok(set)
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Text(text) => SqliteValue::Text(text.clone()),
        Value::Integer(v) => SqliteValue::Integer(i64::from(*v)),
        Value::Long(v) => SqliteValue::Integer(*v),
        Value::Decimal(v) => SqliteValue::Text(v.to_string()),
        Value::Real(v) => SqliteValue::Real(*v),
        Value::Boolean(v) => SqliteValue::Integer(i64::from(*v)),
        Value::Blob(bytes) => SqliteValue::Blob(bytes.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Long(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(text) => Value::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// sqlite has no SQLSTATE; the extended result code becomes the vendor code.
fn sql_error(err: rusqlite::Error) -> Error {
    let vendor_code = err.sqlite_error().map_or(0, |failure| failure.extended_code);
    SqlError::new(err.to_string(), GENERAL_ERROR, vendor_code).into()
}

pub fn sqlite_pool(path: &Path, pool_size: usize, mode: SqliteOpenMode) -> Arc<Pool<SqliteConn>> {
    let path = path.to_path_buf();
    Pool::new(pool_size, move || {
        SqliteConn::open(&path, mode).map_err(|err| err.to_string())
    })
}

/// Pooled sqlite connections to one database file.
pub struct SqliteDataSource {
    path: PathBuf,
    pool: Arc<Pool<SqliteConn>>,
    acquire_timeout: Option<Duration>,
}

impl SqliteDataSource {
    pub fn new(path: impl Into<PathBuf>, pool_size: usize, mode: SqliteOpenMode) -> Self {
        let path = path.into();
        let pool = sqlite_pool(&path, pool_size, mode);
        Self {
            path,
            pool,
            acquire_timeout: None,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pool(&self) -> &Arc<Pool<SqliteConn>> {
        &self.pool
    }
}

impl DataSource for SqliteDataSource {
    type Connection = Pooled<SqliteConn>;

    fn connect(&self) -> Result<Pooled<SqliteConn>> {
        Ok(self.pool.acquire(self.acquire_timeout)?)
    }
}
