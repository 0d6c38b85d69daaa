//! A target with no database behind it.
//!
//! Used when every statement a test runs is expected to be answered by the
//! stub service. Reaching the target at all means a stub is missing.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::driver::{Connection, DataSource, Execution, Statement};
use crate::error::{Error, Result};
use crate::rowset::RowSet;
use crate::value::Value;

#[derive(Debug, Default)]
struct Ledger {
    prepared: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct MockDataSource {
    ledger: Arc<Ledger>,
}

impl MockDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL of every statement prepared on any of its connections.
    pub fn prepared(&self) -> Vec<String> {
        self.ledger.prepared.lock().clone()
    }

    /// SQL of every execution that reached the mock.
    pub fn executed(&self) -> Vec<String> {
        self.ledger.executed.lock().clone()
    }
}

impl DataSource for MockDataSource {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection> {
        Ok(MockConnection {
            ledger: Arc::clone(&self.ledger),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockConnection {
    ledger: Arc<Ledger>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepared(&self) -> Vec<String> {
        self.ledger.prepared.lock().clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.ledger.executed.lock().clone()
    }
}

impl Connection for MockConnection {
    type Statement = MockStatement;

    fn prepare(&self, sql: &str) -> Result<MockStatement> {
        self.ledger.prepared.lock().push(sql.to_string());
        Ok(MockStatement {
            sql: sql.to_string(),
            ledger: Arc::clone(&self.ledger),
        })
    }
}

pub struct MockStatement {
    sql: String,
    ledger: Arc<Ledger>,
}

impl MockStatement {
    fn unmatched<T>(&self) -> Result<T> {
        self.ledger.executed.lock().push(self.sql.clone());
        warn!(sql = %self.sql, "no stub matched and there is no database to fall back to");
        Err(Error::UnmatchedStatement {
            sql: self.sql.clone(),
        })
    }
}

impl Statement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, _position: usize, _value: Value) -> Result<()> {
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<()> {
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self) -> Result<Execution> {
        self.unmatched()
    }

    fn execute_query(&mut self) -> Result<RowSet> {
        self.unmatched()
    }

    fn execute_update(&mut self) -> Result<i32> {
        self.unmatched()
    }

    fn execute_batch(&mut self) -> Result<Vec<i32>> {
        self.unmatched()
    }
}
