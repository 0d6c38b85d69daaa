//! The statement-execution interface shared by real, mock and virtualized
//! targets.

use crate::error::Result;
use crate::rowset::RowSet;
use crate::value::Value;

/// Result of a generic `execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Rows(RowSet),
    UpdateCount(i32),
}

impl Execution {
    pub fn rows(&self) -> Option<&RowSet> {
        match self {
            Execution::Rows(rows) => Some(rows),
            Execution::UpdateCount(_) => None,
        }
    }

    pub fn into_rows(self) -> Option<RowSet> {
        match self {
            Execution::Rows(rows) => Some(rows),
            Execution::UpdateCount(_) => None,
        }
    }

    pub fn update_count(&self) -> Option<i32> {
        match self {
            Execution::UpdateCount(count) => Some(*count),
            Execution::Rows(_) => None,
        }
    }
}

/// A prepared statement. Bindings survive executions until rebound or
/// cleared. A handle is driven from one thread at a time.
pub trait Statement: Send {
    fn sql(&self) -> &str;

    /// Binds at a 1-based position.
    fn bind(&mut self, position: usize, value: Value) -> Result<()>;

    fn clear_parameters(&mut self) -> Result<()>;

    /// Queues the current bindings as one batch entry.
    fn add_batch(&mut self) -> Result<()>;

    fn execute(&mut self) -> Result<Execution>;

    fn execute_query(&mut self) -> Result<RowSet>;

    fn execute_update(&mut self) -> Result<i32>;

    fn execute_batch(&mut self) -> Result<Vec<i32>>;
}

/// A connection that may be shared between threads.
pub trait Connection: Send + Sync {
    type Statement: Statement;

    fn prepare(&self, sql: &str) -> Result<Self::Statement>;
}

pub trait DataSource: Send + Sync {
    type Connection: Connection;

    fn connect(&self) -> Result<Self::Connection>;
}
