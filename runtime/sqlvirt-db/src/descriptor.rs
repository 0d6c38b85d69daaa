//! Per-statement record of SQL text and parameter bindings.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::error::{Result, SqlError};
use crate::value::Value;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical connection, shared by every statement prepared on
/// it. Preparation and dispatch are each serialized per context.
#[derive(Debug)]
pub struct ConnectionContext {
    id: u64,
    prepare: Mutex<()>,
    dispatch: Mutex<()>,
}

impl ConnectionContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            prepare: Mutex::new(()),
            dispatch: Mutex::new(()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn lock_prepare(&self) -> MutexGuard<'_, ()> {
        self.prepare.lock()
    }

    pub fn lock_dispatch(&self) -> MutexGuard<'_, ()> {
        self.dispatch.lock()
    }
}

#[derive(Debug, Clone)]
pub struct StatementDescriptor {
    sql: String,
    parameters: BTreeMap<usize, Value>,
    context: Arc<ConnectionContext>,
}

impl StatementDescriptor {
    pub fn new(sql: impl Into<String>, context: Arc<ConnectionContext>) -> Self {
        Self {
            sql: sql.into(),
            parameters: BTreeMap::new(),
            context,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    /// Binds `value` at 1-based `position`, replacing any earlier binding.
    pub fn bind(&mut self, position: usize, value: Value) -> Result<()> {
        if position == 0 {
            return Err(SqlError::invalid_parameter_index(position).into());
        }
        self.parameters.insert(position, value);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.parameters.clear();
    }

    pub fn parameter(&self, position: usize) -> Option<&Value> {
        self.parameters.get(&position)
    }

    /// All bindings in position order, nulls included.
    pub fn parameters(&self) -> impl Iterator<Item = (usize, &Value)> {
        self.parameters.iter().map(|(position, value)| (*position, value))
    }

    /// `(position, text)` for every non-null binding, in position order.
    /// A null binding produces no header, same as a position never bound.
    pub fn header_parameters(&self) -> Vec<(usize, String)> {
        self.parameters
            .iter()
            .filter_map(|(position, value)| value.text().map(|text| (*position, text)))
            .collect()
    }
}
