//! Decorators that route executions through a [`Dispatcher`].
//!
//! Each wrapper implements the same trait as the target it wraps, so a caller
//! holding a `VirtualConnection` cannot tell it from the real thing. Binding
//! calls are forwarded and captured; execute calls go to the dispatcher, which
//! only reaches the target on a stub miss.

use std::sync::Arc;

use tracing::debug;

use crate::config::VirtualizationConfig;
use crate::descriptor::{ConnectionContext, StatementDescriptor};
use crate::dispatch::Dispatcher;
use crate::driver::{Connection, DataSource, Execution, Statement};
use crate::error::{Result, SqlError};
use crate::mock::MockDataSource;
use crate::rowset::RowSet;
use crate::value::Value;

/// Entry point: wraps real data sources or builds a stub-only one.
#[derive(Clone)]
pub struct ServiceVirtualizer {
    dispatcher: Arc<Dispatcher>,
}

impl ServiceVirtualizer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }

    pub fn from_config(config: &VirtualizationConfig) -> Self {
        Self::new(Dispatcher::from_config(config))
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Stub misses run against `target`.
    pub fn spy_on<D: DataSource>(&self, target: D) -> VirtualDataSource<D> {
        VirtualDataSource {
            target,
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    /// No database behind it: every stub miss is an unmatched statement.
    pub fn mock_data_source(&self) -> VirtualDataSource<MockDataSource> {
        self.spy_on(MockDataSource::new())
    }
}

pub struct VirtualDataSource<D> {
    target: D,
    dispatcher: Arc<Dispatcher>,
}

impl<D> VirtualDataSource<D> {
    pub fn target(&self) -> &D {
        &self.target
    }
}

impl<D: DataSource> DataSource for VirtualDataSource<D> {
    type Connection = VirtualConnection<D::Connection>;

    fn connect(&self) -> Result<Self::Connection> {
        let target = self.target.connect()?;
        Ok(VirtualConnection::new(target, Arc::clone(&self.dispatcher)))
    }
}

pub struct VirtualConnection<C> {
    target: C,
    context: Arc<ConnectionContext>,
    dispatcher: Arc<Dispatcher>,
}

impl<C> VirtualConnection<C> {
    pub fn new(target: C, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            target,
            context: ConnectionContext::new(),
            dispatcher,
        }
    }

    pub fn target(&self) -> &C {
        &self.target
    }

    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }
}

impl<C: Connection> Connection for VirtualConnection<C> {
    type Statement = VirtualStatement<C::Statement>;

    fn prepare(&self, sql: &str) -> Result<Self::Statement> {
        let _preparing = self.context.lock_prepare();
        let target = self.target.prepare(sql)?;
        debug!(connection = self.context.id(), sql, "prepared virtualized statement");
        Ok(VirtualStatement {
            target,
            descriptor: StatementDescriptor::new(sql, Arc::clone(&self.context)),
            dispatcher: Arc::clone(&self.dispatcher),
        })
    }
}

pub struct VirtualStatement<S> {
    target: S,
    descriptor: StatementDescriptor,
    dispatcher: Arc<Dispatcher>,
}

impl<S> VirtualStatement<S> {
    pub fn descriptor(&self) -> &StatementDescriptor {
        &self.descriptor
    }

    pub fn target(&self) -> &S {
        &self.target
    }
}

impl<S: Statement> Statement for VirtualStatement<S> {
    fn sql(&self) -> &str {
        self.descriptor.sql()
    }

    fn bind(&mut self, position: usize, value: Value) -> Result<()> {
        if position == 0 {
            return Err(SqlError::invalid_parameter_index(position).into());
        }
        self.target.bind(position, value.clone())?;
        self.descriptor.bind(position, value)
    }

    fn clear_parameters(&mut self) -> Result<()> {
        self.target.clear_parameters()?;
        self.descriptor.clear();
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        self.target.add_batch()
    }

    fn execute(&mut self) -> Result<Execution> {
        self.dispatcher
            .dispatch(&self.descriptor, || self.target.execute())
    }

    fn execute_query(&mut self) -> Result<RowSet> {
        self.dispatcher
            .dispatch(&self.descriptor, || self.target.execute_query())
    }

    fn execute_update(&mut self) -> Result<i32> {
        self.dispatcher
            .dispatch(&self.descriptor, || self.target.execute_update())
    }

    fn execute_batch(&mut self) -> Result<Vec<i32>> {
        self.dispatcher
            .dispatch(&self.descriptor, || self.target.execute_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::{StubReply, StubRequest, StubTransport};

    struct Always(u16, &'static str);

    impl StubTransport for Always {
        fn send(&self, _request: &StubRequest) -> Result<StubReply> {
            Ok(StubReply::new(self.0).with_body(self.1))
        }

        fn endpoint(&self) -> &str {
            "always://"
        }
    }

    #[test]
    fn mock_source_answers_from_the_stub() {
        let virtualizer = ServiceVirtualizer::new(Dispatcher::new(Always(200, "3")));
        let connection = virtualizer.mock_data_source().connect().expect("connect");
        let mut statement = connection.prepare("DELETE FROM T WHERE A=?").expect("prepare");
        statement.bind(1, Value::from("x")).expect("bind");
        assert_eq!(statement.execute_update().expect("update"), 3);
        assert_eq!(connection.target().executed(), Vec::<String>::new());
    }

    #[test]
    fn mock_source_miss_is_unmatched() {
        let virtualizer = ServiceVirtualizer::new(Dispatcher::new(Always(404, "")));
        let source = virtualizer.mock_data_source();
        let connection = source.connect().expect("connect");
        let mut statement = connection.prepare("SELECT 1").expect("prepare");
        let err = statement.execute_query().expect_err("no stub, no database");
        assert!(matches!(err, Error::UnmatchedStatement { ref sql } if sql == "SELECT 1"));
        assert!(err.is_fatal());
        assert_eq!(source.target().executed(), vec!["SELECT 1".to_string()]);
    }

    #[test]
    fn binding_is_captured_and_cleared() {
        let virtualizer = ServiceVirtualizer::new(Dispatcher::new(Always(404, "")));
        let connection = virtualizer.mock_data_source().connect().expect("connect");
        let mut statement = connection.prepare("SELECT ?").expect("prepare");
        statement.bind(1, Value::from(5)).expect("bind");
        assert_eq!(statement.descriptor().parameter(1), Some(&Value::Integer(5)));
        let err = statement.bind(0, Value::from(1)).expect_err("position 0");
        assert_eq!(err.as_sql().expect("sql").sql_state, "07009");
        statement.clear_parameters().expect("clear");
        assert!(statement.descriptor().parameter(1).is_none());
    }

    #[test]
    fn statements_share_their_connection_context() {
        let virtualizer = ServiceVirtualizer::new(Dispatcher::new(Always(404, "")));
        let source = virtualizer.mock_data_source();
        let first = source.connect().expect("connect");
        let second = source.connect().expect("connect");
        let a = first.prepare("SELECT 1").expect("prepare");
        let b = first.prepare("SELECT 2").expect("prepare");
        let c = second.prepare("SELECT 3").expect("prepare");
        assert_eq!(a.descriptor().context().id(), b.descriptor().context().id());
        assert_ne!(a.descriptor().context().id(), c.descriptor().context().id());
    }
}
