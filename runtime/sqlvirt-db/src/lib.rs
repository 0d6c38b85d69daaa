//! SQL statement virtualization over an HTTP stub service.
//!
//! Prepared-statement executions are forwarded to a stub endpoint as
//! `POST <url>` with the SQL as body and one header per bound parameter. The
//! reply is a hit (decoded into the shape the caller expects), a declared
//! database error, or a miss that falls through to the real statement. Live
//! row results seen on a miss can be recorded as stub definitions.

pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod mock;
pub mod pool;
pub mod recorder;
pub mod rowset;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod transport;
pub mod types;
pub mod value;
pub mod virtualize;
pub mod xml;

pub use config::VirtualizationConfig;
pub use descriptor::{ConnectionContext, StatementDescriptor};
pub use dispatch::{BatchCounts, Dispatcher, ExpectedResult, StubResponse, UpdateCount};
pub use driver::{Connection, DataSource, Execution, Statement};
pub use error::{AcquireError, Error, ProtocolError, Result, SqlError};
pub use mock::{MockConnection, MockDataSource, MockStatement};
pub use pool::{Pool, Pooled};
pub use recorder::{Recorder, SlotCounter, StubDefinition};
pub use rowset::{RowSet, RowSetCodec};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConn, SqliteDataSource, SqliteOpenMode, SqliteStatement, sqlite_pool};
pub use transport::{HttpTransport, StubReply, StubRequest, StubTransport};
pub use types::{TypeMapping, TypeRegistry};
pub use value::{Value, ValueKind};
pub use virtualize::{ServiceVirtualizer, VirtualConnection, VirtualDataSource, VirtualStatement};
