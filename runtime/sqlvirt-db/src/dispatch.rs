//! Turns one statement execution into a stub round trip and its reply into
//! the caller's result shape.

use tracing::debug;

use crate::config::VirtualizationConfig;
use crate::descriptor::StatementDescriptor;
use crate::driver::Execution;
use crate::error::{ProtocolError, Result, SqlError};
use crate::recorder::Recorder;
use crate::rowset::{RowSet, RowSetCodec};
use crate::transport::{HttpTransport, StubReply, StubRequest, StubTransport};

pub type UpdateCount = i32;
pub type BatchCounts = Vec<i32>;

/// How the stub answered one request.
#[derive(Debug, Clone, PartialEq)]
pub enum StubResponse {
    Hit(String),
    Miss,
    Declared(SqlError),
}

impl StubResponse {
    pub fn from_reply(reply: StubReply) -> Result<Self> {
        match reply.status {
            200 => Ok(StubResponse::Hit(reply.body)),
            400 => {
                let reason = reply.header("reason").ok_or(ProtocolError::MissingReason)?;
                let sql_state = reply.header("sqlstate").unwrap_or_default();
                let vendor_code = match reply.header("vendorcode") {
                    None => 0,
                    Some(raw) => raw
                        .parse::<i32>()
                        .map_err(|_| ProtocolError::InvalidVendorCode(raw.to_string()))?,
                };
                Ok(StubResponse::Declared(SqlError::new(
                    reason,
                    sql_state,
                    vendor_code,
                )))
            }
            _ => Ok(StubResponse::Miss),
        }
    }
}

/// A result shape a stub hit can be decoded into. The implementing type is
/// what the caller expects back from its execute call.
pub trait ExpectedResult: Sized {
    fn from_stub(body: &str, codec: &RowSetCodec) -> Result<Self>;

    /// Row results of a live execution, for recording.
    fn rows_mut(&mut self) -> Option<&mut RowSet> {
        None
    }
}

impl ExpectedResult for RowSet {
    fn from_stub(body: &str, codec: &RowSetCodec) -> Result<Self> {
        codec.decode(body)
    }

    fn rows_mut(&mut self) -> Option<&mut RowSet> {
        Some(self)
    }
}

impl ExpectedResult for UpdateCount {
    fn from_stub(body: &str, _codec: &RowSetCodec) -> Result<Self> {
        parse_count(body)
    }
}

impl ExpectedResult for BatchCounts {
    fn from_stub(body: &str, _codec: &RowSetCodec) -> Result<Self> {
        body.split(',').map(parse_count).collect()
    }
}

/// A generic execute is answered with rows.
impl ExpectedResult for Execution {
    fn from_stub(body: &str, codec: &RowSetCodec) -> Result<Self> {
        codec.decode(body).map(Execution::Rows)
    }

    fn rows_mut(&mut self) -> Option<&mut RowSet> {
        match self {
            Execution::Rows(rows) => Some(rows),
            Execution::UpdateCount(_) => None,
        }
    }
}

fn parse_count(token: &str) -> Result<i32> {
    token.parse::<i32>().map_err(|_| {
        ProtocolError::InvalidUpdateCount {
            token: token.to_string(),
        }
        .into()
    })
}

/// Consults the stub for each execution and falls back to the real target on
/// a miss.
pub struct Dispatcher {
    transport: Box<dyn StubTransport>,
    codec: RowSetCodec,
    recorder: Option<Recorder>,
}

impl Dispatcher {
    pub fn new(transport: impl StubTransport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
            codec: RowSetCodec::default(),
            recorder: None,
        }
    }

    pub fn from_config(config: &VirtualizationConfig) -> Self {
        let codec = RowSetCodec::default().typed(config.typed_recording);
        let mut dispatcher = Self::new(HttpTransport::new(&config.stub_url));
        if let Some(dir) = &config.record_dir {
            dispatcher = dispatcher.with_recorder(
                Recorder::new(dir, codec.clone()).with_url(&config.url_path),
            );
        }
        dispatcher.with_codec(codec)
    }

    /// Codec used to decode stub hits.
    pub fn with_codec(mut self, codec: RowSetCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Resolves an execution: a hit is decoded as `T`, a declared error is
    /// returned as [`Error::Sql`](crate::Error::Sql), and a miss runs `real`.
    /// Row results from `real` are recorded when a recorder is configured.
    pub fn dispatch<T, F>(&self, descriptor: &StatementDescriptor, real: F) -> Result<T>
    where
        T: ExpectedResult,
        F: FnOnce() -> Result<T>,
    {
        let connection = descriptor.context().id();
        let hit = {
            let _dispatching = descriptor.context().lock_dispatch();
            let reply = self.transport.send(&StubRequest::from_descriptor(descriptor))?;
            match StubResponse::from_reply(reply)? {
                StubResponse::Hit(body) => Some(T::from_stub(&body, &self.codec)?),
                StubResponse::Declared(err) => {
                    debug!(connection, sql = descriptor.sql(), outcome = "declared", "stub dispatch");
                    return Err(err.into());
                }
                StubResponse::Miss => None,
            }
        };
        if let Some(result) = hit {
            debug!(connection, sql = descriptor.sql(), outcome = "hit", "stub dispatch");
            return Ok(result);
        }

        debug!(connection, sql = descriptor.sql(), outcome = "miss", "stub dispatch; passing through");
        let mut result = real()?;
        if let (Some(recorder), Some(rows)) = (&self.recorder, result.rows_mut()) {
            recorder.record(descriptor, rows)?;
        }
        Ok(result)
    }
}
