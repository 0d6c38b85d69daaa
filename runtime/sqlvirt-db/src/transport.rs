//! HTTP round trip to the stub endpoint.

use crate::descriptor::StatementDescriptor;
use crate::error::{Error, Result};

/// One forwarded execution: SQL body plus one header per non-null parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRequest {
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl StubRequest {
    pub fn from_descriptor(descriptor: &StatementDescriptor) -> Self {
        Self {
            body: descriptor.sql().to_string(),
            headers: descriptor
                .header_parameters()
                .into_iter()
                .map(|(position, text)| (position.to_string(), text))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubReply {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends a request to the stub endpoint. Any HTTP status is a reply; only a
/// failure to get a response at all is an error.
pub trait StubTransport: Send + Sync {
    fn send(&self, request: &StubRequest) -> Result<StubReply>;

    fn endpoint(&self) -> &str;
}

/// Blocking HTTP transport. No timeout is applied: a stub that never answers
/// blocks the caller.
pub struct HttpTransport {
    url: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            agent: ureq::AgentBuilder::new().build(),
        }
    }
}

impl StubTransport for HttpTransport {
    fn send(&self, request: &StubRequest) -> Result<StubReply> {
        let mut call = self.agent.post(&self.url);
        for (name, value) in &request.headers {
            call = call.set(name, value);
        }
        let response = match call.send_string(&request.body) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::Transport {
                    url: self.url.clone(),
                    message: err.to_string(),
                });
            }
        };
        let status = response.status();
        let headers = response
            .headers_names()
            .into_iter()
            .filter_map(|name| {
                let value = response.header(&name)?.to_string();
                Some((name, value))
            })
            .collect();
        let body = response.into_string().map_err(|err| Error::Transport {
            url: self.url.clone(),
            message: format!("failed to read response body: {err}"),
        })?;
        Ok(StubReply {
            status,
            headers,
            body,
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConnectionContext;
    use crate::value::Value;

    #[test]
    fn request_carries_sql_and_non_null_parameters() {
        let mut descriptor = StatementDescriptor::new("SELECT X FROM T WHERE Y=? AND Z=?", ConnectionContext::new());
        descriptor.bind(1, Value::from("Erich")).expect("bind");
        descriptor.bind(2, Value::Null).expect("bind");
        let request = StubRequest::from_descriptor(&descriptor);
        assert_eq!(request.body, "SELECT X FROM T WHERE Y=? AND Z=?");
        assert_eq!(request.headers, vec![("1".to_string(), "Erich".to_string())]);
    }

    #[test]
    fn reply_headers_ignore_case() {
        let reply = StubReply::new(400).with_header("SQLState", "42581");
        assert_eq!(reply.header("sqlstate"), Some("42581"));
        assert_eq!(reply.header("reason"), None);
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let transport = HttpTransport::new(format!("http://{addr}/sqlstub"));
        let err = transport
            .send(&StubRequest {
                body: "SELECT 1".into(),
                headers: Vec::new(),
            })
            .expect_err("nothing listening");
        assert!(matches!(err, Error::Transport { .. }));
        assert!(err.is_fatal());
    }
}
