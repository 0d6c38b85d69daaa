//! In-process HTTP stub service for integration tests.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

/// Answers requests whose body and listed headers match exactly.
#[derive(Debug, Clone)]
pub struct Route {
    body: String,
    headers: Vec<(String, String)>,
    status: u16,
    reply_headers: Vec<(String, String)>,
    reply_body: String,
}

impl Route {
    pub fn new(sql: &str) -> Self {
        Self {
            body: sql.to_string(),
            headers: Vec::new(),
            status: 200,
            reply_headers: Vec::new(),
            reply_body: String::new(),
        }
    }

    pub fn with_param(mut self, position: usize, value: &str) -> Self {
        self.headers.push((position.to_string(), value.to_string()));
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn reply_header(mut self, name: &str, value: &str) -> Self {
        self.reply_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn reply(mut self, body: &str) -> Self {
        self.reply_body = body.to_string();
        self
    }

    fn matches(&self, request: &ReceivedRequest) -> bool {
        self.body == request.body
            && self
                .headers
                .iter()
                .all(|(name, value)| request.header(name) == Some(value.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Listens on an ephemeral port until the test process exits. Requests that
/// match no route get a 404.
pub struct StubServer {
    url: String,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl StubServer {
    pub fn start(routes: Vec<Route>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let addr = listener.local_addr().expect("stub server addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let routes = routes.clone();
                let log = Arc::clone(&log);
                thread::spawn(move || serve(stream, &routes, &log));
            }
        });
        Self {
            url: format!("http://{addr}/sqlstub"),
            received,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().clone()
    }
}

fn serve(stream: TcpStream, routes: &[Route], log: &Mutex<Vec<ReceivedRequest>>) {
    let Some(request) = read_request(&stream) else {
        return;
    };
    let route = routes.iter().find(|route| route.matches(&request));
    log.lock().push(request);
    let (status, headers, body) = match route {
        Some(route) => (route.status, route.reply_headers.clone(), route.reply_body.clone()),
        None => (404, Vec::new(), "no stub matched".to_string()),
    };
    let mut response = format!(
        "HTTP/1.1 {status} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        reason_phrase(status),
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(&body);
    let mut stream = stream;
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn read_request(stream: &TcpStream) -> Option<ReceivedRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        let (name, value) = (name.trim().to_string(), value.trim().to_string());
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok()?;
        }
        headers.push((name, value));
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    Some(ReceivedRequest {
        method,
        path,
        headers,
        body: String::from_utf8(body).ok()?,
    })
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}
