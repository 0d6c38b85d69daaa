//! Writes stub definitions derived from live row results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::descriptor::StatementDescriptor;
use crate::error::{Error, Result};
use crate::rowset::{RowSet, RowSetCodec};

pub const DEFAULT_URL_PATH: &str = "/sqlstub";

/// Hands out 1-based slot numbers. A slot is never handed out twice, even if
/// the write using it failed. Share one counter between recorders to make
/// them number into the same space.
#[derive(Debug, Default)]
pub struct SlotCounter {
    issued: AtomicU64,
}

impl SlotCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubDefinition {
    pub request: RequestPattern,
    pub response: ResponseDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPattern {
    pub method: String,
    pub url: String,
    pub body_patterns: Vec<Matcher>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<usize, Matcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    EqualTo(String),
    Absent(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDefinition {
    pub status: u16,
    pub body: String,
}

impl StubDefinition {
    pub fn new(url: &str, descriptor: &StatementDescriptor, body: String) -> Self {
        let headers = descriptor
            .parameters()
            .map(|(position, value)| {
                let matcher = match value.text() {
                    Some(text) => Matcher::EqualTo(text),
                    None => Matcher::Absent(true),
                };
                (position, matcher)
            })
            .collect();
        Self {
            request: RequestPattern {
                method: "POST".to_string(),
                url: url.to_string(),
                body_patterns: vec![Matcher::EqualTo(descriptor.sql().to_string())],
                headers,
            },
            response: ResponseDefinition { status: 200, body },
        }
    }
}

pub struct Recorder {
    dir: PathBuf,
    url: String,
    codec: RowSetCodec,
    slots: Arc<SlotCounter>,
}

impl Recorder {
    /// `dir` must already exist.
    pub fn new(dir: impl Into<PathBuf>, codec: RowSetCodec) -> Self {
        Self {
            dir: dir.into(),
            url: DEFAULT_URL_PATH.to_string(),
            codec,
            slots: SlotCounter::new(),
        }
    }

    /// Request path the recorded matchers expect.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_slots(mut self, slots: Arc<SlotCounter>) -> Self {
        self.slots = slots;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slots(&self) -> &Arc<SlotCounter> {
        &self.slots
    }

    /// Serializes `rows` into the next slot and leaves the cursor rewound.
    pub fn record(&self, descriptor: &StatementDescriptor, rows: &mut RowSet) -> Result<PathBuf> {
        let body = self.codec.encode(rows)?;
        let definition = StubDefinition::new(&self.url, descriptor, body);
        let slot = self.slots.take();
        let path = self.dir.join(format!("{slot}.json"));
        let json = match serde_json::to_string_pretty(&definition) {
            Ok(json) => json,
            Err(err) => {
                return Err(Error::Record {
                    path,
                    source: std::io::Error::other(err),
                });
            }
        };
        if let Err(source) = std::fs::write(&path, json) {
            return Err(Error::Record { path, source });
        }
        info!(slot, path = %path.display(), sql = descriptor.sql(), "recorded stub definition");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ConnectionContext;
    use crate::value::Value;

    fn descriptor() -> StatementDescriptor {
        let mut descriptor =
            StatementDescriptor::new("SELECT A,B FROM T WHERE N=?", ConnectionContext::new());
        descriptor.bind(1, Value::from("Erich")).expect("bind");
        descriptor
    }

    #[test]
    fn definition_json_shape() {
        let definition = StubDefinition::new("/sqlstub", &descriptor(), "<resultset/>".into());
        let json = serde_json::to_value(&definition).expect("json");
        assert_eq!(json["request"]["method"], "POST");
        assert_eq!(json["request"]["url"], "/sqlstub");
        assert_eq!(
            json["request"]["bodyPatterns"][0]["equalTo"],
            "SELECT A,B FROM T WHERE N=?"
        );
        assert_eq!(json["request"]["headers"]["1"]["equalTo"], "Erich");
        assert_eq!(json["response"]["status"], 200);
        assert_eq!(json["response"]["body"], "<resultset/>");
    }

    #[test]
    fn null_bindings_match_absent_headers() {
        let mut descriptor = descriptor();
        descriptor.bind(2, Value::Null).expect("bind");
        let json = serde_json::to_value(StubDefinition::new("/sqlstub", &descriptor, String::new()))
            .expect("json");
        assert_eq!(json["request"]["headers"]["2"]["absent"], true);
    }

    #[test]
    fn headers_sort_numerically() {
        let mut descriptor = StatementDescriptor::new("SELECT ?", ConnectionContext::new());
        for position in [10, 2, 1] {
            descriptor.bind(position, Value::from(position as i32)).expect("bind");
        }
        let json = serde_json::to_string(&StubDefinition::new("/x", &descriptor, String::new()))
            .expect("json");
        let one = json.find("\"1\"").expect("1");
        let two = json.find("\"2\"").expect("2");
        let ten = json.find("\"10\"").expect("10");
        assert!(one < two && two < ten);
    }

    #[test]
    fn slots_are_never_reused() {
        let slots = SlotCounter::new();
        assert_eq!(slots.take(), 1);
        assert_eq!(slots.take(), 2);
        assert_eq!(slots.issued(), 2);
    }

    #[test]
    fn failed_write_still_consumes_the_slot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        let recorder = Recorder::new(&missing, RowSetCodec::default());
        let mut rows = RowSet::with_rows(vec!["A".into()], vec![vec![Value::from("x")]]);
        let err = recorder.record(&descriptor(), &mut rows).expect_err("dir does not exist");
        assert!(matches!(err, Error::Record { .. }));
        assert_eq!(recorder.slots().issued(), 1);

        std::fs::create_dir(&missing).expect("mkdir");
        let path = recorder.record(&descriptor(), &mut rows).expect("record");
        assert_eq!(path.file_name().and_then(|name| name.to_str()), Some("2.json"));
    }

    #[test]
    fn recorded_file_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let recorder = Recorder::new(dir.path(), RowSetCodec::default());
        let mut rows = RowSet::with_rows(
            vec!["A".into(), "B".into()],
            vec![vec![Value::from("1980-01-01"), Value::from("Vienna")]],
        );
        let path = recorder.record(&descriptor(), &mut rows).expect("record");
        assert_eq!(path, dir.path().join("1.json"));
        let text = std::fs::read_to_string(&path).expect("read");
        let definition: StubDefinition = serde_json::from_str(&text).expect("parse");
        assert_eq!(
            definition.request.headers.get(&1),
            Some(&Matcher::EqualTo("Erich".into()))
        );
        let decoded = RowSetCodec::default()
            .decode(&definition.response.body)
            .expect("decode");
        assert_eq!(decoded.rows(), rows.rows());
        assert!(rows.next());
    }
}
