//! Environment-driven virtualization settings.

use std::path::PathBuf;

use crate::recorder::DEFAULT_URL_PATH;

pub const DEFAULT_STUB_URL: &str = "http://localhost:8080/sqlstub";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualizationConfig {
    pub stub_url: String,
    /// Recording is off unless set. The directory must exist.
    pub record_dir: Option<PathBuf>,
    /// Request path written into recorded matchers.
    pub url_path: String,
    pub typed_recording: bool,
}

impl VirtualizationConfig {
    pub fn new(stub_url: impl Into<String>) -> Self {
        let stub_url = stub_url.into();
        let url_path = url_path_of(&stub_url);
        Self {
            stub_url,
            record_dir: None,
            url_path,
            typed_recording: false,
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(
            lookup("SQLVIRT_STUB_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_STUB_URL.to_string()),
        );
        config.record_dir = lookup("SQLVIRT_RECORD_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        config.typed_recording = lookup("SQLVIRT_TYPED_RECORDING")
            .map(|raw| parse_flag(&raw))
            .unwrap_or(false);
        config
    }

    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }

    pub fn with_typed_recording(mut self, typed: bool) -> Self {
        self.typed_recording = typed;
        self
    }
}

impl Default for VirtualizationConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STUB_URL)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Path component of an absolute URL, `/sqlstub` when there is none.
fn url_path_of(url: &str) -> String {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = match after_scheme.find('/') {
        Some(index) => &after_scheme[index..],
        None => "",
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() || path == "/" {
        DEFAULT_URL_PATH.to_string()
    } else {
        path.to_string()
    }
}
