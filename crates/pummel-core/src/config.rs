//! Immutable run configuration: request shape, URL set, limits, sinks.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::PummelError;

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const MAX_HEADERS: usize = 128;
pub const MAX_FORM_FIELDS: usize = 128;

/// One multipart field. `is_file` means `value` names a file to read at
/// request-build time.
#[derive(Clone, Debug, Serialize)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub is_file: bool,
}

/// Everything a run needs, fixed at startup.
#[derive(Clone, Debug, Serialize)]
pub struct RunConfig {
    pub method: Option<String>,
    pub head: bool,
    pub force_get: bool,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub forms: Vec<FormField>,
    pub cookie: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub cookie_session: bool,
    pub append: bool,
    pub upload_file: Option<PathBuf>,
    /// TCP keep-alive idle seconds; 0 disables keep-alive entirely.
    pub keepalive: u64,
    pub timeout: u64,
    pub connect_timeout: u64,
    pub urls: Vec<String>,
    /// Empty means every URL has weight 1.
    pub weights: Vec<u32>,
    /// 0 = unlimited.
    pub requests: u64,
    /// Wall-clock cap in seconds; 0 = unlimited.
    pub timelimit: u64,
    pub concurrency: usize,
    pub verbose: bool,
    pub debug_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            method: None,
            head: false,
            force_get: false,
            headers: Vec::new(),
            data: None,
            forms: Vec::new(),
            cookie: None,
            cookie_file: None,
            cookie_session: false,
            append: false,
            upload_file: None,
            keepalive: 0,
            timeout: DEFAULT_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            urls: Vec::new(),
            weights: Vec::new(),
            requests: 0,
            timelimit: 0,
            concurrency: DEFAULT_CONCURRENCY,
            verbose: false,
            debug_dir: None,
        }
    }
}

impl RunConfig {
    /// Slot count for the run: never more slots than there are requests.
    pub fn effective_concurrency(&self) -> usize {
        let c = self.concurrency.max(1);
        if self.requests > 0 {
            c.min(self.requests as usize).max(1)
        } else {
            c
        }
    }

    /// Method after flag precedence: explicit `-m` wins, then `-I`, `-G`,
    /// upload implies PUT, body data implies POST, otherwise GET.
    pub fn resolved_method(&self) -> &str {
        if let Some(m) = &self.method {
            m
        } else if self.head {
            "HEAD"
        } else if self.force_get {
            "GET"
        } else if self.upload_file.is_some() {
            "PUT"
        } else if self.data.is_some() || !self.forms.is_empty() {
            "POST"
        } else {
            "GET"
        }
    }

    /// URLs as dispatched. With `-G`, body data folds into the query string.
    pub fn effective_urls(&self) -> Vec<String> {
        match (&self.data, self.force_get) {
            (Some(data), true) => self
                .urls
                .iter()
                .map(|u| {
                    if u.contains('?') {
                        format!("{}&{}", u, data)
                    } else {
                        format!("{}?{}", u, data)
                    }
                })
                .collect(),
            _ => self.urls.clone(),
        }
    }

    /// Body data, unless `-G` moved it into the URL.
    pub fn body_data(&self) -> Option<&str> {
        if self.force_get {
            None
        } else {
            self.data.as_deref()
        }
    }

    /// Startup checks that must refuse to run: URLs parse, upload file and
    /// cookie file are openable.
    pub fn validate(&self) -> Result<(), PummelError> {
        if self.urls.is_empty() {
            return Err(PummelError::Usage("At least one URL.".to_string()));
        }
        for u in &self.urls {
            u.parse::<reqwest::Url>()
                .map_err(|e| PummelError::Usage(format!("invalid URL {}: {}", u, e)))?;
        }
        if let Some(path) = &self.upload_file {
            std::fs::File::open(path).map_err(|e| PummelError::Resource {
                what: "upload file",
                path: path.display().to_string(),
                source: e.to_string(),
            })?;
        }
        if let Some(c) = &self.cookie {
            if !c.contains('=') {
                std::fs::File::open(c).map_err(|e| PummelError::Resource {
                    what: "cookie file",
                    path: c.clone(),
                    source: e.to_string(),
                })?;
            }
        }
        if let Some(f) = &self.cookie_file {
            if f.exists() {
                std::fs::File::open(f).map_err(|e| PummelError::Resource {
                    what: "cookie file",
                    path: f.display().to_string(),
                    source: e.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

/// Parse a weight list: comma or space separated integers. Non-positive or
/// non-numeric tokens fall back to 1, as do missing trailing entries.
pub fn parse_weights(list: &str, url_count: usize) -> Vec<u32> {
    let mut weights: Vec<u32> = list
        .split([',', ' ', '\t'])
        .filter(|t| !t.trim().is_empty())
        .map(|t| {
            t.trim()
                .parse::<i64>()
                .ok()
                .filter(|w| *w > 0)
                .map(|w| w as u32)
                .unwrap_or(1)
        })
        .collect();
    weights.resize(url_count, 1);
    weights
}

/// Percent-encode `--data-urlencode` input: `name=content` keeps the name
/// literal, everything else is encoded wholesale.
pub fn urlencode_data(raw: &str) -> String {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => {
            format!("{}={}", name, escape(value))
        }
        Some((_, value)) => escape(value),
        None => escape(raw),
    }
}

fn escape(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
