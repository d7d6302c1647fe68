//! Cookie sources and the jar file: inline header strings, Netscape-format
//! cookie files, and write-back of cookies observed during the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, SET_COOKIE};

use crate::config::RunConfig;
use crate::error::PummelError;

/// One cookie as stored in a Netscape-format jar file.
#[derive(Clone, Debug)]
pub struct StoredCookie {
    pub domain: String,
    pub path: String,
    pub secure: bool,
    /// Unix timestamp; 0 marks a session cookie.
    pub expiry: i64,
    pub name: String,
    pub value: String,
}

impl StoredCookie {
    fn key(&self) -> (String, String, String) {
        (self.domain.clone(), self.path.clone(), self.name.clone())
    }

    fn jar_url(&self) -> Option<reqwest::Url> {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}/", scheme, self.domain).parse().ok()
    }
}

/// The `--cookie` argument is a header string when it contains '=',
/// otherwise it names a cookie file.
pub fn inline_cookie(cfg: &RunConfig) -> Option<&str> {
    cfg.cookie.as_deref().filter(|s| s.contains('='))
}

/// Build the session jar from `--cookie-file` and a file-form `--cookie`.
/// Returns None when neither is configured; the jar then stays off and no
/// Set-Cookie tracking happens on the driver side.
pub fn load_jar(cfg: &RunConfig) -> Result<Option<Arc<Jar>>, PummelError> {
    let file_cookie = cfg.cookie.as_deref().filter(|s| !s.contains('='));
    if file_cookie.is_none() && cfg.cookie_file.is_none() {
        return Ok(None);
    }
    let jar = Arc::new(Jar::default());
    let mut sources: Vec<&Path> = Vec::new();
    if let Some(path) = file_cookie {
        sources.push(Path::new(path));
    }
    if let Some(path) = &cfg.cookie_file {
        if path.exists() {
            sources.push(path);
        }
    }
    for path in sources {
        for cookie in read_jar_file(path, cfg.cookie_session)? {
            if let Some(url) = cookie.jar_url() {
                jar.add_cookie_str(
                    &format!(
                        "{}={}; Domain={}; Path={}",
                        cookie.name, cookie.value, cookie.domain, cookie.path
                    ),
                    &url,
                );
            }
        }
    }
    Ok(Some(jar))
}

/// Cookies bound for `--cookie-file`: seeded from the file, updated from
/// Set-Cookie response headers, and written back on shutdown.
pub struct JarFile {
    path: PathBuf,
    cookies: Mutex<BTreeMap<(String, String, String), StoredCookie>>,
}

impl JarFile {
    /// Some only when `--cookie-file` is configured; seeds the store from
    /// the existing file when there is one.
    pub fn open(cfg: &RunConfig) -> Result<Option<Arc<JarFile>>, PummelError> {
        let Some(path) = &cfg.cookie_file else {
            return Ok(None);
        };
        let mut cookies = BTreeMap::new();
        if path.exists() {
            for cookie in read_jar_file(path, cfg.cookie_session)? {
                cookies.insert(cookie.key(), cookie);
            }
        }
        Ok(Some(Arc::new(JarFile {
            path: path.clone(),
            cookies: Mutex::new(cookies),
        })))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record every Set-Cookie header of one response. Later responses
    /// overwrite earlier cookies with the same (domain, path, name).
    pub fn record_response(&self, url: &reqwest::Url, headers: &HeaderMap) {
        for raw in headers.get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else { continue };
            if let Some(cookie) = parse_set_cookie(raw, url) {
                self.cookies.lock().unwrap().insert(cookie.key(), cookie);
            }
        }
    }

    /// Rewrite the jar file in Netscape format.
    pub fn save(&self) -> std::io::Result<()> {
        let cookies = self.cookies.lock().unwrap();
        let mut out = String::from("# Netscape HTTP Cookie File\n");
        for cookie in cookies.values() {
            out.push_str(&format!(
                "{}\tFALSE\t{}\t{}\t{}\t{}\t{}\n",
                cookie.domain,
                cookie.path,
                if cookie.secure { "TRUE" } else { "FALSE" },
                cookie.expiry,
                cookie.name,
                cookie.value
            ));
        }
        std::fs::write(&self.path, out)
    }
}

/// Parse one line of a Netscape cookie file:
/// `domain flag path secure expiry name value`, tab separated; `#HttpOnly_`
/// prefixes are honored, other comment lines skipped.
fn parse_jar_line(line: &str) -> Option<StoredCookie> {
    let raw = line.strip_prefix("#HttpOnly_").unwrap_or(line);
    if raw.trim().is_empty() || raw.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = raw.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }
    Some(StoredCookie {
        domain: fields[0].trim_start_matches('.').to_string(),
        path: fields[2].to_string(),
        secure: fields[3].eq_ignore_ascii_case("TRUE"),
        expiry: fields[4].parse().unwrap_or(0),
        name: fields[5].to_string(),
        value: fields[6].to_string(),
    })
}

/// Read a Netscape cookie file. With `new_session`, stored session cookies
/// (expiry 0) are not carried over.
fn read_jar_file(path: &Path, new_session: bool) -> Result<Vec<StoredCookie>, PummelError> {
    let text = std::fs::read_to_string(path).map_err(|e| PummelError::Resource {
        what: "cookie file",
        path: path.display().to_string(),
        source: e.to_string(),
    })?;
    let mut cookies = Vec::new();
    for line in text.lines() {
        let Some(cookie) = parse_jar_line(line) else {
            continue;
        };
        if new_session && cookie.expiry == 0 {
            continue;
        }
        cookies.push(cookie);
    }
    Ok(cookies)
}

/// Parse one Set-Cookie header against the request URL. Max-Age takes
/// precedence over Expires; an unparsable Expires leaves a session cookie.
fn parse_set_cookie(raw: &str, url: &reqwest::Url) -> Option<StoredCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = StoredCookie {
        domain: url.host_str().unwrap_or_default().to_string(),
        path: "/".to_string(),
        secure: false,
        expiry: 0,
        name: name.to_string(),
        value: value.trim().to_string(),
    };
    let mut expires = 0i64;
    let mut max_age = None;
    for attr in parts {
        let attr = attr.trim();
        match attr.split_once('=') {
            Some((k, v)) if k.trim().eq_ignore_ascii_case("domain") => {
                cookie.domain = v.trim().trim_start_matches('.').to_string();
            }
            Some((k, v)) if k.trim().eq_ignore_ascii_case("path") => {
                cookie.path = v.trim().to_string();
            }
            Some((k, v)) if k.trim().eq_ignore_ascii_case("max-age") => {
                max_age = v.trim().parse::<i64>().ok();
            }
            Some((k, v)) if k.trim().eq_ignore_ascii_case("expires") => {
                if let Ok(t) = chrono::DateTime::parse_from_rfc2822(v.trim()) {
                    expires = t.timestamp();
                }
            }
            None if attr.eq_ignore_ascii_case("secure") => cookie.secure = true,
            _ => {}
        }
    }
    cookie.expiry = match max_age {
        Some(secs) => Local::now().timestamp() + secs,
        None => expires,
    };
    Some(cookie)
}
