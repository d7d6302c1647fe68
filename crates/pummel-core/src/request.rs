//! Builds one ready-to-dispatch transaction from the run configuration.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Request};

use crate::config::{FormField, RunConfig};
use crate::cookie;
use crate::error::PummelError;

/// Materialize the next request for a slot on the given connection handle.
///
/// Per-request resource problems (unreadable form file, unreadable upload)
/// degrade with a stderr warning; the request still goes out.
pub fn build(client: &Client, cfg: &RunConfig, url: &str) -> Result<Request, PummelError> {
    let method = Method::from_bytes(cfg.resolved_method().as_bytes())
        .map_err(|e| PummelError::Usage(format!("invalid method: {}", e)))?;
    let mut builder = client.request(method, url);

    for line in &cfg.headers {
        if let Some((name, value)) = line.split_once(':') {
            builder = builder.header(name.trim(), value.trim());
        }
    }
    if let Some(cookie) = cookie::inline_cookie(cfg) {
        builder = builder.header(reqwest::header::COOKIE, cookie);
    }
    if cfg.keepalive > 0 {
        if !has_header(cfg, "connection") {
            builder = builder.header(reqwest::header::CONNECTION, "Keep-alive");
        }
        if !has_header(cfg, "keep-alive") {
            builder = builder.header("Keep-Alive", format!("timeout={}", cfg.keepalive));
        }
    }

    if let Some(path) = &cfg.upload_file {
        builder = builder.body(read_upload(path));
    } else if !cfg.forms.is_empty() {
        builder = builder.multipart(build_form(&cfg.forms));
    } else if let Some(data) = cfg.body_data() {
        if !has_header(cfg, "content-type") {
            builder = builder.header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            );
        }
        builder = builder.body(data.as_bytes().to_vec());
    }

    builder.build().map_err(|e| PummelError::Driver {
        operation: "request build",
        source: e.to_string(),
    })
}

fn has_header(cfg: &RunConfig, name: &str) -> bool {
    cfg.headers.iter().any(|h| {
        h.split(':')
            .next()
            .map(|n| n.trim().eq_ignore_ascii_case(name))
            .unwrap_or(false)
    })
}

/// Upload body, opened per transaction. The size comes from seeking to the
/// end and rewinding before the read.
fn read_upload(path: &Path) -> Vec<u8> {
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let size = f.seek(SeekFrom::End(0)).unwrap_or(0);
            let _ = f.seek(SeekFrom::Start(0));
            let mut buf = Vec::with_capacity(size as usize);
            if let Err(e) = f.read_to_end(&mut buf) {
                eprintln!("warning: cannot read upload file {}: {}", path.display(), e);
                return Vec::new();
            }
            buf
        }
        Err(e) => {
            eprintln!("warning: cannot open upload file {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Multipart form; file fields that cannot be read are skipped with a
/// warning and the request still goes out.
fn build_form(fields: &[FormField]) -> Form {
    let mut form = Form::new();
    for field in fields {
        if field.is_file {
            match std::fs::read(&field.value) {
                Ok(bytes) => {
                    let file_name = Path::new(&field.value)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("file")
                        .to_string();
                    form = form.part(
                        field.name.clone(),
                        Part::bytes(bytes).file_name(file_name),
                    );
                }
                Err(e) => {
                    eprintln!("warning: skipping form file {}: {}", field.value, e);
                }
            }
        } else {
            form = form.text(field.name.clone(), field.value.clone());
        }
    }
    form
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::builder().build().unwrap()
    }

    fn base(url: &str) -> RunConfig {
        RunConfig {
            urls: vec![url.to_string()],
            ..RunConfig::default()
        }
    }

    #[test]
    fn custom_headers_are_applied() {
        let mut cfg = base("http://localhost/");
        cfg.headers = vec!["X-Token: abc".into(), "Accept: text/plain".into()];
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.headers().get("x-token").unwrap(), "abc");
        assert_eq!(req.headers().get("accept").unwrap(), "text/plain");
    }

    #[test]
    fn keepalive_headers_injected_only_when_enabled() {
        let mut cfg = base("http://localhost/");
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert!(req.headers().get("connection").is_none());

        cfg.keepalive = 30;
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.headers().get("connection").unwrap(), "Keep-alive");
        assert_eq!(req.headers().get("keep-alive").unwrap(), "timeout=30");
    }

    #[test]
    fn user_supplied_connection_header_wins() {
        let mut cfg = base("http://localhost/");
        cfg.keepalive = 10;
        cfg.headers = vec!["Connection: close".into()];
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.headers().get("connection").unwrap(), "close");
        assert_eq!(req.headers().get("keep-alive").unwrap(), "timeout=10");
    }

    #[test]
    fn data_body_sets_method_and_content_type() {
        let mut cfg = base("http://localhost/");
        cfg.data = Some("a=1&b=2".into());
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.method().as_str(), "POST");
        assert_eq!(
            req.headers().get("content-type").unwrap(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(req.body().unwrap().as_bytes().unwrap(), b"a=1&b=2");
    }

    #[test]
    fn head_request_has_no_body() {
        let mut cfg = base("http://localhost/");
        cfg.head = true;
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.method().as_str(), "HEAD");
        assert!(req.body().is_none());
    }

    #[test]
    fn missing_form_file_is_skipped_not_fatal() {
        let mut cfg = base("http://localhost/");
        cfg.forms = vec![
            FormField {
                name: "note".into(),
                value: "hello".into(),
                is_file: false,
            },
            FormField {
                name: "blob".into(),
                value: "/nonexistent/blob.bin".into(),
                is_file: true,
            },
        ];
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.method().as_str(), "POST");
        let content_type = req.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
    }

    #[test]
    fn upload_reads_file_per_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"0123456789").unwrap();
        let mut cfg = base("http://localhost/");
        cfg.upload_file = Some(path);
        let req = build(&client(), &cfg, "http://localhost/").unwrap();
        assert_eq!(req.method().as_str(), "PUT");
        assert_eq!(req.body().unwrap().as_bytes().unwrap().len(), 10);
    }
}
