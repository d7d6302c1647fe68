//! Transaction driver seam over reqwest. A slot's `Client` is its
//! connection handle: the pool keeps at most one idle connection, and
//! dropping the client closes it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::CONNECTION;
use reqwest::{Client, Request, Response};

use crate::config::RunConfig;
use crate::cookie::JarFile;
use crate::error::PummelError;
use crate::stats::ByteCounters;

/// One finished transaction, as harvested by the engine.
#[derive(Debug)]
pub struct Completion {
    pub slot_id: usize,
    /// HTTP status, or 0 for transport and build failures.
    pub status: u16,
    /// Response advertised `Connection: keep-alive`.
    pub keepalive: bool,
    /// The connection handle, returned for the park-or-drop decision.
    pub client: Option<Client>,
}

/// Build the connection handle for one slot.
pub fn make_client(cfg: &RunConfig, jar: Option<&Arc<Jar>>) -> Result<Client, PummelError> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(cfg.timeout))
        .connect_timeout(Duration::from_secs(cfg.connect_timeout))
        .pool_max_idle_per_host(1)
        .redirect(reqwest::redirect::Policy::limited(10));
    if cfg.keepalive > 0 {
        builder = builder
            .tcp_keepalive(Duration::from_secs(cfg.keepalive))
            .pool_idle_timeout(Duration::from_secs(cfg.keepalive));
    }
    if let Some(jar) = jar {
        builder = builder.cookie_provider(Arc::clone(jar));
    }
    Ok(builder.build()?)
}

/// Case-insensitive prefix match on the Connection response header.
pub fn advertises_keepalive(resp: &Response) -> bool {
    resp.headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with("keep-alive"))
        .unwrap_or(false)
}

/// Wire size of the request head plus any in-memory body.
fn request_size(req: &Request) -> u64 {
    let mut n = req.method().as_str().len() + req.url().as_str().len() + " HTTP/1.1\r\n".len();
    for (name, value) in req.headers() {
        n += name.as_str().len() + 2 + value.as_bytes().len() + 2;
    }
    n += 2;
    n as u64
        + req
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| b.len() as u64)
            .unwrap_or(0)
}

/// Wire size of the response status line and headers.
fn response_head_size(resp: &Response) -> u64 {
    let mut n = format!("{:?} {}\r\n", resp.version(), resp.status()).len();
    for (name, value) in resp.headers() {
        n += name.as_str().len() + 2 + value.as_bytes().len() + 2;
    }
    (n + 2) as u64
}

/// Run one transaction to completion, accruing byte counters as the data
/// moves. Transport errors, at any point up to the last body byte, become
/// status 0 and never abort the run.
pub async fn execute(
    client: &Client,
    request: Request,
    counters: &ByteCounters,
    jar_file: Option<&JarFile>,
    verbose: bool,
) -> (u16, bool) {
    counters.add_out(request_size(&request));
    if verbose {
        trace(counters, &format!("> {} {}", request.method(), request.url()));
    }
    match client.execute(request).await {
        Ok(mut resp) => {
            let mut status = resp.status().as_u16();
            let mut keepalive = advertises_keepalive(&resp);
            counters.add_in(response_head_size(&resp));
            if let Some(store) = jar_file {
                store.record_response(resp.url(), resp.headers());
            }
            if verbose {
                trace(
                    counters,
                    &format!("< {:?} {}", resp.version(), resp.status()),
                );
            }
            // Drain the body in chunks; nothing is buffered. A failure mid
            // stream fails the whole transaction.
            let mut body_bytes = 0u64;
            loop {
                match resp.chunk().await {
                    Ok(Some(chunk)) => body_bytes += chunk.len() as u64,
                    Ok(None) => break,
                    Err(e) => {
                        if verbose {
                            trace(counters, &format!("! {}", e));
                        }
                        status = 0;
                        keepalive = false;
                        break;
                    }
                }
            }
            counters.add_in(body_bytes);
            (status, keepalive)
        }
        Err(e) => {
            if verbose {
                trace(counters, &format!("! {}", e));
            }
            (0, false)
        }
    }
}

fn trace(counters: &ByteCounters, msg: &str) {
    let line = format!("{}\n", msg);
    counters.add_debug(line.len() as u64);
    eprint!("{}", line);
}
