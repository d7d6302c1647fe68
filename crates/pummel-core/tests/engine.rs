//! End-to-end engine runs against a local HTTP server.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use pummel_core::{engine, RunConfig, RunFlags};

struct TestServer {
    addr: String,
    connections: Arc<AtomicUsize>,
    paths: Arc<Mutex<Vec<String>>>,
}

/// Minimal HTTP/1.1 server: answers 200 with a short body, advertises
/// keep-alive or close, and records connections and request paths.
fn spawn_server(keepalive: bool) -> TestServer {
    spawn_server_with(keepalive, false)
}

fn spawn_server_with(keepalive: bool, set_cookie: bool) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("http://{}/", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    let paths = Arc::new(Mutex::new(Vec::new()));
    let conns = Arc::clone(&connections);
    let seen = Arc::clone(&paths);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            conns.fetch_add(1, Ordering::SeqCst);
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, keepalive, set_cookie, seen));
        }
    });
    TestServer {
        addr,
        connections,
        paths,
    }
}

fn handle(
    stream: TcpStream,
    keepalive: bool,
    set_cookie: bool,
    paths: Arc<Mutex<Vec<String>>>,
) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut stream = stream;
    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
            return;
        }
        if let Some(path) = request_line.split_whitespace().nth(1) {
            paths.lock().unwrap().push(path.to_string());
        }
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).unwrap_or(0) == 0 {
                return;
            }
            if header == "\r\n" || header == "\n" {
                break;
            }
            if let Some(v) = header.to_ascii_lowercase().strip_prefix("content-length:") {
                content_length = v.trim().parse().unwrap_or(0);
            }
        }
        if content_length > 0 {
            let mut body = vec![0u8; content_length];
            if reader.read_exact(&mut body).is_err() {
                return;
            }
        }
        let body = b"hello";
        let connection = if keepalive { "keep-alive" } else { "close" };
        let cookie = if set_cookie {
            "Set-Cookie: sid=abc123; Path=/\r\n"
        } else {
            ""
        };
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: {}\r\n\r\n",
            body.len(),
            cookie,
            connection
        );
        if stream.write_all(head.as_bytes()).is_err() {
            return;
        }
        if stream.write_all(body).is_err() {
            return;
        }
        let _ = stream.flush();
        if !keepalive {
            return;
        }
    }
}

fn base_cfg(url: &str) -> RunConfig {
    RunConfig {
        urls: vec![url.to_string()],
        ..RunConfig::default()
    }
}

#[test]
fn fixed_request_count_completes_exactly() {
    let server = spawn_server(false);
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 50;
    cfg.concurrency = 10;
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.begin_reqs, 50);
    assert_eq!(summary.end_reqs, 50);
    assert_eq!(summary.statuses.counts()[2], 50);
    assert_eq!(summary.statuses.total(), summary.end_reqs);
    assert_eq!(summary.keepalives, 0);
    assert!(summary.ticks >= 1);
}

#[test]
fn concurrency_clamps_to_request_count() {
    let server = spawn_server(false);
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 3;
    cfg.concurrency = 10;
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 3);
    assert_eq!(summary.statuses.counts()[2], 3);
}

#[test]
fn weighted_rotation_is_deterministic_per_slot() {
    let server = spawn_server(true);
    let base = server.addr.trim_end_matches('/').to_string();
    let cfg = RunConfig {
        urls: vec![
            format!("{}/a", base),
            format!("{}/b", base),
            format!("{}/c", base),
        ],
        weights: vec![3, 1, 2],
        requests: 12,
        concurrency: 1,
        keepalive: 30,
        ..RunConfig::default()
    };
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 12);
    let paths = server.paths.lock().unwrap().clone();
    assert_eq!(
        paths,
        vec!["/a", "/a", "/a", "/b", "/c", "/c", "/a", "/a", "/a", "/b", "/c", "/c"]
    );
}

#[test]
fn keepalive_responses_park_connections() {
    let server = spawn_server(true);
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 20;
    cfg.concurrency = 2;
    cfg.keepalive = 30;
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 20);
    assert_eq!(summary.peak_keepalives, 2);
    assert_eq!(summary.keepalives, 0);
    // Both slots reuse their parked connection for the whole run.
    assert!(server.connections.load(Ordering::SeqCst) <= 4);
}

#[test]
fn close_responses_open_fresh_connections() {
    let server = spawn_server(false);
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 20;
    cfg.concurrency = 2;
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 20);
    assert_eq!(summary.peak_keepalives, 0);
    assert!(server.connections.load(Ordering::SeqCst) >= 20);
}

#[test]
fn transport_failures_land_in_the_zero_bucket() {
    // Nothing listens on port 1; every transaction fails at connect.
    let cfg = RunConfig {
        urls: vec!["http://127.0.0.1:1/".to_string()],
        requests: 3,
        concurrency: 1,
        connect_timeout: 2,
        ..RunConfig::default()
    };
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 3);
    assert_eq!(summary.statuses.counts()[0], 3);
}

#[test]
fn soft_stop_drains_in_flight_work() {
    let server = spawn_server(true);
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 0;
    cfg.concurrency = 4;
    let flags = RunFlags::new();
    let stopper = flags.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        stopper.stop();
    });
    let summary = engine::run_with_flags(cfg, flags).unwrap();
    assert!(summary.end_reqs > 0);
    assert_eq!(summary.begin_reqs, summary.end_reqs);
    assert_eq!(summary.keepalives, 0);
    assert!(summary.elapsed < Duration::from_secs(10));
}

#[test]
fn timelimit_bounds_the_run() {
    let server = spawn_server(true);
    let mut cfg = base_cfg(&server.addr);
    cfg.timelimit = 1;
    cfg.concurrency = 2;
    cfg.keepalive = 30;
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert!(summary.end_reqs > 0);
    assert_eq!(summary.begin_reqs, summary.end_reqs);
    assert!(summary.elapsed >= Duration::from_secs(1));
    assert!(summary.elapsed < Duration::from_secs(5));
    assert_eq!(summary.statuses.total(), summary.end_reqs);
}

#[test]
fn cookie_file_is_written_back_on_exit() {
    let server = spawn_server_with(false, true);
    let dir = tempfile::tempdir().unwrap();
    let jar_path = dir.path().join("cookies.txt");
    std::fs::write(
        &jar_path,
        "example.com\tFALSE\t/\tFALSE\t2147483647\tdurable\tseed\n",
    )
    .unwrap();
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 2;
    cfg.concurrency = 1;
    cfg.cookie_file = Some(jar_path.clone());
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 2);

    let text = std::fs::read_to_string(&jar_path).unwrap();
    assert!(text.starts_with("# Netscape HTTP Cookie File"));
    assert!(text.contains("\tsid\tabc123\n"));
    assert!(text.contains("\tdurable\tseed\n"));
}

#[test]
fn debug_logs_trace_each_request() {
    let server = spawn_server(false);
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = base_cfg(&server.addr);
    cfg.requests = 2;
    cfg.concurrency = 1;
    cfg.debug_dir = Some(dir.path().to_path_buf());
    let summary = engine::run_with_flags(cfg, RunFlags::new()).unwrap();
    assert_eq!(summary.end_reqs, 2);
    let text = std::fs::read_to_string(dir.path().join(".debug-0.log")).unwrap();
    assert!(text.contains("* BEGIN 1st REQUEST"));
    assert!(text.contains("* END 2st REQUEST"));
    assert!(summary.bytes.2 as usize >= text.len());
}
