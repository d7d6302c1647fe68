//! Thin CLI layer: parse args, styled output, and hand a RunConfig to
//! pummel-core. All errors return Result; the engine owns stdout.

use std::env;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::exit;

use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;

use pummel_core::config::{self, FormField, RunConfig};

// ---- UI helpers (no-op when stdout isn't a TTY) ----

fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn warning(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.yellow());
    } else {
        eprintln!("{}", msg);
    }
}

fn cli() -> Command {
    Command::new("pummel")
        .version(concat!(env!("CARGO_PKG_VERSION"), " (reqwest 0.12)"))
        .about("Concurrent HTTP benchmarking: request slots, weighted URL rotation, per-second reports")
        .after_help(
            "Examples:\n  pummel -n 1000 -c 50 http://localhost:8080/\n  pummel -t 30 -c 10 -w 3,1 http://host/a http://host/b\n  pummel -d 'user=x' -H 'X-Token: t' -n 100 http://host/login",
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(ArgAction::SetTrue)
                .help("Echo the parsed config and exit"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("With --info: machine-readable JSON"),
        )
        .arg(
            Arg::new("debug")
                .short('D')
                .long("debug")
                .value_name("DIR")
                .num_args(0..=1)
                .require_equals(true)
                .default_missing_value(".")
                .help("Write per-slot debug logs under DIR (default: current directory)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Make the operation more talkative"),
        )
        .arg(
            Arg::new("header")
                .short('H')
                .long("header")
                .value_name("LINE")
                .action(ArgAction::Append)
                .help("Set custom request header (repeatable)"),
        )
        .arg(
            Arg::new("head")
                .short('I')
                .long("head")
                .action(ArgAction::SetTrue)
                .help("Show document info only (HEAD request)"),
        )
        .arg(
            Arg::new("method")
                .short('m')
                .long("method")
                .value_name("METHOD")
                .help("Custom request method"),
        )
        .arg(
            Arg::new("data")
                .short('d')
                .long("data")
                .value_name("DATA")
                .help("HTTP POST data"),
        )
        .arg(
            Arg::new("data-ascii")
                .long("data-ascii")
                .value_name("DATA")
                .help("HTTP POST ASCII data"),
        )
        .arg(
            Arg::new("data-binary")
                .long("data-binary")
                .value_name("DATA")
                .help("HTTP POST binary data"),
        )
        .arg(
            Arg::new("data-raw")
                .long("data-raw")
                .value_name("DATA")
                .help("HTTP POST data, '@' allowed"),
        )
        .arg(
            Arg::new("data-urlencode")
                .long("data-urlencode")
                .value_name("DATA")
                .help("HTTP POST url encoded"),
        )
        .arg(
            Arg::new("get")
                .short('G')
                .long("get")
                .action(ArgAction::SetTrue)
                .help("Put the post data in the URL and use GET"),
        )
        .arg(
            Arg::new("form")
                .short('F')
                .long("form")
                .value_name("NAME=CONTENT")
                .action(ArgAction::Append)
                .help("Specify multipart MIME data; =@path sends a file"),
        )
        .arg(
            Arg::new("form-string")
                .long("form-string")
                .value_name("NAME=STRING")
                .action(ArgAction::Append)
                .help("Specify multipart MIME data, value taken literally"),
        )
        .arg(
            Arg::new("cookie")
                .short('C')
                .long("cookie")
                .value_name("DATA|FILE")
                .help("Send cookies from string or file"),
        )
        .arg(
            Arg::new("cookie-file")
                .short('f')
                .long("cookie-file")
                .value_name("FILE")
                .help("Read cookie jar from FILE and write it back on exit"),
        )
        .arg(
            Arg::new("cookie-session")
                .short('s')
                .long("cookie-session")
                .action(ArgAction::SetTrue)
                .help("Start a new cookie session"),
        )
        .arg(
            Arg::new("append")
                .short('a')
                .long("append")
                .action(ArgAction::SetTrue)
                .help("Append to target when uploading"),
        )
        .arg(
            Arg::new("upload-file")
                .short('T')
                .long("upload-file")
                .value_name("FILE")
                .help("Transfer local FILE as the request body"),
        )
        .arg(
            Arg::new("keepalive")
                .short('k')
                .long("keepalive")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .default_value("0")
                .help("Enable TCP keep-alive with SECONDS idle time (0 = off)"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .default_value("30")
                .help("Per-request timeout"),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .default_value("10")
                .help("Connect timeout"),
        )
        .arg(
            Arg::new("requests")
                .short('n')
                .long("requests")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(u64))
                .default_value("0")
                .help("Number of requests to perform (0 = unlimited)"),
        )
        .arg(
            Arg::new("timelimit")
                .short('t')
                .long("timelimit")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .default_value("0")
                .help("Seconds to max. to spend on benchmarking (0 = unlimited)"),
        )
        .arg(
            Arg::new("concurrency")
                .short('c')
                .long("concurrency")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(i64))
                .default_value("10")
                .help("Number of multiple requests to make at a time"),
        )
        .arg(
            Arg::new("weight")
                .short('w')
                .long("weight")
                .value_name("LIST")
                .help("Per-URL weights, comma or space separated"),
        )
        .arg(
            Arg::new("url")
                .value_name("URL")
                .num_args(0..)
                .help("Target URL(s)"),
        )
}

fn parse_form(raw: &str, allow_file: bool) -> FormField {
    match raw.split_once('=') {
        Some((name, value)) => {
            let is_file = allow_file && value.starts_with('@');
            FormField {
                name: name.to_string(),
                value: if is_file {
                    value[1..].to_string()
                } else {
                    value.to_string()
                },
                is_file,
            }
        }
        None => FormField {
            name: raw.to_string(),
            value: String::new(),
            is_file: false,
        },
    }
}

/// The last of the --data* flags on the command line wins.
fn body_data(matches: &ArgMatches) -> Option<String> {
    let mut picked: Option<(usize, String)> = None;
    for key in ["data", "data-ascii", "data-binary", "data-raw"] {
        if let Some(value) = matches.get_one::<String>(key) {
            if let Some(idx) = matches.indices_of(key).and_then(|ix| ix.last()) {
                if picked.as_ref().map(|(i, _)| idx > *i).unwrap_or(true) {
                    picked = Some((idx, value.clone()));
                }
            }
        }
    }
    if let Some(value) = matches.get_one::<String>("data-urlencode") {
        if let Some(idx) = matches.indices_of("data-urlencode").and_then(|ix| ix.last()) {
            if picked.as_ref().map(|(i, _)| idx > *i).unwrap_or(true) {
                picked = Some((idx, config::urlencode_data(value)));
            }
        }
    }
    picked.map(|(_, v)| v)
}

fn build_config(matches: &ArgMatches) -> RunConfig {
    let urls: Vec<String> = matches
        .get_many::<String>("url")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();

    let mut headers: Vec<String> = matches
        .get_many::<String>("header")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();
    if headers.len() > config::MAX_HEADERS {
        warning(&format!(
            "header argument too many: keeping first {}",
            config::MAX_HEADERS
        ));
        headers.truncate(config::MAX_HEADERS);
    }

    let mut forms: Vec<FormField> = Vec::new();
    if let Some(values) = matches.get_many::<String>("form") {
        forms.extend(values.map(|v| parse_form(v, true)));
    }
    if let Some(values) = matches.get_many::<String>("form-string") {
        forms.extend(values.map(|v| parse_form(v, false)));
    }
    if forms.len() > config::MAX_FORM_FIELDS {
        warning(&format!(
            "form argument too many: keeping first {}",
            config::MAX_FORM_FIELDS
        ));
        forms.truncate(config::MAX_FORM_FIELDS);
    }

    let concurrency = *matches.get_one::<i64>("concurrency").unwrap_or(&10);
    let concurrency = if concurrency <= 0 {
        1
    } else {
        concurrency as usize
    };

    let weights = matches
        .get_one::<String>("weight")
        .map(|w| config::parse_weights(w, urls.len()))
        .unwrap_or_default();

    RunConfig {
        method: matches.get_one::<String>("method").cloned(),
        head: matches.get_flag("head"),
        force_get: matches.get_flag("get"),
        headers,
        data: body_data(matches),
        forms,
        cookie: matches.get_one::<String>("cookie").cloned(),
        cookie_file: matches.get_one::<String>("cookie-file").map(PathBuf::from),
        cookie_session: matches.get_flag("cookie-session"),
        append: matches.get_flag("append"),
        upload_file: matches.get_one::<String>("upload-file").map(PathBuf::from),
        keepalive: *matches.get_one::<u64>("keepalive").unwrap_or(&0),
        timeout: *matches.get_one::<u64>("timeout").unwrap_or(&30),
        connect_timeout: *matches.get_one::<u64>("connect-timeout").unwrap_or(&10),
        urls,
        weights,
        requests: *matches.get_one::<u64>("requests").unwrap_or(&0),
        timelimit: *matches.get_one::<u64>("timelimit").unwrap_or(&0),
        concurrency,
        verbose: matches.get_flag("verbose"),
        debug_dir: matches.get_one::<String>("debug").map(|d| {
            if d.is_empty() {
                PathBuf::from(".")
            } else {
                PathBuf::from(d)
            }
        }),
    }
}

fn opt_str(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("(none)")
}

fn opt_path(v: &Option<PathBuf>) -> String {
    v.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(none)".to_string())
}

fn print_info(cfg: &RunConfig) {
    println!("======== CONFIG INFO BEGIN ========");
    println!("verbose: {}", cfg.verbose);
    println!("headers: {}", cfg.headers.len());
    for (i, h) in cfg.headers.iter().enumerate() {
        println!("  {} => {}", i, h);
    }
    println!("head: {}", cfg.head);
    println!("method: {}", cfg.resolved_method());
    println!("data: {}", opt_str(&cfg.data));
    println!("get: {}", cfg.force_get);
    println!("forms: {}", cfg.forms.len());
    for (i, f) in cfg.forms.iter().enumerate() {
        println!(
            "  {} => is_file: {}, name: {}, value: {}",
            i, f.is_file, f.name, f.value
        );
    }
    println!("cookie: {}", opt_str(&cfg.cookie));
    println!("cookie_file: {}", opt_path(&cfg.cookie_file));
    println!("cookie_session: {}", cfg.cookie_session);
    println!("append: {}", cfg.append);
    println!("upload_file: {}", opt_path(&cfg.upload_file));
    println!("keepalive: {}", cfg.keepalive);
    println!("timeout: {}", cfg.timeout);
    println!("connect_timeout: {}", cfg.connect_timeout);
    println!();
    println!("urls: {}", cfg.urls.len());
    for (i, u) in cfg.urls.iter().enumerate() {
        println!("  {} => {}", i, u);
    }
    println!(
        "weights: {}",
        if cfg.weights.is_empty() {
            "(all 1)".to_string()
        } else {
            cfg.weights
                .iter()
                .map(|w| w.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }
    );
    println!();
    println!("requests: {}", cfg.requests);
    println!("timelimit: {}", cfg.timelimit);
    println!("concurrency: {}", cfg.concurrency);
    println!("========= CONFIG INFO END =========");
}

fn run() -> Result<i32, String> {
    let matches = match cli().try_get_matches_from(env::args_os()) {
        Ok(m) => m,
        Err(e) => {
            use clap::error::ErrorKind;
            let _ = e.print();
            return Ok(match e.kind() {
                ErrorKind::DisplayVersion => 0,
                _ => 1,
            });
        }
    };

    let cfg = build_config(&matches);

    if cfg.urls.is_empty() {
        error("ERROR: At least one URL.");
        let _ = cli().print_help();
        return Ok(1);
    }

    if matches.get_flag("info") {
        if matches.get_flag("json") {
            println!(
                "{}",
                serde_json::to_string_pretty(&cfg).map_err(|e| e.to_string())?
            );
        } else {
            print_info(&cfg);
        }
        return Ok(0);
    }

    cfg.validate().map_err(|e| e.to_string())?;

    match pummel_core::engine::run(cfg) {
        Ok(_summary) => Ok(0),
        Err(e) => Err(e.to_string()),
    }
}

fn main() {
    match run() {
        Ok(code) => exit(code),
        Err(msg) => {
            error(&msg);
            exit(1);
        }
    }
}
