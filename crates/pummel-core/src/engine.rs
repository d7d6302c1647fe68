//! The event loop: drives the slot pool, harvests completions, applies the
//! recycle-or-retire decision, and emits the periodic report.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::cookie::Jar;
use tokio::sync::mpsc::{self, Sender};
use tokio::time::MissedTickBehavior;

use crate::config::RunConfig;
use crate::cookie::{self, JarFile};
use crate::driver::{self, Completion};
use crate::error::PummelError;
use crate::report::{Reporter, Snapshot};
use crate::request;
use crate::rotator;
use crate::signal::{self, RunFlags};
use crate::slot::Slot;
use crate::stats::{ByteCounters, LatencyRing, StatusHistogram};

/// Final counters, exposed to callers and tests.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub begin_reqs: u64,
    pub end_reqs: u64,
    pub statuses: StatusHistogram,
    /// Report lines emitted.
    pub ticks: u64,
    /// Highest number of slots simultaneously holding a reusable connection.
    pub peak_keepalives: usize,
    /// Reusable connections still held at exit; always 0 after a full drain.
    pub keepalives: usize,
    /// (in, out, debug) byte totals.
    pub bytes: (u64, u64, u64),
    pub elapsed: Duration,
}

/// Run the benchmark to completion with process signal handling installed.
pub fn run(cfg: RunConfig) -> Result<RunSummary, PummelError> {
    execute(cfg, RunFlags::new(), true)
}

/// Run with caller-owned flags and no signal handlers; callers drive the
/// soft stop through `flags`.
pub fn run_with_flags(cfg: RunConfig, flags: RunFlags) -> Result<RunSummary, PummelError> {
    execute(cfg, flags, false)
}

fn execute(
    cfg: RunConfig,
    flags: RunFlags,
    install_signals: bool,
) -> Result<RunSummary, PummelError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PummelError::Driver {
            operation: "runtime",
            source: e.to_string(),
        })?;
    runtime.block_on(run_loop(cfg, flags, install_signals))
}

struct Engine {
    cfg: RunConfig,
    urls: Vec<String>,
    jar: Option<Arc<Jar>>,
    jar_file: Option<Arc<JarFile>>,
    counters: Arc<ByteCounters>,
    tx: Sender<Completion>,
    slots: Vec<Slot>,
    statuses: StatusHistogram,
    ring: LatencyRing,
    begin_reqs: u64,
    end_reqs: u64,
    active: usize,
    keepalives: usize,
    peak_keepalives: usize,
    deadline: Instant,
    flags: RunFlags,
}

enum Event {
    Done(Completion),
    Tick,
    Closed,
}

async fn run_loop(
    cfg: RunConfig,
    flags: RunFlags,
    install_signals: bool,
) -> Result<RunSummary, PummelError> {
    if install_signals {
        signal::install(&flags)?;
    }

    let started = Instant::now();
    let jar = cookie::load_jar(&cfg)?;
    let jar_file = JarFile::open(&cfg)?;
    if let Some(dir) = &cfg.debug_dir {
        std::fs::create_dir_all(dir).map_err(|e| PummelError::Resource {
            what: "debug directory",
            path: dir.display().to_string(),
            source: e.to_string(),
        })?;
    }

    let concurrency = cfg.effective_concurrency();
    let urls = cfg.effective_urls();
    let deadline = started + Duration::from_secs(cfg.timelimit);
    let counters = Arc::new(ByteCounters::new());
    let (tx, mut rx) = mpsc::channel::<Completion>(concurrency);
    let slots = (0..concurrency)
        .map(|id| Slot::new(id, &cfg, concurrency))
        .collect();

    let mut engine = Engine {
        cfg,
        urls,
        jar,
        jar_file: jar_file.clone(),
        counters: Arc::clone(&counters),
        tx,
        slots,
        statuses: StatusHistogram::default(),
        ring: LatencyRing::new(),
        begin_reqs: 0,
        end_reqs: 0,
        active: concurrency,
        keepalives: 0,
        peak_keepalives: 0,
        deadline,
        flags: flags.clone(),
    };

    for id in 0..concurrency {
        engine.dispatch(id).await;
        engine.begin_reqs += 1;
    }

    let mut reporter = Reporter::new(std::io::stdout().is_terminal());
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // An interval fires immediately; consume that so the cadence starts one
    // second in.
    tick.tick().await;

    while engine.active > 0 {
        let event = tokio::select! {
            received = rx.recv() => match received {
                Some(done) => Event::Done(done),
                None => Event::Closed,
            },
            _ = tick.tick() => Event::Tick,
        };

        match event {
            Event::Done(done) => {
                engine.complete(done).await;
                // Process every completion already queued before sleeping
                // again.
                while let Ok(more) = rx.try_recv() {
                    engine.complete(more).await;
                }
            }
            Event::Tick => engine.flags.set_tick(),
            Event::Closed => {
                eprintln!("completion channel closed with transactions outstanding");
                break;
            }
        }

        if engine.flags.take_tick() || engine.active == 0 {
            reporter.emit(&engine.snapshot(!engine.flags.is_running()));
        }
    }

    if engine.active > 0 {
        // Broke out early; still report what we have.
        reporter.emit(&engine.snapshot(true));
    }

    if let Some(store) = &jar_file {
        if let Err(e) = store.save() {
            eprintln!(
                "warning: cannot write cookie file {}: {}",
                store.path().display(),
                e
            );
        }
    }

    Ok(RunSummary {
        begin_reqs: engine.begin_reqs,
        end_reqs: engine.end_reqs,
        statuses: engine.statuses,
        ticks: reporter.times(),
        peak_keepalives: engine.peak_keepalives,
        keepalives: engine.keepalives,
        bytes: counters.totals(),
        elapsed: started.elapsed(),
    })
}

impl Engine {
    /// Build and submit the next transaction on a slot. Failures to even
    /// construct the transaction feed back a status-0 completion so the
    /// slot still cycles through the normal path.
    async fn dispatch(&mut self, slot_id: usize) {
        let url_idx = rotator::next_index(
            &mut self.slots[slot_id].cursor,
            self.urls.len(),
            &self.cfg.weights,
        );
        let url = self.urls[url_idx].clone();
        self.slots[slot_id].in_flight_start = Instant::now();
        let counters = Arc::clone(&self.counters);
        self.slots[slot_id].trace_begin(&counters);

        let client = match self.slots[slot_id].parked.take() {
            Some(client) => Some(client),
            None => match driver::make_client(&self.cfg, self.jar.as_ref()) {
                Ok(client) => Some(client),
                Err(e) => {
                    eprintln!("warning: {}", e);
                    None
                }
            },
        };
        let Some(client) = client else {
            let _ = self
                .tx
                .send(Completion {
                    slot_id,
                    status: 0,
                    keepalive: false,
                    client: None,
                })
                .await;
            return;
        };

        match request::build(&client, &self.cfg, &url) {
            Ok(request) => {
                let tx = self.tx.clone();
                let verbose = self.cfg.verbose;
                let jar_file = self.jar_file.clone();
                tokio::spawn(async move {
                    let (status, keepalive) =
                        driver::execute(&client, request, &counters, jar_file.as_deref(), verbose)
                            .await;
                    let _ = tx
                        .send(Completion {
                            slot_id,
                            status,
                            keepalive,
                            client: Some(client),
                        })
                        .await;
                });
            }
            Err(e) => {
                eprintln!("warning: {}", e);
                let _ = self
                    .tx
                    .send(Completion {
                        slot_id,
                        status: 0,
                        keepalive: false,
                        client: Some(client),
                    })
                    .await;
            }
        }
    }

    /// Harvest one completion: account for it, then recycle or retire the
    /// slot.
    async fn complete(&mut self, done: Completion) {
        let slot_id = done.slot_id;
        let elapsed = self.slots[slot_id].in_flight_start.elapsed();
        let counters = Arc::clone(&self.counters);
        self.slots[slot_id].trace_end(elapsed.as_secs_f64(), &counters);

        let had = self.slots[slot_id].keepalive;
        if done.keepalive {
            self.slots[slot_id].parked = done.client;
            self.slots[slot_id].keepalive = true;
        } else {
            self.slots[slot_id].parked = None;
            self.slots[slot_id].keepalive = false;
        }
        match (had, done.keepalive) {
            (false, true) => {
                self.keepalives += 1;
                self.peak_keepalives = self.peak_keepalives.max(self.keepalives);
            }
            (true, false) => self.keepalives -= 1,
            _ => {}
        }

        self.statuses.record(done.status);
        self.ring.push(elapsed.as_secs_f64() * 1000.0);
        self.end_reqs += 1;
        self.slots[slot_id].completed += 1;

        if self.should_recycle() {
            self.begin_reqs += 1;
            self.dispatch(slot_id).await;
        } else {
            if self.slots[slot_id].keepalive {
                self.keepalives -= 1;
            }
            self.slots[slot_id].retire();
            self.active -= 1;
        }
    }

    /// Continue a slot only while the run is live and neither the request
    /// count nor the wall-clock limit is exhausted.
    fn should_recycle(&self) -> bool {
        self.flags.is_running()
            && (self.cfg.requests == 0 || self.begin_reqs < self.cfg.requests)
            && (self.cfg.timelimit == 0 || Instant::now() <= self.deadline)
    }

    fn snapshot(&self, stopping: bool) -> Snapshot {
        Snapshot {
            active: self.active,
            keepalives: self.keepalives,
            statuses: self.statuses,
            end_reqs: self.end_reqs,
            bytes: self.counters.totals(),
            latency_ms: self.ring.stats(),
            stopping,
        }
    }
}
