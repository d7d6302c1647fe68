//! Signal surface: soft-stop and tick flags. Watchers only ever store a
//! flag; every decision happens in the engine loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PummelError;

/// Flags shared between the engine loop and the signal watchers.
#[derive(Clone)]
pub struct RunFlags {
    running: Arc<AtomicBool>,
    tick: Arc<AtomicBool>,
}

impl RunFlags {
    pub fn new() -> Self {
        RunFlags {
            running: Arc::new(AtomicBool::new(true)),
            tick: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request a soft stop: in-flight requests drain, none are recycled.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn set_tick(&self) {
        self.tick.store(true, Ordering::Relaxed);
    }

    /// Consume the tick flag.
    pub fn take_tick(&self) -> bool {
        self.tick.swap(false, Ordering::Relaxed)
    }
}

impl Default for RunFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Install signal watchers: INT, TERM, QUIT, USR1 and USR2 request a soft
/// stop; HUP is drained and ignored. Must be called inside the engine
/// runtime.
#[cfg(unix)]
pub fn install(flags: &RunFlags) -> Result<(), PummelError> {
    use tokio::signal::unix::{signal, SignalKind};

    let stop_kinds = [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
        SignalKind::user_defined1(),
        SignalKind::user_defined2(),
    ];
    for kind in stop_kinds {
        let mut sig = signal(kind).map_err(|e| PummelError::Driver {
            operation: "signal setup",
            source: e.to_string(),
        })?;
        let flags = flags.clone();
        tokio::spawn(async move {
            if sig.recv().await.is_some() {
                flags.stop();
            }
        });
    }

    let mut hup = signal(SignalKind::hangup()).map_err(|e| PummelError::Driver {
        operation: "signal setup",
        source: e.to_string(),
    })?;
    tokio::spawn(async move {
        while hup.recv().await.is_some() {}
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install(flags: &RunFlags) -> Result<(), PummelError> {
    let flags = flags.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            flags.stop();
        }
    });
    Ok(())
}
